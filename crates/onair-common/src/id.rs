pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Short random tag identifying one offer/answer negotiation of a peer pair.
pub fn new_negotiation_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    let bytes = uuid.as_bytes();
    format!(
        "{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}
