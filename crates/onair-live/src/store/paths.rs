//! Store layout. Every document and collection path the orchestrator
//! touches is built here.
//!
//! ```text
//! rooms/{room}
//! rooms/{room}/viewers/{user}
//! rooms/{room}/guests/{user}
//! rooms/{room}/join_requests/{user}
//! rooms/{room}/messages/{auto}
//! rooms/{room}/mutes/{user}
//! rooms/{room}/connections/{connection}
//! rooms/{room}/connections/{connection}/offer_candidates/{auto}
//! rooms/{room}/connections/{connection}/answer_candidates/{auto}
//! ```

pub const ROOMS: &str = "rooms";

pub fn room(room_id: &str) -> String {
    format!("{ROOMS}/{room_id}")
}

pub fn viewers(room_id: &str) -> String {
    format!("{ROOMS}/{room_id}/viewers")
}

pub fn viewer(room_id: &str, user_id: &str) -> String {
    format!("{}/{user_id}", viewers(room_id))
}

pub fn guests(room_id: &str) -> String {
    format!("{ROOMS}/{room_id}/guests")
}

pub fn guest(room_id: &str, user_id: &str) -> String {
    format!("{}/{user_id}", guests(room_id))
}

pub fn join_requests(room_id: &str) -> String {
    format!("{ROOMS}/{room_id}/join_requests")
}

pub fn join_request(room_id: &str, requester_id: &str) -> String {
    format!("{}/{requester_id}", join_requests(room_id))
}

pub fn messages(room_id: &str) -> String {
    format!("{ROOMS}/{room_id}/messages")
}

pub fn mutes(room_id: &str) -> String {
    format!("{ROOMS}/{room_id}/mutes")
}

pub fn mute(room_id: &str, user_id: &str) -> String {
    format!("{}/{user_id}", mutes(room_id))
}

pub fn connections(room_id: &str) -> String {
    format!("{ROOMS}/{room_id}/connections")
}

pub fn connection(room_id: &str, connection_id: &str) -> String {
    format!("{}/{connection_id}", connections(room_id))
}

pub fn offer_candidates(room_id: &str, connection_id: &str) -> String {
    format!("{}/offer_candidates", connection(room_id, connection_id))
}

pub fn answer_candidates(room_id: &str, connection_id: &str) -> String {
    format!("{}/answer_candidates", connection(room_id, connection_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::split_path;

    #[test]
    fn documents_live_in_their_collection() {
        assert_eq!(split_path(&viewer("r1", "u1")), (viewers("r1").as_str(), "u1"));
        assert_eq!(split_path(&guest("r1", "u1")).0, guests("r1"));
        assert_eq!(split_path(&mute("r1", "u1")).0, mutes("r1"));
        assert_eq!(split_path(&room("r1")), (ROOMS, "r1"));
    }

    #[test]
    fn candidate_streams_hang_off_the_connection() {
        let conn = connection("r1", "2:ab_cd");
        assert_eq!(offer_candidates("r1", "2:ab_cd"), format!("{conn}/offer_candidates"));
        assert_eq!(answer_candidates("r1", "2:ab_cd"), format!("{conn}/answer_candidates"));
    }
}
