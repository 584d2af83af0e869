//! Peer negotiation settings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// How long a stage participant waits for local media before
    /// falling back to receive-only.
    pub media_timeout_secs: u64,
    /// STUN/TURN urls handed to the transport untouched.
    pub ice_servers: Vec<String>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            media_timeout_secs: 10,
            ice_servers: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
        }
    }
}
