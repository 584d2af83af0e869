//! Room creation limits.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Guest slots used when the host does not pick a number.
    pub default_max_guests: u32,
    /// Upper bound on `max_guests` accepted at room creation.
    pub max_guests_limit: u32,
    pub max_title_length: u32,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            default_max_guests: 3,
            max_guests_limit: 8,
            max_title_length: 120,
        }
    }
}
