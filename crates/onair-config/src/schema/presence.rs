//! Presence lease settings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// How long a presence record stays valid without renewal.
    pub lease_secs: u64,
    /// How often a live participant renews its lease.
    pub heartbeat_secs: u64,
    /// How often the reaper sweeps expired leases.
    pub sweep_interval_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            lease_secs: 45,
            heartbeat_secs: 15,
            sweep_interval_secs: 20,
        }
    }
}
