//! Configuration schema types for OnAir.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod chat;
mod negotiation;
mod presence;
mod rooms;
mod system;

pub use chat::*;
pub use negotiation::*;
pub use presence::*;
pub use rooms::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OnAirConfig {
    pub rooms: RoomsConfig,
    pub chat: ChatConfig,
    pub presence: PresenceConfig,
    pub negotiation: NegotiationConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}
