//! Chat throttling and moderation settings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Minimum gap between two messages from the same sender.
    pub min_send_interval_ms: u64,
    /// How long a fresh viewer stays silent when `mute_new_users` is on.
    pub newcomer_mute_secs: u64,
    pub max_message_length: u32,
    /// Added to the built-in denylist.
    pub extra_banned_words: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            min_send_interval_ms: 800,
            newcomer_mute_secs: 30,
            max_message_length: 500,
            extra_banned_words: Vec::new(),
        }
    }
}
