use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use onair_common::LiveError;

/// One message per sender per room within `min_interval`.
pub struct SendThrottle {
    min_interval: Duration,
    last_sent: Mutex<HashMap<(String, String), DateTime<Utc>>>,
}

impl SendThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Claim a send slot at `now`. On success returns the previous send
    /// time so a failed append can hand the slot back with `restore`.
    pub fn check(
        &self,
        room_id: &str,
        sender_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, LiveError> {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        let key = (room_id.to_string(), sender_id.to_string());
        let previous = last_sent.get(&key).copied();
        if let Some(prev) = previous {
            let elapsed = now - prev;
            if elapsed < self.min_interval {
                let retry_after = self.min_interval - elapsed;
                return Err(LiveError::Throttled {
                    retry_after_ms: retry_after.num_milliseconds().max(1) as u64,
                });
            }
        }
        last_sent.insert(key, now);
        Ok(previous)
    }

    pub fn restore(&self, room_id: &str, sender_id: &str, previous: Option<DateTime<Utc>>) {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        let key = (room_id.to_string(), sender_id.to_string());
        match previous {
            Some(prev) => {
                last_sent.insert(key, prev);
            }
            None => {
                last_sent.remove(&key);
            }
        }
    }

    /// Drop every entry for a room.
    pub fn forget_room(&self, room_id: &str) {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        last_sent.retain(|(room, _), _| room != room_id);
    }
}
