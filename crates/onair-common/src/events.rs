use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Process-local lifecycle events published by the orchestrator's
/// components. Cross-participant coordination never goes through this
/// bus; it exists for local observers (metrics, logging, the simulator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum LiveEvent {
    RoomCreated { room_id: String, host_id: String },
    RoomEnded { room_id: String },
    ViewerJoined { room_id: String, user_id: String },
    ViewerLeft { room_id: String, user_id: String },
    GuestAccepted { room_id: String, user_id: String },
    GuestRemoved { room_id: String, user_id: String },
    UserMuted { room_id: String, user_id: String },
    LinkFailed { room_id: String, local_id: String, remote_id: String },
    #[serde(other)]
    Unknown,
}

pub struct EventBus {
    sender: broadcast::Sender<LiveEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: LiveEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
