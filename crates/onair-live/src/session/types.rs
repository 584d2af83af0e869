use std::fmt;

use crate::model::{ChatMessage, JoinRequest};
use crate::peer::{PeerEvent, RemoteStream};

/// Where the local participant stands in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantRole {
    Host,
    Guest,
    Viewer,
}

impl ParticipantRole {
    pub fn is_on_stage(self) -> bool {
        matches!(self, ParticipantRole::Host | ParticipantRole::Guest)
    }
}

impl fmt::Display for ParticipantRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ParticipantRole::Host => "host",
            ParticipantRole::Guest => "guest",
            ParticipantRole::Viewer => "viewer",
        };
        f.write_str(s)
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `leave()` was called or the session handle was dropped.
    Left,
    RoomEnded,
    /// The host took this guest off the stage.
    Removed,
    /// A store subscription ended.
    StoreClosed,
}

/// Updates for the rendering layer.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    RoleChanged(ParticipantRole),
    RoomUpdated { viewer_count: i64, like_count: i64 },
    ChatMessage(ChatMessage),
    /// Host only: a viewer asked to join the stage.
    JoinRequested(JoinRequest),
    PeerConnected { remote_id: String },
    StreamReady { remote_id: String, stream: RemoteStream },
    StreamRemoved { remote_id: String },
    LinkFailed { remote_id: String, reason: String },
    /// Local capture failed while on stage; links run receive-only.
    MediaDegraded,
    Closed(CloseReason),
}

impl From<PeerEvent> for SessionEvent {
    fn from(event: PeerEvent) -> Self {
        match event {
            PeerEvent::Connected { remote_id } => SessionEvent::PeerConnected { remote_id },
            PeerEvent::StreamReady { remote_id, stream } => {
                SessionEvent::StreamReady { remote_id, stream }
            }
            PeerEvent::StreamRemoved { remote_id } => SessionEvent::StreamRemoved { remote_id },
            PeerEvent::LinkFailed { remote_id, reason } => {
                SessionEvent::LinkFailed { remote_id, reason }
            }
        }
    }
}
