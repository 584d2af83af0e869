//! Seam between the orchestrator and the media stack.
//!
//! A [`PeerTransport`] opens one [`PeerLink`] per remote participant. The
//! link produces offers/answers and local candidates and reports its
//! connection state; the orchestrator only moves those payloads through
//! the signaling store.

use async_trait::async_trait;
use onair_common::LiveError;
use tokio::sync::mpsc;

use super::media::LocalMedia;
use super::pairing::ConnectionId;
use super::protocol::{IceCandidate, SessionDescription};

/// Connection state as reported by the media stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl LinkState {
    /// States after which the link is unusable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            LinkState::Disconnected | LinkState::Failed | LinkState::Closed
        )
    }
}

/// Media arriving from the remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteStream {
    pub remote_id: String,
    pub audio: bool,
    pub video: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    StateChanged(LinkState),
    LocalCandidate(IceCandidate),
    RemoteStream(RemoteStream),
}

/// Everything a transport needs to open a link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub connection_id: ConnectionId,
    pub local_id: String,
    pub remote_id: String,
    pub ice_servers: Vec<String>,
    /// Tracks to send. `None` means receive-only for audio and video.
    pub media: Option<LocalMedia>,
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn open(
        &self,
        config: LinkConfig,
    ) -> Result<(Box<dyn PeerLink>, mpsc::UnboundedReceiver<LinkEvent>), LiveError>;
}

#[async_trait]
pub trait PeerLink: Send {
    /// Create an offer and set it as the local description.
    async fn create_offer(&mut self) -> Result<SessionDescription, LiveError>;

    /// Create an answer to the applied remote offer and set it as the
    /// local description.
    async fn create_answer(&mut self) -> Result<SessionDescription, LiveError>;

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), LiveError>;

    fn has_remote_description(&self) -> bool;

    /// Requires a remote description.
    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), LiveError>;

    /// Release the link. Idempotent.
    async fn close(&mut self);
}
