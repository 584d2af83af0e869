//! Peer connection orchestration: one negotiated link per remote
//! participant in the target set, signaled through the store.

mod link;
pub mod loopback;
pub mod media;
mod orchestrator;
pub mod pairing;
pub mod protocol;
pub mod topology;
pub mod transport;

pub use link::{LinkExit, LinkReport};
pub use loopback::LoopbackTransport;
pub use media::{DeniedMedia, LocalMedia, MediaController, MediaSource, MediaState, SyntheticMedia};
pub use orchestrator::{PeerEvent, PeerOrchestrator};
pub use pairing::{ConnectionId, NegotiationRole};
pub use topology::{target_set, Membership};
pub use transport::{LinkConfig, LinkEvent, LinkState, PeerLink, PeerTransport, RemoteStream};

#[cfg(test)]
mod tests;
