//! onair-live: orchestration for live broadcast rooms.
//!
//! A host goes live, viewers join and are counted through leases, viewers
//! may be admitted to the stage as guests, everyone chats, and each
//! participant keeps one negotiated media link per remote participant it
//! should exchange media with. All coordination flows through a
//! [`SignalingStore`]; [`LiveSession`] is the per-user entry point.

pub mod admission;
pub mod chat;
pub mod context;
pub mod identity;
pub mod model;
pub mod peer;
pub mod presence;
pub mod retry;
pub mod room;
pub mod session;
pub mod store;

pub use admission::GuestAdmission;
pub use chat::ChatChannel;
pub use context::LiveContext;
pub use identity::{FollowGraph, Identity, StaticFollowGraph};
pub use model::{
    ChatAccess, ChatMessage, Guest, JoinAccess, JoinRequest, MessageKind, Moderation, Privacy,
    RequestStatus, Room, RoomSettings, RoomStatus, RoomType, Viewer,
};
pub use peer::{
    LoopbackTransport, MediaSource, PeerEvent, PeerOrchestrator, PeerTransport, SyntheticMedia,
};
pub use presence::{JoinOutcome, LeaseReaper, PresenceTracker, ReapReport};
pub use room::RoomManager;
pub use session::{CloseReason, LiveSession, ParticipantRole, SessionEvent};
pub use store::{MemoryStore, SignalingStore, StoreExt, Subscription};
