//! A participant's handle on one live room.
//!
//! [`LiveSession`] ties the room, presence, admission, chat and peer layers
//! together for a single local user. Hosting creates the room; joining
//! registers presence. A background task then follows the room until the
//! user leaves, the room ends, or the host removes them from the stage,
//! and reports everything the UI needs as [`SessionEvent`]s.

mod coordinator;
mod types;

pub use types::{CloseReason, ParticipantRole, SessionEvent};

use std::sync::Arc;

use onair_common::{LiveError, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admission::GuestAdmission;
use crate::chat::ChatChannel;
use crate::context::LiveContext;
use crate::identity::Identity;
use crate::model::{ChatMessage, Guest, JoinRequest, MessageKind, RoomSettings};
use crate::peer::{MediaSource, PeerTransport};
use crate::presence::{JoinOutcome, PresenceTracker};
use crate::room::RoomManager;

use coordinator::Coordinator;

/// Session events buffered for a slow consumer before new ones are dropped.
pub const EVENT_CAPACITY: usize = 256;

pub struct LiveSession {
    ctx: LiveContext,
    room_id: String,
    me: Identity,
    role: watch::Receiver<ParticipantRole>,
    rooms: RoomManager,
    chat: ChatChannel,
    admission: GuestAdmission,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LiveSession {
    /// Create a room hosted by `host` and go live.
    pub async fn host(
        ctx: LiveContext,
        transport: Arc<dyn PeerTransport>,
        media: Arc<dyn MediaSource>,
        host: Identity,
        title: &str,
        settings: RoomSettings,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        let rooms = RoomManager::new(ctx.clone());
        let room_id = rooms.create_room(&host, title, settings).await?;
        match Self::start(ctx, transport, media, room_id.clone(), host).await {
            Ok(started) => Ok(started),
            Err(e) => {
                if let Err(end_err) = rooms.end_room(&room_id).await {
                    warn!(room_id = %room_id, error = %end_err, "Failed to end room after start failure");
                }
                Err(e)
            }
        }
    }

    /// Join a live room as a viewer.
    pub async fn join(
        ctx: LiveContext,
        transport: Arc<dyn PeerTransport>,
        media: Arc<dyn MediaSource>,
        room_id: &str,
        me: Identity,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        let presence = PresenceTracker::new(ctx.clone());
        let outcome = presence.join(room_id, &me).await?;
        let user_id = me.user_id.clone();
        match Self::start(ctx, transport, media, room_id.to_string(), me).await {
            Ok(started) => Ok(started),
            Err(e) => {
                if outcome == JoinOutcome::Joined {
                    if let Err(leave_err) = presence.leave(room_id, &user_id).await {
                        warn!(room_id, error = %leave_err, "Failed to leave after start failure");
                    }
                }
                Err(e)
            }
        }
    }

    async fn start(
        ctx: LiveContext,
        transport: Arc<dyn PeerTransport>,
        media: Arc<dyn MediaSource>,
        room_id: String,
        me: Identity,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>)> {
        let rooms = RoomManager::new(ctx.clone());
        let room = rooms.room(&room_id).await?;
        if !room.is_live() {
            return Err(LiveError::Policy("the room has ended".into()));
        }

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        let shutdown = CancellationToken::new();
        let coordinator = Coordinator::new(
            ctx.clone(),
            transport,
            media,
            &room,
            me.clone(),
            tx,
            shutdown.clone(),
        );
        let role = coordinator.role_receiver();
        // Subscribe before spawning so failures reach the caller.
        let feeds = coordinator.open_feeds().await?;
        let task = tokio::spawn(coordinator.run(feeds));

        let initial = *role.borrow();
        info!(room_id = %room_id, user_id = %me.user_id, role = %initial, "Session started");
        let session = Self {
            chat: ChatChannel::new(ctx.clone()),
            admission: GuestAdmission::new(ctx.clone()),
            rooms,
            ctx,
            room_id,
            me,
            role,
            shutdown,
            task: Some(task),
        };
        Ok((session, rx))
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn identity(&self) -> &Identity {
        &self.me
    }

    pub fn context(&self) -> &LiveContext {
        &self.ctx
    }

    /// Current role. Changes when the host accepts this user onto the stage.
    pub fn role(&self) -> ParticipantRole {
        *self.role.borrow()
    }

    /// A receiver that observes role changes.
    pub fn watch_role(&self) -> watch::Receiver<ParticipantRole> {
        self.role.clone()
    }

    // -----------------------------------------------------------------------
    // Everyone
    // -----------------------------------------------------------------------

    pub async fn send_message(&self, text: &str) -> Result<ChatMessage> {
        self.chat
            .send_message(&self.room_id, &self.me, text, MessageKind::Message)
            .await
    }

    pub async fn send_reaction(&self, reaction: &str) -> Result<ChatMessage> {
        self.chat.send_reaction(&self.room_id, &self.me, reaction).await
    }

    pub async fn like(&self) -> Result<i64> {
        self.rooms.increment_like(&self.room_id).await
    }

    pub async fn report(&self, target_id: &str, reason: &str) -> Result<()> {
        self.chat
            .report_user(&self.room_id, &self.me, target_id, reason)
            .await
    }

    pub async fn request_to_join(&self) -> Result<JoinRequest> {
        self.admission.request_to_join(&self.room_id, &self.me).await
    }

    pub async fn cancel_request(&self) -> Result<bool> {
        self.admission
            .cancel_request(&self.room_id, &self.me.user_id)
            .await
    }

    // -----------------------------------------------------------------------
    // Host only
    // -----------------------------------------------------------------------

    fn require_host(&self, action: &str) -> Result<()> {
        if self.role() == ParticipantRole::Host {
            Ok(())
        } else {
            Err(LiveError::Policy(format!("only the host can {action}")))
        }
    }

    pub async fn accept_guest(&self, requester_id: &str) -> Result<Guest> {
        self.require_host("accept guests")?;
        self.admission.accept_guest(&self.room_id, requester_id).await
    }

    pub async fn decline_guest(&self, requester_id: &str) -> Result<()> {
        self.require_host("decline guests")?;
        self.admission.decline_guest(&self.room_id, requester_id).await
    }

    pub async fn remove_guest(&self, guest_id: &str) -> Result<bool> {
        self.require_host("remove guests")?;
        self.admission.remove_guest(&self.room_id, guest_id).await
    }

    pub async fn mute_user(&self, target_id: &str) -> Result<()> {
        self.chat
            .mute_user(&self.room_id, &self.me.user_id, target_id)
            .await
    }

    pub async fn unmute_user(&self, target_id: &str) -> Result<bool> {
        self.chat
            .unmute_user(&self.room_id, &self.me.user_id, target_id)
            .await
    }

    /// End the broadcast for everyone. The session closes with
    /// [`CloseReason::RoomEnded`] once the change comes back from the store.
    pub async fn end_room(&self) -> Result<bool> {
        self.require_host("end the room")?;
        self.rooms.end_room(&self.room_id).await
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Stop the session and wait for its records and links to be released.
    /// A host leaving ends the room.
    pub async fn leave(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(room_id = %self.room_id, error = %e, "Session task panicked");
            }
        }
        self.chat.forget_room(&self.room_id);
    }

    /// Whether the background task has finished.
    pub fn is_closed(&self) -> bool {
        self.task.as_ref().map_or(true, |task| task.is_finished())
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
