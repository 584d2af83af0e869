//! The per-participant room task.
//!
//! Watches the room, its guests, viewers, chat and (for the host) join
//! requests; keeps the peer orchestrator's target set current; renews the
//! local lease; and unwinds everything when the session closes.

use std::sync::Arc;
use std::time::Duration;

use onair_common::Result;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::GuestAdmission;
use crate::context::LiveContext;
use crate::identity::Identity;
use crate::model::{ChatMessage, JoinRequest, RequestStatus, Room};
use crate::peer::{
    MediaController, MediaSource, MediaState, Membership, PeerEvent, PeerOrchestrator,
    PeerTransport,
};
use crate::presence::PresenceTracker;
use crate::room::RoomManager;
use crate::store::{paths, Change, ChangeKind, Subscription, Watch};

use super::types::{CloseReason, ParticipantRole, SessionEvent};

/// Store subscriptions owned by one session.
pub(crate) struct Feeds {
    room: Subscription,
    guests: Subscription,
    viewers: Subscription,
    messages: Subscription,
    /// Host only.
    requests: Option<Subscription>,
}

pub(crate) struct Coordinator {
    ctx: LiveContext,
    room_id: String,
    me: Identity,
    role: ParticipantRole,
    role_tx: watch::Sender<ParticipantRole>,
    membership: Membership,
    viewer_count: i64,
    like_count: i64,
    rooms: RoomManager,
    presence: PresenceTracker,
    admission: GuestAdmission,
    media: MediaController,
    media_rx: watch::Receiver<MediaState>,
    last_media: MediaState,
    orchestrator: PeerOrchestrator,
    peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    events: mpsc::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub(crate) fn new(
        ctx: LiveContext,
        transport: Arc<dyn PeerTransport>,
        media_source: Arc<dyn MediaSource>,
        room: &Room,
        me: Identity,
        events: mpsc::Sender<SessionEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let role = if room.is_host(&me.user_id) {
            ParticipantRole::Host
        } else {
            ParticipantRole::Viewer
        };
        let (role_tx, _) = watch::channel(role);

        let timeout = Duration::from_secs(ctx.config.negotiation.media_timeout_secs);
        let mut media = MediaController::new(media_source, timeout);
        if role.is_on_stage() {
            media.start();
        }
        let media_rx = media.subscribe();
        let last_media = media.state();
        let (orchestrator, peer_events) = PeerOrchestrator::new(
            ctx.clone(),
            transport,
            room.id.clone(),
            me.user_id.clone(),
            media.subscribe(),
        );

        Self {
            room_id: room.id.clone(),
            me,
            role,
            role_tx,
            membership: Membership::new(room.host_id.clone()),
            viewer_count: room.viewer_count,
            like_count: room.like_count,
            rooms: RoomManager::new(ctx.clone()),
            presence: PresenceTracker::new(ctx.clone()),
            admission: GuestAdmission::new(ctx.clone()),
            media,
            media_rx,
            last_media,
            orchestrator,
            peer_events,
            events,
            shutdown,
            ctx,
        }
    }

    pub(crate) fn role_receiver(&self) -> watch::Receiver<ParticipantRole> {
        self.role_tx.subscribe()
    }

    pub(crate) async fn open_feeds(&self) -> Result<Feeds> {
        let store = &self.ctx.store;
        let room_id = self.room_id.as_str();
        let requests = if self.role == ParticipantRole::Host {
            Some(store.subscribe(Watch::Collection(paths::join_requests(room_id))).await?)
        } else {
            None
        };
        Ok(Feeds {
            room: store.subscribe(Watch::Document(paths::room(room_id))).await?,
            guests: store.subscribe(Watch::Collection(paths::guests(room_id))).await?,
            viewers: store.subscribe(Watch::Collection(paths::viewers(room_id))).await?,
            messages: store.subscribe(Watch::Collection(paths::messages(room_id))).await?,
            requests,
        })
    }

    pub(crate) async fn run(mut self, mut feeds: Feeds) {
        let reason = match self.prime(&mut feeds) {
            Some(reason) => reason,
            None => self.event_loop(&mut feeds).await,
        };
        drop(feeds);
        self.teardown(reason).await;
    }

    /// Apply the state every subscription replays on creation, then
    /// reconcile once instead of once per replayed document.
    fn prime(&mut self, feeds: &mut Feeds) -> Option<CloseReason> {
        while let Some(change) = feeds.room.try_next() {
            if let Some(reason) = self.apply_room(change) {
                return Some(reason);
            }
        }
        while let Some(change) = feeds.guests.try_next() {
            apply_member(&mut self.membership.guests, change);
        }
        while let Some(change) = feeds.viewers.try_next() {
            apply_member(&mut self.membership.viewers, change);
        }
        self.membership_changed()
    }

    async fn event_loop(&mut self, feeds: &mut Feeds) -> CloseReason {
        let period = Duration::from_secs(self.ctx.config.presence.heartbeat_secs.max(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.shutdown.clone();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return CloseReason::Left,
                change = feeds.room.next() => {
                    let Some(change) = change else { return CloseReason::StoreClosed };
                    if let Some(reason) = self.apply_room(change) {
                        return reason;
                    }
                }
                change = feeds.guests.next() => {
                    let Some(change) = change else { return CloseReason::StoreClosed };
                    apply_member(&mut self.membership.guests, change);
                    while let Some(change) = feeds.guests.try_next() {
                        apply_member(&mut self.membership.guests, change);
                    }
                    if let Some(reason) = self.membership_changed() {
                        return reason;
                    }
                }
                change = feeds.viewers.next() => {
                    let Some(change) = change else { return CloseReason::StoreClosed };
                    apply_member(&mut self.membership.viewers, change);
                    while let Some(change) = feeds.viewers.try_next() {
                        apply_member(&mut self.membership.viewers, change);
                    }
                    if let Some(reason) = self.membership_changed() {
                        return reason;
                    }
                }
                change = feeds.messages.next() => {
                    let Some(change) = change else { return CloseReason::StoreClosed };
                    self.on_message(change);
                }
                change = next_change(&mut feeds.requests) => {
                    let Some(change) = change else { return CloseReason::StoreClosed };
                    self.on_request(change);
                }
                Some(event) = self.peer_events.recv() => self.emit(event.into()),
                Some(_) = self.orchestrator.next_exit(), if !self.orchestrator.is_idle() => {}
                Ok(()) = self.media_rx.changed() => self.on_media_changed(),
                _ = heartbeat.tick() => self.heartbeat().await,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Room and membership
    // -----------------------------------------------------------------------

    fn apply_room(&mut self, change: Change) -> Option<CloseReason> {
        let Some(value) = change.value else {
            warn!(room_id = %self.room_id, "Room document disappeared");
            return Some(CloseReason::RoomEnded);
        };
        let room: Room = match serde_json::from_value(value) {
            Ok(room) => room,
            Err(e) => {
                warn!(room_id = %self.room_id, error = %e, "Ignoring undecodable room update");
                return None;
            }
        };
        if !room.is_live() {
            return Some(CloseReason::RoomEnded);
        }
        if room.viewer_count != self.viewer_count || room.like_count != self.like_count {
            self.viewer_count = room.viewer_count;
            self.like_count = room.like_count;
            self.emit(SessionEvent::RoomUpdated {
                viewer_count: room.viewer_count,
                like_count: room.like_count,
            });
        }
        None
    }

    fn membership_changed(&mut self) -> Option<CloseReason> {
        if let Some(reason) = self.refresh_role() {
            return Some(reason);
        }
        self.orchestrator.reconcile(&self.membership);
        None
    }

    fn refresh_role(&mut self) -> Option<CloseReason> {
        let user_id = self.me.user_id.as_str();
        let role = if self.membership.host_id == user_id {
            ParticipantRole::Host
        } else if self.membership.guests.contains(user_id) {
            ParticipantRole::Guest
        } else {
            ParticipantRole::Viewer
        };
        if role == self.role {
            return None;
        }
        if self.role == ParticipantRole::Guest && role == ParticipantRole::Viewer {
            info!(room_id = %self.room_id, user_id, "Removed from the stage");
            return Some(CloseReason::Removed);
        }

        info!(room_id = %self.room_id, user_id, from = %self.role, to = %role, "Role changed");
        self.role = role;
        if role.is_on_stage() {
            self.media.start();
        }
        self.role_tx.send_replace(role);
        self.emit(SessionEvent::RoleChanged(role));
        None
    }

    // -----------------------------------------------------------------------
    // Feeds
    // -----------------------------------------------------------------------

    fn on_message(&mut self, change: Change) {
        if change.kind != ChangeKind::Added {
            return;
        }
        let Some(value) = change.value else { return };
        match serde_json::from_value::<ChatMessage>(value) {
            Ok(mut message) => {
                message.id = change.id;
                self.emit(SessionEvent::ChatMessage(message));
            }
            Err(e) => debug!(room_id = %self.room_id, error = %e, "Ignoring undecodable message"),
        }
    }

    fn on_request(&mut self, change: Change) {
        let Some(value) = change.value else { return };
        match serde_json::from_value::<JoinRequest>(value) {
            Ok(request) if request.status == RequestStatus::Pending => {
                self.emit(SessionEvent::JoinRequested(request));
            }
            Ok(_) => {}
            Err(e) => debug!(room_id = %self.room_id, error = %e, "Ignoring undecodable request"),
        }
    }

    fn on_media_changed(&mut self) {
        let state = self.media_rx.borrow_and_update().clone();
        let degraded = self.last_media == MediaState::Pending && state == MediaState::Unavailable;
        if degraded && self.role.is_on_stage() {
            warn!(room_id = %self.room_id, user_id = %self.me.user_id, "On stage without local media");
            self.emit(SessionEvent::MediaDegraded);
        }
        self.last_media = state;
    }

    async fn heartbeat(&mut self) {
        let room_id = self.room_id.as_str();
        let result = match self.role {
            ParticipantRole::Host => self.rooms.renew_host_lease(room_id).await.map(|_| ()),
            ParticipantRole::Viewer => match self.presence.renew_lease(room_id, &self.me.user_id).await {
                Ok(true) => Ok(()),
                Ok(false) => {
                    warn!(room_id, user_id = %self.me.user_id, "Viewer lease lost, rejoining");
                    self.presence.join(room_id, &self.me).await.map(|_| ())
                }
                Err(e) => Err(e),
            },
            ParticipantRole::Guest => Ok(()),
        };
        if let Err(e) = result {
            warn!(room_id, error = %e, "Heartbeat failed");
        }
        // Rebuilds links that failed since the last membership change.
        self.orchestrator.reconcile(&self.membership);
    }

    fn emit(&self, event: SessionEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(room_id = %self.room_id, ?event, "Session event channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    async fn teardown(mut self, reason: CloseReason) {
        self.orchestrator.shutdown().await;
        while let Ok(event) = self.peer_events.try_recv() {
            self.emit(event.into());
        }
        self.media.stop().await;

        if let Err(e) = self.release_records(reason).await {
            warn!(
                room_id = %self.room_id,
                user_id = %self.me.user_id,
                error = %e,
                "Failed to release participant records"
            );
        }
        info!(
            room_id = %self.room_id,
            user_id = %self.me.user_id,
            role = %self.role,
            ?reason,
            "Session closed"
        );
        self.emit(SessionEvent::Closed(reason));
    }

    async fn release_records(&self, reason: CloseReason) -> Result<()> {
        let room_id = self.room_id.as_str();
        let user_id = self.me.user_id.as_str();
        match (self.role, reason) {
            (_, CloseReason::StoreClosed) => {}
            (ParticipantRole::Host, CloseReason::Left) => {
                self.rooms.end_room(room_id).await?;
            }
            (ParticipantRole::Host, _) => {}
            (ParticipantRole::Guest, CloseReason::Left) => {
                self.admission.remove_guest(room_id, user_id).await?;
            }
            (ParticipantRole::Guest, _) => {
                self.ctx.store.delete(&paths::guest(room_id, user_id)).await?;
            }
            (ParticipantRole::Viewer, _) => {
                self.presence.leave(room_id, user_id).await?;
            }
        }
        Ok(())
    }
}

fn apply_member(set: &mut std::collections::BTreeSet<String>, change: Change) {
    match change.kind {
        ChangeKind::Added | ChangeKind::Modified => {
            set.insert(change.id);
        }
        ChangeKind::Removed => {
            set.remove(&change.id);
        }
    }
}

async fn next_change(feed: &mut Option<Subscription>) -> Option<Change> {
    match feed {
        Some(feed) => feed.next().await,
        None => std::future::pending().await,
    }
}
