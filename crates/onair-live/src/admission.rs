//! Guest admission: viewers ask to go on stage, the host approves or
//! declines, and may remove a guest at any time.
//!
//! ```text
//! idle ──request──▶ pending ──accept──▶ approved (guest record exists)
//!   ▲                  │
//!   │                  └──decline──▶ declined
//!   └──── request record deleted (cancel / remove) ────┘
//! ```

use onair_common::{LiveError, LiveEvent, Result};
use tracing::{debug, info, warn};

use crate::chat::post_system_message;
use crate::context::LiveContext;
use crate::identity::Identity;
use crate::model::{Guest, JoinAccess, JoinRequest, RequestStatus, Room};
use crate::presence::decrement_viewers;
use crate::room::txn_room;
use crate::store::{paths, SetMode, StoreExt, Subscription, Transaction, TxnExt, Watch};

pub struct GuestAdmission {
    ctx: LiveContext,
}

impl GuestAdmission {
    pub fn new(ctx: LiveContext) -> Self {
        Self { ctx }
    }

    /// Ask to join the stage. Re-requesting overwrites the previous
    /// request. Never retried automatically.
    pub async fn request_to_join(&self, room_id: &str, requester: &Identity) -> Result<JoinRequest> {
        requester.validate()?;
        let room: Room = self
            .ctx
            .store
            .get_as(&paths::room(room_id))
            .await?
            .ok_or_else(|| LiveError::NotFound(format!("room {room_id}")))?;

        if let Err(e) = self.check_request_policy(&room, &requester.user_id).await {
            debug!(room_id, user_id = %requester.user_id, reason = %e, "Join request denied");
            return Err(e);
        }

        let request = JoinRequest {
            requester_id: requester.user_id.clone(),
            nickname: requester.display_name.clone(),
            avatar: requester.avatar_ref.clone(),
            status: RequestStatus::Pending,
            created_at: self.ctx.now(),
        };
        self.ctx
            .store
            .put(
                &paths::join_request(room_id, &requester.user_id),
                &request,
                SetMode::Replace,
            )
            .await?;
        info!(room_id, user_id = %requester.user_id, "Join request sent");
        Ok(request)
    }

    async fn check_request_policy(&self, room: &Room, requester_id: &str) -> Result<()> {
        if !room.is_live() {
            return Err(LiveError::Policy("room has ended".into()));
        }
        if room.is_host(requester_id) {
            return Err(LiveError::Policy("the host is already on stage".into()));
        }
        if !room.allow_guests {
            return Err(LiveError::Policy("this room does not take guests".into()));
        }
        match room.join_access {
            JoinAccess::Invite => {
                return Err(LiveError::Policy("the stage is invite only".into()));
            }
            JoinAccess::Followers => {
                if !self.ctx.follows.follows(requester_id, &room.host_id).await {
                    return Err(LiveError::Policy("only followers may join the stage".into()));
                }
            }
            JoinAccess::Everyone => {}
        }
        if self
            .ctx
            .store
            .get(&paths::guest(&room.id, requester_id))
            .await?
            .is_some()
        {
            return Err(LiveError::Policy("already on stage".into()));
        }
        Ok(())
    }

    /// Withdraw a pending request. Returns whether one was withdrawn.
    pub async fn cancel_request(&self, room_id: &str, requester_id: &str) -> Result<bool> {
        let mut cancelled = false;
        self.ctx
            .store
            .transact(&mut |txn: &mut dyn Transaction| {
                cancelled = false;
                let path = paths::join_request(room_id, requester_id);
                if let Some(req) = txn.get_as::<JoinRequest>(&path)? {
                    if req.status == RequestStatus::Pending {
                        txn.delete(&path);
                        cancelled = true;
                    }
                }
                Ok(())
            })
            .await?;
        if cancelled {
            debug!(room_id, user_id = requester_id, "Join request cancelled");
        }
        Ok(cancelled)
    }

    /// Approve a request and put the requester on stage. Capacity is
    /// checked inside the transaction, so racing accepts cannot overfill
    /// the stage. Accepting an already approved request returns the
    /// existing guest.
    pub async fn accept_guest(&self, room_id: &str, requester_id: &str) -> Result<Guest> {
        let now = self.ctx.now();
        let mut accepted: Option<Guest> = None;
        let mut newly_accepted = false;

        self.ctx
            .store
            .transact(&mut |txn: &mut dyn Transaction| {
                accepted = None;
                newly_accepted = false;

                let room = txn_room(txn, room_id)?;
                if !room.is_live() {
                    return Err(LiveError::Policy("room has ended".into()));
                }
                let request_path = paths::join_request(room_id, requester_id);
                let mut request: JoinRequest = txn
                    .get_as(&request_path)?
                    .ok_or_else(|| LiveError::NotFound(format!("join request from {requester_id}")))?;

                let guest_path = paths::guest(room_id, requester_id);
                if let Some(existing) = txn.get_as::<Guest>(&guest_path)? {
                    accepted = Some(existing);
                    return Ok(());
                }
                if request.status == RequestStatus::Declined {
                    return Err(LiveError::Policy("request was declined".into()));
                }

                let on_stage = txn.list(&paths::guests(room_id)).len();
                if on_stage >= room.max_guests as usize {
                    return Err(LiveError::Capacity {
                        max_guests: room.max_guests,
                    });
                }

                let guest = Guest {
                    user_id: request.requester_id.clone(),
                    nickname: request.nickname.clone(),
                    avatar: request.avatar.clone(),
                    joined_at: now,
                };
                txn.set_as(&guest_path, &guest, SetMode::Replace)?;
                request.status = RequestStatus::Approved;
                txn.set_as(&request_path, &request, SetMode::Replace)?;

                // A guest is never also counted as a viewer.
                let viewer_path = paths::viewer(room_id, requester_id);
                if txn.delete(&viewer_path) {
                    decrement_viewers(txn, room_id)?;
                }

                accepted = Some(guest);
                newly_accepted = true;
                Ok(())
            })
            .await?;

        let guest = accepted.ok_or_else(|| LiveError::NotFound(format!("guest {requester_id}")))?;
        if newly_accepted {
            self.announce(room_id, &format!("{} joined the stage", guest.nickname))
                .await;
            self.ctx.publish(LiveEvent::GuestAccepted {
                room_id: room_id.to_string(),
                user_id: requester_id.to_string(),
            });
            info!(room_id, user_id = requester_id, "Guest accepted");
        }
        Ok(guest)
    }

    /// Decline a pending request. Declining twice is a no-op; an approved
    /// request must be undone with `remove_guest` instead.
    pub async fn decline_guest(&self, room_id: &str, requester_id: &str) -> Result<()> {
        self.ctx
            .store
            .transact(&mut |txn: &mut dyn Transaction| {
                let path = paths::join_request(room_id, requester_id);
                let mut request: JoinRequest = txn
                    .get_as(&path)?
                    .ok_or_else(|| LiveError::NotFound(format!("join request from {requester_id}")))?;
                match request.status {
                    RequestStatus::Pending => {
                        request.status = RequestStatus::Declined;
                        txn.set_as(&path, &request, SetMode::Replace)?;
                        Ok(())
                    }
                    RequestStatus::Declined => Ok(()),
                    RequestStatus::Approved => Err(LiveError::Policy(
                        "request already approved; remove the guest instead".into(),
                    )),
                }
            })
            .await?;
        info!(room_id, user_id = requester_id, "Join request declined");
        Ok(())
    }

    /// Take a guest off the stage. Deletes the guest record and its join
    /// request so the user may ask again. Returns whether a guest was
    /// removed.
    pub async fn remove_guest(&self, room_id: &str, guest_id: &str) -> Result<bool> {
        let mut removed: Option<Guest> = None;
        self.ctx
            .store
            .transact(&mut |txn: &mut dyn Transaction| {
                removed = None;
                let guest_path = paths::guest(room_id, guest_id);
                let Some(guest) = txn.get_as::<Guest>(&guest_path)? else {
                    return Ok(());
                };
                txn.delete(&guest_path);
                txn.delete(&paths::join_request(room_id, guest_id));
                removed = Some(guest);
                Ok(())
            })
            .await?;

        let Some(guest) = removed else {
            return Ok(false);
        };
        self.announce(room_id, &format!("{} left the stage", guest.nickname))
            .await;
        self.ctx.publish(LiveEvent::GuestRemoved {
            room_id: room_id.to_string(),
            user_id: guest_id.to_string(),
        });
        info!(room_id, user_id = guest_id, "Guest removed");
        Ok(true)
    }

    async fn announce(&self, room_id: &str, text: &str) {
        // The state change already committed; a lost announcement is not
        // worth failing the call over.
        if let Err(e) = post_system_message(&self.ctx, room_id, text).await {
            warn!(room_id, error = %e, "Failed to post system message");
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn request(&self, room_id: &str, requester_id: &str) -> Result<Option<JoinRequest>> {
        Ok(self
            .ctx
            .store
            .get_as(&paths::join_request(room_id, requester_id))
            .await?)
    }

    pub async fn pending_requests(&self, room_id: &str) -> Result<Vec<JoinRequest>> {
        let requests: Vec<(String, JoinRequest)> =
            self.ctx.store.list_as(&paths::join_requests(room_id)).await?;
        Ok(requests
            .into_iter()
            .map(|(_, r)| r)
            .filter(|r| r.status == RequestStatus::Pending)
            .collect())
    }

    pub async fn guests(&self, room_id: &str) -> Result<Vec<Guest>> {
        let guests: Vec<(String, Guest)> = self.ctx.store.list_as(&paths::guests(room_id)).await?;
        Ok(guests.into_iter().map(|(_, g)| g).collect())
    }

    pub async fn watch_requests(&self, room_id: &str) -> Result<Subscription> {
        Ok(self
            .ctx
            .store
            .subscribe(Watch::Collection(paths::join_requests(room_id)))
            .await?)
    }

    pub async fn watch_guests(&self, room_id: &str) -> Result<Subscription> {
        Ok(self
            .ctx
            .store
            .subscribe(Watch::Collection(paths::guests(room_id)))
            .await?)
    }
}
