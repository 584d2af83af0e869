//! Viewer join/leave with exactly-once counter accounting.

use chrono::{DateTime, Duration, Utc};
use onair_common::{LiveError, LiveEvent, Result};
use serde_json::json;
use tracing::{debug, info};

use crate::context::LiveContext;
use crate::identity::Identity;
use crate::model::Viewer;
use crate::room::txn_room;
use crate::store::{paths, SetMode, StoreExt, Subscription, Transaction, TxnExt, Watch};

/// What a `join` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// A viewer record was created and the count went up by one.
    Joined,
    /// The user was already a viewer; nothing changed.
    AlreadyPresent,
    /// The user is the host or a guest and is never counted as a viewer.
    OnStage,
}

pub struct PresenceTracker {
    ctx: LiveContext,
}

impl PresenceTracker {
    pub fn new(ctx: LiveContext) -> Self {
        Self { ctx }
    }

    /// Register `who` as a viewer. Duplicate calls are no-ops.
    pub async fn join(&self, room_id: &str, who: &Identity) -> Result<JoinOutcome> {
        who.validate()?;
        let outcome = self
            .ctx
            .retry("presence_join", || async move {
                let now = self.ctx.now();
                let viewer = Viewer {
                    user_id: who.user_id.clone(),
                    nickname: who.display_name.clone(),
                    avatar: who.avatar_ref.clone(),
                    joined_at: now,
                    lease_expires_at: now + self.lease(),
                };
                let mut outcome = JoinOutcome::AlreadyPresent;
                self.ctx
                    .store
                    .transact(&mut |txn: &mut dyn Transaction| {
                        let room = txn_room(txn, room_id)?;
                        if !room.is_live() {
                            return Err(LiveError::Policy("room has ended".into()));
                        }
                        if room.is_host(&viewer.user_id)
                            || txn.get(&paths::guest(room_id, &viewer.user_id)).is_some()
                        {
                            outcome = JoinOutcome::OnStage;
                            return Ok(());
                        }
                        let path = paths::viewer(room_id, &viewer.user_id);
                        if txn.get(&path).is_some() {
                            outcome = JoinOutcome::AlreadyPresent;
                            return Ok(());
                        }
                        txn.set_as(&path, &viewer, SetMode::Replace)?;
                        txn.increment(&paths::room(room_id), "viewer_count", 1)?;
                        outcome = JoinOutcome::Joined;
                        Ok(())
                    })
                    .await?;
                Ok::<_, LiveError>(outcome)
            })
            .await?;

        match outcome {
            JoinOutcome::Joined => {
                self.ctx.publish(LiveEvent::ViewerJoined {
                    room_id: room_id.to_string(),
                    user_id: who.user_id.clone(),
                });
                info!(room_id, user_id = %who.user_id, "Viewer joined");
            }
            other => debug!(room_id, user_id = %who.user_id, ?other, "Join was a no-op"),
        }
        Ok(outcome)
    }

    /// Remove a viewer. Returns whether a record existed; the count only
    /// moves when it did.
    pub async fn leave(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.remove_viewer(room_id, user_id, None).await
    }

    /// Leave, but only if the viewer's lease expired before `cutoff`.
    pub(crate) async fn leave_if_expired(
        &self,
        room_id: &str,
        user_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<bool> {
        self.remove_viewer(room_id, user_id, Some(cutoff)).await
    }

    async fn remove_viewer(
        &self,
        room_id: &str,
        user_id: &str,
        expired_before: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let removed = self
            .ctx
            .retry("presence_leave", || async move {
                let mut removed = false;
                self.ctx
                    .store
                    .transact(&mut |txn: &mut dyn Transaction| {
                        removed = false;
                        let path = paths::viewer(room_id, user_id);
                        let Some(viewer) = txn.get_as::<Viewer>(&path)? else {
                            return Ok(());
                        };
                        if let Some(cutoff) = expired_before {
                            if viewer.lease_expires_at >= cutoff {
                                return Ok(());
                            }
                        }
                        txn.delete(&path);
                        decrement_viewers(txn, room_id)?;
                        removed = true;
                        Ok(())
                    })
                    .await?;
                Ok::<_, LiveError>(removed)
            })
            .await?;

        if removed {
            self.ctx.publish(LiveEvent::ViewerLeft {
                room_id: room_id.to_string(),
                user_id: user_id.to_string(),
            });
            info!(room_id, user_id, "Viewer left");
        }
        Ok(removed)
    }

    /// Push a viewer's lease forward. Returns `false` if the viewer is
    /// gone (for example reaped), in which case the caller should rejoin.
    pub async fn renew_lease(&self, room_id: &str, user_id: &str) -> Result<bool> {
        self.ctx
            .retry("renew_lease", || async move {
                let expires = self.ctx.now() + self.lease();
                let mut renewed = false;
                self.ctx
                    .store
                    .transact(&mut |txn: &mut dyn Transaction| {
                        let path = paths::viewer(room_id, user_id);
                        renewed = txn.get(&path).is_some();
                        if renewed {
                            txn.set(&path, json!({ "lease_expires_at": expires }), SetMode::Merge);
                        }
                        Ok(())
                    })
                    .await?;
                Ok::<_, LiveError>(renewed)
            })
            .await
    }

    pub async fn viewers(&self, room_id: &str) -> Result<Vec<Viewer>> {
        let viewers: Vec<(String, Viewer)> = self.ctx.store.list_as(&paths::viewers(room_id)).await?;
        Ok(viewers.into_iter().map(|(_, v)| v).collect())
    }

    pub async fn viewer(&self, room_id: &str, user_id: &str) -> Result<Option<Viewer>> {
        Ok(self.ctx.store.get_as(&paths::viewer(room_id, user_id)).await?)
    }

    pub async fn watch_viewers(&self, room_id: &str) -> Result<Subscription> {
        Ok(self
            .ctx
            .store
            .subscribe(Watch::Collection(paths::viewers(room_id)))
            .await?)
    }

    fn lease(&self) -> Duration {
        Duration::seconds(self.ctx.config.presence.lease_secs as i64)
    }
}

/// Decrement `viewer_count` inside a transaction that just deleted a
/// viewer record, never letting it go below zero.
pub(crate) fn decrement_viewers(txn: &mut dyn Transaction, room_id: &str) -> Result<()> {
    let room_path = paths::room(room_id);
    let current = txn
        .get(&room_path)
        .and_then(|room| room.get("viewer_count").and_then(|c| c.as_i64()))
        .unwrap_or(0);
    if current > 0 {
        txn.increment(&room_path, "viewer_count", -1)?;
    }
    Ok(())
}
