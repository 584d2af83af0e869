//! Lease sweep. Participants that stop renewing are removed the same way
//! an explicit leave would remove them; a host that stops renewing ends
//! the room.

use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use onair_common::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::LiveContext;
use crate::room::RoomManager;

use super::PresenceTracker;

const SWEEP_CONCURRENCY: usize = 4;

/// Result of sweeping one room.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    pub expired_viewers: Vec<String>,
    pub room_ended: bool,
}

pub struct LeaseReaper {
    ctx: LiveContext,
    rooms: RoomManager,
    presence: PresenceTracker,
}

impl LeaseReaper {
    pub fn new(ctx: LiveContext) -> Self {
        Self {
            rooms: RoomManager::new(ctx.clone()),
            presence: PresenceTracker::new(ctx.clone()),
            ctx,
        }
    }

    /// Sweep expired leases in one room.
    pub async fn reap_expired(&self, room_id: &str) -> Result<ReapReport> {
        let mut report = ReapReport::default();
        let Some(room) = self.rooms.get_room(room_id).await? else {
            return Ok(report);
        };
        if !room.is_live() {
            return Ok(report);
        }

        let now = self.ctx.now();
        if room.host_lease_expires_at < now {
            warn!(room_id, user_id = %room.host_id, "Host lease expired, ending room");
            report.room_ended = self.rooms.end_room(room_id).await?;
        }

        for viewer in self.presence.viewers(room_id).await? {
            if viewer.lease_expires_at >= now {
                continue;
            }
            if self
                .presence
                .leave_if_expired(room_id, &viewer.user_id, now)
                .await?
            {
                info!(room_id, user_id = %viewer.user_id, "Reaped viewer with expired lease");
                report.expired_viewers.push(viewer.user_id);
            }
        }
        Ok(report)
    }

    /// Sweep every live room, a few rooms at a time. Returns the number of
    /// viewers reaped.
    pub async fn sweep(&self) -> Result<usize> {
        let rooms = self.rooms.list_live_rooms().await?;
        let reaped = stream::iter(rooms)
            .map(|room| async move {
                match self.reap_expired(&room.id).await {
                    Ok(report) => report.expired_viewers.len(),
                    Err(e) => {
                        warn!(room_id = %room.id, error = %e, "Lease sweep failed");
                        0
                    }
                }
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .fold(0, |total, n| async move { total + n })
            .await;
        Ok(reaped)
    }

    /// Run `sweep` every `interval` until `cancel` fires.
    pub fn spawn_reaper(self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Lease reaper started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                match self.sweep().await {
                    Ok(0) => {}
                    Ok(n) => debug!(reaped = n, "Lease sweep finished"),
                    Err(e) => warn!(error = %e, "Lease sweep failed"),
                }
            }
            info!("Lease reaper stopped");
        })
    }
}
