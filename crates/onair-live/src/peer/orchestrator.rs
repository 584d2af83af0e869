//! Reconciliation of the target set against running link tasks.
//!
//! On every membership change the orchestrator diffs the new target set
//! against the previous one: remotes that disappeared (or changed stage
//! status) get their link cancelled, new ones get a link task. A link
//! that fails is purged and forgotten, so the next reconcile that still
//! wants the remote builds a fresh one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use onair_common::LiveEvent;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::LiveContext;

use super::link::{LinkExit, LinkReport, LinkParams, LinkTask, OfferSlots};
use super::media::MediaState;
use super::pairing::ConnectionId;
use super::topology::Membership;
use super::transport::{PeerTransport, RemoteStream};

/// What the rendering layer learns about remote participants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Connected { remote_id: String },
    StreamReady { remote_id: String, stream: RemoteStream },
    StreamRemoved { remote_id: String },
    LinkFailed { remote_id: String, reason: String },
}

struct ActiveLink {
    generation: u64,
    cancel: CancellationToken,
}

pub struct PeerOrchestrator {
    ctx: LiveContext,
    transport: Arc<dyn PeerTransport>,
    room_id: String,
    local_id: String,
    media: watch::Receiver<MediaState>,
    events: mpsc::UnboundedSender<PeerEvent>,
    offers: OfferSlots,
    /// Target set of the last reconcile, with each remote's stage status.
    targets: BTreeMap<String, bool>,
    local_on_stage: bool,
    links: HashMap<String, ActiveLink>,
    tasks: JoinSet<LinkReport>,
    next_generation: u64,
    shutdown: CancellationToken,
}

impl PeerOrchestrator {
    pub fn new(
        ctx: LiveContext,
        transport: Arc<dyn PeerTransport>,
        room_id: impl Into<String>,
        local_id: impl Into<String>,
        media: watch::Receiver<MediaState>,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            ctx,
            transport,
            room_id: room_id.into(),
            local_id: local_id.into(),
            media,
            events: tx,
            offers: OfferSlots::default(),
            targets: BTreeMap::new(),
            local_on_stage: false,
            links: HashMap::new(),
            tasks: JoinSet::new(),
            next_generation: 0,
            shutdown: CancellationToken::new(),
        };
        (orchestrator, rx)
    }

    /// Bring the running links in line with `membership`.
    pub fn reconcile(&mut self, membership: &Membership) {
        let local_on_stage = membership.is_on_stage(&self.local_id);
        let desired = membership.targets_with_stage(&self.local_id);
        // Our own stage change alters what every link sends.
        let stage_changed = local_on_stage != self.local_on_stage;
        self.local_on_stage = local_on_stage;

        let previous = std::mem::take(&mut self.targets);
        for (remote_id, was_on_stage) in &previous {
            if stage_changed || desired.get(remote_id) != Some(was_on_stage) {
                self.cancel_link(remote_id);
            }
        }
        for (remote_id, on_stage) in &desired {
            if stage_changed || previous.get(remote_id) != Some(on_stage) {
                self.spawn_link(remote_id, *on_stage);
            }
        }

        if previous != desired || stage_changed {
            debug!(
                room_id = %self.room_id,
                local_id = %self.local_id,
                targets = desired.len(),
                active = self.links.len(),
                "Target set reconciled"
            );
        }
        self.targets = desired;
    }

    fn spawn_link(&mut self, remote_id: &str, remote_on_stage: bool) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = self.shutdown.child_token();
        let task = LinkTask::new(
            self.ctx.clone(),
            Arc::clone(&self.transport),
            LinkParams {
                room_id: self.room_id.clone(),
                local_id: self.local_id.clone(),
                remote_id: remote_id.to_string(),
                local_on_stage: self.local_on_stage,
                remote_on_stage,
            },
            generation,
            self.media.clone(),
            self.offers.clone(),
            self.events.clone(),
            cancel.clone(),
        );
        self.tasks.spawn(task.run());
        self.links
            .insert(remote_id.to_string(), ActiveLink { generation, cancel });
        debug!(room_id = %self.room_id, remote_id, generation, "Peer link started");
    }

    fn cancel_link(&mut self, remote_id: &str) {
        if let Some(link) = self.links.remove(remote_id) {
            link.cancel.cancel();
            debug!(room_id = %self.room_id, remote_id, "Peer link cancelled");
        }
    }

    /// Wait for the next link task to exit and purge it. `None` when no
    /// task is running.
    pub async fn next_exit(&mut self) -> Option<LinkReport> {
        loop {
            match self.tasks.join_next().await? {
                Ok(report) => {
                    self.purge(&report);
                    return Some(report);
                }
                Err(e) => warn!(room_id = %self.room_id, error = %e, "Peer link task aborted"),
            }
        }
    }

    fn purge(&mut self, report: &LinkReport) {
        let remote_id = report.remote_id.as_str();
        let current = self
            .links
            .get(remote_id)
            .is_some_and(|link| link.generation == report.generation);
        if current {
            self.links.remove(remote_id);
        }
        self.offers
            .release(&ConnectionId::for_pair(&self.local_id, remote_id));

        if report.streamed {
            let _ = self.events.send(PeerEvent::StreamRemoved {
                remote_id: remote_id.to_string(),
            });
        }
        // Links that were already replaced or cancelled end quietly.
        if !current {
            return;
        }
        if let LinkExit::Failed(reason) = &report.exit {
            self.targets.remove(remote_id);
            let _ = self.events.send(PeerEvent::LinkFailed {
                remote_id: remote_id.to_string(),
                reason: reason.clone(),
            });
            self.ctx.publish(LiveEvent::LinkFailed {
                room_id: self.room_id.clone(),
                local_id: self.local_id.clone(),
                remote_id: remote_id.to_string(),
            });
        }
    }

    /// No link task is running or winding down.
    pub fn is_idle(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Remotes with a live link task, sorted.
    pub fn active_remotes(&self) -> Vec<String> {
        let mut remotes: Vec<String> = self.links.keys().cloned().collect();
        remotes.sort();
        remotes
    }

    pub fn targets(&self) -> &BTreeMap<String, bool> {
        &self.targets
    }

    /// Cancel every link and wait until all of them have closed.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        self.links.clear();
        self.targets.clear();
        let mut closed = 0usize;
        while let Some(result) = self.tasks.join_next().await {
            if let Ok(report) = result {
                self.offers
                    .release(&ConnectionId::for_pair(&self.local_id, &report.remote_id));
                if report.streamed {
                    let _ = self.events.send(PeerEvent::StreamRemoved {
                        remote_id: report.remote_id,
                    });
                }
            }
            closed += 1;
        }
        self.shutdown = CancellationToken::new();
        self.local_on_stage = false;
        info!(room_id = %self.room_id, local_id = %self.local_id, closed, "Peer links shut down");
    }
}

impl Drop for PeerOrchestrator {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
