//! One negotiation task per remote participant.
//!
//! The task opens a local link, runs the offer/answer exchange through
//! the pair's connection record, trades candidates through the two
//! append-only candidate streams, and reports how it ended. Every
//! description and candidate is tagged with the negotiation id chosen by
//! the offerer, so leftovers from an earlier link of the same pair are
//! skipped rather than applied.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use onair_common::{new_negotiation_id, LiveError};
use serde_json::json;
use tokio::sync::{mpsc, watch, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::LiveContext;
use crate::store::{paths, Change, ChangeKind, SetMode, Watch};

use super::media::{LocalMedia, MediaState};
use super::orchestrator::PeerEvent;
use super::pairing::{ConnectionId, NegotiationRole};
use super::protocol::{CandidateRecord, ConnectionRecord, IceCandidate, SessionDescription};
use super::transport::{LinkConfig, LinkEvent, LinkState, PeerLink, PeerTransport};

/// How a link task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkExit {
    /// Torn down on purpose (target set changed, shutdown).
    Cancelled,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct LinkReport {
    pub remote_id: String,
    pub generation: u64,
    pub exit: LinkExit,
    /// Whether a remote stream was delivered before the exit.
    pub streamed: bool,
}

// ---------------------------------------------------------------------------
// Offer slots
// ---------------------------------------------------------------------------

/// At most one offering task per connection at a time. A task holds its
/// slot for its whole lifetime, so a restarted link waits for the old one
/// to finish instead of racing it with a second offer.
#[derive(Clone, Default)]
pub(crate) struct OfferSlots {
    slots: Arc<Mutex<HashMap<ConnectionId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl OfferSlots {
    pub(crate) async fn claim(&self, id: &ConnectionId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(id.clone()).or_default())
        };
        slot.lock_owned().await
    }

    #[cfg(test)]
    pub(crate) fn is_claimed(&self, id: &ConnectionId) -> bool {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.get(id).is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Forget an idle slot.
    pub(crate) fn release(&self, id: &ConnectionId) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if slots.get(id).is_some_and(|slot| Arc::strong_count(slot) == 1) {
            slots.remove(id);
        }
    }
}

// ---------------------------------------------------------------------------
// Link task
// ---------------------------------------------------------------------------

pub(crate) struct LinkParams {
    pub room_id: String,
    pub local_id: String,
    pub remote_id: String,
    pub local_on_stage: bool,
    pub remote_on_stage: bool,
}

struct OpenLink {
    link: Box<dyn PeerLink>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
}

pub(crate) struct LinkTask {
    ctx: LiveContext,
    transport: Arc<dyn PeerTransport>,
    params: LinkParams,
    connection_id: ConnectionId,
    generation: u64,
    media: watch::Receiver<MediaState>,
    offers: OfferSlots,
    events: mpsc::UnboundedSender<PeerEvent>,
    cancel: CancellationToken,
    local_media: Option<LocalMedia>,
    streamed: bool,
}

impl LinkTask {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ctx: LiveContext,
        transport: Arc<dyn PeerTransport>,
        params: LinkParams,
        generation: u64,
        media: watch::Receiver<MediaState>,
        offers: OfferSlots,
        events: mpsc::UnboundedSender<PeerEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let connection_id = ConnectionId::for_pair(&params.local_id, &params.remote_id);
        Self {
            ctx,
            transport,
            params,
            connection_id,
            generation,
            media,
            offers,
            events,
            cancel,
            local_media: None,
            streamed: false,
        }
    }

    pub(crate) async fn run(mut self) -> LinkReport {
        let exit = self.drive().await;
        match &exit {
            LinkExit::Cancelled => debug!(
                room_id = %self.params.room_id,
                connection_id = %self.connection_id,
                "Peer link closed"
            ),
            LinkExit::Failed(reason) => warn!(
                room_id = %self.params.room_id,
                local_id = %self.params.local_id,
                remote_id = %self.params.remote_id,
                reason = %reason,
                "Peer link failed"
            ),
        }
        LinkReport {
            remote_id: self.params.remote_id.clone(),
            generation: self.generation,
            exit,
            streamed: self.streamed,
        }
    }

    async fn drive(&mut self) -> LinkExit {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => return LinkExit::Cancelled,
            media = wait_for_media(self.media.clone(), self.params.local_on_stage) => {
                self.local_media = media;
            }
        }

        match NegotiationRole::for_pair(&self.params.local_id, &self.params.remote_id) {
            NegotiationRole::Offerer => {
                let _slot = tokio::select! {
                    _ = cancel.cancelled() => return LinkExit::Cancelled,
                    slot = self.offers.claim(&self.connection_id) => slot,
                };
                let mut open = match self.open().await {
                    Ok(open) => open,
                    Err(e) => return LinkExit::Failed(e.to_string()),
                };
                let exit = self.offer(&mut open).await.unwrap_or_else(failed);
                open.link.close().await;
                exit
            }
            NegotiationRole::Answerer => {
                let mut open = match self.open().await {
                    Ok(open) => open,
                    Err(e) => return LinkExit::Failed(e.to_string()),
                };
                let exit = self.answer(&mut open).await.unwrap_or_else(failed);
                open.link.close().await;
                exit
            }
        }
    }

    async fn open(&self) -> Result<OpenLink, LiveError> {
        let config = LinkConfig {
            connection_id: self.connection_id.clone(),
            local_id: self.params.local_id.clone(),
            remote_id: self.params.remote_id.clone(),
            ice_servers: self.ctx.config.negotiation.ice_servers.clone(),
            media: self.local_media.clone(),
        };
        let (link, events) = self.transport.open(config).await?;
        Ok(OpenLink { link, events })
    }

    // -----------------------------------------------------------------------
    // Offerer
    // -----------------------------------------------------------------------

    async fn offer(&mut self, open: &mut OpenLink) -> Result<LinkExit, LiveError> {
        let cancel = self.cancel.clone();
        let room_id = self.params.room_id.clone();
        let connection = self.connection_id.to_string();
        let record_path = paths::connection(&room_id, &connection);
        let own_candidates = paths::offer_candidates(&room_id, &connection);
        let remote_candidates = paths::answer_candidates(&room_id, &connection);

        // Candidates from an earlier link of this pair are useless now.
        for collection in [&own_candidates, &remote_candidates] {
            for (id, _) in self.ctx.store.list(collection).await? {
                self.ctx.store.delete(&format!("{collection}/{id}")).await?;
            }
        }
        if cancel.is_cancelled() {
            return Ok(LinkExit::Cancelled);
        }

        let negotiation_id = new_negotiation_id();
        let offer = open.link.create_offer().await?;
        let now = self.ctx.now();
        let record = ConnectionRecord {
            offerer_id: self.params.local_id.clone(),
            answerer_id: self.params.remote_id.clone(),
            negotiation_id: negotiation_id.clone(),
            offerer_on_stage: self.params.local_on_stage,
            answerer_on_stage: self.params.remote_on_stage,
            offer: Some(offer),
            answer: None,
            answer_for: None,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&record)?;
        {
            let store = &self.ctx.store;
            let path = record_path.as_str();
            self.ctx
                .retry("write offer", || {
                    let value = value.clone();
                    async move {
                        store
                            .set(path, value, SetMode::Replace)
                            .await
                            .map_err(LiveError::from)
                    }
                })
                .await?;
        }
        info!(
            room_id = %room_id,
            connection_id = %connection,
            negotiation_id = %negotiation_id,
            "Offer written"
        );

        let mut record_sub = self
            .ctx
            .store
            .subscribe(Watch::Document(record_path))
            .await?;
        let mut candidate_sub = self
            .ctx
            .store
            .subscribe(Watch::Collection(remote_candidates))
            .await?;
        let mut seen = HashSet::new();
        let mut early: Vec<IceCandidate> = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(LinkExit::Cancelled),
                change = record_sub.next() => {
                    let Some(change) = change else {
                        return Ok(LinkExit::Failed("signaling store closed".into()));
                    };
                    let Some(record) = decode_record(change) else { continue };
                    if record.negotiation_id != negotiation_id {
                        return Ok(LinkExit::Failed("negotiation superseded".into()));
                    }
                    if open.link.has_remote_description() {
                        continue;
                    }
                    let (Some(answer), Some(answer_for)) = (record.answer, record.answer_for) else {
                        continue;
                    };
                    if answer_for != negotiation_id {
                        continue;
                    }
                    open.link.set_remote_description(answer).await?;
                    debug!(connection_id = %connection, "Answer applied");
                    for candidate in early.drain(..) {
                        apply_candidate(&mut *open.link, candidate).await;
                    }
                }
                change = candidate_sub.next() => {
                    let Some(change) = change else {
                        return Ok(LinkExit::Failed("signaling store closed".into()));
                    };
                    let Some(remote) = accept_candidate(change, &mut seen) else { continue };
                    if remote.negotiation_id != negotiation_id {
                        continue;
                    }
                    if open.link.has_remote_description() {
                        apply_candidate(&mut *open.link, remote.candidate).await;
                    } else {
                        early.push(remote.candidate);
                    }
                }
                event = open.events.recv() => {
                    let Some(event) = event else {
                        return Ok(LinkExit::Failed("link event stream ended".into()));
                    };
                    if let LinkEvent::LocalCandidate(candidate) = event {
                        self.publish_candidate(&own_candidates, &negotiation_id, candidate).await?;
                    } else if let Some(exit) = self.on_link_event(event) {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Answerer
    // -----------------------------------------------------------------------

    async fn answer(&mut self, open: &mut OpenLink) -> Result<LinkExit, LiveError> {
        let cancel = self.cancel.clone();
        let room_id = self.params.room_id.clone();
        let connection = self.connection_id.to_string();
        let record_path = paths::connection(&room_id, &connection);
        let own_candidates = paths::answer_candidates(&room_id, &connection);
        let remote_candidates = paths::offer_candidates(&room_id, &connection);

        let mut record_sub = self
            .ctx
            .store
            .subscribe(Watch::Document(record_path.clone()))
            .await?;
        let mut candidate_sub = self
            .ctx
            .store
            .subscribe(Watch::Collection(remote_candidates))
            .await?;

        let mut current: Option<String> = None;
        // Negotiations this task has moved past or could not apply.
        let mut finished: HashSet<String> = HashSet::new();
        let mut seen = HashSet::new();
        let mut waiting: Vec<CandidateRecord> = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(LinkExit::Cancelled),
                change = record_sub.next() => {
                    let Some(change) = change else {
                        return Ok(LinkExit::Failed("signaling store closed".into()));
                    };
                    let Some(record) = decode_record(change) else { continue };
                    if !self.should_answer(&record, current.as_deref(), &finished) {
                        continue;
                    }
                    let Some(offer) = record.offer else { continue };
                    let negotiation_id = record.negotiation_id;

                    if let Some(previous) = current.take() {
                        debug!(connection_id = %connection, "New negotiation, recycling link");
                        finished.insert(previous);
                        self.recycle(open).await?;
                    }

                    let answer = match answer_offer(&mut *open.link, offer).await {
                        Ok(answer) => answer,
                        Err(e) => {
                            warn!(
                                connection_id = %connection,
                                negotiation_id = %negotiation_id,
                                error = %e,
                                "Offer could not be applied, waiting for a new one"
                            );
                            finished.insert(negotiation_id);
                            self.recycle(open).await?;
                            continue;
                        }
                    };

                    let update = json!({
                        "answer": answer,
                        "answer_for": negotiation_id,
                        "updated_at": self.ctx.now(),
                    });
                    {
                        let store = &self.ctx.store;
                        let path = record_path.as_str();
                        self.ctx
                            .retry("write answer", || {
                                let update = update.clone();
                                async move {
                                    store
                                        .set(path, update, SetMode::Merge)
                                        .await
                                        .map_err(LiveError::from)
                                }
                            })
                            .await?;
                    }
                    info!(
                        room_id = %room_id,
                        connection_id = %connection,
                        negotiation_id = %negotiation_id,
                        "Answer written"
                    );

                    waiting.retain(|c| !finished.contains(&c.negotiation_id));
                    let (ready, later): (Vec<_>, Vec<_>) = waiting
                        .drain(..)
                        .partition(|c| c.negotiation_id == negotiation_id);
                    waiting = later;
                    for remote in ready {
                        apply_candidate(&mut *open.link, remote.candidate).await;
                    }
                    current = Some(negotiation_id);
                }
                change = candidate_sub.next() => {
                    let Some(change) = change else {
                        return Ok(LinkExit::Failed("signaling store closed".into()));
                    };
                    let Some(remote) = accept_candidate(change, &mut seen) else { continue };
                    if finished.contains(&remote.negotiation_id) {
                        continue;
                    }
                    if current.as_deref() == Some(remote.negotiation_id.as_str()) {
                        apply_candidate(&mut *open.link, remote.candidate).await;
                    } else {
                        waiting.push(remote);
                    }
                }
                event = open.events.recv() => {
                    let Some(event) = event else {
                        return Ok(LinkExit::Failed("link event stream ended".into()));
                    };
                    if let LinkEvent::LocalCandidate(candidate) = event {
                        match current.as_deref() {
                            Some(negotiation_id) => {
                                self.publish_candidate(&own_candidates, negotiation_id, candidate)
                                    .await?;
                            }
                            None => debug!(connection_id = %connection, "Dropping candidate with no negotiation"),
                        }
                    } else if let Some(exit) = self.on_link_event(event) {
                        return Ok(exit);
                    }
                }
            }
        }
    }

    /// Answer only fresh offers from the expected peer that were made
    /// under the same view of who is on stage.
    fn should_answer(
        &self,
        record: &ConnectionRecord,
        current: Option<&str>,
        finished: &HashSet<String>,
    ) -> bool {
        let negotiation_id = record.negotiation_id.as_str();
        if record.offer.is_none() || record.offerer_id != self.params.remote_id {
            return false;
        }
        if current == Some(negotiation_id) || finished.contains(negotiation_id) {
            return false;
        }
        if record.answer_for.as_deref() == Some(negotiation_id) {
            // Answered by an earlier link of this pair.
            return false;
        }
        if record.offerer_on_stage != self.params.remote_on_stage
            || record.answerer_on_stage != self.params.local_on_stage
        {
            debug!(
                connection_id = %self.connection_id,
                negotiation_id,
                "Offer made under a different stage view, waiting"
            );
            return false;
        }
        true
    }

    async fn recycle(&self, open: &mut OpenLink) -> Result<(), LiveError> {
        open.link.close().await;
        *open = self.open().await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Shared
    // -----------------------------------------------------------------------

    async fn publish_candidate(
        &self,
        collection: &str,
        negotiation_id: &str,
        candidate: IceCandidate,
    ) -> Result<(), LiveError> {
        let record = CandidateRecord {
            negotiation_id: negotiation_id.to_string(),
            candidate,
            created_at: self.ctx.now(),
        };
        let value = serde_json::to_value(&record)?;
        let store = &self.ctx.store;
        self.ctx
            .retry("append candidate", || {
                let value = value.clone();
                async move { store.add(collection, value).await.map_err(LiveError::from) }
            })
            .await?;
        Ok(())
    }

    fn on_link_event(&mut self, event: LinkEvent) -> Option<LinkExit> {
        let remote_id = self.params.remote_id.clone();
        match event {
            LinkEvent::StateChanged(LinkState::Connected) => {
                info!(
                    room_id = %self.params.room_id,
                    local_id = %self.params.local_id,
                    remote_id = %remote_id,
                    "Peer link connected"
                );
                let _ = self.events.send(PeerEvent::Connected { remote_id });
                None
            }
            LinkEvent::StateChanged(state) if state.is_terminal() => {
                Some(LinkExit::Failed(format!("link {state:?}").to_lowercase()))
            }
            LinkEvent::StateChanged(_) | LinkEvent::LocalCandidate(_) => None,
            LinkEvent::RemoteStream(stream) => {
                self.streamed = true;
                let _ = self.events.send(PeerEvent::StreamReady { remote_id, stream });
                None
            }
        }
    }
}

fn failed(e: LiveError) -> LinkExit {
    LinkExit::Failed(e.to_string())
}

/// Block until local media settles when the local side is on stage.
async fn wait_for_media(
    mut media: watch::Receiver<MediaState>,
    on_stage: bool,
) -> Option<LocalMedia> {
    if !on_stage {
        return None;
    }
    loop {
        let state = media.borrow_and_update().clone();
        if state != MediaState::Pending {
            return state.local_media().cloned();
        }
        if media.changed().await.is_err() {
            return None;
        }
    }
}

async fn answer_offer(
    link: &mut dyn PeerLink,
    offer: SessionDescription,
) -> Result<SessionDescription, LiveError> {
    link.set_remote_description(offer).await?;
    link.create_answer().await
}

async fn apply_candidate(link: &mut dyn PeerLink, candidate: IceCandidate) {
    if let Err(e) = link.add_ice_candidate(candidate).await {
        debug!(error = %e, "Ignoring unusable candidate");
    }
}

fn decode_record(change: Change) -> Option<ConnectionRecord> {
    let value = change.value?;
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            debug!(path = %change.path, error = %e, "Ignoring malformed connection record");
            None
        }
    }
}

/// New, decodable candidates only. Each document id is taken once.
fn accept_candidate(change: Change, seen: &mut HashSet<String>) -> Option<CandidateRecord> {
    if change.kind == ChangeKind::Removed || !seen.insert(change.id.clone()) {
        return None;
    }
    let value = change.value?;
    match serde_json::from_value(value) {
        Ok(candidate) => Some(candidate),
        Err(e) => {
            debug!(path = %change.path, error = %e, "Ignoring malformed candidate");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn change(kind: ChangeKind, id: &str, value: Option<Value>) -> Change {
        Change {
            kind,
            path: format!("c/{id}"),
            id: id.into(),
            value,
        }
    }

    fn candidate_doc(negotiation: &str) -> Value {
        json!({
            "negotiation_id": negotiation,
            "candidate": { "candidate": "candidate:loopback 1 0" },
            "created_at": "2024-01-01T00:00:00Z",
        })
    }

    #[test]
    fn candidates_are_taken_once() {
        let mut seen = HashSet::new();
        let first = accept_candidate(
            change(ChangeKind::Added, "1", Some(candidate_doc("n1"))),
            &mut seen,
        );
        assert_eq!(first.unwrap().negotiation_id, "n1");
        assert!(accept_candidate(
            change(ChangeKind::Modified, "1", Some(candidate_doc("n1"))),
            &mut seen
        )
        .is_none());
        assert!(accept_candidate(change(ChangeKind::Removed, "2", None), &mut seen).is_none());
        assert!(accept_candidate(
            change(ChangeKind::Added, "3", Some(json!({ "junk": true }))),
            &mut seen
        )
        .is_none());
    }

    #[tokio::test]
    async fn offer_slot_is_exclusive_until_dropped() {
        let slots = OfferSlots::default();
        let id = ConnectionId::for_pair("a", "b");
        let guard = slots.claim(&id).await;
        assert!(slots.is_claimed(&id));

        slots.release(&id);
        assert!(slots.is_claimed(&id));

        drop(guard);
        assert!(!slots.is_claimed(&id));
        slots.release(&id);
        assert!(slots.slots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn viewer_does_not_wait_for_media() {
        let (_tx, rx) = watch::channel(MediaState::Pending);
        assert_eq!(wait_for_media(rx, false).await, None);
    }

    #[tokio::test]
    async fn stage_waits_for_media_to_settle() {
        let (tx, rx) = watch::channel(MediaState::Pending);
        let waiter = tokio::spawn(wait_for_media(rx, true));
        let media = LocalMedia {
            stream_id: "s".into(),
            audio: true,
            video: false,
        };
        tx.send_replace(MediaState::Ready(media.clone()));
        assert_eq!(waiter.await.unwrap(), Some(media));
    }
}
