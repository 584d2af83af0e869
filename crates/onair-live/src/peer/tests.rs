use std::sync::Arc;
use std::time::Duration;

use onair_common::LiveEvent;
use onair_config::OnAirConfig;
use tokio::sync::mpsc;

use super::*;
use crate::context::LiveContext;
use crate::store::{paths, MemoryStore, StoreExt};
use protocol::ConnectionRecord;

const ROOM: &str = "r1";

fn context() -> LiveContext {
    context_with_store().0
}

fn context_with_store() -> (LiveContext, Arc<MemoryStore>) {
    let mut config = OnAirConfig::default();
    config.retry.base_delay_ms = 1;
    config.retry.max_delay_ms = 2;
    let store = Arc::new(MemoryStore::new());
    (LiveContext::new(store.clone(), config), store)
}

struct Peer {
    orchestrator: PeerOrchestrator,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    seen: Vec<PeerEvent>,
    media: MediaController,
}

impl Peer {
    /// Wait until an event matching `pred` has arrived. Events are kept,
    /// so waits may be issued in any order.
    async fn wait(&mut self, pred: impl Fn(&PeerEvent) -> bool) -> PeerEvent {
        if let Some(event) = self.seen.iter().find(|e| pred(e)) {
            return event.clone();
        }
        let events = &mut self.events;
        let seen = &mut self.seen;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                seen.push(event.clone());
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for peer event")
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.seen.push(event);
        }
    }

    /// Forget history so later waits only match new events.
    fn clear(&mut self) {
        self.drain();
        self.seen.clear();
    }
}

fn peer(
    ctx: &LiveContext,
    transport: &LoopbackTransport,
    id: &str,
    source: Arc<dyn MediaSource>,
    on_stage: bool,
) -> Peer {
    let mut media = MediaController::new(source, Duration::from_secs(1));
    if on_stage {
        media.start();
    }
    let (orchestrator, events) = PeerOrchestrator::new(
        ctx.clone(),
        Arc::new(transport.clone()),
        ROOM,
        id,
        media.subscribe(),
    );
    Peer {
        orchestrator,
        events,
        seen: Vec::new(),
        media,
    }
}

fn stage(ctx: &LiveContext, transport: &LoopbackTransport, id: &str) -> Peer {
    peer(ctx, transport, id, Arc::new(SyntheticMedia::default()), true)
}

fn viewer(ctx: &LiveContext, transport: &LoopbackTransport, id: &str) -> Peer {
    peer(ctx, transport, id, Arc::new(SyntheticMedia::default()), false)
}

fn membership(host: &str, guests: &[&str], viewers: &[&str]) -> Membership {
    let mut m = Membership::new(host);
    m.guests = guests.iter().map(|s| s.to_string()).collect();
    m.viewers = viewers.iter().map(|s| s.to_string()).collect();
    m
}

fn connected(remote: &str) -> impl Fn(&PeerEvent) -> bool + '_ {
    move |e| matches!(e, PeerEvent::Connected { remote_id } if remote_id == remote)
}

fn stream_from(remote: &str) -> impl Fn(&PeerEvent) -> bool + '_ {
    move |e| matches!(e, PeerEvent::StreamReady { remote_id, .. } if remote_id == remote)
}

#[tokio::test]
async fn host_and_viewer_negotiate_once() {
    let ctx = context();
    let transport = LoopbackTransport::new();
    let mut host = stage(&ctx, &transport, "h");
    let mut v = viewer(&ctx, &transport, "v");
    let room = membership("h", &[], &["v"]);

    host.orchestrator.reconcile(&room);
    v.orchestrator.reconcile(&room);

    let ready = v.wait(stream_from("h")).await;
    match ready {
        PeerEvent::StreamReady { stream, .. } => assert!(stream.audio && stream.video),
        other => panic!("unexpected {other:?}"),
    }
    host.wait(connected("v")).await;
    assert_eq!(transport.offers_created(), 1);

    let record: ConnectionRecord = ctx
        .store
        .get_as(&paths::connection(ROOM, ConnectionId::for_pair("h", "v").as_str()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.offerer_id, "h");
    assert_eq!(record.answer_for.as_deref(), Some(record.negotiation_id.as_str()));

    host.orchestrator.shutdown().await;
    v.orchestrator.shutdown().await;
    assert_eq!(transport.open_links(), 0);
}

#[tokio::test]
async fn stage_meshes_and_viewer_receives_both() {
    let ctx = context();
    let transport = LoopbackTransport::new();
    let room = membership("h", &["g"], &["v"]);
    let mut host = stage(&ctx, &transport, "h");
    let mut guest = stage(&ctx, &transport, "g");
    let mut v = viewer(&ctx, &transport, "v");

    for p in [&mut host, &mut guest, &mut v] {
        p.orchestrator.reconcile(&room);
    }

    v.wait(stream_from("h")).await;
    v.wait(stream_from("g")).await;
    host.wait(stream_from("g")).await;
    guest.wait(stream_from("h")).await;
    host.wait(connected("v")).await;
    guest.wait(connected("v")).await;

    assert_eq!(host.orchestrator.active_remotes(), vec!["g", "v"]);
    assert_eq!(v.orchestrator.active_remotes(), vec!["g", "h"]);
    // One offer per pair.
    assert_eq!(transport.offers_created(), 3);

    for p in [&mut host, &mut guest, &mut v] {
        p.orchestrator.shutdown().await;
    }
    assert_eq!(transport.open_links(), 0);
}

#[tokio::test]
async fn repeated_reconciles_do_not_offer_again() {
    let ctx = context();
    let transport = LoopbackTransport::new();
    let mut host = stage(&ctx, &transport, "a-host");
    let mut v = viewer(&ctx, &transport, "b-viewer");
    let room = membership("a-host", &[], &["b-viewer"]);

    for _ in 0..5 {
        host.orchestrator.reconcile(&room);
        v.orchestrator.reconcile(&room);
    }
    v.wait(stream_from("a-host")).await;
    for _ in 0..5 {
        host.orchestrator.reconcile(&room);
    }
    assert_eq!(transport.offers_created(), 1);
    assert_eq!(host.orchestrator.active_remotes(), vec!["b-viewer"]);
}

#[tokio::test]
async fn failed_link_is_purged_and_rebuilt() {
    let ctx = context();
    let mut bus = ctx.events.subscribe();
    let transport = LoopbackTransport::new();
    let mut host = stage(&ctx, &transport, "h");
    let mut v = viewer(&ctx, &transport, "v");
    let room = membership("h", &[], &["v"]);
    host.orchestrator.reconcile(&room);
    v.orchestrator.reconcile(&room);
    host.wait(connected("v")).await;
    v.wait(stream_from("h")).await;

    assert_eq!(transport.fail_link("h", "v"), 1);
    let report = host.orchestrator.next_exit().await.unwrap();
    assert_eq!(report.remote_id, "v");
    assert!(matches!(report.exit, LinkExit::Failed(_)));
    host.wait(|e| matches!(e, PeerEvent::LinkFailed { .. })).await;
    assert!(host.orchestrator.active_remotes().is_empty());

    // The viewer's side drops with it; its stream goes away.
    let report = v.orchestrator.next_exit().await.unwrap();
    assert!(report.streamed);
    v.wait(|e| {
        matches!(e, PeerEvent::StreamRemoved { remote_id } if remote_id == "h")
    })
    .await;

    let mut saw_failure = false;
    while let Ok(event) = bus.try_recv() {
        saw_failure |= matches!(event, LiveEvent::LinkFailed { ref remote_id, .. } if remote_id == "v");
    }
    assert!(saw_failure);

    // The next reconcile rebuilds the pair with a fresh negotiation.
    host.clear();
    v.clear();
    host.orchestrator.reconcile(&room);
    v.orchestrator.reconcile(&room);
    assert_eq!(host.orchestrator.active_remotes(), vec!["v"]);
    v.wait(stream_from("h")).await;
    host.wait(connected("v")).await;
    assert_eq!(transport.offers_created(), 2);
}

#[tokio::test]
async fn departed_remote_is_torn_down() {
    let ctx = context();
    let transport = LoopbackTransport::new();
    let mut host = stage(&ctx, &transport, "h");
    let mut v = viewer(&ctx, &transport, "v");
    let room = membership("h", &[], &["v"]);
    host.orchestrator.reconcile(&room);
    v.orchestrator.reconcile(&room);
    host.wait(connected("v")).await;

    v.orchestrator.shutdown().await;
    host.orchestrator.reconcile(&membership("h", &[], &[]));
    let report = host.orchestrator.next_exit().await.unwrap();
    assert_eq!(report.remote_id, "v");
    assert!(host.orchestrator.is_idle());
    assert_eq!(transport.open_links(), 0);
}

#[tokio::test]
async fn remote_leaving_before_answer_releases_subscriptions() {
    let (ctx, store) = context_with_store();
    let transport = LoopbackTransport::new();
    let mut host = stage(&ctx, &transport, "h");
    // The viewer never reconciles, so no answer is ever written.
    host.orchestrator.reconcile(&membership("h", &[], &["v"]));

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.subscriber_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("offerer never watched for an answer");

    host.orchestrator.reconcile(&membership("h", &[], &[]));
    let report = host.orchestrator.next_exit().await.unwrap();
    assert_eq!(report.remote_id, "v");
    assert_eq!(report.exit, LinkExit::Cancelled);
    assert!(!report.streamed);
    assert_eq!(store.subscriber_count().await, 0);
    assert_eq!(transport.open_links(), 0);
}

#[tokio::test]
async fn host_without_camera_still_serves_viewers() {
    let ctx = context();
    let transport = LoopbackTransport::new();
    let mut host = peer(&ctx, &transport, "h", Arc::new(DeniedMedia), true);
    let mut v = viewer(&ctx, &transport, "v");
    let room = membership("h", &[], &["v"]);
    host.orchestrator.reconcile(&room);
    v.orchestrator.reconcile(&room);

    v.wait(connected("h")).await;
    host.wait(connected("v")).await;
    v.drain();
    assert!(!v
        .seen
        .iter()
        .any(|e| matches!(e, PeerEvent::StreamReady { .. })));
}

#[tokio::test]
async fn promoted_viewer_starts_sending() {
    let ctx = context();
    let transport = LoopbackTransport::new();
    let mut host = stage(&ctx, &transport, "h");
    let mut promoted = viewer(&ctx, &transport, "v");

    let before = membership("h", &[], &["v"]);
    host.orchestrator.reconcile(&before);
    promoted.orchestrator.reconcile(&before);
    promoted.wait(stream_from("h")).await;

    let after = membership("h", &["v"], &[]);
    host.clear();
    promoted.clear();
    promoted.media.start();
    host.orchestrator.reconcile(&after);
    promoted.orchestrator.reconcile(&after);

    host.wait(stream_from("v")).await;
    promoted.wait(stream_from("h")).await;
    assert_eq!(host.orchestrator.targets().get("v"), Some(&true));

    host.orchestrator.shutdown().await;
    promoted.orchestrator.shutdown().await;
    promoted.media.stop().await;
    assert_eq!(transport.open_links(), 0);
}
