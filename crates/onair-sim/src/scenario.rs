//! The simulated broadcast: setup, settle, teardown.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use onair_config::OnAirConfig;
use onair_live::{
    CloseReason, Identity, LeaseReaper, LiveContext, LiveSession, LoopbackTransport, MediaSource,
    MemoryStore, ParticipantRole, RoomSettings, SessionEvent, SyntheticMedia,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::SimError;

const HOST_ID: &str = "host";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Plan {
    pub viewers: usize,
    pub guests: usize,
    pub messages: usize,
    pub settle: Duration,
    pub title: String,
}

/// What one participant observed.
#[derive(Debug, Clone)]
struct Tally {
    role: ParticipantRole,
    streams: BTreeSet<String>,
    chat: usize,
    link_failures: usize,
    closed: Option<CloseReason>,
}

impl Tally {
    fn new(role: ParticipantRole) -> Self {
        Self {
            role,
            streams: BTreeSet::new(),
            chat: 0,
            link_failures: 0,
            closed: None,
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::RoleChanged(role) => self.role = role,
            SessionEvent::StreamReady { remote_id, .. } => {
                self.streams.insert(remote_id);
            }
            SessionEvent::StreamRemoved { remote_id } => {
                self.streams.remove(&remote_id);
            }
            SessionEvent::ChatMessage(_) => self.chat += 1,
            SessionEvent::LinkFailed { .. } => self.link_failures += 1,
            SessionEvent::Closed(reason) => self.closed = Some(reason),
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    Done,
    TimedOut,
    Interrupted,
}

pub struct Summary {
    room_id: String,
    settle: Settle,
    elapsed: Duration,
    tallies: BTreeMap<String, Tally>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.settle {
            Settle::Done => "settled",
            Settle::TimedOut => "timed out",
            Settle::Interrupted => "interrupted",
        };
        writeln!(
            f,
            "room {} {state} after {:.1}s",
            self.room_id,
            self.elapsed.as_secs_f64()
        )?;
        for (user_id, tally) in &self.tallies {
            let closed = tally
                .closed
                .map_or_else(|| "open".to_string(), |r| format!("{r:?}"));
            writeln!(
                f,
                "  {user_id:<12} {:<7} streams {:<3} chat {:<4} failures {:<3} {closed}",
                tally.role.to_string(),
                tally.streams.len(),
                tally.chat,
                tally.link_failures,
            )?;
        }
        Ok(())
    }
}

/// Forward a session's events, tagged with its user, into one channel.
fn forward(
    user_id: String,
    mut events: mpsc::Receiver<SessionEvent>,
    tx: mpsc::UnboundedSender<(String, SessionEvent)>,
) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if tx.send((user_id.clone(), event)).is_err() {
                break;
            }
        }
    });
}

/// Streams each participant should end up receiving.
fn expected_streams(stage: &BTreeSet<String>, user_id: &str) -> usize {
    if stage.contains(user_id) {
        stage.len() - 1
    } else {
        stage.len()
    }
}

fn missing(tallies: &BTreeMap<String, Tally>, stage: &BTreeSet<String>) -> Vec<String> {
    tallies
        .iter()
        .filter(|(user_id, tally)| tally.streams.len() < expected_streams(stage, user_id))
        .map(|(user_id, _)| user_id.clone())
        .collect()
}

pub async fn run(config: OnAirConfig, plan: Plan) -> Result<Summary, SimError> {
    let started = Instant::now();
    let ctx = LiveContext::new(Arc::new(MemoryStore::new()), config);
    let transport = LoopbackTransport::new();
    let media: Arc<dyn MediaSource> = Arc::new(SyntheticMedia::default());

    let cancel = CancellationToken::new();
    let sweep = Duration::from_secs(ctx.config.presence.sweep_interval_secs);
    let reaper = LeaseReaper::new(ctx.clone()).spawn_reaper(sweep, cancel.clone());

    // -----------------------------------------------------------------------
    // Go live and fill the room
    // -----------------------------------------------------------------------

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut tallies = BTreeMap::new();

    let mut settings = RoomSettings::from_config(&ctx.config.rooms);
    settings.max_guests = settings.max_guests.max(plan.guests as i64);
    let (host, host_events) = LiveSession::host(
        ctx.clone(),
        Arc::new(transport.clone()),
        Arc::clone(&media),
        Identity::new(HOST_ID, "Host"),
        &plan.title,
        settings,
    )
    .await?;
    let room_id = host.room_id().to_string();
    forward(HOST_ID.to_string(), host_events, event_tx.clone());
    tallies.insert(HOST_ID.to_string(), Tally::new(ParticipantRole::Host));

    let mut viewers = Vec::with_capacity(plan.viewers);
    for i in 0..plan.viewers {
        let who = Identity::new(format!("viewer-{i:02}"), format!("Viewer {i}"));
        let user_id = who.user_id.clone();
        let (session, events) = LiveSession::join(
            ctx.clone(),
            Arc::new(transport.clone()),
            Arc::clone(&media),
            &room_id,
            who,
        )
        .await?;
        forward(user_id.clone(), events, event_tx.clone());
        tallies.insert(user_id, Tally::new(ParticipantRole::Viewer));
        viewers.push(session);
    }
    drop(event_tx);
    info!(room_id = %room_id, viewers = viewers.len(), "Viewers joined");

    let mut stage = BTreeSet::from([HOST_ID.to_string()]);
    for session in viewers.iter().take(plan.guests) {
        let user_id = session.identity().user_id.clone();
        session.request_to_join().await?;
        host.accept_guest(&user_id).await?;
        stage.insert(user_id);
    }
    info!(room_id = %room_id, guests = stage.len() - 1, "Guests on stage");

    // -----------------------------------------------------------------------
    // Chat
    // -----------------------------------------------------------------------

    let gap = Duration::from_millis(ctx.config.chat.min_send_interval_ms);
    for round in 0..plan.messages {
        if round > 0 {
            tokio::time::sleep(gap).await;
        }
        for session in &viewers {
            let who = session.identity();
            let text = format!("hello #{round} from {}", who.display_name);
            if let Err(e) = session.send_message(&text).await {
                warn!(user_id = %who.user_id, error = %e, "Chat message rejected");
            }
        }
    }
    for session in &viewers {
        if let Err(e) = session.like().await {
            debug!(error = %e, "Like failed");
        }
    }

    // -----------------------------------------------------------------------
    // Wait for every stream
    // -----------------------------------------------------------------------

    let deadline = tokio::time::sleep(plan.settle);
    tokio::pin!(deadline);
    let settle = loop {
        if missing(&tallies, &stage).is_empty() {
            break Settle::Done;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Settle::Interrupted,
            _ = &mut deadline => break Settle::TimedOut,
            Some((user_id, event)) = event_rx.recv() => {
                if let Some(tally) = tallies.get_mut(&user_id) {
                    tally.apply(event);
                }
            }
        }
    };
    let unsettled = missing(&tallies, &stage);
    info!(room_id = %room_id, ?settle, elapsed_ms = started.elapsed().as_millis() as u64, "Room settled");

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    host.end_room().await?;
    let all_closed = tokio::time::timeout(CLOSE_TIMEOUT, async {
        while tallies.values().any(|t| t.closed.is_none()) {
            let Some((user_id, event)) = event_rx.recv().await else {
                break;
            };
            if let Some(tally) = tallies.get_mut(&user_id) {
                tally.apply(event);
            }
        }
    })
    .await;
    if all_closed.is_err() {
        warn!(room_id = %room_id, "Some sessions did not close in time");
    }

    host.leave().await;
    for session in viewers {
        session.leave().await;
    }
    cancel.cancel();
    if let Err(e) = reaper.await {
        warn!(error = %e, "Lease reaper task failed");
    }

    let open = transport.open_links();
    if open > 0 {
        return Err(SimError::LeakedLinks(open));
    }
    if settle == Settle::TimedOut {
        return Err(SimError::Unsettled(format!(
            "no full set of streams for {}",
            unsettled.join(", ")
        )));
    }
    info!(room_id = %room_id, "Teardown verified");

    Ok(Summary {
        room_id,
        settle,
        elapsed: started.elapsed(),
        tallies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> OnAirConfig {
        let mut config = OnAirConfig::default();
        config.chat.min_send_interval_ms = 0;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 2;
        config
    }

    #[test]
    fn stage_members_do_not_expect_their_own_stream() {
        let stage = BTreeSet::from(["host".to_string(), "g".to_string()]);
        assert_eq!(expected_streams(&stage, "host"), 1);
        assert_eq!(expected_streams(&stage, "v"), 2);
    }

    #[tokio::test]
    async fn small_room_settles_and_tears_down() {
        let plan = Plan {
            viewers: 3,
            guests: 1,
            messages: 2,
            settle: Duration::from_secs(10),
            title: "test".into(),
        };
        let summary = run(quick_config(), plan).await.unwrap();
        assert_eq!(summary.settle, Settle::Done);
        assert_eq!(summary.tallies.len(), 4);
        let host = &summary.tallies["host"];
        assert_eq!(host.streams.len(), 0, "streams are removed once the room ends");
        assert_eq!(host.closed, Some(CloseReason::RoomEnded));
        assert!(host.chat > 0);
        assert_eq!(summary.tallies["viewer-00"].role, ParticipantRole::Guest);
        assert!(summary.to_string().contains("settled"));
    }
}
