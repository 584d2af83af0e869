//! In-process [`PeerTransport`] for tests and the simulator.
//!
//! Every opened link registers an endpoint in a shared hub. Descriptions
//! name the endpoint that produced them and candidates carry the same
//! token, so a link connects only when it holds the other side's
//! description plus at least one of its candidates. Closing an endpoint
//! disconnects whoever was linked to it, like a dropped peer would.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use onair_common::LiveError;
use tokio::sync::mpsc;
use tracing::debug;

use super::media::LocalMedia;
use super::protocol::{IceCandidate, SdpType, SessionDescription};
use super::transport::{LinkConfig, LinkEvent, LinkState, PeerLink, PeerTransport, RemoteStream};

const CANDIDATES_PER_DESCRIPTION: usize = 2;

struct Endpoint {
    local_id: String,
    remote_id: String,
    media: Option<LocalMedia>,
    /// Token of the endpoint whose description this one applied.
    linked_to: Option<u64>,
    events: mpsc::UnboundedSender<LinkEvent>,
}

#[derive(Default)]
struct Hub {
    endpoints: HashMap<u64, Endpoint>,
    next_token: u64,
}

#[derive(Clone, Default)]
pub struct LoopbackTransport {
    hub: Arc<Mutex<Hub>>,
    offers: Arc<AtomicUsize>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Links opened and not yet closed.
    pub fn open_links(&self) -> usize {
        self.lock().endpoints.len()
    }

    /// Offers created since the transport was built.
    pub fn offers_created(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    /// Report a failure on every open link from `local_id` to
    /// `remote_id`. Returns how many links were affected.
    pub fn fail_link(&self, local_id: &str, remote_id: &str) -> usize {
        let hub = self.lock();
        let mut failed = 0;
        for endpoint in hub.endpoints.values() {
            if endpoint.local_id == local_id && endpoint.remote_id == remote_id {
                let _ = endpoint
                    .events
                    .send(LinkEvent::StateChanged(LinkState::Failed));
                failed += 1;
            }
        }
        failed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn open(
        &self,
        config: LinkConfig,
    ) -> Result<(Box<dyn PeerLink>, mpsc::UnboundedReceiver<LinkEvent>), LiveError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = {
            let mut hub = self.lock();
            hub.next_token += 1;
            let token = hub.next_token;
            hub.endpoints.insert(
                token,
                Endpoint {
                    local_id: config.local_id.clone(),
                    remote_id: config.remote_id.clone(),
                    media: config.media.clone(),
                    linked_to: None,
                    events: tx.clone(),
                },
            );
            token
        };
        debug!(
            connection_id = %config.connection_id,
            token,
            receive_only = config.media.is_none(),
            "Loopback link opened"
        );

        let link = LoopbackLink {
            hub: Arc::clone(&self.hub),
            offers: Arc::clone(&self.offers),
            token,
            remote_id: config.remote_id,
            events: tx,
            local_description: false,
            remote: None,
            candidate_matched: false,
            connected: false,
            closed: false,
        };
        Ok((Box::new(link), rx))
    }
}

struct LoopbackLink {
    hub: Arc<Mutex<Hub>>,
    offers: Arc<AtomicUsize>,
    token: u64,
    remote_id: String,
    events: mpsc::UnboundedSender<LinkEvent>,
    local_description: bool,
    remote: Option<u64>,
    candidate_matched: bool,
    connected: bool,
    closed: bool,
}

impl LoopbackLink {
    fn lock(&self) -> std::sync::MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> Result<(), LiveError> {
        if self.closed {
            return Err(LiveError::Negotiation("link is closed".into()));
        }
        Ok(())
    }

    fn describe(&mut self, sdp_type: SdpType) -> SessionDescription {
        self.local_description = true;
        let _ = self
            .events
            .send(LinkEvent::StateChanged(LinkState::Connecting));
        for n in 0..CANDIDATES_PER_DESCRIPTION {
            let _ = self.events.send(LinkEvent::LocalCandidate(IceCandidate {
                candidate: format!("candidate:loopback {} {n}", self.token),
                sdp_mid: Some("0".into()),
                sdp_m_line_index: Some(0),
            }));
        }
        SessionDescription {
            sdp_type,
            sdp: format!("loopback:{}", self.token),
        }
    }

    fn maybe_connect(&mut self) {
        if self.connected || !self.local_description || !self.candidate_matched {
            return;
        }
        let Some(remote) = self.remote else {
            return;
        };
        let remote_media = {
            let hub = self.lock();
            match hub.endpoints.get(&remote) {
                Some(endpoint) => endpoint.media.clone(),
                None => return,
            }
        };
        self.connected = true;
        let _ = self
            .events
            .send(LinkEvent::StateChanged(LinkState::Connected));
        if let Some(media) = remote_media {
            let _ = self.events.send(LinkEvent::RemoteStream(RemoteStream {
                remote_id: self.remote_id.clone(),
                audio: media.audio,
                video: media.video,
            }));
        }
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut hub = self.hub.lock().unwrap_or_else(|e| e.into_inner());
        hub.endpoints.remove(&self.token);
        for endpoint in hub.endpoints.values_mut() {
            if endpoint.linked_to == Some(self.token) {
                endpoint.linked_to = None;
                let _ = endpoint
                    .events
                    .send(LinkEvent::StateChanged(LinkState::Disconnected));
            }
        }
    }
}

fn parse_token(sdp: &str) -> Option<u64> {
    sdp.strip_prefix("loopback:")?.parse().ok()
}

fn candidate_token(candidate: &str) -> Option<u64> {
    let mut parts = candidate.strip_prefix("candidate:loopback ")?.split(' ');
    parts.next()?.parse().ok()
}

#[async_trait]
impl PeerLink for LoopbackLink {
    async fn create_offer(&mut self) -> Result<SessionDescription, LiveError> {
        self.ensure_open()?;
        self.offers.fetch_add(1, Ordering::SeqCst);
        Ok(self.describe(SdpType::Offer))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, LiveError> {
        self.ensure_open()?;
        if self.remote.is_none() {
            return Err(LiveError::Negotiation(
                "cannot answer without a remote offer".into(),
            ));
        }
        let answer = self.describe(SdpType::Answer);
        self.maybe_connect();
        Ok(answer)
    }

    async fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), LiveError> {
        self.ensure_open()?;
        let remote = parse_token(&desc.sdp)
            .ok_or_else(|| LiveError::Negotiation(format!("unreadable description: {}", desc.sdp)))?;
        {
            let mut hub = self.lock();
            if !hub.endpoints.contains_key(&remote) {
                return Err(LiveError::Negotiation("remote endpoint is gone".into()));
            }
            if let Some(endpoint) = hub.endpoints.get_mut(&self.token) {
                endpoint.linked_to = Some(remote);
            }
        }
        self.remote = Some(remote);
        self.maybe_connect();
        Ok(())
    }

    fn has_remote_description(&self) -> bool {
        self.remote.is_some()
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), LiveError> {
        self.ensure_open()?;
        let Some(remote) = self.remote else {
            return Err(LiveError::Negotiation(
                "candidate before remote description".into(),
            ));
        };
        match candidate_token(&candidate.candidate) {
            Some(token) if token == remote => {
                self.candidate_matched = true;
                self.maybe_connect();
                Ok(())
            }
            _ => Err(LiveError::Negotiation(format!(
                "candidate does not belong to this session: {}",
                candidate.candidate
            ))),
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.release();
            let _ = self.events.send(LinkEvent::StateChanged(LinkState::Closed));
        }
    }
}

impl Drop for LoopbackLink {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::pairing::ConnectionId;

    fn config(local: &str, remote: &str, media: bool) -> LinkConfig {
        LinkConfig {
            connection_id: ConnectionId::for_pair(local, remote),
            local_id: local.into(),
            remote_id: remote.into(),
            ice_servers: Vec::new(),
            media: media.then(|| LocalMedia {
                stream_id: format!("{local}-stream"),
                audio: true,
                video: true,
            }),
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn candidates(events: &[LinkEvent]) -> Vec<IceCandidate> {
        events
            .iter()
            .filter_map(|e| match e {
                LinkEvent::LocalCandidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn offer_answer_and_candidates_connect_both_sides() {
        let transport = LoopbackTransport::new();
        let (mut host, mut host_rx) = transport.open(config("host", "viewer", true)).await.unwrap();
        let (mut viewer, mut viewer_rx) =
            transport.open(config("viewer", "host", false)).await.unwrap();
        assert_eq!(transport.open_links(), 2);

        let offer = host.create_offer().await.unwrap();
        viewer.set_remote_description(offer).await.unwrap();
        let answer = viewer.create_answer().await.unwrap();
        host.set_remote_description(answer).await.unwrap();

        for c in candidates(&drain(&mut host_rx)) {
            viewer.add_ice_candidate(c).await.unwrap();
        }
        let viewer_events = drain(&mut viewer_rx);
        for c in candidates(&viewer_events) {
            host.add_ice_candidate(c).await.unwrap();
        }

        assert!(viewer_events.contains(&LinkEvent::StateChanged(LinkState::Connected)));
        assert!(viewer_events
            .iter()
            .any(|e| matches!(e, LinkEvent::RemoteStream(s) if s.remote_id == "host" && s.video)));

        // The viewer sends nothing, so the host gets no remote stream.
        let host_events = drain(&mut host_rx);
        assert!(host_events.contains(&LinkEvent::StateChanged(LinkState::Connected)));
        assert!(!host_events
            .iter()
            .any(|e| matches!(e, LinkEvent::RemoteStream(_))));
        assert_eq!(transport.offers_created(), 1);
    }

    #[tokio::test]
    async fn candidate_requires_remote_description() {
        let transport = LoopbackTransport::new();
        let (mut a, mut a_rx) = transport.open(config("a", "b", true)).await.unwrap();
        let (mut b, _b_rx) = transport.open(config("b", "a", true)).await.unwrap();
        a.create_offer().await.unwrap();
        let early = candidates(&drain(&mut a_rx)).remove(0);
        assert!(b.add_ice_candidate(early).await.is_err());
    }

    #[tokio::test]
    async fn foreign_candidate_is_rejected() {
        let transport = LoopbackTransport::new();
        let (mut a, _a_rx) = transport.open(config("a", "b", true)).await.unwrap();
        let (mut b, _b_rx) = transport.open(config("b", "a", true)).await.unwrap();
        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let stray = IceCandidate {
            candidate: "candidate:loopback 999 0".into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };
        assert!(b.add_ice_candidate(stray).await.is_err());
    }

    #[tokio::test]
    async fn closing_disconnects_the_other_side() {
        let transport = LoopbackTransport::new();
        let (mut a, _a_rx) = transport.open(config("a", "b", true)).await.unwrap();
        let (mut b, mut b_rx) = transport.open(config("b", "a", true)).await.unwrap();
        let offer = a.create_offer().await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        drain(&mut b_rx);

        a.close().await;
        a.close().await;
        assert_eq!(transport.open_links(), 1);
        assert_eq!(
            drain(&mut b_rx),
            vec![LinkEvent::StateChanged(LinkState::Disconnected)]
        );
        drop(b);
        assert_eq!(transport.open_links(), 0);
    }

    #[tokio::test]
    async fn description_from_a_closed_endpoint_fails() {
        let transport = LoopbackTransport::new();
        let (mut a, _a_rx) = transport.open(config("a", "b", true)).await.unwrap();
        let (mut b, _b_rx) = transport.open(config("b", "a", true)).await.unwrap();
        let offer = a.create_offer().await.unwrap();
        a.close().await;
        assert!(b.set_remote_description(offer).await.is_err());
    }

    #[tokio::test]
    async fn fail_link_reports_failure() {
        let transport = LoopbackTransport::new();
        let (_a, mut a_rx) = transport.open(config("a", "b", true)).await.unwrap();
        assert_eq!(transport.fail_link("a", "b"), 1);
        assert_eq!(transport.fail_link("b", "a"), 0);
        assert_eq!(
            drain(&mut a_rx),
            vec![LinkEvent::StateChanged(LinkState::Failed)]
        );
    }
}
