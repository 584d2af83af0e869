//! Shared collaborators handed to every component.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use onair_common::{Clock, EventBus, LiveError, LiveEvent, NotificationSink, SystemClock, TracingSink};
use onair_config::OnAirConfig;

use crate::identity::{FollowGraph, StaticFollowGraph};
use crate::retry::with_retry;
use crate::store::SignalingStore;

/// Cheap to clone; everything inside is reference counted.
#[derive(Clone)]
pub struct LiveContext {
    pub store: Arc<dyn SignalingStore>,
    pub clock: Arc<dyn Clock>,
    pub follows: Arc<dyn FollowGraph>,
    pub notifier: Arc<dyn NotificationSink>,
    pub events: Arc<EventBus>,
    pub config: Arc<OnAirConfig>,
}

impl LiveContext {
    /// Context with the system clock, an empty follow graph and a
    /// logging-only notification sink.
    pub fn new(store: Arc<dyn SignalingStore>, config: OnAirConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            follows: Arc::new(StaticFollowGraph::new()),
            notifier: Arc::new(TracingSink),
            events: Arc::new(EventBus::default()),
            config: Arc::new(config),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_follows(mut self, follows: Arc<dyn FollowGraph>) -> Self {
        self.follows = follows;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn publish(&self, event: LiveEvent) {
        self.events.publish(event);
    }

    /// Retry an idempotent operation with the configured backoff.
    pub async fn retry<T, F, Fut>(&self, what: &str, op: F) -> Result<T, LiveError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LiveError>>,
    {
        with_retry(&self.config.retry, what, op).await
    }
}
