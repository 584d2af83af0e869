use std::time::Instant;

use tokio::sync::mpsc;

/// What kind of outward notification this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// A participant reported another participant.
    Report,
    /// The orchestrator announced something in a room.
    System,
}

/// A fire-and-forget notification handed to the delivery collaborator.
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: NotificationKind,
    pub room_id: String,
    /// Who filed it. Only reports carry one.
    pub reporter_id: Option<String>,
    pub title: String,
    pub body: String,
    pub created_at: Instant,
}

impl Notification {
    pub fn system(room_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::System,
            room_id: room_id.into(),
            reporter_id: None,
            title: "system".into(),
            body: body.into(),
            created_at: Instant::now(),
        }
    }

    /// `title` names the reported user, `body` carries the reason.
    pub fn report(
        room_id: impl Into<String>,
        reporter_id: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            kind: NotificationKind::Report,
            room_id: room_id.into(),
            reporter_id: Some(reporter_id.into()),
            title: title.into(),
            body: body.into(),
            created_at: Instant::now(),
        }
    }
}

/// Outward sink. Delivery and formatting are the receiver's concern;
/// `notify` must never block the caller.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Sink that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: Notification) {
        match n.kind {
            NotificationKind::Report => tracing::info!(
                room_id = %n.room_id,
                reporter = n.reporter_id.as_deref().unwrap_or_default(),
                target = %n.title,
                reason = %n.body,
                "user reported"
            ),
            NotificationKind::System => {
                tracing::debug!(room_id = %n.room_id, "{}", n.body)
            }
        }
    }
}

/// Sink that forwards into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, notification: Notification) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind() {
        let n = Notification::system("r1", "alice joined the stage");
        assert_eq!(n.kind, NotificationKind::System);
        assert_eq!(n.room_id, "r1");
        assert_eq!(n.reporter_id, None);

        let n = Notification::report("r1", "alice", "bob", "spam");
        assert_eq!(n.kind, NotificationKind::Report);
        assert_eq!(n.reporter_id.as_deref(), Some("alice"));
        assert_eq!(n.title, "bob");
        assert_eq!(n.body, "spam");
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.notify(Notification::system("r1", "hello"));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.body, "hello");
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.notify(Notification::system("r1", "nobody hears this"));
    }
}
