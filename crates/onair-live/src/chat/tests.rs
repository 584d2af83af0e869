use std::sync::Arc;

use chrono::Duration;
use onair_common::{ChannelSink, LiveError, ManualClock, Notification, NotificationKind};
use onair_config::OnAirConfig;
use tokio::sync::mpsc;

use super::*;
use crate::context::LiveContext;
use crate::identity::{Identity, StaticFollowGraph};
use crate::model::{ChatAccess, JoinAccess, MessageKind, Moderation, RoomSettings};
use crate::presence::PresenceTracker;
use crate::room::RoomManager;
use crate::store::{paths, MemoryStore, SetMode, SignalingStore};

struct Fixture {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    follows: Arc<StaticFollowGraph>,
    notifications: mpsc::UnboundedReceiver<Notification>,
    rooms: RoomManager,
    presence: PresenceTracker,
    chat: ChatChannel,
    room_id: String,
}

async fn fixture(settings: RoomSettings) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::default());
    let follows = Arc::new(StaticFollowGraph::new());
    let (sink, notifications) = ChannelSink::new();
    let mut config = OnAirConfig::default();
    config.chat.extra_banned_words = vec!["spoiler".into()];
    let ctx = LiveContext::new(store.clone(), config)
        .with_clock(clock.clone())
        .with_follows(follows.clone())
        .with_notifier(Arc::new(sink));

    let rooms = RoomManager::new(ctx.clone());
    let room_id = rooms.create_room(&host(), "show", settings).await.unwrap();
    Fixture {
        store,
        clock,
        follows,
        notifications,
        presence: PresenceTracker::new(ctx.clone()),
        chat: ChatChannel::new(ctx),
        rooms,
        room_id,
    }
}

fn host() -> Identity {
    Identity::new("host", "Host")
}

fn user(id: &str) -> Identity {
    Identity::new(id, id.to_uppercase())
}

impl Fixture {
    async fn send(&self, who: &Identity, text: &str) -> Result<crate::model::ChatMessage, LiveError> {
        self.chat
            .send_message(&self.room_id, who, text, MessageKind::Message)
            .await
    }

    /// Move past the send throttle.
    fn tick(&self) {
        self.clock.advance(Duration::seconds(1));
    }
}

#[tokio::test]
async fn viewer_message_is_appended() {
    let f = fixture(RoomSettings::default()).await;
    f.presence.join(&f.room_id, &user("v")).await.unwrap();

    let msg = f.send(&user("v"), "  hello  ").await.unwrap();
    assert_eq!(msg.text, "hello");
    assert!(!msg.id.is_empty());

    let recent = f.chat.recent_messages(&f.room_id, 10).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, msg.id);
    assert_eq!(recent[0].sender_nickname, "V");
}

#[tokio::test]
async fn input_is_validated() {
    let f = fixture(RoomSettings::default()).await;
    assert!(matches!(
        f.send(&host(), "   ").await,
        Err(LiveError::Validation(_))
    ));
    let long = "x".repeat(501);
    assert!(matches!(
        f.send(&host(), &long).await,
        Err(LiveError::Validation(_))
    ));
    assert!(matches!(
        f.chat
            .send_message(&f.room_id, &host(), "fake", MessageKind::System)
            .await,
        Err(LiveError::Policy(_))
    ));
}

#[tokio::test]
async fn sender_must_be_in_the_room() {
    let f = fixture(RoomSettings::default()).await;
    assert!(matches!(
        f.send(&user("lurker"), "hi").await,
        Err(LiveError::Policy(_))
    ));
}

#[tokio::test]
async fn chat_access_noone_limits_chat_to_stage() {
    let settings = RoomSettings {
        chat_access: ChatAccess::Noone,
        ..RoomSettings::default()
    };
    let f = fixture(settings).await;
    f.presence.join(&f.room_id, &user("v")).await.unwrap();
    f.store
        .set(
            &paths::guest(&f.room_id, "g"),
            serde_json::json!({ "user_id": "g" }),
            SetMode::Replace,
        )
        .await
        .unwrap();

    assert!(f.send(&host(), "on air").await.is_ok());
    assert!(f.send(&user("g"), "guest here").await.is_ok());
    assert!(matches!(f.send(&user("v"), "hi").await, Err(LiveError::Policy(_))));
}

#[tokio::test]
async fn followers_only_chat() {
    let settings = RoomSettings {
        chat_access: ChatAccess::Followers,
        join_access: JoinAccess::Followers,
        ..RoomSettings::default()
    };
    let f = fixture(settings).await;
    f.presence.join(&f.room_id, &user("fan")).await.unwrap();
    f.presence.join(&f.room_id, &user("stranger")).await.unwrap();
    f.follows.follow("fan", "host");

    assert!(f.send(&user("fan"), "hi").await.is_ok());
    assert!(matches!(
        f.send(&user("stranger"), "hi").await,
        Err(LiveError::Policy(_))
    ));
}

#[tokio::test]
async fn muted_user_is_rejected_until_unmuted() {
    let f = fixture(RoomSettings::default()).await;
    f.presence.join(&f.room_id, &user("x")).await.unwrap();

    f.chat.mute_user(&f.room_id, "host", "x").await.unwrap();
    // Idempotent.
    f.chat.mute_user(&f.room_id, "host", "x").await.unwrap();
    assert!(f.chat.is_muted(&f.room_id, "x").await.unwrap());

    for _ in 0..3 {
        f.tick();
        assert!(matches!(f.send(&user("x"), "let me talk").await, Err(LiveError::Policy(_))));
    }

    assert!(f.chat.unmute_user(&f.room_id, "host", "x").await.unwrap());
    f.tick();
    assert!(f.send(&user("x"), "thanks").await.is_ok());
}

#[tokio::test]
async fn only_the_host_moderates() {
    let f = fixture(RoomSettings::default()).await;
    f.presence.join(&f.room_id, &user("v")).await.unwrap();

    assert!(matches!(
        f.chat.mute_user(&f.room_id, "v", "host").await,
        Err(LiveError::Policy(_))
    ));
    assert!(matches!(
        f.chat.mute_user(&f.room_id, "v", "someone").await,
        Err(LiveError::Policy(_))
    ));
    assert!(matches!(
        f.chat.mute_user(&f.room_id, "host", "host").await,
        Err(LiveError::Policy(_))
    ));
}

#[tokio::test]
async fn guests_on_stage_cannot_be_muted() {
    let f = fixture(RoomSettings::default()).await;
    f.store
        .set(
            &paths::guest(&f.room_id, "g"),
            serde_json::json!({ "user_id": "g" }),
            SetMode::Replace,
        )
        .await
        .unwrap();

    assert!(matches!(
        f.chat.mute_user(&f.room_id, "host", "g").await,
        Err(LiveError::Policy(_))
    ));
    assert!(!f.chat.is_muted(&f.room_id, "g").await.unwrap());
    assert!(f.send(&user("g"), "still on stage").await.is_ok());
}

#[tokio::test]
async fn newcomer_mute_window() {
    let settings = RoomSettings {
        moderation: Moderation {
            mute_new_users: true,
            filter_bad_words: false,
        },
        ..RoomSettings::default()
    };
    let f = fixture(settings).await;
    f.presence.join(&f.room_id, &user("new")).await.unwrap();

    f.clock.advance(Duration::seconds(10));
    assert!(matches!(
        f.send(&user("new"), "first!").await,
        Err(LiveError::Policy(_))
    ));

    f.clock.advance(Duration::seconds(21));
    assert!(f.send(&user("new"), "first!").await.is_ok());
}

#[tokio::test]
async fn newcomer_window_does_not_apply_to_stage() {
    let settings = RoomSettings {
        moderation: Moderation {
            mute_new_users: true,
            filter_bad_words: false,
        },
        ..RoomSettings::default()
    };
    let f = fixture(settings).await;
    assert!(f.send(&host(), "welcome").await.is_ok());
}

#[tokio::test]
async fn rapid_sends_are_throttled() {
    let f = fixture(RoomSettings::default()).await;
    f.presence.join(&f.room_id, &user("v")).await.unwrap();

    assert!(f.send(&user("v"), "one").await.is_ok());
    f.clock.advance(Duration::milliseconds(200));
    let err = f.send(&user("v"), "two").await.unwrap_err();
    assert_eq!(err, LiveError::Throttled { retry_after_ms: 600 });
    assert!(err.is_user_facing());

    f.clock.advance(Duration::milliseconds(600));
    assert!(f.send(&user("v"), "two").await.is_ok());
    assert_eq!(f.chat.recent_messages(&f.room_id, 10).await.unwrap().len(), 2);
}

#[tokio::test]
async fn forgotten_room_releases_the_throttle() {
    let f = fixture(RoomSettings::default()).await;
    assert!(f.send(&host(), "one").await.is_ok());
    assert!(matches!(f.send(&host(), "two").await, Err(LiveError::Throttled { .. })));

    f.chat.forget_room(&f.room_id);
    assert!(f.send(&host(), "two").await.is_ok());
}

#[tokio::test]
async fn bad_words_are_masked_before_append() {
    let settings = RoomSettings {
        moderation: Moderation {
            filter_bad_words: true,
            mute_new_users: false,
        },
        ..RoomSettings::default()
    };
    let f = fixture(settings).await;

    let msg = f.send(&host(), "no Spoiler you idiot").await.unwrap();
    assert_eq!(msg.text, "no **** you ****");
    let stored = f.chat.recent_messages(&f.room_id, 1).await.unwrap();
    assert_eq!(stored[0].text, "no **** you ****");
}

#[tokio::test]
async fn unfiltered_room_keeps_text() {
    let f = fixture(RoomSettings::default()).await;
    let msg = f.send(&host(), "damn").await.unwrap();
    assert_eq!(msg.text, "damn");
}

#[tokio::test]
async fn ended_room_rejects_messages() {
    let f = fixture(RoomSettings::default()).await;
    f.rooms.end_room(&f.room_id).await.unwrap();
    assert!(matches!(f.send(&host(), "bye").await, Err(LiveError::Policy(_))));
}

#[tokio::test]
async fn reactions_and_system_messages() {
    let mut f = fixture(RoomSettings::default()).await;
    let reaction = f.chat.send_reaction(&f.room_id, &host(), "🔥").await.unwrap();
    assert_eq!(reaction.kind, MessageKind::Reaction);

    f.tick();
    let system = f.chat.send_system(&f.room_id, "stage is open").await.unwrap();
    assert!(system.is_system());
    assert_eq!(system.kind, MessageKind::System);

    let note = f.notifications.recv().await.unwrap();
    assert_eq!(note.kind, NotificationKind::System);
    assert_eq!(note.body, "stage is open");
}

#[tokio::test]
async fn watch_messages_streams_appends() {
    let f = fixture(RoomSettings::default()).await;
    let mut sub = f.chat.watch_messages(&f.room_id).await.unwrap();
    f.send(&host(), "live!").await.unwrap();
    let change = sub.next().await.unwrap();
    assert_eq!(change.value.unwrap()["text"], "live!");
}

#[tokio::test]
async fn report_goes_to_the_sink() {
    let mut f = fixture(RoomSettings::default()).await;
    f.chat
        .report_user(&f.room_id, &user("v"), "troll", "spam links")
        .await
        .unwrap();
    let note = f.notifications.recv().await.unwrap();
    assert_eq!(note.kind, NotificationKind::Report);
    assert_eq!(note.reporter_id.as_deref(), Some("v"));
    assert_eq!(note.title, "troll");
    assert_eq!(note.body, "spam links");

    assert!(f.chat.report_user(&f.room_id, &user("v"), "troll", " ").await.is_err());
}
