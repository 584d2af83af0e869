//! The room's chat stream: authorization, throttling, filtering and
//! append, plus host moderation.

use chrono::Duration;
use onair_common::{LiveError, LiveEvent, Notification, Result};
use tracing::{debug, info};

use crate::context::LiveContext;
use crate::identity::Identity;
use crate::model::{ChatAccess, ChatMessage, MessageKind, MuteFlag, Room, Viewer, SYSTEM_SENDER};
use crate::store::{paths, SetMode, StoreExt, Subscription, Watch};

use super::filter::WordFilter;
use super::throttle::SendThrottle;

const SYSTEM_NICKNAME: &str = "OnAir";

pub struct ChatChannel {
    ctx: LiveContext,
    filter: WordFilter,
    throttle: SendThrottle,
}

impl ChatChannel {
    pub fn new(ctx: LiveContext) -> Self {
        let chat = &ctx.config.chat;
        let filter = WordFilter::new(&chat.extra_banned_words);
        let throttle = SendThrottle::new(Duration::milliseconds(chat.min_send_interval_ms as i64));
        Self {
            ctx,
            filter,
            throttle,
        }
    }

    /// Send a user message or reaction. Gated, throttled and filtered
    /// before it is appended.
    pub async fn send_message(
        &self,
        room_id: &str,
        sender: &Identity,
        text: &str,
        kind: MessageKind,
    ) -> Result<ChatMessage> {
        if kind == MessageKind::System {
            return Err(LiveError::Policy("system messages are reserved".into()));
        }
        sender.validate()?;
        let text = text.trim();
        if text.is_empty() {
            return Err(LiveError::Validation("message must not be empty".into()));
        }
        let max_len = self.ctx.config.chat.max_message_length as usize;
        if text.chars().count() > max_len {
            return Err(LiveError::Validation(format!(
                "message is longer than {max_len} characters"
            )));
        }

        let room = self.load_room(room_id).await?;
        if let Err(e) = self.authorize(&room, &sender.user_id).await {
            debug!(room_id, user_id = %sender.user_id, reason = %e, "Chat message denied");
            return Err(e);
        }

        let now = self.ctx.now();
        let previous = self.throttle.check(room_id, &sender.user_id, now)?;

        let text = if room.moderation.filter_bad_words {
            self.filter.filter(text)
        } else {
            text.to_string()
        };
        let mut message = ChatMessage {
            id: String::new(),
            sender_id: sender.user_id.clone(),
            sender_nickname: sender.display_name.clone(),
            kind,
            text,
            created_at: now,
        };

        match self.ctx.store.append(&paths::messages(room_id), &message).await {
            Ok(id) => {
                message.id = id;
                Ok(message)
            }
            Err(e) => {
                self.throttle.restore(room_id, &sender.user_id, previous);
                Err(e.into())
            }
        }
    }

    pub async fn send_reaction(
        &self,
        room_id: &str,
        sender: &Identity,
        reaction: &str,
    ) -> Result<ChatMessage> {
        self.send_message(room_id, sender, reaction, MessageKind::Reaction)
            .await
    }

    /// Append an orchestrator announcement. Bypasses authorization and
    /// throttling; also mirrored to the notification sink.
    pub async fn send_system(&self, room_id: &str, text: &str) -> Result<ChatMessage> {
        post_system_message(&self.ctx, room_id, text).await
    }

    /// Authorization gate, in order: stage participants always pass;
    /// then chat access, follower requirement, mute flag and the
    /// newcomer window apply to viewers.
    async fn authorize(&self, room: &Room, sender_id: &str) -> Result<()> {
        if !room.is_live() {
            return Err(LiveError::Policy("room has ended".into()));
        }
        if self.is_on_stage(room, sender_id).await? {
            return Ok(());
        }

        let viewer: Viewer = self
            .ctx
            .store
            .get_as(&paths::viewer(&room.id, sender_id))
            .await?
            .ok_or_else(|| LiveError::Policy("join the room to chat".into()))?;

        match room.chat_access {
            ChatAccess::Noone => {
                return Err(LiveError::Policy("chat is limited to the stage".into()))
            }
            ChatAccess::Followers => {
                if !self.ctx.follows.follows(sender_id, &room.host_id).await {
                    return Err(LiveError::Policy("chat is limited to followers".into()));
                }
            }
            ChatAccess::Everyone => {}
        }

        if self.is_muted(&room.id, sender_id).await? {
            return Err(LiveError::Policy("you are muted in this room".into()));
        }

        if room.moderation.mute_new_users {
            let window = Duration::seconds(self.ctx.config.chat.newcomer_mute_secs as i64);
            if self.ctx.now() - viewer.joined_at < window {
                return Err(LiveError::Policy("new viewers must wait before chatting".into()));
            }
        }
        Ok(())
    }

    async fn is_on_stage(&self, room: &Room, user_id: &str) -> Result<bool> {
        if room.is_host(user_id) {
            return Ok(true);
        }
        Ok(self
            .ctx
            .store
            .get(&paths::guest(&room.id, user_id))
            .await?
            .is_some())
    }

    // -----------------------------------------------------------------------
    // Moderation
    // -----------------------------------------------------------------------

    /// Host-only. Muting an already muted user is a no-op. Stage members
    /// always chat, so they cannot be muted.
    pub async fn mute_user(&self, room_id: &str, actor_id: &str, target_id: &str) -> Result<()> {
        let room = self.load_room(room_id).await?;
        self.require_host(&room, actor_id)?;
        if room.is_host(target_id) {
            return Err(LiveError::Policy("the host cannot be muted".into()));
        }
        if self.is_on_stage(&room, target_id).await? {
            return Err(LiveError::Policy("guests on stage cannot be muted".into()));
        }

        let flag = MuteFlag {
            muted_by: actor_id.to_string(),
            created_at: self.ctx.now(),
        };
        let path = paths::mute(room_id, target_id);
        let (path, flag) = (path.as_str(), &flag);
        self.ctx
            .retry("mute_user", || async move {
                self.ctx
                    .store
                    .put(path, flag, SetMode::Replace)
                    .await
                    .map_err(LiveError::from)
            })
            .await?;

        self.ctx.publish(LiveEvent::UserMuted {
            room_id: room_id.to_string(),
            user_id: target_id.to_string(),
        });
        info!(room_id, user_id = target_id, "User muted");
        Ok(())
    }

    /// Host-only. Returns whether the user was muted.
    pub async fn unmute_user(&self, room_id: &str, actor_id: &str, target_id: &str) -> Result<bool> {
        let room = self.load_room(room_id).await?;
        self.require_host(&room, actor_id)?;
        let path = paths::mute(room_id, target_id);
        let path = path.as_str();
        let removed = self
            .ctx
            .retry("unmute_user", || async move {
                self.ctx.store.delete(path).await.map_err(LiveError::from)
            })
            .await?;
        if removed {
            info!(room_id, user_id = target_id, "User unmuted");
        }
        Ok(removed)
    }

    pub async fn is_muted(&self, room_id: &str, user_id: &str) -> Result<bool> {
        Ok(self
            .ctx
            .store
            .get(&paths::mute(room_id, user_id))
            .await?
            .is_some())
    }

    /// Forward a report about `target_id` to the notification sink.
    pub async fn report_user(
        &self,
        room_id: &str,
        reporter: &Identity,
        target_id: &str,
        reason: &str,
    ) -> Result<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LiveError::Validation("a report needs a reason".into()));
        }
        if reporter.user_id == target_id {
            return Err(LiveError::Validation("cannot report yourself".into()));
        }
        self.load_room(room_id).await?;
        self.ctx.notifier.notify(Notification::report(
            room_id,
            reporter.user_id.as_str(),
            target_id,
            reason,
        ));
        info!(room_id, user_id = %reporter.user_id, target = target_id, "User reported");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The last `limit` messages, oldest first.
    pub async fn recent_messages(&self, room_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let docs: Vec<(String, ChatMessage)> =
            self.ctx.store.list_as(&paths::messages(room_id)).await?;
        let skip = docs.len().saturating_sub(limit);
        Ok(docs
            .into_iter()
            .skip(skip)
            .map(|(id, mut msg)| {
                msg.id = id;
                msg
            })
            .collect())
    }

    pub async fn watch_messages(&self, room_id: &str) -> Result<Subscription> {
        Ok(self
            .ctx
            .store
            .subscribe(Watch::Collection(paths::messages(room_id)))
            .await?)
    }

    /// Forget throttle state for a room that has ended.
    pub fn forget_room(&self, room_id: &str) {
        self.throttle.forget_room(room_id);
    }

    async fn load_room(&self, room_id: &str) -> Result<Room> {
        self.ctx
            .store
            .get_as(&paths::room(room_id))
            .await?
            .ok_or_else(|| LiveError::NotFound(format!("room {room_id}")))
    }

    fn require_host(&self, room: &Room, actor_id: &str) -> Result<()> {
        if room.is_host(actor_id) {
            Ok(())
        } else {
            Err(LiveError::Policy("only the host can moderate".into()))
        }
    }
}

/// Append a system message and mirror it to the notification sink.
pub(crate) async fn post_system_message(
    ctx: &LiveContext,
    room_id: &str,
    text: &str,
) -> Result<ChatMessage> {
    let mut message = ChatMessage {
        id: String::new(),
        sender_id: SYSTEM_SENDER.to_string(),
        sender_nickname: SYSTEM_NICKNAME.to_string(),
        kind: MessageKind::System,
        text: text.to_string(),
        created_at: ctx.now(),
    };
    message.id = ctx.store.append(&paths::messages(room_id), &message).await?;
    ctx.notifier.notify(Notification::system(room_id, text));
    Ok(message)
}
