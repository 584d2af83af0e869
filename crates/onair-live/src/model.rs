//! Documents stored in the signaling store.

use chrono::{DateTime, Utc};
use onair_config::schema::RoomsConfig;
use serde::{Deserialize, Serialize};

/// Sender id of messages emitted by the orchestrator itself.
pub const SYSTEM_SENDER: &str = "system";

// ---------------------------------------------------------------------------
// Room settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Solo,
    #[default]
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatAccess {
    #[default]
    Everyone,
    Followers,
    Noone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinAccess {
    #[default]
    Everyone,
    Followers,
    Invite,
}

/// Stored and shown to clients; it does not gate viewer admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Friends,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Moderation {
    pub filter_bad_words: bool,
    pub mute_new_users: bool,
}

/// Host-chosen settings for a new room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSettings {
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub allow_guests: bool,
    pub chat_access: ChatAccess,
    pub join_access: JoinAccess,
    pub moderation: Moderation,
    pub privacy: Privacy,
    /// Signed so that a negative request can be rejected rather than wrap.
    pub max_guests: i64,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            room_type: RoomType::Group,
            allow_guests: true,
            chat_access: ChatAccess::Everyone,
            join_access: JoinAccess::Everyone,
            moderation: Moderation::default(),
            privacy: Privacy::Public,
            max_guests: 3,
        }
    }
}

impl RoomSettings {
    /// Defaults with the configured guest capacity.
    pub fn from_config(rooms: &RoomsConfig) -> Self {
        Self {
            max_guests: i64::from(rooms.default_max_guests),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Room
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Live,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub host_id: String,
    pub host_name: String,
    #[serde(default)]
    pub host_avatar: Option<String>,
    pub title: String,
    #[serde(rename = "type")]
    pub room_type: RoomType,
    pub allow_guests: bool,
    pub chat_access: ChatAccess,
    pub join_access: JoinAccess,
    pub moderation: Moderation,
    pub privacy: Privacy,
    pub max_guests: u32,
    pub viewer_count: i64,
    pub like_count: i64,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    pub host_lease_expires_at: DateTime<Utc>,
}

impl Room {
    pub fn is_live(&self) -> bool {
        self.status == RoomStatus::Live
    }

    pub fn is_host(&self, user_id: &str) -> bool {
        self.host_id == user_id
    }
}

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewer {
    pub user_id: String,
    pub nickname: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guest {
    pub user_id: String,
    pub nickname: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Approved,
    Declined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub requester_id: String,
    pub nickname: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Message,
    Reaction,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Store-assigned; filled in from the document id on read.
    #[serde(default, skip_serializing)]
    pub id: String,
    pub sender_id: String,
    pub sender_nickname: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn is_system(&self) -> bool {
        self.sender_id == SYSTEM_SENDER
    }
}

/// Existence of this document means the user is muted in the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuteFlag {
    pub muted_by: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_take_guest_capacity_from_config() {
        let mut rooms = RoomsConfig::default();
        rooms.default_max_guests = 1;
        let settings = RoomSettings::from_config(&rooms);
        assert_eq!(settings.max_guests, 1);
        assert_eq!(settings.chat_access, ChatAccess::Everyone);
        assert!(settings.allow_guests);
    }

    #[test]
    fn settings_use_wire_names() {
        let json = serde_json::to_value(RoomSettings::default()).unwrap();
        assert_eq!(json["type"], "group");
        assert_eq!(json["chat_access"], "everyone");
        assert_eq!(json["join_access"], "everyone");
        assert_eq!(json["privacy"], "public");
    }

    #[test]
    fn partial_settings_fill_defaults() {
        let settings: RoomSettings =
            serde_json::from_str(r#"{"chat_access":"noone","max_guests":1}"#).unwrap();
        assert_eq!(settings.chat_access, ChatAccess::Noone);
        assert_eq!(settings.max_guests, 1);
        assert!(settings.allow_guests);
    }

    #[test]
    fn message_kind_is_stored_as_type() {
        let msg = ChatMessage {
            id: "ignored".into(),
            sender_id: SYSTEM_SENDER.into(),
            sender_nickname: "OnAir".into(),
            kind: MessageKind::System,
            text: "hello".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "system");
        assert!(json.get("id").is_none());
        assert!(msg.is_system());
    }
}
