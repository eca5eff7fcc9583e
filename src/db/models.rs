//! Database models for chatvault storage
//!
//! Every imported row is keyed by its natural key (conversation id, source record id)
//! so that importing the same export twice never duplicates history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// String constants for message types (keep in sync with as_str())
const MESSAGE_TYPE_TEXT: &str = "text";
const MESSAGE_TYPE_PHOTO: &str = "photo";
const MESSAGE_TYPE_VIDEO: &str = "video";
const MESSAGE_TYPE_VOICE: &str = "voice";
const MESSAGE_TYPE_DOCUMENT: &str = "document";
const MESSAGE_TYPE_STICKER: &str = "sticker";
const MESSAGE_TYPE_ANIMATION: &str = "animation";
const MESSAGE_TYPE_VIDEO_NOTE: &str = "video_note";

/// Message subtype, derived from which media fields an export record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Photo,
    Video,
    Voice,
    Document,
    Sticker,
    Animation,
    VideoNote,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => MESSAGE_TYPE_TEXT,
            MessageType::Photo => MESSAGE_TYPE_PHOTO,
            MessageType::Video => MESSAGE_TYPE_VIDEO,
            MessageType::Voice => MESSAGE_TYPE_VOICE,
            MessageType::Document => MESSAGE_TYPE_DOCUMENT,
            MessageType::Sticker => MESSAGE_TYPE_STICKER,
            MessageType::Animation => MESSAGE_TYPE_ANIMATION,
            MessageType::VideoNote => MESSAGE_TYPE_VIDEO_NOTE,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            MESSAGE_TYPE_TEXT => Some(MessageType::Text),
            MESSAGE_TYPE_PHOTO => Some(MessageType::Photo),
            MESSAGE_TYPE_VIDEO => Some(MessageType::Video),
            MESSAGE_TYPE_VOICE => Some(MessageType::Voice),
            MESSAGE_TYPE_DOCUMENT => Some(MessageType::Document),
            MESSAGE_TYPE_STICKER => Some(MessageType::Sticker),
            MESSAGE_TYPE_ANIMATION => Some(MessageType::Animation),
            MESSAGE_TYPE_VIDEO_NOTE => Some(MessageType::VideoNote),
            _ => None,
        }
    }
}

/// A chat group or channel whose history is stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbConversation {
    pub id: i64,
    /// Conversation kind as reported by the export ("private_supergroup", "personal_chat", ...)
    pub kind: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbConversation {
    pub fn new(id: i64, kind: &str, name: &str) -> Self {
        let now = Utc::now();
        DbConversation {
            id,
            kind: kind.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Minimal profile of a message author, service actor or reactor
///
/// Imports only know a display name; richer profile data arrives through live capture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbParticipant {
    pub id: i64,
    /// None never overwrites a name that is already stored
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbParticipant {
    pub fn new(id: i64, display_name: Option<&str>) -> Self {
        let now = Utc::now();
        DbParticipant {
            id,
            display_name: display_name
                .filter(|name| !name.trim().is_empty())
                .map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A user-authored message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbMessage {
    /// Internal row id, assigned on insert (0 before)
    pub id: i64,
    pub conversation_id: i64,
    /// Record id from the source export, unique within the conversation
    pub source_message_id: i64,
    pub sender_id: Option<i64>,
    pub sent_at: DateTime<Utc>,
    pub message_type: MessageType,
    pub text: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub forwarded_from_id: Option<i64>,
    pub forwarded_from_name: Option<String>,
    /// Content hash of the attachment in the media store
    pub media_sha256: Option<String>,
    pub media_file_name: Option<String>,
    pub media_file_size: Option<i64>,
    pub media_mime_type: Option<String>,
    pub media_duration_seconds: Option<i64>,
    pub media_width: Option<i64>,
    pub media_height: Option<i64>,
    /// Raw text entity spans as JSON
    pub entities: Option<String>,
}

/// A service event (member joined, title changed, message pinned, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbServiceEvent {
    pub id: i64,
    pub conversation_id: i64,
    pub source_message_id: i64,
    pub actor_id: Option<i64>,
    pub occurred_at: DateTime<Utc>,
    /// Normalized action name
    pub action: String,
    /// JSON object with action-specific details (members, title)
    pub metadata: String,
}

/// One participant's reaction to a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbReaction {
    pub id: i64,
    /// Internal message row id
    pub message_id: i64,
    pub participant_id: i64,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}
