//! Helpers that turn loosely typed export fields into storage values.

use crate::db::MessageType;
use crate::import::manifest::{MessageRecord, RecordHeader, ServiceRecord};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Prefix the export puts in front of numeric user ids ("user42")
const ACTOR_ID_PREFIX: &str = "user";

/// Exports made without media write this instead of a path
const MISSING_FILE_PLACEHOLDER: &str = "(File not included";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecordError {
    #[error("Record has no parseable date")]
    MissingDate,
    #[error("Invalid actor id: {0:?}")]
    InvalidActorId(String),
    #[error("Unsafe media path: {0}")]
    UnsafeMediaPath(String),
}

pub fn parse_actor_id(raw: &str) -> Result<i64, RecordError> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix(ACTOR_ID_PREFIX).unwrap_or(trimmed);
    digits
        .parse::<i64>()
        .map_err(|_| RecordError::InvalidActorId(raw.to_string()))
}

/// Normalize a service action keyword. Unknown keywords pass through unchanged.
pub fn map_service_action(action: &str) -> &str {
    match action {
        "invite_members" | "join_group_by_link" => "user_joined",
        "remove_members" => "user_left",
        "migrate_to_supergroup" => "chat_migrated",
        "pin_message" => "message_pinned",
        "edit_group_title" => "title_changed",
        "edit_group_photo" => "photo_changed",
        other => other,
    }
}

/// Epoch seconds first, then ISO-8601 (with or without an offset) as UTC.
pub fn resolve_date(header: &RecordHeader) -> Result<DateTime<Utc>, RecordError> {
    if let Some(seconds) = header
        .date_unixtime
        .as_deref()
        .and_then(|raw| raw.trim().parse::<i64>().ok())
    {
        if let Some(date) = Utc.timestamp_opt(seconds, 0).single() {
            return Ok(date);
        }
    }

    header
        .date
        .as_deref()
        .ok_or(RecordError::MissingDate)
        .and_then(parse_iso_date)
}

/// RFC 3339, or a bare `YYYY-MM-DDTHH:MM:SS` read as UTC
pub fn parse_iso_date(raw: &str) -> Result<DateTime<Utc>, RecordError> {
    let raw = raw.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Ok(date.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| RecordError::MissingDate)
}

/// Photo wins, then the media-kind hint, then a generic file, else text.
pub fn classify_message(record: &MessageRecord) -> MessageType {
    if record.photo.is_some() {
        return MessageType::Photo;
    }

    let hinted = record.media_type.as_deref().and_then(|hint| match hint {
        "video_file" => Some(MessageType::Video),
        "voice_message" => Some(MessageType::Voice),
        "animation" => Some(MessageType::Animation),
        "sticker" => Some(MessageType::Sticker),
        "video_message" => Some(MessageType::VideoNote),
        _ => None,
    });
    if let Some(kind) = hinted {
        return kind;
    }

    if record.file.is_some() {
        return MessageType::Document;
    }
    MessageType::Text
}

/// Relative path of the record's attachment, if it has a usable one
pub fn media_reference(record: &MessageRecord) -> Option<&str> {
    record
        .photo
        .as_deref()
        .or(record.file.as_deref())
        .map(str::trim)
        .filter(|path| !path.is_empty() && !path.starts_with(MISSING_FILE_PLACEHOLDER))
}

/// Resolve a manifest-relative media path inside `root`.
///
/// Absolute paths and `..` components are rejected.
pub fn resolve_media_path(root: &Path, relative: &str) -> Result<PathBuf, RecordError> {
    let path = Path::new(relative);
    let safe = path
        .components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if !safe {
        return Err(RecordError::UnsafeMediaPath(relative.to_string()));
    }
    Ok(root.join(path))
}

/// Declared size, falling back to the photo size field
pub fn media_file_size(record: &MessageRecord) -> Option<i64> {
    record.file_size.or(record.photo_file_size)
}

/// Action-specific details kept alongside a service event
pub fn service_metadata(record: &ServiceRecord) -> serde_json::Value {
    let mut metadata = serde_json::Map::new();

    let members: Vec<&str> = record.members.iter().flatten().map(String::as_str).collect();
    if !members.is_empty() {
        metadata.insert("members".to_string(), serde_json::json!(members));
    }
    if let Some(title) = &record.title {
        metadata.insert("title".to_string(), serde_json::json!(title));
    }
    if let Some(actor) = &record.actor {
        metadata.insert("actor".to_string(), serde_json::json!(actor));
    }

    serde_json::Value::Object(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::manifest::ExportRecord;

    fn header(date: Option<&str>, unixtime: Option<&str>) -> RecordHeader {
        RecordHeader {
            id: 1,
            date: date.map(str::to_string),
            date_unixtime: unixtime.map(str::to_string),
        }
    }

    fn message(json: &str) -> MessageRecord {
        match serde_json::from_str::<ExportRecord>(json).unwrap() {
            ExportRecord::Message(record) => record,
            other => panic!("expected message, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_actor_id() {
        assert_eq!(parse_actor_id("user42511703"), Ok(42511703));
        assert_eq!(parse_actor_id("42"), Ok(42));
        assert_eq!(parse_actor_id(" user7 "), Ok(7));
        assert!(matches!(
            parse_actor_id("channel99"),
            Err(RecordError::InvalidActorId(_))
        ));
        assert!(parse_actor_id("user").is_err());
        assert!(parse_actor_id("").is_err());
    }

    #[test]
    fn test_map_service_action() {
        assert_eq!(map_service_action("invite_members"), "user_joined");
        assert_eq!(map_service_action("join_group_by_link"), "user_joined");
        assert_eq!(map_service_action("remove_members"), "user_left");
        assert_eq!(map_service_action("edit_group_title"), "title_changed");
        assert_eq!(map_service_action("phone_call"), "phone_call");
    }

    #[test]
    fn test_epoch_wins_over_iso() {
        let date = resolve_date(&header(Some("2020-01-01T00:00:00"), Some("1673778600"))).unwrap();
        assert_eq!(date.timestamp(), 1673778600);
    }

    #[test]
    fn test_iso_fallbacks() {
        let naive = resolve_date(&header(Some("2023-01-15T10:30:00"), Some("soon"))).unwrap();
        assert_eq!(naive.to_rfc3339(), "2023-01-15T10:30:00+00:00");

        let offset = resolve_date(&header(Some("2023-01-15T12:30:00+02:00"), None)).unwrap();
        assert_eq!(offset, naive);
    }

    #[test]
    fn test_missing_date() {
        assert_eq!(resolve_date(&header(None, None)), Err(RecordError::MissingDate));
        assert_eq!(
            resolve_date(&header(Some("yesterday"), None)),
            Err(RecordError::MissingDate)
        );
    }

    #[test]
    fn test_classification_order() {
        let photo = message(
            r#"{"id":1,"type":"message","photo":"p.jpg","media_type":"sticker","file":"f"}"#,
        );
        assert_eq!(classify_message(&photo), MessageType::Photo);

        let voice = message(
            r#"{"id":2,"type":"message","file":"v.ogg","media_type":"voice_message"}"#,
        );
        assert_eq!(classify_message(&voice), MessageType::Voice);

        let round = message(r#"{"id":3,"type":"message","file":"r.mp4","media_type":"video_message"}"#);
        assert_eq!(classify_message(&round), MessageType::VideoNote);

        let unknown_hint = message(r#"{"id":4,"type":"message","file":"a.mp3","media_type":"audio_file"}"#);
        assert_eq!(classify_message(&unknown_hint), MessageType::Document);

        let text = message(r#"{"id":5,"type":"message","text":"hi"}"#);
        assert_eq!(classify_message(&text), MessageType::Text);
    }

    #[test]
    fn test_media_reference_skips_placeholders() {
        let placeholder = message(
            r#"{"id":1,"type":"message","file":"(File not included. Change data exporting settings to download.)"}"#,
        );
        assert_eq!(media_reference(&placeholder), None);

        let photo = message(r#"{"id":2,"type":"message","photo":"photos/p.jpg","file":"files/f"}"#);
        assert_eq!(media_reference(&photo), Some("photos/p.jpg"));
    }

    #[test]
    fn test_resolve_media_path_rejects_escapes() {
        let root = Path::new("/work");
        assert_eq!(
            resolve_media_path(root, "photos/a.jpg").unwrap(),
            PathBuf::from("/work/photos/a.jpg")
        );
        assert!(matches!(
            resolve_media_path(root, "../secret"),
            Err(RecordError::UnsafeMediaPath(_))
        ));
        assert!(resolve_media_path(root, "/etc/passwd").is_err());
    }

    #[test]
    fn test_service_metadata() {
        let record: ServiceRecord = serde_json::from_str(
            r#"{"id":4,"action":"invite_members","actor":"Bob","members":["Carol",null]}"#,
        )
        .unwrap();
        let metadata = service_metadata(&record);
        assert_eq!(metadata["members"], serde_json::json!(["Carol"]));
        assert_eq!(metadata["actor"], "Bob");
        assert!(metadata.get("title").is_none());
    }

    #[test]
    fn test_file_size_fallback() {
        let record = message(r#"{"id":1,"type":"message","photo":"p.jpg","photo_file_size":12}"#);
        assert_eq!(media_file_size(&record), Some(12));
    }
}
