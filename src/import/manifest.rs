use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Invalid manifest: {0}")]
    InvalidManifest(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded chat export: conversation identity plus every record in source order
#[derive(Debug, Clone, Deserialize)]
pub struct ExportManifest {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(rename = "messages", default)]
    pub records: Vec<ExportRecord>,
}

/// One manifest entry, discriminated by its `type` field
///
/// A record with no `type` (or an empty one) is a message.
#[derive(Debug, Clone)]
pub enum ExportRecord {
    Message(MessageRecord),
    Service(ServiceRecord),
    /// Record kinds this importer does not know how to store
    Unsupported,
}

const RECORD_TYPE_MESSAGE: &str = "message";
const RECORD_TYPE_SERVICE: &str = "service";

/// Fields shared by both record kinds
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordHeader {
    /// Unique within the conversation
    pub id: i64,
    /// ISO-8601, usually without an offset
    #[serde(default)]
    pub date: Option<String>,
    /// Epoch seconds as a decimal string; wins over `date`
    #[serde(default)]
    pub date_unixtime: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub from_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub text: MessageText,
    #[serde(default)]
    pub text_entities: Vec<serde_json::Value>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub reply_to_message_id: Option<i64>,
    #[serde(default)]
    pub forwarded_from: Option<String>,
    #[serde(default)]
    pub forwarded_from_id: Option<String>,

    #[serde(default)]
    pub photo: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub photo_file_size: Option<i64>,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub file_size: Option<i64>,
    /// Media-kind hint: "video_file", "voice_message", "sticker", ...
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub duration_seconds: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub width: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub height: Option<i64>,

    #[serde(default)]
    pub reactions: Vec<ReactionRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    /// Affected members by display name; the export writes null for unknown ones
    #[serde(default)]
    pub members: Vec<Option<String>>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Message text: either a plain string or a sequence of formatted spans
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageText {
    Plain(String),
    Spans(Vec<TextPart>),
}

/// Element of a span sequence. Exports mix bare strings with typed spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextPart {
    Plain(String),
    Span(TextSpan),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionRecord {
    /// Absent for custom emoji reactions
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub count: Option<i64>,
    #[serde(default)]
    pub recent: Vec<RecentReaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecentReaction {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub from_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

impl Default for MessageText {
    fn default() -> Self {
        MessageText::Plain(String::new())
    }
}

impl MessageText {
    /// Concatenated text content
    pub fn to_plain(&self) -> String {
        match self {
            MessageText::Plain(text) => text.clone(),
            MessageText::Spans(parts) => parts
                .iter()
                .map(|part| match part {
                    TextPart::Plain(text) => text.as_str(),
                    TextPart::Span(span) => span.text.as_str(),
                })
                .collect(),
        }
    }
}

impl ExportRecord {
    pub fn header(&self) -> Option<&RecordHeader> {
        match self {
            ExportRecord::Message(record) => Some(&record.header),
            ExportRecord::Service(record) => Some(&record.header),
            ExportRecord::Unsupported => None,
        }
    }
}

impl<'de> Deserialize<'de> for ExportRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        let kind = value
            .get("type")
            .and_then(|kind| kind.as_str())
            .filter(|kind| !kind.is_empty())
            .unwrap_or(RECORD_TYPE_MESSAGE);

        match kind {
            RECORD_TYPE_MESSAGE => serde_json::from_value(value)
                .map(ExportRecord::Message)
                .map_err(D::Error::custom),
            RECORD_TYPE_SERVICE => serde_json::from_value(value)
                .map(ExportRecord::Service)
                .map_err(D::Error::custom),
            _ => Ok(ExportRecord::Unsupported),
        }
    }
}

/// Optional numbers also accept numeric strings; anything else is treated as absent.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Number(number) => number.as_i64(),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

/// Text that is neither a string nor a span sequence decodes as empty text.
fn lenient_text<'de, D>(deserializer: D) -> Result<MessageText, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).unwrap_or_default())
}

/// Decode manifest bytes
pub fn parse_manifest(bytes: &[u8]) -> Result<ExportManifest, ManifestError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Read and decode the manifest file at `path`
pub async fn load_manifest(path: &Path) -> Result<ExportManifest, ManifestError> {
    let bytes = tokio::fs::read(path).await?;
    parse_manifest(&bytes)
}
