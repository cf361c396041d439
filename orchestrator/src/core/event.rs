//! Session event records.
//!
//! An [`Event`] is immutable once appended to a session log. Stages and the
//! refinement loop describe what they want recorded with a [`NewEvent`]; the
//! session assigns the ordinal and timestamp on append.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inline binary payload (base64-encoded `data`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

/// One segment of message content: `{"text": ...}` or `{"inlineData": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Part {
    #[serde(rename = "text")]
    Text(String),
    #[serde(rename = "inlineData")]
    InlineData(Blob),
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(text.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(text) => Some(text),
            Part::InlineData(_) => None,
        }
    }
}

/// Ordered message content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn new(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part::text(text)],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// All text parts joined with blank lines, or `None` if there are none.
    pub fn joined_text(&self) -> Option<String> {
        let texts: Vec<&str> = self.parts.iter().filter_map(Part::as_text).collect();
        (!texts.is_empty()).then(|| texts.join("\n\n"))
    }

    /// The last non-blank text part.
    pub fn last_text(&self) -> Option<&str> {
        self.parts
            .iter()
            .rev()
            .filter_map(Part::as_text)
            .find(|text| !text.trim().is_empty())
    }

    pub fn inline_data(&self) -> impl Iterator<Item = &Blob> {
        self.parts.iter().filter_map(|part| match part {
            Part::InlineData(blob) => Some(blob),
            Part::Text(_) => None,
        })
    }
}

/// Acknowledgement returned by an artifact write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ArtifactAck {
    Success { file_path: String },
    Error { error: String },
}

impl ArtifactAck {
    pub fn is_success(&self) -> bool {
        matches!(self, ArtifactAck::Success { .. })
    }
}

/// Side effects and control signals carried by an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventActions {
    /// Terminate the enclosing refinement loop.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub escalate: bool,
    /// State writes applied when the event is appended.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state_delta: BTreeMap<String, Value>,
    /// Artifact writes performed while producing the event. Never mirrored into state.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artifact_delta: BTreeMap<String, ArtifactAck>,
}

/// An event as recorded in a session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Zero-based position in the session log.
    pub ordinal: u64,
    pub invocation_id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub actions: EventActions,
}

impl Event {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// An event that has not been appended yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub author: String,
    pub content: Option<Content>,
    pub error: Option<String>,
    pub actions: EventActions,
}

impl NewEvent {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            content: None,
            error: None,
            actions: EventActions::default(),
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.actions.state_delta.insert(key.into(), value);
        self
    }

    pub fn with_artifacts(mut self, artifacts: BTreeMap<String, ArtifactAck>) -> Self {
        self.actions.artifact_delta = artifacts;
        self
    }

    pub fn escalate(mut self) -> Self {
        self.actions.escalate = true;
        self
    }
}
