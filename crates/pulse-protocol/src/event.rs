//! Event records.
//!
//! An [`EventRecord`] describes one occurrence in an agent session. Its payload
//! is a typed [`EventPayload`] chosen by the record's [`EventKind`]; raw JSON
//! from producers is validated against that schema when the record is built
//! from an [`EventInput`].

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Reasons an event cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("unknown event kind: {0}")]
    UnknownKind(String),

    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload { kind: EventKind, reason: String },

    #[error("{0} must not be blank")]
    BlankField(&'static str),
}

// ============================================================================
// Kind
// ============================================================================

/// Discriminator for the payload schema of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    Step,
    ToolCall,
    ToolResult,
    Message,
    Error,
    Custom,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        Self::SessionStart,
        Self::SessionEnd,
        Self::Step,
        Self::ToolCall,
        Self::ToolResult,
        Self::Message,
        Self::Error,
        Self::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStart => "session_start",
            Self::SessionEnd => "session_end",
            Self::Step => "step",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Message => "message",
            Self::Error => "error",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| EventError::UnknownKind(s.to_string()))
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// An agent session began.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An agent session finished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One unit of agent progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPayload {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultPayload {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub role: String,
    pub content: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed event payload.
///
/// Serialized without a tag: the owning record carries the `kind`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    SessionStart(SessionStartPayload),
    SessionEnd(SessionEndPayload),
    Step(StepPayload),
    ToolCall(ToolCallPayload),
    ToolResult(ToolResultPayload),
    Message(MessagePayload),
    Error(ErrorPayload),
    Custom(Value),
}

impl EventPayload {
    /// Validate raw JSON against the schema for `kind`.
    ///
    /// `null` is read as an empty object, so kinds without required fields
    /// accept a missing payload.
    pub fn from_value(kind: EventKind, value: Value) -> Result<Self, EventError> {
        let value = match value {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };

        let payload = match kind {
            EventKind::SessionStart => Self::SessionStart(typed(kind, value)?),
            EventKind::SessionEnd => Self::SessionEnd(typed(kind, value)?),
            EventKind::Step => Self::Step(typed(kind, value)?),
            EventKind::ToolCall => Self::ToolCall(typed(kind, value)?),
            EventKind::ToolResult => Self::ToolResult(typed(kind, value)?),
            EventKind::Message => Self::Message(typed(kind, value)?),
            EventKind::Error => Self::Error(typed(kind, value)?),
            EventKind::Custom => Self::Custom(value),
        };

        payload.validate()?;
        Ok(payload)
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::SessionStart(_) => EventKind::SessionStart,
            Self::SessionEnd(_) => EventKind::SessionEnd,
            Self::Step(_) => EventKind::Step,
            Self::ToolCall(_) => EventKind::ToolCall,
            Self::ToolResult(_) => EventKind::ToolResult,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
            Self::Custom(_) => EventKind::Custom,
        }
    }

    /// Duration reported by the payload, if the kind carries one.
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            Self::SessionEnd(p) => p.duration_ms,
            Self::Step(p) => p.duration_ms,
            Self::ToolResult(p) => p.duration_ms,
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), EventError> {
        let blank = |field: &str| EventError::InvalidPayload {
            kind: self.kind(),
            reason: format!("{field} must not be blank"),
        };
        match self {
            Self::ToolCall(p) if p.tool.trim().is_empty() => Err(blank("tool")),
            Self::ToolResult(p) if p.tool.trim().is_empty() => Err(blank("tool")),
            Self::Message(p) if p.role.trim().is_empty() => Err(blank("role")),
            Self::Error(p) if p.message.trim().is_empty() => Err(blank("message")),
            _ => Ok(()),
        }
    }
}

fn typed<T: DeserializeOwned>(kind: EventKind, value: Value) -> Result<T, EventError> {
    serde_json::from_value(value).map_err(|e| EventError::InvalidPayload {
        kind,
        reason: e.to_string(),
    })
}

// ============================================================================
// Records
// ============================================================================

/// Unvalidated event as submitted by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub project_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_tokens: Option<u64>,
}

impl EventInput {
    /// Validate into a record, stamping `now_ms` when no timestamp was given.
    pub fn into_record(self, now_ms: i64) -> Result<EventRecord, EventError> {
        let kind: EventKind = self.kind.parse()?;
        let payload = EventPayload::from_value(kind, self.payload)?;

        let mut record = EventRecord::new(self.project_id, self.session_id, payload)?
            .with_timestamp_ms(self.timestamp_ms.unwrap_or(now_ms));
        if let Some(agent_id) = self.agent_id {
            record = record.with_agent_id(agent_id);
        }
        if let Some(tokens) = self.estimated_tokens {
            record = record.with_estimated_tokens(tokens);
        }
        Ok(record)
    }
}

impl TryFrom<EventInput> for EventRecord {
    type Error = EventError;

    fn try_from(input: EventInput) -> Result<Self, Self::Error> {
        input.into_record(chrono::Utc::now().timestamp_millis())
    }
}

/// One immutable telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "EventInput")]
pub struct EventRecord {
    project_id: String,
    session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
    kind: EventKind,
    payload: EventPayload,
    timestamp_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    estimated_tokens: Option<u64>,
}

impl EventRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        project_id: impl Into<String>,
        session_id: impl Into<String>,
        payload: EventPayload,
    ) -> Result<Self, EventError> {
        let project_id = project_id.into();
        let session_id = session_id.into();
        if project_id.trim().is_empty() {
            return Err(EventError::BlankField("projectId"));
        }
        if session_id.trim().is_empty() {
            return Err(EventError::BlankField("sessionId"));
        }

        Ok(Self {
            project_id,
            session_id,
            agent_id: None,
            kind: payload.kind(),
            payload,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            estimated_tokens: None,
        })
    }

    /// Blank agent ids are dropped.
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        let agent_id = agent_id.into();
        self.agent_id = (!agent_id.trim().is_empty()).then_some(agent_id);
        self
    }

    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn with_estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    pub fn estimated_tokens(&self) -> Option<u64> {
        self.estimated_tokens
    }
}
