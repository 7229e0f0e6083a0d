//! Stream frames and their Server-Sent-Events encoding.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventRecord;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame has no data line")]
    MissingData,

    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One self-contained unit sent to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// First frame of every stream; tells the client its own id.
    Connected {
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// A live event. Record fields are inlined next to `type`.
    Event(EventRecord),

    /// Heartbeat.
    Ping,
}

impl Frame {
    pub fn connected(client_id: impl Into<String>) -> Self {
        Self::Connected {
            client_id: client_id.into(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Event(_) => "event",
            Self::Ping => "ping",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Encode as a single `data: <json>\n\n` block.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }

    /// Decode one SSE block. Multiple `data:` lines are joined with `\n`;
    /// comments and other fields are ignored.
    pub fn from_sse(block: &str) -> Result<Self, FrameError> {
        let data: Vec<&str> = block
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
            .collect();
        if data.is_empty() {
            return Err(FrameError::MissingData);
        }
        Ok(serde_json::from_str(&data.join("\n"))?)
    }
}
