//! Canonical wire types for the pulse live event feed.
//!
//! Producers report [`EventRecord`]s, subscribers declare a
//! [`SubscriptionFilter`], and the hub streams [`Frame`]s back to them as
//! Server-Sent Events:
//!
//! ```text
//! data: {"type":"connected","clientId":"9f1c..."}
//!
//! data: {"type":"event","projectId":"p1","sessionId":"s1","kind":"step",...}
//!
//! data: {"type":"ping"}
//! ```

pub mod event;
pub mod filter;
pub mod frame;

pub use event::{
    ErrorPayload, EventError, EventInput, EventKind, EventPayload, EventRecord, MessagePayload,
    SessionEndPayload, SessionStartPayload, StepPayload, ToolCallPayload, ToolResultPayload,
};
pub use filter::{FilterError, MAX_FILTER_VALUE_LEN, SubscriptionFilter};
pub use frame::{Frame, FrameError};
