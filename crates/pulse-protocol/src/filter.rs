//! Subscription filters.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::EventRecord;

/// Longest accepted filter value, in bytes.
pub const MAX_FILTER_VALUE_LEN: usize = 256;

/// Malformed subscription parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("{field} must not be blank")]
    Blank { field: &'static str },

    #[error("{field} exceeds {max} bytes")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} contains control characters")]
    ControlCharacter { field: &'static str },
}

/// Predicate a subscriber declares over incoming events.
///
/// Each axis is optional; an absent axis matches anything, so the default
/// filter is a global subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

impl SubscriptionFilter {
    /// Filter that matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a filter from request parameters, rejecting malformed values.
    pub fn parse(
        project_id: Option<impl Into<String>>,
        session_id: Option<impl Into<String>>,
    ) -> Result<Self, FilterError> {
        Ok(Self {
            project_id: project_id
                .map(|v| validate("project_id", v.into()))
                .transpose()?,
            session_id: session_id
                .map(|v| validate("session_id", v.into()))
                .transpose()?,
        })
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn is_global(&self) -> bool {
        self.project_id.is_none() && self.session_id.is_none()
    }

    pub fn matches(&self, event: &EventRecord) -> bool {
        self.matches_ids(event.project_id(), event.session_id())
    }

    pub fn matches_ids(&self, project_id: &str, session_id: &str) -> bool {
        self.project_id.as_deref().is_none_or(|p| p == project_id)
            && self.session_id.as_deref().is_none_or(|s| s == session_id)
    }
}

fn validate(field: &'static str, value: String) -> Result<String, FilterError> {
    if value.trim().is_empty() {
        return Err(FilterError::Blank { field });
    }
    if value.len() > MAX_FILTER_VALUE_LEN {
        return Err(FilterError::TooLong {
            field,
            max: MAX_FILTER_VALUE_LEN,
        });
    }
    if value.chars().any(char::is_control) {
        return Err(FilterError::ControlCharacter { field });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventPayload, StepPayload};

    fn event(project: &str, session: &str) -> EventRecord {
        EventRecord::new(project, session, EventPayload::Step(StepPayload::default())).unwrap()
    }

    fn filter(project: Option<&str>, session: Option<&str>) -> SubscriptionFilter {
        SubscriptionFilter::parse(project, session).unwrap()
    }

    #[test]
    fn test_match_table() {
        let cases = [
            (filter(None, None), "p1", "s1", true),
            (filter(None, None), "p2", "s9", true),
            (filter(Some("p1"), None), "p1", "s1", true),
            (filter(Some("p1"), None), "p1", "s2", true),
            (filter(Some("p1"), None), "p2", "s1", false),
            (filter(None, Some("s1")), "p1", "s1", true),
            (filter(None, Some("s1")), "p2", "s1", true),
            (filter(None, Some("s1")), "p1", "s2", false),
            (filter(Some("p1"), Some("s1")), "p1", "s1", true),
            (filter(Some("p1"), Some("s1")), "p1", "s2", false),
            (filter(Some("p1"), Some("s1")), "p2", "s1", false),
        ];

        for (filter, project, session, expected) in cases {
            assert_eq!(
                filter.matches(&event(project, session)),
                expected,
                "{filter:?} vs {project}/{session}"
            );
        }
    }

    #[test]
    fn test_global() {
        assert!(SubscriptionFilter::all().is_global());
        assert!(!filter(Some("p1"), None).is_global());
    }

    #[test]
    fn test_rejects_blank() {
        assert_eq!(
            SubscriptionFilter::parse(Some("  "), None::<String>),
            Err(FilterError::Blank {
                field: "project_id"
            })
        );
        assert_eq!(
            SubscriptionFilter::parse(None::<String>, Some("")),
            Err(FilterError::Blank {
                field: "session_id"
            })
        );
    }

    #[test]
    fn test_rejects_too_long() {
        let long = "x".repeat(MAX_FILTER_VALUE_LEN + 1);
        assert!(matches!(
            SubscriptionFilter::parse(Some(long), None::<String>),
            Err(FilterError::TooLong { .. })
        ));
        let max = "x".repeat(MAX_FILTER_VALUE_LEN);
        assert!(SubscriptionFilter::parse(Some(max), None::<String>).is_ok());
    }

    #[test]
    fn test_rejects_control_characters() {
        assert_eq!(
            SubscriptionFilter::parse(None::<String>, Some("s1\n")),
            Err(FilterError::ControlCharacter {
                field: "session_id"
            })
        );
    }
}
