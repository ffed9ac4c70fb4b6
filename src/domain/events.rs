//! Journal events.
//!
//! Every lifecycle side effect is recorded as an immutable event in an
//! append-only journal next to the part directories.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::action::ActionKind;
use super::step::Step;

/// A single entry in the lifecycle journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// Execution session the event belongs to (none for cleans)
    pub session_id: Option<Uuid>,

    /// Part the event refers to (if applicable)
    pub part_name: Option<String>,

    /// Step the event refers to (if applicable)
    pub step: Option<Step>,

    /// Action kind that was executed (if applicable)
    pub action: Option<ActionKind>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary
    pub summary: String,

    /// Time taken in milliseconds (for completed actions)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl JournalEvent {
    /// Create a new event with the current timestamp
    pub fn new(event_type: EventType, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session_id: None,
            part_name: None,
            step: None,
            action: None,
            event_type,
            summary: summary.into(),
            duration_ms: None,
            error: None,
        }
    }

    pub fn in_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn for_step(mut self, part_name: impl Into<String>, step: Step) -> Self {
        self.part_name = Some(part_name.into());
        self.step = Some(step);
        self
    }

    pub fn with_action(mut self, action: ActionKind) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Types of lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// An execution context was acquired
    SessionStarted,

    /// An execution context was released
    SessionFinished,

    /// An action began executing
    ActionStarted,

    /// An action completed and its record was written
    ActionCompleted,

    /// An action failed
    ActionFailed,

    /// A failed or interrupted step was reset to "not run"
    ActionRolledBack,

    /// A step record and its artifacts were removed
    StepCleaned,

    /// A step record was flagged for rerun
    StepMarkedOutdated,
}
