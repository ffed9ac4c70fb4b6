//! Planned lifecycle actions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::step::Step;

/// What the executor has to do for a (part, step) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// The step never ran
    Run,

    /// The step ran before but its inputs changed or it was marked outdated
    Rerun,

    /// The step result is still valid
    Skip,

    /// Only the file filtering into stage/prime has to be redone
    Reapply,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Rerun => "rerun",
            Self::Skip => "skip",
            Self::Reapply => "reapply",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A planned unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Part the action applies to
    pub part_name: String,

    /// Step to execute
    pub step: Step,

    /// What has to be done
    pub kind: ActionKind,

    /// Why the action was planned this way
    pub reason: Option<String>,
}

impl Action {
    /// Create a RUN action
    pub fn new(part_name: impl Into<String>, step: Step) -> Self {
        Self {
            part_name: part_name.into(),
            step,
            kind: ActionKind::Run,
            reason: None,
        }
    }

    pub fn with_kind(mut self, kind: ActionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Whether executing this action changes anything
    pub fn is_noop(&self) -> bool {
        self.kind == ActionKind::Skip
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.part_name, self.step, self.kind)?;
        if let Some(reason) = &self.reason {
            write!(f, " - {}", reason)?;
        }
        Ok(())
    }
}
