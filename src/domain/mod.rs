//! Domain types for the parts lifecycle.
//!
//! This module contains the core data structures:
//! - Step: the fixed lifecycle steps
//! - Action: planned units of work
//! - Part: validated part definitions
//! - Project: immutable project information and directory layout
//! - Record: persisted step completion records
//! - Events: journal entries

pub mod action;
pub mod events;
pub mod part;
pub mod project;
pub mod record;
pub mod step;

// Re-export commonly used types
pub use action::{Action, ActionKind};
pub use events::{EventType, JournalEvent};
pub use part::{Part, PartSpec};
pub use project::{PartDirs, ProjectDirs, ProjectInfo, ProjectOptions};
pub use record::{StepContents, StepRecord};
pub use step::{ParseStepError, Step};
