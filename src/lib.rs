//! partline - a parts lifecycle engine
//!
//! Builds a filesystem tree from a declarative set of named parts. Every
//! part goes through the same pipeline of steps: its sources are pulled,
//! built, staged into a tree shared by all parts, and finally primed into
//! the output tree.
//!
//! # Architecture
//!
//! Work is planned from durable state:
//! - Each completed step leaves a record with a fingerprint of its inputs
//! - Planning compares current fingerprints against those records
//! - Only steps whose inputs changed (or were invalidated) run again
//!
//! # Modules
//!
//! - `core`: Part graph, state store, sequencer, executor, lifecycle manager
//! - `domain`: Data structures (Step, Action, StepRecord, ProjectInfo)
//! - `plugins`: Build plugins and part schema validation
//! - `packages`: Package repository collaborator
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Show what needs to happen to prime every part
//! partline plan prime
//!
//! # Build and stage a single part (and what it depends on)
//! partline run stage hello
//!
//! # Throw away everything from the stage step on
//! partline clean --step stage
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod errors;
pub mod packages;
pub mod plugins;

// Re-export main types at crate root for convenience
pub use crate::core::{ExecutionContext, LifecycleManager, LifecycleOptions};
pub use domain::{Action, ActionKind, Step, StepRecord};
pub use errors::{PartSpecificationError, PartsError, Result, StateWarning};
pub use packages::{HostRepository, PackageRepository};
