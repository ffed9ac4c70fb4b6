//! Core lifecycle engine.
//!
//! This module contains:
//! - PartGraph: part construction and dependency ordering
//! - StateStore: durable step records
//! - Sequencer: action planning
//! - Executor / ExecutionContext: action execution and rollback
//! - LifecycleManager: the entry point tying them together

pub mod context;
pub mod executor;
pub mod fingerprint;
pub mod graph;
pub mod handler;
pub mod journal;
pub mod lifecycle;
pub mod lock;
pub mod migration;
pub mod sequencer;
pub mod sources;
pub mod state;

// Re-export commonly used types
pub use context::ExecutionContext;
pub use executor::Executor;
pub use fingerprint::{Fingerprint, Fingerprinter};
pub use graph::{build_part, PartGraph};
pub use journal::Journal;
pub use lifecycle::{LifecycleManager, LifecycleOptions};
pub use lock::WorkDirLock;
pub use migration::Fileset;
pub use sequencer::{Plan, Sequencer};
pub use state::StateStore;
