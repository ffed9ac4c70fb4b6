//! Persisted step records.
//!
//! A record exists for a (part, step) pair once that step completed
//! successfully. It keeps the fingerprint of the inputs that produced the
//! result so later runs can tell whether the result is still valid.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::Step;

/// Files and directories a step contributed to a tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContents {
    #[serde(default)]
    pub files: BTreeSet<String>,

    #[serde(default)]
    pub directories: BTreeSet<String>,
}

impl StepContents {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.directories.is_empty()
    }
}

/// Completion record of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub part_name: String,

    pub step: Step,

    /// Digest of every input that determined this step's result
    pub fingerprint: String,

    /// Per-component digests, used to explain reruns
    #[serde(default)]
    pub components: BTreeMap<String, String>,

    /// Digest of the file filters applied by stage/prime
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_digest: Option<String>,

    /// Set by cascading invalidation; forces a rerun
    #[serde(default)]
    pub outdated: bool,

    pub completed_at: DateTime<Utc>,

    /// What this part contributed to the shared tree (stage/prime only)
    #[serde(flatten)]
    pub contents: StepContents,
}

impl StepRecord {
    pub fn new(part_name: impl Into<String>, step: Step, fingerprint: impl Into<String>) -> Self {
        Self {
            part_name: part_name.into(),
            step,
            fingerprint: fingerprint.into(),
            components: BTreeMap::new(),
            filter_digest: None,
            outdated: false,
            completed_at: Utc::now(),
            contents: StepContents::default(),
        }
    }

    pub fn with_components(mut self, components: BTreeMap<String, String>) -> Self {
        self.components = components;
        self
    }

    pub fn with_filter_digest(mut self, digest: Option<String>) -> Self {
        self.filter_digest = digest;
        self
    }

    pub fn with_contents(mut self, contents: StepContents) -> Self {
        self.contents = contents;
        self
    }
}
