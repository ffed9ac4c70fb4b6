//! Append-only lifecycle journal.
//!
//! Events are stored as newline-delimited JSON (JSONL) next to the part
//! directories. Appends take an exclusive file lock so concurrent readers
//! never observe a torn line.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs2::FileExt;
use uuid::Uuid;

use crate::domain::{EventType, JournalEvent};

/// File-based journal using JSONL format
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event to the journal
    pub fn append(&self, event: &JournalEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create journal directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        file.lock_exclusive()
            .context("Failed to acquire journal lock")?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        writeln!(file, "{}", json).context("Failed to write event")?;
        file.flush().context("Failed to flush event")?;

        // Lock is released when file is dropped
        Ok(())
    }

    /// Replay all events in order
    pub fn replay(&self) -> Result<Vec<JournalEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("Failed to read journal")?;
            if line.trim().is_empty() {
                continue;
            }
            let event: JournalEvent = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Find events matching a predicate
    pub fn find_events<F>(&self, predicate: F) -> Result<Vec<JournalEvent>>
    where
        F: Fn(&JournalEvent) -> bool,
    {
        Ok(self.replay()?.into_iter().filter(predicate).collect())
    }

    /// Events of a single execution session
    pub fn session(&self, session_id: Uuid) -> Result<Vec<JournalEvent>> {
        self.find_events(|e| e.session_id == Some(session_id))
    }

    /// The most recent event of a type
    pub fn last_event_of_type(&self, event_type: EventType) -> Result<Option<JournalEvent>> {
        Ok(self.replay()?.into_iter().rev().find(|e| e.event_type == event_type))
    }
}
