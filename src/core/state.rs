//! Durable per-part, per-step state.
//!
//! Every completed step leaves a JSON record under the part's state
//! directory. Records are written atomically and reloaded at the start of
//! each session; an unreadable record is treated as "never run".

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::migration::{clean_shared_area, remove_path};
use crate::domain::{ProjectDirs, Step, StepContents, StepRecord};
use crate::errors::{PartsError, Result, StateWarning};

/// In-memory view of every step record of a project
#[derive(Debug)]
pub struct StateStore {
    dirs: ProjectDirs,
    part_names: Vec<String>,
    records: BTreeMap<(String, Step), StepRecord>,
}

impl StateStore {
    /// Load the records of the given parts
    ///
    /// Corrupt records are skipped and reported as warnings.
    pub async fn load(dirs: ProjectDirs, part_names: Vec<String>) -> (Self, Vec<StateWarning>) {
        let mut store = Self {
            dirs,
            part_names,
            records: BTreeMap::new(),
        };
        let warnings = store.read_all().await;
        (store, warnings)
    }

    async fn read_all(&mut self) -> Vec<StateWarning> {
        let mut warnings = Vec::new();

        for part_name in &self.part_names {
            for step in Step::ALL {
                let path = self.state_file(part_name, step);
                match read_record(&path, part_name, step).await {
                    Ok(Some(record)) => {
                        self.records.insert((part_name.clone(), step), record);
                    }
                    Ok(None) => {}
                    Err(message) => {
                        let warning = StateWarning {
                            part_name: part_name.clone(),
                            step,
                            path,
                            message,
                        };
                        warn!("{}", warning);
                        warnings.push(warning);
                    }
                }
            }
        }

        debug!(records = self.records.len(), "Loaded step state");
        warnings
    }

    /// Discard in-memory records and read them again
    pub async fn reload(&mut self) -> Vec<StateWarning> {
        self.records.clear();
        self.read_all().await
    }

    pub fn dirs(&self) -> &ProjectDirs {
        &self.dirs
    }

    /// Path of the record of a step
    pub fn state_file(&self, part_name: &str, step: Step) -> PathBuf {
        self.dirs.part_dirs(part_name).state.join(format!("{}.json", step))
    }

    pub fn get(&self, part_name: &str, step: Step) -> Option<&StepRecord> {
        self.records.get(&(part_name.to_string(), step))
    }

    /// Whether a step completed and is not outdated
    pub fn has_run(&self, part_name: &str, step: Step) -> bool {
        self.get(part_name, step).is_some_and(|r| !r.outdated)
    }

    /// Records of a step across all parts
    pub fn records_for_step(&self, step: Step) -> impl Iterator<Item = &StepRecord> {
        self.records.values().filter(move |r| r.step == step)
    }

    /// All records, ordered by part name then step
    pub fn records(&self) -> impl Iterator<Item = &StepRecord> {
        self.records.values()
    }

    /// Persist a completed step
    pub async fn record_success(&mut self, mut record: StepRecord) -> Result<()> {
        record.outdated = false;
        self.write(&record).await?;
        self.records
            .insert((record.part_name.clone(), record.step), record);
        Ok(())
    }

    /// Flag an existing record as outdated
    ///
    /// Returns whether a record was changed.
    pub async fn mark_outdated(&mut self, part_name: &str, step: Step) -> Result<bool> {
        let key = (part_name.to_string(), step);
        let Some(record) = self.records.get(&key) else {
            return Ok(false);
        };
        if record.outdated {
            return Ok(false);
        }

        let mut updated = record.clone();
        updated.outdated = true;
        self.write(&updated).await?;
        self.records.insert(key, updated);

        debug!(part = part_name, %step, "Marked step outdated");
        Ok(true)
    }

    /// Remove a step's record and the artifacts it produced
    pub async fn erase(&mut self, part_name: &str, step: Step) -> Result<()> {
        let part_dirs = self.dirs.part_dirs(part_name);

        match step {
            Step::Pull => remove_dir(&part_dirs.src).await?,
            Step::Build => {
                remove_dir(&part_dirs.build).await?;
                remove_dir(&part_dirs.install).await?;
            }
            Step::Stage | Step::Prime => self.remove_contribution(part_name, step).await?,
        }

        let path = self.state_file(part_name, step);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(PartsError::state(path, e)),
        }

        self.records.remove(&(part_name.to_string(), step));
        Ok(())
    }

    /// Files and directories only this part contributed to a shared tree
    pub fn exclusive_contents(&self, part_name: &str, step: Step) -> StepContents {
        let Some(record) = self.get(part_name, step) else {
            return StepContents::default();
        };

        let mut contents = record.contents.clone();
        for other in self.records_for_step(step).filter(|r| r.part_name != part_name) {
            contents.files.retain(|f| !other.contents.files.contains(f));
            contents.directories.retain(|d| !other.contents.directories.contains(d));
        }
        contents
    }

    /// Remove this part's files from a shared tree, keeping the record
    pub async fn remove_contribution(&self, part_name: &str, step: Step) -> Result<()> {
        let Some(root) = self.dirs.shared_dir(step).map(Path::to_path_buf) else {
            return Ok(());
        };

        let contents = self.exclusive_contents(part_name, step);
        if contents.is_empty() {
            return Ok(());
        }

        let target = root.clone();
        tokio::task::spawn_blocking(move || clean_shared_area(&target, &contents))
            .await
            .map_err(|e| PartsError::state(&root, io::Error::new(io::ErrorKind::Other, e)))?
            .map_err(|e| PartsError::state(&root, e))
    }

    /// Drop a record without touching artifacts
    ///
    /// Synchronous so it can run from `Drop`.
    pub fn forget(&mut self, part_name: &str, step: Step) {
        self.records.remove(&(part_name.to_string(), step));

        let path = self.state_file(part_name, step);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "Failed to remove state file");
            }
        }
    }

    async fn write(&self, record: &StepRecord) -> Result<()> {
        let path = self.state_file(&record.part_name, record.step);
        let state_dir = self.dirs.part_dirs(&record.part_name).state;

        fs::create_dir_all(&state_dir)
            .await
            .map_err(|e| PartsError::state(&state_dir, e))?;

        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, json)
            .await
            .map_err(|e| PartsError::state(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| PartsError::state(&path, e))?;

        Ok(())
    }
}

async fn read_record(path: &Path, part_name: &str, step: Step) -> std::result::Result<Option<StepRecord>, String> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };

    let record: StepRecord = serde_json::from_str(&content).map_err(|e| e.to_string())?;

    if record.part_name != part_name || record.step != step {
        return Err(format!(
            "record belongs to {}:{}",
            record.part_name, record.step
        ));
    }

    Ok(Some(record))
}

async fn remove_dir(path: &Path) -> Result<()> {
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || remove_path(&target))
        .await
        .map_err(|e| PartsError::state(path, io::Error::new(io::ErrorKind::Other, e)))?
        .map_err(|e| PartsError::state(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn empty_store(temp: &TempDir) -> StateStore {
        let (store, warnings) =
            StateStore::load(ProjectDirs::new(temp.path()), vec!["foo".to_string(), "bar".to_string()]).await;
        assert!(warnings.is_empty());
        store
    }

    #[tokio::test]
    async fn test_record_survives_reload() {
        let temp = TempDir::new().unwrap();
        let mut store = empty_store(&temp).await;

        store
            .record_success(StepRecord::new("foo", Step::Pull, "abc"))
            .await
            .unwrap();
        assert!(store.state_file("foo", Step::Pull).exists());

        let warnings = store.reload().await;
        assert!(warnings.is_empty());
        assert_eq!(store.get("foo", Step::Pull).unwrap().fingerprint, "abc");
        assert!(store.has_run("foo", Step::Pull));
        assert!(!store.has_run("foo", Step::Build));
    }

    #[tokio::test]
    async fn test_mark_outdated_persists() {
        let temp = TempDir::new().unwrap();
        let mut store = empty_store(&temp).await;

        assert!(!store.mark_outdated("foo", Step::Build).await.unwrap());

        store
            .record_success(StepRecord::new("foo", Step::Build, "abc"))
            .await
            .unwrap();
        assert!(store.mark_outdated("foo", Step::Build).await.unwrap());
        assert!(!store.mark_outdated("foo", Step::Build).await.unwrap());

        store.reload().await;
        assert!(store.get("foo", Step::Build).unwrap().outdated);
        assert!(!store.has_run("foo", Step::Build));
    }

    #[tokio::test]
    async fn test_corrupt_record_becomes_warning() {
        let temp = TempDir::new().unwrap();
        let state_dir = temp.path().join("parts/foo/state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(state_dir.join("build.json"), "{ not json").unwrap();

        let (store, warnings) = StateStore::load(ProjectDirs::new(temp.path()), vec!["foo".to_string()]).await;

        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].step, Step::Build);
        assert!(store.get("foo", Step::Build).is_none());
    }

    #[tokio::test]
    async fn test_erase_keeps_files_claimed_by_other_parts() {
        let temp = TempDir::new().unwrap();
        let mut store = empty_store(&temp).await;
        let stage = temp.path().join("stage");
        std::fs::create_dir_all(stage.join("bin")).unwrap();
        std::fs::write(stage.join("bin/foo"), "").unwrap();
        std::fs::write(stage.join("bin/shared"), "").unwrap();

        let mut foo = StepContents::default();
        foo.files.extend(["bin/foo".to_string(), "bin/shared".to_string()]);
        foo.directories.insert("bin".to_string());
        let mut bar = StepContents::default();
        bar.files.insert("bin/shared".to_string());
        bar.directories.insert("bin".to_string());

        store
            .record_success(StepRecord::new("foo", Step::Stage, "a").with_contents(foo))
            .await
            .unwrap();
        store
            .record_success(StepRecord::new("bar", Step::Stage, "b").with_contents(bar))
            .await
            .unwrap();

        store.erase("foo", Step::Stage).await.unwrap();

        assert!(!stage.join("bin/foo").exists());
        assert!(stage.join("bin/shared").exists());
        assert!(store.get("foo", Step::Stage).is_none());
        assert!(!store.state_file("foo", Step::Stage).exists());
    }

    #[tokio::test]
    async fn test_erase_build_removes_install() {
        let temp = TempDir::new().unwrap();
        let mut store = empty_store(&temp).await;
        let install = temp.path().join("parts/foo/install");
        std::fs::create_dir_all(&install).unwrap();

        store.erase("foo", Step::Build).await.unwrap();
        assert!(!install.exists());
    }

    #[tokio::test]
    async fn test_forget_removes_state_file() {
        let temp = TempDir::new().unwrap();
        let mut store = empty_store(&temp).await;
        store
            .record_success(StepRecord::new("bar", Step::Pull, "x"))
            .await
            .unwrap();

        store.forget("bar", Step::Pull);
        assert!(store.get("bar", Step::Pull).is_none());
        assert!(!store.state_file("bar", Step::Pull).exists());
    }
}
