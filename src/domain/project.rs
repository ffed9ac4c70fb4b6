//! Project-wide information and directory layout.
//!
//! `ProjectInfo` is built once per lifecycle manager and never mutated
//! afterwards; it is shared with the sequencer and executor through an
//! `Arc`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::errors::{PartsError, Result};

/// Architectures a project can target
pub const SUPPORTED_ARCHITECTURES: &[&str] = &[
    "amd64", "arm64", "armhf", "i386", "ppc64el", "riscv64", "s390x",
];

static APPLICATION_NAME: OnceLock<Regex> = OnceLock::new();

/// Check an application name against `^[A-Za-z][0-9A-Za-z_]*$`
pub fn validate_application_name(name: &str) -> Result<()> {
    let pattern = APPLICATION_NAME.get_or_init(|| {
        Regex::new(r"^[A-Za-z][0-9A-Za-z_]*$").expect("application name pattern is valid")
    });

    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(PartsError::InvalidApplicationName {
            name: name.to_string(),
        })
    }
}

/// Map the host architecture to its package architecture name
pub fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "armhf",
        "x86" => "i386",
        "powerpc64" => "ppc64el",
        "riscv64" => "riscv64",
        "s390x" => "s390x",
        other => other,
    }
}

/// Top-level work directories of a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDirs {
    work_dir: PathBuf,
    parts_dir: PathBuf,
    stage_dir: PathBuf,
    prime_dir: PathBuf,
}

impl ProjectDirs {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            parts_dir: work_dir.join("parts"),
            stage_dir: work_dir.join("stage"),
            prime_dir: work_dir.join("prime"),
            work_dir,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn parts_dir(&self) -> &Path {
        &self.parts_dir
    }

    pub fn stage_dir(&self) -> &Path {
        &self.stage_dir
    }

    pub fn prime_dir(&self) -> &Path {
        &self.prime_dir
    }

    /// Shared tree written by a step, if any
    pub fn shared_dir(&self, step: super::Step) -> Option<&Path> {
        match step {
            super::Step::Stage => Some(&self.stage_dir),
            super::Step::Prime => Some(&self.prime_dir),
            _ => None,
        }
    }

    /// Directories belonging to a single part
    pub fn part_dirs(&self, part_name: &str) -> PartDirs {
        let part_dir = self.parts_dir.join(part_name);
        PartDirs {
            src: part_dir.join("src"),
            build: part_dir.join("build"),
            install: part_dir.join("install"),
            state: part_dir.join("state"),
            stage: self.stage_dir.clone(),
            prime: self.prime_dir.clone(),
            part: part_dir,
        }
    }

    /// Path of the lifecycle journal
    pub fn journal_path(&self) -> PathBuf {
        self.parts_dir.join("journal.jsonl")
    }

    /// Path of the work directory lock file
    ///
    /// Kept next to `parts/` so a full clean cannot remove it while held.
    pub fn lock_path(&self) -> PathBuf {
        self.work_dir.join(".parts.lock")
    }
}

/// Working directories of a part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartDirs {
    pub part: PathBuf,
    pub src: PathBuf,
    pub build: PathBuf,
    pub install: PathBuf,
    pub state: PathBuf,
    pub stage: PathBuf,
    pub prime: PathBuf,
}

/// Immutable project configuration snapshot
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    application_name: String,
    target_arch: String,
    base: String,
    cache_dir: PathBuf,
    parallel_build_count: usize,
    custom_args: BTreeMap<String, String>,
    dirs: ProjectDirs,
}

impl ProjectInfo {
    pub fn new(
        application_name: impl Into<String>,
        target_arch: impl Into<String>,
        base: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        parallel_build_count: usize,
        custom_args: BTreeMap<String, String>,
        dirs: ProjectDirs,
    ) -> Result<Self> {
        let application_name = application_name.into();
        validate_application_name(&application_name)?;

        let target_arch = target_arch.into();
        if !SUPPORTED_ARCHITECTURES.contains(&target_arch.as_str()) {
            return Err(PartsError::InvalidArchitecture { arch: target_arch });
        }

        Ok(Self {
            application_name,
            target_arch,
            base: base.into(),
            cache_dir: cache_dir.into(),
            parallel_build_count: parallel_build_count.max(1),
            custom_args,
            dirs,
        })
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn target_arch(&self) -> &str {
        &self.target_arch
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn parallel_build_count(&self) -> usize {
        self.parallel_build_count
    }

    pub fn dirs(&self) -> &ProjectDirs {
        &self.dirs
    }

    /// Prefix for environment variables exported to build commands
    pub fn env_prefix(&self) -> String {
        self.application_name.to_ascii_uppercase()
    }

    /// Options that affect the pull step
    pub fn pull_options(&self) -> ProjectOptions<'_> {
        ProjectOptions {
            target_arch: &self.target_arch,
            base: None,
            parallel_build_count: None,
            custom_args: None,
        }
    }

    /// Options that affect the build step
    pub fn build_options(&self) -> ProjectOptions<'_> {
        ProjectOptions {
            target_arch: &self.target_arch,
            base: Some(&self.base),
            parallel_build_count: Some(self.parallel_build_count),
            custom_args: Some(&self.custom_args),
        }
    }
}

/// Project settings that feed into a step fingerprint
#[derive(Debug, Clone, Serialize)]
pub struct ProjectOptions<'a> {
    pub target_arch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_build_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_args: Option<&'a BTreeMap<String, String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_name_validation() {
        assert!(validate_application_name("test_demo").is_ok());
        assert!(validate_application_name("A1").is_ok());
        assert!(validate_application_name("1bad").is_err());
        assert!(validate_application_name("_bad").is_err());
        assert!(validate_application_name("bad-name").is_err());
        assert!(validate_application_name("").is_err());
    }

    #[test]
    fn test_part_dirs_layout() {
        let dirs = ProjectDirs::new("/work");
        let part = dirs.part_dirs("foo");

        assert_eq!(part.src, PathBuf::from("/work/parts/foo/src"));
        assert_eq!(part.install, PathBuf::from("/work/parts/foo/install"));
        assert_eq!(part.state, PathBuf::from("/work/parts/foo/state"));
        assert_eq!(part.stage, PathBuf::from("/work/stage"));
        assert_eq!(part.prime, PathBuf::from("/work/prime"));
    }

    #[test]
    fn test_project_info_rejects_unknown_arch() {
        let result = ProjectInfo::new(
            "demo",
            "vax",
            "",
            "/tmp/cache",
            1,
            BTreeMap::new(),
            ProjectDirs::new("."),
        );
        assert!(matches!(result, Err(PartsError::InvalidArchitecture { .. })));
    }

    #[test]
    fn test_env_prefix() {
        let info = ProjectInfo::new(
            "test_demo",
            "amd64",
            "",
            "/tmp/cache",
            0,
            BTreeMap::new(),
            ProjectDirs::new("."),
        )
        .unwrap();
        assert_eq!(info.env_prefix(), "TEST_DEMO");
        assert_eq!(info.parallel_build_count(), 1);
    }
}
