//! Package repository integration.
//!
//! The lifecycle does not install packages itself. It only asks a
//! repository to refresh its package lists so later availability queries
//! are consistent for a whole batch; callers refresh before planning.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::{PartsError, Result};

/// Source of stage and build packages
#[async_trait]
pub trait PackageRepository: Send + Sync {
    /// Refresh the list of packages that can be staged for `target_arch`
    async fn refresh_stage_packages_list(&self, cache_dir: &Path, target_arch: &str) -> Result<()>;

    /// Refresh the host's list of build packages
    async fn refresh_build_packages_list(&self) -> Result<()>;
}

/// Repository backed by the host package manager
#[derive(Debug, Clone)]
pub struct HostRepository {
    /// Command refreshing the host package lists
    update_command: Vec<String>,
}

impl Default for HostRepository {
    fn default() -> Self {
        Self::new(vec!["apt-get".to_string(), "update".to_string()])
    }
}

impl HostRepository {
    pub fn new(update_command: Vec<String>) -> Self {
        Self { update_command }
    }

    pub fn update_command(&self) -> &[String] {
        &self.update_command
    }
}

#[async_trait]
impl PackageRepository for HostRepository {
    /// Placeholder at the repository boundary: no package index is
    /// downloaded. Only a timestamp marker is written under
    /// `<cache>/stage-packages/<arch>/refreshed` so callers can see when the
    /// last refresh was requested.
    async fn refresh_stage_packages_list(&self, cache_dir: &Path, target_arch: &str) -> Result<()> {
        let arch_dir = cache_dir.join("stage-packages").join(target_arch);
        tokio::fs::create_dir_all(&arch_dir)
            .await
            .map_err(|e| PartsError::PackageListRefresh(format!("cannot create {}: {}", arch_dir.display(), e)))?;

        let marker = arch_dir.join("refreshed");
        tokio::fs::write(&marker, chrono::Utc::now().to_rfc3339())
            .await
            .map_err(|e| PartsError::PackageListRefresh(format!("cannot write {}: {}", marker.display(), e)))?;

        debug!(cache = %arch_dir.display(), "Refreshed stage package list");
        Ok(())
    }

    async fn refresh_build_packages_list(&self) -> Result<()> {
        let Some((program, args)) = self.update_command.split_first() else {
            return Ok(());
        };

        info!(command = %self.update_command.join(" "), "Refreshing build package list");

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| PartsError::PackageListRefresh(format!("cannot run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PartsError::PackageListRefresh(format!(
                "{} exited with {}: {}",
                self.update_command.join(" "),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(())
    }
}
