//! Shell command execution for build steps.
//!
//! Commands run through `sh -c` inside the part's build directory with the
//! step environment exported. Output is captured and logged; a non-zero
//! exit status fails the step with the command's stderr.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::debug;

/// Runs plugin commands through a shell
#[derive(Debug, Clone)]
pub struct CommandRunner {
    /// Shell used to interpret commands (default: "sh")
    shell: String,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    /// Create a runner using a custom shell binary
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Run commands in order, stopping at the first failure
    pub async fn run_all(
        &self,
        commands: &[String],
        work_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        for command in commands {
            self.run(command, work_dir, env).await?;
        }
        Ok(())
    }

    /// Run a single shell command
    pub async fn run(
        &self,
        command: &str,
        work_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<String> {
        debug!(command, work_dir = %work_dir.display(), "Running command");

        let output = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .current_dir(work_dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to spawn {} for command '{}'", self.shell, command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "Command '{}' failed with exit code {}: {}",
                command,
                exit_code,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !stdout.trim().is_empty() {
            debug!(command, output = %stdout.trim_end(), "Command output");
        }

        Ok(stdout)
    }
}
