//! Step handlers.
//!
//! A `PartHandler` carries out one step of one part: it knows the part's
//! directories, its plugin and the project settings, and reports what the
//! step contributed to a shared tree. It never touches step records.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use super::migration::{
    clean_shared_area, collect_tree, copy_tree, find_conflict, migrate_files, organize_files, remove_path, Fileset,
};
use super::sources;
use crate::domain::{Part, ProjectInfo, Step, StepContents};
use crate::plugins::{get_plugin, CommandRunner};

/// What other parts contributed to a shared tree, by part name
pub type Claims = Vec<(String, StepContents)>;

pub struct PartHandler<'a> {
    part: &'a Part,
    info: &'a ProjectInfo,
    runner: &'a CommandRunner,
}

impl<'a> PartHandler<'a> {
    pub fn new(part: &'a Part, info: &'a ProjectInfo, runner: &'a CommandRunner) -> Self {
        Self { part, info, runner }
    }

    pub async fn pull(&self) -> Result<()> {
        let Some(scriptlet) = self.part.spec.scriptlet(Step::Pull) else {
            return sources::pull(self.part, self.info.dirs()).await;
        };

        let src = self.part.dirs.src.clone();
        run_blocking(move || {
            remove_path(&src)?;
            std::fs::create_dir_all(&src)
        })
        .await
        .context("Failed to prepare source directory")?;

        self.run_scriptlet(Step::Pull, scriptlet, &self.part.dirs.src).await
    }

    pub async fn build(&self) -> Result<()> {
        let dirs = &self.part.dirs;
        let src = dirs.src.clone();
        let build = dirs.build.clone();
        let install = dirs.install.clone();

        run_blocking(move || {
            remove_path(&build)?;
            remove_path(&install)?;
            std::fs::create_dir_all(&install)?;
            copy_tree(&src, &build, &[])?;
            Ok(())
        })
        .await
        .context("Failed to prepare build directories")?;

        match self.part.spec.scriptlet(Step::Build) {
            Some(scriptlet) => self.run_scriptlet(Step::Build, scriptlet, &dirs.build).await?,
            None => self.run_plugin().await?,
        }

        self.organize().await
    }

    async fn run_plugin(&self) -> Result<()> {
        let plugin = get_plugin(self.part, self.info);
        let commands = plugin.build_commands();
        if commands.is_empty() {
            debug!(part = %self.part.name, plugin = plugin.name(), "Plugin has no build commands");
            return Ok(());
        }

        let work_dir = match &self.part.spec.source_subdir {
            Some(subdir) => self.part.dirs.build.join(subdir),
            None => self.part.dirs.build.clone(),
        };
        let mut env = plugin.build_environment();
        env.extend(self.step_environment());

        info!(part = %self.part.name, commands = commands.len(), "Running build commands");
        self.runner.run_all(&commands, &work_dir, &env).await
    }

    async fn run_scriptlet(&self, step: Step, scriptlet: &str, work_dir: &Path) -> Result<()> {
        info!(part = %self.part.name, %step, "Running override-{} scriptlet", step);
        self.runner
            .run(scriptlet, work_dir, &self.step_environment())
            .await
            .with_context(|| format!("override-{} scriptlet failed", step))?;
        Ok(())
    }

    async fn organize(&self) -> Result<()> {
        if self.part.spec.organize.is_empty() {
            return Ok(());
        }

        let install = self.part.dirs.install.clone();
        let mapping = self.part.spec.organize.clone();
        run_blocking(move || organize_files(&install, &mapping))
            .await
            .context("Failed to organize installed files")
    }

    /// Variables exported to every build command
    pub fn step_environment(&self) -> BTreeMap<String, String> {
        let prefix = self.info.env_prefix();
        let dirs = &self.part.dirs;
        let path = |p: &Path| p.display().to_string();

        [
            ("PART_NAME", self.part.name.clone()),
            ("PART_SRC", path(&dirs.src)),
            ("PART_BUILD", path(&dirs.build)),
            ("PART_INSTALL", path(&dirs.install)),
            ("STAGE", path(&dirs.stage)),
            ("PRIME", path(&dirs.prime)),
            ("TARGET_ARCH", self.info.target_arch().to_string()),
            ("PARALLEL_BUILD_COUNT", self.info.parallel_build_count().to_string()),
        ]
        .into_iter()
        .map(|(name, value)| (format!("{}_{}", prefix, name), value))
        .collect()
    }

    /// Migrate installed files into the stage tree
    ///
    /// `claims` holds what other parts already staged. An override scriptlet
    /// replaces the migration and contributes nothing.
    pub async fn stage(&self, claims: Claims) -> Result<StepContents> {
        if let Some(scriptlet) = self.part.spec.scriptlet(Step::Stage) {
            self.run_in_shared_dir(Step::Stage, scriptlet, &self.part.dirs.stage).await?;
            return Ok(StepContents::default());
        }

        let fileset = fileset(&self.part.spec.stage)?;
        let install = self.part.dirs.install.clone();

        let listing = {
            let install = install.clone();
            run_blocking(move || collect_tree(&install)).await?
        };
        let contents = fileset.apply(&listing);

        self.migrate(contents, install, self.part.dirs.stage.clone(), claims).await
    }

    /// Migrate this part's staged files into the prime tree
    pub async fn prime(&self, staged: &StepContents, claims: Claims) -> Result<StepContents> {
        if let Some(scriptlet) = self.part.spec.scriptlet(Step::Prime) {
            self.run_in_shared_dir(Step::Prime, scriptlet, &self.part.dirs.prime).await?;
            return Ok(StepContents::default());
        }

        let fileset = fileset(&self.part.spec.prime)?;
        let contents = fileset.apply(staged);

        self.migrate(contents, self.part.dirs.stage.clone(), self.part.dirs.prime.clone(), claims)
            .await
    }

    async fn run_in_shared_dir(&self, step: Step, scriptlet: &str, dir: &Path) -> Result<()> {
        let target = dir.to_path_buf();
        run_blocking(move || std::fs::create_dir_all(&target))
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        self.run_scriptlet(step, scriptlet, dir).await
    }

    async fn migrate(&self, contents: StepContents, from: PathBuf, to: PathBuf, claims: Claims) -> Result<StepContents> {
        debug!(
            part = %self.part.name,
            files = contents.files.len(),
            to = %to.display(),
            "Migrating files"
        );

        let part_name = self.part.name.clone();
        let migrated = contents.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            if let Some(conflict) = find_conflict(&contents, &from, &to, &claims)? {
                return Err(conflict.into());
            }

            let mut created = StepContents::default();
            if let Err(e) = migrate_files(&contents, &from, &to, &mut created) {
                // Only what this migration added is unclaimed
                for (_, theirs) in &claims {
                    created.files.retain(|f| !theirs.files.contains(f));
                    created.directories.retain(|d| !theirs.directories.contains(d));
                }
                if let Err(cleanup) = clean_shared_area(&to, &created) {
                    warn!(part = %part_name, error = %cleanup, "Failed to remove partially migrated files");
                }
                return Err(anyhow::Error::from(e).context(format!("Failed to migrate files of part {:?}", part_name)));
            }
            Ok(())
        })
        .await
        .context("Migration task panicked")??;

        Ok(migrated)
    }
}

fn fileset(entries: &[String]) -> Result<Fileset> {
    Fileset::new(entries).context("Invalid fileset pattern")
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}
