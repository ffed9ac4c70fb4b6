//! Lifecycle manager.
//!
//! The `LifecycleManager` is the entry point of the crate. It validates a
//! project's parts once, owns the part graph and the state store for the
//! rest of its life and exposes planning, execution and cleaning.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_yaml::Value;
use tracing::{info, instrument};

use super::context::ExecutionContext;
use super::executor::Executor;
use super::graph::{build_part, PartGraph};
use super::journal::Journal;
use super::lock::WorkDirLock;
use super::sequencer::{Plan, Sequencer};
use super::state::StateStore;
use crate::domain::project::{host_arch, validate_application_name};
use crate::domain::{Action, EventType, JournalEvent, Part, ProjectDirs, ProjectInfo, Step, StepRecord};
use crate::errors::{PartsError, Result, StateWarning};
use crate::packages::{HostRepository, PackageRepository};
use crate::plugins::CommandRunner;

/// Project settings used to construct a `LifecycleManager`
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    pub application_name: String,
    pub work_dir: PathBuf,
    pub cache_dir: PathBuf,
    /// Target architecture (host architecture when unset)
    pub arch: Option<String>,
    pub base: String,
    pub parallel_build_count: usize,
    /// Passthrough arguments for plugins
    pub custom_args: BTreeMap<String, String>,
}

impl LifecycleOptions {
    pub fn new(application_name: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            application_name: application_name.into(),
            work_dir: PathBuf::from("."),
            cache_dir: cache_dir.into(),
            arch: None,
            base: String::new(),
            parallel_build_count: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            custom_args: BTreeMap::new(),
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    pub fn with_parallel_build_count(mut self, count: usize) -> Self {
        self.parallel_build_count = count;
        self
    }

    pub fn with_custom_args(mut self, custom_args: BTreeMap<String, String>) -> Self {
        self.custom_args = custom_args;
        self
    }
}

/// Owns the parts of a project and drives their lifecycle
pub struct LifecycleManager {
    graph: Arc<PartGraph>,
    info: Arc<ProjectInfo>,
    store: StateStore,
    executor: Executor,
    repository: Box<dyn PackageRepository>,
    state_warnings: Vec<StateWarning>,
}

impl LifecycleManager {
    /// Validate a project's parts and load their state
    ///
    /// `all_parts` is the project document holding a `parts` mapping. Every
    /// validation happens before anything is written to disk.
    pub async fn new(all_parts: &Value, options: LifecycleOptions) -> Result<Self> {
        validate_application_name(&options.application_name)?;

        let project = all_parts
            .as_mapping()
            .ok_or_else(|| PartsError::MalformedProject("expected a mapping at the top level".to_string()))?;
        let parts_value = project.get("parts").ok_or(PartsError::MissingParts)?;
        let parts_map = parts_value
            .as_mapping()
            .ok_or_else(|| PartsError::MalformedProject("'parts' must be a mapping of part names".to_string()))?;

        let dirs = ProjectDirs::new(&options.work_dir);

        let mut parts = Vec::with_capacity(parts_map.len());
        for (name, raw) in parts_map {
            let name = name
                .as_str()
                .ok_or_else(|| PartsError::MalformedProject(format!("part name {:?} is not a string", name)))?;
            parts.push(build_part(name, raw, &dirs)?);
        }

        let graph = Arc::new(PartGraph::new(parts)?);

        let arch = options.arch.unwrap_or_else(|| host_arch().to_string());
        let info = Arc::new(ProjectInfo::new(
            options.application_name,
            arch,
            options.base,
            options.cache_dir,
            options.parallel_build_count,
            options.custom_args,
            dirs.clone(),
        )?);

        let (store, state_warnings) = StateStore::load(dirs, graph.part_names()).await;
        let executor = Executor::new(Arc::clone(&graph), Arc::clone(&info));

        info!(
            application = info.application_name(),
            parts = graph.len(),
            arch = info.target_arch(),
            "Lifecycle manager ready"
        );

        Ok(Self {
            graph,
            info,
            store,
            executor,
            repository: Box::new(HostRepository::default()),
            state_warnings,
        })
    }

    /// Use a different package repository
    pub fn with_repository(mut self, repository: Box<dyn PackageRepository>) -> Self {
        self.repository = repository;
        self
    }

    /// Use a different command runner for build commands
    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.executor = self.executor.with_runner(runner);
        self
    }

    /// Actions bringing the named parts (all when empty) to `target`
    ///
    /// Records invalidated by the plan are marked outdated right away.
    #[instrument(skip(self))]
    pub async fn plan(&mut self, target: Step, part_names: &[&str]) -> Result<Vec<Action>> {
        Ok(self.plan_detailed(target, part_names).await?.actions)
    }

    /// Like `plan`, also returning the records that were marked outdated
    pub async fn plan_detailed(&mut self, target: Step, part_names: &[&str]) -> Result<Plan> {
        let plan = Sequencer::new(&self.graph, &self.info, &self.store).plan(target, part_names)?;

        for (part_name, step) in &plan.outdated {
            if self.store.mark_outdated(part_name, *step).await? {
                self.executor.log_event(
                    JournalEvent::new(
                        EventType::StepMarkedOutdated,
                        format!("{}:{} marked outdated by plan", part_name, step),
                    )
                    .for_step(part_name, *step),
                );
            }
        }

        info!(
            target = %target,
            actions = plan.pending().count(),
            skipped = plan.actions.len() - plan.pending().count(),
            "Planned lifecycle"
        );

        Ok(plan)
    }

    /// Open an execution context for running planned actions
    pub fn action_executor(&mut self) -> Result<ExecutionContext<'_>> {
        ExecutionContext::begin(&self.executor, &mut self.store)
    }

    /// Remove step results from `step` on for the named parts (all when empty)
    ///
    /// Fails with `WorkDirLocked` while another process executes actions.
    #[instrument(skip(self))]
    pub async fn clean(&mut self, step: Step, part_names: &[&str]) -> Result<()> {
        self.graph.select(part_names)?;
        let _lock = WorkDirLock::acquire(self.info.dirs())?;
        self.executor.clean(&mut self.store, step, part_names).await
    }

    /// Re-read every step record from disk
    pub async fn reload_state(&mut self) -> &[StateWarning] {
        self.state_warnings = self.store.reload().await;
        &self.state_warnings
    }

    /// Refresh stage package lists, and build package lists when `system` is set
    pub async fn refresh_packages_list(&self, system: bool) -> Result<()> {
        self.repository
            .refresh_stage_packages_list(self.info.cache_dir(), self.info.target_arch())
            .await?;

        if system {
            self.repository.refresh_build_packages_list().await?;
        }

        Ok(())
    }

    pub fn project_info(&self) -> &ProjectInfo {
        &self.info
    }

    pub fn graph(&self) -> &PartGraph {
        &self.graph
    }

    /// Parts in declaration order
    pub fn parts(&self) -> &[Part] {
        self.graph.parts()
    }

    /// Warnings raised while loading state
    pub fn state_warnings(&self) -> &[StateWarning] {
        &self.state_warnings
    }

    pub fn step_record(&self, part_name: &str, step: Step) -> Option<&StepRecord> {
        self.store.get(part_name, step)
    }

    pub fn journal(&self) -> &Journal {
        self.executor.journal()
    }
}
