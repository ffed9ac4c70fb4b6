//! Action execution and cleaning.
//!
//! The executor turns planned actions into step handler calls and keeps
//! the state store in line with what actually happened on disk: a record
//! is only written once its step fully succeeded.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::fingerprint::Fingerprinter;
use super::graph::PartGraph;
use super::handler::{Claims, PartHandler};
use super::journal::Journal;
use super::migration::{remove_path, Conflict};
use super::state::StateStore;
use crate::domain::{Action, ActionKind, EventType, JournalEvent, Part, ProjectInfo, Step, StepContents, StepRecord};
use crate::errors::{CleanFailure, PartsError, Result};
use crate::plugins::CommandRunner;

pub struct Executor {
    graph: Arc<PartGraph>,
    info: Arc<ProjectInfo>,
    runner: CommandRunner,
    journal: Journal,
}

impl Executor {
    pub fn new(graph: Arc<PartGraph>, info: Arc<ProjectInfo>) -> Self {
        let journal = Journal::new(info.dirs().journal_path());
        Self {
            graph,
            info,
            runner: CommandRunner::new(),
            journal,
        }
    }

    /// Use a specific command runner for build commands
    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn info(&self) -> &ProjectInfo {
        &self.info
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Record an event, logging instead of failing
    pub(crate) fn log_event(&self, event: JournalEvent) {
        if let Err(e) = self.journal.append(&event) {
            warn!(error = %e, "Failed to write journal event");
        }
    }

    /// Execute one planned action
    #[instrument(skip(self, action, store), fields(part = %action.part_name, step = %action.step, kind = %action.kind))]
    pub async fn run(&self, action: &Action, store: &mut StateStore) -> Result<()> {
        if action.is_noop() {
            return Ok(());
        }

        let part = self.graph.part(&action.part_name)?;

        match action.kind {
            ActionKind::Run | ActionKind::Rerun => {
                self.check_prerequisites(part, action.step, store)?;
                if action.kind == ActionKind::Rerun {
                    store.erase(&part.name, action.step).await?;
                }
                self.run_step(part, action.step, store).await
            }
            ActionKind::Reapply => self.reapply(part, action.step, store).await,
            ActionKind::Skip => Ok(()),
        }
    }

    fn check_prerequisites(&self, part: &Part, step: Step, store: &StateStore) -> Result<()> {
        let missing = |missing: String| PartsError::MissingPrerequisite {
            part_name: part.name.clone(),
            step,
            missing,
        };

        if let Some(previous) = step.previous() {
            if !store.has_run(&part.name, previous) {
                return Err(missing(format!("{} step has not run", previous)));
            }
        }

        if step == Step::Build {
            for dep in self.graph.dependencies(&part.name) {
                if !store.has_run(&dep.name, Step::Stage) {
                    return Err(missing(format!("dependency {:?} is not staged", dep.name)));
                }
            }
        }

        Ok(())
    }

    async fn run_step(&self, part: &Part, step: Step, store: &mut StateStore) -> Result<()> {
        let handler = PartHandler::new(part, &self.info, &self.runner);
        let failed = |e: anyhow::Error| step_error(part, step, e);

        info!(part = %part.name, %step, "Running step");

        let contents = match step {
            Step::Pull => {
                handler.pull().await.map_err(failed)?;
                StepContents::default()
            }
            Step::Build => {
                handler.build().await.map_err(failed)?;
                StepContents::default()
            }
            Step::Stage | Step::Prime => self.migrate(&handler, part, step, store).await?,
        };

        self.record(part, step, contents, store).await
    }

    async fn migrate(&self, handler: &PartHandler<'_>, part: &Part, step: Step, store: &StateStore) -> Result<StepContents> {
        let claims: Claims = store
            .records_for_step(step)
            .filter(|r| r.part_name != part.name)
            .map(|r| (r.part_name.clone(), r.contents.clone()))
            .collect();

        let result = match step {
            Step::Stage => handler.stage(claims).await,
            _ => handler.prime(&staged_contents(part, store), claims).await,
        };
        result.map_err(|e| step_error(part, step, e))
    }

    async fn reapply(&self, part: &Part, step: Step, store: &mut StateStore) -> Result<()> {
        if store.get(&part.name, step).is_none() || !step.is_shared() {
            return Err(PartsError::MissingPrerequisite {
                part_name: part.name.clone(),
                step,
                missing: format!("{} step has not run", step),
            });
        }

        info!(part = %part.name, %step, "Reapplying file filters");

        store.remove_contribution(&part.name, step).await?;

        let handler = PartHandler::new(part, &self.info, &self.runner);
        let contents = self.migrate(&handler, part, step, store).await?;

        self.record(part, step, contents, store).await
    }

    async fn record(&self, part: &Part, step: Step, contents: StepContents, store: &mut StateStore) -> Result<()> {
        let fingerprints = Fingerprinter::new(&self.graph, &self.info);
        let fingerprint = fingerprints.compute(part, step)?;

        let record = StepRecord::new(&part.name, step, fingerprint.digest)
            .with_components(fingerprint.components)
            .with_filter_digest(fingerprints.filter_digest(part, step)?)
            .with_contents(contents);

        store.record_success(record).await
    }

    /// Remove step results from `initial_step` on, for the named parts
    /// (all parts when empty)
    #[instrument(skip(self, store))]
    pub async fn clean(&self, store: &mut StateStore, initial_step: Step, part_names: &[&str]) -> Result<()> {
        let parts = self.graph.select(part_names)?;
        let cleaned_steps: Vec<Step> = Step::ALL.iter().copied().filter(|s| *s >= initial_step).rev().collect();

        let mut failures = Vec::new();

        for part in &parts {
            for &step in &cleaned_steps {
                let existed = store.get(&part.name, step).is_some();
                match store.erase(&part.name, step).await {
                    Ok(()) if existed => {
                        self.log_event(
                            JournalEvent::new(EventType::StepCleaned, format!("cleaned {}:{}", part.name, step))
                                .for_step(&part.name, step),
                        );
                    }
                    Ok(()) => {}
                    Err(e) => failures.push(CleanFailure {
                        part_name: Some(part.name.clone()),
                        step: Some(step),
                        message: e.to_string(),
                    }),
                }
            }
        }

        if part_names.is_empty() {
            self.clean_work_dirs(initial_step, &mut failures);
        } else {
            self.mark_shared_outdated(store, &parts, &cleaned_steps, &mut failures)
                .await;
        }

        info!(parts = parts.len(), step = %initial_step, failures = failures.len(), "Cleaned parts");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PartsError::Clean { failures })
        }
    }

    /// Other parts' shared results no longer reflect the shared trees
    async fn mark_shared_outdated(
        &self,
        store: &mut StateStore,
        cleaned: &[&Part],
        cleaned_steps: &[Step],
        failures: &mut Vec<CleanFailure>,
    ) {
        let shared: Vec<Step> = cleaned_steps.iter().copied().filter(|s| s.is_shared()).collect();
        if shared.is_empty() {
            return;
        }

        let others = self
            .graph
            .parts()
            .iter()
            .filter(|p| !cleaned.iter().any(|c| c.name == p.name));

        for other in others {
            for &step in &shared {
                match store.mark_outdated(&other.name, step).await {
                    Ok(true) => self.log_event(
                        JournalEvent::new(
                            EventType::StepMarkedOutdated,
                            format!("{}:{} marked outdated by clean", other.name, step),
                        )
                        .for_step(&other.name, step),
                    ),
                    Ok(false) => {}
                    Err(e) => failures.push(CleanFailure {
                        part_name: Some(other.name.clone()),
                        step: Some(step),
                        message: e.to_string(),
                    }),
                }
            }
        }
    }

    fn clean_work_dirs(&self, initial_step: Step, failures: &mut Vec<CleanFailure>) {
        let dirs = self.info.dirs();
        let mut targets = vec![(Step::Prime, dirs.prime_dir())];

        if initial_step <= Step::Stage {
            targets.push((Step::Stage, dirs.stage_dir()));
        }
        if initial_step == Step::Pull {
            targets.push((Step::Pull, dirs.parts_dir()));
        }

        for (step, path) in targets {
            if let Err(e) = remove_path(path) {
                failures.push(CleanFailure {
                    part_name: None,
                    step: Some(step),
                    message: format!("failed to remove {}: {}", path.display(), e),
                });
            }
        }
    }
}

/// Map a handler failure, keeping shared-tree conflicts distinguishable
fn step_error(part: &Part, step: Step, error: anyhow::Error) -> PartsError {
    match error.downcast::<Conflict>() {
        Ok(conflict) => PartsError::FileConflict {
            part_name: part.name.clone(),
            other_part: conflict.other_part,
            step,
            path: conflict.path,
        },
        Err(error) => PartsError::step_failed(&part.name, step, error),
    }
}

/// Files the part contributed to the stage tree
fn staged_contents(part: &Part, store: &StateStore) -> StepContents {
    store
        .get(&part.name, Step::Stage)
        .map(|r| r.contents.clone())
        .unwrap_or_default()
}
