//! Execution contexts.
//!
//! An `ExecutionContext` scopes a batch of actions: it holds an exclusive
//! lock on the work directory for its whole lifetime and makes sure a
//! failed or interrupted step never leaves a record behind.

use std::time::Instant;

use tracing::{error, info, warn};
use uuid::Uuid;

use super::executor::Executor;
use super::lock::WorkDirLock;
use super::state::StateStore;
use crate::domain::{Action, EventType, JournalEvent, Step};
use crate::errors::{PartsError, Result};

pub struct ExecutionContext<'a> {
    executor: &'a Executor,
    store: &'a mut StateStore,
    session_id: Uuid,
    // Released after Drop::drop has journaled the end of the session
    _lock: WorkDirLock,
    /// Step currently being executed, if any
    in_flight: Option<(String, Step)>,
    finished: bool,
}

impl<'a> ExecutionContext<'a> {
    /// Lock the work directory and start a session
    pub fn begin(executor: &'a Executor, store: &'a mut StateStore) -> Result<Self> {
        let lock = WorkDirLock::acquire(executor.info().dirs())?;

        let session_id = Uuid::new_v4();
        executor.log_event(JournalEvent::new(EventType::SessionStarted, "execution started").in_session(session_id));
        info!(session = %session_id, "Execution session started");

        Ok(Self {
            executor,
            store,
            session_id,
            _lock: lock,
            in_flight: None,
            finished: false,
        })
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Read access to the state while the session is open
    pub fn store(&self) -> &StateStore {
        &*self.store
    }

    /// Execute one action, rolling the step back if it fails
    pub async fn execute(&mut self, action: &Action) -> Result<()> {
        if action.is_noop() {
            return Ok(());
        }

        let started = Instant::now();
        self.in_flight = Some((action.part_name.clone(), action.step));
        self.executor.log_event(
            JournalEvent::new(EventType::ActionStarted, action.to_string())
                .in_session(self.session_id)
                .for_step(&action.part_name, action.step)
                .with_action(action.kind),
        );

        let result = self.executor.run(action, self.store).await;

        match result {
            Ok(()) => {
                self.in_flight = None;
                let elapsed = started.elapsed().as_millis() as u64;
                self.executor.log_event(
                    JournalEvent::new(EventType::ActionCompleted, action.to_string())
                        .in_session(self.session_id)
                        .for_step(&action.part_name, action.step)
                        .with_action(action.kind)
                        .with_duration(elapsed),
                );
                Ok(())
            }
            Err(e) => {
                error!(action = %action, error = %e, "Action failed");
                self.executor.log_event(
                    JournalEvent::new(EventType::ActionFailed, action.to_string())
                        .in_session(self.session_id)
                        .for_step(&action.part_name, action.step)
                        .with_action(action.kind)
                        .with_error(e.to_string()),
                );
                self.rollback(action, &e).await;
                self.in_flight = None;
                Err(e)
            }
        }
    }

    /// Execute actions in order, stopping at the first failure
    pub async fn execute_all(&mut self, actions: &[Action]) -> Result<()> {
        for action in actions {
            self.execute(action).await?;
        }
        Ok(())
    }

    async fn rollback(&mut self, action: &Action, cause: &PartsError) {
        // Nothing was touched when the action was rejected up front
        if matches!(cause, PartsError::MissingPrerequisite { .. } | PartsError::PartNotFound { .. }) {
            return;
        }

        if let Err(e) = self.store.erase(&action.part_name, action.step).await {
            warn!(action = %action, error = %e, "Failed to roll back step");
            return;
        }

        warn!(action = %action, "Rolled back failed step");
        self.executor.log_event(
            JournalEvent::new(EventType::ActionRolledBack, action.to_string())
                .in_session(self.session_id)
                .for_step(&action.part_name, action.step),
        );
    }

    /// Close the session and release the work directory lock
    pub fn finish(mut self) {
        self.finished = true;
        self.executor
            .log_event(JournalEvent::new(EventType::SessionFinished, "execution finished").in_session(self.session_id));
        info!(session = %self.session_id, "Execution session finished");
    }
}

impl Drop for ExecutionContext<'_> {
    fn drop(&mut self) {
        if let Some((part_name, step)) = self.in_flight.take() {
            warn!(part = %part_name, %step, "Execution interrupted, discarding step state");
            self.store.forget(&part_name, step);
            self.executor.log_event(
                JournalEvent::new(EventType::ActionRolledBack, format!("{}:{} interrupted", part_name, step))
                    .in_session(self.session_id)
                    .for_step(&part_name, step),
            );
        }

        if !self.finished {
            self.executor
                .log_event(JournalEvent::new(EventType::SessionFinished, "execution abandoned").in_session(self.session_id));
        }
    }
}
