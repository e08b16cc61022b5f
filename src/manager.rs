//! The job manager: creates runs and wakes suspended ones.
//!
//! Every mutation of an existing run goes through one transaction helper,
//! which reads the run with its row version, applies one state machine
//! trigger to a private copy, and writes it back with a compare-and-swap.
//! A lost race reloads and re-evaluates the trigger, so two triggers racing
//! on the same run cannot both promote it and dispatch it twice.
//!
//! Bulk operations snapshot the matching run ids first and then transact
//! each run on its own; one run's failure is logged and never stops the
//! rest of the batch.

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::builder::{NewRun, RunBuilder};
use crate::config::EngineConfig;
use crate::dispatch::DispatchSink;
use crate::error::{EngineError, StoreError};
use crate::state_machine::{
    Initiator, JobRun, JobSpecId, RunId, RunRequest, RunResult, RunStatus, StateMachine, Transition,
};
use crate::store::{RunStore, Versioned};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    /// Hide runs whose job spec is archived.
    Scoped,
    Unscoped,
}

/// Per-run tally of one bulk wake-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub resumed: usize,
    pub still_pending: usize,
    pub finished: usize,
    /// Runs that no longer matched the trigger by the time they were locked.
    pub unchanged: usize,
    /// Runs skipped because they violate a run invariant or vanished.
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.resumed + self.still_pending + self.finished + self.unchanged + self.skipped + self.failed
    }
}

/// Creates, resumes and cancels job runs.
pub struct JobManager<S, D> {
    store: S,
    dispatch: D,
    builder: RunBuilder,
    max_conflict_retries: u32,
}

impl<S: RunStore, D: DispatchSink> JobManager<S, D> {
    pub fn new(store: S, dispatch: D, config: &EngineConfig) -> Self {
        Self {
            store,
            dispatch,
            builder: RunBuilder::new(config.run_policy()),
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Builds a run for `spec_id`, persists it and dispatches it if it can
    /// start right away.
    pub fn execute_job(
        &self,
        spec_id: &JobSpecId,
        initiator: Initiator,
        input: RunResult,
        creation_height: u64,
    ) -> Result<JobRun, EngineError> {
        self.execute_job_with_run_request(spec_id, initiator, input, creation_height, RunRequest::default())
    }

    /// Same as [`execute_job`](Self::execute_job) with an explicit run request.
    pub fn execute_job_with_run_request(
        &self,
        spec_id: &JobSpecId,
        initiator: Initiator,
        input: RunResult,
        creation_height: u64,
        run_request: RunRequest,
    ) -> Result<JobRun, EngineError> {
        debug!(
            job = %spec_id,
            initiator = %initiator.kind,
            input_status = %input.status,
            creation_height,
            "new run triggered"
        );

        let spec = RunBuilder::load_spec(&self.store, spec_id)?;
        let request = NewRun::new(initiator, input, creation_height).with_run_request(run_request);
        let run = self.builder.build(&spec, request)?;

        self.store.create_run(&run)?;
        if run.status.is_active() {
            self.hand_off(&run);
        }
        info!(run = %run.id, job = %spec.id, status = %run.status, "created run");
        Ok(run)
    }

    /// Wakes every run waiting on confirmations with a new block height.
    pub fn resume_confirming_runs(&self, current_height: u64) -> Result<BatchReport, EngineError> {
        let ids = self.store.run_ids_with_status(&[RunStatus::PendingConfirmations])?;
        debug!(height = current_height, runs = ids.len(), "new head resuming confirming runs");

        let mut report = BatchReport::default();
        for run_id in ids {
            let outcome = self.transact(&run_id, Lookup::Unscoped, |run| {
                StateMachine::on_new_head(run, current_height)
            });
            settle(&mut report, &run_id, "confirming", outcome);
        }
        Ok(report)
    }

    /// Wakes every run waiting on a chain connection (or confirmations).
    pub fn resume_connecting_runs(&self) -> Result<BatchReport, EngineError> {
        let ids = self
            .store
            .run_ids_with_status(&[RunStatus::PendingConnection, RunStatus::PendingConfirmations])?;
        debug!(runs = ids.len(), "new connection resuming runs");

        let mut report = BatchReport::default();
        for run_id in ids {
            let outcome = self.transact(&run_id, Lookup::Unscoped, StateMachine::on_connection);
            settle(&mut report, &run_id, "connecting", outcome);
        }
        Ok(report)
    }

    /// Applies a bridge adapter's response to a run waiting on it.
    pub fn resume_pending_task(&self, run_id: &RunId, input: RunResult) -> Result<JobRun, EngineError> {
        debug!(
            run = %run_id,
            input_status = %input.status,
            input_keys = input.data.len(),
            "external adapter resuming run"
        );
        let (run, transition) = self.transact(run_id, Lookup::Unscoped, |run| {
            StateMachine::on_bridge_response(run, &input)
        })?;
        info!(run = %run.id, job = %run.job_spec_id, status = %run.status, ?transition, "bridge response applied");
        Ok(run)
    }

    /// Cancels a run. Cancelling a finished run succeeds without changes.
    pub fn cancel_run(&self, run_id: &RunId) -> Result<JobRun, EngineError> {
        let (run, transition) = self.transact(run_id, Lookup::Scoped, StateMachine::cancel)?;
        match transition {
            Transition::Unchanged => {
                debug!(run = %run.id, status = %run.status, "cancel requested for finished run")
            }
            _ => info!(run = %run.id, job = %run.job_spec_id, "cancelled run"),
        }
        Ok(run)
    }

    /// Hands a persisted run to the sink. The write already committed, so a
    /// refused handoff is logged and the caller still sees success.
    fn hand_off(&self, run: &JobRun) {
        if let Err(err) = self.dispatch.run_ready(run) {
            error!(run = %run.id, job = %run.job_spec_id, error = %err, "failed to dispatch persisted run");
        }
    }

    fn load(&self, run_id: &RunId, lookup: Lookup) -> Result<Option<Versioned<JobRun>>, StoreError> {
        match lookup {
            Lookup::Scoped => self.store.find_run(run_id),
            Lookup::Unscoped => self.store.find_run_unscoped(run_id),
        }
    }

    /// Read-modify-write of a single run under optimistic exclusivity.
    ///
    /// `apply` runs on a fresh copy for every attempt; on error nothing is
    /// written. The run is dispatched only after its write succeeded.
    fn transact<F>(&self, run_id: &RunId, lookup: Lookup, mut apply: F) -> Result<(JobRun, Transition), EngineError>
    where
        F: FnMut(&mut JobRun) -> Result<Transition, EngineError>,
    {
        let attempts = self.max_conflict_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let Versioned { value: mut run, version } = self
                .load(run_id, lookup)?
                .ok_or(EngineError::RunNotFound(*run_id))?;

            let transition = apply(&mut run)?;
            if !transition.needs_persist() {
                return Ok((run, transition));
            }

            run.touch();
            match self.store.update_run(&run, version) {
                Ok(_) => {
                    if transition.should_dispatch() {
                        self.hand_off(&run);
                    }
                    return Ok((run, transition));
                }
                Err(StoreError::Conflict { found, .. }) => {
                    warn!(run = %run_id, attempt, expected = version, found, "run changed concurrently, retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(EngineError::ConflictRetriesExhausted {
            run_id: *run_id,
            attempts,
        })
    }
}

/// Folds one run's outcome into the batch report, logging failures.
fn settle(
    report: &mut BatchReport,
    run_id: &RunId,
    trigger: &str,
    outcome: Result<(JobRun, Transition), EngineError>,
) {
    match outcome {
        Ok((run, Transition::Resumed)) => {
            info!(run = %run.id, job = %run.job_spec_id, trigger, "resumed run");
            report.resumed += 1;
        }
        Ok((run, Transition::StillPending)) => {
            debug!(run = %run.id, observed_height = ?run.observed_height, trigger, "run still pending");
            report.still_pending += 1;
        }
        Ok((run, Transition::Finished(status))) => {
            info!(run = %run.id, %status, trigger, "run finished");
            report.finished += 1;
        }
        Ok((_, Transition::Unchanged)) => report.unchanged += 1,
        Err(EngineError::NoRemainingTasks(id)) => {
            error!(run = %id, trigger, "attempting to resume run with no remaining tasks");
            report.skipped += 1;
        }
        Err(EngineError::RunNotFound(id)) => {
            debug!(run = %id, trigger, "run disappeared before it could be resumed");
            report.skipped += 1;
        }
        Err(err) => {
            error!(run = %run_id, trigger, error = %err, "failed to resume run");
            report.failed += 1;
        }
    }
}
