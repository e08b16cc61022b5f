use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::state_machine::{JobSpecId, RunId, RunStatus, TaskRunId};

/// Errors surfaced by the job manager.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job spec not found: {0}")]
    SpecNotFound(JobSpecId),

    #[error("trying to run archived job spec {0}")]
    SpecArchived(JobSpecId),

    #[error("job run not found: {0}")]
    RunNotFound(RunId),

    #[error("attempting to resume non pending run {run_id} (status {status})")]
    RunNotPendingBridge { run_id: RunId, status: RunStatus },

    #[error("attempting to resume run with no remaining tasks {0}")]
    NoRemainingTasks(RunId),

    #[error("failed to construct run: {0}")]
    RunConstructionFailed(#[from] BuildError),

    #[error("run {run_id} is already {status}")]
    RunAlreadyFinished { run_id: RunId, status: RunStatus },

    #[error("task run {task_run_id} cannot move from {from} to {to}")]
    StatusRegression {
        task_run_id: TaskRunId,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("gave up updating run {run_id} after {attempts} conflicting writes")]
    ConflictRetriesExhausted { run_id: RunId, attempts: u32 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Reasons the run builder refuses a spec.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("job spec {0} has no tasks")]
    NoTasks(JobSpecId),

    #[error("job spec {spec_id} is not active until {starts_at}")]
    NotYetActive {
        spec_id: JobSpecId,
        starts_at: DateTime<Utc>,
    },

    #[error("job spec {spec_id} ended at {ended_at}")]
    Ended {
        spec_id: JobSpecId,
        ended_at: DateTime<Utc>,
    },
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run {run_id} was modified concurrently (expected version {expected}, found {found})")]
    Conflict {
        run_id: RunId,
        expected: u64,
        found: u64,
    },

    #[error("run {0} already exists")]
    DuplicateRun(RunId),

    #[error("job spec {0} already exists")]
    DuplicateSpec(JobSpecId),

    #[error("no job spec {0} in store")]
    SpecNotFound(JobSpecId),

    #[error("no run {0} in store")]
    RunNotFound(RunId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures handing a run to the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch channel closed, could not hand off run {0}")]
    Closed(RunId),
}
