//! Handoff of ready runs to whatever executes their tasks.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::DispatchError;
use crate::state_machine::{JobRun, JobSpecId, RunId, TaskRunId};

/// Notification that a run is ready to execute its current task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunHandoff {
    pub run_id: RunId,
    pub job_spec_id: JobSpecId,
    pub task_run_id: Option<TaskRunId>,
    pub task_type: Option<String>,
}

impl RunHandoff {
    pub fn for_run(run: &JobRun) -> Self {
        let task = run.next_task_run();
        Self {
            run_id: run.id,
            job_spec_id: run.job_spec_id,
            task_run_id: task.map(|tr| tr.id),
            task_type: task.map(|tr| tr.task_spec.task_type.clone()),
        }
    }
}

/// Receives runs that were persisted in `InProgress`.
///
/// Called at most once per advancing transition, after the transition is
/// stored.
pub trait DispatchSink: Send + Sync {
    fn run_ready(&self, run: &JobRun) -> Result<(), DispatchError>;
}

/// Forwards handoffs over an unbounded channel so the engine never blocks on
/// the executor.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<RunHandoff>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunHandoff>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DispatchSink for ChannelSink {
    fn run_ready(&self, run: &JobRun) -> Result<(), DispatchError> {
        self.sender
            .send(RunHandoff::for_run(run))
            .map_err(|_| DispatchError::Closed(run.id))
    }
}
