use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ids::{JobSpecId, RunId, TaskRunId};
use super::job::{Initiator, RunRequest, TaskSpec};
use super::status::RunStatus;
use crate::error::EngineError;

/// Merge two payloads, last key wins. Neither input is touched.
pub fn merge(existing: &Map<String, Value>, incoming: &Map<String, Value>) -> Map<String, Value> {
    let mut merged = existing.clone();
    for (key, value) in incoming {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Payload carried into or produced by a task, plus the status it implies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    #[serde(default)]
    pub data: Map<String, Value>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Default for RunResult {
    fn default() -> Self {
        Self {
            data: Map::new(),
            status: RunStatus::Unstarted,
            error_message: None,
        }
    }
}

impl RunResult {
    pub fn new(data: Map<String, Value>, status: RunStatus) -> Self {
        Self {
            data,
            status,
            error_message: None,
        }
    }

    pub fn completed(data: Map<String, Value>) -> Self {
        Self::new(data, RunStatus::Completed)
    }

    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            data: Map::new(),
            status: RunStatus::Errored,
            error_message: Some(message.into()),
        }
    }

    pub fn has_error(&self) -> bool {
        self.status.is_errored() || self.error_message.is_some()
    }
}

/// One step of a job run at a fixed position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: TaskRunId,
    pub job_run_id: RunId,
    pub position: usize,
    pub task_spec: TaskSpec,
    pub status: RunStatus,
    pub result: RunResult,
    /// Effective confirmations this task waits for.
    pub minimum_confirmations: u64,
    /// Confirmations counted at the last new head, if any.
    #[serde(default)]
    pub confirmations: Option<u64>,
}

impl TaskRun {
    pub fn new(job_run_id: RunId, position: usize, task_spec: TaskSpec, minimum_confirmations: u64) -> Self {
        Self {
            id: TaskRunId::new(),
            job_run_id,
            position,
            task_spec,
            status: RunStatus::Unstarted,
            result: RunResult::default(),
            minimum_confirmations,
            confirmations: None,
        }
    }

    /// Moves the task to `next`, refusing to go backwards in the lattice.
    pub fn advance(&mut self, next: RunStatus) -> Result<(), EngineError> {
        if !self.status.can_advance_to(next) {
            return Err(EngineError::StatusRegression {
                task_run_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Records an execution or bridge result on this task.
    pub fn apply_result(&mut self, input: &RunResult) -> Result<(), EngineError> {
        let next = if input.error_message.is_some() {
            RunStatus::Errored
        } else {
            input.status
        };
        self.advance(next)?;
        self.result = RunResult {
            data: input.data.clone(),
            status: next,
            error_message: input.error_message.clone(),
        };
        Ok(())
    }
}

/// One instantiation of a job spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: RunId,
    pub job_spec_id: JobSpecId,
    pub status: RunStatus,
    pub task_runs: Vec<TaskRun>,
    pub initiator: Initiator,
    pub result: RunResult,
    /// Accumulated payload across every resumption of this run.
    pub overrides: Map<String, Value>,
    pub run_request: RunRequest,
    pub creation_height: u64,
    pub observed_height: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRun {
    /// The first task run that has not finished yet.
    pub fn next_task_run(&self) -> Option<&TaskRun> {
        self.task_runs.iter().find(|tr| !tr.status.is_finished())
    }

    pub fn next_task_run_mut(&mut self) -> Option<&mut TaskRun> {
        self.task_runs.iter_mut().find(|tr| !tr.status.is_finished())
    }

    pub fn next_task_index(&self) -> Option<usize> {
        self.task_runs.iter().position(|tr| !tr.status.is_finished())
    }

    pub fn tasks_remain(&self) -> bool {
        self.next_task_run().is_some()
    }

    /// Sets the run status. A finished run accepts no further status, and
    /// entering a finished status stamps `finished_at` once.
    pub fn set_status(&mut self, next: RunStatus) -> Result<(), EngineError> {
        if self.status.is_finished() {
            if self.status == next {
                return Ok(());
            }
            return Err(EngineError::RunAlreadyFinished {
                run_id: self.id,
                status: self.status,
            });
        }
        self.status = next;
        if next.is_finished() && self.finished_at.is_none() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Copies a result's payload onto the run without changing its status.
    pub fn apply_partial_result(&mut self, input: &RunResult) {
        self.result.data = input.data.clone();
        if input.error_message.is_some() {
            self.result.error_message = input.error_message.clone();
        }
    }

    /// Copies a terminal result onto the run and finishes it.
    pub fn apply_final_result(&mut self, input: &RunResult, status: RunStatus) -> Result<(), EngineError> {
        self.apply_partial_result(input);
        self.result.status = status;
        self.set_status(status)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
