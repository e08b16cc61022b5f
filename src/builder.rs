//! Builds new job runs from job specs.
//!
//! [`RunBuilder::load_spec`] performs the archive-aware lookup and
//! [`RunBuilder::build`] instantiates the spec's task list, choosing the
//! starting status from the first task's requirements.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::{BuildError, EngineError};
use crate::state_machine::{
    Initiator, JobRun, JobSpec, JobSpecId, RunId, RunRequest, RunResult, RunStatus, TaskRun,
};
use crate::store::RunStore;

/// Node-wide limits applied to every new run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunPolicy {
    /// Floor for every task's required confirmations.
    pub minimum_confirmations: u64,
    /// Runs offering less than this are created errored.
    pub minimum_contract_payment: u64,
}

/// Everything a caller supplies when asking for a new run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub initiator: Initiator,
    pub input: RunResult,
    pub creation_height: u64,
    pub run_request: RunRequest,
}

impl NewRun {
    pub fn new(initiator: Initiator, input: RunResult, creation_height: u64) -> Self {
        Self {
            initiator,
            input,
            creation_height,
            run_request: RunRequest::default(),
        }
    }

    pub fn with_run_request(mut self, run_request: RunRequest) -> Self {
        self.run_request = run_request;
        self
    }
}

pub struct RunBuilder {
    policy: RunPolicy,
}

impl RunBuilder {
    pub fn new(policy: RunPolicy) -> Self {
        Self { policy }
    }

    /// Looks a spec up including archived ones, so a missing spec and an
    /// archived spec produce different errors.
    pub fn load_spec<S: RunStore>(store: &S, spec_id: &JobSpecId) -> Result<JobSpec, EngineError> {
        let spec = store
            .find_spec_unscoped(spec_id)?
            .ok_or(EngineError::SpecNotFound(*spec_id))?;
        if spec.is_archived() {
            return Err(EngineError::SpecArchived(spec.id));
        }
        Ok(spec)
    }

    /// Instantiates `spec` as a fresh run. Nothing is persisted here.
    pub fn build(&self, spec: &JobSpec, request: NewRun) -> Result<JobRun, BuildError> {
        self.build_at(spec, request, Utc::now())
    }

    fn build_at(&self, spec: &JobSpec, request: NewRun, now: DateTime<Utc>) -> Result<JobRun, BuildError> {
        if spec.tasks.is_empty() {
            return Err(BuildError::NoTasks(spec.id));
        }
        if let Some(starts_at) = spec.starts_at {
            if now < starts_at {
                return Err(BuildError::NotYetActive {
                    spec_id: spec.id,
                    starts_at,
                });
            }
        }
        if let Some(ended_at) = spec.ends_at {
            if now > ended_at {
                return Err(BuildError::Ended {
                    spec_id: spec.id,
                    ended_at,
                });
            }
        }

        let run_id = RunId::new();
        let task_runs: Vec<TaskRun> = spec
            .tasks
            .iter()
            .enumerate()
            .map(|(position, task)| {
                let required = task.confirmations.max(self.policy.minimum_confirmations);
                TaskRun::new(run_id, position, task.clone(), required)
            })
            .collect();

        let NewRun {
            initiator,
            input,
            creation_height,
            run_request,
        } = request;

        let mut run = JobRun {
            id: run_id,
            job_spec_id: spec.id,
            status: RunStatus::Unstarted,
            task_runs,
            initiator,
            result: RunResult::new(input.data.clone(), RunStatus::Unstarted),
            overrides: input.data.clone(),
            run_request,
            creation_height,
            observed_height: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };

        if let Some(rejection) = self.rejection_reason(spec, &run, &input) {
            warn!(run = %run.id, job = %spec.id, reason = %rejection, "new run created errored");
            run.result.error_message = Some(rejection);
            run.result.status = RunStatus::Errored;
            run.status = RunStatus::Errored;
            run.finished_at = Some(now);
            return Ok(run);
        }

        let first = &mut run.task_runs[0];
        let start = if first.minimum_confirmations > 0 {
            RunStatus::PendingConfirmations
        } else if first.task_spec.requires_connection {
            RunStatus::PendingConnection
        } else {
            RunStatus::InProgress
        };
        first.status = start;
        first.result = RunResult::new(input.data, start);
        first.confirmations = Some(0);
        run.status = start;
        run.result.status = start;

        debug!(
            run = %run.id,
            job = %spec.id,
            status = %run.status,
            tasks = run.task_runs.len(),
            creation_height,
            "built new run"
        );
        Ok(run)
    }

    fn rejection_reason(&self, spec: &JobSpec, run: &JobRun, input: &RunResult) -> Option<String> {
        if input.has_error() {
            return Some(
                input
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("run for job {} started with errored input", spec.id)),
            );
        }
        match run.run_request.payment {
            Some(payment) if payment < self.policy.minimum_contract_payment => Some(format!(
                "rejecting job {} with payment {} below minimum threshold ({})",
                spec.id, payment, self.policy.minimum_contract_payment
            )),
            _ => None,
        }
    }
}
