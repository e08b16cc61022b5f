use tracing::debug;

use super::run::{merge, JobRun, RunResult};
use super::status::RunStatus;
use crate::error::EngineError;

/// The outcome of applying one trigger to one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The run is `InProgress` and must be handed to the dispatcher.
    Resumed,
    /// The run changed but is still waiting on an external trigger.
    StillPending,
    /// The run reached a terminal status.
    Finished(RunStatus),
    /// The trigger no longer applies to this run (it moved on meanwhile).
    Unchanged,
}

impl Transition {
    pub fn needs_persist(self) -> bool {
        !matches!(self, Transition::Unchanged)
    }

    pub fn should_dispatch(self) -> bool {
        matches!(self, Transition::Resumed)
    }
}

/// Applies external triggers to a `JobRun`.
///
/// Every function mutates only the run it is given and leaves it untouched
/// when it returns an error, so callers can discard the copy and persist
/// nothing.
pub struct StateMachine;

impl StateMachine {
    /// A new block height was observed.
    ///
    /// Confirmations are counted as `height - creation_height`; the block the
    /// run was created in counts as zero.
    pub fn on_new_head(run: &mut JobRun, height: u64) -> Result<Transition, EngineError> {
        if !run.status.is_pending_confirmations() {
            return Ok(Transition::Unchanged);
        }
        let run_id = run.id;
        let creation_height = run.creation_height;
        let task = run
            .next_task_run_mut()
            .ok_or(EngineError::NoRemainingTasks(run_id))?;

        let confirmations = height.saturating_sub(creation_height);
        task.confirmations = Some(confirmations);
        let required = task.minimum_confirmations;
        debug!(run = %run_id, height, confirmations, required, "validating minimum confirmations");

        if confirmations >= required {
            if task.status.is_pending() || task.status == RunStatus::Unstarted {
                task.advance(RunStatus::InProgress)?;
            }
            run.observed_height = Some(height);
            run.set_status(RunStatus::InProgress)?;
            return Ok(Transition::Resumed);
        }

        run.observed_height = Some(height);
        Ok(Transition::StillPending)
    }

    /// The chain connection came back. Single gate, no counting.
    pub fn on_connection(run: &mut JobRun) -> Result<Transition, EngineError> {
        if !(run.status.is_pending_connection() || run.status.is_pending_confirmations()) {
            return Ok(Transition::Unchanged);
        }
        let run_id = run.id;
        let task = run
            .next_task_run_mut()
            .ok_or(EngineError::NoRemainingTasks(run_id))?;
        if task.status.is_pending() || task.status == RunStatus::Unstarted {
            task.advance(RunStatus::InProgress)?;
        }
        run.set_status(RunStatus::InProgress)?;
        Ok(Transition::Resumed)
    }

    /// A bridge adapter answered for the run's current task.
    ///
    /// Unlike the bulk triggers, a run that is not waiting on a bridge is a
    /// caller error rather than a no-op.
    pub fn on_bridge_response(run: &mut JobRun, input: &RunResult) -> Result<Transition, EngineError> {
        if !run.status.is_pending_bridge() {
            return Err(EngineError::RunNotPendingBridge {
                run_id: run.id,
                status: run.status,
            });
        }
        let run_id = run.id;
        let task = run
            .next_task_run_mut()
            .ok_or(EngineError::NoRemainingTasks(run_id))?;

        task.apply_result(input)?;
        let task_status = task.status;
        run.overrides = merge(&run.overrides, &input.data);

        if !task_status.is_finished() {
            run.apply_partial_result(input);
            return Ok(Transition::StillPending);
        }

        if run.tasks_remain() {
            run.apply_partial_result(input);
            run.set_status(RunStatus::InProgress)?;
            return Ok(Transition::Resumed);
        }

        run.apply_final_result(input, task_status)?;
        Ok(Transition::Finished(task_status))
    }

    /// Cancels a run that has not finished. A finished run is left alone.
    pub fn cancel(run: &mut JobRun) -> Result<Transition, EngineError> {
        if run.status.is_finished() {
            return Ok(Transition::Unchanged);
        }
        for task in run.task_runs.iter_mut().filter(|tr| !tr.status.is_finished()) {
            task.advance(RunStatus::Cancelled)?;
        }
        run.result.status = RunStatus::Cancelled;
        run.set_status(RunStatus::Cancelled)?;
        Ok(Transition::Finished(RunStatus::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::ids::{JobSpecId, RunId};
    use crate::state_machine::job::{Initiator, RunRequest, TaskSpec};
    use crate::state_machine::run::TaskRun;
    use chrono::Utc;
    use serde_json::{json, Map, Value};

    fn make_run(status: RunStatus, tasks: &[(RunStatus, u64)], creation_height: u64) -> JobRun {
        let id = RunId::new();
        let now = Utc::now();
        JobRun {
            id,
            job_spec_id: JobSpecId::new(),
            status,
            task_runs: tasks
                .iter()
                .enumerate()
                .map(|(i, (s, confs))| {
                    let mut tr = TaskRun::new(id, i, TaskSpec::new("noop"), *confs);
                    tr.status = *s;
                    tr
                })
                .collect(),
            initiator: Initiator::web(),
            result: RunResult::default(),
            overrides: Map::new(),
            run_request: RunRequest::default(),
            creation_height,
            observed_height: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    fn completed(value: Value) -> RunResult {
        RunResult::completed(value.as_object().cloned().unwrap())
    }

    #[test]
    fn confirmations_below_minimum_stay_pending() {
        let mut run = make_run(
            RunStatus::PendingConfirmations,
            &[(RunStatus::PendingConfirmations, 3)],
            10,
        );
        let t = StateMachine::on_new_head(&mut run, 12).unwrap();
        assert_eq!(t, Transition::StillPending);
        assert_eq!(run.status, RunStatus::PendingConfirmations);
        assert_eq!(run.observed_height, Some(12));
        assert_eq!(run.task_runs[0].confirmations, Some(2));
    }

    #[test]
    fn confirmations_reaching_minimum_promote() {
        let mut run = make_run(
            RunStatus::PendingConfirmations,
            &[(RunStatus::PendingConfirmations, 3)],
            10,
        );
        let t = StateMachine::on_new_head(&mut run, 13).unwrap();
        assert_eq!(t, Transition::Resumed);
        assert_eq!(run.status, RunStatus::InProgress);
        assert_eq!(run.task_runs[0].status, RunStatus::InProgress);
        assert_eq!(run.observed_height, Some(13));
    }

    #[test]
    fn head_below_creation_height_counts_zero() {
        let mut run = make_run(
            RunStatus::PendingConfirmations,
            &[(RunStatus::PendingConfirmations, 1)],
            10,
        );
        let t = StateMachine::on_new_head(&mut run, 7).unwrap();
        assert_eq!(t, Transition::StillPending);
        assert_eq!(run.task_runs[0].confirmations, Some(0));
    }

    #[test]
    fn new_head_ignores_runs_not_pending_confirmations() {
        let mut run = make_run(RunStatus::InProgress, &[(RunStatus::InProgress, 0)], 0);
        let before = run.clone();
        let t = StateMachine::on_new_head(&mut run, 100).unwrap();
        assert_eq!(t, Transition::Unchanged);
        assert_eq!(run, before);
    }

    #[test]
    fn new_head_without_remaining_tasks_is_an_error() {
        let mut run = make_run(RunStatus::PendingConfirmations, &[(RunStatus::Completed, 0)], 0);
        let err = StateMachine::on_new_head(&mut run, 5).unwrap_err();
        assert!(matches!(err, EngineError::NoRemainingTasks(id) if id == run.id));
    }

    #[test]
    fn connection_is_a_single_gate() {
        let mut run = make_run(
            RunStatus::PendingConnection,
            &[(RunStatus::PendingConnection, 50)],
            10,
        );
        let t = StateMachine::on_connection(&mut run).unwrap();
        assert_eq!(t, Transition::Resumed);
        assert_eq!(run.status, RunStatus::InProgress);
        assert_eq!(run.task_runs[0].status, RunStatus::InProgress);
    }

    #[test]
    fn connection_also_wakes_confirming_runs() {
        let mut run = make_run(
            RunStatus::PendingConfirmations,
            &[(RunStatus::PendingConfirmations, 5)],
            0,
        );
        assert_eq!(StateMachine::on_connection(&mut run).unwrap(), Transition::Resumed);
        assert_eq!(run.status, RunStatus::InProgress);
    }

    #[test]
    fn connection_ignores_bridge_pending_runs() {
        let mut run = make_run(RunStatus::PendingBridge, &[(RunStatus::PendingBridge, 0)], 0);
        assert_eq!(StateMachine::on_connection(&mut run).unwrap(), Transition::Unchanged);
        assert_eq!(run.status, RunStatus::PendingBridge);
    }

    #[test]
    fn bridge_response_finishing_last_task_finishes_run() {
        let mut run = make_run(
            RunStatus::PendingBridge,
            &[(RunStatus::Completed, 0), (RunStatus::PendingBridge, 0)],
            0,
        );
        let t = StateMachine::on_bridge_response(&mut run, &completed(json!({"price": 42}))).unwrap();
        assert_eq!(t, Transition::Finished(RunStatus::Completed));
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
        assert_eq!(run.result.data.get("price"), Some(&json!(42)));
        assert_eq!(run.overrides.get("price"), Some(&json!(42)));
    }

    #[test]
    fn bridge_response_with_remaining_tasks_advances_pointer() {
        let mut run = make_run(
            RunStatus::PendingBridge,
            &[(RunStatus::PendingBridge, 0), (RunStatus::Unstarted, 0)],
            0,
        );
        let t = StateMachine::on_bridge_response(&mut run, &completed(json!({"a": 1}))).unwrap();
        assert_eq!(t, Transition::Resumed);
        assert_eq!(run.status, RunStatus::InProgress);
        assert!(run.finished_at.is_none());
        assert_eq!(run.next_task_index(), Some(1));
    }

    #[test]
    fn bridge_partial_response_keeps_status() {
        let mut run = make_run(RunStatus::PendingBridge, &[(RunStatus::PendingBridge, 0)], 0);
        let partial = RunResult::new(
            json!({"progress": 50}).as_object().cloned().unwrap(),
            RunStatus::PendingBridge,
        );
        let t = StateMachine::on_bridge_response(&mut run, &partial).unwrap();
        assert_eq!(t, Transition::StillPending);
        assert_eq!(run.status, RunStatus::PendingBridge);
        assert_eq!(run.result.data.get("progress"), Some(&json!(50)));
        assert!(run.finished_at.is_none());
    }

    #[test]
    fn bridge_overrides_accumulate_across_responses() {
        let mut run = make_run(
            RunStatus::PendingBridge,
            &[(RunStatus::PendingBridge, 0), (RunStatus::Unstarted, 0)],
            0,
        );
        run.overrides = json!({"a": 1, "b": 1}).as_object().cloned().unwrap();
        StateMachine::on_bridge_response(&mut run, &completed(json!({"b": 2, "c": 3}))).unwrap();
        assert_eq!(Value::Object(run.overrides.clone()), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn bridge_error_with_tasks_left_resumes_run() {
        let mut run = make_run(
            RunStatus::PendingBridge,
            &[(RunStatus::PendingBridge, 0), (RunStatus::Unstarted, 0)],
            0,
        );
        let t = StateMachine::on_bridge_response(&mut run, &RunResult::errored("timeout")).unwrap();
        assert_eq!(t, Transition::Resumed);
        assert_eq!(run.task_runs[0].status, RunStatus::Errored);
        assert_eq!(run.status, RunStatus::InProgress);
        assert_eq!(run.next_task_index(), Some(1));
        assert_eq!(run.result.error_message.as_deref(), Some("timeout"));
        assert!(run.finished_at.is_none());
    }

    #[test]
    fn bridge_error_on_last_task_finishes_run_errored() {
        let mut run = make_run(
            RunStatus::PendingBridge,
            &[(RunStatus::Completed, 0), (RunStatus::PendingBridge, 0)],
            0,
        );
        let t = StateMachine::on_bridge_response(&mut run, &RunResult::errored("timeout")).unwrap();
        assert_eq!(t, Transition::Finished(RunStatus::Errored));
        assert_eq!(run.status, RunStatus::Errored);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn bridge_response_rejects_wrong_status() {
        let mut run = make_run(RunStatus::InProgress, &[(RunStatus::InProgress, 0)], 0);
        let err = StateMachine::on_bridge_response(&mut run, &completed(json!({}))).unwrap_err();
        assert!(matches!(
            err,
            EngineError::RunNotPendingBridge {
                status: RunStatus::InProgress,
                ..
            }
        ));
    }

    #[test]
    fn bridge_response_without_tasks_is_an_error() {
        let mut run = make_run(RunStatus::PendingBridge, &[(RunStatus::Completed, 0)], 0);
        let err = StateMachine::on_bridge_response(&mut run, &completed(json!({}))).unwrap_err();
        assert!(matches!(err, EngineError::NoRemainingTasks(_)));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut run = make_run(
            RunStatus::PendingConfirmations,
            &[(RunStatus::PendingConfirmations, 3), (RunStatus::Unstarted, 0)],
            0,
        );
        assert_eq!(
            StateMachine::cancel(&mut run).unwrap(),
            Transition::Finished(RunStatus::Cancelled)
        );
        let stamp = run.finished_at;
        assert!(stamp.is_some());
        assert!(run.task_runs.iter().all(|tr| tr.status == RunStatus::Cancelled));

        assert_eq!(StateMachine::cancel(&mut run).unwrap(), Transition::Unchanged);
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.finished_at, stamp);
    }

    #[test]
    fn cancel_leaves_completed_run_alone() {
        let mut run = make_run(RunStatus::Completed, &[(RunStatus::Completed, 0)], 0);
        assert_eq!(StateMachine::cancel(&mut run).unwrap(), Transition::Unchanged);
        assert_eq!(run.status, RunStatus::Completed);
    }

    #[test]
    fn transition_flags() {
        assert!(Transition::Resumed.should_dispatch());
        assert!(Transition::StillPending.needs_persist());
        assert!(!Transition::StillPending.should_dispatch());
        assert!(!Transition::Unchanged.needs_persist());
        assert!(!Transition::Finished(RunStatus::Completed).should_dispatch());
    }
}
