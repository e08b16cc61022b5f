mod ids;
mod job;
mod run;
mod status;
mod transition;

pub use ids::{JobSpecId, RunId, TaskRunId};
pub use job::{Initiator, InitiatorKind, JobSpec, RunRequest, TaskSpec};
pub use run::{merge, JobRun, RunResult, TaskRun};
pub use status::RunStatus;
pub use transition::{StateMachine, Transition};
