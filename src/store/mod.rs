//! Persistence contract consumed by the job manager.

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::state_machine::{JobRun, JobSpec, JobSpecId, RunId, RunStatus};

/// A stored value together with the row version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Storage backing job specs and job runs.
///
/// Implementations must make `update_run` a compare-and-swap on the row
/// version: the write succeeds only if the stored version still equals
/// `expected`, and the stored version then increases. That is the only
/// exclusivity the job manager relies on; two writers racing on the same run
/// see exactly one success and one `StoreError::Conflict`.
///
/// Scoped lookups hide archived specs and runs belonging to them; the
/// `_unscoped` variants return them too.
pub trait RunStore: Send + Sync {
    fn create_spec(&self, spec: JobSpec) -> Result<(), StoreError>;

    fn find_spec(&self, id: &JobSpecId) -> Result<Option<JobSpec>, StoreError>;

    fn find_spec_unscoped(&self, id: &JobSpecId) -> Result<Option<JobSpec>, StoreError>;

    /// Sets the spec's archived flag. Runs already created are left alone.
    fn archive_spec(&self, id: &JobSpecId) -> Result<(), StoreError>;

    fn create_run(&self, run: &JobRun) -> Result<u64, StoreError>;

    fn find_run(&self, id: &RunId) -> Result<Option<Versioned<JobRun>>, StoreError>;

    fn find_run_unscoped(&self, id: &RunId) -> Result<Option<Versioned<JobRun>>, StoreError>;

    /// Snapshot of the ids of every run (archived parents included) whose
    /// status is one of `statuses`, oldest first.
    fn run_ids_with_status(&self, statuses: &[RunStatus]) -> Result<Vec<RunId>, StoreError>;

    /// Writes the run with its task runs if the stored version is `expected`.
    /// Returns the new version.
    fn update_run(&self, run: &JobRun, expected: u64) -> Result<u64, StoreError>;
}
