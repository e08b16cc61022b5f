use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{RunStore, Versioned};
use crate::error::StoreError;
use crate::state_machine::{JobRun, JobSpec, JobSpecId, RunId, RunStatus};

#[derive(Default)]
struct Tables {
    specs: HashMap<JobSpecId, JobSpec>,
    runs: HashMap<RunId, Versioned<JobRun>>,
    /// Run ids in insertion order.
    run_order: Vec<RunId>,
}

/// Process-local store. Every operation takes one lock, which makes each
/// call atomic; cross-call exclusivity comes from row versions.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    /// Number of runs held, in any status.
    pub fn run_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.runs.len())
    }
}

impl Tables {
    fn spec_is_archived(&self, id: &JobSpecId) -> bool {
        self.specs.get(id).is_some_and(JobSpec::is_archived)
    }
}

impl RunStore for MemoryStore {
    fn create_spec(&self, spec: JobSpec) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        if tables.specs.contains_key(&spec.id) {
            return Err(StoreError::DuplicateSpec(spec.id));
        }
        tables.specs.insert(spec.id, spec);
        Ok(())
    }

    fn find_spec(&self, id: &JobSpecId) -> Result<Option<JobSpec>, StoreError> {
        let tables = self.lock()?;
        Ok(tables.specs.get(id).filter(|s| !s.is_archived()).cloned())
    }

    fn find_spec_unscoped(&self, id: &JobSpecId) -> Result<Option<JobSpec>, StoreError> {
        Ok(self.lock()?.specs.get(id).cloned())
    }

    fn archive_spec(&self, id: &JobSpecId) -> Result<(), StoreError> {
        let mut tables = self.lock()?;
        let spec = tables.specs.get_mut(id).ok_or(StoreError::SpecNotFound(*id))?;
        spec.archive();
        Ok(())
    }

    fn create_run(&self, run: &JobRun) -> Result<u64, StoreError> {
        let mut tables = self.lock()?;
        if tables.runs.contains_key(&run.id) {
            return Err(StoreError::DuplicateRun(run.id));
        }
        if !tables.specs.contains_key(&run.job_spec_id) {
            return Err(StoreError::SpecNotFound(run.job_spec_id));
        }
        tables.runs.insert(
            run.id,
            Versioned {
                value: run.clone(),
                version: 1,
            },
        );
        tables.run_order.push(run.id);
        Ok(1)
    }

    fn find_run(&self, id: &RunId) -> Result<Option<Versioned<JobRun>>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .runs
            .get(id)
            .filter(|r| !tables.spec_is_archived(&r.value.job_spec_id))
            .cloned())
    }

    fn find_run_unscoped(&self, id: &RunId) -> Result<Option<Versioned<JobRun>>, StoreError> {
        Ok(self.lock()?.runs.get(id).cloned())
    }

    fn run_ids_with_status(&self, statuses: &[RunStatus]) -> Result<Vec<RunId>, StoreError> {
        let tables = self.lock()?;
        Ok(tables
            .run_order
            .iter()
            .filter(|id| {
                tables
                    .runs
                    .get(*id)
                    .is_some_and(|r| statuses.contains(&r.value.status))
            })
            .copied()
            .collect())
    }

    fn update_run(&self, run: &JobRun, expected: u64) -> Result<u64, StoreError> {
        let mut tables = self.lock()?;
        let stored = tables.runs.get_mut(&run.id).ok_or(StoreError::RunNotFound(run.id))?;
        if stored.version != expected {
            return Err(StoreError::Conflict {
                run_id: run.id,
                expected,
                found: stored.version,
            });
        }
        stored.value = run.clone();
        stored.version += 1;
        Ok(stored.version)
    }
}
