//! Long-running loop that feeds external triggers into the job manager.
//!
//! Triggers arrive on an mpsc channel from whichever watchers the host wires
//! up (chain heads, connectivity, bridge callbacks, manual requests). The
//! loop stops when the shutdown watch flips to `true` or every trigger
//! sender is gone. It never installs signal handlers itself.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::dispatch::DispatchSink;
use crate::error::EngineError;
use crate::manager::{BatchReport, JobManager};
use crate::state_machine::{Initiator, JobRun, JobSpec, JobSpecId, RunId, RunRequest, RunResult};
use crate::store::RunStore;

/// An external event the engine reacts to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Execute {
        job_spec_id: JobSpecId,
        #[serde(default = "Initiator::web")]
        initiator: Initiator,
        #[serde(default)]
        input: RunResult,
        #[serde(default)]
        creation_height: u64,
        #[serde(default)]
        run_request: RunRequest,
    },
    NewHead {
        height: u64,
    },
    Connected,
    BridgeResponse {
        run_id: RunId,
        input: RunResult,
    },
    Cancel {
        run_id: RunId,
    },
}

impl Trigger {
    pub fn kind(&self) -> &'static str {
        match self {
            Trigger::Execute { .. } => "execute",
            Trigger::NewHead { .. } => "new_head",
            Trigger::Connected => "connected",
            Trigger::BridgeResponse { .. } => "bridge_response",
            Trigger::Cancel { .. } => "cancel",
        }
    }
}

/// What handling one trigger produced.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Run(Box<JobRun>),
    Batch(BatchReport),
}

/// Counters returned when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub handled: usize,
    pub rejected: usize,
}

/// Routes one trigger to the matching manager operation.
pub fn handle<S: RunStore, D: DispatchSink>(
    manager: &JobManager<S, D>,
    trigger: Trigger,
) -> Result<TriggerOutcome, EngineError> {
    match trigger {
        Trigger::Execute {
            job_spec_id,
            initiator,
            input,
            creation_height,
            run_request,
        } => manager
            .execute_job_with_run_request(&job_spec_id, initiator, input, creation_height, run_request)
            .map(|run| TriggerOutcome::Run(Box::new(run))),
        Trigger::NewHead { height } => manager.resume_confirming_runs(height).map(TriggerOutcome::Batch),
        Trigger::Connected => manager.resume_connecting_runs().map(TriggerOutcome::Batch),
        Trigger::BridgeResponse { run_id, input } => manager
            .resume_pending_task(&run_id, input)
            .map(|run| TriggerOutcome::Run(Box::new(run))),
        Trigger::Cancel { run_id } => manager
            .cancel_run(&run_id)
            .map(|run| TriggerOutcome::Run(Box::new(run))),
    }
}

/// Processes triggers until shutdown. Trigger failures are logged and
/// counted, never fatal.
pub async fn run<S, D>(
    manager: Arc<JobManager<S, D>>,
    mut triggers: mpsc::Receiver<Trigger>,
    mut shutdown: watch::Receiver<bool>,
) -> ServiceStats
where
    S: RunStore + 'static,
    D: DispatchSink + 'static,
{
    let mut stats = ServiceStats::default();
    if *shutdown.borrow() {
        return stats;
    }
    info!("job manager service started");

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("shutdown requested, stopping job manager service");
                    break;
                }
            }
            next = triggers.recv() => {
                let Some(trigger) = next else {
                    info!("trigger channel closed, stopping job manager service");
                    break;
                };
                let kind = trigger.kind();
                debug!(trigger = kind, "trigger received");

                let worker = Arc::clone(&manager);
                match tokio::task::spawn_blocking(move || handle(&worker, trigger)).await {
                    Ok(Ok(outcome)) => {
                        stats.handled += 1;
                        if let TriggerOutcome::Batch(report) = outcome {
                            debug!(trigger = kind, ?report, "batch processed");
                        }
                    }
                    Ok(Err(err)) => {
                        stats.rejected += 1;
                        warn!(trigger = kind, error = %err, "trigger rejected");
                    }
                    Err(join_err) => {
                        stats.rejected += 1;
                        error!(trigger = kind, error = %join_err, "trigger handler panicked");
                    }
                }
            }
        }
    }
    stats
}

#[derive(Debug, Deserialize)]
struct SpecFile {
    #[serde(default)]
    jobs: Vec<JobSpec>,
}

/// Reads job specs from a `.toml` file (`[[jobs]]` tables) or a JSON file
/// (`{"jobs": [...]}`).
pub fn load_spec_file(path: &Path) -> Result<Vec<JobSpec>> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("reading job specs from {}", path.display()))?;
    let file: SpecFile = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&contents).with_context(|| format!("parsing TOML job specs in {}", path.display()))?
    } else {
        serde_json::from_str(&contents).with_context(|| format!("parsing JSON job specs in {}", path.display()))?
    };
    Ok(file.jobs)
}

/// Parses one line of trigger input. Blank lines yield `None`.
pub fn parse_trigger_line(line: &str) -> Result<Option<Trigger>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .with_context(|| format!("invalid trigger: {line}"))
}
