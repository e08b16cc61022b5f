//! Scripted walk through a run's lifecycle against the in-memory store.

use anyhow::{Context, Result};
use serde_json::json;

use jobrunner::config::EngineConfig;
use jobrunner::dispatch::{ChannelSink, RunHandoff};
use jobrunner::manager::JobManager;
use jobrunner::state_machine::{Initiator, JobSpec, RunId, RunResult, RunStatus, TaskSpec};
use jobrunner::store::{MemoryStore, RunStore, Versioned};
use jobrunner::ui::RunPrinter;

type DemoManager = JobManager<MemoryStore, ChannelSink>;

/// Plays the part of the executor: parks the run's current task on a bridge.
fn park_on_bridge(manager: &DemoManager, run_id: &RunId) -> Result<()> {
    let Versioned { value: mut run, version } = manager
        .store()
        .find_run_unscoped(run_id)?
        .context("demo run vanished")?;
    if let Some(task) = run.next_task_run_mut() {
        task.advance(RunStatus::PendingBridge)?;
    }
    run.set_status(RunStatus::PendingBridge)?;
    manager.store().update_run(&run, version)?;
    Ok(())
}

fn show(manager: &DemoManager, printer: &RunPrinter, run_id: &RunId) -> Result<()> {
    let run = manager
        .store()
        .find_run_unscoped(run_id)?
        .context("demo run vanished")?
        .value;
    printer.print_run(&run);
    Ok(())
}

fn flush(handoffs: &mut tokio::sync::mpsc::UnboundedReceiver<RunHandoff>, printer: &RunPrinter) {
    while let Ok(handoff) = handoffs.try_recv() {
        printer.print_handoff(&handoff);
    }
}

pub fn run_demo(config: &EngineConfig) -> Result<()> {
    let printer = RunPrinter::new();
    let (sink, mut handoffs) = ChannelSink::new();
    let manager = JobManager::new(MemoryStore::new(), sink, config);

    let oracle = JobSpec::new(vec![
        TaskSpec::new("ethlog").with_confirmations(3),
        TaskSpec::new("price_bridge"),
    ]);
    let transfer = JobSpec::new(vec![TaskSpec::new("ethtx").requiring_connection()]);
    manager.store().create_spec(oracle.clone())?;
    manager.store().create_spec(transfer.clone())?;

    printer.heading("execute");
    let run = manager.execute_job(&oracle.id, Initiator::web(), RunResult::default(), 10)?;
    let stuck = manager.execute_job(&transfer.id, Initiator::web(), RunResult::default(), 10)?;
    printer.print_run(&run);
    printer.print_run(&stuck);

    printer.heading("archive spec mid-flight");
    manager.store().archive_spec(&oracle.id)?;
    if let Err(err) = manager.execute_job(&oracle.id, Initiator::web(), RunResult::default(), 11) {
        printer.print_error("new run refused", &err);
    }

    printer.heading("new heads");
    for height in [12, 13] {
        let report = manager.resume_confirming_runs(height)?;
        printer.print_report(&format!("head {height}"), &report);
        flush(&mut handoffs, &printer);
    }
    show(&manager, &printer, &run.id)?;

    printer.heading("connection restored");
    let report = manager.resume_connecting_runs()?;
    printer.print_report("connected", &report);
    flush(&mut handoffs, &printer);

    printer.heading("bridge callback");
    let mut parked = manager
        .store()
        .find_run_unscoped(&run.id)?
        .context("demo run vanished")?;
    if let Some(task) = parked.value.next_task_run_mut() {
        task.apply_result(&RunResult::completed(serde_json::Map::new()))?;
    }
    manager.store().update_run(&parked.value, parked.version)?;
    park_on_bridge(&manager, &run.id)?;
    show(&manager, &printer, &run.id)?;

    let answer = json!({"price": "1832.55", "source": "demo"});
    let data = answer.as_object().cloned().unwrap_or_default();
    let done = manager.resume_pending_task(&run.id, RunResult::completed(data))?;
    printer.print_run(&done);

    printer.heading("cancel");
    let cancelled = manager.cancel_run(&stuck.id)?;
    printer.print_run(&cancelled);
    let again = manager.cancel_run(&stuck.id)?;
    println!("  second cancel leaves run {}", again.status);

    Ok(())
}
