//! Saída colorida no terminal para runs, lotes e handoffs de dispatch.
//!
//! Usa a crate `console` para estilização. As cores seguem os grupos de
//! status: pendente em amarelo, em execução em ciano, concluído em verde,
//! erro ou cancelado em vermelho.

use console::Style;

use crate::dispatch::RunHandoff;
use crate::manager::BatchReport;
use crate::state_machine::{JobRun, RunStatus};

/// Imprime a atividade do motor no stdout.
pub struct RunPrinter {
    // Estilo verde para runs concluídos.
    green: Style,
    // Estilo vermelho para erros e cancelamentos.
    red: Style,
    // Estilo amarelo para runs pendentes.
    yellow: Style,
    cyan: Style,
    dim: Style,
}

impl Default for RunPrinter {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            cyan: Style::new().cyan(),
            dim: Style::new().dim(),
        }
    }
}

impl RunPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    fn style_for(&self, status: RunStatus) -> &Style {
        match status {
            RunStatus::Completed => &self.green,
            RunStatus::Errored | RunStatus::Cancelled => &self.red,
            RunStatus::InProgress => &self.cyan,
            RunStatus::Unstarted => &self.dim,
            _ => &self.yellow,
        }
    }

    fn symbol(status: RunStatus) -> &'static str {
        match status {
            RunStatus::Completed => "✓",
            RunStatus::Errored | RunStatus::Cancelled => "✗",
            RunStatus::InProgress => "▶",
            RunStatus::Unstarted => "·",
            _ => "…",
        }
    }

    /// Resumo de um run em uma linha.
    pub fn format_run(&self, run: &JobRun) -> String {
        let style = self.style_for(run.status);
        let step = match run.next_task_index() {
            Some(i) => format!("task {}/{}", i + 1, run.task_runs.len()),
            None => format!("{} tasks done", run.task_runs.len()),
        };
        let height = run
            .observed_height
            .map(|h| format!(" seen@{h}"))
            .unwrap_or_default();
        format!(
            "{} run {} {} ({step}, created@{}{height})",
            style.apply_to(Self::symbol(run.status)),
            run.id,
            style.apply_to(run.status),
            run.creation_height,
        )
    }

    pub fn print_run(&self, run: &JobRun) {
        println!("  {}", self.format_run(run));
        for task in &run.task_runs {
            let style = self.style_for(task.status);
            println!(
                "      {} #{} {} {}",
                style.apply_to(Self::symbol(task.status)),
                task.position,
                task.task_spec.task_type,
                self.dim.apply_to(task.status),
            );
        }
    }

    pub fn print_report(&self, label: &str, report: &BatchReport) {
        let failed = if report.failed > 0 {
            self.red.apply_to(format!("{} failed", report.failed)).to_string()
        } else {
            format!("{} failed", report.failed)
        };
        println!(
            "  {} {label}: {} resumed, {} still pending, {} finished, {} unchanged, {} skipped, {failed}",
            self.yellow.apply_to("↻"),
            report.resumed,
            report.still_pending,
            report.finished,
            report.unchanged,
            report.skipped,
        );
    }

    pub fn print_handoff(&self, handoff: &RunHandoff) {
        println!(
            "  {} dispatch run {} -> {}",
            self.cyan.apply_to("→"),
            handoff.run_id,
            handoff.task_type.as_deref().unwrap_or("<none>"),
        );
    }

    pub fn print_error(&self, context: &str, err: &dyn std::fmt::Display) {
        println!("  {} {context}: {err}", self.red.apply_to("✗"));
    }

    pub fn heading(&self, text: &str) {
        println!();
        println!("{}", self.green.apply_to(format!("─── {text} ───")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{NewRun, RunBuilder, RunPolicy};
    use crate::state_machine::{Initiator, JobSpec, RunResult, TaskSpec};

    #[test]
    fn format_run_mentions_status_and_step() {
        console::set_colors_enabled(false);
        let spec = JobSpec::new(vec![TaskSpec::new("ethtx").with_confirmations(2), TaskSpec::new("noop")]);
        let run = RunBuilder::new(RunPolicy::default())
            .build(&spec, NewRun::new(Initiator::web(), RunResult::default(), 9))
            .unwrap();

        let line = RunPrinter::new().format_run(&run);
        assert!(line.contains("pending_confirmations"), "{line}");
        assert!(line.contains("task 1/2"), "{line}");
        assert!(line.contains("created@9"), "{line}");
        assert!(line.contains(&run.id.to_string()), "{line}");
    }
}
