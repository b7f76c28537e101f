//! CLI output formatting

use crate::{
    artifacts::ArtifactRecord,
    core::{RunStatus, StepState},
    execution::ExecutionEvent,
    persistence::RunSummary,
};
use chrono::{DateTime, Utc};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "# ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(bar_style) =
        ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(bar_style.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Succeeded {
            started_at,
            completed_at,
            ..
        } => format!(
            "{} {}",
            style("SUCCEEDED").green(),
            style(format_elapsed(*started_at, *completed_at)).dim()
        ),
        StepState::Failed {
            started_at,
            failed_at,
            ..
        } => format!(
            "{} {}",
            style("FAILED").red(),
            style(format_elapsed(*started_at, *failed_at)).dim()
        ),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

fn format_elapsed(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    format_duration((to - from).to_std().unwrap_or_default())
}

/// Format a run status for display
pub fn format_status(status: RunStatus) -> String {
    match status {
        RunStatus::Pending => style("PENDING").dim().to_string(),
        RunStatus::Running => style("RUNNING").yellow().to_string(),
        RunStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        RunStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// One-line summary of a run from history
pub fn format_run_summary(summary: &RunSummary) -> String {
    let status_icon = match summary.status {
        RunStatus::Succeeded => CHECK,
        RunStatus::Failed => CROSS,
        RunStatus::Running => SPINNER,
        RunStatus::Pending => INFO,
    };

    format!(
        "{} {} - {} - {}@{} - {} ({}/{}) - {}",
        status_icon,
        style(short_id(&summary.run_id.to_string())).dim(),
        style(&summary.workflow).bold(),
        summary.branch,
        style(short_sha(&summary.commit)).cyan(),
        format_status(summary.status),
        summary.succeeded_steps,
        summary.total_steps,
        style(summary.started_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// One-line summary of an archived artifact
pub fn format_artifact(record: &ArtifactRecord) -> String {
    format!(
        "{} {} {} - {} file(s), {} - {}@{} (run {}) - {}",
        PACKAGE,
        style(short_id(&record.id.to_string())).dim(),
        style(&record.name).bold(),
        record.files.len(),
        format_size(record.size_bytes),
        record.branch,
        style(short_sha(&record.commit)).cyan(),
        style(short_id(&record.run_id.to_string())).dim(),
        style(record.created_at.format("%Y-%m-%d %H:%M:%S")).dim()
    )
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::RunStarted {
            run_id,
            workflow,
            branch,
            commit,
            total_steps,
        } => format!(
            "{} Starting {} for {}@{} ({} steps, run {})",
            ROCKET,
            style(workflow).bold(),
            branch,
            style(short_sha(commit)).cyan(),
            total_steps,
            style(short_id(&run_id.to_string())).dim()
        ),
        ExecutionEvent::Provisioned { services, toolchains } => {
            let mut parts = Vec::new();
            if !services.is_empty() {
                parts.push(format!("services: {}", services.join(", ")));
            }
            if !toolchains.is_empty() {
                parts.push(format!("toolchains: {}", toolchains.join(", ")));
            }
            if parts.is_empty() {
                parts.push("nothing to provision".to_string());
            }
            format!("{} Environment ready ({})", CHECK, style(parts.join("; ")).dim())
        }
        ExecutionEvent::StepStarted { step, index, total } => format!(
            "{} {} {}",
            SPINNER,
            style(format!("[{}/{}]", index + 1, total)).dim(),
            style(step).cyan()
        ),
        ExecutionEvent::StepOutput { step, output } => {
            format!("{} Output from {}:\n{}", INFO, style(step).dim(), output)
        }
        ExecutionEvent::StepSucceeded { step } => format!("{} {}", CHECK, style(step).green()),
        ExecutionEvent::StepFailed {
            step,
            error,
            continue_on_error,
        } => {
            if *continue_on_error {
                format!("{} {}: {} (continuing)", WARN, style(step).yellow(), style(error).dim())
            } else {
                format!("{} {}: {}", CROSS, style(step).red(), style(error).dim())
            }
        }
        ExecutionEvent::StepSkipped { step, reason } => {
            format!("{} {} ({})", SKIP, style(step).dim(), reason)
        }
        ExecutionEvent::RunCompleted { run_id, status, error } => {
            let status_str = match status {
                RunStatus::Succeeded => format!("{} completed", style("successfully").green()),
                RunStatus::Failed => match error {
                    Some(error) => format!("{}: {}", style("failed").red(), error),
                    None => style("failed").red().to_string(),
                },
                other => format_status(*other),
            };
            format!(
                "{} Run {} {}",
                INFO,
                style(short_id(&run_id.to_string())).dim(),
                status_str
            )
        }
    }
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.trim_end().to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

pub fn format_size(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = KIB * 1024;
    if bytes >= MIB {
        format!("{:.1} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} B", bytes)
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn short_sha(sha: &str) -> &str {
    sha.get(..7).unwrap_or(sha)
}

/// Prints execution events above a progress bar
pub struct ConsoleReporter {
    progress: Mutex<Option<ProgressBar>>,

    /// Lines of step output to show, 0 to hide it
    output_lines: usize,
}

impl ConsoleReporter {
    pub fn new(stream: bool) -> Self {
        Self {
            progress: Mutex::new(None),
            output_lines: if stream { usize::MAX } else { 0 },
        }
    }

    pub fn handle(&self, event: &ExecutionEvent) {
        let mut progress = self.progress.lock();

        match event {
            ExecutionEvent::RunStarted { total_steps, .. } => {
                println!("{}", format_execution_event(event));
                *progress = Some(create_progress_bar(*total_steps));
                return;
            }
            ExecutionEvent::StepOutput { output, .. } => {
                if self.output_lines > 0 {
                    print_line(progress.as_ref(), &format_output(output, self.output_lines));
                }
                return;
            }
            ExecutionEvent::RunCompleted { .. } => {
                if let Some(bar) = progress.take() {
                    bar.finish_and_clear();
                }
                println!("{}", format_execution_event(event));
                return;
            }
            _ => {}
        }

        print_line(progress.as_ref(), &format_execution_event(event));
        if let Some(bar) = progress.as_ref() {
            match event {
                ExecutionEvent::StepStarted { step, .. } => bar.set_message(step.clone()),
                ExecutionEvent::StepSucceeded { .. }
                | ExecutionEvent::StepFailed { .. }
                | ExecutionEvent::StepSkipped { .. } => bar.inc(1),
                _ => {}
            }
        }
    }
}

fn print_line(progress: Option<&ProgressBar>, line: &str) {
    match progress {
        Some(bar) => bar.println(line),
        None => println!("{}", line),
    }
}
