//! CLI output formatting

use crate::core::ExecutionStatus;
use crate::execution::ExecutionEvent;
use crate::persistence::ExecutionSummary;
use crate::protocol::{ExecutionRecord, ExecutionState};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub use console::style;

pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Spinner for open-ended waits such as polling a remote
pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(template) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        spinner.set_style(template);
    }
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format a pipeline status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

/// Format a remote execution state for display
pub fn format_state(state: ExecutionState) -> String {
    let label = state.to_string().to_uppercase();
    match state {
        ExecutionState::Queued => style(label).dim().to_string(),
        ExecutionState::Running => style(label).yellow().to_string(),
        ExecutionState::Completed => style(label).green().to_string(),
        ExecutionState::Failed => style(label).red().to_string(),
        ExecutionState::Cancelled => style(label).yellow().to_string(),
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// One history line
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    let icon = match summary.status {
        ExecutionStatus::Completed => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        _ => INFO,
    };
    let id = summary.execution_id.to_string();
    let duration = summary
        .duration()
        .and_then(|d| d.to_std().ok())
        .map(format_duration)
        .unwrap_or_else(|| "-".to_string());

    format!(
        "{}{} - {} - {} ({}/{} completed, {} failed, {} skipped) - {}",
        icon,
        style(short_id(&id)).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.completed_steps,
        summary.total_steps,
        summary.failed_steps,
        summary.skipped_steps,
        style(duration).dim()
    )
}

/// One line per pipeline event, `None` for events that are too chatty to print
pub fn format_execution_event(event: &ExecutionEvent, verbose: bool) -> Option<String> {
    let line = match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
            total_steps,
        } => format!(
            "{}Starting pipeline {} ({} steps, {})",
            ROCKET,
            style(pipeline_name).bold(),
            total_steps,
            style(short_id(&execution_id.to_string())).dim()
        ),
        ExecutionEvent::StepStarted { step_id, attempt } => {
            if *attempt > 1 {
                format!("{}{} (attempt {})", SPINNER, style(step_id).cyan(), attempt)
            } else {
                format!("{}{}", SPINNER, style(step_id).cyan())
            }
        }
        ExecutionEvent::StepProgress { step_id, percent } => {
            if !verbose {
                return None;
            }
            format!("  {} {}%", style(step_id).dim(), percent)
        }
        ExecutionEvent::StepLog { step_id, line } => {
            if !verbose {
                return None;
            }
            format!("  {} {}", style(format!("[{}]", step_id)).dim(), line)
        }
        ExecutionEvent::StepRetrying {
            step_id,
            attempt,
            max_attempts,
            error,
        } => format!(
            "{}{} failed, retrying (attempt {}/{}): {}",
            WARN,
            style(step_id).yellow(),
            attempt,
            max_attempts,
            style(error).dim()
        ),
        ExecutionEvent::StepCompleted { step_id, .. } => format!("{}{}", CHECK, style(step_id).green()),
        ExecutionEvent::StepFailed { step_id, error } => {
            format!("{}{}: {}", CROSS, style(step_id).red(), style(error).dim())
        }
        ExecutionEvent::StepSkipped { step_id, reason } => {
            format!("{}{} ({})", SKIP, style(step_id).dim(), reason)
        }
        ExecutionEvent::PipelineCompleted { execution_id, status } => format!(
            "{}Pipeline ({}) {}",
            INFO,
            style(short_id(&execution_id.to_string())).dim(),
            format_status(*status)
        ),
    };
    Some(line)
}

/// Multi-line view of a remote execution
pub fn format_execution_record(record: &ExecutionRecord) -> String {
    let mut lines = vec![
        format!("  ID: {}", style(&record.id).cyan()),
        format!("  Agent: {}", style(&record.agent).bold()),
        format!("  State: {}", format_state(record.state)),
        format!("  Started: {}", style(record.start_time.to_rfc3339()).dim()),
    ];
    if let Some(end) = record.end_time {
        lines.push(format!("  Ended: {}", style(end.to_rfc3339()).dim()));
        if let Ok(duration) = end.signed_duration_since(record.start_time).to_std() {
            lines.push(format!("  Duration: {}", style(format_duration(duration)).dim()));
        }
    }
    if let Some(code) = record.exit_code {
        lines.push(format!("  Exit code: {}", code));
    }
    if let Some(error) = &record.error {
        lines.push(format!("  Error: {}", style(error).red()));
    }
    lines.join("\n")
}

/// Truncate long output to `max_lines`
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn test_format_output_truncates() {
        let output = "a\nb\nc\nd";
        assert_eq!(format_output(output, 4), output);
        let truncated = format_output(output, 2);
        assert!(truncated.starts_with("a\nb\n"));
        assert!(truncated.ends_with("(2 more lines)"));
    }

    #[test]
    fn test_chatty_events_hidden_unless_verbose() {
        let event = ExecutionEvent::StepLog {
            step_id: "build".to_string(),
            line: "compiling".to_string(),
        };
        assert!(format_execution_event(&event, false).is_none());
        assert!(format_execution_event(&event, true).unwrap().contains("compiling"));
    }
}
