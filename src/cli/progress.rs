// src/cli/progress.rs — Terminal progress renderer for research runs

use crate::core::types::{Phase, ProgressEvent};

/// One line of progress text, or `None` for events not worth printing.
pub fn format_event(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::PhaseChanged { phase } => match phase {
            Phase::Finalizing => Some("[finalize] synthesizing report...".into()),
            _ => None,
        },
        ProgressEvent::IterationStart {
            iteration,
            max_iterations,
        } => Some(format!("[iter {}/{}] planning...", iteration, max_iterations)),
        ProgressEvent::AnglesPlanned { iteration, angles } => Some(format!(
            "[iter {}]   {} angle(s): {}",
            iteration,
            angles.len(),
            angles.join("; ")
        )),
        ProgressEvent::TaskFailed { angle, error } => {
            Some(format!("[task] '{}' failed: {}", angle, error))
        }
        ProgressEvent::IterationEnd {
            iteration,
            confidence,
            decision,
            cost_so_far,
        } => Some(format!(
            "[iter {}] confidence={:.2} -> {:<12} (${:.2})",
            iteration, confidence, decision, cost_so_far,
        )),
        ProgressEvent::Complete {
            iterations,
            confidence,
            cost,
            termination,
        } => Some(format!(
            "[done] confidence={:.2} iterations={} cost=${:.2} ({})",
            confidence, iterations, cost, termination,
        )),
    }
}

/// Build a progress callback that writes formatted output to stderr, keeping
/// stdout clean for the report.
pub fn terminal_progress() -> impl Fn(ProgressEvent) + Send + Sync + 'static {
    move |event| {
        if let Some(line) = format_event(&event) {
            eprintln!("{}", line);
        }
    }
}
