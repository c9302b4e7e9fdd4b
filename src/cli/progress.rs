// src/cli/progress.rs — Terminal progress renderer for closed-loop and live runs

use crate::core::types::LoopEvent;

/// One line per event worth showing. Non-matching attempts are silent.
pub fn format_event(event: &LoopEvent) -> Option<String> {
    match event {
        LoopEvent::IssueStart { issue_index, label } => {
            Some(format!("[issue {}] {} started", issue_index, label))
        }
        LoopEvent::AttemptRecorded {
            issue_index,
            strategy_id,
            ordinal,
            is_match: true,
        } => Some(format!(
            "[issue {}]   match by {} on attempt {}",
            issue_index, strategy_id, ordinal
        )),
        LoopEvent::AttemptRecorded { .. } => None,
        LoopEvent::IssueEnd {
            issue_index,
            matched,
            attempts,
            stop_reason,
        } => {
            let outcome = if *matched { "matched" } else { "unmatched" };
            let reason = stop_reason
                .map(|r| format!(" ({})", r))
                .unwrap_or_default();
            Some(format!(
                "[issue {}] {} after {} attempts{}",
                issue_index, outcome, attempts, reason
            ))
        }
        LoopEvent::BatchComplete {
            issues,
            total_attempts,
            total_matches,
            cancelled,
        } => Some(format!(
            "[done] issues={} attempts={} matches={}{}",
            issues,
            total_attempts,
            total_matches,
            if *cancelled { " (cancelled)" } else { "" }
        )),
        LoopEvent::Tick {
            tick,
            virtual_issue,
            fused,
            candidates,
        } => Some(format!(
            "[tick {}] issue {}: {} (+{} candidates)",
            tick,
            virtual_issue,
            fused,
            candidates.saturating_sub(1)
        )),
    }
}

/// Build a progress callback that writes to stderr, keeping stdout for reports.
pub fn terminal_progress() -> impl Fn(LoopEvent) + Send + Sync + 'static {
    move |event| {
        if let Some(line) = format_event(&event) {
            eprintln!("{}", line);
        }
    }
}
