//! Text summary builder for CLI output.
//!
//! Formats human-readable lines for a finished run and for the saved campaign.

use crate::model::{RunReport, SendStatus, StatusCounts};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn counts_line(counts: &StatusCounts) -> String {
    format!(
        "Sent {} / Failed {} / Skipped {} / Pending {} (of {})",
        counts.sent,
        counts.failed,
        counts.skipped,
        counts.pending,
        counts.total()
    )
}

/// Build a text summary from a completed run.
pub(crate) fn build_text_summary(report: &RunReport) -> TextSummary {
    let mut lines = Vec::new();
    if !report.timestamp_utc.is_empty() {
        lines.push(format!("Finished: {}", report.timestamp_utc));
    }
    lines.push(counts_line(&report.counts));

    if let Some(t) = report.time_away.as_ref() {
        lines.push(format!(
            "Time in chat: avg {:.1} med {:.1} p25 {:.1} p75 {:.1} s ({} samples)",
            t.mean_secs, t.median_secs, t.p25_secs, t.p75_secs, t.samples
        ));
    }

    let needs_attention: Vec<String> = report
        .recipients
        .iter()
        .filter(|r| r.selected && r.status == SendStatus::Failed)
        .map(|r| format!("  {} <{}>", r.display_name, r.address))
        .collect();
    if !needs_attention.is_empty() {
        lines.push("Failed:".to_string());
        lines.extend(needs_attention);
    }

    TextSummary { lines }
}
