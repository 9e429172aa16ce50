//! Post-run processing utilities.
//!
//! Handles auto-save and report exports after a run completes.

use crate::cli::RunArgs;
use crate::model::{CampaignSnapshot, RunReport};
use crate::storage;
use std::path::{Path, PathBuf};

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub export_messages: Vec<String>,
    pub auto_saved_path: Option<PathBuf>,
}

pub(crate) fn snapshot_from_report(report: &RunReport) -> CampaignSnapshot {
    CampaignSnapshot {
        saved_at: String::new(),
        template: report.template.clone(),
        config: report.config.clone(),
        recipients: report.recipients.clone(),
    }
}

/// Process a completed run: auto-save the campaign and write any requested exports.
pub(crate) fn process_run_completion(
    args: &RunArgs,
    state_path: &Path,
    report: &RunReport,
) -> ProcessedRun {
    let mut export_messages = Vec::new();

    let auto_saved_path = if args.auto_save {
        match storage::save_snapshot(state_path, &snapshot_from_report(report)) {
            Ok(()) => Some(state_path.to_path_buf()),
            Err(e) => {
                tracing::warn!(error = %e, "auto-save failed");
                export_messages.push(format!("Auto-save failed: {e:#}"));
                None
            }
        }
    } else {
        None
    };

    if let Some(export_path) = args.export_json.as_deref() {
        match storage::export_json(export_path, report) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }
    if let Some(export_path) = args.export_csv.as_deref() {
        match storage::export_csv(export_path, report) {
            Ok(_) => export_messages.push(format!("Exported CSV: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export CSV failed: {e:#}")),
        }
    }

    ProcessedRun {
        export_messages,
        auto_saved_path,
    }
}
