use crate::model::RunReport;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;
use std::time::Duration;

// Global clipboard manager channel - initialized once on first use
static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

fn report_path(report: &RunReport, ext: &str) -> Result<PathBuf> {
    let stamp: String = report
        .timestamp_utc
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let stamp = if stamp.is_empty() { "latest".to_string() } else { stamp };
    Ok(crate::storage::data_dir()
        .context("no data directory for exports")?
        .join("reports")
        .join(format!("report-{stamp}.{ext}")))
}

/// Export the report as JSON under the data directory.
pub fn export_report_json(report: &RunReport) -> Result<PathBuf> {
    let path = report_path(report, "json")?;
    crate::storage::export_json(&path, report)?;
    Ok(path)
}

/// Export the report as CSV under the data directory.
pub fn export_report_csv(report: &RunReport) -> Result<PathBuf> {
    let path = report_path(report, "csv")?;
    crate::storage::export_csv(&path, report)?;
    Ok(path)
}

/// Initialize the clipboard manager thread if not already initialized.
/// Each copy keeps its clipboard instance alive for a while so clipboard managers on Linux
/// get a chance to read it.
fn init_clipboard_manager() -> Result<&'static std_mpsc::Sender<String>> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();

        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                if let Ok(mut clipboard) = Clipboard::new() {
                    if clipboard.set_text(&text).is_ok() {
                        std::thread::sleep(Duration::from_secs(2));
                    }
                }
            }
        });

        tx
    });

    CLIPBOARD_SENDER
        .get()
        .ok_or_else(|| anyhow::anyhow!("Failed to initialize clipboard manager"))
}

/// Queue `text` for the clipboard without blocking the UI thread.
pub fn copy_to_clipboard(text: &str) -> Result<()> {
    let sender = init_clipboard_manager()?;
    sender
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))?;
    Ok(())
}
