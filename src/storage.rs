//! Campaign persistence, CSV import and run-report exports.

use crate::error::StorageError;
use crate::model::{CampaignSnapshot, Recipient, RecipientId, RunReport};
use rand::RngCore;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "chat-campaign";

pub fn data_dir() -> Result<PathBuf, StorageError> {
    Ok(dirs::data_local_dir()
        .ok_or(StorageError::NoDataDir)?
        .join(APP_DIR))
}

pub fn default_state_path() -> Result<PathBuf, StorageError> {
    Ok(data_dir()?.join("campaign.json"))
}

pub fn log_path() -> Result<PathBuf, StorageError> {
    Ok(data_dir()?.join("chat-campaign.log"))
}

/// Random recipient id: 16 lowercase hex digits.
pub fn gen_recipient_id() -> RecipientId {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    format!("{:016x}", u64::from_le_bytes(b))
}

fn read(path: &Path) -> Result<String, StorageError> {
    std::fs::read_to_string(path).map_err(|source| StorageError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, contents: &str) -> Result<(), StorageError> {
    let write_err = |source| StorageError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    // Write beside the target and rename so a crash never leaves half a snapshot.
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents).map_err(write_err)?;
    std::fs::rename(&tmp, path).map_err(write_err)
}

/// Load the snapshot at `path`; `Ok(None)` when nothing was saved yet.
pub fn load_snapshot(path: &Path) -> Result<Option<CampaignSnapshot>, StorageError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| StorageError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

/// Persist `snapshot`, stamping `saved_at`. The attachment is not part of the snapshot.
pub fn save_snapshot(path: &Path, snapshot: &CampaignSnapshot) -> Result<(), StorageError> {
    let mut stamped = snapshot.clone();
    stamped.saved_at = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    let json = serde_json::to_string_pretty(&stamped).map_err(|source| StorageError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    write(path, &json)?;
    tracing::info!(path = %path.display(), recipients = stamped.recipients.len(), "snapshot saved");
    Ok(())
}

/// Load recipients from a `.csv` file, a snapshot, or a bare JSON array of recipients.
pub fn load_recipients(path: &Path) -> Result<Vec<Recipient>, StorageError> {
    let text = read(path)?;
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if is_csv {
        return parse_csv(path, &text);
    }
    let parse_err = |source| StorageError::Parse {
        path: path.to_path_buf(),
        source,
    };
    if text.trim_start().starts_with('[') {
        serde_json::from_str(&text).map_err(parse_err)
    } else {
        let snapshot: CampaignSnapshot = serde_json::from_str(&text).map_err(parse_err)?;
        Ok(snapshot.recipients)
    }
}

/// Parse `name,address[,selected]` lines. A leading header row and blank lines are skipped.
pub fn parse_csv(path: &Path, text: &str) -> Result<Vec<Recipient>, StorageError> {
    let mut out = Vec::new();
    let mut seen_first = false;
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields = split_csv_line(line);
        if !seen_first {
            seen_first = true;
            if is_header(&fields) {
                continue;
            }
        }
        let csv_err = |reason: &str| StorageError::Csv {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: reason.to_string(),
        };
        let name = fields.first().map(String::as_str).unwrap_or("");
        let address = fields.get(1).map(String::as_str).unwrap_or("").trim();
        if address.is_empty() {
            return Err(csv_err("missing address"));
        }
        let name = if name.trim().is_empty() { address } else { name };
        let mut recipient = Recipient::new(gen_recipient_id(), name, address);
        if let Some(flag) = fields.get(2) {
            recipient.selected = match flag.trim().to_ascii_lowercase().as_str() {
                "" | "1" | "true" | "yes" | "y" => true,
                "0" | "false" | "no" | "n" => false,
                _ => return Err(csv_err("selected must be true or false")),
            };
        }
        out.push(recipient);
    }
    Ok(out)
}

fn is_header(fields: &[String]) -> bool {
    let first = fields.first().map(|f| f.trim().to_ascii_lowercase());
    let second = fields.get(1).map(|f| f.trim().to_ascii_lowercase());
    matches!(first.as_deref(), Some("name" | "display_name"))
        && matches!(second.as_deref(), Some("address" | "phone" | "number"))
}

fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                cur.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut cur)),
            _ => cur.push(c),
        }
    }
    fields.push(cur);
    fields
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn export_json(path: &Path, report: &RunReport) -> Result<(), StorageError> {
    let json = serde_json::to_string_pretty(report).map_err(|source| StorageError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    write(path, &json)
}

pub fn export_csv(path: &Path, report: &RunReport) -> Result<(), StorageError> {
    let mut out = String::from("id,name,address,status\n");
    for r in &report.recipients {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_field(&r.id),
            csv_field(&r.display_name),
            csv_field(&r.address),
            r.status.as_str()
        ));
    }
    write(path, &out)
}
