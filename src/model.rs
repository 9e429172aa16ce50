use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MESSAGING_HOST: &str = "wa.me";
pub const DEFAULT_TEMPLATE: &str = "Hi {name}!";

pub type RecipientId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    #[default]
    Pending,
    Sent,
    Failed,
    Skipped,
}

impl SendStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SendStatus::Pending => "pending",
            SendStatus::Sent => "sent",
            SendStatus::Failed => "failed",
            SendStatus::Skipped => "skipped",
        }
    }
}

fn default_selected() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub display_name: String,
    pub address: String,
    #[serde(default)]
    pub status: SendStatus,
    #[serde(default = "default_selected")]
    pub selected: bool,
}

impl Recipient {
    pub fn new(id: impl Into<RecipientId>, display_name: &str, address: &str) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.trim().to_string(),
            address: address.trim().to_string(),
            status: SendStatus::Pending,
            selected: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Dispatch, wait for focus to return, count down, advance.
    #[default]
    Automatic,
    /// Every advance needs an explicit mark-sent/skip from the user.
    Manual,
}

fn default_host() -> String {
    DEFAULT_MESSAGING_HOST.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(with = "humantime_serde")]
    pub inter_delay: Duration,
    #[serde(default)]
    pub country_code: String,
    #[serde(default = "default_host")]
    pub messaging_host: String,
    #[serde(default)]
    pub mode: RunMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            inter_delay: Duration::from_secs(3),
            country_code: String::new(),
            messaging_host: default_host(),
            mode: RunMode::Automatic,
        }
    }
}

/// Opaque file handed to the share capability. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
}

/// Persisted campaign: what survives a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSnapshot {
    #[serde(default)]
    pub saved_at: String,
    pub template: String,
    #[serde(default)]
    pub config: RunConfig,
    #[serde(default)]
    pub recipients: Vec<Recipient>,
}

impl Default for CampaignSnapshot {
    fn default() -> Self {
        Self {
            saved_at: String::new(),
            template: DEFAULT_TEMPLATE.to_string(),
            config: RunConfig::default(),
            recipients: Vec::new(),
        }
    }
}

/// Flat view of the run state machine, safe to hand to presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    Dispatching,
    WaitingForReturn,
    ManualTriggerNeeded,
    Countdown,
    Paused,
    Completed,
}

impl RunPhase {
    pub fn label(self) -> &'static str {
        match self {
            RunPhase::Idle => "Idle",
            RunPhase::Dispatching => "Opening…",
            RunPhase::WaitingForReturn => "Waiting for return",
            RunPhase::ManualTriggerNeeded => "Manual open needed",
            RunPhase::Countdown => "Countdown",
            RunPhase::Paused => "Paused",
            RunPhase::Completed => "Completed",
        }
    }

    pub fn is_running(self) -> bool {
        matches!(
            self,
            RunPhase::Dispatching
                | RunPhase::WaitingForReturn
                | RunPhase::ManualTriggerNeeded
                | RunPhase::Countdown
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl StatusCounts {
    pub fn total(&self) -> usize {
        self.pending + self.sent + self.failed + self.skipped
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub phase: RunPhase,
    /// -1 before the run starts, `total` once it completed.
    pub position: isize,
    pub total: usize,
    pub current: Option<Recipient>,
    pub countdown: Option<f64>,
    #[serde(with = "humantime_serde")]
    pub inter_delay: Duration,
    pub mode: RunMode,
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Clone, Serialize)]
pub enum RunEvent {
    Status(Box<RunStatus>),
    CountdownTick { remaining: f64 },
    Info(InfoEvent),
    RunCompleted {
        // Box to keep RunEvent small; the report carries the whole queue.
        report: Box<RunReport>,
    },
}

/// Structured info events emitted by the controller and consumed by UI/CLI layers.
#[derive(Debug, Clone, Serialize)]
pub enum InfoEvent {
    Message(String),
    Opened { name: String },
    LaunchBlocked { name: String, reason: String },
    LaunchFailed { name: String, reason: String },
    Saved { path: PathBuf },
}

impl InfoEvent {
    /// Render a human-readable message for UI/CLI layers.
    pub fn to_message(&self) -> String {
        match self {
            InfoEvent::Message(msg) => msg.clone(),
            InfoEvent::Opened { name } => {
                format!("Opened chat for {name}; switch back here when done")
            }
            InfoEvent::LaunchBlocked { name, reason } => {
                format!("Could not open chat for {name} automatically ({reason}); press o to open")
            }
            InfoEvent::LaunchFailed { name, reason } => {
                format!("Opening chat for {name} failed ({reason}); press o to retry")
            }
            InfoEvent::Saved { path } => format!("Saved: {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeAwaySummary {
    pub samples: usize,
    pub mean_secs: f64,
    pub median_secs: f64,
    pub p25_secs: f64,
    pub p75_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default)]
    pub timestamp_utc: String,
    pub template: String,
    pub config: RunConfig,
    pub counts: StatusCounts,
    #[serde(default)]
    pub time_away: Option<TimeAwaySummary>,
    pub recipients: Vec<Recipient>,
}
