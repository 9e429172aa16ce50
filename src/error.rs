use std::path::PathBuf;
use thiserror::Error;

/// Why an attempt to hand off to the chat app did not complete.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("automatic open suppressed: {0}")]
    Suppressed(String),
    #[error("no share capability configured for attachments")]
    NoShareCapability,
    #[error("{program} is not available: {source}")]
    Unavailable {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}")]
    Rejected { program: String, status: String },
    #[error("recipient has no usable address")]
    InvalidAddress,
}

impl LaunchError {
    /// Blocked attempts never reached the user; rejected ones did and were refused.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self,
            LaunchError::Suppressed(_)
                | LaunchError::NoShareCapability
                | LaunchError::Unavailable { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("no local data directory available")]
    NoDataDir,
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid campaign file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}:{line}: {reason}", path.display())]
    Csv {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}
