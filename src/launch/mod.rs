//! Launch dispatcher.
//!
//! The only part of the crate that reaches outside the process: it opens a chat link or runs
//! the share command for one recipient and reports what happened. It keeps no state between
//! attempts.

mod system;
pub mod url;

pub use system::{CommandOpener, CommandShare};

use crate::error::LaunchError;
use crate::model::{Attachment, Recipient};
use futures::future::BoxFuture;
use std::sync::Arc;

/// Whether the user explicitly asked for this attempt.
///
/// User-initiated opens bypass the automatic-open guard, the same way a click handler may
/// open a window a timer callback may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchContext {
    Automatic,
    UserInitiated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The chat app (or share command) was presented; expect the user to come back.
    Opened,
    /// Could not be presented automatically; a manual open is needed.
    Blocked(String),
    /// Presented but refused or cancelled.
    Failed(String),
}

impl LaunchOutcome {
    fn from_result(res: Result<(), LaunchError>) -> Self {
        match res {
            Ok(()) => LaunchOutcome::Opened,
            Err(e) if e.is_blocked() => LaunchOutcome::Blocked(e.to_string()),
            Err(e) => LaunchOutcome::Failed(e.to_string()),
        }
    }

    pub fn is_opened(&self) -> bool {
        matches!(self, LaunchOutcome::Opened)
    }
}

pub trait UrlOpener: Send + Sync {
    fn open<'a>(
        &'a self,
        url: &'a str,
        context: LaunchContext,
    ) -> BoxFuture<'a, Result<(), LaunchError>>;
}

pub trait ShareCapability: Send + Sync {
    fn share<'a>(
        &'a self,
        attachment: &'a Attachment,
        message: &'a str,
        number: &'a str,
    ) -> BoxFuture<'a, Result<(), LaunchError>>;
}

/// One attempt: everything the dispatcher needs, owned so it can cross a spawn.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub recipient: Recipient,
    pub message: String,
    pub attachment: Option<Attachment>,
    pub messaging_host: String,
    pub country_code: String,
    pub context: LaunchContext,
}

impl LaunchRequest {
    pub fn number(&self) -> String {
        url::format_number(&self.recipient.address, &self.country_code)
    }

    pub fn target_url(&self) -> Result<String, LaunchError> {
        let number = self.number();
        if number.is_empty() {
            return Err(LaunchError::InvalidAddress);
        }
        Ok(url::target_url(&self.messaging_host, &number, &self.message))
    }
}

#[derive(Clone)]
pub struct LaunchDispatcher {
    opener: Arc<dyn UrlOpener>,
    share: Option<Arc<dyn ShareCapability>>,
}

impl LaunchDispatcher {
    pub fn new(opener: Arc<dyn UrlOpener>, share: Option<Arc<dyn ShareCapability>>) -> Self {
        Self { opener, share }
    }

    pub async fn launch(&self, req: &LaunchRequest) -> LaunchOutcome {
        let outcome = LaunchOutcome::from_result(self.try_launch(req).await);
        match &outcome {
            LaunchOutcome::Opened => {
                tracing::info!(recipient = %req.recipient.id, context = ?req.context, "chat opened")
            }
            LaunchOutcome::Blocked(reason) => {
                tracing::warn!(recipient = %req.recipient.id, %reason, "launch blocked")
            }
            LaunchOutcome::Failed(reason) => {
                tracing::warn!(recipient = %req.recipient.id, %reason, "launch failed")
            }
        }
        outcome
    }

    async fn try_launch(&self, req: &LaunchRequest) -> Result<(), LaunchError> {
        if let Some(attachment) = req.attachment.as_ref() {
            // Attachments never silently degrade to a text-only link.
            let share = self.share.as_ref().ok_or(LaunchError::NoShareCapability)?;
            return share.share(attachment, &req.message, &req.number()).await;
        }
        let url = req.target_url()?;
        self.opener.open(&url, req.context).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Opener that records every call and answers from a fixed script.
    pub(crate) struct FakeOpener {
        pub calls: Mutex<Vec<(String, LaunchContext)>>,
        pub block_automatic: bool,
        pub reject: bool,
    }

    impl FakeOpener {
        pub fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                block_automatic: false,
                reject: false,
            }
        }

        pub fn calls(&self) -> Vec<(String, LaunchContext)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl UrlOpener for FakeOpener {
        fn open<'a>(
            &'a self,
            url: &'a str,
            context: LaunchContext,
        ) -> BoxFuture<'a, Result<(), LaunchError>> {
            Box::pin(async move {
                self.calls.lock().unwrap().push((url.to_string(), context));
                if self.block_automatic && context == LaunchContext::Automatic {
                    return Err(LaunchError::Suppressed("test".into()));
                }
                if self.reject {
                    return Err(LaunchError::Rejected {
                        program: "fake".into(),
                        status: "exit status: 1".into(),
                    });
                }
                Ok(())
            })
        }
    }

    pub(crate) struct FakeShare {
        pub shared: Mutex<Vec<String>>,
        pub cancel: bool,
    }

    impl ShareCapability for FakeShare {
        fn share<'a>(
            &'a self,
            attachment: &'a Attachment,
            _message: &'a str,
            number: &'a str,
        ) -> BoxFuture<'a, Result<(), LaunchError>> {
            Box::pin(async move {
                self.shared
                    .lock()
                    .unwrap()
                    .push(format!("{}:{number}", attachment.path.display()));
                if self.cancel {
                    Err(LaunchError::Rejected {
                        program: "share".into(),
                        status: "cancelled".into(),
                    })
                } else {
                    Ok(())
                }
            })
        }
    }
}
