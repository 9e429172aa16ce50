//! Process-spawning launch backends.

use super::{LaunchContext, ShareCapability, UrlOpener};
use crate::error::LaunchError;
use crate::model::Attachment;
use futures::future::BoxFuture;
use std::process::Stdio;
use tokio::process::Command;

/// Opens URLs by running a program with the URL as its last argument.
#[derive(Debug, Clone)]
pub struct CommandOpener {
    program: String,
    args: Vec<String>,
    require_display: bool,
}

impl CommandOpener {
    /// The desktop's default URL handler.
    pub fn platform_default() -> Self {
        #[cfg(target_os = "macos")]
        let (program, args) = ("open", vec![]);
        #[cfg(target_os = "windows")]
        let (program, args) = ("rundll32", vec!["url.dll,FileProtocolHandler".to_string()]);
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        let (program, args) = ("xdg-open", vec![]);
        Self {
            program: program.to_string(),
            args,
            require_display: true,
        }
    }

    /// A user-supplied command line such as `termux-open-url` or `firefox --new-tab`.
    /// The user vouches for it, so it is never suppressed for lack of a display.
    pub fn custom(command_line: &str) -> Self {
        let (program, args) = split_command(command_line);
        Self {
            program,
            args,
            require_display: false,
        }
    }
}

impl UrlOpener for CommandOpener {
    fn open<'a>(
        &'a self,
        url: &'a str,
        context: LaunchContext,
    ) -> BoxFuture<'a, Result<(), LaunchError>> {
        Box::pin(async move {
            if context == LaunchContext::Automatic
                && self.require_display
                && !has_graphical_session()
            {
                return Err(LaunchError::Suppressed("no graphical session".into()));
            }
            run(&self.program, &self.args, &[url]).await
        })
    }
}

/// Shares an attachment by running `<command> <file> <message> <number>`.
/// Exit status 0 means the share sheet was accepted.
#[derive(Debug, Clone)]
pub struct CommandShare {
    program: String,
    args: Vec<String>,
}

impl CommandShare {
    pub fn new(command_line: &str) -> Self {
        let (program, args) = split_command(command_line);
        Self { program, args }
    }
}

impl ShareCapability for CommandShare {
    fn share<'a>(
        &'a self,
        attachment: &'a Attachment,
        message: &'a str,
        number: &'a str,
    ) -> BoxFuture<'a, Result<(), LaunchError>> {
        Box::pin(async move {
            let path = attachment.path.to_string_lossy().into_owned();
            run(&self.program, &self.args, &[path.as_str(), message, number]).await
        })
    }
}

fn split_command(command_line: &str) -> (String, Vec<String>) {
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let program = parts.next().unwrap_or_default();
    (program, parts.collect())
}

async fn run(program: &str, args: &[String], extra: &[&str]) -> Result<(), LaunchError> {
    let status = Command::new(program)
        .args(args)
        .args(extra)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|source| LaunchError::Unavailable {
            program: program.to_string(),
            source,
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(LaunchError::Rejected {
            program: program.to_string(),
            status: status.to_string(),
        })
    }
}

#[cfg(any(
    target_os = "linux",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
))]
fn has_graphical_session() -> bool {
    ["DISPLAY", "WAYLAND_DISPLAY"]
        .iter()
        .any(|k| std::env::var_os(k).is_some_and(|v| !v.is_empty()))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
)))]
fn has_graphical_session() -> bool {
    true
}
