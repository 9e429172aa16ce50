//! Application-level orchestration.
//!
//! `machine` is the pure run state machine; `controller` drives it on a single async loop,
//! executing its effects; `post_process` handles auto-save and exports once a run completes.
//! UI/CLI layers only talk to the controller through commands and events.

mod controller;
mod machine;
mod post_process;

pub(crate) use controller::{run_controller, Campaign, UiCommand};
pub(crate) use post_process::{process_run_completion, snapshot_from_report};
