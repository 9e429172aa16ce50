use crate::foreground::VisibilityTracker;
use crate::launch::{CommandOpener, CommandShare, LaunchContext, LaunchDispatcher, ShareCapability};
use crate::model::{
    Attachment, CampaignSnapshot, InfoEvent, Recipient, RunEvent, RunMode, RunPhase, RunStatus,
    SendStatus,
};
use crate::queue::Queue;
use crate::orchestrator::{self, Campaign, UiCommand};
use crate::storage;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "chat-campaign",
    version,
    about = "Open a chat link for each contact in a queue, paced and resumable",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the campaign (default)
    Run(RunArgs),
    /// Import recipients from a CSV file (name,address[,selected]) into the campaign
    Import(ImportArgs),
    /// Print the link each selected recipient would get, without opening anything
    Preview(PreviewArgs),
    /// Print status counts of the saved campaign
    Status(StateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct StateArgs {
    /// Campaign file (defaults to the local data directory)
    #[arg(long)]
    pub state: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Load recipients from a CSV or JSON file instead of the saved campaign
    #[arg(long)]
    pub queue: Option<PathBuf>,

    /// Campaign file (defaults to the local data directory)
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Message template; `{name}` is replaced by the recipient's name
    #[arg(long)]
    pub template: Option<String>,

    /// Pause between returning to the terminal and the next open
    #[arg(long)]
    pub delay: Option<humantime::Duration>,

    /// Country calling code prepended to local numbers (digits only)
    #[arg(long)]
    pub country_code: Option<String>,

    /// Messaging host for chat links
    #[arg(long)]
    pub host: Option<String>,

    /// Manual mode: never advance without an explicit mark-sent or skip
    #[arg(long)]
    pub manual: bool,

    /// Send this file to every recipient via --share-command
    #[arg(long)]
    pub attachment: Option<PathBuf>,

    /// Command run as `<cmd> <file> <message> <number>` to share an attachment
    #[arg(long)]
    pub share_command: Option<String>,

    /// Command used to open chat links (defaults to the desktop handler). It must exit once
    /// the link is handed over: returning to the terminal before it exits is not counted, so
    /// press `b` afterwards
    #[arg(long)]
    pub opener: Option<String>,

    /// Line-oriented text mode (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Export the run report as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export the run report as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,

    /// Start the run as soon as the app launches
    #[arg(long)]
    pub start: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ImportArgs {
    /// CSV file with `name,address[,selected]` rows
    pub csv: PathBuf,

    /// Campaign file (defaults to the local data directory)
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Append to the existing recipients instead of replacing them
    #[arg(long)]
    pub append: bool,
}

#[derive(Debug, Args, Clone)]
pub struct PreviewArgs {
    /// Campaign file (defaults to the local data directory)
    #[arg(long)]
    pub state: Option<PathBuf>,

    /// Only show the first N recipients
    #[arg(long)]
    pub limit: Option<usize>,

    /// Only show recipients with this status (pending, sent, failed, skipped)
    #[arg(long, value_parser = parse_status)]
    pub only: Option<SendStatus>,
}

fn parse_status(s: &str) -> Result<SendStatus, String> {
    match s.to_ascii_lowercase().as_str() {
        "pending" => Ok(SendStatus::Pending),
        "sent" => Ok(SendStatus::Sent),
        "failed" => Ok(SendStatus::Failed),
        "skipped" => Ok(SendStatus::Skipped),
        other => Err(format!("unknown status {other:?}")),
    }
}

/// Everything a front-end needs to drive a run.
pub(crate) struct Session {
    pub campaign: Campaign,
    pub state_path: PathBuf,
    pub dispatcher: LaunchDispatcher,
}

pub async fn run(args: Cli) -> Result<()> {
    match args.command {
        Some(Command::Import(a)) => {
            crate::logging::init_stderr();
            import(a)
        }
        Some(Command::Preview(a)) => {
            crate::logging::init_stderr();
            preview(a)
        }
        Some(Command::Status(a)) => {
            crate::logging::init_stderr();
            status(a)
        }
        Some(Command::Run(a)) => run_campaign(a).await,
        None => run_campaign(args.run).await,
    }
}

async fn run_campaign(args: RunArgs) -> Result<()> {
    if !args.text {
        #[cfg(feature = "tui")]
        {
            if let Ok(path) = storage::log_path() {
                crate::logging::init_file(&path);
            }
            let session = prepare_session(&args)?;
            return crate::tui::run(args, session).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            crate::logging::init_stderr();
            let session = prepare_session(&args)?;
            return run_text(args, session).await;
        }
    }

    crate::logging::init_stderr();
    let session = prepare_session(&args)?;
    run_text(args, session).await
}

fn resolve_state_path(state: Option<&Path>) -> Result<PathBuf> {
    match state {
        Some(p) => Ok(p.to_path_buf()),
        None => storage::default_state_path().context("cannot locate the campaign file; pass --state"),
    }
}

fn load_snapshot_or_default(path: &Path) -> Result<CampaignSnapshot> {
    Ok(storage::load_snapshot(path)
        .with_context(|| format!("failed to load campaign {}", path.display()))?
        .unwrap_or_default())
}

/// Layer CLI overrides onto the saved snapshot.
pub(crate) fn build_snapshot(args: &RunArgs, mut snapshot: CampaignSnapshot) -> Result<CampaignSnapshot> {
    if let Some(queue) = args.queue.as_deref() {
        snapshot.recipients = storage::load_recipients(queue)
            .with_context(|| format!("failed to load queue {}", queue.display()))?;
    }
    if let Some(template) = args.template.as_ref() {
        snapshot.template = template.clone();
    }
    if let Some(delay) = args.delay {
        snapshot.config.inter_delay = Duration::from(delay);
    }
    if let Some(code) = args.country_code.as_ref() {
        let code = code.trim().trim_start_matches('+');
        if !code.chars().all(|c| c.is_ascii_digit()) {
            anyhow::bail!("--country-code must contain digits only, got {code:?}");
        }
        snapshot.config.country_code = code.to_string();
    }
    if let Some(host) = args.host.as_ref() {
        snapshot.config.messaging_host = host.clone();
    }
    if args.manual {
        snapshot.config.mode = RunMode::Manual;
    }
    Ok(snapshot)
}

pub(crate) fn build_dispatcher(args: &RunArgs) -> LaunchDispatcher {
    let opener = match args.opener.as_deref() {
        Some(cmd) => CommandOpener::custom(cmd),
        None => CommandOpener::platform_default(),
    };
    let share = args
        .share_command
        .as_deref()
        .map(|cmd| Arc::new(CommandShare::new(cmd)) as Arc<dyn ShareCapability>);
    LaunchDispatcher::new(Arc::new(opener), share)
}

fn prepare_session(args: &RunArgs) -> Result<Session> {
    let state_path = resolve_state_path(args.state.as_deref())?;
    let snapshot = build_snapshot(args, load_snapshot_or_default(&state_path)?)?;
    if let Some(path) = args.attachment.as_deref() {
        if !path.is_file() {
            anyhow::bail!("attachment {} does not exist", path.display());
        }
    }
    let attachment = args.attachment.clone().map(|path| Attachment { path });
    tracing::info!(
        recipients = snapshot.recipients.len(),
        state = %state_path.display(),
        "campaign loaded"
    );
    Ok(Session {
        campaign: Campaign::from_snapshot(snapshot, attachment),
        state_path,
        dispatcher: build_dispatcher(args),
    })
}

fn import(args: ImportArgs) -> Result<()> {
    let state_path = resolve_state_path(args.state.as_deref())?;
    let mut snapshot = load_snapshot_or_default(&state_path)?;
    let imported = storage::load_recipients(&args.csv)
        .with_context(|| format!("failed to import {}", args.csv.display()))?;
    let count = imported.len();
    let mut queue = if args.append {
        Queue::new(std::mem::take(&mut snapshot.recipients))
    } else {
        Queue::default()
    };
    for r in imported {
        queue.push(r);
    }
    snapshot.recipients = queue.into_recipients();
    storage::save_snapshot(&state_path, &snapshot).context("failed to save campaign")?;
    println!("Imported {count} recipients into {}", state_path.display());
    Ok(())
}

fn preview(args: PreviewArgs) -> Result<()> {
    let state_path = resolve_state_path(args.state.as_deref())?;
    let campaign = Campaign::from_snapshot(load_snapshot_or_default(&state_path)?, None);
    let limit = args.limit.unwrap_or(usize::MAX);
    for r in campaign.queue.filtered(args.only).into_iter().take(limit) {
        let url = campaign
            .request_for(r, LaunchContext::Automatic)
            .target_url()
            .unwrap_or_else(|e| format!("<{e}>"));
        println!("{}\t{}\t{}", r.display_name, r.status.as_str(), url);
    }
    Ok(())
}

fn status(args: StateArgs) -> Result<()> {
    let state_path = resolve_state_path(args.state.as_deref())?;
    let Some(snapshot) = storage::load_snapshot(&state_path)? else {
        println!("No campaign saved at {}", state_path.display());
        return Ok(());
    };
    let campaign = Campaign::from_snapshot(snapshot.clone(), None);
    println!("Campaign: {}", state_path.display());
    if !snapshot.saved_at.is_empty() {
        println!("Saved:    {}", snapshot.saved_at);
    }
    println!("Template: {}", snapshot.template);
    println!(
        "{}",
        crate::text_summary::counts_line(&campaign.queue.status_counts())
    );
    Ok(())
}

/// Input from the stdin reader thread.
enum TextInput {
    Command(UiCommand),
    Load(PathBuf),
    Back,
    List,
    Help,
    Invalid(String),
}

const TEXT_HELP: &str = "Commands: s start/resume, p pause, o open manually, m mark sent, \
f mark failed, x skip, b or empty line: I'm back, j <n> jump (paused), d <delay> set delay, \
mode auto|manual, t <n> toggle selection, all / none select every row, rm <n> remove, \
add <name>,<number>, load <file>, r reset, l list, q quit";

fn parse_text_input(line: &str, last: Option<&RunStatus>) -> TextInput {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return TextInput::Back;
    };
    let arg = words.next();
    let number = || arg.and_then(|a| a.parse::<usize>().ok()).filter(|n| *n > 0);
    match cmd {
        "s" | "start" => TextInput::Command(UiCommand::Start),
        "p" | "pause" => TextInput::Command(UiCommand::Pause),
        "o" | "open" => TextInput::Command(UiCommand::ManualOpen),
        "m" | "sent" => TextInput::Command(UiCommand::MarkSent),
        "f" | "failed" => TextInput::Command(UiCommand::MarkFailed),
        "x" | "skip" => TextInput::Command(UiCommand::Skip),
        "r" | "reset" => TextInput::Command(UiCommand::Reset),
        "b" | "back" => TextInput::Back,
        "l" | "list" => TextInput::List,
        "q" | "quit" => TextInput::Command(UiCommand::Quit),
        "?" | "h" | "help" => TextInput::Help,
        "j" | "jump" => match number() {
            Some(n) => TextInput::Command(UiCommand::JumpTo(n - 1)),
            None => TextInput::Invalid("usage: j <position>".into()),
        },
        "t" | "toggle" => {
            let id = number().and_then(|n| last.and_then(|s| s.recipients.get(n - 1)));
            match id {
                Some(r) => TextInput::Command(UiCommand::ToggleSelected(r.id.clone())),
                None => TextInput::Invalid("usage: t <row from list>".into()),
            }
        }
        "d" | "delay" => match arg.and_then(parse_delay) {
            Some(d) => TextInput::Command(UiCommand::SetDelay(d)),
            None => TextInput::Invalid("usage: d <delay>, e.g. d 2.5 or d 1500ms".into()),
        },
        "all" => TextInput::Command(UiCommand::SelectAll(true)),
        "none" => TextInput::Command(UiCommand::SelectAll(false)),
        "rm" | "remove" => {
            let id = number().and_then(|n| last.and_then(|s| s.recipients.get(n - 1)));
            match id {
                Some(r) => TextInput::Command(UiCommand::Remove(r.id.clone())),
                None => TextInput::Invalid("usage: rm <row from list>".into()),
            }
        }
        "add" => {
            let rest = line.trim_start()[cmd.len()..].trim();
            match rest.split_once(',') {
                Some((name, number)) if !number.trim().is_empty() => TextInput::Command(
                    UiCommand::Add(Recipient::new(storage::gen_recipient_id(), name, number)),
                ),
                _ => TextInput::Invalid("usage: add <name>,<number>".into()),
            }
        }
        "load" => match arg {
            Some(path) => TextInput::Load(PathBuf::from(path)),
            None => TextInput::Invalid("usage: load <file.csv|file.json>".into()),
        },
        "mode" => match arg {
            Some("auto" | "automatic") => TextInput::Command(UiCommand::SetMode(RunMode::Automatic)),
            Some("manual") => TextInput::Command(UiCommand::SetMode(RunMode::Manual)),
            _ => TextInput::Invalid("usage: mode auto|manual".into()),
        },
        other => TextInput::Invalid(format!("unknown command {other:?}; ? for help")),
    }
}

/// Bare numbers are seconds; anything else goes through humantime.
fn parse_delay(arg: &str) -> Option<Duration> {
    match arg.parse::<f64>() {
        Ok(secs) => Duration::try_from_secs_f64(secs).ok(),
        Err(_) => humantime::parse_duration(arg).ok(),
    }
}

fn status_line(s: &RunStatus) -> String {
    let who = s
        .current
        .as_ref()
        .map(|r| format!(" | {} <{}>", r.display_name, r.address))
        .unwrap_or_default();
    let pos = if s.position < 0 {
        "-".to_string()
    } else {
        format!("{}", (s.position as usize + 1).min(s.total))
    };
    format!("[{}] {}/{}{}", s.phase.label(), pos, s.total, who)
}

async fn run_text(args: RunArgs, session: Session) -> Result<()> {
    let Session {
        campaign,
        state_path,
        dispatcher,
    } = session;
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();

    let tracker = VisibilityTracker::new();
    let fg = tracker.clone();
    let start = args.start;
    let controller = tokio::spawn(async move {
        orchestrator::run_controller(campaign, dispatcher, &fg, evt_tx, cmd_rx, start).await
    });

    // Plain thread: a pending blocking read must not hold up runtime shutdown.
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let _ = out_tx.send(OutputLine::Stderr(TEXT_HELP.to_string()));
    let mut last: Option<RunStatus> = None;
    let mut stdin_open = true;

    loop {
        tokio::select! {
            ev = evt_rx.recv() => {
                let Some(ev) = ev else { break };
                match ev {
                    RunEvent::Status(s) => {
                        let changed = last.as_ref().map_or(true, |l| {
                            l.phase != s.phase || l.position != s.position || l.total != s.total
                        });
                        if changed && s.phase != RunPhase::Countdown {
                            let _ = out_tx.send(OutputLine::Stderr(status_line(&s)));
                        }
                        last = Some(*s);
                    }
                    RunEvent::CountdownTick { remaining } => {
                        if remaining > 0.0 && remaining.fract() == 0.0 {
                            let _ = out_tx.send(OutputLine::Stderr(format!("Next in {remaining:.0}s")));
                        }
                    }
                    RunEvent::Info(info) => {
                        let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                    }
                    RunEvent::RunCompleted { report } => {
                        for line in crate::text_summary::build_text_summary(&report).lines {
                            let _ = out_tx.send(OutputLine::Stdout(line));
                        }
                        let processed = orchestrator::process_run_completion(&args, &state_path, &report);
                        if let Some(path) = processed.auto_saved_path {
                            let _ = out_tx.send(OutputLine::Stderr(InfoEvent::Saved { path }.to_message()));
                        }
                        for msg in processed.export_messages {
                            let _ = out_tx.send(OutputLine::Stderr(msg));
                        }
                    }
                }
            }
            line = line_rx.recv(), if stdin_open => {
                let Some(line) = line else {
                    stdin_open = false;
                    let _ = cmd_tx.send(UiCommand::Quit);
                    continue;
                };
                match parse_text_input(&line, last.as_ref()) {
                    TextInput::Command(cmd) => {
                        let _ = cmd_tx.send(cmd);
                    }
                    TextInput::Back => tracker.report_return(),
                    TextInput::Load(path) => match storage::load_recipients(&path) {
                        Ok(list) => {
                            let _ = out_tx.send(OutputLine::Stderr(format!(
                                "Loaded {} recipients from {}",
                                list.len(),
                                path.display()
                            )));
                            let _ = cmd_tx.send(UiCommand::LoadQueue(list));
                        }
                        Err(e) => {
                            let _ = out_tx.send(OutputLine::Stderr(format!("Load failed: {e:#}")));
                        }
                    },
                    TextInput::Help => {
                        let _ = out_tx.send(OutputLine::Stderr(TEXT_HELP.to_string()));
                    }
                    TextInput::Invalid(msg) => {
                        let _ = out_tx.send(OutputLine::Stderr(msg));
                    }
                    TextInput::List => {
                        if let Some(s) = last.as_ref() {
                            for (i, r) in s.recipients.iter().enumerate() {
                                let mark = if r.selected { "x" } else { " " };
                                let _ = out_tx.send(OutputLine::Stdout(format!(
                                    "{:>3} [{mark}] {:<8} {} <{}>",
                                    i + 1,
                                    r.status.as_str(),
                                    r.display_name,
                                    r.address
                                )));
                            }
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = cmd_tx.send(UiCommand::Quit);
            }
        }
    }

    let campaign = controller
        .await
        .context("controller task failed")?
        .context("campaign run failed")?;
    if args.auto_save {
        match storage::save_snapshot(&state_path, &campaign.snapshot()) {
            Ok(()) => {
                let _ = out_tx.send(OutputLine::Stderr(
                    InfoEvent::Saved { path: state_path }.to_message(),
                ));
            }
            Err(e) => {
                let _ = out_tx.send(OutputLine::Stderr(format!("Save failed: {e:#}")));
            }
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
