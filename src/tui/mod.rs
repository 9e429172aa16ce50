mod export;
mod help;
mod state;

use crate::cli::{RunArgs, Session};
use crate::foreground::VisibilityTracker;
use crate::model::{InfoEvent, RunEvent, RunMode, RunPhase, RunReport, SendStatus};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{
        self, DisableFocusChange, EnableFocusChange, Event, KeyCode, KeyEventKind, KeyModifiers,
    },
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Gauge, Paragraph, Row, Table, TableState, Tabs, Wrap},
    Terminal,
};
use state::{push_wrapped_status_kv, UiState};
use std::path::PathBuf;
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const DELAY_STEP: Duration = Duration::from_millis(500);

/// Static inputs for the UI thread.
struct UiContext {
    args: RunArgs,
    state_path: PathBuf,
    template: String,
    config: crate::model::RunConfig,
    tracker: VisibilityTracker,
}

pub async fn run(args: RunArgs, session: Session) -> Result<()> {
    // Unbounded channels avoid backpressure between the UI thread and the driver.
    let (event_tx, event_rx) = mpsc::unbounded_channel::<RunEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    let tracker = VisibilityTracker::new();

    let Session {
        campaign,
        state_path,
        dispatcher,
    } = session;
    let ctx = UiContext {
        args: args.clone(),
        state_path: state_path.clone(),
        template: campaign.template.clone(),
        config: campaign.config.clone(),
        tracker: tracker.clone(),
    };

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle = std::thread::spawn(move || run_threaded(ctx, event_rx, cmd_tx));

    let res = orchestrator::run_controller(
        campaign,
        dispatcher,
        &tracker,
        event_tx,
        cmd_rx,
        args.start,
    )
    .await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    let campaign = res?;
    if args.auto_save {
        crate::storage::save_snapshot(&state_path, &campaign.snapshot())
            .context("failed to save campaign")?;
        eprintln!("Saved: {}", state_path.display());
    }
    Ok(())
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    ctx: UiContext,
    mut event_rx: UnboundedReceiver<RunEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();
    // Terminals without focus reporting ignore this; `b` covers them.
    execute!(stdout, EnableFocusChange).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        template: ctx.template.clone(),
        config: ctx.config.clone(),
        auto_save: ctx.args.auto_save,
        ..Default::default()
    };
    state.push_info("Press s to start, ? for help".into());

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();
    let mut table_rows = 20usize;

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            match ev {
                RunEvent::RunCompleted { report } => {
                    handle_run_completed(&ctx, &mut state, *report);
                }
                other => apply_event(&mut state, other),
            }
        }

        if last_tick.elapsed() >= tick_rate {
            if let Ok(size) = terminal.size() {
                // Tabs (3) + status/info rows + table borders and header.
                table_rows = (size.height as usize).saturating_sub(9).max(1);
            }
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if !event::poll(Duration::from_millis(10)).unwrap_or(false) {
            continue;
        }
        let k = match event::read() {
            Ok(Event::FocusGained) => {
                state.focused = true;
                ctx.tracker.set_visible(true);
                continue;
            }
            Ok(Event::FocusLost) => {
                state.focused = false;
                ctx.tracker.set_visible(false);
                continue;
            }
            Ok(Event::Key(k)) => k,
            _ => continue,
        };
        if k.kind != KeyEventKind::Press {
            continue;
        }
        let send = |cmd: UiCommand| {
            let _ = cmd_tx.send(cmd);
        };
        match (k.modifiers, k.code) {
            (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                send(UiCommand::Quit);
                break Ok(());
            }
            (_, KeyCode::Char('s')) => send(UiCommand::Start),
            (_, KeyCode::Char('p')) => send(UiCommand::Pause),
            (_, KeyCode::Char('o')) => send(UiCommand::ManualOpen),
            (_, KeyCode::Char('m')) => send(UiCommand::MarkSent),
            (_, KeyCode::Char('f')) => send(UiCommand::MarkFailed),
            (_, KeyCode::Char('x')) => send(UiCommand::Skip),
            (_, KeyCode::Char('b')) => ctx.tracker.report_return(),
            (_, KeyCode::Char('r')) => {
                send(UiCommand::Reset);
                state.last_report = None;
                state.push_info("Reset: every recipient is pending again".into());
            }
            (_, KeyCode::Char('a')) => {
                let next = match state.config.mode {
                    RunMode::Automatic => RunMode::Manual,
                    RunMode::Manual => RunMode::Automatic,
                };
                send(UiCommand::SetMode(next));
            }
            (_, KeyCode::Char('+')) | (_, KeyCode::Char('=')) => {
                send(UiCommand::SetDelay(state.config.inter_delay + DELAY_STEP));
            }
            (_, KeyCode::Char('-')) => {
                send(UiCommand::SetDelay(
                    state.config.inter_delay.saturating_sub(DELAY_STEP),
                ));
            }
            (_, KeyCode::Up) | (_, KeyCode::Char('k')) => {
                if state.tab == 0 {
                    state.move_highlight(-1, table_rows);
                }
            }
            (_, KeyCode::Down) | (_, KeyCode::Char('j')) => {
                if state.tab == 0 {
                    state.move_highlight(1, table_rows);
                }
            }
            (_, KeyCode::Enter) => {
                if state.tab == 0 {
                    match state.highlighted_position() {
                        Some(pos) if state.phase() == RunPhase::Paused => {
                            send(UiCommand::JumpTo(pos))
                        }
                        Some(_) => state.push_info("Pause the run before jumping".into()),
                        None => state.push_info("That recipient is not selected".into()),
                    }
                }
            }
            (_, KeyCode::Char(' ')) => {
                if state.tab == 0 {
                    if let Some(r) = state.highlighted_recipient() {
                        send(UiCommand::ToggleSelected(r.id.clone()));
                    }
                }
            }
            (_, KeyCode::Char('d')) => {
                if state.tab == 0 {
                    if let Some(r) = state.highlighted_recipient() {
                        send(UiCommand::Remove(r.id.clone()));
                    }
                }
            }
            (_, KeyCode::Char('A')) => send(UiCommand::SelectAll(true)),
            (_, KeyCode::Char('N')) => send(UiCommand::SelectAll(false)),
            (_, KeyCode::Char('y')) => match state.link_for_copy() {
                Some((name, link)) => match export::copy_to_clipboard(&link) {
                    Ok(_) => state.push_info(format!("✓ Copied link for {name}")),
                    Err(e) => state.push_info(format!("Clipboard copy failed: {e:#}")),
                },
                None => state.push_info("No recipient with a usable number".into()),
            },
            (_, KeyCode::Char('e')) | (_, KeyCode::Char('c')) if state.tab == 1 => {
                let Some(report) = state.last_report.as_ref() else {
                    state.push_info("No completed run to export yet".into());
                    continue;
                };
                let (kind, res) = if k.code == KeyCode::Char('e') {
                    ("JSON", export::export_report_json(report))
                } else {
                    ("CSV", export::export_report_csv(report))
                };
                match res {
                    Ok(p) => {
                        state.last_exported_path = Some(p.to_string_lossy().to_string());
                        state.push_info(format!("Exported {kind}: {}", p.display()));
                    }
                    Err(e) => state.push_info(format!("{kind} export failed: {e:#}")),
                }
            }
            (_, KeyCode::Tab) => {
                state.tab = (state.tab + 1) % 3;
            }
            (_, KeyCode::Char('?')) => {
                state.tab = 2;
            }
            _ => {}
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, DisableFocusChange, LeaveAlternateScreen).ok();
    res
}

fn apply_event(state: &mut UiState, ev: RunEvent) {
    match ev {
        RunEvent::Status(s) => state.apply_status(*s),
        RunEvent::CountdownTick { remaining } => {
            state.countdown = Some(remaining);
        }
        RunEvent::Info(info) => {
            if let InfoEvent::Opened { .. } = info {
                // Most openers steal focus; the terminal will report it back.
                state.focused = false;
            }
            state.push_info(info.to_message());
        }
        RunEvent::RunCompleted { .. } => {}
    }
}

fn handle_run_completed(ctx: &UiContext, state: &mut UiState, report: RunReport) {
    let processed = orchestrator::process_run_completion(&ctx.args, &ctx.state_path, &report);
    let mut msg = format!(
        "Run complete: {}",
        crate::text_summary::counts_line(&report.counts)
    );
    state.push_info(msg);
    if let Some(path) = processed.auto_saved_path {
        state.push_info(InfoEvent::Saved { path }.to_message());
    }
    for m in processed.export_messages {
        state.push_info(m);
    }
    state.last_report = Some(report);
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Queue"),
        Line::from("Report"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title("chat-campaign"))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_queue(chunks[1], f, state),
        1 => draw_report(chunks[1], f, state),
        _ => help::draw_help(chunks[1], f),
    }
}

fn status_color(status: SendStatus) -> Color {
    match status {
        SendStatus::Pending => Color::Gray,
        SendStatus::Sent => Color::Green,
        SendStatus::Failed => Color::Red,
        SendStatus::Skipped => Color::Yellow,
    }
}

fn phase_color(phase: RunPhase) -> Color {
    match phase {
        RunPhase::Idle | RunPhase::Paused => Color::Gray,
        RunPhase::Dispatching | RunPhase::WaitingForReturn => Color::Cyan,
        RunPhase::ManualTriggerNeeded => Color::Magenta,
        RunPhase::Countdown => Color::Yellow,
        RunPhase::Completed => Color::Green,
    }
}

fn draw_queue(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(5), Constraint::Length(3)].as_ref())
        .split(area);
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(62), Constraint::Percentage(38)].as_ref())
        .split(rows[0]);

    draw_table(cols[0], f, state);
    draw_status(cols[1], f, state);

    let info = Paragraph::new(state.info.clone())
        .block(Block::default().borders(Borders::ALL).title("Info"))
        .wrap(Wrap { trim: true });
    f.render_widget(info, rows[1]);
}

fn draw_table(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let current_id = state
        .status
        .as_ref()
        .and_then(|s| s.current.as_ref())
        .map(|r| r.id.as_str());

    let rows: Vec<Row> = state
        .recipients()
        .iter()
        .map(|r| {
            let marker = if Some(r.id.as_str()) == current_id {
                "▶"
            } else {
                " "
            };
            let selected = if r.selected { "[x]" } else { "[ ]" };
            let style = if r.selected {
                Style::default()
            } else {
                Style::default().fg(Color::DarkGray)
            };
            Row::new(vec![
                Cell::from(marker),
                Cell::from(selected),
                Cell::from(r.display_name.clone()),
                Cell::from(r.address.clone()),
                Cell::from(Span::styled(
                    r.status.as_str(),
                    Style::default().fg(status_color(r.status)),
                )),
            ])
            .style(style)
        })
        .collect();

    let total = state.recipients().len();
    let selected = state.status.as_ref().map_or(0, |s| s.total);
    let table = Table::new(
        rows,
        [
            Constraint::Length(1),
            Constraint::Length(3),
            Constraint::Percentage(40),
            Constraint::Percentage(35),
            Constraint::Length(8),
        ],
    )
    .header(
        Row::new(vec!["", "", "Name", "Address", "Status"])
            .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD)),
    )
    .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Recipients ({selected} selected of {total})")),
    );

    let mut table_state = TableState::default()
        .with_offset(state.scroll_offset)
        .with_selected(if total == 0 {
            None
        } else {
            Some(state.highlighted)
        });
    f.render_stateful_widget(table, area, &mut table_state);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(3)].as_ref())
        .split(area);

    let phase = state.phase();
    let mut lines: Vec<Line<'static>> = vec![Line::from(vec![
        Span::styled("Phase:", Style::default().fg(Color::Gray)),
        Span::raw(" "),
        Span::styled(
            phase.label(),
            Style::default()
                .fg(phase_color(phase))
                .add_modifier(Modifier::BOLD),
        ),
    ])];

    if let Some(s) = state.status.as_ref() {
        let pos = if s.position < 0 {
            "-".to_string()
        } else {
            ((s.position as usize + 1).min(s.total)).to_string()
        };
        push_wrapped_status_kv(
            &mut lines,
            "Position",
            &format!("{pos} / {}", s.total),
            area.width,
        );
        if let Some(r) = s.current.as_ref() {
            push_wrapped_status_kv(
                &mut lines,
                "Current",
                &format!("{} <{}>", r.display_name, r.address),
                area.width,
            );
        }
        let counts = crate::queue::Queue::new(s.recipients.clone()).status_counts();
        push_wrapped_status_kv(
            &mut lines,
            "Done",
            &format!(
                "{} sent, {} failed, {} skipped, {} pending",
                counts.sent, counts.failed, counts.skipped, counts.pending
            ),
            area.width,
        );
    }

    let mode = match state.config.mode {
        RunMode::Automatic => "automatic",
        RunMode::Manual => "manual",
    };
    push_wrapped_status_kv(&mut lines, "Mode", mode, area.width);
    push_wrapped_status_kv(
        &mut lines,
        "Delay",
        &format!("{:.1}s", state.config.inter_delay.as_secs_f64()),
        area.width,
    );
    push_wrapped_status_kv(
        &mut lines,
        "Auto-save",
        if state.auto_save { "on" } else { "off" },
        area.width,
    );
    let hint = match phase {
        RunPhase::WaitingForReturn if state.focused => {
            "Switch to the chat, then come back (or press b)"
        }
        RunPhase::WaitingForReturn => "Waiting for you to come back",
        RunPhase::ManualTriggerNeeded => "Press o to open, m when sent, x to skip",
        RunPhase::Paused if state.status.as_ref().is_some_and(|s| s.current.is_none()) => {
            "Every recipient is handled; press s to finish the run"
        }
        RunPhase::Paused => "Press s to resume, Enter to continue from the highlighted row",
        RunPhase::Idle => "Press s to start",
        _ => "",
    };
    push_wrapped_status_kv(&mut lines, "Next", hint, area.width);

    let status = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Run"))
        .wrap(Wrap { trim: false });
    f.render_widget(status, parts[0]);

    let total = state.config.inter_delay.as_secs_f64();
    let (ratio, label) = match state.countdown {
        Some(remaining) if phase == RunPhase::Countdown && total > 0.0 => (
            (1.0 - remaining / total).clamp(0.0, 1.0),
            format!("Next chat in {remaining:.1}s"),
        ),
        _ => (0.0, String::new()),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Countdown"))
        .gauge_style(Style::default().fg(Color::Yellow))
        .ratio(ratio)
        .label(label);
    f.render_widget(gauge, parts[1]);
}

fn draw_report(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let mut lines: Vec<Line> = vec![Line::from(vec![
        Span::raw("Last run - "),
        Span::styled("e", Style::default().fg(Color::Magenta)),
        Span::raw(": export JSON, "),
        Span::styled("c", Style::default().fg(Color::Magenta)),
        Span::raw(": export CSV, "),
        Span::styled("y", Style::default().fg(Color::Magenta)),
        Span::raw(": copy link"),
    ])];
    lines.push(Line::from(""));

    match state.last_report.as_ref() {
        Some(report) => {
            for l in crate::text_summary::build_text_summary(report).lines {
                lines.push(Line::from(l));
            }
        }
        None => lines.push(Line::from(Span::styled(
            "No completed run yet.",
            Style::default().fg(Color::Gray),
        ))),
    }
    if let Some(p) = state.last_exported_path.as_ref() {
        lines.push(Line::from(""));
        lines.push(Line::from(format!("Last export: {p}")));
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "Messages:",
        Style::default().fg(Color::Gray),
    )));
    let room = (area.height as usize).saturating_sub(lines.len() + 2);
    let start = state.log.len().saturating_sub(room);
    for msg in &state.log[start..] {
        lines.push(Line::from(format!("  {msg}")));
    }

    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Report"))
        .wrap(Wrap { trim: false });
    f.render_widget(p, area);
}
