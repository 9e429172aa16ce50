//! Run driver.
//!
//! Owns the campaign and the state machine, executes the machine's effects and funnels every
//! asynchronous callback (launch outcomes, countdown ticks, foreground returns) back onto this
//! single loop, so the machine is never touched from two places at once.

use super::machine::{Effect, RunController, Ticket};
use crate::countdown::{self, CountdownHandle};
use crate::foreground::ForegroundSignal;
use crate::launch::{LaunchContext, LaunchDispatcher, LaunchOutcome, LaunchRequest};
use crate::model::{
    Attachment, CampaignSnapshot, InfoEvent, Recipient, RecipientId, RunConfig, RunEvent, RunMode, RunPhase,
    RunReport, RunStatus,
};
use crate::queue::Queue;
use crate::template;
use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;

/// Commands emitted by UI layers to control the run.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Start,
    Pause,
    Skip,
    MarkSent,
    MarkFailed,
    ManualOpen,
    JumpTo(usize),
    Reset,
    SetDelay(Duration),
    SetMode(RunMode),
    ToggleSelected(RecipientId),
    SelectAll(bool),
    Remove(RecipientId),
    /// Append to the end of the list; allowed while running.
    Add(Recipient),
    /// Replace the whole recipient list, discarding the run.
    LoadQueue(Vec<Recipient>),
    Quit,
}

/// Everything the run works on. Owned by the driver while the loop runs and handed back on
/// exit for persistence.
#[derive(Debug, Clone)]
pub(crate) struct Campaign {
    pub queue: Queue,
    pub template: String,
    pub config: RunConfig,
    pub attachment: Option<Attachment>,
}

impl Campaign {
    pub fn from_snapshot(snapshot: CampaignSnapshot, attachment: Option<Attachment>) -> Self {
        Self {
            queue: Queue::new(snapshot.recipients),
            template: snapshot.template,
            config: snapshot.config,
            attachment,
        }
    }

    pub fn snapshot(&self) -> CampaignSnapshot {
        CampaignSnapshot {
            saved_at: String::new(),
            template: self.template.clone(),
            config: self.config.clone(),
            recipients: self.queue.recipients().to_vec(),
        }
    }

    pub fn request_for(&self, recipient: &Recipient, context: LaunchContext) -> LaunchRequest {
        LaunchRequest {
            recipient: recipient.clone(),
            message: template::render(&self.template, &recipient.display_name),
            attachment: self.attachment.clone(),
            messaging_host: self.config.messaging_host.clone(),
            country_code: self.config.country_code.clone(),
            context,
        }
    }
}

/// Asynchronous inputs, all delivered on the driver loop.
#[derive(Debug)]
enum Signal {
    LaunchResolved {
        ticket: Ticket,
        recipient: RecipientId,
        outcome: LaunchOutcome,
    },
    CountdownTick {
        ticket: Ticket,
        remaining: f64,
    },
    CountdownDone {
        ticket: Ticket,
    },
    Foreground,
}

struct Driver {
    machine: RunController,
    campaign: Campaign,
    dispatcher: LaunchDispatcher,
    countdown: Option<CountdownHandle>,
    signal_tx: UnboundedSender<Signal>,
    event_tx: UnboundedSender<RunEvent>,
    // Time between an open and the user coming back, for the run report.
    opened_at: Option<Instant>,
    time_away: Vec<f64>,
}

/// Drive a campaign until the UI quits, emitting events for presentation layers.
/// Returns the campaign with its final statuses.
pub(crate) async fn run_controller(
    campaign: Campaign,
    dispatcher: LaunchDispatcher,
    foreground: &dyn ForegroundSignal,
    event_tx: UnboundedSender<RunEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
    start_immediately: bool,
) -> Result<Campaign> {
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<Signal>();
    let fg_tx = signal_tx.clone();
    let subscription = foreground.on_foreground(Box::new(move || {
        let _ = fg_tx.send(Signal::Foreground);
    }));

    let mut driver = Driver {
        machine: RunController::new(campaign.config.mode),
        campaign,
        dispatcher,
        countdown: None,
        signal_tx,
        event_tx,
        opened_at: None,
        time_away: Vec::new(),
    };
    driver.publish_status();
    if start_immediately {
        driver.handle_command(UiCommand::Start);
    }

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Quit) | None => break,
                    Some(cmd) => driver.handle_command(cmd),
                }
            }
            Some(signal) = signal_rx.recv() => driver.handle_signal(signal),
        }
    }

    subscription.unsubscribe();
    if let Some(h) = driver.countdown.take() {
        h.cancel();
    }
    tracing::info!(phase = ?driver.machine.phase(), "controller stopped");
    Ok(driver.campaign)
}

impl Driver {
    fn handle_command(&mut self, cmd: UiCommand) {
        tracing::debug!(?cmd, phase = ?self.machine.phase(), "command");
        let queue = &mut self.campaign.queue;
        let effects = match cmd {
            UiCommand::Start => self.machine.start(queue),
            UiCommand::Pause => self.machine.pause(queue),
            UiCommand::Skip => self.machine.skip(queue),
            UiCommand::MarkSent => self.machine.mark_sent(queue),
            UiCommand::MarkFailed => self.machine.mark_failed(queue),
            UiCommand::ManualOpen => self.machine.manual_open(queue),
            UiCommand::Reset => {
                self.opened_at = None;
                self.time_away.clear();
                self.machine.reset(queue)
            }
            UiCommand::JumpTo(position) => {
                if !self.machine.jump_to(queue, position) {
                    self.info(InfoEvent::Message("Jump is only possible while paused".into()));
                }
                Vec::new()
            }
            UiCommand::SetDelay(delay) => {
                // Read when the next countdown starts; a running one keeps its length.
                self.campaign.config.inter_delay = delay;
                Vec::new()
            }
            UiCommand::SetMode(mode) => {
                if self.machine.set_mode(mode) {
                    self.campaign.config.mode = mode;
                } else {
                    self.info(InfoEvent::Message("Pause the run to switch modes".into()));
                }
                Vec::new()
            }
            UiCommand::ToggleSelected(_) | UiCommand::SelectAll(_) | UiCommand::Remove(_)
                if self.machine.phase().is_running() =>
            {
                self.info(InfoEvent::Message(
                    "Pause the run to change the list".into(),
                ));
                Vec::new()
            }
            UiCommand::ToggleSelected(id) => {
                if let Some(selected) = queue.get(&id).map(|r| r.selected) {
                    queue.set_selected(&id, !selected);
                }
                Vec::new()
            }
            UiCommand::SelectAll(selected) => {
                queue.select_all(selected);
                Vec::new()
            }
            UiCommand::Remove(id) => {
                if let Some(r) = queue.remove(&id) {
                    self.info(InfoEvent::Message(format!("Removed {}", r.display_name)));
                }
                Vec::new()
            }
            UiCommand::Add(recipient) => {
                queue.push(recipient);
                Vec::new()
            }
            UiCommand::LoadQueue(recipients) => {
                *queue = Queue::new(recipients);
                self.opened_at = None;
                self.time_away.clear();
                self.machine.load_queue()
            }
            UiCommand::Quit => Vec::new(),
        };
        self.apply(effects);
        self.publish_status();
    }

    fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::LaunchResolved {
                ticket,
                recipient,
                outcome,
            } => {
                let current = ticket == self.machine.epoch();
                let effects = self
                    .machine
                    .on_dispatch_outcome(ticket, &recipient, &outcome);
                if current {
                    self.report_outcome(&recipient, &outcome);
                }
                self.apply(effects);
            }
            Signal::CountdownTick { ticket, remaining } => {
                self.machine.on_countdown_tick(ticket, remaining);
                if ticket == self.machine.epoch() {
                    let _ = self.event_tx.send(RunEvent::CountdownTick { remaining });
                }
                return;
            }
            Signal::CountdownDone { ticket } => {
                let effects = self
                    .machine
                    .on_countdown_complete(&self.campaign.queue, ticket);
                self.apply(effects);
            }
            Signal::Foreground => {
                let was_waiting = self.machine.phase() == RunPhase::WaitingForReturn;
                let delay = self.campaign.config.inter_delay;
                let effects = self
                    .machine
                    .on_foreground(&mut self.campaign.queue, delay);
                if was_waiting {
                    if let Some(t) = self.opened_at.take() {
                        self.time_away.push(t.elapsed().as_secs_f64());
                    }
                }
                self.apply(effects);
            }
        }
        self.publish_status();
    }

    fn report_outcome(&mut self, recipient: &str, outcome: &LaunchOutcome) {
        let name = self
            .campaign
            .queue
            .get(recipient)
            .map(|r| r.display_name.clone())
            .unwrap_or_else(|| recipient.to_string());
        let info = match outcome {
            LaunchOutcome::Opened => {
                self.opened_at = Some(Instant::now());
                InfoEvent::Opened { name }
            }
            LaunchOutcome::Blocked(reason) => InfoEvent::LaunchBlocked {
                name,
                reason: reason.clone(),
            },
            LaunchOutcome::Failed(reason) => InfoEvent::LaunchFailed {
                name,
                reason: reason.clone(),
            },
        };
        self.info(info);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Dispatch {
                    ticket,
                    recipient,
                    context,
                } => self.spawn_dispatch(ticket, &recipient, context),
                Effect::StartCountdown { ticket, duration } => {
                    self.start_countdown(ticket, duration)
                }
                Effect::CancelCountdown => {
                    if let Some(h) = self.countdown.take() {
                        h.cancel();
                    }
                }
                Effect::Completed => {
                    if let Some(h) = self.countdown.take() {
                        h.cancel();
                    }
                    let report = self.report();
                    let _ = self.event_tx.send(RunEvent::RunCompleted {
                        report: Box::new(report),
                    });
                }
            }
        }
    }

    fn spawn_dispatch(&self, ticket: Ticket, recipient: &Recipient, context: LaunchContext) {
        let req = self.campaign.request_for(recipient, context);
        let dispatcher = self.dispatcher.clone();
        let tx = self.signal_tx.clone();
        tokio::spawn(async move {
            let outcome = dispatcher.launch(&req).await;
            let _ = tx.send(Signal::LaunchResolved {
                ticket,
                recipient: req.recipient.id,
                outcome,
            });
        });
    }

    fn start_countdown(&mut self, ticket: Ticket, duration: Duration) {
        if let Some(h) = self.countdown.take() {
            h.cancel();
        }
        let tick_tx = self.signal_tx.clone();
        let done_tx = self.signal_tx.clone();
        self.countdown = Some(countdown::start(
            duration,
            move |remaining| {
                let _ = tick_tx.send(Signal::CountdownTick { ticket, remaining });
            },
            move || {
                let _ = done_tx.send(Signal::CountdownDone { ticket });
            },
        ));
    }

    fn info(&self, info: InfoEvent) {
        let _ = self.event_tx.send(RunEvent::Info(info));
    }

    fn publish_status(&self) {
        let queue = &self.campaign.queue;
        let status = RunStatus {
            phase: self.machine.phase(),
            position: self.machine.resolved_position(queue),
            total: queue.selected_len(),
            current: self.machine.current(queue).cloned(),
            countdown: self.machine.countdown(),
            inter_delay: self.campaign.config.inter_delay,
            mode: self.machine.mode(),
            recipients: queue.recipients().to_vec(),
        };
        let _ = self.event_tx.send(RunEvent::Status(Box::new(status)));
    }

    fn report(&self) -> RunReport {
        RunReport {
            timestamp_utc: time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "now".into()),
            template: self.campaign.template.clone(),
            config: self.campaign.config.clone(),
            counts: self.campaign.queue.status_counts(),
            time_away: crate::metrics::time_away_summary(&self.time_away),
            recipients: self.campaign.queue.recipients().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LaunchError;
    use crate::foreground::VisibilityTracker;
    use crate::launch::testing::FakeOpener;
    use crate::launch::UrlOpener;
    use crate::model::SendStatus;
    use futures::future::BoxFuture;
    use std::sync::Arc;

    fn campaign(n: usize, delay: Duration) -> Campaign {
        Campaign {
            queue: Queue::new(
                (0..n)
                    .map(|i| Recipient::new(format!("r{i}"), &format!("P{i}"), &format!("0{i}00")))
                    .collect(),
            ),
            template: "Hi {name}".into(),
            config: RunConfig {
                inter_delay: delay,
                country_code: "44".into(),
                ..RunConfig::default()
            },
            attachment: None,
        }
    }

    struct Harness {
        cmd_tx: UnboundedSender<UiCommand>,
        evt_rx: UnboundedReceiver<RunEvent>,
        tracker: VisibilityTracker,
        handle: tokio::task::JoinHandle<Result<Campaign>>,
    }

    fn spawn(campaign: Campaign, opener: Arc<dyn UrlOpener>) -> Harness {
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let tracker = VisibilityTracker::new();
        let fg = tracker.clone();
        let dispatcher = LaunchDispatcher::new(opener, None);
        let handle = tokio::spawn(async move {
            run_controller(campaign, dispatcher, &fg, evt_tx, cmd_rx, false).await
        });
        Harness {
            cmd_tx,
            evt_rx,
            tracker,
            handle,
        }
    }

    impl Harness {
        async fn wait_for(&mut self, phase: RunPhase) -> RunStatus {
            loop {
                match self.evt_rx.recv().await {
                    Some(RunEvent::Status(s)) if s.phase == phase => return *s,
                    Some(_) => {}
                    None => panic!("controller exited before reaching {phase:?}"),
                }
            }
        }

        async fn wait_for_report(&mut self) -> RunReport {
            loop {
                match self.evt_rx.recv().await {
                    Some(RunEvent::RunCompleted { report }) => return *report,
                    Some(_) => {}
                    None => panic!("controller exited before completing"),
                }
            }
        }

        async fn quit(self) -> Campaign {
            self.cmd_tx.send(UiCommand::Quit).unwrap();
            self.handle.await.unwrap().unwrap()
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn automatic_run_follows_focus_and_countdown() {
        let opener = Arc::new(FakeOpener::new());
        let mut h = spawn(campaign(2, Duration::from_secs(2)), opener.clone());

        h.cmd_tx.send(UiCommand::Start).unwrap();
        let s = h.wait_for(RunPhase::WaitingForReturn).await;
        assert_eq!(s.current.unwrap().id, "r0");

        h.tracker.set_visible(false);
        h.tracker.set_visible(true);
        let s = h.wait_for(RunPhase::Countdown).await;
        assert_eq!(s.countdown, Some(2.0));

        let s = h.wait_for(RunPhase::WaitingForReturn).await;
        assert_eq!(s.current.unwrap().id, "r1");
        h.tracker.report_return();

        let report = h.wait_for_report().await;
        assert_eq!(report.counts.sent, 2);
        assert_eq!(report.time_away.as_ref().map(|t| t.samples), Some(2));

        let calls = opener.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "https://wa.me/44000?text=Hi%20P0");
        assert_eq!(calls[1].0, "https://wa.me/44100?text=Hi%20P1");

        let done = h.quit().await;
        assert!(done
            .queue
            .recipients()
            .iter()
            .all(|r| r.status == SendStatus::Sent));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn blocked_open_waits_for_manual_trigger() {
        let mut fake = FakeOpener::new();
        fake.block_automatic = true;
        let opener = Arc::new(fake);
        let mut h = spawn(campaign(1, Duration::from_secs(1)), opener.clone());

        h.cmd_tx.send(UiCommand::Start).unwrap();
        h.wait_for(RunPhase::ManualTriggerNeeded).await;

        h.cmd_tx.send(UiCommand::ManualOpen).unwrap();
        h.wait_for(RunPhase::WaitingForReturn).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let contexts: Vec<LaunchContext> = opener.calls().into_iter().map(|(_, c)| c).collect();
        assert_eq!(
            contexts,
            vec![LaunchContext::Automatic, LaunchContext::UserInitiated]
        );

        h.tracker.report_return();
        let report = h.wait_for_report().await;
        assert_eq!(report.counts.sent, 1);
        h.quit().await;
    }

    struct SlowOpener;

    impl UrlOpener for SlowOpener {
        fn open<'a>(
            &'a self,
            _url: &'a str,
            _context: LaunchContext,
        ) -> BoxFuture<'a, Result<(), LaunchError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn late_outcome_after_reset_leaves_run_idle() {
        let mut h = spawn(campaign(2, Duration::from_secs(1)), Arc::new(SlowOpener));

        h.cmd_tx.send(UiCommand::Start).unwrap();
        h.wait_for(RunPhase::Dispatching).await;
        h.cmd_tx.send(UiCommand::Reset).unwrap();
        let s = h.wait_for(RunPhase::Idle).await;
        assert_eq!(s.position, -1);

        // Let the outstanding open resolve.
        tokio::time::sleep(Duration::from_secs(10)).await;
        h.tracker.report_return();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut last = None;
        while let Ok(ev) = h.evt_rx.try_recv() {
            assert!(!matches!(ev, RunEvent::Info(InfoEvent::Opened { .. })));
            if let RunEvent::Status(s) = ev {
                last = Some(s.phase);
            }
        }
        assert_eq!(last, Some(RunPhase::Idle));
        h.quit().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn pause_during_countdown_stops_ticks() {
        let opener = Arc::new(FakeOpener::new());
        let mut h = spawn(campaign(3, Duration::from_secs(3)), opener.clone());

        h.cmd_tx.send(UiCommand::Start).unwrap();
        h.wait_for(RunPhase::WaitingForReturn).await;
        h.tracker.report_return();
        h.wait_for(RunPhase::Countdown).await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        h.cmd_tx.send(UiCommand::Pause).unwrap();
        let s = h.wait_for(RunPhase::Paused).await;
        assert_eq!(s.position, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(ev) = h.evt_rx.try_recv() {
            assert!(
                !matches!(ev, RunEvent::CountdownTick { .. }),
                "tick after pause"
            );
        }
        assert_eq!(opener.calls().len(), 1);

        // Delay changes apply to the next countdown.
        h.cmd_tx
            .send(UiCommand::SetDelay(Duration::from_millis(500)))
            .unwrap();
        h.cmd_tx.send(UiCommand::Start).unwrap();
        let s = h.wait_for(RunPhase::WaitingForReturn).await;
        assert_eq!(s.current.unwrap().id, "r1");
        h.tracker.report_return();
        let s = h.wait_for(RunPhase::Countdown).await;
        assert_eq!(s.countdown, Some(0.5));
        h.quit().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn selection_is_locked_while_running() {
        let mut h = spawn(campaign(2, Duration::from_secs(1)), Arc::new(FakeOpener::new()));
        h.cmd_tx
            .send(UiCommand::ToggleSelected("r1".into()))
            .unwrap();
        let s = h.wait_for(RunPhase::Idle).await;
        assert_eq!(s.total, 2);
        let s = h.wait_for(RunPhase::Idle).await;
        assert_eq!(s.total, 1);

        h.cmd_tx.send(UiCommand::Start).unwrap();
        h.wait_for(RunPhase::WaitingForReturn).await;
        h.cmd_tx
            .send(UiCommand::ToggleSelected("r1".into()))
            .unwrap();
        let s = h.wait_for(RunPhase::WaitingForReturn).await;
        assert_eq!(s.total, 1);

        // Appending never disturbs the running position.
        h.cmd_tx
            .send(UiCommand::Add(Recipient::new("r9", "Zed", "999")))
            .unwrap();
        let s = h.wait_for(RunPhase::WaitingForReturn).await;
        assert_eq!(s.total, 2);
        assert_eq!(s.position, 0);
        h.quit().await;
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn list_edits_and_reload_while_idle() {
        let mut h = spawn(campaign(3, Duration::from_secs(1)), Arc::new(FakeOpener::new()));
        h.wait_for(RunPhase::Idle).await;

        h.cmd_tx.send(UiCommand::SelectAll(false)).unwrap();
        assert_eq!(h.wait_for(RunPhase::Idle).await.total, 0);
        h.cmd_tx.send(UiCommand::SelectAll(true)).unwrap();
        h.cmd_tx.send(UiCommand::Remove("r0".into())).unwrap();
        h.wait_for(RunPhase::Idle).await;
        let s = h.wait_for(RunPhase::Idle).await;
        assert_eq!(s.total, 2);
        assert_eq!(s.recipients[0].id, "r1");

        h.cmd_tx.send(UiCommand::Start).unwrap();
        h.wait_for(RunPhase::WaitingForReturn).await;
        h.cmd_tx
            .send(UiCommand::LoadQueue(vec![Recipient::new("n0", "New", "1")]))
            .unwrap();
        let s = h.wait_for(RunPhase::Idle).await;
        assert_eq!(s.position, -1);
        assert_eq!(s.recipients.len(), 1);

        let done = h.quit().await;
        assert_eq!(done.queue.recipients()[0].id, "n0");
    }
}
