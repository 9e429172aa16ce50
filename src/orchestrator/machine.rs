//! Run state machine.
//!
//! Pure and synchronous: every operation updates the run state and returns the side effects
//! the driver has to carry out. Asynchronous results (launch outcomes, countdown ticks) come
//! back tagged with the ticket they were issued under; anything carrying an old ticket is
//! dropped. The ticket counter moves forward whenever in-flight work is abandoned (pause,
//! reset, queue reload, manual advance) and whenever new async work is issued, so at most one
//! launch or countdown is ever honored.
//!
//! ```text
//! Idle ──start──▶ Dispatching ──opened──▶ WaitingForReturn ──foreground──▶ Countdown
//!                     │                        ▲                              │
//!              blocked/failed             manual open                  timer complete
//!                     ▼                        │                              ▼
//!              ManualTriggerNeeded ────────────┘                 Dispatching | Completed
//! ```

use crate::launch::{LaunchContext, LaunchOutcome};
use crate::model::{Recipient, RecipientId, RunMode, RunPhase, SendStatus};
use crate::queue::Queue;
use std::time::Duration;

pub type Ticket = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Idle,
    Dispatching { recipient: RecipientId },
    WaitingForReturn { recipient: RecipientId },
    ManualTriggerNeeded { recipient: RecipientId },
    Countdown { remaining: f64 },
    /// `resume` is the recipient the run continues with; `None` once every selected recipient
    /// has been handled.
    Paused { resume: Option<RecipientId> },
    Completed,
}

impl RunState {
    pub fn phase(&self) -> RunPhase {
        match self {
            RunState::Idle => RunPhase::Idle,
            RunState::Dispatching { .. } => RunPhase::Dispatching,
            RunState::WaitingForReturn { .. } => RunPhase::WaitingForReturn,
            RunState::ManualTriggerNeeded { .. } => RunPhase::ManualTriggerNeeded,
            RunState::Countdown { .. } => RunPhase::Countdown,
            RunState::Paused { .. } => RunPhase::Paused,
            RunState::Completed => RunPhase::Completed,
        }
    }

    /// Recipient captured when the current attempt was issued.
    fn in_flight(&self) -> Option<&RecipientId> {
        match self {
            RunState::Dispatching { recipient }
            | RunState::WaitingForReturn { recipient }
            | RunState::ManualTriggerNeeded { recipient } => Some(recipient),
            _ => None,
        }
    }
}

/// Work the driver performs on behalf of the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Dispatch {
        ticket: Ticket,
        recipient: Recipient,
        context: LaunchContext,
    },
    StartCountdown {
        ticket: Ticket,
        duration: Duration,
    },
    CancelCountdown,
    Completed,
}

#[derive(Debug)]
pub struct RunController {
    state: RunState,
    position: isize,
    epoch: Ticket,
    mode: RunMode,
}

impl RunController {
    pub fn new(mode: RunMode) -> Self {
        Self {
            state: RunState::Idle,
            position: -1,
            epoch: 0,
            mode,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.state.phase()
    }

    pub fn position(&self) -> isize {
        self.position
    }

    pub fn epoch(&self) -> Ticket {
        self.epoch
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn countdown(&self) -> Option<f64> {
        match self.state {
            RunState::Countdown { remaining } => Some(remaining),
            _ => None,
        }
    }

    /// Mode switches are only taken while no run is in progress.
    pub fn set_mode(&mut self, mode: RunMode) -> bool {
        if self.phase().is_running() {
            reject("set_mode", &self.state);
            return false;
        }
        self.mode = mode;
        true
    }

    /// The recipient whose turn it is, if any.
    pub fn current<'q>(&self, queue: &'q Queue) -> Option<&'q Recipient> {
        match self.state.in_flight() {
            Some(id) => queue.get(id),
            None => queue.recipient_at(self.resolved_position(queue)),
        }
    }

    /// Run position against the queue as it is now. While paused the list may have been
    /// edited, so the position follows the resume recipient rather than the stored index.
    /// When that recipient left the run, the next pending selected recipient takes its place.
    pub fn resolved_position(&self, queue: &Queue) -> isize {
        let RunState::Paused {
            resume: Some(resume),
        } = &self.state
        else {
            return self.position;
        };
        let selected = queue.selected_sequence();
        let len = selected.len() as isize;
        if let Some(idx) = selected.iter().position(|r| r.id == *resume) {
            return idx as isize;
        }
        let next = match queue.recipients().iter().position(|r| r.id == *resume) {
            // Deselected: continue after it in list order.
            Some(list_idx) => queue.recipients()[list_idx + 1..]
                .iter()
                .find(|r| r.selected && r.status == SendStatus::Pending)
                .and_then(|r| selected.iter().position(|s| s.id == r.id)),
            // Removed: continue from the old index.
            None => selected
                .iter()
                .enumerate()
                .skip(self.position.max(0) as usize)
                .find(|(_, r)| r.status == SendStatus::Pending)
                .map(|(idx, _)| idx),
        };
        next.map_or(len, |idx| idx as isize)
    }

    pub fn start(&mut self, queue: &Queue) -> Vec<Effect> {
        if !matches!(self.state, RunState::Idle | RunState::Paused { .. }) {
            reject("start", &self.state);
            return Vec::new();
        }
        self.position = self.resolved_position(queue);
        let len = queue.selected_len() as isize;
        if len == 0 {
            reject("start (empty queue)", &self.state);
            return Vec::new();
        }
        if self.position >= len {
            // The queue shrank while paused; nothing left to send.
            self.position = len;
            return self.finish();
        }
        if self.position < 0 {
            self.position = 0;
        }
        tracing::info!(position = self.position, total = len, "run started");
        self.begin_current(queue)
    }

    /// Stop the run. A countdown in progress was already heading for the next recipient, so
    /// that recipient becomes the resume point. After the last recipient's countdown the run
    /// stays paused past the end and completes on the next start.
    pub fn pause(&mut self, queue: &Queue) -> Vec<Effect> {
        if !self.phase().is_running() {
            reject("pause", &self.state);
            return Vec::new();
        }
        let in_flight = self.state.in_flight().cloned();
        let in_countdown = matches!(self.state, RunState::Countdown { .. });
        let effects = self.abandon_in_flight();
        if in_countdown {
            self.position = (self.position + 1).min(queue.selected_len() as isize);
        }
        let resume = match in_flight {
            Some(id) => Some(id),
            None => queue.recipient_at(self.position).map(|r| r.id.clone()),
        };
        self.state = RunState::Paused { resume };
        tracing::info!(position = self.position, "run paused");
        effects
    }

    /// Move the run position while paused. Does not resume.
    pub fn jump_to(&mut self, queue: &Queue, position: usize) -> bool {
        if !matches!(self.state, RunState::Paused { .. }) || position >= queue.selected_len() {
            reject("jump_to", &self.state);
            return false;
        }
        self.position = position as isize;
        self.park(queue);
        tracing::info!(position, "run position moved");
        true
    }

    /// Back to `Idle` with every recipient pending.
    pub fn reset(&mut self, queue: &mut Queue) -> Vec<Effect> {
        let effects = self.abandon_in_flight();
        self.state = RunState::Idle;
        self.position = -1;
        queue.reset_statuses();
        tracing::info!("run reset");
        effects
    }

    /// A different queue was loaded; statuses belong to the new queue and are kept.
    pub fn load_queue(&mut self) -> Vec<Effect> {
        let effects = self.abandon_in_flight();
        self.state = RunState::Idle;
        self.position = -1;
        effects
    }

    pub fn skip(&mut self, queue: &mut Queue) -> Vec<Effect> {
        self.mark_and_advance(queue, SendStatus::Skipped)
    }

    pub fn mark_sent(&mut self, queue: &mut Queue) -> Vec<Effect> {
        self.mark_and_advance(queue, SendStatus::Sent)
    }

    pub fn mark_failed(&mut self, queue: &mut Queue) -> Vec<Effect> {
        self.mark_and_advance(queue, SendStatus::Failed)
    }

    /// User-initiated open for a recipient whose automatic attempt did not go through.
    pub fn manual_open(&mut self, queue: &Queue) -> Vec<Effect> {
        let RunState::ManualTriggerNeeded { recipient } = &self.state else {
            reject("manual_open", &self.state);
            return Vec::new();
        };
        let Some(r) = queue.get(recipient).cloned() else {
            reject("manual_open (recipient removed)", &self.state);
            return Vec::new();
        };
        let ticket = self.next_ticket();
        self.state = RunState::WaitingForReturn {
            recipient: r.id.clone(),
        };
        vec![Effect::Dispatch {
            ticket,
            recipient: r,
            context: LaunchContext::UserInitiated,
        }]
    }

    pub fn on_dispatch_outcome(
        &mut self,
        ticket: Ticket,
        recipient: &str,
        outcome: &LaunchOutcome,
    ) -> Vec<Effect> {
        if ticket != self.epoch {
            tracing::debug!(ticket, epoch = self.epoch, "stale launch outcome dropped");
            return Vec::new();
        }
        match &self.state {
            RunState::Dispatching { recipient: id } if id == recipient => {
                self.state = if outcome.is_opened() {
                    RunState::WaitingForReturn {
                        recipient: id.clone(),
                    }
                } else {
                    RunState::ManualTriggerNeeded {
                        recipient: id.clone(),
                    }
                };
            }
            // A forced open is optimistic; fall back if it did not work either.
            RunState::WaitingForReturn { recipient: id }
                if id == recipient && !outcome.is_opened() =>
            {
                self.state = RunState::ManualTriggerNeeded {
                    recipient: id.clone(),
                };
            }
            _ => {
                tracing::debug!(state = ?self.state, "launch outcome ignored");
            }
        }
        Vec::new()
    }

    /// Host regained focus. Only meaningful while waiting for the user to come back.
    pub fn on_foreground(&mut self, queue: &mut Queue, delay: Duration) -> Vec<Effect> {
        let RunState::WaitingForReturn { recipient } = &self.state else {
            tracing::debug!(state = ?self.state, "foreground ignored");
            return Vec::new();
        };
        let recipient = recipient.clone();
        match self.mode {
            RunMode::Automatic => {
                queue.set_status(&recipient, SendStatus::Sent);
                let ticket = self.next_ticket();
                self.state = RunState::Countdown {
                    remaining: delay.as_secs_f64(),
                };
                tracing::info!(%recipient, "returned; marked sent");
                vec![Effect::StartCountdown {
                    ticket,
                    duration: delay,
                }]
            }
            RunMode::Manual => {
                self.state = RunState::ManualTriggerNeeded { recipient };
                Vec::new()
            }
        }
    }

    pub fn on_countdown_tick(&mut self, ticket: Ticket, remaining: f64) {
        if ticket != self.epoch {
            return;
        }
        if let RunState::Countdown { remaining: r } = &mut self.state {
            *r = remaining;
        }
    }

    pub fn on_countdown_complete(&mut self, queue: &Queue, ticket: Ticket) -> Vec<Effect> {
        if ticket != self.epoch || !matches!(self.state, RunState::Countdown { .. }) {
            tracing::debug!(ticket, epoch = self.epoch, "stale countdown completion dropped");
            return Vec::new();
        }
        self.advance(queue)
    }

    fn mark_and_advance(&mut self, queue: &mut Queue, status: SendStatus) -> Vec<Effect> {
        let Some(current) = self.current(queue).map(|r| r.id.clone()) else {
            reject("mark", &self.state);
            return Vec::new();
        };
        let was_running = self.phase().is_running();
        self.position = self.resolved_position(queue);
        let in_countdown = matches!(self.state, RunState::Countdown { .. });
        let mut effects = self.abandon_in_flight();
        // During the countdown the current recipient already has its final status.
        if !in_countdown {
            queue.set_status(&current, status);
        }
        tracing::info!(recipient = %current, status = status.as_str(), "marked by user");

        if was_running {
            effects.extend(self.advance(queue));
            return effects;
        }
        // Idle/Paused: move the position but do not resume.
        let len = queue.selected_len() as isize;
        if self.position + 1 < len {
            self.position += 1;
            if matches!(self.state, RunState::Paused { .. }) {
                self.park(queue);
            }
        } else {
            self.position = len;
            effects.extend(self.finish());
        }
        effects
    }

    fn advance(&mut self, queue: &Queue) -> Vec<Effect> {
        let len = queue.selected_len() as isize;
        if self.position + 1 < len {
            self.position += 1;
            self.begin_current(queue)
        } else {
            self.position = len;
            self.finish()
        }
    }

    fn begin_current(&mut self, queue: &Queue) -> Vec<Effect> {
        let Some(r) = queue.recipient_at(self.position).cloned() else {
            self.position = queue.selected_len() as isize;
            return self.finish();
        };
        match self.mode {
            RunMode::Automatic => {
                let ticket = self.next_ticket();
                self.state = RunState::Dispatching {
                    recipient: r.id.clone(),
                };
                vec![Effect::Dispatch {
                    ticket,
                    recipient: r,
                    context: LaunchContext::Automatic,
                }]
            }
            RunMode::Manual => {
                self.state = RunState::ManualTriggerNeeded { recipient: r.id };
                Vec::new()
            }
        }
    }

    /// Paused at the current position, remembering who is there.
    fn park(&mut self, queue: &Queue) {
        self.state = RunState::Paused {
            resume: queue.recipient_at(self.position).map(|r| r.id.clone()),
        };
    }

    fn finish(&mut self) -> Vec<Effect> {
        self.state = RunState::Completed;
        self.next_ticket();
        tracing::info!(total = self.position, "run completed");
        vec![Effect::Completed]
    }

    fn abandon_in_flight(&mut self) -> Vec<Effect> {
        self.next_ticket();
        if matches!(self.state, RunState::Countdown { .. }) {
            vec![Effect::CancelCountdown]
        } else {
            Vec::new()
        }
    }

    fn next_ticket(&mut self) -> Ticket {
        self.epoch += 1;
        self.epoch
    }
}

fn reject(action: &str, state: &RunState) {
    tracing::debug!(action, ?state, "invalid transition ignored");
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_millis(1500);

    fn queue(n: usize) -> Queue {
        Queue::new(
            (0..n)
                .map(|i| Recipient::new(format!("r{i}"), &format!("Person {i}"), &format!("555{i}")))
                .collect(),
        )
    }

    fn dispatched(effects: &[Effect]) -> (Ticket, RecipientId, LaunchContext) {
        match effects {
            [Effect::Dispatch {
                ticket,
                recipient,
                context,
            }] => (*ticket, recipient.id.clone(), *context),
            other => panic!("expected a single dispatch, got {other:?}"),
        }
    }

    fn countdown_ticket(effects: &[Effect]) -> Ticket {
        match effects {
            [Effect::StartCountdown { ticket, duration }] => {
                assert_eq!(*duration, DELAY);
                *ticket
            }
            other => panic!("expected a countdown, got {other:?}"),
        }
    }

    /// Dispatch → opened → foreground → countdown complete, returning the next effects.
    fn cycle(rc: &mut RunController, q: &mut Queue, effects: Vec<Effect>) -> Vec<Effect> {
        let (ticket, id, _) = dispatched(&effects);
        rc.on_dispatch_outcome(ticket, &id, &LaunchOutcome::Opened);
        assert_eq!(rc.phase(), RunPhase::WaitingForReturn);
        let cd = countdown_ticket(&rc.on_foreground(q, DELAY));
        assert_eq!(q.get(&id).unwrap().status, SendStatus::Sent);
        rc.on_countdown_complete(q, cd)
    }

    #[test]
    fn full_run_completes_after_n_advances() {
        for n in 1..=4 {
            let mut q = queue(n);
            let mut rc = RunController::new(RunMode::Automatic);
            let mut effects = rc.start(&q);
            for _ in 0..n {
                effects = cycle(&mut rc, &mut q, effects);
            }
            assert_eq!(effects, vec![Effect::Completed]);
            assert_eq!(rc.phase(), RunPhase::Completed);
            assert_eq!(rc.position(), n as isize);
            assert_eq!(q.status_counts().pending, 0);
        }
    }

    #[test]
    fn start_requires_non_empty_queue() {
        let q = Queue::default();
        let mut rc = RunController::new(RunMode::Automatic);
        assert!(rc.start(&q).is_empty());
        assert_eq!(rc.phase(), RunPhase::Idle);
        assert_eq!(rc.position(), -1);
    }

    #[test]
    fn blocked_launch_falls_back_to_manual_open() {
        let q = queue(2);
        let mut rc = RunController::new(RunMode::Automatic);
        let (ticket, id, ctx) = dispatched(&rc.start(&q));
        assert_eq!(ctx, LaunchContext::Automatic);

        rc.on_dispatch_outcome(ticket, &id, &LaunchOutcome::Blocked("suppressed".into()));
        assert_eq!(rc.phase(), RunPhase::ManualTriggerNeeded);

        let (forced, forced_id, ctx) = dispatched(&rc.manual_open(&q));
        assert_eq!(forced_id, id);
        assert_eq!(ctx, LaunchContext::UserInitiated);
        assert_eq!(rc.phase(), RunPhase::WaitingForReturn);

        // Idempotent: a second press does nothing.
        assert!(rc.manual_open(&q).is_empty());

        // The forced open failing too drops back to the manual trigger.
        rc.on_dispatch_outcome(forced, &id, &LaunchOutcome::Failed("cancelled".into()));
        assert_eq!(rc.phase(), RunPhase::ManualTriggerNeeded);
    }

    #[test]
    fn manual_open_rejected_outside_manual_trigger() {
        let mut q = queue(2);
        let mut rc = RunController::new(RunMode::Automatic);
        assert!(rc.manual_open(&q).is_empty());
        assert_eq!(rc.phase(), RunPhase::Idle);

        let (ticket, id, _) = dispatched(&rc.start(&q));
        assert!(rc.manual_open(&q).is_empty());
        rc.on_dispatch_outcome(ticket, &id, &LaunchOutcome::Opened);
        assert!(rc.manual_open(&q).is_empty());
        rc.on_foreground(&mut q, DELAY);
        assert!(rc.manual_open(&q).is_empty());
        assert_eq!(rc.phase(), RunPhase::Countdown);
    }

    #[test]
    fn pause_and_resume_keep_position_from_every_running_state() {
        // Dispatching
        let mut q = queue(3);
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        assert!(rc.pause(&q).is_empty());
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        assert_eq!(rc.phase(), RunPhase::Paused);
        let (_, again, _) = dispatched(&rc.start(&q));
        assert_eq!(again, id);

        // WaitingForReturn
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        rc.pause(&q);
        assert!(rc.on_foreground(&mut q, DELAY).is_empty());
        assert_eq!(q.get(&id).unwrap().status, SendStatus::Pending);
        let (_, again, _) = dispatched(&rc.start(&q));
        assert_eq!(again, id);

        // ManualTriggerNeeded
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Blocked("x".into()));
        rc.pause(&q);
        let (_, again, _) = dispatched(&rc.start(&q));
        assert_eq!(again, id);

        // Countdown: the countdown is cancelled, its late completion ignored, and the run
        // resumes with the recipient the countdown was heading for.
        let mut q = queue(3);
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        let cd = countdown_ticket(&rc.on_foreground(&mut q, DELAY));
        assert_eq!(rc.pause(&q), vec![Effect::CancelCountdown]);
        rc.on_countdown_tick(cd, 0.7);
        assert!(rc.on_countdown_complete(&q, cd).is_empty());
        assert_eq!(rc.phase(), RunPhase::Paused);
        assert_eq!(rc.position(), 1);
        let (_, again, _) = dispatched(&rc.start(&q));
        assert_eq!(again, "r1");
        assert_eq!(q.get("r0").unwrap().status, SendStatus::Sent);
        assert_eq!(q.get("r1").unwrap().status, SendStatus::Pending);
    }

    #[test]
    fn pause_during_last_countdown_completes_on_resume() {
        let mut q = queue(1);
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        rc.on_foreground(&mut q, DELAY);
        assert_eq!(rc.pause(&q), vec![Effect::CancelCountdown]);
        assert_eq!(rc.phase(), RunPhase::Paused);
        assert_eq!(rc.position(), 1);
        assert!(rc.current(&q).is_none());

        assert_eq!(rc.start(&q), vec![Effect::Completed]);
        assert_eq!(rc.phase(), RunPhase::Completed);
    }

    #[test]
    fn foreground_outside_waiting_is_ignored() {
        let mut q = queue(2);
        let mut rc = RunController::new(RunMode::Automatic);
        assert!(rc.on_foreground(&mut q, DELAY).is_empty());
        assert_eq!(rc.phase(), RunPhase::Idle);

        let (t, id, _) = dispatched(&rc.start(&q));
        assert!(rc.on_foreground(&mut q, DELAY).is_empty());
        assert_eq!(rc.phase(), RunPhase::Dispatching);

        rc.pause(&q);
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        assert!(rc.on_foreground(&mut q, DELAY).is_empty());
        assert_eq!(rc.phase(), RunPhase::Paused);
        assert_eq!(q.status_counts().pending, 2);
    }

    #[test]
    fn jump_while_paused_then_foreground_marks_nobody() {
        let mut q = queue(4);
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        rc.pause(&q);
        assert!(rc.jump_to(&q, 2));
        assert!(rc.on_foreground(&mut q, DELAY).is_empty());
        assert_eq!(q.status_counts().pending, 4);

        let (_, next, _) = dispatched(&rc.start(&q));
        assert_eq!(next, "r2");
    }

    #[test]
    fn removing_an_earlier_recipient_keeps_the_resume_point() {
        let mut q = queue(4);
        let mut rc = RunController::new(RunMode::Manual);
        rc.start(&q);
        rc.mark_sent(&mut q);
        rc.mark_sent(&mut q);
        rc.pause(&q);
        assert_eq!(rc.current(&q).map(|r| r.id.as_str()), Some("r2"));

        q.remove("r0");
        assert_eq!(rc.current(&q).map(|r| r.id.as_str()), Some("r2"));
        assert_eq!(rc.resolved_position(&q), 1);

        assert!(rc.start(&q).is_empty());
        assert_eq!(rc.current(&q).map(|r| r.id.as_str()), Some("r2"));
        rc.mark_sent(&mut q);
        rc.mark_sent(&mut q);
        assert_eq!(rc.phase(), RunPhase::Completed);
        assert_eq!(q.status_counts().pending, 0);
    }

    #[test]
    fn deselecting_the_resume_recipient_moves_to_the_next_pending() {
        let mut q = queue(4);
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        rc.pause(&q);
        assert!(rc.jump_to(&q, 2));

        q.set_selected("r1", false);
        q.set_selected("r2", false);
        let (_, next, _) = dispatched(&rc.start(&q));
        assert_eq!(next, "r3");
        assert_eq!(rc.position(), 1);
    }

    #[test]
    fn removed_resume_recipient_falls_back_to_old_index() {
        let mut q = queue(4);
        let mut rc = RunController::new(RunMode::Manual);
        rc.start(&q);
        rc.mark_sent(&mut q);
        rc.pause(&q);
        q.remove("r1");
        // r2 now sits at the old index.
        assert_eq!(rc.current(&q).map(|r| r.id.as_str()), Some("r2"));
        rc.skip(&mut q);
        assert_eq!(q.get("r2").unwrap().status, SendStatus::Skipped);
        assert_eq!(rc.current(&q).map(|r| r.id.as_str()), Some("r3"));
    }

    #[test]
    fn jump_rejected_unless_paused_and_in_range() {
        let mut q = queue(3);
        let mut rc = RunController::new(RunMode::Automatic);
        assert!(!rc.jump_to(&q, 1));
        let (t, id, _) = dispatched(&rc.start(&q));
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        rc.on_foreground(&mut q, DELAY);
        assert!(!rc.jump_to(&q, 1));
        rc.pause(&q);
        assert!(!rc.jump_to(&q, 3));
        assert!(rc.jump_to(&q, 1));
        assert_eq!(rc.position(), 1);
        assert_eq!(rc.phase(), RunPhase::Paused);
    }

    #[test]
    fn reset_restores_pending_and_position() {
        let mut q = queue(3);
        let mut rc = RunController::new(RunMode::Manual);
        assert!(rc.start(&q).is_empty());
        assert_eq!(rc.phase(), RunPhase::ManualTriggerNeeded);
        rc.mark_sent(&mut q);
        rc.skip(&mut q);
        assert_eq!(q.get("r0").unwrap().status, SendStatus::Sent);
        assert_eq!(q.get("r1").unwrap().status, SendStatus::Skipped);
        assert_eq!(rc.position(), 2);

        rc.reset(&mut q);
        assert_eq!(rc.phase(), RunPhase::Idle);
        assert_eq!(rc.position(), -1);
        assert_eq!(q.status_counts().pending, 3);
    }

    #[test]
    fn late_outcome_after_reset_is_dropped() {
        let mut q = queue(2);
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        let epoch = rc.epoch();
        rc.reset(&mut q);
        assert!(rc.epoch() > epoch);
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        assert_eq!(rc.phase(), RunPhase::Idle);
    }

    #[test]
    fn skip_during_countdown_cancels_and_dispatches_next() {
        let mut q = queue(3);
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        let cd = countdown_ticket(&rc.on_foreground(&mut q, DELAY));

        let effects = rc.skip(&mut q);
        assert_eq!(effects[0], Effect::CancelCountdown);
        let (_, next, _) = dispatched(&effects[1..]);
        assert_eq!(next, "r1");
        // r0 keeps the status it got on return.
        assert_eq!(q.get("r0").unwrap().status, SendStatus::Sent);
        // The old countdown can no longer advance the run.
        assert!(rc.on_countdown_complete(&q, cd).is_empty());
        assert_eq!(rc.position(), 1);
    }

    #[test]
    fn mark_failed_while_waiting_advances() {
        let mut q = queue(2);
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        let (_, next, _) = dispatched(&rc.mark_failed(&mut q));
        assert_eq!(next, "r1");
        assert_eq!(q.get("r0").unwrap().status, SendStatus::Failed);
        assert_eq!(rc.mark_sent(&mut q), vec![Effect::Completed]);
        assert_eq!(rc.phase(), RunPhase::Completed);
        // Nothing current once completed.
        assert!(rc.skip(&mut q).is_empty());
    }

    #[test]
    fn skip_while_paused_moves_without_resuming() {
        let mut q = queue(2);
        let mut rc = RunController::new(RunMode::Automatic);
        rc.start(&q);
        rc.pause(&q);
        assert!(rc.skip(&mut q).is_empty());
        assert_eq!(rc.phase(), RunPhase::Paused);
        assert_eq!(rc.position(), 1);
        assert_eq!(rc.skip(&mut q), vec![Effect::Completed]);
        assert_eq!(rc.position(), 2);
    }

    #[test]
    fn manual_mode_never_counts_down() {
        let mut q = queue(2);
        let mut rc = RunController::new(RunMode::Manual);
        assert!(rc.start(&q).is_empty());
        let (t, id, ctx) = dispatched(&rc.manual_open(&q));
        assert_eq!(ctx, LaunchContext::UserInitiated);
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        assert_eq!(rc.phase(), RunPhase::WaitingForReturn);
        assert!(rc.on_foreground(&mut q, DELAY).is_empty());
        assert_eq!(rc.phase(), RunPhase::ManualTriggerNeeded);
        assert_eq!(q.get(&id).unwrap().status, SendStatus::Pending);
        assert!(rc.mark_sent(&mut q).is_empty());
        assert_eq!(rc.phase(), RunPhase::ManualTriggerNeeded);
        assert_eq!(rc.current(&q).map(|r| r.id.as_str()), Some("r1"));
    }

    #[test]
    fn shrunk_queue_completes_on_resume() {
        let mut q = queue(3);
        let mut rc = RunController::new(RunMode::Manual);
        rc.start(&q);
        rc.mark_sent(&mut q);
        rc.mark_sent(&mut q);
        rc.pause(&q);
        assert_eq!(rc.position(), 2);
        q.set_selected("r2", false);
        q.set_selected("r1", false);
        assert_eq!(rc.start(&q), vec![Effect::Completed]);
        assert_eq!(rc.position(), 1);
    }

    #[test]
    fn countdown_ticks_update_remaining() {
        let mut q = queue(2);
        let mut rc = RunController::new(RunMode::Automatic);
        let (t, id, _) = dispatched(&rc.start(&q));
        rc.on_dispatch_outcome(t, &id, &LaunchOutcome::Opened);
        let cd = countdown_ticket(&rc.on_foreground(&mut q, DELAY));
        assert_eq!(rc.countdown(), Some(1.5));
        rc.on_countdown_tick(cd, 0.4);
        assert_eq!(rc.countdown(), Some(0.4));
        rc.on_countdown_tick(cd - 1, 0.1);
        assert_eq!(rc.countdown(), Some(0.4));
    }

    #[test]
    fn mode_switch_only_when_not_running() {
        let q = queue(1);
        let mut rc = RunController::new(RunMode::Automatic);
        assert!(rc.set_mode(RunMode::Manual));
        rc.start(&q);
        assert!(!rc.set_mode(RunMode::Automatic));
        assert_eq!(rc.mode(), RunMode::Manual);
    }
}
