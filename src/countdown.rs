//! Cancellable countdown between launches.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Tick granularity.
pub const TICK: Duration = Duration::from_millis(100);

const RUNNING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

/// Clamp to zero and round to one decimal so the UI never shows `-0.0` or `2.9999`.
pub fn round_tenths(secs: f64) -> f64 {
    ((secs * 10.0).round() / 10.0).max(0.0)
}

pub struct CountdownHandle {
    state: Arc<AtomicU8>,
    task: tokio::task::JoinHandle<()>,
}

impl CountdownHandle {
    /// Stop ticking. `on_complete` will not run after this returns unless it already started.
    /// Calling it on a finished or cancelled handle does nothing.
    pub fn cancel(&self) {
        if self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.task.abort();
        }
    }
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Count down `duration`, reporting the remaining seconds every [`TICK`] and calling
/// `on_complete` once when it reaches zero.
///
/// Must be called from within a Tokio runtime.
pub fn start<T, C>(duration: Duration, mut on_tick: T, on_complete: C) -> CountdownHandle
where
    T: FnMut(f64) + Send + 'static,
    C: FnOnce() + Send + 'static,
{
    let state = Arc::new(AtomicU8::new(RUNNING));
    let state2 = state.clone();
    let total = duration.as_secs_f64();
    let task = tokio::spawn(async move {
        let started = Instant::now();
        let mut interval = tokio::time::interval(TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if state2.load(Ordering::Acquire) != RUNNING {
                return;
            }
            let remaining = round_tenths(total - started.elapsed().as_secs_f64());
            on_tick(remaining);
            if remaining <= 0.0 {
                break;
            }
        }
        if state2
            .compare_exchange(RUNNING, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            on_complete();
        }
    });
    CountdownHandle { state, task }
}
