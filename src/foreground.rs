//! Foreground-return notifications.
//!
//! The controller only needs to learn that the host became visible again. Where the
//! information comes from (terminal focus reports, an explicit keypress) is up to the
//! front-end, which feeds a [`VisibilityTracker`].

use std::sync::{Arc, Mutex, Weak};

pub type ForegroundCallback = Box<dyn Fn() + Send + Sync>;

pub trait ForegroundSignal: Send + Sync {
    /// Register `callback` for every hidden → visible transition.
    fn on_foreground(&self, callback: ForegroundCallback) -> Subscription;
}

struct Listeners {
    visible: bool,
    next_id: u64,
    callbacks: Vec<(u64, Arc<ForegroundCallback>)>,
}

/// De-duplicating visibility source: repeated "visible" reports without an intervening
/// "hidden" fire nothing.
#[derive(Clone)]
pub struct VisibilityTracker {
    inner: Arc<Mutex<Listeners>>,
}

impl Default for VisibilityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VisibilityTracker {
    /// Starts visible: the tool is launched from the terminal the user is looking at.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Listeners {
                visible: true,
                next_id: 0,
                callbacks: Vec::new(),
            })),
        }
    }

    pub fn set_visible(&self, visible: bool) {
        let to_fire: Vec<Arc<ForegroundCallback>> = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            let returned = visible && !inner.visible;
            inner.visible = visible;
            if !returned {
                return;
            }
            let callbacks = inner.callbacks.iter().map(|(_, cb)| cb.clone()).collect();
            callbacks
        };
        // Fire outside the lock so callbacks may subscribe or unsubscribe.
        for cb in to_fire {
            cb();
        }
    }

    /// The user says they are back, for terminals that do not report focus.
    pub fn report_return(&self) {
        self.set_visible(false);
        self.set_visible(true);
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.inner.lock().map(|i| i.callbacks.len()).unwrap_or(0)
    }
}

impl ForegroundSignal for VisibilityTracker {
    fn on_foreground(&self, callback: ForegroundCallback) -> Subscription {
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.callbacks.push((id, Arc::new(callback)));
                id
            }
            Err(_) => u64::MAX,
        };
        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Removes its callback when dropped.
pub struct Subscription {
    id: u64,
    inner: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut guard = match inner.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        guard.callbacks.retain(|(id, _)| *id != self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(tracker: &VisibilityTracker) -> (Arc<AtomicUsize>, Subscription) {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let sub = tracker.on_foreground(Box::new(move || {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));
        (hits, sub)
    }

    #[test]
    fn fires_once_per_return() {
        let tracker = VisibilityTracker::new();
        let (hits, _sub) = counting(&tracker);

        tracker.set_visible(true);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        tracker.set_visible(false);
        tracker.set_visible(false);
        tracker.set_visible(true);
        tracker.set_visible(true);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        tracker.report_return();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropped_subscription_stops_callbacks() {
        let tracker = VisibilityTracker::new();
        let (hits, sub) = counting(&tracker);
        assert_eq!(tracker.listener_count(), 1);
        sub.unsubscribe();
        assert_eq!(tracker.listener_count(), 0);
        tracker.report_return();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
