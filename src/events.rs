// Listener registry for status, "now playing", time and error events
use parking_lot::RwLock;
use std::fmt;
use std::sync::{mpsc, Arc};

use crate::metadata::MediaInfo;

/// Status changes reported to status listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TailwindStatus {
    Open,
    Playing,
    Paused,
    Resumed,
    Closed,
    /// The stream reached its natural end
    End,
}

impl fmt::Display for TailwindStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TailwindStatus::Open => "OPEN",
            TailwindStatus::Playing => "PLAYING",
            TailwindStatus::Paused => "PAUSED",
            TailwindStatus::Resumed => "RESUMED",
            TailwindStatus::Closed => "CLOSED",
            TailwindStatus::End => "END",
        };
        f.write_str(name)
    }
}

type StatusListener = Arc<dyn Fn(TailwindStatus) + Send + Sync>;
type GenericListener = Arc<dyn Fn(&MediaInfo) + Send + Sync>;
type TimeListener = Arc<dyn Fn(u64) + Send + Sync>;
type ErrorListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Listeners are called on whichever thread raised the event, with no
/// controller lock held, so they may call back into the controller.
#[derive(Default)]
pub struct EventManager {
    status: RwLock<Vec<StatusListener>>,
    generic: RwLock<Vec<GenericListener>>,
    time: RwLock<Vec<TimeListener>>,
    error: RwLock<Vec<ErrorListener>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_status_listener<F>(&self, listener: F)
    where
        F: Fn(TailwindStatus) + Send + Sync + 'static,
    {
        self.status.write().push(Arc::new(listener));
    }

    pub fn add_generic_listener<F>(&self, listener: F)
    where
        F: Fn(&MediaInfo) + Send + Sync + 'static,
    {
        self.generic.write().push(Arc::new(listener));
    }

    pub fn add_time_listener<F>(&self, listener: F)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.time.write().push(Arc::new(listener));
    }

    pub fn add_error_listener<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.error.write().push(Arc::new(listener));
    }

    /// Status events as a channel
    pub fn subscribe_status(&self) -> mpsc::Receiver<TailwindStatus> {
        let (tx, rx) = mpsc::channel();
        self.add_status_listener(move |status| {
            let _ = tx.send(status);
        });
        rx
    }

    pub fn dispatch_status(&self, status: TailwindStatus) {
        let listeners = self.status.read().clone();
        for listener in listeners {
            listener(status);
        }
    }

    pub fn dispatch_generic(&self, info: &MediaInfo) {
        let listeners = self.generic.read().clone();
        for listener in listeners {
            listener(info);
        }
    }

    pub fn dispatch_time(&self, position_ms: u64) {
        let listeners = self.time.read().clone();
        for listener in listeners {
            listener(position_ms);
        }
    }

    pub fn dispatch_error(&self, message: &str) {
        let listeners = self.error.read().clone();
        for listener in listeners {
            listener(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn test_status_subscription_receives_in_order() {
        let events = EventManager::new();
        let rx = events.subscribe_status();
        events.dispatch_status(TailwindStatus::Open);
        events.dispatch_status(TailwindStatus::Playing);
        assert_eq!(rx.try_recv().unwrap(), TailwindStatus::Open);
        assert_eq!(rx.try_recv().unwrap(), TailwindStatus::Playing);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_time_listeners_all_called() {
        let events = EventManager::new();
        let total = Arc::new(AtomicU64::new(0));
        for _ in 0..3 {
            let total = total.clone();
            events.add_time_listener(move |ms| {
                total.fetch_add(ms, Ordering::SeqCst);
            });
        }
        events.dispatch_time(5);
        assert_eq!(total.load(Ordering::SeqCst), 15);
    }

    #[test]
    fn test_listener_may_register_another_listener() {
        let events = Arc::new(EventManager::new());
        let inner = events.clone();
        events.add_error_listener(move |_| {
            inner.add_error_listener(|_| {});
        });
        events.dispatch_error("boom");
        assert_eq!(events.error.read().len(), 2);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TailwindStatus::End.to_string(), "END");
    }
}
