//! Log sink – bounded history of diagnostics with synchronous subscriber fan-out.
//!
//! - [`Logger`]: the capability every component logs through
//! - [`ConsoleLogger`]: mirrors to `tracing`, keeps history, notifies subscribers
//! - [`NoopLogger`]: discards everything

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Maximum number of entries retained in history.
pub const HISTORY_CAPACITY: usize = 500;

const MIRROR_TARGET: &str = "lpac";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Trace,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
}

impl LogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

pub trait Logger: Send + Sync {
    fn log(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Callback invoked for every published entry.
pub type Subscriber = Arc<dyn Fn(&LogEntry) + Send + Sync>;

// ===========================================================================
// Console logger
// ===========================================================================

#[derive(Default)]
struct SinkState {
    history: VecDeque<LogEntry>,
    subscribers: Vec<Subscriber>,
}

/// Process-wide log sink. Construct once and share behind an `Arc`.
#[derive(Default)]
pub struct ConsoleLogger {
    state: Arc<Mutex<SinkState>>,
}

impl ConsoleLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `entry` to history, trim it, then notify every current subscriber.
    pub fn publish(&self, entry: LogEntry) -> LogEntry {
        let subscribers = {
            let mut state = lock(&self.state);
            state.history.push_front(entry.clone());
            state.history.truncate(HISTORY_CAPACITY);
            state.subscribers.clone()
        };
        // Callbacks run outside the lock so they may log themselves.
        for sub in &subscribers {
            sub(&entry);
        }
        entry
    }

    /// Register `subscriber`. Registering the same callback twice is a no-op
    /// and the second call returns an inert [`Subscription`].
    pub fn subscribe(&self, subscriber: Subscriber) -> Subscription {
        let mut state = lock(&self.state);
        if state.subscribers.iter().any(|s| Arc::ptr_eq(s, &subscriber)) {
            return Subscription::inert();
        }
        state.subscribers.push(Arc::clone(&subscriber));
        Subscription {
            state: Arc::downgrade(&self.state),
            subscriber: Some(subscriber),
            done: AtomicBool::new(false),
        }
    }

    /// Snapshot of the history, newest first.
    pub fn history(&self) -> Vec<LogEntry> {
        lock(&self.state).history.iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).subscribers.len()
    }
}

impl Logger for ConsoleLogger {
    fn log(&self, message: &str) {
        tracing::trace!(target: MIRROR_TARGET, "{}", message);
        self.publish(LogEntry::new(Severity::Trace, message));
    }

    fn info(&self, message: &str) {
        tracing::info!(target: MIRROR_TARGET, "{}", message);
        self.publish(LogEntry::new(Severity::Info, message));
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: MIRROR_TARGET, "{}", message);
        self.publish(LogEntry::new(Severity::Warn, message));
    }

    fn error(&self, message: &str) {
        tracing::error!(target: MIRROR_TARGET, "{}", message);
        self.publish(LogEntry::new(Severity::Error, message));
    }
}

/// Handle returned by [`ConsoleLogger::subscribe`].
///
/// `unsubscribe` removes the callback at most once; later calls do nothing.
/// Dropping the handle does NOT unsubscribe.
pub struct Subscription {
    state: Weak<Mutex<SinkState>>,
    subscriber: Option<Subscriber>,
    done: AtomicBool,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            state: Weak::new(),
            subscriber: None,
            done: AtomicBool::new(true),
        }
    }

    pub fn unsubscribe(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        let (Some(state), Some(sub)) = (self.state.upgrade(), self.subscriber.as_ref()) else {
            return;
        };
        lock(&state).subscribers.retain(|s| !Arc::ptr_eq(s, sub));
    }
}

fn lock(state: &Mutex<SinkState>) -> MutexGuard<'_, SinkState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

// ===========================================================================
// No-op logger
// ===========================================================================

/// Logger that drops every message.
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _message: &str) {}
    fn info(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}
