//! Observable single-flight state for long-running operations.
//!
//! A [`RunState`] admits at most one run at a time within a process. A second
//! trigger while a run is active is refused (skipped, not queued).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord<T> {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: T,
}

/// Point-in-time view of a [`RunState`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot<T> {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub last: Option<RunRecord<T>>,
}

#[derive(Debug)]
struct Inner<T> {
    running_since: Option<DateTime<Utc>>,
    last: Option<RunRecord<T>>,
}

/// Idle/running/last-result state for one operation kind.
#[derive(Debug)]
pub struct RunState<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for RunState<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for RunState<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                running_since: None,
                last: None,
            })),
        }
    }
}

impl<T> RunState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a run, or return `None` if one is already in progress.
    pub fn try_begin(&self) -> Option<RunGuard<T>> {
        let mut inner = self.inner.lock();
        if inner.running_since.is_some() {
            return None;
        }
        let started_at = Utc::now();
        inner.running_since = Some(started_at);
        Some(RunGuard {
            inner: Arc::clone(&self.inner),
            started_at,
            finished: false,
        })
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running_since.is_some()
    }
}

impl<T: Clone> RunState<T> {
    pub fn snapshot(&self) -> RunSnapshot<T> {
        let inner = self.inner.lock();
        RunSnapshot {
            running: inner.running_since.is_some(),
            started_at: inner.running_since,
            last: inner.last.clone(),
        }
    }
}

/// Held for the duration of a run. Dropping it without [`RunGuard::finish`]
/// returns the state to idle and keeps the previous result.
#[derive(Debug)]
pub struct RunGuard<T> {
    inner: Arc<Mutex<Inner<T>>>,
    started_at: DateTime<Utc>,
    finished: bool,
}

impl<T> RunGuard<T> {
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Record the run's result and return to idle.
    pub fn finish(mut self, result: T) {
        let mut inner = self.inner.lock();
        inner.running_since = None;
        inner.last = Some(RunRecord {
            started_at: self.started_at,
            finished_at: Utc::now(),
            result,
        });
        self.finished = true;
    }
}

impl<T> Drop for RunGuard<T> {
    fn drop(&mut self) {
        if !self.finished {
            self.inner.lock().running_since = None;
        }
    }
}
