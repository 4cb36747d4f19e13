//! Per-job state: lifecycle status, the buffered event log, the subscriber
//! list and the shared completion signal.
//!
//! A `Job` is owned exclusively by the registry and only ever mutated through
//! registry methods while the registry lock is held. Callers outside the
//! registry interact with jobs through [`JobHandle`], a cheap clone that can
//! be awaited for completion from any number of tasks.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::event::JobEvent;

/// Default maximum number of buffered events retained per job.
///
/// Generation output is chunked at paragraph granularity, so even long wiki
/// runs stay well under this. Once full, the oldest events are trimmed and
/// the log's base index advances.
pub const DEFAULT_EVENT_CAPACITY: usize = 8192;

/// Lifecycle status of a job.
///
/// The only transitions are `Running -> Complete` and `Running -> Error`;
/// both are terminal and sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Generation is in progress.
    Running,
    /// Generation finished successfully.
    Complete,
    /// Generation failed; the job carries an error message.
    Error,
}

impl JobStatus {
    /// Whether the job has left the running state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Running => write!(f, "running"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// Callback invoked synchronously for every event pushed to a job.
///
/// Callbacks must be non-blocking and must not call back into the registry;
/// the usual implementation forwards the event into an unbounded channel and
/// ignores send failures (a closed channel means the subscriber is gone and
/// its wrapper will unsubscribe).
pub type SubscriberFn = Box<dyn Fn(&JobEvent) + Send + Sync>;

/// A registered subscriber callback with its registry-assigned id.
pub(crate) struct Subscriber {
    pub(crate) id: u64,
    pub(crate) notify: SubscriberFn,
}

/// Internal job state, owned by the registry.
pub(crate) struct Job {
    pub(crate) status: JobStatus,
    /// Buffered event log. Trimmed from the front once `capacity` is hit.
    pub(crate) events: VecDeque<JobEvent>,
    /// Absolute index of `events[0]`; grows as old events are trimmed.
    pub(crate) first_index: u64,
    pub(crate) capacity: usize,
    pub(crate) error: Option<String>,
    pub(crate) subscribers: Vec<Subscriber>,
    pub(crate) done_tx: watch::Sender<JobStatus>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a running job and the handle callers use to observe it.
    pub(crate) fn new(key: &str, capacity: usize) -> (Self, JobHandle) {
        let (done_tx, done_rx) = watch::channel(JobStatus::Running);
        let job = Self {
            status: JobStatus::Running,
            events: VecDeque::new(),
            first_index: 0,
            capacity,
            error: None,
            subscribers: Vec::new(),
            done_tx,
            created_at: Utc::now(),
            finished_at: None,
        };
        let handle = JobHandle {
            key: key.to_string(),
            done_rx,
        };
        (job, handle)
    }

    /// Build a fresh handle for an attaching caller.
    pub(crate) fn handle(&self, key: &str) -> JobHandle {
        JobHandle {
            key: key.to_string(),
            done_rx: self.done_tx.subscribe(),
        }
    }

    /// Append an event and notify every subscriber, in subscription order.
    ///
    /// Must only be called while the job is running; the registry enforces
    /// the terminal-state guard.
    pub(crate) fn push(&mut self, event: JobEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
            self.first_index += 1;
        }
        self.events.push_back(event);
        let event = self.events.back().expect("just pushed");
        for subscriber in &self.subscribers {
            (subscriber.notify)(event);
        }
    }

    /// Transition to a terminal status and resolve the completion signal.
    ///
    /// Returns false (and changes nothing) if the job is already terminal.
    pub(crate) fn finish(&mut self, status: JobStatus, error: Option<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
        self.done_tx.send_replace(status);
        true
    }

    /// Total number of events ever pushed, including trimmed ones.
    pub(crate) fn log_len(&self) -> u64 {
        self.first_index + self.events.len() as u64
    }
}

/// Cheap, cloneable observer for a job.
///
/// Handles stay valid after the job reaches a terminal state and after other
/// handles are dropped; awaiting [`JobHandle::done`] from many tasks
/// concurrently is the intended use.
#[derive(Debug, Clone)]
pub struct JobHandle {
    key: String,
    done_rx: watch::Receiver<JobStatus>,
}

impl JobHandle {
    /// The job's stable key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current lifecycle status.
    pub fn status(&self) -> JobStatus {
        *self.done_rx.borrow()
    }

    /// Wait until the job reaches a terminal status and return it.
    ///
    /// Resolves immediately if the job is already terminal. If the job was
    /// evicted from the registry while still running, the last observed
    /// status is returned.
    pub async fn done(&self) -> JobStatus {
        let mut rx = self.done_rx.clone();
        let result = rx.wait_for(|status| status.is_terminal()).await.map(|s| *s);
        match result {
            Ok(status) => status,
            Err(_) => *rx.borrow(),
        }
    }
}
