//! In-memory job registry: the control plane for generation jobs.
//!
//! The registry owns every [`Job`] for its entire lifetime. All state
//! transitions and event pushes go through registry methods, and each job is
//! driven by exactly one task runner, so per-job mutation is single-writer by
//! construction. Subscribers are an explicit per-job callback list (not a
//! broadcast channel) so delivery order, failure isolation and the absence of
//! implicit buffering are enforced here rather than by a library default.
//!
//! Jobs are never garbage-collected automatically. Finished jobs stay
//! available for buffered replay until the embedding application calls
//! [`JobRegistry::evict_terminal`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::error::RegistryError;

use super::event::JobEvent;
use super::job::{Job, JobHandle, JobStatus, Subscriber, SubscriberFn, DEFAULT_EVENT_CAPACITY};

/// Result of [`JobRegistry::create_or_attach`].
#[derive(Debug)]
pub struct Attach {
    /// True when this call created the job; the caller must start a runner.
    pub is_new: bool,
    /// Handle for observing the job, new or pre-existing.
    pub handle: JobHandle,
}

struct RegistryInner {
    jobs: Mutex<HashMap<String, Job>>,
    next_subscriber_id: AtomicU64,
    event_capacity: usize,
}

/// Shared registry handle. Cloning is cheap and all clones address the same
/// underlying job table.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<RegistryInner>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRegistry {
    /// Create a registry with the default per-job event capacity.
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create a registry whose jobs buffer at most `capacity` events.
    ///
    /// Once a job's log is full, the oldest events are trimmed; replay then
    /// starts from the oldest retained event.
    pub fn with_event_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                jobs: Mutex::new(HashMap::new()),
                next_subscriber_id: AtomicU64::new(0),
                event_capacity: capacity.max(1),
            }),
        }
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        self.inner.jobs.lock().expect("job registry mutex poisoned")
    }

    /// Create a new running job under `key`.
    ///
    /// Fails with [`RegistryError::AlreadyExists`] while a run is live for
    /// the key. A finished job under the same key is replaced, which is how a
    /// wiki gets regenerated after completion.
    pub fn create_job(&self, key: &str) -> Result<JobHandle, RegistryError> {
        let mut jobs = self.jobs();
        if let Some(existing) = jobs.get(key) {
            if !existing.status.is_terminal() {
                return Err(RegistryError::AlreadyExists(key.to_string()));
            }
        }
        let (job, handle) = Job::new(key, self.inner.event_capacity);
        jobs.insert(key.to_string(), job);
        info!(job = key, "created generation job");
        Ok(handle)
    }

    /// Whether a job exists for `key` and is still running.
    pub fn is_running(&self, key: &str) -> bool {
        self.jobs()
            .get(key)
            .map(|job| !job.status.is_terminal())
            .unwrap_or(false)
    }

    /// Look up a job in any state.
    pub fn get_job(&self, key: &str) -> Option<JobHandle> {
        self.jobs().get(key).map(|job| job.handle(key))
    }

    /// Attach to the running job for `key`, or create one.
    ///
    /// The check and the creation happen under a single lock acquisition,
    /// which is what guarantees at most one runner per key even when many
    /// requests race on the same repository.
    pub fn create_or_attach(&self, key: &str) -> Attach {
        let mut jobs = self.jobs();
        if let Some(existing) = jobs.get(key) {
            if !existing.status.is_terminal() {
                debug!(job = key, "attaching to running job");
                return Attach {
                    is_new: false,
                    handle: existing.handle(key),
                };
            }
        }
        let (job, handle) = Job::new(key, self.inner.event_capacity);
        jobs.insert(key.to_string(), job);
        info!(job = key, "created generation job");
        Attach {
            is_new: true,
            handle,
        }
    }

    /// Append `event` to the job's log and synchronously notify every
    /// subscriber, in subscription order.
    ///
    /// A missing or already-terminal job makes this a no-op; that guards
    /// against a producer that keeps yielding after the job was closed out.
    pub fn push_event(&self, key: &str, event: JobEvent) {
        let mut jobs = self.jobs();
        match jobs.get_mut(key) {
            Some(job) if !job.status.is_terminal() => job.push(event),
            Some(_) => debug!(job = key, "dropping event pushed after terminal state"),
            None => debug!(job = key, "dropping event for unknown job"),
        }
    }

    /// Register `callback` for all events pushed after this call.
    ///
    /// History is not replayed; pair with [`JobRegistry::buffered_events`]
    /// and de-duplicate by log position, or use
    /// [`JobRegistry::attach_stream`] which does both under one lock.
    /// Returns `None` if no job exists for `key`. Dropping the returned
    /// [`Subscription`] deregisters the callback.
    pub fn subscribe(&self, key: &str, callback: SubscriberFn) -> Option<Subscription> {
        let mut jobs = self.jobs();
        let job = jobs.get_mut(key)?;
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        job.subscribers.push(Subscriber {
            id,
            notify: callback,
        });
        debug!(job = key, subscriber = id, "subscriber registered");
        Some(Subscription {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            id,
        })
    }

    /// Snapshot of the buffered event log so far. Pure read.
    ///
    /// Returns the retained window; for jobs below the event capacity this is
    /// the full history from the first event.
    pub fn buffered_events(&self, key: &str) -> Vec<JobEvent> {
        self.jobs()
            .get(key)
            .map(|job| job.events.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of events ever pushed to the job, including any trimmed
    /// from the buffered window.
    pub fn event_count(&self, key: &str) -> u64 {
        self.jobs().get(key).map(|job| job.log_len()).unwrap_or(0)
    }

    /// Buffered replay plus live delivery, registered atomically.
    ///
    /// The snapshot and the live subscription are taken under one lock
    /// acquisition, so the stream observes every event exactly once with no
    /// client-side de-duplication. Returns `None` if no job exists for `key`.
    pub fn attach_stream(&self, key: &str) -> Option<JobStream> {
        let mut jobs = self.jobs();
        let job = jobs.get_mut(key)?;
        let snapshot: Vec<JobEvent> = job.events.iter().cloned().collect();
        let handle = job.handle(key);

        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        job.subscribers.push(Subscriber {
            id,
            // A closed channel means the consumer went away; the subscription
            // guard removes the callback when the stream is dropped.
            notify: Box::new(move |event: &JobEvent| {
                let _ = tx.send(event.clone());
            }),
        });

        Some(JobStream {
            handle,
            snapshot: snapshot.into(),
            live: UnboundedReceiverStream::new(rx),
            _subscription: Subscription {
                inner: Arc::clone(&self.inner),
                key: key.to_string(),
                id,
            },
        })
    }

    /// Transition the job to `complete` and resolve its completion signal.
    /// Idempotent; terminal state is sticky.
    pub fn complete_job(&self, key: &str) {
        self.finish(key, JobStatus::Complete, None);
    }

    /// Transition the job to `error` with a human-readable message and
    /// resolve its completion signal. Idempotent; terminal state is sticky.
    pub fn fail_job(&self, key: &str, message: impl Into<String>) {
        self.finish(key, JobStatus::Error, Some(message.into()));
    }

    fn finish(&self, key: &str, status: JobStatus, error: Option<String>) {
        let mut jobs = self.jobs();
        let Some(job) = jobs.get_mut(key) else {
            warn!(job = key, %status, "finish requested for unknown job");
            return;
        };
        if !job.finish(status, error) {
            debug!(job = key, %status, "job already terminal");
            return;
        }
        // Terminal state releases every subscriber; live channels close and
        // completion waiters resume.
        job.subscribers.clear();
        let elapsed_ms = (Utc::now() - job.created_at).num_milliseconds();
        info!(
            job = key,
            %status,
            events = job.log_len(),
            elapsed_ms,
            "job finished"
        );
    }

    /// Error message of a failed job, if any.
    pub fn job_error(&self, key: &str) -> Option<String> {
        self.jobs().get(key).and_then(|job| job.error.clone())
    }

    /// Remove finished jobs that reached a terminal state at least `min_age`
    /// ago. Running jobs are never evicted. Returns the number removed.
    pub fn evict_terminal(&self, min_age: Duration) -> usize {
        let mut jobs = self.jobs();
        let before = jobs.len();
        let now = Utc::now();
        jobs.retain(|key, job| match job.finished_at {
            Some(finished_at) => {
                let age = (now - finished_at).to_std().unwrap_or_default();
                let keep = age < min_age;
                if !keep {
                    debug!(job = key, "evicting finished job");
                }
                keep
            }
            None => true,
        });
        before - jobs.len()
    }

    /// Number of jobs currently held, in any state.
    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    /// Whether the registry holds no jobs.
    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }
}

/// Deregistration handle returned by [`JobRegistry::subscribe`].
///
/// Dropping it removes the callback from the job's subscriber list. Removing
/// a subscriber has no effect on the job or on other subscribers.
pub struct Subscription {
    inner: Arc<RegistryInner>,
    key: String,
    id: u64,
}

impl Subscription {
    /// Explicitly deregister the callback.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut jobs) = self.inner.jobs.lock() {
            if let Some(job) = jobs.get_mut(&self.key) {
                job.subscribers.retain(|s| s.id != self.id);
            }
        }
    }
}

/// Gap-free view of a job: buffered replay followed by live events.
///
/// Produced by [`JobRegistry::attach_stream`]. The live channel closes once
/// the job reaches a terminal state (or the stream is dropped), so consumers
/// can drain with [`JobStream::next_event`] until `None`.
pub struct JobStream {
    /// Handle for status checks and awaiting completion.
    pub handle: JobHandle,
    snapshot: std::collections::VecDeque<JobEvent>,
    live: UnboundedReceiverStream<JobEvent>,
    _subscription: Subscription,
}

impl JobStream {
    /// Next event: replayed history first, then live pushes.
    ///
    /// Returns `None` once the job has finished and all events were
    /// delivered.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        if let Some(event) = self.snapshot.pop_front() {
            return Some(event);
        }
        self.live.next().await
    }
}

impl futures::Stream for JobStream {
    type Item = JobEvent;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<JobEvent>> {
        if let Some(event) = self.snapshot.pop_front() {
            return std::task::Poll::Ready(Some(event));
        }
        std::pin::Pin::new(&mut self.live).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn collector() -> (Arc<StdMutex<Vec<JobEvent>>>, SubscriberFn) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: SubscriberFn = Box::new(move |event: &JobEvent| {
            sink.lock().expect("collector lock").push(event.clone());
        });
        (seen, callback)
    }

    #[test]
    fn test_create_job_rejects_running_duplicate() {
        let registry = JobRegistry::new();
        registry.create_job("wiki:acme/widgets").expect("first create");

        let err = registry.create_job("wiki:acme/widgets").unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists(_)));
        assert!(registry.is_running("wiki:acme/widgets"));
    }

    #[test]
    fn test_create_job_replaces_terminal_job() {
        let registry = JobRegistry::new();
        registry.create_job("wiki:acme/widgets").expect("create");
        registry.push_event("wiki:acme/widgets", JobEvent::chunk("old run"));
        registry.complete_job("wiki:acme/widgets");

        let handle = registry.create_job("wiki:acme/widgets").expect("recreate");
        assert_eq!(handle.status(), JobStatus::Running);
        assert!(registry.buffered_events("wiki:acme/widgets").is_empty());
    }

    #[test]
    fn test_push_event_noop_for_missing_and_terminal_jobs() {
        let registry = JobRegistry::new();
        registry.push_event("wiki:nobody/nothing", JobEvent::chunk("lost"));
        assert!(registry.buffered_events("wiki:nobody/nothing").is_empty());

        registry.create_job("wiki:acme/widgets").expect("create");
        registry.complete_job("wiki:acme/widgets");
        registry.push_event("wiki:acme/widgets", JobEvent::chunk("late"));
        assert!(registry.buffered_events("wiki:acme/widgets").is_empty());
    }

    #[test]
    fn test_subscribers_see_future_events_in_push_order() {
        let registry = JobRegistry::new();
        registry.create_job("wiki:acme/widgets").expect("create");
        registry.push_event("wiki:acme/widgets", JobEvent::status("before subscribe"));

        let (seen, callback) = collector();
        let subscription = registry
            .subscribe("wiki:acme/widgets", callback)
            .expect("subscribe");

        registry.push_event("wiki:acme/widgets", JobEvent::chunk("Hello"));
        registry.push_event("wiki:acme/widgets", JobEvent::chunk(" world"));

        let events = seen.lock().expect("collector lock").clone();
        assert_eq!(
            events,
            vec![JobEvent::chunk("Hello"), JobEvent::chunk(" world")]
        );

        subscription.unsubscribe();
        registry.push_event("wiki:acme/widgets", JobEvent::chunk("unseen"));
        assert_eq!(seen.lock().expect("collector lock").len(), 2);
    }

    #[test]
    fn test_subscribe_missing_job_returns_none() {
        let registry = JobRegistry::new();
        let (_, callback) = collector();
        assert!(registry.subscribe("wiki:nobody/nothing", callback).is_none());
    }

    #[test]
    fn test_snapshot_then_subscribe_covers_all_events() {
        let registry = JobRegistry::new();
        registry.create_job("wiki:acme/widgets").expect("create");
        registry.push_event("wiki:acme/widgets", JobEvent::status("started"));
        registry.push_event("wiki:acme/widgets", JobEvent::chunk("Hello"));

        let snapshot = registry.buffered_events("wiki:acme/widgets");
        let (seen, callback) = collector();
        let _subscription = registry
            .subscribe("wiki:acme/widgets", callback)
            .expect("subscribe");

        registry.push_event("wiki:acme/widgets", JobEvent::chunk(" world"));

        let mut observed = snapshot;
        observed.extend(seen.lock().expect("collector lock").iter().cloned());
        assert_eq!(
            observed,
            vec![
                JobEvent::status("started"),
                JobEvent::chunk("Hello"),
                JobEvent::chunk(" world"),
            ]
        );
    }

    #[test]
    fn test_finish_is_idempotent_and_sticky() {
        let registry = JobRegistry::new();
        registry.create_job("wiki:acme/widgets").expect("create");

        registry.fail_job("wiki:acme/widgets", "provider unreachable");
        registry.complete_job("wiki:acme/widgets");
        registry.fail_job("wiki:acme/widgets", "second message");

        let handle = registry.get_job("wiki:acme/widgets").expect("job exists");
        assert_eq!(handle.status(), JobStatus::Error);
        assert_eq!(
            registry.job_error("wiki:acme/widgets").as_deref(),
            Some("provider unreachable")
        );
    }

    #[test]
    fn test_terminal_state_releases_subscribers() {
        let registry = JobRegistry::new();
        registry.create_job("wiki:acme/widgets").expect("create");

        let (seen, callback) = collector();
        let _subscription = registry
            .subscribe("wiki:acme/widgets", callback)
            .expect("subscribe");

        registry.complete_job("wiki:acme/widgets");
        registry.push_event("wiki:acme/widgets", JobEvent::chunk("late"));
        assert!(seen.lock().expect("collector lock").is_empty());
    }

    #[test]
    fn test_create_or_attach_single_decision_point() {
        let registry = JobRegistry::new();

        let first = registry.create_or_attach("wiki:acme/widgets");
        let second = registry.create_or_attach("wiki:acme/widgets");

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_stream_replays_then_streams_live() {
        let registry = JobRegistry::new();
        registry.create_job("wiki:acme/widgets").expect("create");
        registry.push_event("wiki:acme/widgets", JobEvent::status("started"));
        registry.push_event("wiki:acme/widgets", JobEvent::chunk("Hello"));

        let mut stream = registry
            .attach_stream("wiki:acme/widgets")
            .expect("attach stream");

        registry.push_event("wiki:acme/widgets", JobEvent::chunk(" world"));
        registry.push_event("wiki:acme/widgets", JobEvent::Done);
        registry.complete_job("wiki:acme/widgets");

        let mut events = Vec::new();
        while let Some(event) = stream.next_event().await {
            events.push(event);
        }

        assert_eq!(
            events,
            vec![
                JobEvent::status("started"),
                JobEvent::chunk("Hello"),
                JobEvent::chunk(" world"),
                JobEvent::Done,
            ]
        );
        assert_eq!(stream.handle.done().await, JobStatus::Complete);
    }

    #[test]
    fn test_event_count_includes_trimmed_events() {
        let registry = JobRegistry::with_event_capacity(2);
        registry.create_job("wiki:acme/widgets").expect("create");

        for i in 0..5 {
            registry.push_event("wiki:acme/widgets", JobEvent::chunk(format!("part {i}")));
        }

        assert_eq!(registry.event_count("wiki:acme/widgets"), 5);
        assert_eq!(
            registry.buffered_events("wiki:acme/widgets"),
            vec![JobEvent::chunk("part 3"), JobEvent::chunk("part 4")]
        );
    }

    #[test]
    fn test_evict_terminal_keeps_running_jobs() {
        let registry = JobRegistry::new();
        registry.create_job("wiki:acme/widgets").expect("create");
        registry.create_job("wiki:acme/gadgets").expect("create");
        registry.complete_job("wiki:acme/widgets");

        let evicted = registry.evict_terminal(Duration::ZERO);
        assert_eq!(evicted, 1);
        assert!(registry.get_job("wiki:acme/widgets").is_none());
        assert!(registry.is_running("wiki:acme/gadgets"));
    }
}
