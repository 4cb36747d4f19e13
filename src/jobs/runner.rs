//! Generation task runner.
//!
//! Drives a caller-supplied stream of [`JobEvent`]s to completion in a
//! background tokio task, forwarding every item into the registry and closing
//! the job out when the stream ends or fails. The runner never interprets
//! event contents beyond the terminal marker, and it keeps running with zero
//! subscribers: disconnecting clients must not re-trigger or starve a
//! generation.
//!
//! There is no cancellation path. A spawned runner always drives its producer
//! to completion or failure.

use futures::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::GenerationError;

use super::event::JobEvent;
use super::job::JobHandle;
use super::registry::JobRegistry;

/// Result of [`start`]: either this call spawned the runner or it attached to
/// a run already in flight.
#[derive(Debug)]
pub struct StartOutcome {
    /// True when this call created the job and spawned its runner.
    pub is_new: bool,
    /// Handle for observing the job.
    pub handle: JobHandle,
}

/// Start the generation for `key`, or attach to the one already running.
///
/// `make_producer` is only invoked when the job is new, and the new/attach
/// decision happens under a single registry lock acquisition, so N concurrent
/// calls for the same key yield exactly one producer execution and N
/// observers.
pub fn start<S, F>(registry: &JobRegistry, key: &str, make_producer: F) -> StartOutcome
where
    F: FnOnce() -> S,
    S: Stream<Item = Result<JobEvent, GenerationError>> + Send + 'static,
{
    let attach = registry.create_or_attach(key);
    if attach.is_new {
        spawn(registry.clone(), key.to_string(), make_producer());
    }
    StartOutcome {
        is_new: attach.is_new,
        handle: attach.handle,
    }
}

/// Spawn a runner for an already-created job.
///
/// Callers normally use [`start`]; this entry point exists for transports
/// that created the job themselves via `create_job`.
pub fn spawn<S>(registry: JobRegistry, key: String, producer: S) -> JoinHandle<()>
where
    S: Stream<Item = Result<JobEvent, GenerationError>> + Send + 'static,
{
    tokio::spawn(drive(registry, key, producer))
}

async fn drive<S>(registry: JobRegistry, key: String, producer: S)
where
    S: Stream<Item = Result<JobEvent, GenerationError>>,
{
    info!(job = %key, "generation task started");
    let mut producer = std::pin::pin!(producer);
    let mut terminal: Option<JobEvent> = None;

    while let Some(item) = producer.next().await {
        match item {
            Ok(event) => {
                let ends_stream = event.is_terminal();
                if ends_stream {
                    terminal = Some(event.clone());
                }
                registry.push_event(&key, event);
                if ends_stream {
                    break;
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!(job = %key, error = %message, "generation task failed");
                registry.push_event(&key, JobEvent::error(message.clone()));
                registry.fail_job(&key, message);
                return;
            }
        }
    }

    match terminal {
        Some(JobEvent::Error { message }) => {
            warn!(job = %key, error = %message, "generation task reported failure");
            registry.fail_job(&key, message);
        }
        Some(_) => registry.complete_job(&key),
        None => {
            // Producer exhausted without a terminal marker; emit one so
            // subscribers always observe the end of the sequence.
            registry.push_event(&key, JobEvent::Done);
            registry.complete_job(&key);
        }
    }
}
