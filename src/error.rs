//! Error types for wiki-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Job registry lifecycle operations
//! - Credential dispatch and rate-limit rotation
//! - Provider API interactions
//! - Generation task execution

use thiserror::Error;

/// Errors that can occur during job registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Job '{0}' is already running")]
    AlreadyExists(String),

    #[error("Job '{0}' not found in registry")]
    NotFound(String),
}

/// Errors that can occur while interacting with a generation provider.
///
/// `RateLimited` is the only variant the dispatcher treats as transient;
/// everything else propagates to the caller unchanged.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse provider response: {0}")]
    Parse(String),

    #[error("No credentials configured for provider '{0}'")]
    MissingCredentials(String),
}

impl ProviderError {
    /// Whether this error should trigger credential rotation.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }
}

/// Errors that can occur during credential dispatch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The pool has no credentials at all. Rate-limit cooldowns never cause
    /// this; an empty pool is a configuration error.
    #[error("Credential pool for provider '{0}' is empty")]
    PoolExhausted(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Errors raised by a generation producer while a job is running.
///
/// The task runner converts these into a single terminal error event on the
/// job before transitioning it to the error state.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation call failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("{0}")]
    Producer(String),
}

impl GenerationError {
    /// Create a producer-side error from a plain message.
    pub fn producer(message: impl Into<String>) -> Self {
        GenerationError::Producer(message.into())
    }
}
