//! Configuration for the generation core.
//!
//! Credentials come from the environment: `<PROVIDER>_API_KEYS` holds a
//! comma-separated list of secrets for that provider (e.g.
//! `OPENAI_API_KEYS=sk-aaa,sk-bbb`). Entries are labeled `<provider>-N` in
//! load order and the set is fixed for the life of the process.

use std::env;
use std::time::Duration;

use crate::error::ProviderError;
use crate::jobs::DEFAULT_EVENT_CAPACITY;
use crate::llm::{Credential, KeyPool, DEFAULT_COOLDOWN};

/// Default generation model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Default provider name; also selects the credentials env var.
pub const DEFAULT_PROVIDER: &str = "openai";

/// Tunables for the generation core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Provider name (scopes the credential pool).
    pub provider: String,
    /// Model identifier sent with every generation request.
    pub model: String,
    /// Override for the provider API base URL.
    pub base_url: Option<String>,
    /// Cooldown applied to a credential after a rate-limit signal.
    pub cooldown: Duration,
    /// Maximum buffered events retained per job.
    pub event_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            cooldown: DEFAULT_COOLDOWN,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl CoreConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the provider name.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    /// Sets the generation model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Sets a custom API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the rate-limit cooldown duration.
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    /// Sets the per-job event capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Name of the credentials env var for a provider.
fn credentials_var(provider: &str) -> String {
    format!(
        "{}_API_KEYS",
        provider.to_ascii_uppercase().replace('-', "_")
    )
}

/// Load the credential list for `provider` from the environment.
pub fn credentials_from_env(provider: &str) -> Result<Vec<Credential>, ProviderError> {
    let var = credentials_var(provider);
    let raw = env::var(&var)
        .map_err(|_| ProviderError::MissingCredentials(provider.to_string()))?;

    let credentials: Vec<Credential> = raw
        .split(',')
        .map(str::trim)
        .filter(|secret| !secret.is_empty())
        .enumerate()
        .map(|(index, secret)| Credential::new(format!("{}-{}", provider, index + 1), secret))
        .collect();

    if credentials.is_empty() {
        return Err(ProviderError::MissingCredentials(provider.to_string()));
    }
    Ok(credentials)
}

/// Build the credential pool for `provider` from the environment.
pub fn pool_from_env(provider: &str) -> Result<KeyPool, ProviderError> {
    Ok(KeyPool::new(provider, credentials_from_env(provider)?))
}
