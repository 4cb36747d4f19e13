//! Credential pool with round-robin rotation and per-entry cooldowns.
//!
//! A pool holds the interchangeable API keys for one upstream provider.
//! Entries are loaded once at configuration time and never removed; a
//! rate-limited entry is only excluded until its cooldown elapses. Selection
//! is an array plus a cursor; the pool is single digits to low tens of
//! entries, so no priority queue is warranted.
//!
//! Timestamps use `tokio::time::Instant` so cooldown behavior is fully
//! testable under paused time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::{Duration, Instant};

/// One labeled API key for a provider.
///
/// The cooldown timestamp is the only mutable attribute. It sits behind its
/// own mutex so concurrent dispatchers sharing the pool update entries
/// independently; there is no pool-wide lock.
pub struct Credential {
    label: String,
    secret: String,
    cooldown_until: Mutex<Option<Instant>>,
}

impl Credential {
    /// Create a credential from a label and secret value.
    pub fn new(label: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            secret: secret.into(),
            cooldown_until: Mutex::new(None),
        }
    }

    /// Human-readable label (e.g., "openai-2").
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The secret value, passed to the provider client on each call.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Masked form of the secret, safe for logs and CLI output.
    pub fn masked(&self) -> String {
        if self.secret.len() <= 8 {
            "*".repeat(self.secret.len())
        } else {
            format!(
                "{}...{}",
                &self.secret[..4],
                &self.secret[self.secret.len() - 4..]
            )
        }
    }

    /// Whether the entry is selectable at `now`.
    pub fn is_ready(&self, now: Instant) -> bool {
        match *self.cooldown_until.lock().expect("cooldown mutex poisoned") {
            Some(until) => now >= until,
            None => true,
        }
    }

    /// Exclude this entry from selection for `duration` from now.
    pub fn start_cooldown(&self, duration: Duration) {
        let until = Instant::now() + duration;
        *self.cooldown_until.lock().expect("cooldown mutex poisoned") = Some(until);
    }

    /// The instant at which the entry becomes selectable again, if it is
    /// currently cooling down.
    pub fn ready_at(&self) -> Option<Instant> {
        (*self.cooldown_until.lock().expect("cooldown mutex poisoned"))
            .filter(|until| *until > Instant::now())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("label", &self.label)
            .field("secret", &self.masked())
            .finish()
    }
}

/// The set of credentials for one provider, with a rotation cursor.
pub struct KeyPool {
    provider: String,
    entries: Vec<Arc<Credential>>,
    cursor: AtomicUsize,
}

impl KeyPool {
    /// Build a pool for `provider` from its credentials.
    pub fn new(provider: impl Into<String>, credentials: Vec<Credential>) -> Self {
        Self {
            provider: provider.into(),
            entries: credentials.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Provider this pool serves.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Number of configured credentials.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool has no credentials at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, for inspection (labels, masked secrets).
    pub fn entries(&self) -> &[Arc<Credential>] {
        &self.entries
    }

    /// Select the next usable credential, advancing the rotation cursor past
    /// any entry still cooling down.
    ///
    /// Scans at most one full cycle; returns `None` when every entry is
    /// cooling down (and for an empty pool).
    pub fn next_usable(&self) -> Option<Arc<Credential>> {
        let count = self.entries.len();
        if count == 0 {
            return None;
        }
        let now = Instant::now();
        for _ in 0..count {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst) % count;
            let entry = &self.entries[index];
            if entry.is_ready(now) {
                return Some(Arc::clone(entry));
            }
        }
        None
    }

    /// Earliest instant at which some cooling entry becomes usable again.
    ///
    /// `None` for an empty pool. When called while every entry is cooling
    /// down, this is the wake-up point for a waiting dispatcher.
    pub fn soonest_ready(&self) -> Option<Instant> {
        let now = Instant::now();
        self.entries
            .iter()
            .map(|entry| entry.ready_at().unwrap_or(now))
            .min()
    }
}

impl std::fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPool")
            .field("provider", &self.provider)
            .field("entries", &self.entries.len())
            .finish()
    }
}
