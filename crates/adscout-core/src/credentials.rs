//! Rotating pool of upstream API credentials.
//!
//! Each credential may be bound to its own outbound proxy. The pool hands
//! out copies of credentials; the lock is only held for index/cooldown
//! bookkeeping, never across a network call. Call counters are atomics and
//! do not take the lock at all.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::AppError;

/// Parsed `[name=]token[|proxy]` entry from configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialSpec {
    pub name: String,
    pub token: String,
    pub proxy: Option<String>,
}

impl fmt::Debug for CredentialSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialSpec")
            .field("name", &self.name)
            .field("token", &"<redacted>")
            .field("proxy", &self.proxy)
            .finish()
    }
}

impl CredentialSpec {
    pub fn new(name: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Parses one entry. Unnamed entries are called `token-{position}`.
    pub fn parse(entry: &str, position: usize) -> Result<Self, AppError> {
        let entry = entry.trim();
        let (name, rest) = match entry.split_once('=') {
            // A bare token may itself contain '=' padding; only treat the
            // prefix as a name when it looks like one.
            Some((name, rest))
                if !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') =>
            {
                (name.to_string(), rest)
            }
            _ => (format!("token-{}", position + 1), entry),
        };
        let (token, proxy) = match rest.split_once('|') {
            Some((token, proxy)) => (token.trim(), Some(proxy.trim())),
            None => (rest.trim(), None),
        };
        if token.is_empty() {
            return Err(AppError::ConfigError(format!(
                "credential entry {} has an empty token",
                position + 1
            )));
        }
        let proxy = match proxy {
            Some(p) if !p.is_empty() => {
                url::Url::parse(p).map_err(|e| {
                    AppError::ConfigError(format!("credential '{name}' has invalid proxy: {e}"))
                })?;
                Some(p.to_string())
            }
            _ => None,
        };
        Ok(Self {
            name,
            token: token.to_string(),
            proxy,
        })
    }

    /// Parses a comma-separated list, skipping blank entries.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, AppError> {
        raw.split(',')
            .filter(|entry| !entry.trim().is_empty())
            .enumerate()
            .map(|(position, entry)| Self::parse(entry, position))
            .collect()
    }
}

/// A credential handed out by the pool.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub index: usize,
    pub name: String,
    pub token: String,
    pub proxy: Option<String>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("name", &self.name)
            .field("token", &"<redacted>")
            .field("proxy", &self.proxy)
            .finish()
    }
}

/// Result of benching a rate-limited credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitOutcome {
    /// Another credential is available and is now current.
    Switched(Credential),
    /// Every credential is cooling down; the earliest frees up after `retry_after`.
    Exhausted { retry_after: Duration },
}

#[derive(Debug, Clone)]
pub struct CredentialPoolConfig {
    /// Cooldown applied when upstream embeds a rate-limit error in its JSON body.
    pub rate_limit_cooldown: Duration,
}

impl Default for CredentialPoolConfig {
    fn default() -> Self {
        Self {
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

/// Per-credential monitoring snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CredentialStats {
    pub name: String,
    pub has_proxy: bool,
    pub active: bool,
    pub current: bool,
    pub calls: u64,
    pub errors: u64,
    pub rate_limit_hits: u64,
    pub cooldown_remaining: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicU64,
    errors: AtomicU64,
    rate_limit_hits: AtomicU64,
}

#[derive(Debug, Clone)]
struct SlotState {
    active: bool,
    rate_limited_until: Option<Instant>,
}

impl SlotState {
    fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.rate_limited_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    fn is_usable(&self, now: Instant) -> bool {
        self.active && self.cooldown_remaining(now).is_none()
    }
}

#[derive(Debug)]
struct PoolInner {
    current: usize,
    slots: Vec<SlotState>,
}

impl PoolInner {
    /// First usable slot after `from`, wrapping around and ending at `from` itself.
    fn next_usable(&self, from: usize, now: Instant) -> Option<usize> {
        let n = self.slots.len();
        (1..=n)
            .map(|offset| (from + offset) % n)
            .find(|&i| self.slots[i].is_usable(now))
    }

    fn earliest_release(&self, now: Instant) -> Duration {
        self.slots
            .iter()
            .filter(|s| s.active)
            .filter_map(|s| s.cooldown_remaining(now))
            .min()
            .unwrap_or(Duration::ZERO)
    }
}

/// Thread-safe credential rotator. Cloning shares state.
#[derive(Clone)]
pub struct CredentialPool {
    credentials: Arc<[Credential]>,
    counters: Arc<[Counters]>,
    inner: Arc<Mutex<PoolInner>>,
    config: CredentialPoolConfig,
}

impl fmt::Debug for CredentialPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPool")
            .field("credentials", &self.credentials.len())
            .finish()
    }
}

impl CredentialPool {
    pub fn new(specs: Vec<CredentialSpec>, config: CredentialPoolConfig) -> Self {
        let credentials: Vec<Credential> = specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Credential {
                index,
                name: spec.name,
                token: spec.token,
                proxy: spec.proxy,
            })
            .collect();
        let counters: Vec<Counters> = credentials.iter().map(|_| Counters::default()).collect();
        let slots = credentials
            .iter()
            .map(|_| SlotState {
                active: true,
                rate_limited_until: None,
            })
            .collect();

        Self {
            credentials: credentials.into(),
            counters: counters.into(),
            inner: Arc::new(Mutex::new(PoolInner { current: 0, slots })),
            config,
        }
    }

    pub fn config(&self) -> &CredentialPoolConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    fn lock_inner(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned credential pool mutex");
            poisoned.into_inner()
        })
    }

    /// The credential currently in rotation, whether or not it is cooling down.
    pub fn current(&self) -> Option<Credential> {
        let current = self.lock_inner().current;
        self.credentials.get(current).cloned()
    }

    /// Returns a usable credential, moving the pointer if the current one is benched.
    pub fn acquire(&self) -> Result<Credential, AppError> {
        if self.credentials.is_empty() {
            return Err(AppError::NoCredentials);
        }
        let now = Instant::now();
        let mut inner = self.lock_inner();
        let current = inner.current;
        if inner.slots[current].is_usable(now) {
            return Ok(self.credentials[current].clone());
        }
        match inner.next_usable(current, now) {
            Some(next) => {
                inner.current = next;
                Ok(self.credentials[next].clone())
            }
            None => {
                if inner.slots.iter().all(|s| !s.active) {
                    return Err(AppError::NoCredentials);
                }
                Err(AppError::CredentialsExhausted {
                    retry_after: inner.earliest_release(now),
                })
            }
        }
    }

    /// Advances to the next usable credential in ring order. No-op with fewer than two.
    pub fn rotate(&self, reason: &str) -> Option<Credential> {
        let n = self.credentials.len();
        if n == 0 {
            return None;
        }
        if n == 1 {
            return Some(self.credentials[0].clone());
        }
        let now = Instant::now();
        let mut inner = self.lock_inner();
        let from = inner.current;
        let next = inner.next_usable(from, now).unwrap_or((from + 1) % n);
        inner.current = next;
        drop(inner);

        let chosen = &self.credentials[next];
        tracing::debug!(
            from = %self.credentials[from].name,
            to = %chosen.name,
            reason,
            "Rotated credential"
        );
        Some(chosen.clone())
    }

    /// Benches `index` for `cooldown` and switches to the next usable credential.
    pub fn mark_rate_limited(&self, index: usize, cooldown: Duration) -> RateLimitOutcome {
        let now = Instant::now();
        if let Some(counters) = self.counters.get(index) {
            counters.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
        }

        let mut inner = self.lock_inner();
        if let Some(slot) = inner.slots.get_mut(index) {
            slot.rate_limited_until = Some(now + cooldown);
        }
        if inner.slots.is_empty() {
            return RateLimitOutcome::Exhausted {
                retry_after: cooldown,
            };
        }

        match inner.next_usable(index % inner.slots.len(), now) {
            Some(next) => {
                inner.current = next;
                drop(inner);
                let chosen = self.credentials[next].clone();
                tracing::info!(
                    credential = %self.credentials[index].name,
                    next = %chosen.name,
                    cooldown_secs = cooldown.as_secs(),
                    "Credential rate limited, switched"
                );
                RateLimitOutcome::Switched(chosen)
            }
            None => {
                let retry_after = inner.earliest_release(now);
                drop(inner);
                tracing::warn!(
                    credential = %self.credentials[index].name,
                    retry_after_secs = retry_after.as_secs(),
                    "All credentials rate limited"
                );
                RateLimitOutcome::Exhausted { retry_after }
            }
        }
    }

    /// Permanently removes a credential from rotation (e.g. revoked token).
    pub fn deactivate(&self, index: usize, reason: &str) {
        let mut inner = self.lock_inner();
        if let Some(slot) = inner.slots.get_mut(index) {
            slot.active = false;
        }
        drop(inner);
        if let Some(credential) = self.credentials.get(index) {
            tracing::warn!(credential = %credential.name, reason, "Credential deactivated");
        }
    }

    /// Updates call counters without taking the pool lock.
    pub fn record_call(&self, index: usize, success: bool) {
        if let Some(counters) = self.counters.get(index) {
            counters.calls.fetch_add(1, Ordering::Relaxed);
            if !success {
                counters.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Credentials that are active and not cooling down.
    pub fn usable_count(&self) -> usize {
        let now = Instant::now();
        self.lock_inner()
            .slots
            .iter()
            .filter(|s| s.is_usable(now))
            .count()
    }

    pub fn stats(&self) -> Vec<CredentialStats> {
        let now = Instant::now();
        let inner = self.lock_inner();
        self.credentials
            .iter()
            .zip(self.counters.iter())
            .zip(inner.slots.iter())
            .map(|((credential, counters), slot)| CredentialStats {
                name: credential.name.clone(),
                has_proxy: credential.proxy.is_some(),
                active: slot.active,
                current: credential.index == inner.current,
                calls: counters.calls.load(Ordering::Relaxed),
                errors: counters.errors.load(Ordering::Relaxed),
                rate_limit_hits: counters.rate_limit_hits.load(Ordering::Relaxed),
                cooldown_remaining: slot.cooldown_remaining(now),
            })
            .collect()
    }
}
