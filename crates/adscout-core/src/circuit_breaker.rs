//! Per-host circuit breaker for upstream resilience.
//!
//! Every upstream host gets its own state machine; a failing website probe
//! never blocks calls to the ads archive and vice versa.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (probing)
//!                                                                         |
//!                                       <--[failure]--                    |
//!                                                                         |
//! CLOSED <---------------------[M successful probes]----------------------+
//! ```
//!
//! While half-open, one probe request is admitted at a time. A probe whose
//! outcome is never recorded releases its slot after `recovery_timeout`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::AppError;

/// Current state of one host's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - probe requests test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Number of successful probes in half-open state to close the circuit.
    pub half_open_required_successes: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_required_successes: 3,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug)]
struct HostCircuit {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    last_error_message: Option<String>,
    probe_started: Option<Instant>,
}

impl HostCircuit {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            last_error_message: None,
            probe_started: None,
        }
    }

    fn remaining_open_time(&self, recovery_timeout: Duration) -> Duration {
        self.last_failure_time
            .map(|t| recovery_timeout.saturating_sub(t.elapsed()))
            .unwrap_or(recovery_timeout)
    }
}

/// Snapshot of one host's circuit for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub host: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Thread-safe registry of per-host circuits.
///
/// Cloning is cheap; clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    hosts: Arc<Mutex<HashMap<String, Arc<Mutex<HostCircuit>>>>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

fn lock_recovering<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!(lock = what, "Recovered from poisoned mutex");
        poisoned.into_inner()
    })
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            hosts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Returns the circuit for `host`, creating a closed one on first use.
    ///
    /// The registry lock is released before the caller locks the host entry.
    fn circuit(&self, host: &str) -> Arc<Mutex<HostCircuit>> {
        let mut hosts = lock_recovering(&self.hosts, "circuit registry");
        hosts
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HostCircuit::new())))
            .clone()
    }

    fn existing(&self, host: &str) -> Option<Arc<Mutex<HostCircuit>>> {
        lock_recovering(&self.hosts, "circuit registry")
            .get(host)
            .cloned()
    }

    /// Returns `true` if a request to `host` may be dispatched now.
    pub fn is_allowed(&self, host: &str) -> bool {
        self.check(host).is_ok()
    }

    /// Like [`is_allowed`](Self::is_allowed) but reports how long to wait when rejected.
    pub fn check(&self, host: &str) -> Result<(), AppError> {
        let Some(entry) = self.existing(host) else {
            return Ok(());
        };
        let mut circuit = lock_recovering(&entry, host);
        self.maybe_transition_to_half_open(host, &mut circuit);

        match circuit.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => Err(AppError::CircuitOpen {
                host: host.to_string(),
                retry_after: circuit.remaining_open_time(self.config.recovery_timeout),
            }),
            CircuitState::HalfOpen => {
                let probe_free = circuit
                    .probe_started
                    .is_none_or(|t| t.elapsed() >= self.config.recovery_timeout);
                if probe_free {
                    circuit.probe_started = Some(Instant::now());
                    Ok(())
                } else {
                    Err(AppError::CircuitOpen {
                        host: host.to_string(),
                        retry_after: circuit
                            .probe_started
                            .map(|t| self.config.recovery_timeout.saturating_sub(t.elapsed()))
                            .unwrap_or(Duration::ZERO),
                    })
                }
            }
        }
    }

    /// Returns the current state of `host`, handling lazy Open → HalfOpen transitions.
    pub fn state(&self, host: &str) -> CircuitState {
        match self.existing(host) {
            Some(entry) => {
                let mut circuit = lock_recovering(&entry, host);
                self.maybe_transition_to_half_open(host, &mut circuit);
                circuit.state
            }
            None => CircuitState::Closed,
        }
    }

    pub fn record_success(&self, host: &str) {
        let entry = self.circuit(host);
        let mut circuit = lock_recovering(&entry, host);
        circuit.probe_started = None;

        match circuit.state {
            CircuitState::HalfOpen => {
                circuit.success_count += 1;
                if circuit.success_count >= self.config.half_open_required_successes {
                    tracing::info!(
                        host = %host,
                        "Circuit closing after {} successful probes",
                        circuit.success_count
                    );
                    *circuit = HostCircuit::new();
                }
            }
            CircuitState::Closed => {
                circuit.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, host: &str, error: &str) {
        let entry = self.circuit(host);
        let mut circuit = lock_recovering(&entry, host);
        circuit.probe_started = None;
        circuit.last_error_message = Some(error.to_string());

        match circuit.state {
            CircuitState::Closed => {
                circuit.failure_count += 1;
                circuit.last_failure_time = Some(Instant::now());

                if circuit.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        host = %host,
                        failures = circuit.failure_count,
                        error = %error,
                        "Circuit opening after {} consecutive failures",
                        circuit.failure_count
                    );
                    circuit.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    host = %host,
                    error = %error,
                    "Circuit probe failed, returning to open state"
                );
                circuit.state = CircuitState::Open;
                circuit.last_failure_time = Some(Instant::now());
                circuit.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Frees a half-open probe slot without counting the outcome either way.
    ///
    /// Used when a probe ended in a client error, which says nothing about host health.
    pub fn release(&self, host: &str) {
        if let Some(entry) = self.existing(host) {
            lock_recovering(&entry, host).probe_started = None;
        }
    }

    pub fn reset(&self, host: &str) {
        if let Some(entry) = self.existing(host) {
            tracing::info!(host = %host, "Circuit manually reset");
            *lock_recovering(&entry, host) = HostCircuit::new();
        }
    }

    pub fn reset_all(&self) {
        tracing::info!("All circuits manually reset");
        lock_recovering(&self.hosts, "circuit registry").clear();
    }

    /// Per-host snapshot, sorted by host name.
    pub fn status(&self) -> Vec<CircuitStatus> {
        let entries: Vec<(String, Arc<Mutex<HostCircuit>>)> =
            lock_recovering(&self.hosts, "circuit registry")
                .iter()
                .map(|(host, entry)| (host.clone(), entry.clone()))
                .collect();

        let mut statuses: Vec<CircuitStatus> = entries
            .into_iter()
            .map(|(host, entry)| {
                let mut circuit = lock_recovering(&entry, &host);
                self.maybe_transition_to_half_open(&host, &mut circuit);
                let time_until_half_open = (circuit.state == CircuitState::Open)
                    .then(|| circuit.remaining_open_time(self.config.recovery_timeout));
                CircuitStatus {
                    state: circuit.state,
                    failure_count: circuit.failure_count,
                    success_count: circuit.success_count,
                    last_error: circuit.last_error_message.clone(),
                    time_until_half_open,
                    host,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.host.cmp(&b.host));
        statuses
    }

    fn maybe_transition_to_half_open(&self, host: &str, circuit: &mut HostCircuit) {
        if circuit.state == CircuitState::Open
            && let Some(last_failure) = circuit.last_failure_time
            && last_failure.elapsed() >= self.config.recovery_timeout
        {
            tracing::info!(host = %host, "Circuit transitioning to half-open state");
            circuit.state = CircuitState::HalfOpen;
            circuit.success_count = 0;
            circuit.probe_started = None;
        }
    }
}
