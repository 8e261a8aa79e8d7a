//! HTTP execution with retry, exponential backoff, and circuit breaking.

use std::time::Duration;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::AppError;
use crate::traits::{HttpRequest, HttpResponse, HttpTransport};

/// Statuses worth retrying: rate limiting and transient server failures.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

/// Exponential backoff with multiplicative jitter.
///
/// Delay for attempt `n` (0-indexed) is
/// `min(base_delay * exponential_base^n, max_delay) * U(0.5, 1.5)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            exponential_base: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay for `attempt`, capped at `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let factor = self.exponential_base.powi(attempt.min(63) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay_for(attempt)
            .mul_f64(rand::random_range(0.5..1.5))
    }
}

/// HTTP client that retries transient failures and respects per-host circuits.
#[derive(Clone)]
pub struct ResilientHttpClient<T: HttpTransport> {
    transport: T,
    breaker: CircuitBreaker,
    policy: RetryPolicy,
}

impl<T: HttpTransport> ResilientHttpClient<T> {
    pub fn new(transport: T, breaker: CircuitBreaker, policy: RetryPolicy) -> Self {
        Self {
            transport,
            breaker,
            policy,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes with the default policy and the circuit breaker enabled.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, AppError> {
        self.execute_with(request, self.policy.max_retries, true)
            .await
    }

    /// Executes `request`, retrying up to `max_retries` times.
    ///
    /// - Open circuit: `Err(CircuitOpen)`, no network attempt.
    /// - Status < 400: records success, returns the response.
    /// - Retryable status: retries with backoff; once exhausted, records a
    ///   breaker failure and returns the last response as `Ok`.
    /// - Other 4xx: returned at once, breaker untouched.
    /// - Retryable transport error (network, timeout): retried like a server
    ///   error; once exhausted, records a breaker failure and returns it.
    /// - Any other transport error (bad proxy, malformed request): returned at
    ///   once, breaker untouched.
    pub async fn execute_with(
        &self,
        request: HttpRequest,
        max_retries: u32,
        use_circuit_breaker: bool,
    ) -> Result<HttpResponse, AppError> {
        let host = request.host()?;
        if use_circuit_breaker {
            self.breaker.check(&host)?;
        }

        let mut attempt: u32 = 0;
        loop {
            let outcome = self.transport.send(request.clone()).await;
            let exhausted = attempt >= max_retries;

            match outcome {
                Ok(response) if response.is_success() => {
                    if use_circuit_breaker {
                        self.breaker.record_success(&host);
                    }
                    return Ok(response);
                }
                Ok(response) if is_retryable_status(response.status) => {
                    if exhausted {
                        tracing::warn!(
                            host = %host,
                            status = response.status,
                            attempts = attempt + 1,
                            "Retries exhausted"
                        );
                        if use_circuit_breaker {
                            self.breaker
                                .record_failure(&host, &format!("HTTP {}", response.status));
                        }
                        return Ok(response);
                    }
                    tracing::debug!(
                        host = %host,
                        status = response.status,
                        attempt,
                        "Retryable status, backing off"
                    );
                }
                Ok(response) => {
                    if use_circuit_breaker {
                        self.breaker.release(&host);
                    }
                    return Ok(response);
                }
                Err(e) if !e.is_retryable() => {
                    if use_circuit_breaker {
                        self.breaker.release(&host);
                    }
                    return Err(e);
                }
                Err(e) => {
                    if exhausted {
                        tracing::warn!(
                            host = %host,
                            error = %e,
                            attempts = attempt + 1,
                            "Retries exhausted"
                        );
                        if use_circuit_breaker {
                            if e.should_trip_circuit() {
                                self.breaker.record_failure(&host, &e.to_string());
                            } else {
                                self.breaker.release(&host);
                            }
                        }
                        return Err(e);
                    }
                    tracing::debug!(host = %host, error = %e, attempt, "Request failed, backing off");
                }
            }

            tokio::time::sleep(self.policy.delay_for(attempt)).await;
            attempt += 1;
        }
    }
}
