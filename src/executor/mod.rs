//! Resilient upstream execution.
//!
//! # Data Flow
//! ```text
//! execute(work):
//!     acquire credential (shared slot, else random unlocked row)
//!     → run work unit
//!     → on failure: classify payload
//!         NonRetryable   → propagate immediately
//!         OtherRetryable → backoff, retry in place (inner bound)
//!         RateLimited    → lock token, clear slot, acquire fresh,
//!                          retry whole unit (outer bound)
//! ```
//!
//! # Design Decisions
//! - Rotation is gated strictly on the rate-limit classification, never on
//!   error count: a transient 5xx must not waste a scarce credential, and
//!   a rate-limited credential must never be retried in place
//! - Inner and outer budgets are independent; exhausting the inner budget
//!   reports the last transient error and does not rotate
//! - An empty pool is terminal for the call; retrying cannot conjure
//!   tokens an operator never registered

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::observability::metrics;
use crate::ratelimit::{ErrorClass, RateLimitProbe};
use crate::store::FailureJournal;
use crate::tokens::{ApiToken, Provider, TokenError, TokenManager};
use crate::upstream::UpstreamFailure;

mod backoff;
mod slot;

pub use backoff::calculate_backoff;
pub use slot::CredentialSlot;

/// Retry bounds and backoff shape for one provider.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// In-place attempts per credential for transient failures.
    pub http_call_retry_count: u32,
    /// Credential rotations before the call is abandoned.
    pub rotation_retry_count: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            http_call_retry_count: 3,
            rotation_retry_count: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

/// Terminal outcomes of a resilient call. Callers see a success or exactly
/// one of these; every retry/rotation decision stays inside the executor.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The pool has no unlocked token for the provider. Never retried.
    #[error("no credential available for {provider}")]
    NoCredentialAvailable { provider: Provider },

    /// Transient failures outlasted the in-place retry budget.
    #[error("upstream still failing after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: UpstreamFailure },

    /// Every rotation ran into a rate limit.
    #[error("rate limited after {rotations} credential rotations: {last}")]
    RotationsExhausted { rotations: u32, last: UpstreamFailure },

    /// The upstream rejected the call for a reason retries cannot fix.
    #[error("upstream call failed: {last}")]
    NonRetryable { last: UpstreamFailure },

    /// Token lifecycle machinery failed (storage or decryption).
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Outcome of one credential's worth of attempts.
enum AttemptOutcome<T> {
    Success(T),
    RateLimited(UpstreamFailure),
    Fatal(ExecuteError),
}

/// Wraps units of upstream work in the retry/rotation state machine for
/// one provider.
pub struct RotatingExecutor {
    provider: Provider,
    tokens: Arc<TokenManager>,
    probe: Arc<dyn RateLimitProbe>,
    journal: Arc<dyn FailureJournal>,
    slot: CredentialSlot,
    policy: RetryPolicy,
}

impl RotatingExecutor {
    pub fn new(
        provider: Provider,
        tokens: Arc<TokenManager>,
        probe: Arc<dyn RateLimitProbe>,
        journal: Arc<dyn FailureJournal>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            tokens,
            probe,
            journal,
            slot: CredentialSlot::new(),
            policy,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// Run one unit of upstream work under rotation protection.
    ///
    /// The work unit receives the active credential and reports either a
    /// result or a structured failure payload; it is re-invoked whole on
    /// every retry and rotation.
    pub async fn execute<T, F, Fut>(&self, work: F) -> Result<T, ExecuteError>
    where
        F: Fn(ApiToken) -> Fut,
        Fut: Future<Output = Result<T, UpstreamFailure>>,
    {
        let mut rotations: u32 = 0;
        loop {
            let (generation, credential) = self.acquire().await?;

            match self.attempt_with_retries(&work, &credential).await {
                AttemptOutcome::Success(value) => return Ok(value),
                AttemptOutcome::Fatal(error) => return Err(error),
                AttemptOutcome::RateLimited(failure) => {
                    rotations += 1;
                    tracing::warn!(
                        provider = %self.provider,
                        token_id = %credential.id,
                        rotations,
                        "rate limit hit, rotating credential"
                    );

                    self.tokens.lock(credential.id).await?;
                    self.slot.invalidate(generation);
                    metrics::record_rotation(self.provider);

                    if rotations >= self.policy.rotation_retry_count {
                        return Err(ExecuteError::RotationsExhausted {
                            rotations,
                            last: failure,
                        });
                    }

                    tokio::time::sleep(calculate_backoff(
                        rotations,
                        self.policy.base_delay_ms,
                        self.policy.max_delay_ms,
                    ))
                    .await;
                }
            }
        }
    }

    /// Reuse the shared slot when it holds a credential; otherwise select
    /// a fresh unlocked token and install it.
    async fn acquire(&self) -> Result<(u64, ApiToken), ExecuteError> {
        if let Some(entry) = self.slot.current() {
            return Ok(entry);
        }

        match self.tokens.get_random_for_provider(self.provider).await? {
            Some(token) => {
                tracing::info!(
                    provider = %self.provider,
                    token_id = %token.id,
                    "activated credential"
                );
                Ok(self.slot.install(token))
            }
            None => Err(ExecuteError::NoCredentialAvailable {
                provider: self.provider,
            }),
        }
    }

    /// Inner loop: retry transient failures in place on one credential.
    async fn attempt_with_retries<T, F, Fut>(
        &self,
        work: &F,
        credential: &ApiToken,
    ) -> AttemptOutcome<T>
    where
        F: Fn(ApiToken) -> Fut,
        Fut: Future<Output = Result<T, UpstreamFailure>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let failure = match work(credential.clone()).await {
                Ok(value) => return AttemptOutcome::Success(value),
                Err(failure) => failure,
            };

            self.record_failure(&failure).await;
            let class = self.probe.classify(&failure);
            metrics::record_upstream_failure(self.provider, class);

            match class {
                ErrorClass::NonRetryable => {
                    return AttemptOutcome::Fatal(ExecuteError::NonRetryable { last: failure });
                }
                ErrorClass::RateLimited => {
                    return AttemptOutcome::RateLimited(failure);
                }
                ErrorClass::OtherRetryable => {
                    if attempt >= self.policy.http_call_retry_count {
                        return AttemptOutcome::Fatal(ExecuteError::RetriesExhausted {
                            attempts: attempt,
                            last: failure,
                        });
                    }
                    let delay = calculate_backoff(
                        attempt,
                        self.policy.base_delay_ms,
                        self.policy.max_delay_ms,
                    );
                    tracing::warn!(
                        provider = %self.provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient upstream failure, retrying in place"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Raw failures are kept for diagnosis; journal trouble must never
    /// disturb the call path.
    async fn record_failure(&self, failure: &UpstreamFailure) {
        let detail = failure.detail();
        tracing::warn!(provider = %self.provider, %failure, "upstream call failed");
        if let Err(e) = self.journal.record_failure(self.provider, &detail).await {
            tracing::warn!(error = %e, "failed to journal upstream failure");
        }
    }
}
