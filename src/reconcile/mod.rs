//! Locked-token reconciliation.
//!
//! # Responsibilities
//! - Periodically probe locked tokens for rate-limit recovery
//! - Return recovered tokens to the available pool
//!
//! # Design Decisions
//! - One sweep touches every locked token of every probed provider;
//!   a failing probe is logged and skipped, never aborts the sweep
//! - Tokens are independent; no ordering across them is promised

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::ReconcilerConfig;
use crate::observability::metrics;
use crate::ratelimit::RateLimitProbe;
use crate::tokens::{Provider, TokenManager};

/// Scheduled sweep over locked tokens.
pub struct Reconciler {
    tokens: Arc<TokenManager>,
    probes: HashMap<Provider, Arc<dyn RateLimitProbe>>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        tokens: Arc<TokenManager>,
        probes: HashMap<Provider, Arc<dyn RateLimitProbe>>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            tokens,
            probes,
            config,
        }
    }

    /// Run sweeps on the configured interval until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("reconciler disabled");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval_secs,
            "reconciler starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        // The first tick fires immediately; skip it so a fleet of fresh
        // processes does not stampede the providers on boot.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("reconciler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One pass over all locked tokens of every probed provider.
    pub async fn sweep(&self) {
        for (&provider, probe) in &self.probes {
            let locked = match self.tokens.get_locked(Some(provider)).await {
                Ok(locked) => locked,
                Err(e) => {
                    tracing::error!(%provider, error = %e, "failed to list locked tokens");
                    continue;
                }
            };

            if locked.is_empty() {
                tracing::debug!(%provider, "no locked tokens to reconcile");
                continue;
            }

            tracing::info!(%provider, count = locked.len(), "checking locked tokens");

            for token in locked {
                match probe.probe_liveness(&token.value).await {
                    Ok(true) => {
                        metrics::record_probe(provider, true);
                        match self.tokens.unlock(token.id).await {
                            Ok(_) => {
                                metrics::record_reconciled(provider);
                                tracing::info!(
                                    token_id = %token.id,
                                    %provider,
                                    "token recovered and unlocked"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(
                                    token_id = %token.id,
                                    error = %e,
                                    "failed to unlock recovered token"
                                );
                            }
                        }
                    }
                    Ok(false) => {
                        metrics::record_probe(provider, false);
                        tracing::debug!(token_id = %token.id, %provider, "token still rate-limited");
                    }
                    Err(e) => {
                        tracing::warn!(
                            token_id = %token.id,
                            %provider,
                            error = %e,
                            "liveness probe failed, skipping token"
                        );
                    }
                }
            }
        }
    }
}
