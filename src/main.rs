//! keywheel: credential rotation for rate-limited upstream AI APIs.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────────┐
//!                    │                    KEYWHEEL                       │
//!                    │                                                   │
//!   Caller request   │  ┌────────┐   ┌───────────────┐   ┌───────────┐  │
//!   ─────────────────┼─▶│  http  │──▶│   rotating    │──▶│ upstream  │──┼──▶ Provider API
//!                    │  │ server │   │   executor    │   │  client   │  │
//!                    │  └────────┘   └──────┬────────┘   └───────────┘  │
//!                    │                      │ lock / select             │
//!                    │                      ▼                           │
//!                    │               ┌─────────────┐    ┌────────────┐  │
//!                    │               │   token     │───▶│   vault    │  │
//!                    │               │  manager    │    │ (AES-GCM)  │  │
//!                    │               └──────┬──────┘    └────────────┘  │
//!                    │                      │                           │
//!                    │                      ▼                           │
//!                    │               ┌─────────────┐    ┌────────────┐  │
//!                    │               │ token store │    │ reconciler │  │
//!                    │               │   (redb)    │◀───│  (timer)   │  │
//!                    │               └─────────────┘    └────────────┘  │
//!                    └──────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keywheel::config::{self, AppConfig, ProviderConfig};
use keywheel::executor::{RetryPolicy, RotatingExecutor};
use keywheel::http::{AppState, HttpServer};
use keywheel::lifecycle::{signals, Shutdown};
use keywheel::ratelimit;
use keywheel::reconcile::Reconciler;
use keywheel::store::{FailureJournal, RedbTokenStore, TokenStore};
use keywheel::tokens::{Provider, TokenManager};
use keywheel::upstream::ChatClient;
use keywheel::vault::TokenVault;

#[derive(Parser, Debug)]
#[command(name = "keywheel", about = "Credential rotation for rate-limited AI APIs")]
struct Args {
    /// Path to the TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn retry_policy(provider: &ProviderConfig) -> RetryPolicy {
    RetryPolicy {
        http_call_retry_count: provider.http_call_retry_count,
        rotation_retry_count: provider.rotation_retry_count,
        base_delay_ms: provider.retry_base_delay_ms,
        max_delay_ms: provider.retry_max_delay_ms,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keywheel=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("keywheel v{} starting", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };

    tracing::info!(
        bind_address = %config.listener.bind_address,
        database = %config.database.path,
        reconcile_interval_secs = config.reconciler.interval_secs,
        "configuration loaded"
    );

    // Fail fast on a bad secret; nothing below works without the vault.
    let secret = config::load_secret(&config)?;
    let vault = Arc::new(TokenVault::new(secret)?);

    let store = Arc::new(RedbTokenStore::open(&config.database.path)?);
    let tokens = Arc::new(TokenManager::new(
        store.clone() as Arc<dyn TokenStore>,
        vault,
    ));

    let probes = ratelimit::build_probes(&config.providers);

    let provider_configs: [(Provider, &ProviderConfig); 2] = [
        (Provider::OpenRouter, &config.providers.open_router),
        (Provider::OpenAi, &config.providers.open_ai),
    ];

    let mut executors: HashMap<Provider, Arc<RotatingExecutor>> = HashMap::new();
    let mut clients: HashMap<Provider, ChatClient> = HashMap::new();
    let mut default_models: HashMap<Provider, String> = HashMap::new();
    for (provider, provider_config) in provider_configs {
        if !provider_config.enabled {
            tracing::info!(%provider, "provider disabled");
            continue;
        }
        let probe = probes
            .get(&provider)
            .expect("every active provider has a probe")
            .clone();
        executors.insert(
            provider,
            Arc::new(RotatingExecutor::new(
                provider,
                tokens.clone(),
                probe,
                store.clone() as Arc<dyn FailureJournal>,
                retry_policy(provider_config),
            )),
        );
        clients.insert(
            provider,
            ChatClient::new(
                provider_config.base_url.clone(),
                Duration::from_secs(provider_config.request_timeout_secs),
            ),
        );
        default_models.insert(provider, provider_config.default_model.clone());
        tracing::info!(%provider, base_url = %provider_config.base_url, "provider enabled");
    }

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            keywheel::observability::metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "failed to parse metrics address"
            );
        }
    }

    let shutdown = Shutdown::new();

    // Reconciliation runs beside request traffic, sharing the same pool.
    let reconciler = Reconciler::new(tokens.clone(), probes.clone(), config.reconciler.clone());
    tokio::spawn(reconciler.run(shutdown.subscribe()));

    let state = AppState {
        tokens,
        executors: Arc::new(executors),
        probes: Arc::new(probes),
        clients: Arc::new(clients),
        default_models: Arc::new(default_models),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let server = HttpServer::new(state);
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(async move { server.run(listener, server_shutdown).await });

    signals::watch_signals(&shutdown).await;

    server_task.await??;
    tracing::info!("shutdown complete");
    Ok(())
}
