//! Reconciliation tests: locked tokens recover via the liveness probe.

use std::sync::Arc;
use std::time::Duration;

use keywheel::config::ReconcilerConfig;
use keywheel::ratelimit::{OpenRouterProbe, RateLimitProbe};
use keywheel::reconcile::Reconciler;
use keywheel::store::MemoryTokenStore;
use keywheel::tokens::{Provider, RegisterOutcome, TokenManager};
use keywheel::vault::TokenVault;

mod common;

use common::MockResponse;

async fn manager_with_locked(
    plaintexts: &[&str],
) -> (Arc<TokenManager>, Vec<uuid::Uuid>) {
    let store = Arc::new(MemoryTokenStore::new());
    let vault = Arc::new(TokenVault::new([0x42; 32]).unwrap());
    let manager = Arc::new(TokenManager::new(store, vault));

    let mut ids = Vec::new();
    for plaintext in plaintexts {
        let RegisterOutcome::Registered(id) = manager
            .register(plaintext, Provider::OpenRouter)
            .await
            .unwrap()
        else {
            panic!("expected registration");
        };
        assert!(manager.lock(id).await.unwrap());
        ids.push(id);
    }
    (manager, ids)
}

fn reconciler(manager: Arc<TokenManager>, base_url: &str) -> Reconciler {
    let probe: Arc<dyn RateLimitProbe> = Arc::new(OpenRouterProbe::new(
        base_url.to_string(),
        "test-model",
        Duration::from_secs(5),
    ));
    Reconciler::new(
        manager,
        [(Provider::OpenRouter, probe)].into_iter().collect(),
        ReconcilerConfig {
            enabled: true,
            interval_secs: 1,
        },
    )
}

#[tokio::test]
async fn sweep_unlocks_recovered_tokens_only() {
    let addr = common::start_mock_upstream(|bearer| match bearer {
        Some("sk-recovered-1") | Some("sk-recovered-2") => {
            MockResponse::Json(200, common::completion_body())
        }
        _ => MockResponse::Json(429, common::rate_limit_body()),
    })
    .await;

    let (manager, ids) =
        manager_with_locked(&["sk-recovered-1", "sk-recovered-2", "sk-still-limited"]).await;
    reconciler(manager.clone(), &format!("http://{addr}")).sweep().await;

    let locked = manager.get_locked(Some(Provider::OpenRouter)).await.unwrap();
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].id, ids[2]);
}

#[tokio::test]
async fn probe_failure_does_not_abort_the_sweep() {
    // One credential makes the upstream hang up mid-probe; the others
    // must still be checked and unlocked.
    let addr = common::start_mock_upstream(|bearer| match bearer {
        Some("sk-breaks-the-probe") => MockResponse::Hangup,
        _ => MockResponse::Json(200, common::completion_body()),
    })
    .await;

    let (manager, ids) = manager_with_locked(&[
        "sk-breaks-the-probe",
        "sk-recovered-1",
        "sk-recovered-2",
    ])
    .await;
    reconciler(manager.clone(), &format!("http://{addr}")).sweep().await;

    let locked = manager.get_locked(Some(Provider::OpenRouter)).await.unwrap();
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].id, ids[0]);
}

#[tokio::test]
async fn sweep_with_nothing_locked_is_a_no_op() {
    let addr = common::start_mock_upstream(|_bearer| {
        MockResponse::Json(200, common::completion_body())
    })
    .await;

    let (manager, _) = manager_with_locked(&[]).await;
    // No tokens at all: the sweep simply returns.
    reconciler(manager.clone(), &format!("http://{addr}")).sweep().await;
    assert!(manager
        .get_locked(Some(Provider::OpenRouter))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unlocked_tokens_are_not_probed() {
    use std::sync::atomic::{AtomicU32, Ordering};

    let probes = Arc::new(AtomicU32::new(0));
    let probes_in_mock = probes.clone();
    let addr = common::start_mock_upstream(move |_bearer| {
        probes_in_mock.fetch_add(1, Ordering::SeqCst);
        MockResponse::Json(200, common::completion_body())
    })
    .await;

    let (manager, ids) = manager_with_locked(&["sk-a", "sk-b"]).await;
    assert!(manager.unlock(ids[0]).await.unwrap());

    reconciler(manager.clone(), &format!("http://{addr}")).sweep().await;

    // Only the remaining locked token was probed.
    assert_eq!(probes.load(Ordering::SeqCst), 1);
    assert!(manager
        .get_locked(Some(Provider::OpenRouter))
        .await
        .unwrap()
        .is_empty());
}
