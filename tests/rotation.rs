//! End-to-end rotation tests: real probe, real HTTP client, mock upstream.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use keywheel::executor::{ExecuteError, RetryPolicy, RotatingExecutor};
use keywheel::ratelimit::OpenRouterProbe;
use keywheel::store::{MemoryTokenStore, TokenStore};
use keywheel::tokens::{Provider, RegisterOutcome, TokenManager};
use keywheel::upstream::{ChatClient, ChatMessage};
use keywheel::vault::TokenVault;

mod common;

use common::MockResponse;

struct Harness {
    manager: Arc<TokenManager>,
    store: Arc<MemoryTokenStore>,
}

impl Harness {
    async fn with_tokens(plaintexts: &[&str]) -> Self {
        let store = Arc::new(MemoryTokenStore::new());
        let vault = Arc::new(TokenVault::new([0x42; 32]).unwrap());
        let manager = Arc::new(TokenManager::new(store.clone(), vault));
        for plaintext in plaintexts {
            let outcome = manager
                .register(plaintext, Provider::OpenRouter)
                .await
                .unwrap();
            assert!(matches!(outcome, RegisterOutcome::Registered(_)));
        }
        Self { manager, store }
    }

    fn executor(&self, base_url: &str) -> RotatingExecutor {
        RotatingExecutor::new(
            Provider::OpenRouter,
            self.manager.clone(),
            Arc::new(OpenRouterProbe::new(
                base_url.to_string(),
                "test-model",
                Duration::from_secs(5),
            )),
            self.store.clone(),
            RetryPolicy {
                http_call_retry_count: 3,
                rotation_retry_count: 3,
                base_delay_ms: 1,
                max_delay_ms: 5,
            },
        )
    }
}

fn chat_work(
    client: ChatClient,
) -> impl Fn(keywheel::tokens::ApiToken) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<serde_json::Value, keywheel::upstream::UpstreamFailure>>>>
{
    move |token| {
        let client = client.clone();
        Box::pin(async move {
            let messages = [ChatMessage::user("hello")];
            client
                .chat_completion(&token.value, "test-model", &messages, None)
                .await
        })
    }
}

#[tokio::test]
async fn successful_call_passes_response_through() {
    let addr = common::start_mock_upstream(|_bearer| {
        MockResponse::Json(200, common::completion_body())
    })
    .await;
    let base_url = format!("http://{addr}");

    let harness = Harness::with_tokens(&["sk-test-a"]).await;
    let executor = harness.executor(&base_url);
    let client = ChatClient::new(base_url.clone(), Duration::from_secs(5));

    let response = executor.execute(chat_work(client)).await.unwrap();
    assert_eq!(response["id"], "gen-1");
    assert!(harness.store.fetch_all_locked(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn rate_limited_upstream_locks_every_rotated_token() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_in_mock = calls.clone();
    let addr = common::start_mock_upstream(move |_bearer| {
        calls_in_mock.fetch_add(1, Ordering::SeqCst);
        MockResponse::Json(429, common::rate_limit_body())
    })
    .await;
    let base_url = format!("http://{addr}");

    let harness = Harness::with_tokens(&["sk-a", "sk-b", "sk-c", "sk-d"]).await;
    let executor = harness.executor(&base_url);
    let client = ChatClient::new(base_url.clone(), Duration::from_secs(5));

    let result = executor.execute(chat_work(client)).await;

    assert!(matches!(
        result,
        Err(ExecuteError::RotationsExhausted { rotations: 3, .. })
    ));
    // One upstream call per rotation; no in-place retries for rate limits.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(harness.store.fetch_all_locked(None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn rotation_recovers_when_another_credential_works() {
    // Whichever credential arrives first is the rate-limited one; the
    // replacement selected after rotation succeeds.
    let stale: Arc<std::sync::OnceLock<String>> = Arc::new(std::sync::OnceLock::new());
    let stale_in_mock = stale.clone();
    let addr = common::start_mock_upstream(move |bearer| {
        let Some(bearer) = bearer else {
            return MockResponse::Json(401, "{}".into());
        };
        let stale = stale_in_mock.get_or_init(|| bearer.to_string());
        if bearer == stale {
            MockResponse::Json(429, common::rate_limit_body())
        } else {
            MockResponse::Json(200, common::completion_body())
        }
    })
    .await;
    let base_url = format!("http://{addr}");

    let harness = Harness::with_tokens(&["sk-stale", "sk-fresh"]).await;
    let executor = harness.executor(&base_url);
    let client = ChatClient::new(base_url.clone(), Duration::from_secs(5));

    let response = executor.execute(chat_work(client)).await.unwrap();
    assert_eq!(response["id"], "gen-1");

    // The stale credential ended up locked; the fresh one stayed active.
    let locked = harness.store.fetch_all_locked(None).await.unwrap();
    assert_eq!(locked.len(), 1);
}

#[tokio::test]
async fn transient_errors_retry_in_place_then_succeed() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_in_mock = calls.clone();
    let addr = common::start_mock_upstream(move |_bearer| {
        if calls_in_mock.fetch_add(1, Ordering::SeqCst) < 2 {
            MockResponse::Json(503, r#"{"error":{"message":"upstream briefly down"}}"#.into())
        } else {
            MockResponse::Json(200, common::completion_body())
        }
    })
    .await;
    let base_url = format!("http://{addr}");

    let harness = Harness::with_tokens(&["sk-only"]).await;
    let executor = harness.executor(&base_url);
    let client = ChatClient::new(base_url.clone(), Duration::from_secs(5));

    let response = executor.execute(chat_work(client)).await.unwrap();
    assert_eq!(response["id"], "gen-1");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(harness.store.fetch_all_locked(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_pool_is_terminal_without_an_upstream_call() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_in_mock = calls.clone();
    let addr = common::start_mock_upstream(move |_bearer| {
        calls_in_mock.fetch_add(1, Ordering::SeqCst);
        MockResponse::Json(200, common::completion_body())
    })
    .await;
    let base_url = format!("http://{addr}");

    let harness = Harness::with_tokens(&[]).await;
    let executor = harness.executor(&base_url);
    let client = ChatClient::new(base_url.clone(), Duration::from_secs(5));

    let result = executor.execute(chat_work(client)).await;
    assert!(matches!(
        result,
        Err(ExecuteError::NoCredentialAvailable { .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unauthorized_is_not_retried_and_not_rotated() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_in_mock = calls.clone();
    let addr = common::start_mock_upstream(move |_bearer| {
        calls_in_mock.fetch_add(1, Ordering::SeqCst);
        MockResponse::Json(
            401,
            r#"{"error":{"message":"No auth credentials found"}}"#.into(),
        )
    })
    .await;
    let base_url = format!("http://{addr}");

    let harness = Harness::with_tokens(&["sk-bad"]).await;
    let executor = harness.executor(&base_url);
    let client = ChatClient::new(base_url.clone(), Duration::from_secs(5));

    let result = executor.execute(chat_work(client)).await;
    assert!(matches!(result, Err(ExecuteError::NonRetryable { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(harness.store.fetch_all_locked(None).await.unwrap().is_empty());
}
