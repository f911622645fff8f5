//! Request handlers: token administration and upstream processing.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::executor::ExecuteError;
use crate::http::server::AppState;
use crate::tokens::{Provider, RegisterOutcome, TokenError};
use crate::upstream::ChatMessage;
use crate::vault::VaultError;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
}

pub async fn get_status() -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
    })
}

/// Uniform error body; maps lifecycle and execution failures to statuses.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<TokenError> for ApiError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Vault(VaultError::Corruption) => ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "stored credential failed to decrypt",
            ),
            other => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

impl From<ExecuteError> for ApiError {
    fn from(e: ExecuteError) -> Self {
        match &e {
            ExecuteError::NoCredentialAvailable { .. } => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            ExecuteError::RetriesExhausted { .. }
            | ExecuteError::RotationsExhausted { .. }
            | ExecuteError::NonRetryable { .. } => {
                ApiError::new(StatusCode::BAD_GATEWAY, e.to_string())
            }
            ExecuteError::Token(_) => ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}

fn known_provider(provider: Provider) -> Result<Provider, ApiError> {
    if provider == Provider::Unknown {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "unknown api_provider",
        ));
    }
    Ok(provider)
}

#[derive(Deserialize)]
pub struct TokenCreation {
    pub token: String,
    pub api_provider: Provider,
}

#[derive(Serialize)]
pub struct TokenCreated {
    pub id: Uuid,
}

pub async fn register_token(
    State(state): State<AppState>,
    Json(body): Json<TokenCreation>,
) -> Result<Response, ApiError> {
    let provider = known_provider(body.api_provider)?;

    match state.tokens.register(&body.token, provider).await? {
        RegisterOutcome::Registered(id) => {
            Ok((StatusCode::CREATED, Json(TokenCreated { id })).into_response())
        }
        RegisterOutcome::Duplicate => Err(ApiError::new(
            StatusCode::CONFLICT,
            "duplicate token",
        )),
    }
}

#[derive(Deserialize)]
pub struct LockedQuery {
    pub api_provider: Option<Provider>,
}

/// Listing never exposes token values; identifiers are enough to manage
/// the pool.
#[derive(Serialize)]
pub struct LockedToken {
    pub id: Uuid,
    pub api_provider: Provider,
}

pub async fn list_locked_tokens(
    State(state): State<AppState>,
    Query(query): Query<LockedQuery>,
) -> Result<Json<Vec<LockedToken>>, ApiError> {
    let locked = state.tokens.get_locked(query.api_provider).await?;
    Ok(Json(
        locked
            .into_iter()
            .map(|token| LockedToken {
                id: token.id,
                api_provider: token.provider,
            })
            .collect(),
    ))
}

#[derive(Serialize)]
pub struct TransitionOutcome {
    pub transitioned: bool,
}

pub async fn lock_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let transitioned = state.tokens.lock(id).await?;
    Ok(Json(TransitionOutcome { transitioned }))
}

pub async fn unlock_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let transitioned = state.tokens.unlock(id).await?;
    Ok(Json(TransitionOutcome { transitioned }))
}

pub async fn delete_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.tokens.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct ProbeVerdict {
    pub serviceable: bool,
}

/// On-demand liveness check of one stored token.
pub async fn probe_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProbeVerdict>, ApiError> {
    let token = state
        .tokens
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "token not found"))?;

    let probe = state
        .probes
        .get(&token.provider)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "provider has no probe"))?;

    let serviceable = probe
        .probe_liveness(&token.value)
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, e.to_string()))?;

    Ok(Json(ProbeVerdict { serviceable }))
}

#[derive(Deserialize)]
pub struct TokenRotation {
    pub token_id: Uuid,
    pub api_provider: Provider,
}

#[derive(Serialize)]
pub struct RotatedToken {
    pub token: String,
}

/// Administrative rotation: lock the named token, hand back a fresh value.
pub async fn rotate_token(
    State(state): State<AppState>,
    Json(body): Json<TokenRotation>,
) -> Result<Json<RotatedToken>, ApiError> {
    let provider = known_provider(body.api_provider)?;

    match state.tokens.rotate(body.token_id, provider).await? {
        Some(token) => Ok(Json(RotatedToken { token })),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "no unlocked token remains for the provider",
        )),
    }
}

#[derive(Deserialize)]
pub struct ProcessRequest {
    pub api_provider: Provider,
    pub prompt: String,
    pub model: Option<String>,
}

/// Run one completion under rotation protection, passing the provider's
/// JSON response through untouched.
pub async fn process(
    State(state): State<AppState>,
    Json(body): Json<ProcessRequest>,
) -> Result<Json<Value>, ApiError> {
    let provider = known_provider(body.api_provider)?;

    let executor = state.executors.get(&provider).ok_or_else(|| {
        ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "provider is not enabled")
    })?;
    let client = state
        .clients
        .get(&provider)
        .ok_or_else(|| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "provider is not enabled"))?
        .clone();

    let model = body
        .model
        .or_else(|| state.default_models.get(&provider).cloned())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "no model configured"))?;
    let messages = [ChatMessage::user(body.prompt.clone())];

    let response = executor
        .execute(|token| {
            let client = client.clone();
            let model = model.clone();
            let messages = messages.clone();
            async move {
                client
                    .chat_completion(&token.value, &model, &messages, Some(4048))
                    .await
            }
        })
        .await?;

    Ok(Json(response))
}
