use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use zeroize::Zeroizing;

use crate::{error::SecretError, service::NewSecret, AppState};

const READ_MESSAGE: &str = "this secret has been destroyed and cannot be accessed again";

// ── Info ──────────────────────────────────────────────────────────────────────

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "vanish",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "online",
    }))
}

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateRequest {
    pub content: String,
    pub ttl_minutes: Option<i64>,
    pub passphrase: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub token: String,
    pub url: String,
    pub expires_at: DateTime<Utc>,
    pub has_passphrase: bool,
}

pub async fn create_secret(
    State(state): State<AppState>,
    Json(body): Json<CreateRequest>,
) -> Result<(StatusCode, Json<CreateResponse>), SecretError> {
    let created = state
        .service
        .create(NewSecret {
            content: Zeroizing::new(body.content),
            ttl_minutes: body.ttl_minutes,
            passphrase: body.passphrase.map(Zeroizing::new),
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            token: created.token,
            url: created.url,
            expires_at: created.expires_at,
            has_passphrase: created.has_passphrase,
        }),
    ))
}

// ── Redeem ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RedeemQuery {
    pub passphrase: Option<String>,
}

#[derive(Serialize)]
struct ReadResponse<'a> {
    content: &'a str,
    created_at: DateTime<Utc>,
    message: &'static str,
}

pub async fn get_secret(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<RedeemQuery>,
) -> Result<Response, SecretError> {
    let passphrase = query.passphrase.map(Zeroizing::new);
    let revealed = state
        .service
        .redeem(&token, passphrase.as_deref().map(String::as_str))
        .await?;

    Ok(Json(ReadResponse {
        content: &revealed.content,
        created_at: revealed.created_at,
        message: READ_MESSAGE,
    })
    .into_response())
}

// ── Verify ────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub token: String,
    pub passphrase: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub message: String,
}

pub async fn verify_secret(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, SecretError> {
    let passphrase = Zeroizing::new(body.passphrase);
    let verification = state
        .service
        .verify_passphrase(&body.token, &passphrase)
        .await?;
    Ok(Json(VerifyResponse {
        valid: verification.valid,
        message: verification.message.to_owned(),
    }))
}

// ── Delete ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

pub async fn delete_secret(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<DeleteResponse>, SecretError> {
    let deletion = state.service.delete(&token).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: deletion.message.to_owned(),
    }))
}

// ── Purge ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub success: bool,
    pub message: String,
    pub deleted_count: usize,
    pub timestamp: DateTime<Utc>,
}

pub async fn purge_secrets(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<PurgeResponse>), SecretError> {
    let timestamp = state.service.clock().now();
    let (status, success, message, deleted_count) = match state.service.purge_expired_now().await? {
        Some(n) => (StatusCode::OK, true, "expired secrets purged", n),
        None => (StatusCode::CONFLICT, false, "a purge is already running", 0),
    };
    Ok((
        status,
        Json(PurgeResponse {
            success,
            message: message.into(),
            deleted_count,
            timestamp,
        }),
    ))
}
