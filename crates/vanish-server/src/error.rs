use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::crypto::CipherError;
use crate::store::StoreError;

/// Seconds a client should wait before retrying after a store fault.
const STORE_RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GoneReason {
    Expired,
    AlreadyDestroyed,
}

impl std::fmt::Display for GoneReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Expired => "secret has expired",
            Self::AlreadyDestroyed => "secret was already accessed and destroyed",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("{0}")]
    Validation(String),
    #[error("secret not found")]
    NotFound,
    #[error("{0}")]
    Gone(GoneReason),
    #[error("this secret requires a passphrase; supply ?passphrase=")]
    AuthRequired,
    #[error("incorrect passphrase")]
    AuthFailed,
    #[error("could not allocate a unique token after {attempts} attempts")]
    TokenExhausted { attempts: u32 },
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Closed set of error kinds exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Gone,
    AuthRequired,
    AuthFailed,
    Forbidden,
    Internal,
    Unavailable,
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl ErrorBody {
    pub fn new(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            error: error.into(),
            retry_after_secs: None,
        }
    }
}

impl SecretError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound => ErrorKind::NotFound,
            Self::Gone(_) => ErrorKind::Gone,
            Self::AuthRequired => ErrorKind::AuthRequired,
            Self::AuthFailed => ErrorKind::AuthFailed,
            Self::TokenExhausted { .. }
            | Self::Cipher(_)
            | Self::Internal(_)
            | Self::Store(StoreError::Corrupt(_)) => ErrorKind::Internal,
            Self::Store(_) => ErrorKind::Unavailable,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Gone => StatusCode::GONE,
            ErrorKind::AuthRequired | ErrorKind::AuthFailed => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Internal | ErrorKind::Unavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self.kind() {
            ErrorKind::Internal => ErrorBody::new(ErrorKind::Internal, "internal server error"),
            ErrorKind::Unavailable => ErrorBody {
                kind: ErrorKind::Unavailable,
                error: "storage temporarily unavailable".into(),
                retry_after_secs: Some(STORE_RETRY_AFTER_SECS),
            },
            kind => ErrorBody::new(kind, self.to_string()),
        }
    }
}

impl IntoResponse for SecretError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            // Full detail stays in the log; callers only see the generic body.
            error!(error = %self, kind = ?self.kind(), "request failed");
        }
        let body = self.body();
        let retry_after = body.retry_after_secs;
        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
