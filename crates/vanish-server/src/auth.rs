use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use constant_time_eq::constant_time_eq;
use tracing::warn;

use crate::error::{ErrorBody, ErrorKind};
use crate::AppState;

pub const ADMIN_KEY_HEADER: &str = "X-API-Key";

/// Axum middleware guarding admin routes with `X-API-Key: <key>`.
/// Missing header → 401, wrong key → 403.
pub async fn require_admin_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.admin_key.as_deref() else {
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorBody::new(ErrorKind::Forbidden, "admin API disabled")),
        )
            .into_response();
    };

    let provided = request
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(key) if constant_time_eq(key.as_bytes(), expected.as_bytes()) => {
            next.run(request).await
        }
        Some(_) => {
            warn!("admin request with invalid API key");
            (
                StatusCode::FORBIDDEN,
                Json(ErrorBody::new(ErrorKind::Forbidden, "invalid API key")),
            )
                .into_response()
        }
        None => (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new(
                ErrorKind::AuthRequired,
                format!("{ADMIN_KEY_HEADER} header required"),
            )),
        )
            .into_response(),
    }
}
