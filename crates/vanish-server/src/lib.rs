pub mod auth;
pub mod clock;
pub mod crypto;
pub mod dirs;
pub mod error;
pub mod handlers;
pub mod reaper;
pub mod server;
pub mod service;
pub mod store;
pub mod token;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: service::SecretService,
    /// Key required in `X-API-Key` for admin routes. Admin routes are not
    /// mounted when unset.
    pub admin_key: Option<String>,
}

pub use error::{GoneReason, SecretError};
pub use server::{build_router, resolve_encryption_key, run, ServerConfig};
pub use service::{SecretPolicy, SecretService};
