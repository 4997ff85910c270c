use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    auth::require_admin_key,
    clock::SystemClock,
    crypto::{self, Cipher, EncryptionKey},
    handlers::{
        create_secret, delete_secret, get_secret, health, purge_secrets, root, verify_secret,
    },
    reaper::{self, Reaper},
    service::{SecretPolicy, SecretService},
    store::{MemoryStore, RedbStore, SecretStore},
    token::{TokenGenerator, DEFAULT_MAX_ATTEMPTS},
    AppState,
};

const KEY_FILE: &str = "vanish.key";
const DB_FILE: &str = "vanish.db";
/// Upper bound accepted for `VANISH_MAX_TTL_MINUTES` (one year).
const MAX_TTL_CAP_MINUTES: i64 = 525_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Redb,
    Memory,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "redb" => Ok(Self::Redb),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("unknown store {other:?} (expected redb or memory)"),
        }
    }
}

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Base URL used to build access links. Defaults to `http://localhost:{port}`.
    pub public_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    /// Base64 key material ($VANISH_ENCRYPTION_KEY).
    pub encryption_key: Option<String>,
    /// File holding base64 key material ($VANISH_ENCRYPTION_KEY_FILE).
    pub encryption_key_file: Option<PathBuf>,
    pub admin_key: Option<String>,
    pub store: StoreKind,
    pub reaper_interval: Duration,
    pub min_ttl_minutes: i64,
    pub max_ttl_minutes: i64,
    pub default_ttl_minutes: i64,
    pub max_secret_bytes: usize,
    pub min_passphrase_len: usize,
    pub token_attempts: u32,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "ignoring unparsable environment variable");
            default
        }),
        Err(_) => default,
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let policy = SecretPolicy::default();
        Self {
            host: std::env::var("VANISH_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env_or("VANISH_PORT", 8080),
            public_url: std::env::var("VANISH_PUBLIC_URL").ok(),
            data_dir: std::env::var("VANISH_DATA_DIR").ok().map(PathBuf::from),
            encryption_key: std::env::var("VANISH_ENCRYPTION_KEY").ok(),
            encryption_key_file: std::env::var("VANISH_ENCRYPTION_KEY_FILE")
                .ok()
                .map(PathBuf::from),
            admin_key: std::env::var("VANISH_ADMIN_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            store: env_or("VANISH_STORE", StoreKind::Redb),
            reaper_interval: Duration::from_secs(env_or(
                "VANISH_REAPER_INTERVAL_SECS",
                reaper::DEFAULT_INTERVAL.as_secs(),
            )),
            min_ttl_minutes: env_or("VANISH_MIN_TTL_MINUTES", policy.min_ttl_minutes),
            max_ttl_minutes: env_or("VANISH_MAX_TTL_MINUTES", policy.max_ttl_minutes),
            default_ttl_minutes: env_or("VANISH_DEFAULT_TTL_MINUTES", policy.default_ttl_minutes),
            max_secret_bytes: env_or("VANISH_MAX_SECRET_BYTES", policy.max_secret_bytes),
            min_passphrase_len: env_or("VANISH_MIN_PASSPHRASE_LEN", policy.min_passphrase_len),
            token_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ServerConfig {
    pub fn policy(&self) -> SecretPolicy {
        SecretPolicy {
            min_ttl_minutes: self.min_ttl_minutes,
            max_ttl_minutes: self.max_ttl_minutes,
            default_ttl_minutes: self.default_ttl_minutes,
            max_secret_bytes: self.max_secret_bytes,
            min_passphrase_len: self.min_passphrase_len,
            public_url: self
                .public_url
                .clone()
                .unwrap_or_else(|| format!("http://localhost:{}", self.port)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_ttl_minutes > MAX_TTL_CAP_MINUTES {
            anyhow::bail!(
                "max TTL {} exceeds the cap of {MAX_TTL_CAP_MINUTES} minutes",
                self.max_ttl_minutes
            );
        }
        if self.min_ttl_minutes < 1 || self.min_ttl_minutes > self.max_ttl_minutes {
            anyhow::bail!(
                "invalid TTL bounds: min={} max={}",
                self.min_ttl_minutes,
                self.max_ttl_minutes
            );
        }
        if !(self.min_ttl_minutes..=self.max_ttl_minutes).contains(&self.default_ttl_minutes) {
            anyhow::bail!(
                "default TTL {} outside [{}, {}]",
                self.default_ttl_minutes,
                self.min_ttl_minutes,
                self.max_ttl_minutes
            );
        }
        if self.reaper_interval.is_zero() {
            anyhow::bail!("reaper interval must be positive");
        }
        Ok(())
    }
}

/// Read base64 key material from a file, trimming surrounding whitespace.
pub fn read_key_file(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read key file: {}", path.display()))?;
    let key = content.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("key file is empty: {}", path.display());
    }
    Ok(key)
}

/// Resolve the encryption key, in order of preference:
/// `encryption_key`, then `encryption_key_file`, then `vanish.key` in the
/// data directory (generated on first start).
pub fn resolve_encryption_key(cfg: &ServerConfig, data_dir: &Path) -> Result<EncryptionKey> {
    if let Some(ref path) = cfg.encryption_key_file {
        if cfg.encryption_key.is_some() {
            warn!("both VANISH_ENCRYPTION_KEY and VANISH_ENCRYPTION_KEY_FILE are set; using the variable");
        } else {
            let encoded = read_key_file(path)?;
            return EncryptionKey::from_base64(&encoded)
                .with_context(|| format!("key file {}", path.display()));
        }
    }
    if let Some(ref encoded) = cfg.encryption_key {
        return EncryptionKey::from_base64(encoded).context("VANISH_ENCRYPTION_KEY");
    }
    load_or_create_key(data_dir)
}

/// Resolve the data directory, creating it if needed.
pub fn resolve_data_dir(data_dir: Option<&PathBuf>) -> Result<PathBuf> {
    match data_dir {
        Some(d) => {
            std::fs::create_dir_all(d).context("create data dir")?;
            Ok(d.clone())
        }
        None => crate::dirs::data_dir(),
    }
}

fn load_or_create_key(data_dir: &Path) -> Result<EncryptionKey> {
    let key_path = data_dir.join(KEY_FILE);
    if key_path.exists() {
        let bytes = std::fs::read(&key_path).context("read vanish.key")?;
        EncryptionKey::from_slice(&bytes).context("vanish.key is corrupt")
    } else {
        let key = crypto::generate_key();
        std::fs::write(&key_path, key.as_bytes()).context("write vanish.key")?;
        info!(path = %key_path.display(), "generated new encryption key");
        Ok(key)
    }
}

/// All HTTP routes. Admin routes are only mounted when an admin key is set.
pub fn build_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/secret", post(create_secret))
        .route("/api/secret/verify", post(verify_secret))
        .route("/api/secret/{token}", get(get_secret))
        .route("/api/secret/{token}/delete", delete(delete_secret));

    let mut app = Router::new().merge(public);

    if state.admin_key.is_some() {
        let admin = Router::new()
            .route("/api/system/purge", delete(purge_secrets))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                require_admin_key,
            ));
        app = app.merge(admin);
    }

    app.with_state(state).layer(TraceLayer::new_for_http())
}

pub async fn run(cfg: ServerConfig) -> Result<()> {
    cfg.validate()?;

    let (store, key): (Arc<dyn SecretStore>, EncryptionKey) = match cfg.store {
        StoreKind::Redb => {
            let data_dir = resolve_data_dir(cfg.data_dir.as_ref())?;
            info!(data_dir = %data_dir.display(), "using data directory");
            let store = RedbStore::open(&data_dir.join(DB_FILE)).context("open store")?;
            (Arc::new(store), resolve_encryption_key(&cfg, &data_dir)?)
        }
        StoreKind::Memory => {
            warn!("using in-memory store; secrets will not survive a restart");
            let key = if cfg.encryption_key.is_none() && cfg.encryption_key_file.is_none() {
                crypto::generate_key()
            } else {
                resolve_encryption_key(&cfg, Path::new("."))?
            };
            (Arc::new(MemoryStore::new()), key)
        }
    };

    let clock = Arc::new(SystemClock);
    if store.supports_conditional_update() {
        info!("store supports conditional consume; reads are exactly-once");
    } else {
        warn!("store lacks conditional update; racing reads may both succeed");
    }

    let reaper = Reaper::new(Arc::clone(&store), clock.clone(), cfg.reaper_interval);
    let service = SecretService::new(
        store,
        Cipher::new(key),
        TokenGenerator::new(cfg.token_attempts),
        clock,
        cfg.policy(),
    )
    .with_sweep_lock(reaper.sweep_lock());
    reaper.start().await;

    if cfg.admin_key.is_none() {
        info!("VANISH_ADMIN_KEY not set; admin routes disabled");
    }

    let state = AppState {
        service,
        admin_key: cfg.admin_key,
    };
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;

    info!(%addr, "vanish server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("bind listener")?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error");

    reaper.stop().await;
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
