use std::io::Read;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::{Client, Response};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use vanish_server::server::StoreKind;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "vanish", about = "vanish: one-time, self-destructing secrets", version)]
struct Cli {
    /// vanish server URL (default: http://localhost:8080 or $VANISH_SERVER)
    #[arg(long, env = "VANISH_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the vanish HTTP server
    Serve {
        /// Port to listen on (default: $VANISH_PORT or 8080)
        #[arg(long, env = "VANISH_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $VANISH_HOST or 0.0.0.0)
        #[arg(long, env = "VANISH_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Storage backend: redb or memory (default: $VANISH_STORE or redb)
        #[arg(long, env = "VANISH_STORE", default_value = "redb")]
        store: String,
    },
    /// Store a secret and print its one-time token and URL
    Create {
        /// Secret content; read from stdin when omitted
        content: Option<String>,
        /// Minutes until the secret expires
        #[arg(long)]
        ttl: Option<i64>,
        /// Require this passphrase to read the secret
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Read (and thereby destroy) a secret
    Read {
        /// Token or full access URL
        token: String,
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Check a passphrase without consuming the secret
    Verify {
        /// Token or full access URL
        token: String,
        passphrase: String,
    },
    /// Destroy a secret without reading it
    Delete {
        /// Token or full access URL
        token: String,
    },
    /// Purge expired secrets now (admin)
    Purge {
        /// Admin key ($VANISH_ADMIN_KEY)
        #[arg(long, env = "VANISH_ADMIN_KEY")]
        admin_key: String,
    },
    /// Print a fresh base64 encryption key for VANISH_ENCRYPTION_KEY
    Keygen,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VANISH_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let server = cli.server.trim_end_matches('/');

    match cli.command {
        Commands::Serve { port, host, store } => cmd_serve(host, port, &store).await,

        Commands::Create {
            content,
            ttl,
            passphrase,
        } => cmd_create(server, content, ttl, passphrase.as_deref()).await,

        Commands::Read { token, passphrase } => {
            cmd_read(server, token_from(&token), passphrase.as_deref()).await
        }

        Commands::Verify { token, passphrase } => {
            cmd_verify(server, token_from(&token), &passphrase).await
        }

        Commands::Delete { token } => cmd_delete(server, token_from(&token)).await,

        Commands::Purge { admin_key } => cmd_purge(server, &admin_key).await,

        Commands::Keygen => {
            println!("{}", vanish_server::crypto::generate_key().to_base64());
            Ok(())
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, store: &str) -> Result<()> {
    let cfg = vanish_server::ServerConfig {
        host,
        port,
        store: store.parse::<StoreKind>()?,
        ..Default::default()
    };
    vanish_server::run(cfg).await
}

async fn cmd_create(
    server: &str,
    content: Option<String>,
    ttl: Option<i64>,
    passphrase: Option<&str>,
) -> Result<()> {
    let content = match content {
        Some(c) => c,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("read secret from stdin")?;
            buf.trim_end_matches(['\r', '\n']).to_owned()
        }
    };

    let body = json!({
        "content": content,
        "ttl_minutes": ttl,
        "passphrase": passphrase,
    });
    let resp = Client::new()
        .post(format!("{server}/api/secret"))
        .json(&body)
        .send()
        .await
        .context("HTTP request failed")?;

    let json = expect_success(resp).await?;
    println!("token:   {}", json["token"].as_str().unwrap_or(""));
    println!("url:     {}", json["url"].as_str().unwrap_or(""));
    println!("expires: {}", json["expires_at"].as_str().unwrap_or(""));
    if json["has_passphrase"].as_bool().unwrap_or(false) {
        println!("passphrase required to read");
    }
    Ok(())
}

async fn cmd_read(server: &str, token: &str, passphrase: Option<&str>) -> Result<()> {
    let mut req = Client::new().get(format!("{server}/api/secret/{token}"));
    if let Some(p) = passphrase {
        req = req.query(&[("passphrase", p)]);
    }
    let resp = req.send().await.context("HTTP request failed")?;

    let json = expect_success(resp).await?;
    println!("{}", json["content"].as_str().unwrap_or(""));
    Ok(())
}

async fn cmd_verify(server: &str, token: &str, passphrase: &str) -> Result<()> {
    let resp = Client::new()
        .post(format!("{server}/api/secret/verify"))
        .json(&json!({ "token": token, "passphrase": passphrase }))
        .send()
        .await
        .context("HTTP request failed")?;

    let json = expect_success(resp).await?;
    let message = json["message"].as_str().unwrap_or("");
    if json["valid"].as_bool().unwrap_or(false) {
        println!("✓ {message}");
        Ok(())
    } else {
        anyhow::bail!("{message}");
    }
}

async fn cmd_delete(server: &str, token: &str) -> Result<()> {
    let resp = Client::new()
        .delete(format!("{server}/api/secret/{token}/delete"))
        .send()
        .await
        .context("HTTP request failed")?;

    let json = expect_success(resp).await?;
    println!("✓ {}", json["message"].as_str().unwrap_or("deleted"));
    Ok(())
}

async fn cmd_purge(server: &str, admin_key: &str) -> Result<()> {
    let resp = Client::new()
        .delete(format!("{server}/api/system/purge"))
        .header("X-API-Key", admin_key)
        .send()
        .await
        .context("HTTP request failed")?;

    let json = expect_success(resp).await?;
    let n = json["deleted_count"].as_u64().unwrap_or(0);
    println!("purged {n} expired secret(s)");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Accept either a bare token or an access URL ending in the token.
fn token_from(arg: &str) -> &str {
    arg.trim_end_matches('/').rsplit('/').next().unwrap_or(arg)
}

async fn expect_success(resp: Response) -> Result<Value> {
    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();
    if status.is_success() {
        return Ok(json);
    }
    let error = json["error"].as_str().unwrap_or("unknown error");
    match json["retry_after_secs"].as_u64() {
        Some(secs) => anyhow::bail!("server returned {status}: {error} (retry in {secs}s)"),
        None => anyhow::bail!("server returned {status}: {error}"),
    }
}
