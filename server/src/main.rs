// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CertGate Gateway
//!
//! Entry point for the `certgate-server` binary. Wires the auth core into
//! an HTTP boundary: wallet login issues a signed session cookie, and the
//! access filter guards the role namespaces with the same decision
//! function the in-process session state uses.
//!
//! - `run`: serve the API and the metrics endpoint
//! - `init`: create the data directory and a session key
//! - `seed-admin`: grant the admin role to an address out of band
//! - `version`: print build information

mod api;
mod cli;
mod filter;
mod logging;
mod metrics;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use certgate_auth::config::TOKEN_KEY_LENGTH;
use certgate_auth::store::{notify, ActivityEntry, ActivityKind, AuthDb};
use certgate_auth::token::TokenSigner;
use certgate_auth::wallet::ChallengeBook;
use certgate_auth::{AccessGuard, Identity, Role, RoleResolver, RoutePolicy, WalletAddress};
use certgate_contracts::{CertificateRegistry, RegistryOracle};

use cli::{CertGateCli, Commands};
use logging::LogFormat;
use metrics::GatewayMetrics;

/// Session key file inside the data directory.
const SESSION_KEY_FILE: &str = "session.key";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = CertGateCli::parse();

    match cli.command {
        Commands::Run(args) => run_server(args).await,
        Commands::Init(args) => init_data_dir(args),
        Commands::SeedAdmin(args) => seed_admin(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("db")
}

fn open_db(data_dir: &Path) -> Result<AuthDb> {
    let path = db_path(data_dir);
    std::fs::create_dir_all(&path)
        .with_context(|| format!("failed to create database directory: {}", path.display()))?;
    AuthDb::open(&path).with_context(|| format!("failed to open database at {}", path.display()))
}

/// The session key from the flag, or from `session.key` in the data dir.
fn load_signer(args: &cli::RunArgs) -> Result<TokenSigner> {
    let ttl = Duration::from_secs(args.token_ttl_secs);
    if ttl.is_zero() {
        bail!("--token-ttl-secs must be positive");
    }

    let key_hex = match &args.session_key {
        Some(key) => key.clone(),
        None => {
            let path = args.data_dir.join(SESSION_KEY_FILE);
            std::fs::read_to_string(&path).with_context(|| {
                format!(
                    "no session key at {} (run `certgate-server init` first)",
                    path.display()
                )
            })?
        }
    };
    TokenSigner::from_hex(&key_hex, ttl).context("invalid session key")
}

fn load_policy(path: Option<&Path>) -> Result<RoutePolicy> {
    match path {
        Some(path) => RoutePolicy::load(path)
            .with_context(|| format!("failed to load route policy from {}", path.display())),
        None => {
            let policy = RoutePolicy::default();
            policy.validate().context("built-in route policy is invalid")?;
            Ok(policy)
        }
    }
}

/// Serves the API and metrics listeners until a shutdown signal.
async fn run_server(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(&args.log_level, args.log_format);

    tracing::info!(
        port = args.port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting certgate-server"
    );

    // --- Identity store ---
    let db = Arc::new(open_db(&args.data_dir)?);
    tracing::info!(identities = db.identity_count(), "identity store opened");

    // --- Resolver (with optional on-chain oracle) ---
    let mut resolver = RoleResolver::new(db.clone(), db.clone());
    if let Some(path) = &args.registry {
        let registry = CertificateRegistry::load(path)
            .with_context(|| format!("failed to load registry snapshot {}", path.display()))?;
        tracing::info!(
            path = %path.display(),
            certificates = registry.certificate_count(),
            "role oracle enabled"
        );
        resolver = resolver.with_oracle(Arc::new(RegistryOracle::from_registry(registry)));
    }

    // --- Route policy ---
    let policy = load_policy(args.routes.as_deref())?;
    tracing::info!(routes = policy.routes.len(), "route policy loaded");

    // --- Metrics ---
    let gateway_metrics = Arc::new(GatewayMetrics::new().context("failed to register metrics")?);

    let app_state = api::AppState {
        version: env!("CARGO_PKG_VERSION").to_string(),
        guard: Arc::new(AccessGuard::new(policy)),
        resolver: Arc::new(resolver),
        db: Arc::clone(&db),
        signer: Arc::new(load_signer(&args)?),
        challenges: Arc::new(ChallengeBook::default()),
        metrics: Arc::clone(&gateway_metrics),
        store_timeout: Duration::from_millis(args.store_timeout_ms),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&gateway_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("metrics server listening on {}", metrics_addr);

    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    db.flush().context("failed to flush identity store")?;
    tracing::info!("certgate-server stopped");
    Ok(())
}

/// Creates the data directory and writes a fresh session key.
fn init_data_dir(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let key_path = data_dir.join(SESSION_KEY_FILE);
    if key_path.exists() && !args.force {
        bail!(
            "{} already exists; pass --force to replace it (signs out every session)",
            key_path.display()
        );
    }

    let mut key = [0u8; TOKEN_KEY_LENGTH];
    rand::thread_rng().fill_bytes(&mut key);
    std::fs::write(&key_path, hex::encode(key))
        .with_context(|| format!("failed to write session key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    // Create the store up front so `seed-admin` and `run` find it.
    open_db(data_dir)?.flush()?;
    tracing::info!(key_path = %key_path.display(), "session key generated");

    println!("Data directory initialized.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Session key    : {}", key_path.display());
    println!("  Database       : {}", db_path(data_dir).display());
    Ok(())
}

/// Grants the admin role out of band and prints the result.
fn seed_admin(args: cli::SeedAdminArgs) -> Result<()> {
    logging::init_logging("info", LogFormat::Pretty);

    let address = WalletAddress::parse(&args.address)
        .with_context(|| format!("invalid wallet address: {}", args.address))?;
    let db = open_db(&args.data_dir)?;
    let identity = provision_admin(&db, &address)?;
    db.flush()?;
    tracing::info!(address = %identity.wallet_address, "admin seeded");

    println!("Admin ready.");
    println!("  Address      : {}", identity.wallet_address);
    println!("  Internal id  : {}", identity.internal_id);
    println!("  Active       : {}", identity.active);
    Ok(())
}

/// Provisions the address as an active admin, promoting an existing record
/// in place.
fn provision_admin(db: &AuthDb, address: &WalletAddress) -> Result<Identity> {
    let identity = match db.load(address)? {
        None => db.insert_new(address, Role::Admin)?,
        Some(existing) => {
            if existing.role != Role::Admin {
                db.update_role(address, Role::Admin)?;
            }
            db.update_active(address, true)?
        }
    };
    notify(
        db,
        ActivityEntry::new(ActivityKind::AdminSeeded, Some(*address), "seeded from cli"),
    );
    Ok(identity)
}

fn print_version() {
    println!("certgate-server {}", env!("CARGO_PKG_VERSION"));
    println!("rustc           {}", option_env!("RUSTC_VERSION").unwrap_or("unknown"));
}

/// Waits for SIGINT or SIGTERM. Only Ctrl+C on non-Unix platforms.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
