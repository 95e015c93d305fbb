//! # CLI Interface
//!
//! `certgate-server` subcommands: `run`, `init`, `seed-admin` and
//! `version`. Every `run` flag can also come from a `CERTGATE_*`
//! environment variable.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::LogFormat;

/// CertGate access gateway.
///
/// Resolves wallet logins to identities, issues signed session cookies,
/// and guards the role namespaces of the certificate platform.
#[derive(Parser, Debug)]
#[command(
    name = "certgate-server",
    about = "CertGate wallet-login gateway",
    version,
    propagate_version = true
)]
pub struct CertGateCli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the gateway.
    Run(RunArgs),
    /// Create the data directory and generate a session key.
    Init(InitArgs),
    /// Provision (or promote and re-enable) an admin identity.
    SeedAdmin(SeedAdminArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Directory holding the identity database and the session key.
    #[arg(long, short = 'd', env = "CERTGATE_DATA_DIR", default_value = "certgate-data")]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "CERTGATE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CERTGATE_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Route policy file (JSON). The built-in policy is used when omitted.
    #[arg(long, env = "CERTGATE_ROUTES")]
    pub routes: Option<PathBuf>,

    /// Hex-encoded 32-byte session key.
    ///
    /// When omitted, `session.key` in the data directory is read.
    #[arg(long, env = "CERTGATE_SESSION_KEY")]
    pub session_key: Option<String>,

    /// Lifetime of issued session cookies, in seconds.
    #[arg(long, env = "CERTGATE_TOKEN_TTL_SECS", default_value_t = 12 * 60 * 60)]
    pub token_ttl_secs: u64,

    /// Upper bound on one identity-store resolution, in milliseconds.
    #[arg(long, env = "CERTGATE_STORE_TIMEOUT_MS", default_value_t = 2_000)]
    pub store_timeout_ms: u64,

    /// Certificate registry snapshot (JSON) used as the role oracle.
    #[arg(long, env = "CERTGATE_REGISTRY")]
    pub registry: Option<PathBuf>,

    #[arg(long, env = "CERTGATE_LOG_FORMAT", value_enum, default_value = "pretty")]
    pub log_format: LogFormat,

    /// Level for the gateway crates, or a full filter directive. `RUST_LOG`
    /// wins when set.
    #[arg(long, env = "CERTGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    #[arg(long, short = 'd', env = "CERTGATE_DATA_DIR", default_value = "certgate-data")]
    pub data_dir: PathBuf,

    /// Replace an existing session key. Invalidates every issued cookie.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `seed-admin` subcommand.
#[derive(Parser, Debug)]
pub struct SeedAdminArgs {
    #[arg(long, short = 'd', env = "CERTGATE_DATA_DIR", default_value = "certgate-data")]
    pub data_dir: PathBuf,

    /// Wallet address to grant the admin role.
    #[arg(long)]
    pub address: String,
}
