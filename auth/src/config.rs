//! # Constants
//!
//! Every fixed value the auth core depends on lives here. Route layout that
//! operators are expected to change lives in [`crate::guard::RoutePolicy`]
//! instead; these are the values that would break clients if they moved.

use std::time::Duration;

use crate::identity::Role;

// ---------------------------------------------------------------------------
// Addresses
// ---------------------------------------------------------------------------

/// Wallet addresses are 20-byte account identifiers.
pub const ADDRESS_BYTES: usize = 20;

/// Textual prefix on every address we accept or print.
pub const ADDRESS_PREFIX: &str = "0x";

/// Length of the textual form including the prefix.
pub const ADDRESS_TEXT_LENGTH: usize = ADDRESS_PREFIX.len() + ADDRESS_BYTES * 2;

// ---------------------------------------------------------------------------
// Identity Provisioning
// ---------------------------------------------------------------------------

/// Role assigned to a wallet the first time it connects.
pub const DEFAULT_PROVISIONED_ROLE: Role = Role::Holder;

/// Upper bound on one resolution before it fails as `StoreUnavailable`.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Where unauthenticated or failed sessions are sent.
pub const LOGIN_ROUTE: &str = "/login";

/// Landing page for anyone. Used when a role has no home namespace.
pub const PUBLIC_ROOT: &str = "/";

/// Home namespaces for each authenticated role.
pub const ADMIN_HOME: &str = "/admin";
pub const ISSUER_HOME: &str = "/issuer";
pub const HOLDER_HOME: &str = "/holder";

// ---------------------------------------------------------------------------
// Session Tokens
// ---------------------------------------------------------------------------

/// Cookie carrying the signed session token at the request boundary.
pub const SESSION_COOKIE: &str = "certgate_session";

/// Default lifetime of an issued session token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Session-token MAC key length in bytes (BLAKE3 keyed mode).
pub const TOKEN_KEY_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Login Challenges
// ---------------------------------------------------------------------------

/// How long an issued sign-in challenge stays redeemable.
pub const CHALLENGE_TTL: Duration = Duration::from_secs(5 * 60);

/// Random bytes in a challenge nonce.
pub const CHALLENGE_NONCE_BYTES: usize = 16;

/// Outstanding challenges kept before expired ones are swept.
pub const CHALLENGE_SWEEP_THRESHOLD: usize = 1024;

/// Recoverable secp256k1 signature length: `r || s || v`.
pub const SIGNATURE_LENGTH: usize = 65;

// ---------------------------------------------------------------------------
// Wallet Provider
// ---------------------------------------------------------------------------

/// EIP-1193 error code a provider returns when the user dismisses the
/// permission prompt.
pub const USER_REJECTED_CODE: i64 = 4001;
