//! # Store Module
//!
//! The two persistence collaborators of the auth core, as ports:
//!
//! - [`IdentityStore`]: the user repository, keyed by wallet address.
//! - [`ActivityRecorder`]: an append-only, fire-and-forget event sink.
//!
//! ```text
//! db.rs: AuthDb: sled-backed implementation of both ports
//! ```
//!
//! Both ports take [`WalletAddress`] rather than strings, so every lookup
//! is case-insensitive before it ever reaches a backend.

pub mod db;

pub use db::AuthDb;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::identity::{Identity, Role, WalletAddress};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures reported by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `create` lost to an existing record. The existing record wins.
    #[error("identity already exists for {0}")]
    AlreadyExists(WalletAddress),

    /// A mutation targeted an address with no record.
    #[error("no identity for {0}")]
    NotFound(WalletAddress),

    /// Attempted to store a role that denotes "no role".
    #[error("role '{0}' cannot be assigned to a stored identity")]
    UnassignableRole(Role),

    /// The backend failed (I/O, connection, corruption).
    #[error("store backend error: {0}")]
    Backend(String),

    /// The backend did not answer in time.
    #[error("store operation timed out")]
    TimedOut,

    /// A record could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// IdentityStore
// ---------------------------------------------------------------------------

/// Persistent user repository keyed by wallet address.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Look up the record for `address`.
    async fn get_by_address(&self, address: &WalletAddress) -> StoreResult<Option<Identity>>;

    /// Create a record with `default_role`.
    ///
    /// Must be atomic with respect to concurrent creates of the same
    /// address: exactly one succeeds, the others fail with
    /// [`StoreError::AlreadyExists`].
    async fn create(&self, address: &WalletAddress, default_role: Role) -> StoreResult<Identity>;

    /// Change the stored role. Admin operation.
    async fn set_role(&self, address: &WalletAddress, role: Role) -> StoreResult<Identity>;

    /// Enable or soft-disable an identity. Admin operation.
    async fn set_active(&self, address: &WalletAddress, active: bool) -> StoreResult<Identity>;

    /// Stamp `last_seen_at` with the current time and return the updated
    /// record.
    async fn touch(&self, address: &WalletAddress) -> StoreResult<Identity>;
}

// ---------------------------------------------------------------------------
// ActivityRecorder
// ---------------------------------------------------------------------------

/// Kind of identity/session event being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    /// The wallet granted account access.
    Connect,
    /// A session became ready with an identity.
    Login,
    /// A new identity was auto-provisioned.
    Provisioned,
    /// A stored or session role changed.
    RoleChange,
    /// An identity was enabled or disabled.
    AccountStatus,
    /// Stored role and on-chain claim disagree.
    Reconciliation,
    /// A resolution attempt ended in failure.
    ResolutionFailed,
    /// A login carried no valid proof of address ownership.
    ProofRejected,
    /// User-initiated logout.
    Logout,
    /// The wallet disconnected on its own.
    Disconnect,
    /// The wallet switched networks.
    ChainChange,
    /// An admin was provisioned out of band.
    AdminSeeded,
}

/// One appended activity event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub kind: ActivityKind,
    pub wallet_address: Option<WalletAddress>,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        kind: ActivityKind,
        wallet_address: Option<WalletAddress>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            wallet_address,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only sink for activity events.
///
/// Implementations should return quickly; anything slow belongs behind a
/// queue on the implementation side.
pub trait ActivityRecorder: Send + Sync {
    fn append(&self, entry: ActivityEntry) -> StoreResult<()>;
}

/// Record an entry, logging (and otherwise ignoring) failures.
///
/// Session transitions call this after committing, so a broken recorder can
/// never roll back or block an identity change.
pub fn notify(recorder: &dyn ActivityRecorder, entry: ActivityEntry) {
    let kind = entry.kind;
    if let Err(e) = recorder.append(entry) {
        warn!(?kind, error = %e, "failed to record activity");
    }
}
