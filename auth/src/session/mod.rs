//! # Session Module
//!
//! The single source of truth for "who is acting right now".
//!
//! ```text
//! mod.rs  : Session snapshot type, status, failure taxonomy
//! state.rs: SessionState: the state machine and its single-writer rule
//! cache.rs: SessionCache: persisted hint for fast bootstrap
//! ```
//!
//! ## States
//!
//! ```text
//!                 bootstrap / login / account change / chain change
//!  Uninitialized ─────────────────────────────> Loading
//!                                                  │
//!                            success ┌─────────────┴─────────────┐ failure
//!                                    v                           v
//!                        Ready { identity }           Error { identity = none }
//!
//!  logout / disconnect (from anywhere) ──> Ready { identity = none }
//! ```
//!
//! Readers only ever see committed snapshots. A resolution that has been
//! superseded never reaches the snapshot.

pub mod cache;
pub mod state;

pub use cache::{MemorySessionCache, SessionCache, SessionHint};
pub use state::{SessionOptions, SessionState};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::identity::{Identity, Role};
use crate::resolver::ResolveError;
use crate::wallet::ConnectError;

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Uninitialized,
    Loading,
    Ready,
    Error,
}

/// Category of a failed resolution, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ProviderMissing,
    UserRejected,
    NoAccounts,
    InvalidAddress,
    AccountDisabled,
    StoreUnavailable,
    ProviderFailure,
}

impl FailureKind {
    /// Whether the UI should offer a retry rather than a hard stop.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::StoreUnavailable | FailureKind::ProviderFailure
        )
    }
}

/// A failure committed into an `Error` session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl SessionFailure {
    /// The caller stopped waiting before the resolution finished.
    pub fn abandoned() -> Self {
        Self {
            kind: FailureKind::StoreUnavailable,
            message: "session resolution was abandoned before it finished".into(),
        }
    }
}

impl From<&ConnectError> for SessionFailure {
    fn from(e: &ConnectError) -> Self {
        let kind = match e {
            ConnectError::ProviderMissing => FailureKind::ProviderMissing,
            ConnectError::UserRejected => FailureKind::UserRejected,
            ConnectError::NoAccounts => FailureKind::NoAccounts,
            ConnectError::MalformedAccount(_) => FailureKind::InvalidAddress,
            ConnectError::Provider(_) => FailureKind::ProviderFailure,
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

impl From<&ResolveError> for SessionFailure {
    fn from(e: &ResolveError) -> Self {
        let kind = match e {
            ResolveError::InvalidAddress(_) => FailureKind::InvalidAddress,
            ResolveError::AccountDisabled(_) => FailureKind::AccountDisabled,
            ResolveError::StoreUnavailable(_) => FailureKind::StoreUnavailable,
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

/// Snapshot of the current session.
///
/// Constructed only through the named constructors, which keep the
/// identity/status/error combinations coherent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Option<Identity>,
    pub status: SessionStatus,
    pub error: Option<SessionFailure>,
}

impl Session {
    /// Process start: nothing known yet.
    pub fn uninitialized() -> Self {
        Self::default()
    }

    /// Resolution in progress. `identity` is whatever was committed
    /// before, if the transition keeps it visible.
    pub fn loading(identity: Option<Identity>) -> Self {
        Self {
            identity,
            status: SessionStatus::Loading,
            error: None,
        }
    }

    /// Settled, nobody signed in.
    pub fn anonymous() -> Self {
        Self {
            identity: None,
            status: SessionStatus::Ready,
            error: None,
        }
    }

    pub fn authenticated(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            status: SessionStatus::Ready,
            error: None,
        }
    }

    pub fn failed(failure: SessionFailure) -> Self {
        Self {
            identity: None,
            status: SessionStatus::Error,
            error: Some(failure),
        }
    }

    /// Effective role. [`Role::Public`] without an identity.
    pub fn role(&self) -> Role {
        self.identity
            .as_ref()
            .map(|identity| identity.role)
            .unwrap_or(Role::Public)
    }

    /// True while the outcome of a resolution is unknown.
    pub fn is_pending(&self) -> bool {
        matches!(
            self.status,
            SessionStatus::Uninitialized | SessionStatus::Loading
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Ready && self.identity.is_some()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a session operation did not produce a committed session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The wallet refused or failed. The session is now `Error`.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Resolution failed. The session is now `Error`.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// A resolution is already running and this request does not preempt.
    #[error("a session resolution is already in progress")]
    InFlight,

    /// `bootstrap` already ran for this session.
    #[error("session already bootstrapped")]
    AlreadyBootstrapped,

    /// A newer resolution replaced this one before it could commit.
    #[error("resolution superseded by a newer session event")]
    Superseded,
}

impl SessionError {
    /// The failure this error committed into the session, if any.
    pub fn failure(&self) -> Option<SessionFailure> {
        match self {
            SessionError::Connect(e) => Some(e.into()),
            SessionError::Resolve(e) => Some(e.into()),
            _ => None,
        }
    }
}
