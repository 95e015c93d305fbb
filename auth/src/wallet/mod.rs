//! # Wallet Module
//!
//! The browser wallet is an opaque capability: it can ask the user for
//! account access, report the already-authorized accounts, and push
//! account/chain change events. [`WalletProvider`] is that capability as a
//! trait; [`WalletGateway`] is what the rest of the crate talks to.
//!
//! The gateway adds two things the raw provider does not have:
//!
//! - Address normalization and a typed error taxonomy
//!   ([`ConnectError`]).
//! - Exactly-once listener management. Subscribing again removes the
//!   previous listener first, and dropping the returned [`Subscription`]
//!   removes it for good.
//!
//! A posted address proves nothing on its own. [`ChallengeBook`] hands out
//! single-use nonces and [`verify_ownership`] checks the wallet's
//! `personal_sign` over one.

pub mod challenge;
pub mod gateway;
pub mod memory;
pub mod signature;

pub use challenge::{Challenge, ChallengeBook};
pub use gateway::{Subscription, WalletGateway};
pub use memory::MemoryWallet;
pub use signature::{verify_ownership, SignatureError};

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::identity::AddressError;

/// Network identifier as reported by the provider (e.g. `"0x1"`).
pub type ChainId = String;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Raw failure reported by a wallet provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The user dismissed the permission prompt.
    #[error("user rejected the request")]
    Rejected,

    /// Any other provider-side failure, with its RPC error code.
    #[error("provider error {code}: {message}")]
    Rpc {
        /// Provider error code.
        code: i64,
        /// Provider error message.
        message: String,
    },
}

impl ProviderError {
    /// Map an EIP-1193 error code onto the taxonomy.
    pub fn from_code(code: i64, message: impl Into<String>) -> Self {
        if code == crate::config::USER_REJECTED_CODE {
            ProviderError::Rejected
        } else {
            ProviderError::Rpc {
                code,
                message: message.into(),
            }
        }
    }
}

/// Why [`WalletGateway::connect`] failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// No wallet extension is installed.
    #[error("no wallet provider is available")]
    ProviderMissing,

    /// The user declined the permission prompt.
    #[error("the user rejected the connection request")]
    UserRejected,

    /// The provider granted access but returned no accounts.
    #[error("the wallet returned no accounts")]
    NoAccounts,

    /// The provider's primary account is not a valid address.
    #[error("the wallet returned a malformed account: {0}")]
    MalformedAccount(#[from] AddressError),

    /// Transport or provider-internal failure.
    #[error("wallet provider failure: {0}")]
    Provider(String),
}

// ---------------------------------------------------------------------------
// Provider Port
// ---------------------------------------------------------------------------

/// Opaque handle for a registered provider listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Callback pair registered with a provider.
///
/// Providers deliver raw account strings. An empty list means the wallet
/// disconnected.
pub struct WalletListener {
    pub on_accounts_changed: Box<dyn Fn(Vec<String>) + Send + Sync>,
    pub on_chain_changed: Box<dyn Fn(ChainId) + Send + Sync>,
}

/// A browser wallet (or anything that behaves like one).
#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Prompt the user for account access. Returns the granted accounts,
    /// primary first.
    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError>;

    /// Already-authorized accounts, without prompting.
    async fn accounts(&self) -> Result<Vec<String>, ProviderError>;

    /// Register a listener pair.
    fn add_listener(&self, listener: Arc<WalletListener>) -> ListenerId;

    /// Remove a listener pair. Unknown ids are ignored.
    fn remove_listener(&self, id: ListenerId);
}
