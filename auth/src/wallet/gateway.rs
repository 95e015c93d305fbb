//! # Wallet Gateway
//!
//! Wraps a [`WalletProvider`] with normalization and subscription hygiene.
//!
//! ## Subscription discipline
//!
//! A gateway holds at most one registered listener pair. `subscribe`
//! removes the previous pair before registering the new one, so a caller
//! that re-subscribes (say, after a remount) never receives an event
//! twice. The returned [`Subscription`] is a guard: dropping it removes
//! the listener, unless a newer subscription has already replaced it.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{ChainId, ConnectError, ListenerId, ProviderError, WalletListener, WalletProvider};
use crate::identity::{AddressError, WalletAddress};

type ActiveSlot = Arc<Mutex<Option<ListenerId>>>;

/// Normalized access to the browser wallet.
#[derive(Clone)]
pub struct WalletGateway {
    /// `None` when no wallet extension is installed.
    provider: Option<Arc<dyn WalletProvider>>,
    /// The listener this gateway currently has registered, if any.
    active: ActiveSlot,
}

impl WalletGateway {
    pub fn new(provider: Arc<dyn WalletProvider>) -> Self {
        Self {
            provider: Some(provider),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// A gateway for an environment with no wallet installed. Every
    /// `connect` fails with [`ConnectError::ProviderMissing`].
    pub fn unavailable() -> Self {
        Self {
            provider: None,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider.is_some()
    }

    /// Ask the user for account access and return the primary address.
    pub async fn connect(&self) -> Result<WalletAddress, ConnectError> {
        let provider = self.provider.as_ref().ok_or(ConnectError::ProviderMissing)?;

        let accounts = provider.request_accounts().await.map_err(|e| match e {
            ProviderError::Rejected => ConnectError::UserRejected,
            other => ConnectError::Provider(other.to_string()),
        })?;

        match primary(&accounts)? {
            Some(address) => {
                debug!(address = %address, "wallet connected");
                Ok(address)
            }
            None => Err(ConnectError::NoAccounts),
        }
    }

    /// The already-authorized primary address, without prompting.
    ///
    /// Provider failures and malformed accounts read as "no address": this
    /// query feeds bootstrap, and an unreadable wallet is an anonymous one.
    pub async fn current_address(&self) -> Option<WalletAddress> {
        let provider = self.provider.as_ref()?;
        match provider.accounts().await {
            Ok(accounts) => match primary(&accounts) {
                Ok(address) => address,
                Err(e) => {
                    warn!(error = %e, "wallet reported a malformed primary account");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to query authorized wallet accounts");
                None
            }
        }
    }

    /// Register the account/chain listener pair for this gateway.
    ///
    /// `on_accounts_changed` receives the new primary address, or `None`
    /// when the wallet disconnected (or reported something unparseable).
    /// Any listener previously registered through this gateway is removed
    /// first.
    pub fn subscribe<A, C>(&self, on_accounts_changed: A, on_chain_changed: C) -> Subscription
    where
        A: Fn(Option<WalletAddress>) + Send + Sync + 'static,
        C: Fn(ChainId) + Send + Sync + 'static,
    {
        let Some(provider) = self.provider.clone() else {
            return Subscription::inert();
        };

        let mut active = self.active.lock();
        if let Some(previous) = active.take() {
            provider.remove_listener(previous);
            debug!(listener = previous.0, "replaced existing wallet listener");
        }

        let listener = WalletListener {
            on_accounts_changed: Box::new(move |accounts| {
                let next = match primary(&accounts) {
                    Ok(address) => address,
                    Err(e) => {
                        warn!(error = %e, "account change carried a malformed address, treating as disconnect");
                        None
                    }
                };
                on_accounts_changed(next);
            }),
            on_chain_changed: Box::new(on_chain_changed),
        };

        let id = provider.add_listener(Arc::new(listener));
        *active = Some(id);
        debug!(listener = id.0, "wallet listener registered");

        Subscription {
            registration: Some((provider, id)),
            active: Arc::clone(&self.active),
        }
    }

    /// Whether this gateway currently has a listener registered.
    pub fn has_listener(&self) -> bool {
        self.active.lock().is_some()
    }
}

fn primary(accounts: &[String]) -> Result<Option<WalletAddress>, AddressError> {
    accounts
        .first()
        .map(|raw| WalletAddress::parse(raw))
        .transpose()
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Scoped ownership of a registered listener pair.
///
/// Dropping it unregisters the listener. A subscription that has been
/// superseded by a newer `subscribe` call drops without side effects.
pub struct Subscription {
    registration: Option<(Arc<dyn WalletProvider>, ListenerId)>,
    active: ActiveSlot,
}

impl Subscription {
    fn inert() -> Self {
        Self {
            registration: None,
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Whether this subscription's listener is still the registered one.
    pub fn is_active(&self) -> bool {
        match &self.registration {
            Some((_, id)) => *self.active.lock() == Some(*id),
            None => false,
        }
    }

    /// Explicitly release the listener.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some((provider, id)) = self.registration.take() else {
            return;
        };
        let mut active = self.active.lock();
        if *active == Some(id) {
            *active = None;
            provider.remove_listener(id);
            debug!(listener = id.0, "wallet listener removed");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
