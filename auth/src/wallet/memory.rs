//! In-process wallet provider.
//!
//! Behaves like an injected browser wallet: accounts become visible to
//! [`WalletProvider::accounts`] only after the user approves
//! [`WalletProvider::request_accounts`], and account/chain switches are
//! pushed to every registered listener synchronously. Used by tests and by
//! anything that needs a scripted wallet.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::{ChainId, ListenerId, ProviderError, WalletListener, WalletProvider};

pub struct MemoryWallet {
    accounts: RwLock<Vec<String>>,
    chain: RwLock<ChainId>,
    authorized: AtomicBool,
    rejecting: AtomicBool,
    listeners: DashMap<u64, Arc<WalletListener>>,
    next_listener: AtomicU64,
}

impl MemoryWallet {
    /// A wallet holding `accounts` that has not yet granted access.
    pub fn new(accounts: Vec<String>) -> Self {
        Self {
            accounts: RwLock::new(accounts),
            chain: RwLock::new("0x1".to_string()),
            authorized: AtomicBool::new(false),
            rejecting: AtomicBool::new(false),
            listeners: DashMap::new(),
            next_listener: AtomicU64::new(1),
        }
    }

    /// A wallet that already granted access in an earlier visit.
    pub fn authorized(accounts: Vec<String>) -> Self {
        let wallet = Self::new(accounts);
        wallet.authorized.store(true, Ordering::SeqCst);
        wallet
    }

    /// Make the next permission prompts fail as if the user declined.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    /// Replace the account list without notifying listeners.
    pub fn set_accounts(&self, accounts: Vec<String>) {
        *self.accounts.write() = accounts;
    }

    /// Switch the primary account and notify listeners.
    pub fn switch_account(&self, account: &str) {
        self.set_accounts(vec![account.to_string()]);
        self.authorized.store(true, Ordering::SeqCst);
        self.emit_accounts(vec![account.to_string()]);
    }

    /// Revoke access from the wallet side and notify listeners.
    pub fn disconnect(&self) {
        self.authorized.store(false, Ordering::SeqCst);
        self.emit_accounts(Vec::new());
    }

    /// Switch networks and notify listeners.
    pub fn switch_chain(&self, chain: &str) {
        *self.chain.write() = chain.to_string();
        let chain = chain.to_string();
        for listener in self.snapshot_listeners() {
            (listener.on_chain_changed)(chain.clone());
        }
    }

    pub fn chain(&self) -> ChainId {
        self.chain.read().clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn emit_accounts(&self, accounts: Vec<String>) {
        for listener in self.snapshot_listeners() {
            (listener.on_accounts_changed)(accounts.clone());
        }
    }

    // Listeners may unsubscribe from inside a callback; never hold a map
    // guard while invoking one.
    fn snapshot_listeners(&self) -> Vec<Arc<WalletListener>> {
        self.listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

#[async_trait]
impl WalletProvider for MemoryWallet {
    async fn request_accounts(&self) -> Result<Vec<String>, ProviderError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(ProviderError::Rejected);
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(self.accounts.read().clone())
    }

    async fn accounts(&self) -> Result<Vec<String>, ProviderError> {
        if self.authorized.load(Ordering::SeqCst) {
            Ok(self.accounts.read().clone())
        } else {
            Ok(Vec::new())
        }
    }

    fn add_listener(&self, listener: Arc<WalletListener>) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.insert(id, listener);
        ListenerId(id)
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.remove(&id.0);
    }
}
