//! Persisted session hint.
//!
//! A page load can show the last signed-in wallet before resolution
//! finishes. The hint is only ever written from a committed session and is
//! never consulted by [`crate::guard::AccessGuard`]; it is a display aid,
//! not a second source of truth.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::Session;
use crate::identity::{Role, WalletAddress};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionHint {
    pub wallet_address: WalletAddress,
    pub role: Role,
    pub display_name: String,
    pub saved_at: DateTime<Utc>,
}

impl SessionHint {
    /// The hint for a committed ready session, if it has an identity.
    pub fn from_session(session: &Session) -> Option<Self> {
        if !session.is_authenticated() {
            return None;
        }
        session.identity.as_ref().map(|identity| Self {
            wallet_address: identity.wallet_address,
            role: identity.role,
            display_name: identity.display_name.clone(),
            saved_at: Utc::now(),
        })
    }
}

/// Storage for the session hint (browser storage, a file, memory).
pub trait SessionCache: Send + Sync {
    fn load(&self) -> Option<SessionHint>;
    fn store(&self, hint: &SessionHint);
    fn clear(&self);
}

/// In-process [`SessionCache`].
#[derive(Debug, Default)]
pub struct MemorySessionCache {
    slot: Mutex<Option<SessionHint>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeded with a hint, as if left over from an earlier visit.
    pub fn with_hint(hint: SessionHint) -> Self {
        Self {
            slot: Mutex::new(Some(hint)),
        }
    }
}

impl SessionCache for MemorySessionCache {
    fn load(&self) -> Option<SessionHint> {
        self.slot.lock().clone()
    }

    fn store(&self, hint: &SessionHint) {
        *self.slot.lock() = Some(hint.clone());
    }

    fn clear(&self) {
        self.slot.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn hint_only_from_authenticated_sessions() {
        assert!(SessionHint::from_session(&Session::anonymous()).is_none());

        let address = WalletAddress::parse("0x00000000000000000000000000000000000000c1").unwrap();
        let identity = Identity::provision(address, Role::Issuer);
        assert!(SessionHint::from_session(&Session::loading(Some(identity.clone()))).is_none());

        let hint = SessionHint::from_session(&Session::authenticated(identity)).unwrap();
        assert_eq!(hint.wallet_address, address);
        assert_eq!(hint.role, Role::Issuer);
    }

    #[test]
    fn memory_cache_roundtrip_and_clear() {
        let cache = MemorySessionCache::new();
        assert!(cache.load().is_none());

        let address = WalletAddress::parse("0x00000000000000000000000000000000000000c2").unwrap();
        let session = Session::authenticated(Identity::provision(address, Role::Holder));
        cache.store(&SessionHint::from_session(&session).unwrap());
        assert_eq!(cache.load().map(|h| h.wallet_address), Some(address));

        cache.clear();
        cache.clear();
        assert!(cache.load().is_none());
    }
}
