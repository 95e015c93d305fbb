//! # Identity Records
//!
//! The stored view of a wallet: its role, a display name, the soft-disable
//! flag, and when we last saw it. Records are never hard-deleted in normal
//! operation. Setting `active = false` is how an account is shut off.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::address::WalletAddress;
use super::role::Role;

/// A user known to the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Store-assigned identifier. Stable across role changes.
    pub internal_id: Uuid,
    /// Primary key.
    pub wallet_address: WalletAddress,
    /// Authoritative role. Never [`Role::Public`] for a stored record.
    pub role: Role,
    /// Profile name shown in the dashboard.
    pub display_name: String,
    /// Soft-disable flag. Inactive identities cannot authenticate.
    pub active: bool,
    /// When the record was provisioned.
    pub created_at: DateTime<Utc>,
    /// Last role/flag/profile mutation.
    pub updated_at: DateTime<Utc>,
    /// Last successful resolution, if any.
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// A fresh, active record for a wallet seen for the first time.
    ///
    /// The display name defaults to the abbreviated address until the user
    /// sets one.
    pub fn provision(address: WalletAddress, role: Role) -> Self {
        let now = Utc::now();
        Self {
            internal_id: Uuid::new_v4(),
            wallet_address: address,
            role,
            display_name: address.short(),
            active: true,
            created_at: now,
            updated_at: now,
            last_seen_at: None,
        }
    }

    /// Whether this record may back an authenticated session.
    pub fn can_authenticate(&self) -> bool {
        self.active && self.role.is_authenticated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> WalletAddress {
        WalletAddress::parse("0x00000000000000000000000000000000000000aa").unwrap()
    }

    #[test]
    fn provisioned_identity_defaults() {
        let id = Identity::provision(addr(), Role::Holder);
        assert!(id.active);
        assert_eq!(id.role, Role::Holder);
        assert_eq!(id.display_name, "0x0000...00aa");
        assert!(id.last_seen_at.is_none());
        assert_eq!(id.created_at, id.updated_at);
        assert!(id.can_authenticate());
    }

    #[test]
    fn disabled_identity_cannot_authenticate() {
        let mut id = Identity::provision(addr(), Role::Admin);
        id.active = false;
        assert!(!id.can_authenticate());
    }

    #[test]
    fn public_role_cannot_authenticate() {
        let id = Identity::provision(addr(), Role::Public);
        assert!(!id.can_authenticate());
    }

    #[test]
    fn provisioning_assigns_unique_ids() {
        let a = Identity::provision(addr(), Role::Holder);
        let b = Identity::provision(addr(), Role::Holder);
        assert_ne!(a.internal_id, b.internal_id);
    }
}
