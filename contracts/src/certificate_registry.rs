//! # Certificate Registry Contract
//!
//! Models the platform's certificate contract: who may issue, who holds
//! what, and which certificates have been revoked. The auth core reads it
//! through [`crate::oracle::RegistryOracle`] as an advisory source of role
//! claims; nothing here ever writes to the identity store.
//!
//! ## Authority Model
//!
//! - **Owner**: the deploying address. Holds an `admin` claim that cannot
//!   be revoked.
//! - **Admins** grant and revoke `issuer` and `admin` claims, issue
//!   certificates, and may revoke any certificate.
//! - **Issuers** issue certificates and revoke the ones they issued.
//! - **Holders** have no explicit claim. An address holding at least one
//!   live certificate claims `holder`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

use certgate_auth::identity::{Role, WalletAddress};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The caller lacks the claim this action needs.
    #[error("unauthorized: {caller} may not {action}")]
    Unauthorized {
        /// The address attempting the action.
        caller: WalletAddress,
        /// What it attempted.
        action: &'static str,
    },

    /// Only `issuer` and `admin` are recorded as explicit claims.
    #[error("role '{0}' cannot be granted as a claim")]
    UngrantableRole(Role),

    /// The owner's admin claim is permanent.
    #[error("the registry owner's claim cannot be revoked")]
    OwnerImmutable,

    /// Revoking a claim the address does not have.
    #[error("{0} holds no explicit role claim")]
    NoClaim(WalletAddress),

    /// The referenced certificate does not exist.
    #[error("certificate not found: #{0}")]
    CertificateNotFound(u64),

    /// The certificate was already revoked.
    #[error("certificate #{0} is already revoked")]
    AlreadyRevoked(u64),

    /// A certificate needs a title.
    #[error("certificate title must not be empty")]
    EmptyTitle,

    /// Token ids ran out.
    #[error("certificate id space exhausted")]
    IdOverflow,

    /// Snapshot file could not be read or written.
    #[error("registry snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("registry snapshot is invalid: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Sequential token id, starting at 1.
    pub token_id: u64,
    pub holder: WalletAddress,
    pub issuer: WalletAddress,
    pub title: String,
    /// Off-chain metadata location (IPFS, HTTPS).
    pub metadata_uri: String,
    pub issued_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl CertificateRecord {
    pub fn is_live(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// The certificate registry.
///
/// In production this state lives in the contract's storage. The in-memory
/// representation here is what the oracle reads and what tests drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRegistry {
    owner: WalletAddress,
    /// Explicit `issuer`/`admin` claims.
    role_claims: HashMap<WalletAddress, Role>,
    certificates: BTreeMap<u64, CertificateRecord>,
    /// Holder -> token ids, in issue order.
    by_holder: HashMap<WalletAddress, Vec<u64>>,
    next_token_id: u64,
}

impl CertificateRegistry {
    /// Deploy a registry owned by `owner`.
    pub fn new(owner: WalletAddress) -> Self {
        let mut role_claims = HashMap::new();
        role_claims.insert(owner, Role::Admin);
        Self {
            owner,
            role_claims,
            certificates: BTreeMap::new(),
            by_holder: HashMap::new(),
            next_token_id: 1,
        }
    }

    pub fn owner(&self) -> WalletAddress {
        self.owner
    }

    // -- Role claims ----------------------------------------------------------

    /// Record an `issuer` or `admin` claim for `account`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Unauthorized`] unless `caller` holds an admin claim,
    /// [`RegistryError::UngrantableRole`] for `holder` and `public`.
    pub fn grant_role(
        &mut self,
        caller: &WalletAddress,
        account: WalletAddress,
        role: Role,
    ) -> Result<(), RegistryError> {
        self.require_admin(caller, "grant roles")?;
        if !matches!(role, Role::Issuer | Role::Admin) {
            return Err(RegistryError::UngrantableRole(role));
        }
        if account == self.owner {
            return Err(RegistryError::OwnerImmutable);
        }
        self.role_claims.insert(account, role);
        Ok(())
    }

    /// Remove the explicit claim of `account`, returning it.
    pub fn revoke_role(
        &mut self,
        caller: &WalletAddress,
        account: &WalletAddress,
    ) -> Result<Role, RegistryError> {
        self.require_admin(caller, "revoke roles")?;
        if *account == self.owner {
            return Err(RegistryError::OwnerImmutable);
        }
        self.role_claims
            .remove(account)
            .ok_or(RegistryError::NoClaim(*account))
    }

    /// The role the registry claims for `address`.
    ///
    /// An explicit claim wins. Otherwise any live certificate makes the
    /// address a `holder`.
    pub fn role_of(&self, address: &WalletAddress) -> Option<Role> {
        if let Some(role) = self.role_claims.get(address) {
            return Some(*role);
        }
        let holds_live = self
            .certificates_of(address)
            .iter()
            .any(|record| record.is_live());
        holds_live.then_some(Role::Holder)
    }

    // -- Certificates ---------------------------------------------------------

    /// Issue a certificate to `holder`. Returns its token id.
    pub fn issue(
        &mut self,
        caller: &WalletAddress,
        holder: WalletAddress,
        title: impl Into<String>,
        metadata_uri: impl Into<String>,
    ) -> Result<u64, RegistryError> {
        if !self.claim(caller).satisfies(Role::Issuer) {
            return Err(RegistryError::Unauthorized {
                caller: *caller,
                action: "issue certificates",
            });
        }

        let title = title.into();
        if title.trim().is_empty() {
            return Err(RegistryError::EmptyTitle);
        }

        let token_id = self.next_token_id;
        self.next_token_id = token_id
            .checked_add(1)
            .ok_or(RegistryError::IdOverflow)?;

        self.certificates.insert(
            token_id,
            CertificateRecord {
                token_id,
                holder,
                issuer: *caller,
                title,
                metadata_uri: metadata_uri.into(),
                issued_at: Utc::now(),
                revoked_at: None,
            },
        );
        self.by_holder.entry(holder).or_default().push(token_id);
        Ok(token_id)
    }

    /// Revoke a certificate. The original issuer or any admin may do this.
    pub fn revoke_certificate(
        &mut self,
        caller: &WalletAddress,
        token_id: u64,
    ) -> Result<(), RegistryError> {
        let is_admin = self.claim(caller) == Role::Admin;
        let record = self
            .certificates
            .get_mut(&token_id)
            .ok_or(RegistryError::CertificateNotFound(token_id))?;

        if record.issuer != *caller && !is_admin {
            return Err(RegistryError::Unauthorized {
                caller: *caller,
                action: "revoke this certificate",
            });
        }
        if !record.is_live() {
            return Err(RegistryError::AlreadyRevoked(token_id));
        }

        record.revoked_at = Some(Utc::now());
        Ok(())
    }

    pub fn certificate(&self, token_id: u64) -> Option<&CertificateRecord> {
        self.certificates.get(&token_id)
    }

    /// Every certificate issued to `holder`, revoked ones included.
    pub fn certificates_of(&self, holder: &WalletAddress) -> Vec<&CertificateRecord> {
        self.by_holder
            .get(holder)
            .map(|ids| ids.iter().filter_map(|id| self.certificates.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn certificate_count(&self) -> usize {
        self.certificates.len()
    }

    // -- Snapshots --------------------------------------------------------------

    pub fn to_json(&self) -> Result<String, RegistryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write a JSON snapshot to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), RegistryError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a JSON snapshot from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn claim(&self, address: &WalletAddress) -> Role {
        self.role_claims.get(address).copied().unwrap_or(Role::Public)
    }

    fn require_admin(
        &self,
        caller: &WalletAddress,
        action: &'static str,
    ) -> Result<(), RegistryError> {
        if self.claim(caller) == Role::Admin {
            Ok(())
        } else {
            Err(RegistryError::Unauthorized {
                caller: *caller,
                action,
            })
        }
    }
}
