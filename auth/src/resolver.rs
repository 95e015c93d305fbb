//! # Role Resolution
//!
//! Turns a wallet address into the authoritative [`Identity`] for a session.
//!
//! ## Algorithm
//!
//! 1. Normalize the address (parsing does this; see [`WalletAddress`]).
//! 2. Look it up in the [`IdentityStore`]. If absent, provision a record
//!    with the default role. Provisioning is first-writer-wins: a resolver
//!    that loses the create race re-reads and returns the winner's record.
//! 3. Refuse inactive records with [`ResolveError::AccountDisabled`]. A
//!    disabled account is never quietly demoted to `public`.
//! 4. If a [`RoleOracle`] is configured, compare its claim with the stored
//!    role. Disagreement is recorded as a reconciliation event and nothing
//!    else. The store stays authoritative.
//! 5. Stamp `last_seen_at` and return the stamped record. If stamping
//!    fails the record read in step 2 is returned as is.
//!
//! Every store failure, including a caller-imposed timeout, surfaces as
//! [`ResolveError::StoreUnavailable`], which is the only retryable outcome.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_PROVISIONED_ROLE;
use crate::identity::{Identity, Role, WalletAddress};
use crate::store::{
    notify, ActivityEntry, ActivityKind, ActivityRecorder, IdentityStore, StoreError,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an address could not be resolved to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The input is not a wallet address.
    #[error("invalid wallet address: {0}")]
    InvalidAddress(String),

    /// The identity exists but has been soft-disabled.
    #[error("account {0} is disabled")]
    AccountDisabled(WalletAddress),

    /// The identity store failed or timed out. Safe to retry.
    #[error("identity store unavailable: {0}")]
    StoreUnavailable(String),
}

impl ResolveError {
    /// Whether the caller may offer a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolveError::StoreUnavailable(_))
    }
}

impl From<StoreError> for ResolveError {
    fn from(e: StoreError) -> Self {
        ResolveError::StoreUnavailable(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Role Oracle Port
// ---------------------------------------------------------------------------

/// Failure reading an on-chain role claim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    #[error("role oracle unavailable: {0}")]
    Unavailable(String),
}

/// Read-only source of on-chain role claims (e.g. a certificate registry).
#[async_trait]
pub trait RoleOracle: Send + Sync {
    /// The role the ledger claims for `address`, if it claims one.
    async fn role_claim(&self, address: &WalletAddress) -> Result<Option<Role>, OracleError>;
}

// ---------------------------------------------------------------------------
// RoleResolver
// ---------------------------------------------------------------------------

/// Resolves wallet addresses against the identity store.
pub struct RoleResolver {
    store: Arc<dyn IdentityStore>,
    recorder: Arc<dyn ActivityRecorder>,
    oracle: Option<Arc<dyn RoleOracle>>,
    default_role: Role,
}

impl RoleResolver {
    pub fn new(store: Arc<dyn IdentityStore>, recorder: Arc<dyn ActivityRecorder>) -> Self {
        Self {
            store,
            recorder,
            oracle: None,
            default_role: DEFAULT_PROVISIONED_ROLE,
        }
    }

    /// Consult `oracle` on every resolution.
    pub fn with_oracle(mut self, oracle: Arc<dyn RoleOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// The recorder shared with everything downstream of this resolver.
    pub fn recorder(&self) -> &dyn ActivityRecorder {
        self.recorder.as_ref()
    }

    /// The backing identity store.
    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    /// Resolve a textual address.
    pub async fn resolve_str(&self, input: &str) -> Result<Identity, ResolveError> {
        let address = WalletAddress::parse(input)
            .map_err(|e| ResolveError::InvalidAddress(format!("{}: {}", input.trim(), e)))?;
        self.resolve(&address).await
    }

    /// Resolve, giving up with [`ResolveError::StoreUnavailable`] after
    /// `limit`.
    pub async fn resolve_within(
        &self,
        address: &WalletAddress,
        limit: Duration,
    ) -> Result<Identity, ResolveError> {
        bounded(limit, self.resolve(address)).await
    }

    /// Resolve `address` to its authoritative identity.
    pub async fn resolve(&self, address: &WalletAddress) -> Result<Identity, ResolveError> {
        let identity = match self.store.get_by_address(address).await? {
            Some(identity) => identity,
            None => self.provision(address).await?,
        };

        if !identity.active {
            debug!(address = %address, "resolution refused: account disabled");
            return Err(ResolveError::AccountDisabled(*address));
        }

        if !identity.role.is_authenticated() {
            warn!(address = %address, "stored identity carries no authenticated role");
            return Err(ResolveError::AccountDisabled(*address));
        }

        self.reconcile(&identity).await;

        let identity = match self.store.touch(address).await {
            Ok(touched) => touched,
            Err(e) => {
                warn!(address = %address, error = %e, "failed to stamp last-seen time");
                identity
            }
        };

        debug!(address = %address, role = %identity.role, "address resolved");
        Ok(identity)
    }

    async fn provision(&self, address: &WalletAddress) -> Result<Identity, ResolveError> {
        match self.store.create(address, self.default_role).await {
            Ok(identity) => {
                info!(address = %address, role = %identity.role, "provisioned new identity");
                notify(
                    self.recorder(),
                    ActivityEntry::new(
                        ActivityKind::Provisioned,
                        Some(*address),
                        format!("auto-provisioned as {}", identity.role),
                    ),
                );
                Ok(identity)
            }
            Err(StoreError::AlreadyExists(_)) => {
                // Lost the race; the winner's record is the identity.
                debug!(address = %address, "concurrent provisioning, re-reading");
                self.store.get_by_address(address).await?.ok_or_else(|| {
                    ResolveError::StoreUnavailable(format!(
                        "record for {} vanished after concurrent create",
                        address
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn reconcile(&self, identity: &Identity) {
        let Some(oracle) = &self.oracle else {
            return;
        };

        match oracle.role_claim(&identity.wallet_address).await {
            Ok(Some(claimed)) if claimed != identity.role => {
                info!(
                    address = %identity.wallet_address,
                    stored = %identity.role,
                    claimed = %claimed,
                    "on-chain role claim disagrees with store"
                );
                notify(
                    self.recorder(),
                    ActivityEntry::new(
                        ActivityKind::Reconciliation,
                        Some(identity.wallet_address),
                        format!("stored role {}, on-chain claim {}", identity.role, claimed),
                    ),
                );
            }
            Ok(_) => {}
            Err(e) => {
                warn!(address = %identity.wallet_address, error = %e, "role oracle query failed");
            }
        }
    }
}

/// Run a store-bound future with a deadline, mapping expiry to
/// [`ResolveError::StoreUnavailable`].
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, ResolveError>
where
    F: Future<Output = Result<T, ResolveError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::TimedOut.into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AuthDb, StoreResult};

    const MIXED: &str = "0xAbCdEf0123456789aBcDeF0123456789AbCdEf01";

    fn addr(last: u8) -> WalletAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        WalletAddress::from_bytes(bytes)
    }

    fn resolver(db: &Arc<AuthDb>) -> RoleResolver {
        RoleResolver::new(db.clone(), db.clone())
    }

    struct DownStore;

    #[async_trait]
    impl IdentityStore for DownStore {
        async fn get_by_address(&self, _: &WalletAddress) -> StoreResult<Option<Identity>> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn create(&self, _: &WalletAddress, _: Role) -> StoreResult<Identity> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn set_role(&self, a: &WalletAddress, _: Role) -> StoreResult<Identity> {
            Err(StoreError::NotFound(*a))
        }
        async fn set_active(&self, a: &WalletAddress, _: bool) -> StoreResult<Identity> {
            Err(StoreError::NotFound(*a))
        }
        async fn touch(&self, a: &WalletAddress) -> StoreResult<Identity> {
            Err(StoreError::NotFound(*a))
        }
    }

    struct HangingStore;

    #[async_trait]
    impl IdentityStore for HangingStore {
        async fn get_by_address(&self, _: &WalletAddress) -> StoreResult<Option<Identity>> {
            std::future::pending().await
        }
        async fn create(&self, _: &WalletAddress, _: Role) -> StoreResult<Identity> {
            std::future::pending().await
        }
        async fn set_role(&self, a: &WalletAddress, _: Role) -> StoreResult<Identity> {
            Err(StoreError::NotFound(*a))
        }
        async fn set_active(&self, a: &WalletAddress, _: bool) -> StoreResult<Identity> {
            Err(StoreError::NotFound(*a))
        }
        async fn touch(&self, a: &WalletAddress) -> StoreResult<Identity> {
            Err(StoreError::NotFound(*a))
        }
    }

    struct FixedOracle(Result<Option<Role>, OracleError>);

    #[async_trait]
    impl RoleOracle for FixedOracle {
        async fn role_claim(&self, _: &WalletAddress) -> Result<Option<Role>, OracleError> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn new_address_is_provisioned_as_holder() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        let identity = resolver(&db).resolve(&addr(1)).await.unwrap();

        assert_eq!(identity.role, Role::Holder);
        assert!(identity.active);
        assert_eq!(db.identity_count(), 1);

        let log = db.recent_activity(10).unwrap();
        assert_eq!(log[0].kind, ActivityKind::Provisioned);
        assert_eq!(log[0].wallet_address, Some(addr(1)));
    }

    #[tokio::test]
    async fn existing_record_is_returned_unchanged() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        db.insert_new(&addr(2), Role::Issuer).unwrap();

        let identity = resolver(&db).resolve(&addr(2)).await.unwrap();
        assert_eq!(identity.role, Role::Issuer);
        assert_eq!(db.identity_count(), 1);
        assert!(db.load(&addr(2)).unwrap().unwrap().last_seen_at.is_some());
    }

    #[tokio::test]
    async fn resolved_identity_carries_last_seen() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        db.insert_new(&addr(6), Role::Holder).unwrap();
        assert!(db.load(&addr(6)).unwrap().unwrap().last_seen_at.is_none());

        let identity = resolver(&db).resolve(&addr(6)).await.unwrap();
        assert!(identity.last_seen_at.is_some());
        assert_eq!(identity, db.load(&addr(6)).unwrap().unwrap());

        // A fresh provision is stamped too.
        let provisioned = resolver(&db).resolve(&addr(7)).await.unwrap();
        assert!(provisioned.last_seen_at.is_some());
    }

    #[tokio::test]
    async fn case_variants_resolve_to_one_record() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        let r = resolver(&db);

        let a = r.resolve_str(MIXED).await.unwrap();
        let b = r.resolve_str(&MIXED.to_lowercase()).await.unwrap();
        let c = r.resolve_str(&MIXED.to_uppercase().replacen("0X", "0x", 1)).await.unwrap();

        assert_eq!(a.internal_id, b.internal_id);
        assert_eq!(a.internal_id, c.internal_id);
        assert_eq!(db.identity_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_resolution_provisions_once() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        let r = Arc::new(resolver(&db));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&r);
                tokio::spawn(async move { r.resolve(&addr(3)).await })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().unwrap().internal_id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(db.identity_count(), 1);
    }

    #[tokio::test]
    async fn disabled_account_is_refused() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        db.insert_new(&addr(4), Role::Admin).unwrap();
        db.update_active(&addr(4), false).unwrap();

        let err = resolver(&db).resolve(&addr(4)).await.unwrap_err();
        assert_eq!(err, ResolveError::AccountDisabled(addr(4)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn malformed_input_is_invalid_address() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        let err = resolver(&db).resolve_str("0x1234").await.unwrap_err();
        assert!(matches!(err, ResolveError::InvalidAddress(_)));
        assert_eq!(db.identity_count(), 0);
    }

    #[tokio::test]
    async fn store_failure_is_retryable() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        let r = RoleResolver::new(Arc::new(DownStore), db);

        let err = r.resolve(&addr(5)).await.unwrap_err();
        assert!(matches!(err, ResolveError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_store_times_out_as_unavailable() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        let r = RoleResolver::new(Arc::new(HangingStore), db);

        let err = r
            .resolve_within(&addr(6), Duration::from_millis(250))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn oracle_mismatch_is_recorded_not_applied() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        db.insert_new(&addr(7), Role::Holder).unwrap();
        let r = resolver(&db).with_oracle(Arc::new(FixedOracle(Ok(Some(Role::Admin)))));

        let identity = r.resolve(&addr(7)).await.unwrap();
        assert_eq!(identity.role, Role::Holder);
        assert_eq!(db.load(&addr(7)).unwrap().unwrap().role, Role::Holder);

        let log = db.recent_activity(10).unwrap();
        assert!(log.iter().any(|e| e.kind == ActivityKind::Reconciliation));
    }

    #[tokio::test]
    async fn oracle_agreement_records_nothing() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        db.insert_new(&addr(8), Role::Issuer).unwrap();
        let r = resolver(&db).with_oracle(Arc::new(FixedOracle(Ok(Some(Role::Issuer)))));

        r.resolve(&addr(8)).await.unwrap();
        assert_eq!(db.activity_count(), 0);
    }

    #[tokio::test]
    async fn oracle_failure_is_ignored() {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        let r = resolver(&db).with_oracle(Arc::new(FixedOracle(Err(
            OracleError::Unavailable("rpc down".into()),
        ))));

        let identity = r.resolve(&addr(9)).await.unwrap();
        assert_eq!(identity.role, Role::Holder);
    }
}
