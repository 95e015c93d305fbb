//! Integration tests for the certificate registry.
//!
//! These exercise the registry the way the auth core consumes it: through
//! the role oracle, wired into a role resolver over a temporary store, and
//! through JSON snapshots on disk.

use std::sync::Arc;

use certgate_auth::identity::{Role, WalletAddress};
use certgate_auth::resolver::{RoleOracle, RoleResolver};
use certgate_auth::store::{ActivityKind, AuthDb};
use certgate_contracts::{CertificateRegistry, RegistryError, RegistryOracle};

fn addr(raw: &str) -> WalletAddress {
    WalletAddress::parse(raw).unwrap()
}

const OWNER: &str = "0x00000000000000000000000000000000000000a0";
const ISSUER: &str = "0x0000000000000000000000000000000000000011";
const HOLDER: &str = "0x0000000000000000000000000000000000000033";

fn deployed() -> CertificateRegistry {
    let mut registry = CertificateRegistry::new(addr(OWNER));
    registry
        .grant_role(&addr(OWNER), addr(ISSUER), Role::Issuer)
        .unwrap();
    registry
}

// ---------------------------------------------------------------------------
// Lifecycle Tests
// ---------------------------------------------------------------------------

#[test]
fn issue_then_revoke_lifecycle() {
    let mut registry = deployed();

    let first = registry
        .issue(&addr(ISSUER), addr(HOLDER), "Solidity Basics", "ipfs://a")
        .unwrap();
    let second = registry
        .issue(&addr(OWNER), addr(HOLDER), "Auditing", "ipfs://b")
        .unwrap();
    assert_eq!((first, second), (1, 2));
    assert_eq!(registry.certificates_of(&addr(HOLDER)).len(), 2);

    registry.revoke_certificate(&addr(ISSUER), first).unwrap();
    assert_eq!(registry.role_of(&addr(HOLDER)), Some(Role::Holder));

    registry.revoke_certificate(&addr(OWNER), second).unwrap();
    assert_eq!(registry.role_of(&addr(HOLDER)), None);
    assert_eq!(registry.certificate_count(), 2);
}

#[test]
fn revoked_issuer_can_no_longer_issue() {
    let mut registry = deployed();
    registry.revoke_role(&addr(OWNER), &addr(ISSUER)).unwrap();

    let result = registry.issue(&addr(ISSUER), addr(HOLDER), "Late", "");
    assert!(matches!(result, Err(RegistryError::Unauthorized { .. })));
}

#[test]
fn lookups_ignore_address_case() {
    let mut registry = deployed();
    let upper = addr("0x00000000000000000000000000000000000000AB");
    registry.issue(&addr(ISSUER), upper, "Case", "").unwrap();

    let lower = addr("0x00000000000000000000000000000000000000ab");
    assert_eq!(registry.role_of(&lower), Some(Role::Holder));
}

#[test]
fn snapshot_survives_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("registry.json");

    let mut registry = deployed();
    registry
        .issue(&addr(ISSUER), addr(HOLDER), "Persisted", "ipfs://p")
        .unwrap();
    registry.save(&path).unwrap();

    let loaded = CertificateRegistry::load(&path).unwrap();
    assert_eq!(loaded.role_of(&addr(ISSUER)), Some(Role::Issuer));
    assert_eq!(loaded.certificate(1).unwrap().title, "Persisted");

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        CertificateRegistry::load(&path),
        Err(RegistryError::Serialization(_))
    ));
}

// ---------------------------------------------------------------------------
// Oracle Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn oracle_reports_claims() {
    let oracle = RegistryOracle::from_registry(deployed());
    assert_eq!(oracle.role_claim(&addr(OWNER)).await.unwrap(), Some(Role::Admin));
    assert_eq!(oracle.role_claim(&addr(ISSUER)).await.unwrap(), Some(Role::Issuer));
    assert_eq!(oracle.role_claim(&addr(HOLDER)).await.unwrap(), None);
}

#[tokio::test]
async fn resolver_records_mismatch_but_keeps_stored_role() {
    let db = Arc::new(AuthDb::open_temporary().unwrap());
    let oracle = Arc::new(RegistryOracle::from_registry(deployed()));
    let resolver = RoleResolver::new(db.clone(), db.clone()).with_oracle(oracle);

    // First sight of the issuer: provisioned as holder, chain says issuer.
    let identity = resolver.resolve(&addr(ISSUER)).await.unwrap();
    assert_eq!(identity.role, Role::Holder);

    let log = db.recent_activity(10).unwrap();
    let reconciliation = log
        .iter()
        .find(|e| e.kind == ActivityKind::Reconciliation)
        .expect("mismatch recorded");
    assert_eq!(reconciliation.wallet_address, Some(addr(ISSUER)));

    // Once the store agrees, nothing more is recorded.
    db.update_role(&addr(ISSUER), Role::Issuer).unwrap();
    let before = db.activity_count();
    resolver.resolve(&addr(ISSUER)).await.unwrap();
    assert_eq!(db.activity_count(), before);
}
