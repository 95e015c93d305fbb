//! # CertGate Contracts
//!
//! Off-chain model of the certificate contract the platform issues on.
//! The auth core treats it as a read-only ledger of role claims:
//!
//! - **Certificate Registry**: role claims (issuer, admin) and issued
//!   certificates, with issuer-scoped revocation.
//! - **Registry Oracle**: exposes the registry to the role resolver as an
//!   advisory [`certgate_auth::resolver::RoleOracle`].
//!
//! ## Design Principles
//!
//! 1. The registry never writes to the identity store. Disagreements are
//!    the resolver's to record.
//! 2. Every privileged operation names its caller and checks its claim.
//! 3. Every public type is serializable (serde) so snapshots can be shipped
//!    to a server as a file.

pub mod certificate_registry;
pub mod oracle;

pub use certificate_registry::{CertificateRecord, CertificateRegistry, RegistryError};
pub use oracle::RegistryOracle;
