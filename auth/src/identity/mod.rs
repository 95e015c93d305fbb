//! # Identity Module
//!
//! Who a wallet is, as far as CertGate is concerned.
//!
//! 1. **WalletAddress** is the primary key. Case never matters: the address
//!    is decoded to its 20 raw bytes on the way in, so `0xABC…` and `0xabc…`
//!    are the same value.
//! 2. **Role** is a closed, totally ordered set:
//!    `admin ⊇ issuer ⊇ holder ⊇ public`.
//! 3. **Identity** is the stored record for an address: role, profile data,
//!    the soft-disable flag, and activity timestamps.

pub mod address;
pub mod record;
pub mod role;

pub use address::{AddressError, WalletAddress};
pub use record::Identity;
pub use role::{Role, RoleParseError};
