// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CertGate Auth
//!
//! The part of the CertGate certificate platform that decides who is acting
//! and where they may go. Everything else in the platform (pages, the
//! certificate contract, the relational store, the browser wallet) plugs
//! into this crate through a small set of ports.
//!
//! ## Architecture
//!
//! ```text
//! WalletGateway ──address──> RoleResolver ──Identity──> SessionState
//!                                 │                         │
//!                           IdentityStore              AccessGuard
//!                           RoleOracle                 (pure decision)
//!                                 │                         │
//!                                 └──── ActivityRecorder <──┘
//! ```
//!
//! - **identity**: wallet addresses, roles, identity records.
//! - **wallet**: the wallet-provider port, the gateway that owns its
//!   listener subscription, and sign-in challenges with `personal_sign`
//!   verification for the request boundary.
//! - **store**: the identity-store and activity-recorder ports, plus the
//!   sled-backed [`store::AuthDb`] that implements both.
//! - **resolver**: address to authoritative [`identity::Identity`].
//! - **session**: the session state machine and its hint cache.
//! - **guard**: route classification and the access decision function.
//! - **token**: signed session tokens for the request boundary.
//! - **config**: constants. If you're hardcoding a route somewhere else,
//!   it belongs here or in the route policy.
//!
//! ## Ground Rules
//!
//! 1. The store is authoritative for roles. On-chain claims are advisory.
//! 2. AccessGuard is pure. No I/O, no clocks, no surprises.
//! 3. One resolution in flight per session. Stale results are dropped,
//!    never committed.

pub mod config;
pub mod guard;
pub mod identity;
pub mod resolver;
pub mod session;
pub mod store;
pub mod token;
pub mod wallet;

pub use guard::{AccessGuard, Decision, DenyReason, RouteClassification, RoutePolicy};
pub use identity::{Identity, Role, WalletAddress};
pub use resolver::{ResolveError, RoleOracle, RoleResolver};
pub use session::{Session, SessionError, SessionState, SessionStatus};
