//! Single-use sign-in challenges.
//!
//! Each address has at most one outstanding challenge. Issuing a new one
//! replaces the old; redeeming removes it whether or not the signature that
//! follows checks out.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::{CHALLENGE_NONCE_BYTES, CHALLENGE_SWEEP_THRESHOLD, CHALLENGE_TTL};
use crate::identity::WalletAddress;

/// A nonce the wallet must sign to prove it controls `wallet_address`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub wallet_address: WalletAddress,
    pub nonce: String,
    /// The exact text handed to `personal_sign`.
    pub message: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Challenge {
    fn new(wallet_address: WalletAddress, ttl: Duration, now: DateTime<Utc>) -> Self {
        let mut nonce = [0u8; CHALLENGE_NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce = hex::encode(nonce);
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(now);
        let message = format!(
            "Sign in to CertGate\n\nAddress: {}\nNonce: {}\nIssued At: {}",
            wallet_address,
            nonce,
            now.to_rfc3339()
        );
        Self {
            wallet_address,
            nonce,
            message,
            issued_at: now,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Outstanding challenges, keyed by address.
pub struct ChallengeBook {
    pending: DashMap<WalletAddress, Challenge>,
    ttl: Duration,
}

impl ChallengeBook {
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ttl,
        }
    }

    /// Issue a fresh challenge for `address`, replacing any earlier one.
    pub fn issue(&self, address: WalletAddress, now: DateTime<Utc>) -> Challenge {
        if self.pending.len() >= CHALLENGE_SWEEP_THRESHOLD {
            self.sweep(now);
        }
        let challenge = Challenge::new(address, self.ttl, now);
        self.pending.insert(address, challenge.clone());
        challenge
    }

    /// Remove and return the live challenge for `address`.
    pub fn redeem(&self, address: &WalletAddress, now: DateTime<Utc>) -> Option<Challenge> {
        let (_, challenge) = self.pending.remove(address)?;
        (!challenge.is_expired(now)).then_some(challenge)
    }

    /// Drop every expired challenge.
    pub fn sweep(&self, now: DateTime<Utc>) {
        self.pending.retain(|_, challenge| !challenge.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for ChallengeBook {
    fn default() -> Self {
        Self::new(CHALLENGE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> WalletAddress {
        let mut bytes = [0u8; 20];
        bytes[19] = last;
        WalletAddress::from_bytes(bytes)
    }

    #[test]
    fn test_challenge_message_names_address_and_nonce() {
        let book = ChallengeBook::default();
        let challenge = book.issue(addr(1), Utc::now());
        assert_eq!(challenge.nonce.len(), CHALLENGE_NONCE_BYTES * 2);
        assert!(challenge.message.contains(&addr(1).to_hex()));
        assert!(challenge.message.contains(&challenge.nonce));
        assert!(challenge.expires_at > challenge.issued_at);
    }

    #[test]
    fn test_redeem_is_single_use() {
        let book = ChallengeBook::default();
        let now = Utc::now();
        let issued = book.issue(addr(1), now);
        assert_eq!(book.redeem(&addr(1), now), Some(issued));
        assert_eq!(book.redeem(&addr(1), now), None);
        assert_eq!(book.redeem(&addr(2), now), None);
    }

    #[test]
    fn test_reissue_replaces_previous() {
        let book = ChallengeBook::default();
        let now = Utc::now();
        let first = book.issue(addr(1), now);
        let second = book.issue(addr(1), now);
        assert_ne!(first.nonce, second.nonce);
        assert_eq!(book.len(), 1);
        assert_eq!(book.redeem(&addr(1), now).map(|c| c.nonce), Some(second.nonce));
    }

    #[test]
    fn test_expired_challenge_is_not_redeemable() {
        let book = ChallengeBook::new(Duration::from_secs(60));
        let now = Utc::now();
        book.issue(addr(1), now);
        book.issue(addr(2), now + chrono::Duration::seconds(30));

        let later = now + chrono::Duration::seconds(61);
        book.sweep(later);
        assert_eq!(book.len(), 1);
        assert!(book.redeem(&addr(1), later).is_none());
        assert!(book.redeem(&addr(2), later).is_some());
        assert!(book.is_empty());
    }
}
