//! # Session Tokens
//!
//! What the request boundary carries between requests: the resolved
//! address, role and profile fields, MAC'd with a server key.
//!
//! ## Wire Format
//!
//! ```text
//! hex(json(SessionClaims)) "." hex(blake3_keyed(key, json))
//! ```
//!
//! The role in a token is a cache. It lets the request filter reach the
//! same decision the in-memory session would, but sensitive routes still
//! re-resolve the address against the identity store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::TOKEN_KEY_LENGTH;
use crate::identity::{Identity, Role, WalletAddress};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("malformed session token")]
    Malformed,

    #[error("session token signature mismatch")]
    BadSignature,

    #[error("session token expired")]
    Expired,

    #[error("session key must be 32 hex-encoded bytes")]
    InvalidKey,

    #[error("token lifetime out of range")]
    InvalidTtl,

    #[error("failed to encode session token: {0}")]
    Encoding(String),
}

/// Payload of a session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub wallet_address: WalletAddress,
    pub role: Role,
    pub internal_id: Uuid,
    pub display_name: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionClaims {
    pub fn for_identity(
        identity: &Identity,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            wallet_address: identity.wallet_address,
            role: identity.role,
            internal_id: identity.internal_id,
            display_name: identity.display_name.clone(),
            issued_at,
            expires_at,
        }
    }

    /// The session these claims stand for, in the shape the in-memory
    /// session state commits.
    pub fn to_session(&self) -> Session {
        Session::authenticated(Identity {
            internal_id: self.internal_id,
            wallet_address: self.wallet_address,
            role: self.role,
            display_name: self.display_name.clone(),
            active: true,
            created_at: self.issued_at,
            updated_at: self.issued_at,
            last_seen_at: Some(self.issued_at),
        })
    }
}

/// Issues and verifies session tokens with a BLAKE3 keyed MAC.
#[derive(Clone)]
pub struct TokenSigner {
    key: [u8; TOKEN_KEY_LENGTH],
    ttl: Duration,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("key", &"<redacted>")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl TokenSigner {
    pub fn new(key: [u8; TOKEN_KEY_LENGTH], ttl: Duration) -> Self {
        Self { key, ttl }
    }

    /// Build from a hex-encoded key, as stored in `session.key`.
    pub fn from_hex(key: &str, ttl: Duration) -> Result<Self, TokenError> {
        let mut bytes = [0u8; TOKEN_KEY_LENGTH];
        hex::decode_to_slice(key.trim(), &mut bytes).map_err(|_| TokenError::InvalidKey)?;
        Ok(Self::new(bytes, ttl))
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Sign a token for `identity`, valid from `now` for the configured TTL.
    pub fn issue(&self, identity: &Identity, now: DateTime<Utc>) -> Result<String, TokenError> {
        let ttl = chrono::Duration::from_std(self.ttl).map_err(|_| TokenError::InvalidTtl)?;
        let expires_at = now.checked_add_signed(ttl).ok_or(TokenError::InvalidTtl)?;
        let claims = SessionClaims::for_identity(identity, now, expires_at);

        let payload =
            serde_json::to_vec(&claims).map_err(|e| TokenError::Encoding(e.to_string()))?;
        let mac = blake3::keyed_hash(&self.key, &payload);
        Ok(format!("{}.{}", hex::encode(&payload), mac.to_hex()))
    }

    /// Check signature and expiry, returning the claims.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let (payload_hex, mac_hex) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;

        let payload = hex::decode(payload_hex).map_err(|_| TokenError::Malformed)?;
        let mut mac = [0u8; blake3::OUT_LEN];
        hex::decode_to_slice(mac_hex, &mut mac).map_err(|_| TokenError::Malformed)?;

        // blake3::Hash equality is constant-time.
        if blake3::keyed_hash(&self.key, &payload) != blake3::Hash::from(mac) {
            return Err(TokenError::BadSignature);
        }

        let claims: SessionClaims =
            serde_json::from_slice(&payload).map_err(|_| TokenError::Malformed)?;
        if now >= claims.expires_at {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}
