//! Roles and their containment order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a string names no known role.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct RoleParseError(pub String);

/// Privilege level of a session.
///
/// Variants are declared lowest to highest, so the derived ordering is the
/// containment order: a role satisfies every requirement at or below it.
/// `Public` is the absence of an authenticated role. The store never
/// assigns it.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// No authenticated role.
    #[default]
    Public,
    /// Owns certificates.
    Holder,
    /// Issues certificates to holders.
    Issuer,
    /// Manages users and issuers.
    Admin,
}

impl Role {
    /// Every role, lowest first.
    pub const ALL: [Role; 4] = [Role::Public, Role::Holder, Role::Issuer, Role::Admin];

    /// True when this role may enter a namespace whose minimum is `required`.
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }

    /// True for every role except [`Role::Public`].
    pub fn is_authenticated(self) -> bool {
        self != Role::Public
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Public => "public",
            Role::Holder => "holder",
            Role::Issuer => "issuer",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RoleParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Ok(Role::Public),
            "holder" => Ok(Role::Holder),
            "issuer" => Ok(Role::Issuer),
            "admin" => Ok(Role::Admin),
            _ => Err(RoleParseError(s.to_string())),
        }
    }
}
