//! # Route Policy
//!
//! Static classification of navigable namespaces. A route is either public
//! or carries the minimum role needed to enter it; the role order does the
//! rest (an admin may enter anything an issuer may).
//!
//! Policies are data. The built-in [`RoutePolicy::default`] covers the
//! platform's standard layout and operators can replace it with a JSON
//! file:
//!
//! ```json
//! {
//!   "login_route": "/login",
//!   "public_root": "/",
//!   "homes": [{ "role": "holder", "route": "/holder" }],
//!   "routes": [
//!     { "prefix": "/login", "public": true },
//!     { "prefix": "/holder", "min_role": "holder" }
//!   ]
//! }
//! ```
//!
//! Prefix matching is by path segment: `/admin` covers `/admin` and
//! `/admin/users` but not `/administrator`. The root prefix `/` matches
//! only the root itself. The longest matching prefix wins; unmatched
//! paths use the fallback classification.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::config::{ADMIN_HOME, HOLDER_HOME, ISSUER_HOME, LOGIN_ROUTE, PUBLIC_ROOT};
use crate::identity::Role;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("login route {0} must be classified public")]
    LoginNotPublic(String),

    #[error("public root {0} must be classified public")]
    RootNotPublic(String),

    #[error("route prefix {0:?} must start with '/'")]
    RelativePrefix(String),

    #[error("home route {route} is not reachable by role {role}")]
    UnreachableHome { role: Role, route: String },

    #[error("failed to read route policy: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse route policy: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// RouteClassification
// ---------------------------------------------------------------------------

/// One namespace and who may enter it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteClassification {
    pub prefix: String,
    /// Lowest role admitted. Ignored for public routes.
    #[serde(default)]
    pub min_role: Role,
    /// No session required.
    #[serde(default)]
    pub public: bool,
    /// Request-boundary callers must re-resolve the session against the
    /// identity store before trusting it here.
    #[serde(default)]
    pub sensitive: bool,
}

impl RouteClassification {
    pub fn public(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            min_role: Role::Public,
            public: true,
            sensitive: false,
        }
    }

    pub fn protected(prefix: impl Into<String>, min_role: Role) -> Self {
        Self {
            prefix: prefix.into(),
            min_role,
            public: false,
            sensitive: false,
        }
    }

    /// Mark as requiring re-resolution at the request boundary.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Whether `role` may enter this namespace.
    pub fn admits(&self, role: Role) -> bool {
        self.public || (role.is_authenticated() && role.satisfies(self.min_role))
    }

    /// Segment-aware prefix match against a request path.
    pub fn matches(&self, path: &str) -> bool {
        let path = normalize_path(path);
        let prefix = normalize_path(&self.prefix);

        if prefix == "/" {
            return path == "/";
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Strip query, fragment and trailing slashes. The root stays `/`.
pub fn normalize_path(path: &str) -> &str {
    let end = path.find(|c| c == '?' || c == '#').unwrap_or(path.len());
    let trimmed = path[..end].trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

// ---------------------------------------------------------------------------
// RoutePolicy
// ---------------------------------------------------------------------------

/// Landing namespace for a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeRoute {
    pub role: Role,
    pub route: String,
}

/// The complete route table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePolicy {
    pub login_route: String,
    pub public_root: String,
    #[serde(default)]
    pub homes: Vec<HomeRoute>,
    pub routes: Vec<RouteClassification>,
    /// Classification for paths no route matches.
    #[serde(default = "default_fallback")]
    pub fallback: RouteClassification,
}

fn default_fallback() -> RouteClassification {
    RouteClassification::protected("*", Role::Holder)
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            login_route: LOGIN_ROUTE.to_string(),
            public_root: PUBLIC_ROOT.to_string(),
            homes: vec![
                HomeRoute {
                    role: Role::Admin,
                    route: ADMIN_HOME.to_string(),
                },
                HomeRoute {
                    role: Role::Issuer,
                    route: ISSUER_HOME.to_string(),
                },
                HomeRoute {
                    role: Role::Holder,
                    route: HOLDER_HOME.to_string(),
                },
            ],
            routes: vec![
                RouteClassification::public(PUBLIC_ROOT),
                RouteClassification::public(LOGIN_ROUTE),
                RouteClassification::public("/verify"),
                RouteClassification::protected(ADMIN_HOME, Role::Admin),
                RouteClassification::protected(ISSUER_HOME, Role::Issuer),
                RouteClassification::protected(HOLDER_HOME, Role::Holder),
                RouteClassification::protected("/api/admin", Role::Admin).sensitive(),
            ],
            fallback: default_fallback(),
        }
    }
}

impl RoutePolicy {
    /// Parse and validate a JSON policy.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let policy: RoutePolicy = serde_json::from_str(json)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Read, parse and validate a JSON policy file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// The classification for `path`: longest matching prefix, else the
    /// fallback.
    pub fn classify(&self, path: &str) -> &RouteClassification {
        self.routes
            .iter()
            .filter(|route| route.matches(path))
            .max_by_key(|route| normalize_path(&route.prefix).len())
            .unwrap_or(&self.fallback)
    }

    /// The configured home namespace for `role`.
    pub fn home_for(&self, role: Role) -> Option<&str> {
        self.homes
            .iter()
            .find(|home| home.role == role)
            .map(|home| home.route.as_str())
    }

    /// Reject policies that would trap users in redirect loops.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if let Some(route) = self.routes.iter().find(|r| !r.prefix.starts_with('/')) {
            return Err(PolicyError::RelativePrefix(route.prefix.clone()));
        }
        if !self.classify(&self.login_route).public {
            return Err(PolicyError::LoginNotPublic(self.login_route.clone()));
        }
        if !self.classify(&self.public_root).public {
            return Err(PolicyError::RootNotPublic(self.public_root.clone()));
        }
        for home in &self.homes {
            if !self.classify(&home.route).admits(home.role) {
                return Err(PolicyError::UnreachableHome {
                    role: home.role,
                    route: home.route.clone(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
