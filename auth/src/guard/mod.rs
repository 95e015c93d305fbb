//! # Access Guard
//!
//! The decision function. Given a session snapshot and a route
//! classification it answers allow, wait, go elsewhere, or refuse.
//!
//! Evaluation is pure: no I/O, no clock, no interior state. The request
//! filter (cookie token) and the render guard (in-memory session) call the
//! same function with equivalent sessions and must get the same answer.
//!
//! | Session                          | Public route | Protected route                 |
//! |----------------------------------|--------------|---------------------------------|
//! | uninitialized / loading          | Allow        | Pending                         |
//! | error, or ready without identity | Allow        | Redirect(login)                 |
//! | ready, role satisfies minimum    | Allow        | Allow                           |
//! | ready, role below minimum        | Allow        | Redirect(home of role)          |
//! | incoherent snapshot              | Allow        | Deny                            |

pub mod policy;

pub use policy::{HomeRoute, PolicyError, RouteClassification, RoutePolicy};

use std::fmt;

use crate::identity::Role;
use crate::session::{Session, SessionStatus};

/// Outcome of an access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Proceed.
    Allow,
    /// Resolution still running. Show a waiting state, do not redirect.
    Pending,
    /// Navigate to the given route instead.
    Redirect(String),
    /// Refuse outright.
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Why a session was refused rather than redirected.
///
/// Only reachable through snapshots that no [`crate::session::SessionState`]
/// transition produces, e.g. a hand-built or tampered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// A ready session that also carries an error.
    InconsistentSession,
    /// A session built around a disabled identity.
    InactiveIdentity,
    /// A session identity with no authenticated role.
    NoRole,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DenyReason::InconsistentSession => "inconsistent session state",
            DenyReason::InactiveIdentity => "identity is disabled",
            DenyReason::NoRole => "identity has no role",
        })
    }
}

/// Evaluates sessions against a [`RoutePolicy`].
#[derive(Debug, Clone, Default)]
pub struct AccessGuard {
    policy: RoutePolicy,
}

impl AccessGuard {
    pub fn new(policy: RoutePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }

    /// Classify `path` and evaluate it.
    pub fn check_path(&self, session: &Session, path: &str) -> Decision {
        self.evaluate(session, self.policy.classify(path))
    }

    /// Decide whether `session` may enter `route`.
    pub fn evaluate(&self, session: &Session, route: &RouteClassification) -> Decision {
        if route.public {
            return Decision::Allow;
        }

        match session.status {
            SessionStatus::Uninitialized | SessionStatus::Loading => return Decision::Pending,
            SessionStatus::Error => return self.to_login(),
            SessionStatus::Ready => {}
        }

        let Some(identity) = &session.identity else {
            return self.to_login();
        };

        if session.error.is_some() {
            return Decision::Deny(DenyReason::InconsistentSession);
        }
        if !identity.active {
            return Decision::Deny(DenyReason::InactiveIdentity);
        }
        if !identity.role.is_authenticated() {
            return Decision::Deny(DenyReason::NoRole);
        }

        if identity.role.satisfies(route.min_role) {
            Decision::Allow
        } else {
            Decision::Redirect(self.home_redirect(identity.role))
        }
    }

    fn to_login(&self) -> Decision {
        Decision::Redirect(self.policy.login_route.clone())
    }

    fn home_redirect(&self, role: Role) -> String {
        match self.policy.home_for(role) {
            Some(home) if self.policy.classify(home).admits(role) => home.to_string(),
            _ => self.policy.public_root.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
