//! # Access Filter
//!
//! Request-boundary enforcement for the guarded namespaces. Every request
//! through the protected router is turned into a [`Session`] and handed to
//! the same [`certgate_auth::AccessGuard`] the in-process session state
//! uses:
//!
//! 1. The `certgate_session` cookie is verified. A missing, tampered or
//!    expired cookie yields an anonymous session, never an error.
//! 2. On routes marked `sensitive` the cookie's role is not trusted. The
//!    address is re-resolved against the identity store, and a changed role
//!    or profile re-issues the cookie.
//! 3. The decision maps onto HTTP: `Allow` runs the handler, `Redirect` is a
//!    303, `Deny` is a 403, and `Pending` is a 503 with `Retry-After`.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

use certgate_auth::config::SESSION_COOKIE;
use certgate_auth::session::SessionFailure;
use certgate_auth::store::{notify, ActivityEntry, ActivityKind};
use certgate_auth::token::SessionClaims;
use certgate_auth::{Decision, Identity, Session};

use crate::api::{AppState, ErrorResponse};

/// The session the filter admitted, available to handlers as an extension.
#[derive(Debug, Clone)]
pub struct CurrentSession {
    pub session: Session,
    /// Verified cookie claims, when the request carried a valid cookie.
    pub claims: Option<SessionClaims>,
}

impl CurrentSession {
    pub fn identity(&self) -> Option<&Identity> {
        self.session.identity.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Cookies
// ---------------------------------------------------------------------------

/// Value of the cookie named `name`, if the request carries one.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then_some(value)
        })
}

/// `Set-Cookie` value carrying `token` for `max_age`.
pub fn session_cookie(token: &str, max_age: Duration) -> Option<HeaderValue> {
    let cookie = format!(
        "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        max_age.as_secs()
    );
    HeaderValue::from_str(&cookie).ok()
}

/// `Set-Cookie` value that removes the session cookie.
pub fn expired_cookie() -> HeaderValue {
    HeaderValue::from_static("certgate_session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Verified claims from the request's session cookie.
pub fn verified_claims(state: &AppState, headers: &HeaderMap) -> Option<SessionClaims> {
    let token = read_cookie(headers, SESSION_COOKIE)?;
    match state.signer.verify(token, Utc::now()) {
        Ok(claims) => Some(claims),
        Err(e) => {
            debug!(error = %e, "ignoring session cookie");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Middleware
// ---------------------------------------------------------------------------

/// Guard middleware for the protected router.
pub async fn access_filter(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let route = state.guard.policy().classify(&path).clone();
    let claims = verified_claims(&state, request.headers());

    let mut session = claims
        .as_ref()
        .map(SessionClaims::to_session)
        .unwrap_or_else(Session::anonymous);
    let mut refreshed = None;

    if route.sensitive {
        if let Some(claims) = &claims {
            match state.resolve(&claims.wallet_address).await {
                Ok(identity) => {
                    if identity.role != claims.role {
                        info!(
                            address = %identity.wallet_address,
                            from = %claims.role,
                            to = %identity.role,
                            "session role changed since cookie was issued"
                        );
                        notify(
                            state.db.as_ref(),
                            ActivityEntry::new(
                                ActivityKind::RoleChange,
                                Some(identity.wallet_address),
                                format!("session role {} -> {}", claims.role, identity.role),
                            ),
                        );
                    }
                    if identity.role != claims.role || identity.display_name != claims.display_name
                    {
                        refreshed = match state.issue_cookie(&identity) {
                            Ok(cookie) => Some(cookie),
                            Err(e) => {
                                warn!(error = %e, "failed to re-issue session cookie");
                                None
                            }
                        };
                    }
                    session = Session::authenticated(identity);
                }
                Err(e) => {
                    warn!(address = %claims.wallet_address, error = %e, path = %path, "re-resolution failed");
                    session = Session::failed(SessionFailure::from(&e));
                }
            }
        }
    }

    let decision = state.guard.evaluate(&session, &route);
    state.metrics.observe_decision(&decision);
    debug!(path = %path, ?decision, "access decision");

    match decision {
        Decision::Allow => {
            request
                .extensions_mut()
                .insert(CurrentSession { session, claims });
            let mut response = next.run(request).await;
            if let Some(cookie) = refreshed {
                response.headers_mut().append(header::SET_COOKIE, cookie);
            }
            response
        }
        Decision::Pending => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, "1")],
            Json(ErrorResponse::retryable("session is still resolving")),
        )
            .into_response(),
        Decision::Redirect(target) => {
            let mut response = Redirect::to(&target).into_response();
            let hard_failure = session
                .error
                .as_ref()
                .is_some_and(|failure| !failure.kind.is_retryable());
            if let Some(cookie) = refreshed {
                response.headers_mut().append(header::SET_COOKIE, cookie);
            } else if hard_failure {
                response
                    .headers_mut()
                    .append(header::SET_COOKIE, expired_cookie());
            }
            response
        }
        Decision::Deny(reason) => {
            warn!(path = %path, %reason, "access denied");
            (
                StatusCode::FORBIDDEN,
                Json(ErrorResponse::new(reason.to_string())),
            )
                .into_response()
        }
    }
}
