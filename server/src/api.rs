//! # HTTP API
//!
//! The gateway's router. Public endpoints handle login and the session
//! cookie; everything else sits behind [`crate::filter::access_filter`].
//!
//! Login is two steps. The client fetches a challenge for its address,
//! has the wallet `personal_sign` the challenge message, and posts the
//! signature. No cookie is issued unless the signature recovers to the
//! posted address.
//!
//! ## Endpoints
//!
//! | Method | Path                               | Guard           |
//! |--------|------------------------------------|-----------------|
//! | GET    | `/health`                          | none            |
//! | GET    | `/auth/challenge?address=`         | none            |
//! | POST   | `/auth/session`                    | signed nonce    |
//! | GET    | `/auth/session`                    | none            |
//! | DELETE | `/auth/session`                    | none            |
//! | GET    | `/admin`, `/issuer`, `/holder`     | role namespace  |
//! | GET    | `/api/admin/users/:address`        | admin, re-check |
//! | POST   | `/api/admin/users/:address/role`   | admin, re-check |
//! | POST   | `/api/admin/users/:address/active` | admin, re-check |
//! | GET    | `/api/admin/activity`              | admin, re-check |

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use certgate_auth::store::{notify, ActivityEntry, ActivityKind, AuthDb, StoreError};
use certgate_auth::token::{SessionClaims, TokenError, TokenSigner};
use certgate_auth::wallet::{verify_ownership, ChallengeBook};
use certgate_auth::{AccessGuard, Identity, ResolveError, Role, RoleResolver, WalletAddress};

use crate::filter::{access_filter, expired_cookie, session_cookie, verified_claims, CurrentSession};
use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared state for every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub version: String,
    pub guard: Arc<AccessGuard>,
    pub resolver: Arc<RoleResolver>,
    /// Identity store and activity log. The resolver is built over the same
    /// database.
    pub db: Arc<AuthDb>,
    pub signer: Arc<TokenSigner>,
    /// Outstanding sign-in nonces.
    pub challenges: Arc<ChallengeBook>,
    pub metrics: SharedMetrics,
    /// Upper bound on one resolution.
    pub store_timeout: Duration,
}

impl AppState {
    /// Resolve `address` within the store timeout, recording metrics.
    pub async fn resolve(&self, address: &WalletAddress) -> Result<Identity, ResolveError> {
        self.metrics.resolutions_total.inc();
        let timer = self.metrics.resolution_latency_seconds.start_timer();
        let result = self.resolver.resolve_within(address, self.store_timeout).await;
        timer.observe_duration();
        if result.is_err() {
            self.metrics.resolution_failures_total.inc();
        }
        result
    }

    /// Sign a session cookie for `identity`.
    pub fn issue_cookie(&self, identity: &Identity) -> Result<HeaderValue, TokenError> {
        let token = self.signer.issue(identity, Utc::now())?;
        let cookie = session_cookie(&token, self.signer.ttl())
            .ok_or_else(|| TokenError::Encoding("token is not a valid header value".into()))?;
        self.metrics.sessions_issued_total.inc();
        Ok(cookie)
    }

    fn home_for(&self, role: Role) -> Option<String> {
        self.guard.policy().home_for(role).map(str::to_string)
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let guarded = Router::new()
        .route("/admin", get(namespace_handler))
        .route("/issuer", get(namespace_handler))
        .route("/holder", get(namespace_handler))
        .route("/api/admin/users/:address", get(user_handler))
        .route("/api/admin/users/:address/role", post(set_role_handler))
        .route("/api/admin/users/:address/active", post(set_active_handler))
        .route("/api/admin/activity", get(activity_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), access_filter));

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/challenge", get(challenge_handler))
        .route(
            "/auth/session",
            post(login_handler)
                .get(session_handler)
                .delete(logout_handler),
        )
        .merge(guarded)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Whether retrying the same request may succeed.
    #[serde(default)]
    pub retryable: bool,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            retryable: false,
        }
    }

    pub fn retryable(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            retryable: true,
        }
    }
}

fn error_response(status: StatusCode, body: ErrorResponse) -> Response {
    (status, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ChallengeQuery {
    pub address: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub address: String,
    /// `personal_sign` over the address's outstanding challenge message.
    #[serde(default)]
    pub signature: Option<String>,
}

/// What the client learns about its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionView {
    pub authenticated: bool,
    pub wallet_address: Option<WalletAddress>,
    pub role: Role,
    pub display_name: Option<String>,
    /// Landing namespace for the role.
    pub home: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionView {
    fn anonymous() -> Self {
        Self {
            authenticated: false,
            wallet_address: None,
            role: Role::Public,
            display_name: None,
            home: None,
            expires_at: None,
        }
    }

    fn from_claims(claims: &SessionClaims, home: Option<String>) -> Self {
        Self {
            authenticated: true,
            wallet_address: Some(claims.wallet_address),
            role: claims.role,
            display_name: Some(claims.display_name.clone()),
            home,
            expires_at: Some(claims.expires_at),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdate {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct ActiveUpdate {
    pub active: bool,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

const DEFAULT_ACTIVITY_LIMIT: usize = 50;
const MAX_ACTIVITY_LIMIT: usize = 500;

// ---------------------------------------------------------------------------
// Error Mapping
// ---------------------------------------------------------------------------

fn resolve_error_response(e: &ResolveError) -> Response {
    let status = match e {
        ResolveError::InvalidAddress(_) => StatusCode::BAD_REQUEST,
        ResolveError::AccountDisabled(_) => StatusCode::FORBIDDEN,
        ResolveError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = ErrorResponse {
        error: e.to_string(),
        retryable: e.is_retryable(),
    };
    error_response(status, body)
}

fn store_error_response(e: &StoreError) -> Response {
    let status = match e {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::UnassignableRole(_) => StatusCode::BAD_REQUEST,
        StoreError::AlreadyExists(_) => StatusCode::CONFLICT,
        StoreError::TimedOut => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::Backend(_) | StoreError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, ErrorResponse::new(e.to_string()))
}

fn parse_address(raw: &str) -> Result<WalletAddress, Response> {
    WalletAddress::parse(raw).map_err(|e| {
        resolve_error_response(&ResolveError::InvalidAddress(format!("{}: {}", raw.trim(), e)))
    })
}

fn acting_admin(current: &CurrentSession) -> Result<WalletAddress, Response> {
    current
        .identity()
        .map(|identity| identity.wallet_address)
        .ok_or_else(|| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new("guarded route reached without an identity"),
            )
        })
}

// ---------------------------------------------------------------------------
// Session Handlers
// ---------------------------------------------------------------------------

/// `GET /health`
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "version": state.version }))
}

/// `GET /auth/challenge?address=` issues a single-use nonce to sign.
async fn challenge_handler(
    State(state): State<AppState>,
    Query(query): Query<ChallengeQuery>,
) -> Response {
    let address = match parse_address(&query.address) {
        Ok(address) => address,
        Err(response) => return response,
    };
    let challenge = state.challenges.issue(address, Utc::now());
    debug!(address = %address, expires_at = %challenge.expires_at, "challenge issued");
    Json(challenge).into_response()
}

fn reject_proof(state: &AppState, address: WalletAddress, reason: String) -> Response {
    warn!(address = %address, %reason, "login proof rejected");
    notify(
        state.db.as_ref(),
        ActivityEntry::new(ActivityKind::ProofRejected, Some(address), reason.clone()),
    );
    error_response(StatusCode::UNAUTHORIZED, ErrorResponse::new(reason))
}

/// `POST /auth/session` checks the signed challenge, resolves the address
/// and issues the cookie.
async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Response {
    let address = match parse_address(&request.address) {
        Ok(address) => address,
        Err(response) => return response,
    };

    let Some(signature) = request.signature.as_deref() else {
        return reject_proof(&state, address, "a signed challenge is required".into());
    };
    let Some(challenge) = state.challenges.redeem(&address, Utc::now()) else {
        return reject_proof(&state, address, "no live challenge for this address".into());
    };
    if let Err(e) = verify_ownership(&address, challenge.message.as_bytes(), signature) {
        return reject_proof(&state, address, e.to_string());
    }

    let identity = match state.resolve(&address).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(address = %address, error = %e, "login failed");
            notify(
                state.db.as_ref(),
                ActivityEntry::new(ActivityKind::ResolutionFailed, Some(address), e.to_string()),
            );
            return resolve_error_response(&e);
        }
    };

    let cookie = match state.issue_cookie(&identity) {
        Ok(cookie) => cookie,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::new(e.to_string()),
            )
        }
    };

    notify(
        state.db.as_ref(),
        ActivityEntry::new(ActivityKind::Login, Some(address), "gateway login, signed challenge"),
    );
    info!(address = %address, role = %identity.role, "session issued");

    let expires_at = chrono::Duration::from_std(state.signer.ttl())
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl));
    let view = SessionView {
        authenticated: true,
        wallet_address: Some(identity.wallet_address),
        role: identity.role,
        display_name: Some(identity.display_name.clone()),
        home: state.home_for(identity.role),
        expires_at,
    };
    (StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(view)).into_response()
}

/// `GET /auth/session` describes the cookie's session without touching the
/// store.
async fn session_handler(State(state): State<AppState>, headers: HeaderMap) -> Json<SessionView> {
    match verified_claims(&state, &headers) {
        Some(claims) => Json(SessionView::from_claims(&claims, state.home_for(claims.role))),
        None => Json(SessionView::anonymous()),
    }
}

/// `DELETE /auth/session` clears the cookie. Idempotent.
async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(claims) = verified_claims(&state, &headers) {
        notify(
            state.db.as_ref(),
            ActivityEntry::new(ActivityKind::Logout, Some(claims.wallet_address), "gateway logout"),
        );
    }
    (
        StatusCode::OK,
        [(header::SET_COOKIE, expired_cookie())],
        Json(serde_json::json!({ "status": "signed_out" })),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Guarded Handlers
// ---------------------------------------------------------------------------

/// `GET /admin`, `/issuer`, `/holder`: namespace landing payload.
async fn namespace_handler(
    Extension(current): Extension<CurrentSession>,
    uri: Uri,
) -> impl IntoResponse {
    let namespace = uri
        .path()
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string();
    Json(serde_json::json!({
        "namespace": namespace,
        "wallet_address": current.identity().map(|i| i.wallet_address),
        "role": current.session.role(),
    }))
}

/// `GET /api/admin/users/:address`
async fn user_handler(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let address = match parse_address(&raw) {
        Ok(address) => address,
        Err(response) => return response,
    };
    match state.db.load(&address) {
        Ok(Some(identity)) => Json(identity).into_response(),
        Ok(None) => store_error_response(&StoreError::NotFound(address)),
        Err(e) => store_error_response(&e),
    }
}

/// `POST /api/admin/users/:address/role`
async fn set_role_handler(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Path(raw): Path<String>,
    Json(update): Json<RoleUpdate>,
) -> Response {
    let (actor, address) = match (acting_admin(&current), parse_address(&raw)) {
        (Ok(actor), Ok(address)) => (actor, address),
        (Err(response), _) | (_, Err(response)) => return response,
    };
    if actor == address && update.role != Role::Admin {
        return error_response(
            StatusCode::CONFLICT,
            ErrorResponse::new("admins cannot demote themselves"),
        );
    }

    let previous = match state.db.load(&address) {
        Ok(Some(identity)) => identity.role,
        Ok(None) => return store_error_response(&StoreError::NotFound(address)),
        Err(e) => return store_error_response(&e),
    };
    match state.db.update_role(&address, update.role) {
        Ok(identity) => {
            info!(address = %address, by = %actor, from = %previous, to = %identity.role, "role updated");
            notify(
                state.db.as_ref(),
                ActivityEntry::new(
                    ActivityKind::RoleChange,
                    Some(address),
                    format!("{} -> {} by {}", previous, identity.role, actor),
                ),
            );
            Json(identity).into_response()
        }
        Err(e) => store_error_response(&e),
    }
}

/// `POST /api/admin/users/:address/active`
async fn set_active_handler(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentSession>,
    Path(raw): Path<String>,
    Json(update): Json<ActiveUpdate>,
) -> Response {
    let (actor, address) = match (acting_admin(&current), parse_address(&raw)) {
        (Ok(actor), Ok(address)) => (actor, address),
        (Err(response), _) | (_, Err(response)) => return response,
    };
    if actor == address && !update.active {
        return error_response(
            StatusCode::CONFLICT,
            ErrorResponse::new("admins cannot disable themselves"),
        );
    }

    match state.db.update_active(&address, update.active) {
        Ok(identity) => {
            let verb = if identity.active { "enabled" } else { "disabled" };
            info!(address = %address, by = %actor, verb, "account status updated");
            notify(
                state.db.as_ref(),
                ActivityEntry::new(
                    ActivityKind::AccountStatus,
                    Some(address),
                    format!("{verb} by {actor}"),
                ),
            );
            Json(identity).into_response()
        }
        Err(e) => store_error_response(&e),
    }
}

/// `GET /api/admin/activity?limit=N`, newest first.
async fn activity_handler(
    State(state): State<AppState>,
    Query(query): Query<ActivityQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .min(MAX_ACTIVITY_LIMIT);
    match state.db.recent_activity(limit) {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => store_error_response(&e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use certgate_auth::wallet::signature::{address_of, personal_message_hash};
    use doubles::DownStore;
    use http_body_util::BodyExt;
    use k256::ecdsa::SigningKey;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::metrics::GatewayMetrics;

    const KEY: [u8; 32] = [7u8; 32];

    /// Store double whose every call fails.
    mod doubles {
        use certgate_auth::store::{IdentityStore, StoreError, StoreResult};
        use certgate_auth::{Identity, Role, WalletAddress};

        pub struct DownStore;

        #[async_trait::async_trait]
        impl IdentityStore for DownStore {
            async fn get_by_address(&self, _: &WalletAddress) -> StoreResult<Option<Identity>> {
                Err(StoreError::Backend("connection refused".into()))
            }
            async fn create(&self, _: &WalletAddress, _: Role) -> StoreResult<Identity> {
                Err(StoreError::Backend("connection refused".into()))
            }
            async fn set_role(&self, _: &WalletAddress, _: Role) -> StoreResult<Identity> {
                Err(StoreError::Backend("connection refused".into()))
            }
            async fn set_active(&self, _: &WalletAddress, _: bool) -> StoreResult<Identity> {
                Err(StoreError::Backend("connection refused".into()))
            }
            async fn touch(&self, _: &WalletAddress) -> StoreResult<Identity> {
                Err(StoreError::Backend("connection refused".into()))
            }
        }
    }

    // Deterministic wallets. Seeds are arbitrary non-zero scalars.
    fn wallet(seed: u8) -> SigningKey {
        SigningKey::from_slice(&[seed; 32]).unwrap()
    }

    fn admin() -> SigningKey {
        wallet(0xa1)
    }

    fn holder() -> SigningKey {
        wallet(0xb2)
    }

    fn newcomer() -> SigningKey {
        wallet(0xc3)
    }

    fn addr(key: &SigningKey) -> WalletAddress {
        address_of(key.verifying_key())
    }

    /// What a wallet returns from `personal_sign(message)`.
    fn personal_sign(key: &SigningKey, message: &str) -> String {
        let digest = personal_message_hash(message.as_bytes());
        let (signature, recovery_id) = key.sign_prehash_recoverable(&digest).unwrap();
        let mut raw = signature.to_bytes().to_vec();
        raw.push(27 + recovery_id.to_byte());
        format!("0x{}", hex::encode(raw))
    }

    fn test_state() -> AppState {
        let db = Arc::new(AuthDb::open_temporary().unwrap());
        db.insert_new(&addr(&admin()), Role::Admin).unwrap();
        db.insert_new(&addr(&holder()), Role::Holder).unwrap();
        let resolver = Arc::new(RoleResolver::new(db.clone(), db.clone()));
        AppState {
            version: "0.1.0-test".into(),
            guard: Arc::new(AccessGuard::default()),
            resolver,
            db,
            signer: Arc::new(TokenSigner::new(KEY, Duration::from_secs(3600))),
            challenges: Arc::new(ChallengeBook::default()),
            metrics: Arc::new(GatewayMetrics::new().unwrap()),
            store_timeout: Duration::from_secs(2),
        }
    }

    fn down_state() -> AppState {
        let mut state = test_state();
        state.resolver = Arc::new(RoleResolver::new(Arc::new(DownStore), state.db.clone()));
        state
    }

    struct Reply {
        status: StatusCode,
        headers: HeaderMap,
        body: Value,
    }

    impl Reply {
        fn location(&self) -> Option<&str> {
            self.headers.get(header::LOCATION)?.to_str().ok()
        }

        fn set_cookie(&self) -> Option<&str> {
            self.headers.get(header::SET_COOKIE)?.to_str().ok()
        }

        /// `name=value` of the issued cookie, ready for a `Cookie` header.
        fn cookie_pair(&self) -> String {
            self.set_cookie()
                .and_then(|c| c.split(';').next())
                .unwrap()
                .to_string()
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> Reply {
        let resp = router.clone().oneshot(request).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        Reply {
            status,
            headers,
            body,
        }
    }

    async fn get(router: &Router, path: &str, cookie: Option<&str>) -> Reply {
        let mut builder = Request::builder().uri(path);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        send(router, builder.body(Body::empty()).unwrap()).await
    }

    async fn post_json(router: &Router, path: &str, cookie: Option<&str>, body: Value) -> Reply {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        send(router, builder.body(Body::from(body.to_string())).unwrap()).await
    }

    /// Challenge message issued for `address`.
    async fn challenge(router: &Router, address: &WalletAddress) -> String {
        let reply = get(router, &format!("/auth/challenge?address={address}"), None).await;
        assert_eq!(reply.status, StatusCode::OK);
        reply.body["message"].as_str().unwrap().to_string()
    }

    async fn post_login(router: &Router, address: &WalletAddress, signature: Option<&str>) -> Reply {
        post_json(
            router,
            "/auth/session",
            None,
            serde_json::json!({ "address": address, "signature": signature }),
        )
        .await
    }

    /// Full wallet sign-in: fetch a challenge, sign it, post it.
    async fn login(router: &Router, key: &SigningKey) -> Reply {
        let address = addr(key);
        let message = challenge(router, &address).await;
        let signature = personal_sign(key, &message);
        post_login(router, &address, Some(&signature)).await
    }

    fn kinds(state: &AppState) -> Vec<ActivityKind> {
        state
            .db
            .recent_activity(100)
            .unwrap()
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    // -- Public endpoints ---------------------------------------------------

    #[tokio::test]
    async fn test_health() {
        let router = create_router(test_state());
        let reply = get(&router, "/health", None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["status"], "ok");
    }

    #[tokio::test]
    async fn test_challenge_names_the_address() {
        let state = test_state();
        let router = create_router(state.clone());
        let address = addr(&holder());

        let reply = get(&router, &format!("/auth/challenge?address={address}"), None).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["wallet_address"], address.to_hex());
        let message = reply.body["message"].as_str().unwrap();
        assert!(message.contains(reply.body["nonce"].as_str().unwrap()));
        assert_eq!(state.challenges.len(), 1);

        let reply = get(&router, "/auth/challenge?address=0x1234", None).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_provisions_newcomer_as_holder() {
        let state = test_state();
        let router = create_router(state.clone());
        let key = newcomer();

        let reply = login(&router, &key).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["role"], "holder");
        assert_eq!(reply.body["home"], "/holder");
        assert_eq!(reply.body["wallet_address"], addr(&key).to_hex());
        assert!(reply.set_cookie().unwrap().contains("HttpOnly"));

        assert_eq!(
            state.db.load(&addr(&key)).unwrap().unwrap().role,
            Role::Holder
        );
        let recorded = kinds(&state);
        assert!(recorded.contains(&ActivityKind::Provisioned));
        assert!(recorded.contains(&ActivityKind::Login));
        assert_eq!(state.metrics.sessions_issued_total.get(), 1);
        assert!(state.challenges.is_empty());
    }

    #[tokio::test]
    async fn test_login_without_signature_is_unauthorized() {
        let state = test_state();
        let router = create_router(state.clone());
        let address = addr(&admin());
        challenge(&router, &address).await;

        let reply = post_login(&router, &address, None).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert!(reply.set_cookie().is_none());

        // The bare-address form some clients used to send.
        let reply = post_json(
            &router,
            "/auth/session",
            None,
            serde_json::json!({ "address": address }),
        )
        .await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert!(reply.set_cookie().is_none());
        assert!(kinds(&state).contains(&ActivityKind::ProofRejected));
        assert_eq!(state.metrics.sessions_issued_total.get(), 0);
    }

    #[tokio::test]
    async fn test_login_with_forged_signature_is_unauthorized() {
        let router = create_router(test_state());
        let address = addr(&admin());

        challenge(&router, &address).await;
        let garbage = format!("0x{}", "ab".repeat(65));
        let reply = post_login(&router, &address, Some(&garbage)).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert!(reply.set_cookie().is_none());

        challenge(&router, &address).await;
        let reply = post_login(&router, &address, Some("not hex")).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_signed_by_another_key_is_unauthorized() {
        let state = test_state();
        let router = create_router(state.clone());
        let claimed = addr(&admin());

        // The holder signs the admin's challenge and claims the admin address.
        let message = challenge(&router, &claimed).await;
        let signature = personal_sign(&holder(), &message);
        let reply = post_login(&router, &claimed, Some(&signature)).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
        assert!(reply.set_cookie().is_none());
        assert_eq!(state.metrics.resolutions_total.get(), 0);
    }

    #[tokio::test]
    async fn test_login_challenge_is_single_use() {
        let router = create_router(test_state());
        let key = holder();
        let address = addr(&key);

        let message = challenge(&router, &address).await;
        let signature = personal_sign(&key, &message);
        assert_eq!(
            post_login(&router, &address, Some(&signature)).await.status,
            StatusCode::OK
        );
        // Replaying the same signature finds no live challenge.
        assert_eq!(
            post_login(&router, &address, Some(&signature)).await.status,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_login_without_challenge_is_unauthorized() {
        let router = create_router(test_state());
        let key = holder();
        let signature = personal_sign(&key, "Sign in to CertGate");
        let reply = post_login(&router, &addr(&key), Some(&signature)).await;
        assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_login_rejects_bad_address() {
        let router = create_router(test_state());
        let reply = post_json(
            &router,
            "/auth/session",
            None,
            serde_json::json!({ "address": "0x1234", "signature": "0x00" }),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body["retryable"], false);
        assert!(reply.set_cookie().is_none());
    }

    #[tokio::test]
    async fn test_login_disabled_account() {
        let state = test_state();
        state.db.update_active(&addr(&holder()), false).unwrap();
        let router = create_router(state.clone());

        let reply = login(&router, &holder()).await;
        assert_eq!(reply.status, StatusCode::FORBIDDEN);
        assert!(reply.set_cookie().is_none());
        assert!(kinds(&state).contains(&ActivityKind::ResolutionFailed));
    }

    #[tokio::test]
    async fn test_login_store_down_is_retryable() {
        let state = down_state();
        let router = create_router(state.clone());

        let reply = login(&router, &holder()).await;
        assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(reply.body["retryable"], true);
        assert_eq!(state.metrics.resolution_failures_total.get(), 1);
    }

    #[tokio::test]
    async fn test_session_lookup_and_logout() {
        let state = test_state();
        let router = create_router(state.clone());
        let cookie = login(&router, &holder()).await.cookie_pair();

        let reply = get(&router, "/auth/session", Some(&cookie)).await;
        assert_eq!(reply.body["authenticated"], true);
        assert_eq!(reply.body["role"], "holder");

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/auth/session")
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap();
        let reply = send(&router, request).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert!(reply.set_cookie().unwrap().ends_with("Max-Age=0"));
        assert!(kinds(&state).contains(&ActivityKind::Logout));

        // Logging out again without a cookie is still fine.
        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/auth/session")
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&router, request).await.status, StatusCode::OK);

        let reply = get(&router, "/auth/session", None).await;
        assert_eq!(reply.body["authenticated"], false);
        assert_eq!(reply.body["role"], "public");
    }

    // -- Guarded namespaces -------------------------------------------------

    #[tokio::test]
    async fn test_anonymous_is_sent_to_login() {
        let state = test_state();
        let router = create_router(state.clone());

        let reply = get(&router, "/holder", None).await;
        assert_eq!(reply.status, StatusCode::SEE_OTHER);
        assert_eq!(reply.location(), Some("/login"));
        assert_eq!(state.metrics.guard_redirect_total.get(), 1);
    }

    #[tokio::test]
    async fn test_holder_reaches_own_namespace_only() {
        let router = create_router(test_state());
        let cookie = login(&router, &holder()).await.cookie_pair();

        let reply = get(&router, "/holder", Some(&cookie)).await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["namespace"], "holder");
        assert_eq!(reply.body["role"], "holder");

        let reply = get(&router, "/admin", Some(&cookie)).await;
        assert_eq!(reply.status, StatusCode::SEE_OTHER);
        assert_eq!(reply.location(), Some("/holder"));

        let reply = get(&router, "/api/admin/activity", Some(&cookie)).await;
        assert_eq!(reply.status, StatusCode::SEE_OTHER);
        assert_eq!(reply.location(), Some("/holder"));
    }

    #[tokio::test]
    async fn test_admin_reaches_every_namespace() {
        let router = create_router(test_state());
        let cookie = login(&router, &admin()).await.cookie_pair();

        for path in ["/admin", "/issuer", "/holder"] {
            let reply = get(&router, path, Some(&cookie)).await;
            assert_eq!(reply.status, StatusCode::OK, "{path}");
        }
    }

    #[tokio::test]
    async fn test_tampered_cookie_is_anonymous() {
        let router = create_router(test_state());
        let cookie = login(&router, &holder()).await.cookie_pair();
        let (payload, _) = cookie.rsplit_once('.').unwrap();
        let forged = format!("{payload}.{}", "00".repeat(32));

        let reply = get(&router, "/holder", Some(&forged)).await;
        assert_eq!(reply.status, StatusCode::SEE_OTHER);
        assert_eq!(reply.location(), Some("/login"));
    }

    #[tokio::test]
    async fn test_sensitive_route_sees_demotion() {
        let state = test_state();
        let router = create_router(state.clone());
        let cookie = login(&router, &admin()).await.cookie_pair();

        state.db.update_role(&addr(&admin()), Role::Holder).unwrap();

        let reply = get(&router, "/api/admin/activity", Some(&cookie)).await;
        assert_eq!(reply.status, StatusCode::SEE_OTHER);
        assert_eq!(reply.location(), Some("/holder"));

        // The stale cookie is replaced with one carrying the stored role.
        let refreshed = reply.cookie_pair();
        let session = get(&router, "/auth/session", Some(&refreshed)).await;
        assert_eq!(session.body["role"], "holder");
        assert!(kinds(&state).contains(&ActivityKind::RoleChange));
    }

    #[tokio::test]
    async fn test_sensitive_route_drops_disabled_account() {
        let state = test_state();
        let router = create_router(state.clone());
        let cookie = login(&router, &admin()).await.cookie_pair();

        state.db.update_active(&addr(&admin()), false).unwrap();

        let reply = get(&router, "/api/admin/activity", Some(&cookie)).await;
        assert_eq!(reply.status, StatusCode::SEE_OTHER);
        assert_eq!(reply.location(), Some("/login"));
        assert!(reply.set_cookie().unwrap().ends_with("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_sensitive_route_store_outage_keeps_cookie() {
        let state = test_state();
        let router = create_router(state.clone());
        let cookie = login(&router, &admin()).await.cookie_pair();

        let mut outage = state.clone();
        outage.resolver = Arc::new(RoleResolver::new(Arc::new(DownStore), state.db.clone()));
        let router = create_router(outage);

        let reply = get(&router, "/api/admin/activity", Some(&cookie)).await;
        assert_eq!(reply.status, StatusCode::SEE_OTHER);
        assert_eq!(reply.location(), Some("/login"));
        assert!(reply.set_cookie().is_none());
    }

    // -- Admin API ----------------------------------------------------------

    #[tokio::test]
    async fn test_admin_promotes_holder() {
        let state = test_state();
        let router = create_router(state.clone());
        let cookie = login(&router, &admin()).await.cookie_pair();
        let target = addr(&holder());

        let path = format!("/api/admin/users/{target}/role");
        let reply = post_json(
            &router,
            &path,
            Some(&cookie),
            serde_json::json!({ "role": "issuer" }),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["role"], "issuer");

        let entry = state
            .db
            .recent_activity(100)
            .unwrap()
            .into_iter()
            .find(|e| e.kind == ActivityKind::RoleChange)
            .unwrap();
        assert_eq!(entry.wallet_address, Some(target));
        assert!(entry.detail.contains("holder -> issuer"));
        assert!(entry.detail.contains(&addr(&admin()).to_string()));

        let reply = get(&router, &format!("/api/admin/users/{target}"), Some(&cookie)).await;
        assert_eq!(reply.body["role"], "issuer");
    }

    #[tokio::test]
    async fn test_admin_api_rejections() {
        let router = create_router(test_state());
        let cookie = login(&router, &admin()).await.cookie_pair();

        let reply = post_json(
            &router,
            &format!("/api/admin/users/{}/role", addr(&holder())),
            Some(&cookie),
            serde_json::json!({ "role": "public" }),
        )
        .await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);

        let reply = post_json(
            &router,
            &format!("/api/admin/users/{}/role", addr(&newcomer())),
            Some(&cookie),
            serde_json::json!({ "role": "issuer" }),
        )
        .await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND);

        let reply = post_json(
            &router,
            &format!("/api/admin/users/{}/active", addr(&admin())),
            Some(&cookie),
            serde_json::json!({ "active": false }),
        )
        .await;
        assert_eq!(reply.status, StatusCode::CONFLICT);

        let reply = get(&router, "/api/admin/users/not-an-address", Some(&cookie)).await;
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_disabled_holder_cannot_log_back_in() {
        let state = test_state();
        let router = create_router(state.clone());
        let cookie = login(&router, &admin()).await.cookie_pair();

        let reply = post_json(
            &router,
            &format!("/api/admin/users/{}/active", addr(&holder())),
            Some(&cookie),
            serde_json::json!({ "active": false }),
        )
        .await;
        assert_eq!(reply.status, StatusCode::OK);
        assert_eq!(reply.body["active"], false);
        assert!(kinds(&state).contains(&ActivityKind::AccountStatus));

        assert_eq!(login(&router, &holder()).await.status, StatusCode::FORBIDDEN);
    }
}
