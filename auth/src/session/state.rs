//! # SessionState
//!
//! Owns the current [`Session`] and every transition it goes through.
//!
//! ## Single-writer rule
//!
//! Each resolution (bootstrap, login, account change, chain change) takes a
//! ticket from [`Flight`]. Only the holder of the current ticket can
//! commit. Starting a resolution either:
//!
//! - **rejects** when another is in flight (`bootstrap`, `login`), or
//! - **preempts** it (`on_accounts_changed`, `on_chain_changed`): the
//!   ticket is bumped, the old resolution's collaborator call is cancelled
//!   at its next await point, and anything it would have committed is
//!   dropped.
//!
//! Logout bumps the ticket too, so a resolution racing a logout can never
//! resurrect the identity it was resolving.
//!
//! A resolution whose caller drops it mid-await releases its ticket on the
//! way out: if it still held the current ticket, the session is committed
//! as a retryable failure rather than left `Loading`. Each store call is
//! bounded by [`SessionOptions::store_timeout`].
//!
//! ## Reads
//!
//! The session lives in a `tokio::sync::watch` channel. [`snapshot`] clones
//! the last committed value and [`subscribe`] hands out a receiver for
//! UI-style consumers. Neither blocks on a resolution.
//!
//! ## Wallet events
//!
//! Once an address is known the state registers exactly one listener pair
//! with the [`WalletGateway`]. The listener holds a weak handle, runs the
//! synchronous half of the transition inline (so events apply in delivery
//! order) and spawns the resolution onto the runtime that registered it.
//! Logout, disconnect and [`shutdown`] drop the subscription.
//!
//! [`snapshot`]: SessionState::snapshot
//! [`subscribe`]: SessionState::subscribe
//! [`shutdown`]: SessionState::shutdown

use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::cache::{SessionCache, SessionHint};
use super::{Session, SessionError, SessionFailure, SessionStatus};
use crate::config::DEFAULT_STORE_TIMEOUT;
use crate::guard::{AccessGuard, Decision, RouteClassification};
use crate::identity::{Identity, WalletAddress};
use crate::resolver::RoleResolver;
use crate::store::{notify, ActivityEntry, ActivityKind};
use crate::wallet::{ChainId, Subscription, WalletGateway};

const DETAIL_RESTORED: &str = "session restored";
const DETAIL_LOGIN: &str = "wallet login";
const DETAIL_SWITCHED: &str = "account switched";
const DETAIL_NETWORK: &str = "re-resolved after network switch";

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Handle to a session. Cheap to clone; every clone drives the same state.
#[derive(Clone)]
pub struct SessionState {
    inner: Arc<Inner>,
}

/// Construction knobs for [`SessionState`].
#[derive(Clone)]
pub struct SessionOptions {
    /// Mirror committed identities into this cache.
    pub cache: Option<Arc<dyn SessionCache>>,
    /// Upper bound on one resolution against the identity store.
    pub store_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            cache: None,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

struct Inner {
    gateway: WalletGateway,
    resolver: Arc<RoleResolver>,
    cache: Option<Arc<dyn SessionCache>>,
    store_timeout: Duration,
    session: watch::Sender<Session>,
    generation: watch::Sender<u64>,
    flight: Mutex<Flight>,
    bootstrapped: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
}

/// Ticket bookkeeping for the single-writer rule.
#[derive(Debug, Default)]
struct Flight {
    ticket: u64,
    active: bool,
}

/// Releases a ticket whose flow was dropped before it committed.
struct FlightGuard<'a> {
    inner: &'a Inner,
    ticket: u64,
}

impl<'a> FlightGuard<'a> {
    fn new(inner: &'a Inner, ticket: u64) -> Self {
        Self { inner, ticket }
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.inner.abandon(self.ticket);
    }
}

/// What an account-change event turned into.
enum AccountChange {
    Unchanged,
    Disconnected,
    Resolve {
        ticket: u64,
        address: WalletAddress,
        previous: Option<Identity>,
    },
}

impl SessionState {
    pub fn new(gateway: WalletGateway, resolver: Arc<RoleResolver>) -> Self {
        Self::with_options(gateway, resolver, SessionOptions::default())
    }

    /// A session that mirrors committed identities into `cache`.
    pub fn with_cache(
        gateway: WalletGateway,
        resolver: Arc<RoleResolver>,
        cache: Arc<dyn SessionCache>,
    ) -> Self {
        let options = SessionOptions {
            cache: Some(cache),
            ..SessionOptions::default()
        };
        Self::with_options(gateway, resolver, options)
    }

    pub fn with_options(
        gateway: WalletGateway,
        resolver: Arc<RoleResolver>,
        options: SessionOptions,
    ) -> Self {
        let (session, _) = watch::channel(Session::uninitialized());
        let (generation, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                gateway,
                resolver,
                cache: options.cache,
                store_timeout: options.store_timeout,
                session,
                generation,
                flight: Mutex::new(Flight::default()),
                bootstrapped: AtomicBool::new(false),
                subscription: Mutex::new(None),
            }),
        }
    }

    // -- Reads ----------------------------------------------------------------

    /// The last committed session.
    pub fn snapshot(&self) -> Session {
        self.inner.session.borrow().clone()
    }

    /// Receiver notified on every committed transition.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.session.subscribe()
    }

    /// Evaluate `route` against the current snapshot.
    pub fn evaluate(&self, guard: &AccessGuard, route: &RouteClassification) -> Decision {
        guard.evaluate(&self.snapshot(), route)
    }

    /// The persisted hint, if a cache is attached and holds one.
    pub fn cached_hint(&self) -> Option<SessionHint> {
        self.inner.cache.as_ref().and_then(|cache| cache.load())
    }

    /// Whether a wallet listener is currently registered for this session.
    pub fn is_subscribed(&self) -> bool {
        self.inner
            .subscription
            .lock()
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    // -- Transitions ----------------------------------------------------------

    /// Restore whatever session the wallet already authorizes.
    ///
    /// Runs once per `SessionState`. A second call fails with
    /// [`SessionError::AlreadyBootstrapped`].
    pub async fn bootstrap(&self) -> Result<Session, SessionError> {
        let inner = &self.inner;
        if inner.bootstrapped.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyBootstrapped);
        }

        let ticket = match inner.begin(false, |_| Session::loading(None)) {
            Ok((ticket, _)) => ticket,
            Err(e) => {
                inner.bootstrapped.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let _flight = FlightGuard::new(inner, ticket);
        inner.bootstrap_flow(ticket, DETAIL_RESTORED).await
    }

    /// Connect the wallet (prompting the user) and resolve its address.
    ///
    /// Rejected with [`SessionError::InFlight`] while any resolution is
    /// running. The previously committed identity stays visible until the
    /// new one commits. Dropping the returned future before it completes
    /// leaves the session in a retryable `Error`, never stuck `Loading`.
    pub async fn login(&self) -> Result<Session, SessionError> {
        let inner = &self.inner;
        let (ticket, previous) =
            inner.begin(false, |current| Session::loading(current.identity.clone()))?;
        let previous = previous.identity;
        let _flight = FlightGuard::new(inner, ticket);

        let address = match inner.guarded(ticket, inner.gateway.connect()).await? {
            Ok(address) => address,
            Err(e) => {
                let failure = SessionFailure::from(&e);
                if !inner.commit(ticket, Session::failed(failure.clone())) {
                    return Err(SessionError::Superseded);
                }
                inner.record(ActivityKind::ResolutionFailed, None, failure.message);
                return Err(e.into());
            }
        };

        inner.record(ActivityKind::Connect, Some(address), "wallet connected");
        inner.ensure_subscribed();
        inner
            .resolve_and_commit(ticket, address, previous, DETAIL_LOGIN)
            .await
    }

    /// Sign out. Always succeeds; calling it twice is the same as once.
    ///
    /// Wallet permissions are untouched.
    pub fn logout(&self) {
        self.inner.end_session(ActivityKind::Logout, "user logout");
    }

    /// Apply an account-change event from the wallet.
    ///
    /// `None` is a wallet-side disconnect: a logout recorded as
    /// [`ActivityKind::Disconnect`]. A new address preempts any running
    /// resolution and resolves the new one.
    pub async fn on_accounts_changed(
        &self,
        next: Option<WalletAddress>,
    ) -> Result<Session, SessionError> {
        match self.inner.start_account_change(next) {
            AccountChange::Unchanged | AccountChange::Disconnected => Ok(self.snapshot()),
            AccountChange::Resolve {
                ticket,
                address,
                previous,
            } => {
                let _flight = FlightGuard::new(&self.inner, ticket);
                self.inner
                    .resolve_and_commit(ticket, address, previous, DETAIL_SWITCHED)
                    .await
            }
        }
    }

    /// Apply a network switch: discard everything and bootstrap again.
    pub async fn on_chain_changed(&self, chain: ChainId) -> Result<Session, SessionError> {
        let ticket = self.inner.start_chain_change(&chain);
        let _flight = FlightGuard::new(&self.inner, ticket);
        self.inner.bootstrap_flow(ticket, DETAIL_NETWORK).await
    }

    /// Tear down: cancel any resolution in flight and release the wallet
    /// listener. The committed session is left as it is.
    pub fn shutdown(&self) {
        {
            let mut flight = self.inner.flight.lock();
            flight.ticket += 1;
            flight.active = false;
            self.inner.generation.send_replace(flight.ticket);
        }
        if self.inner.subscription.lock().take().is_some() {
            debug!("session shut down, wallet listener released");
        }
    }
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

impl Inner {
    /// Take a ticket and publish the loading state built from the current
    /// session. Returns the ticket and the session it replaced.
    fn begin<F>(&self, preempt: bool, loading: F) -> Result<(u64, Session), SessionError>
    where
        F: FnOnce(&Session) -> Session,
    {
        let mut flight = self.flight.lock();
        if flight.active && !preempt {
            return Err(SessionError::InFlight);
        }
        if flight.active {
            debug!(ticket = flight.ticket, "preempting in-flight resolution");
        }

        flight.ticket += 1;
        flight.active = true;
        self.generation.send_replace(flight.ticket);

        let next = loading(&self.session.borrow());
        let previous = self.session.send_replace(next);
        Ok((flight.ticket, previous))
    }

    /// Publish `session` if `ticket` is still current.
    fn commit(&self, ticket: u64, session: Session) -> bool {
        let mut flight = self.flight.lock();
        if flight.ticket != ticket {
            debug!(ticket, current = flight.ticket, "dropping stale resolution");
            return false;
        }
        flight.active = false;

        if let Some(cache) = &self.cache {
            match SessionHint::from_session(&session) {
                Some(hint) => cache.store(&hint),
                None => cache.clear(),
            }
        }
        self.session.send_replace(session);
        true
    }

    /// Commit a retryable failure for `ticket` if it is still in flight.
    fn abandon(&self, ticket: u64) {
        let in_flight = {
            let flight = self.flight.lock();
            flight.active && flight.ticket == ticket
        };
        if in_flight && self.commit(ticket, Session::failed(SessionFailure::abandoned())) {
            warn!(ticket, "session resolution abandoned by its caller");
        }
    }

    /// Run `fut` unless `ticket` is superseded first.
    async fn guarded<F: Future>(&self, ticket: u64, fut: F) -> Result<F::Output, SessionError> {
        let mut generation = self.generation.subscribe();
        if *generation.borrow_and_update() != ticket {
            return Err(SessionError::Superseded);
        }

        tokio::pin!(fut);
        loop {
            // Supersession is checked before the collaborator is polled again.
            tokio::select! {
                biased;
                changed = generation.changed() => {
                    if changed.is_err() || *generation.borrow_and_update() != ticket {
                        return Err(SessionError::Superseded);
                    }
                }
                output = &mut fut => return Ok(output),
            }
        }
    }

    /// Shared tail of bootstrap and chain change.
    async fn bootstrap_flow(
        self: &Arc<Self>,
        ticket: u64,
        detail: &'static str,
    ) -> Result<Session, SessionError> {
        let current = self.guarded(ticket, self.gateway.current_address()).await?;
        self.discard_foreign_hint(current.as_ref());

        match current {
            None => {
                let session = Session::anonymous();
                if !self.commit(ticket, session.clone()) {
                    return Err(SessionError::Superseded);
                }
                debug!("bootstrapped anonymous session");
                Ok(session)
            }
            Some(address) => {
                self.ensure_subscribed();
                self.resolve_and_commit(ticket, address, None, detail).await
            }
        }
    }

    async fn resolve_and_commit(
        &self,
        ticket: u64,
        address: WalletAddress,
        previous: Option<Identity>,
        detail: &'static str,
    ) -> Result<Session, SessionError> {
        let outcome = self
            .guarded(
                ticket,
                self.resolver.resolve_within(&address, self.store_timeout),
            )
            .await?;

        match outcome {
            Ok(identity) => {
                let session = Session::authenticated(identity.clone());
                if !self.commit(ticket, session.clone()) {
                    return Err(SessionError::Superseded);
                }
                info!(address = %address, role = %identity.role, "session ready");
                self.record_login(previous.as_ref(), &identity, detail);
                Ok(session)
            }
            Err(e) => {
                let failure = SessionFailure::from(&e);
                if !self.commit(ticket, Session::failed(failure.clone())) {
                    return Err(SessionError::Superseded);
                }
                warn!(address = %address, error = %e, "session resolution failed");
                self.record(ActivityKind::ResolutionFailed, Some(address), failure.message);
                Err(e.into())
            }
        }
    }

    fn start_account_change(&self, next: Option<WalletAddress>) -> AccountChange {
        let Some(address) = next else {
            self.end_session(ActivityKind::Disconnect, "wallet disconnected");
            return AccountChange::Disconnected;
        };

        {
            let current = self.session.borrow();
            let same = current
                .identity
                .as_ref()
                .is_some_and(|identity| identity.wallet_address == address);
            if same && current.status == SessionStatus::Ready {
                return AccountChange::Unchanged;
            }
        }

        // Preempting never fails.
        let (ticket, previous) = match self.begin(true, |current| {
            Session::loading(current.identity.clone())
        }) {
            Ok(started) => started,
            Err(_) => return AccountChange::Unchanged,
        };

        debug!(address = %address, "wallet account changed");
        AccountChange::Resolve {
            ticket,
            address,
            previous: previous.identity,
        }
    }

    fn start_chain_change(&self, chain: &str) -> u64 {
        let current = self.session.borrow().identity.as_ref().map(|i| i.wallet_address);
        self.record(
            ActivityKind::ChainChange,
            current,
            format!("wallet switched to chain {}", chain),
        );
        if let Some(cache) = &self.cache {
            cache.clear();
        }

        info!(chain, "wallet network changed, discarding session");
        match self.begin(true, |_| Session::loading(None)) {
            Ok((ticket, _)) => ticket,
            Err(_) => self.flight.lock().ticket,
        }
    }

    /// Logout and disconnect.
    fn end_session(&self, kind: ActivityKind, detail: &str) {
        let previous = {
            let mut flight = self.flight.lock();
            flight.ticket += 1;
            flight.active = false;
            self.generation.send_replace(flight.ticket);
            if let Some(cache) = &self.cache {
                cache.clear();
            }
            self.session.send_replace(Session::anonymous())
        };

        self.subscription.lock().take();

        if let Some(identity) = previous.identity {
            info!(address = %identity.wallet_address, ?kind, "session ended");
            self.record(kind, Some(identity.wallet_address), detail);
        }
    }

    fn discard_foreign_hint(&self, current: Option<&WalletAddress>) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Some(hint) = cache.load() {
            if Some(&hint.wallet_address) != current {
                debug!(hinted = %hint.wallet_address, "discarding hint for a different wallet");
                cache.clear();
            }
        }
    }

    /// Register the wallet listener pair unless one is already live.
    fn ensure_subscribed(self: &Arc<Self>) {
        let mut slot = self.subscription.lock();
        if slot.as_ref().is_some_and(Subscription::is_active) {
            return;
        }

        let Ok(handle) = Handle::try_current() else {
            warn!("no async runtime available, wallet events will not be observed");
            return;
        };

        let accounts_target = Arc::downgrade(self);
        let accounts_handle = handle.clone();
        let chain_target = Arc::downgrade(self);

        let subscription = self.gateway.subscribe(
            move |next| Self::deliver_account_change(&accounts_target, &accounts_handle, next),
            move |chain| Self::deliver_chain_change(&chain_target, &handle, chain),
        );
        *slot = Some(subscription);
    }

    fn deliver_account_change(
        target: &Weak<Self>,
        handle: &Handle,
        next: Option<WalletAddress>,
    ) {
        let Some(inner) = target.upgrade() else {
            return;
        };
        if let AccountChange::Resolve {
            ticket,
            address,
            previous,
        } = inner.start_account_change(next)
        {
            handle.spawn(async move {
                let _flight = FlightGuard::new(&inner, ticket);
                if let Err(e) = inner
                    .resolve_and_commit(ticket, address, previous, DETAIL_SWITCHED)
                    .await
                {
                    debug!(error = %e, "account change resolution ended without a session");
                }
            });
        }
    }

    fn deliver_chain_change(target: &Weak<Self>, handle: &Handle, chain: ChainId) {
        let Some(inner) = target.upgrade() else {
            return;
        };
        let ticket = inner.start_chain_change(&chain);
        handle.spawn(async move {
            let _flight = FlightGuard::new(&inner, ticket);
            if let Err(e) = inner.bootstrap_flow(ticket, DETAIL_NETWORK).await {
                debug!(error = %e, "network change re-bootstrap ended without a session");
            }
        });
    }

    // -- Activity ---------------------------------------------------------------

    fn record(&self, kind: ActivityKind, address: Option<WalletAddress>, detail: impl Into<String>) {
        notify(
            self.resolver.recorder(),
            ActivityEntry::new(kind, address, detail),
        );
    }

    fn record_login(&self, previous: Option<&Identity>, identity: &Identity, detail: &str) {
        match previous {
            Some(prev) if prev.wallet_address == identity.wallet_address => {
                if prev.role != identity.role {
                    self.record(
                        ActivityKind::RoleChange,
                        Some(identity.wallet_address),
                        format!("role {} -> {}", prev.role, identity.role),
                    );
                }
            }
            _ => self.record(ActivityKind::Login, Some(identity.wallet_address), detail),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
