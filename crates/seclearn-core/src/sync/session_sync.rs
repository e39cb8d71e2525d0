//! Session synchronization between the auth backend and local state.
//!
//! One driver task owns the auth change subscription and processes
//! notifications strictly in order. Each notification replaces the session
//! and, when a user is signed in, spawns a profile fetch that the driver
//! never waits for.
//!
//! Profile fetches are tagged with the user id current when they were
//! issued and with a sequence number. A fetch whose user is no longer
//! signed in by the time it settles is discarded, so a slow fetch cannot
//! repopulate the profile after a sign-out. Only the most recently issued
//! fetch clears `profile_loading`, and `clear()` invalidates every fetch
//! issued before it. Overlapping fetches for the same user are
//! last-writer-wins.
//!
//! `session_loading` is derived: it stays true until the first notification
//! has been processed and while any action is in flight.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::BackendError;
use crate::auth::{AuthChange, AuthError, AuthEvent, AuthSubscription};
use crate::backend::{AuthBackend, AuthResponse, OAuthRedirect, ProfileStore};
use crate::config::Config;
use crate::models::{Profile, Session};

use super::SyncState;

/// Shared between the public handle, the driver task, and (weakly) the
/// profile fetch tasks.
struct Inner {
    auth: Arc<dyn AuthBackend>,
    profiles: Arc<dyn ProfileStore>,
    state: watch::Sender<SyncState>,
    /// Sequence number of the most recently issued profile fetch.
    latest_fetch: AtomicU64,
    /// Fetches numbered at or below this were invalidated by `clear()`.
    cleared_through: AtomicU64,
    /// Set once the first notification has been processed.
    bootstrapped: AtomicBool,
    actions_in_flight: AtomicUsize,
    oauth_redirect: String,
}

impl Inner {
    /// Recompute `session_loading`; returns whether it changed. Callers
    /// hold the state lock, so counter updates and the flag stay in step.
    fn sync_session_loading(&self, state: &mut SyncState) -> bool {
        let loading = !self.bootstrapped.load(Ordering::SeqCst)
            || self.actions_in_flight.load(Ordering::SeqCst) > 0;
        let changed = state.session_loading != loading;
        state.session_loading = loading;
        changed
    }

    fn action_started(&self) {
        self.state.send_if_modified(|state| {
            self.actions_in_flight.fetch_add(1, Ordering::SeqCst);
            self.sync_session_loading(state)
        });
    }

    fn action_finished(&self) {
        self.state.send_if_modified(|state| {
            self.actions_in_flight.fetch_sub(1, Ordering::SeqCst);
            self.sync_session_loading(state)
        });
    }

    /// Apply one notification. Runs on the driver task.
    fn handle(self: &Arc<Self>, change: AuthChange) {
        let session = change.session.filter(Session::is_signed_in);
        let user_id = session.as_ref().and_then(Session::user_id).map(str::to_owned);
        debug!(event = ?change.event, user_id = ?user_id, "Processing auth change");

        match user_id {
            Some(user_id) => {
                // Session and fetch start are published together
                let mut seq = 0;
                self.state.send_modify(|state| {
                    state.session = session;
                    self.bootstrapped.store(true, Ordering::SeqCst);
                    self.sync_session_loading(state);
                    seq = self.mark_fetch(state);
                });
                self.spawn_load(seq, user_id);
            }
            None => {
                self.state.send_modify(|state| {
                    state.session = None;
                    self.bootstrapped.store(true, Ordering::SeqCst);
                    self.sync_session_loading(state);
                    self.clear_profile(state);
                });
            }
        }
    }

    /// Drop the profile and invalidate every fetch issued so far.
    fn clear_profile(&self, state: &mut SyncState) {
        state.profile = None;
        state.profile_loading = false;
        self.cleared_through
            .store(self.latest_fetch.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    /// Record a newly issued fetch and return its sequence number.
    fn mark_fetch(&self, state: &mut SyncState) -> u64 {
        state.profile_loading = true;
        self.latest_fetch.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn begin_fetch(&self) -> u64 {
        let mut seq = 0;
        self.state.send_modify(|state| seq = self.mark_fetch(state));
        seq
    }

    /// Query the store, turning a panicking implementation into an error so
    /// the fetch always settles.
    async fn query(profiles: Arc<dyn ProfileStore>, user_id: &str) -> Result<Option<Profile>, BackendError> {
        match AssertUnwindSafe(profiles.get_by_user_id(user_id))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::InvalidResponse(
                "profile store panicked".to_string(),
            )),
        }
    }

    fn finish_fetch(&self, seq: u64, user_id: &str, result: Result<Option<Profile>, BackendError>) {
        self.state.send_modify(|state| {
            if seq <= self.cleared_through.load(Ordering::SeqCst) {
                debug!(user_id, seq, "Discarding profile fetch invalidated by clear");
                return;
            }
            let still_current = state.user_id() == Some(user_id);
            match result {
                Ok(Some(profile)) if still_current => {
                    debug!(user_id, "Profile loaded");
                    state.profile = Some(profile);
                }
                Ok(Some(_)) => debug!(user_id, "Discarding profile for user no longer signed in"),
                Ok(None) => warn!(user_id, "No profile found for user"),
                Err(e) => warn!(user_id, error = %e, "Failed to fetch profile"),
            }
            if self.latest_fetch.load(Ordering::SeqCst) == seq {
                state.profile_loading = false;
            }
        });
    }

    async fn load(&self, user_id: &str) {
        if user_id.is_empty() {
            return;
        }
        let seq = self.begin_fetch();
        let result = Self::query(self.profiles.clone(), user_id).await;
        self.finish_fetch(seq, user_id, result);
    }

    /// Let an already marked fetch settle in the background. The task only
    /// holds a weak reference, so it cannot write into a torn-down
    /// `SessionSync`.
    fn spawn_load(self: &Arc<Self>, seq: u64, user_id: String) {
        let profiles = self.profiles.clone();
        let weak: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let result = Self::query(profiles, &user_id).await;
            match weak.upgrade() {
                Some(inner) => inner.finish_fetch(seq, &user_id, result),
                None => debug!(user_id, "Session sync gone, dropping profile result"),
            }
        });
    }
}

/// Counts an action as in flight until it finishes, fails, or is dropped
/// mid-flight.
struct ActionGuard<'a> {
    inner: &'a Inner,
}

impl<'a> ActionGuard<'a> {
    fn new(inner: &'a Inner) -> Self {
        inner.action_started();
        Self { inner }
    }
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        self.inner.action_finished();
    }
}

/// Local mirror of the remote session plus the signed-in user's profile.
///
/// Must be created inside a Tokio runtime. Dropping it (or calling
/// `shutdown`) releases the auth change subscription.
pub struct SessionSync {
    inner: Arc<Inner>,
    driver: Option<JoinHandle<()>>,
}

impl SessionSync {
    /// Subscribe to auth changes and bootstrap from the current session.
    ///
    /// The subscription is registered before the bootstrap query is issued,
    /// so no live notification can be missed.
    pub fn start(
        auth: Arc<dyn AuthBackend>,
        profiles: Arc<dyn ProfileStore>,
        config: &Config,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::default());
        let inner = Arc::new(Inner {
            auth,
            profiles,
            state,
            latest_fetch: AtomicU64::new(0),
            cleared_through: AtomicU64::new(0),
            bootstrapped: AtomicBool::new(false),
            actions_in_flight: AtomicUsize::new(0),
            oauth_redirect: config.oauth_redirect_url(),
        });

        let subscription = inner.auth.on_auth_change();
        let driver = tokio::spawn(Self::drive(inner.clone(), subscription));
        info!("Session sync started");

        Self {
            inner,
            driver: Some(driver),
        }
    }

    /// Bootstrap query, normalized so it can never fail.
    async fn bootstrap(auth: Arc<dyn AuthBackend>) -> Option<Session> {
        match AssertUnwindSafe(auth.get_current_session())
            .catch_unwind()
            .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to get current session, continuing signed out");
                None
            }
            Err(_) => {
                error!("Current session query panicked, continuing signed out");
                None
            }
        }
    }

    /// Driver loop: runs the bootstrap query alongside the live stream and
    /// applies notifications in arrival order. A bootstrap result that
    /// arrives after a live notification is stale and dropped.
    async fn drive(inner: Arc<Inner>, mut subscription: AuthSubscription) {
        let bootstrap = Self::bootstrap(inner.auth.clone());
        tokio::pin!(bootstrap);

        let mut bootstrap_done = false;
        let mut live_seen = false;
        let mut stream_open = true;

        while !bootstrap_done || stream_open {
            tokio::select! {
                biased;

                change = subscription.recv(), if stream_open => match change {
                    Some(change) => {
                        live_seen = true;
                        inner.handle(change);
                    }
                    None => {
                        debug!("Auth change stream closed");
                        stream_open = false;
                    }
                },
                session = &mut bootstrap, if !bootstrap_done => {
                    bootstrap_done = true;
                    if live_seen {
                        debug!("Live auth change already applied, dropping bootstrap result");
                    } else {
                        inner.handle(AuthChange::new(AuthEvent::InitialSession, session));
                    }
                }
            }
        }
        debug!("Session sync driver finished");
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SyncState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that is notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.state.borrow().session.clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.state.borrow().profile.clone()
    }

    /// Fetch the profile for `user_id` and wait for it to settle.
    ///
    /// No-op for an empty id. A missing row or a failed query leaves the
    /// current profile in place.
    pub async fn load(&self, user_id: &str) {
        self.inner.load(user_id).await;
    }

    /// Re-fetch the signed-in user's profile.
    pub async fn refresh_profile(&self) {
        let user_id = self.inner.state.borrow().user_id().map(str::to_owned);
        if let Some(user_id) = user_id {
            self.inner.load(&user_id).await;
        }
    }

    /// Drop the cached profile. Fetches still in flight are discarded when
    /// they settle.
    pub fn clear(&self) {
        self.inner
            .state
            .send_modify(|state| self.inner.clear_profile(state));
    }

    async fn run_action<T, F>(&self, action: &'static str, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let _in_flight = ActionGuard::new(&self.inner);
        let result = call.await.map_err(AuthError::from);
        if let Err(ref e) = result {
            error!(action, error = %e, "Auth action failed");
        }
        result
    }

    /// Register a new account. `attributes` become the user's metadata.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        attributes: serde_json::Value,
    ) -> Result<AuthResponse, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        self.run_action("sign_up", self.inner.auth.sign_up(email, password, attributes))
            .await
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthResponse, AuthError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        self.run_action("sign_in", self.inner.auth.sign_in(email, password))
            .await
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        self.run_action("sign_out", self.inner.auth.sign_out()).await
    }

    /// Start an OAuth sign-in; the provider redirects back to the
    /// post-auth landing page.
    pub async fn sign_in_with_oauth(&self, provider: &str) -> Result<OAuthRedirect, AuthError> {
        let redirect_to = self.inner.oauth_redirect.clone();
        self.run_action(
            "sign_in_with_oauth",
            self.inner.auth.sign_in_with_oauth(provider, &redirect_to),
        )
        .await
    }

    /// Stop processing notifications and wait until the subscription has
    /// been released.
    pub async fn shutdown(mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
            // Cancellation is the expected outcome
            let _ = driver.await;
        }
        info!("Session sync stopped");
    }
}

impl Drop for SessionSync {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}
