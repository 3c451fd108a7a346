//! Lifecycle-aware session management.
//!
//! The [`SessionManager`] owns the current session token: it authenticates on
//! first use, schedules pre-expiry renewal with jitter, re-authenticates when
//! a lease cannot be carried forward, and revokes the token on destroy.
//! Callers read the cached token lock-free; only the first login and explicit
//! lifecycle transitions take locks.

mod events;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use http::Method;

pub use events::{
    AuthFailure, SessionErrorListener, SessionEvent, SessionListener,
};
use events::SessionEventPublisher;

use crate::error::{Error, Result};
use crate::methods::AuthMethod;
use crate::response::{TokenLookup, VaultResponse};
use crate::schedule::{renewal_delay, JitterSource, OneShotTrigger, RandomJitter, ScheduledTask, TaskScheduler};
use crate::token::{LoginToken, SessionToken};
use crate::transport::{AsyncTransport, TransportRequest};

const DEFAULT_EXPIRY_THRESHOLD: Duration = Duration::from_secs(5);

/// What to do with the cached token when a renewal fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeaseStrategy {
    /// Discard the token; the next [`SessionManager::session_token`] call
    /// re-authenticates.
    #[default]
    DropOnError,
    /// Keep the token until it actually expires.
    RetainOnError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Initial,
    Started,
    Destroyed,
}

/// Session manager for one authentication configuration.
///
/// Cloning is cheap and clones share all state, including the cached token
/// and the scheduled renewal.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("method", &self.inner.method.name())
            .field("threshold", &self.inner.threshold)
            .finish_non_exhaustive()
    }
}

struct Inner {
    transport: Arc<dyn AsyncTransport>,
    method: Arc<dyn AuthMethod>,
    publisher: SessionEventPublisher,
    token: ArcSwapOption<SessionToken>,
    login_lock: tokio::sync::Mutex<()>,
    lifecycle: Mutex<Lifecycle>,
    renewal: Mutex<Option<ScheduledTask>>,
    generation: AtomicU64,
    threshold: Duration,
    lease_strategy: LeaseStrategy,
    jitter: Arc<dyn JitterSource>,
    scheduler: TaskScheduler,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.renewal.lock() {
            if let Some(task) = slot.take() {
                task.cancel();
            }
        }
    }
}

impl SessionManager {
    /// Create a manager with default settings: 5 s expiry threshold, random
    /// jitter, drop-on-error lease strategy.
    #[must_use]
    pub fn new(transport: Arc<dyn AsyncTransport>, method: Arc<dyn AuthMethod>) -> Self {
        Self::builder(transport, method).build()
    }

    /// Start building a manager.
    #[must_use]
    pub fn builder(
        transport: Arc<dyn AsyncTransport>,
        method: Arc<dyn AuthMethod>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            transport,
            method,
            threshold: DEFAULT_EXPIRY_THRESHOLD,
            lease_strategy: LeaseStrategy::default(),
            jitter: Arc::new(RandomJitter),
            scheduler: TaskScheduler,
        }
    }

    /// The current valid session token, authenticating first if none is
    /// cached. Concurrent callers during the first login coalesce onto a
    /// single request; steady-state reads are lock-free.
    ///
    /// # Errors
    /// - [`Error::State`] after [`SessionManager::destroy`].
    /// - The login failure, if the first-time authentication fails.
    pub async fn session_token(&self) -> Result<SessionToken> {
        self.inner.ensure_not_destroyed()?;
        if let Some(token) = self.inner.token.load_full() {
            return Ok((*token).clone());
        }
        Inner::login_and_cache(&self.inner, false).await
    }

    /// Attempt to renew the current token.
    ///
    /// Returns `true` if the lease was extended. Returns `false` when renewal
    /// was skipped (no token, token not renewable, batch token) or was not
    /// authoritative (renewal failed, or the renewed lease was too short to
    /// carry forward and a re-login was performed instead).
    pub async fn renew_token(&self) -> bool {
        if self.inner.is_destroyed() {
            return false;
        }
        Inner::renew_and_reschedule(&self.inner).await
    }

    /// Destroy the manager: cancel the scheduled renewal, revoke the current
    /// token if it is a service login token, and clear cached state.
    /// Idempotent; revocation failures are emitted as events, never returned.
    pub async fn destroy(&self) {
        let inner = &self.inner;
        {
            let mut lifecycle = inner.lifecycle.lock().expect("Non-poisoned lock");
            if *lifecycle == Lifecycle::Destroyed {
                return;
            }
            *lifecycle = Lifecycle::Destroyed;
        }
        inner.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = inner.renewal.lock().expect("Non-poisoned lock").take() {
            task.cancel();
        }
        let Some(token) = inner.token.swap(None) else {
            return;
        };
        let token = (*token).clone();
        let Some(login) = token.as_login() else {
            return;
        };
        if !login.is_service_token() {
            return;
        }
        inner.publisher.publish(&SessionEvent::BeforeTokenRevocation {
            token: token.clone(),
        });
        match inner.revoke_request(login).await {
            Ok(()) => inner
                .publisher
                .publish(&SessionEvent::AfterTokenRevocation { token }),
            Err(e) => {
                tracing::warn!("Token revocation failed: {e}");
                inner
                    .publisher
                    .publish_error(&AuthFailure::TokenRevocationFailed(e));
            }
        }
    }

    /// Subscribe to lifecycle events. Returns a handle usable with
    /// [`SessionManager::remove_listener`].
    pub fn add_listener(&self, listener: impl SessionListener + 'static) -> Arc<dyn SessionListener> {
        let listener: Arc<dyn SessionListener> = Arc::new(listener);
        self.inner.publisher.add_listener(Arc::clone(&listener));
        listener
    }

    pub fn remove_listener(&self, listener: &Arc<dyn SessionListener>) {
        self.inner.publisher.remove_listener(listener);
    }

    /// Subscribe to typed error events. Without any error listener, failures
    /// are logged at warn severity.
    pub fn add_error_listener(
        &self,
        listener: impl SessionErrorListener + 'static,
    ) -> Arc<dyn SessionErrorListener> {
        let listener: Arc<dyn SessionErrorListener> = Arc::new(listener);
        self.inner.publisher.add_error_listener(Arc::clone(&listener));
        listener
    }
}

impl Inner {
    fn ensure_not_destroyed(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::State("Session manager is destroyed".into()));
        }
        Ok(())
    }

    fn is_destroyed(&self) -> bool {
        *self.lifecycle.lock().expect("Non-poisoned lock") == Lifecycle::Destroyed
    }

    fn mark_started(&self) {
        let mut lifecycle = self.lifecycle.lock().expect("Non-poisoned lock");
        if *lifecycle == Lifecycle::Initial {
            *lifecycle = Lifecycle::Started;
        }
    }

    /// Perform a login and install the resulting token. With `force`, an
    /// existing cached token is replaced instead of returned; the swap is
    /// atomic with respect to readers.
    async fn login_and_cache(inner: &Arc<Self>, force: bool) -> Result<SessionToken> {
        let _guard = inner.login_lock.lock().await;
        inner.ensure_not_destroyed()?;
        if !force {
            if let Some(token) = inner.token.load_full() {
                return Ok((*token).clone());
            }
        }
        inner.mark_started();
        inner.publisher.publish(&SessionEvent::BeforeLogin);
        let token = match inner.method.login(inner.transport.as_ref()).await {
            Ok(token) => token,
            Err(e) => {
                inner
                    .publisher
                    .publish_error(&AuthFailure::LoginFailed(e.clone()));
                return Err(e);
            }
        };
        let token = inner.enrich_bare_token(token).await;
        inner.token.store(Some(Arc::new(token.clone())));
        inner.publisher.publish(&SessionEvent::AfterLogin {
            token: token.clone(),
        });
        Self::schedule_renewal(inner, &token);
        Ok(token)
    }

    /// Self-lookup for tokens obtained without lease metadata. A failed
    /// lookup keeps the raw token and emits a warning event; it never fails
    /// the login.
    async fn enrich_bare_token(&self, token: SessionToken) -> SessionToken {
        let SessionToken::Opaque(vault_token) = token else {
            return token;
        };
        let lookup: Result<TokenLookup> = async {
            let request =
                TransportRequest::get("auth/token/lookup-self").with_token(vault_token.clone());
            let response = self
                .transport
                .send(&request)
                .await
                .map_err(|e| Error::SelfLookup(e.to_string()))?
                .ensure_success(&Method::GET, "auth/token/lookup-self")
                .map_err(|e| Error::SelfLookup(e.to_string()))?;
            let parsed: VaultResponse = response
                .json()
                .map_err(|e| Error::SelfLookup(e.to_string()))?;
            let data = parsed
                .data
                .ok_or_else(|| Error::SelfLookup("Lookup response contains no data".into()))?;
            serde_json::from_value(data).map_err(|e| Error::SelfLookup(e.to_string()))
        }
        .await;
        match lookup {
            Ok(lookup) => SessionToken::Login(lookup.into_login_token(vault_token)),
            Err(e) => {
                tracing::warn!("Token self-lookup failed, retaining the raw token: {e}");
                self.publisher.publish(&SessionEvent::SelfLookupFailed {
                    message: e.to_string(),
                });
                SessionToken::Opaque(vault_token)
            }
        }
    }

    /// Install a one-shot renewal task for a renewable, leased token. At
    /// most one task is scheduled at a time; an outgoing task is cancelled
    /// and, should it fire anyway, its stale generation stamp makes it
    /// return without work.
    fn schedule_renewal(inner: &Arc<Self>, token: &SessionToken) {
        let Some(login) = token.as_login() else {
            return;
        };
        if !login.is_renewable() || login.is_batch_token() {
            return;
        }
        let lease = login.lease_duration();
        if lease.is_zero() {
            return;
        }
        let delay = renewal_delay(lease, inner.threshold, inner.jitter.as_ref());
        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            "Scheduling token renewal in {}s (lease {}s)",
            delay.as_secs(),
            lease.as_secs()
        );
        let weak = Arc::downgrade(inner);
        let task = inner
            .scheduler
            .schedule(OneShotTrigger::after(delay), move || {
                let weak = weak.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    if inner.is_destroyed()
                        || inner.generation.load(Ordering::SeqCst) != generation
                    {
                        return;
                    }
                    let _ = Self::renew_and_reschedule(&inner).await;
                }
            });
        let mut slot = inner.renewal.lock().expect("Non-poisoned lock");
        if let Some(previous) = slot.take() {
            previous.cancel();
        }
        *slot = Some(task);
    }

    async fn renew_and_reschedule(inner: &Arc<Self>) -> bool {
        let Some(current) = inner.token.load_full() else {
            return false;
        };
        let current = (*current).clone();
        let Some(login) = current.as_login() else {
            return false;
        };
        if !login.is_renewable() || login.is_batch_token() {
            return false;
        }
        inner.publisher.publish(&SessionEvent::BeforeTokenRenewal {
            token: current.clone(),
        });
        match inner.renew_request(login).await {
            Ok(renewed) => {
                if renewed.lease_duration() < inner.threshold * 2 {
                    // Not enough lease left to renew again before expiry;
                    // obtain a fresh token instead.
                    inner
                        .publisher
                        .publish(&SessionEvent::TokenExpired { token: current });
                    if let Err(e) = Self::login_and_cache(inner, true).await {
                        tracing::warn!("Re-login after an expired lease failed: {e}");
                    }
                    false
                } else {
                    let token = SessionToken::Login(renewed);
                    inner.token.store(Some(Arc::new(token.clone())));
                    inner.publisher.publish(&SessionEvent::AfterTokenRenewal {
                        token: token.clone(),
                    });
                    Self::schedule_renewal(inner, &token);
                    true
                }
            }
            Err(e) => {
                inner
                    .publisher
                    .publish_error(&AuthFailure::TokenRenewalFailed(e));
                match inner.lease_strategy {
                    LeaseStrategy::DropOnError => {
                        inner.token.store(None);
                    }
                    LeaseStrategy::RetainOnError => {}
                }
                false
            }
        }
    }

    async fn renew_request(&self, login: &LoginToken) -> Result<LoginToken> {
        let request =
            TransportRequest::post("auth/token/renew-self").with_token(login.token().clone());
        let response = self.transport.send(&request).await.map_err(|e| {
            Error::TokenRenewal {
                status: None,
                message: e.to_string(),
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::TokenRenewal {
                status: Some(status.as_u16()),
                message: String::from_utf8_lossy(response.body()).into_owned(),
            });
        }
        let parsed: VaultResponse = response.json().map_err(|e| Error::TokenRenewal {
            status: None,
            message: e.to_string(),
        })?;
        let auth = parsed.auth.ok_or_else(|| Error::TokenRenewal {
            status: Some(status.as_u16()),
            message: "Renewal response contains no auth block".into(),
        })?;
        auth.login_token().map_err(|e| Error::TokenRenewal {
            status: None,
            message: e.to_string(),
        })
    }

    async fn revoke_request(&self, login: &LoginToken) -> Result<()> {
        let request =
            TransportRequest::post("auth/token/revoke-self").with_token(login.token().clone());
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(|e| Error::Revocation(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Revocation(format!(
                "Revocation returned status {status}"
            )));
        }
        Ok(())
    }
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    transport: Arc<dyn AsyncTransport>,
    method: Arc<dyn AuthMethod>,
    threshold: Duration,
    lease_strategy: LeaseStrategy,
    jitter: Arc<dyn JitterSource>,
    scheduler: TaskScheduler,
}

impl std::fmt::Debug for SessionManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManagerBuilder")
            .field("method", &self.method.name())
            .field("threshold", &self.threshold)
            .field("lease_strategy", &self.lease_strategy)
            .finish_non_exhaustive()
    }
}

impl SessionManagerBuilder {
    /// Lead time before lease expiry at which renewal is attempted.
    /// Default is 5 seconds.
    #[must_use]
    pub fn expiry_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn lease_strategy(mut self, strategy: LeaseStrategy) -> Self {
        self.lease_strategy = strategy;
        self
    }

    /// Replace the jitter source, e.g. with [`crate::schedule::NoJitter`]
    /// for deterministic scheduling.
    #[must_use]
    pub fn jitter_source(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    #[must_use]
    pub fn build(self) -> SessionManager {
        SessionManager {
            inner: Arc::new(Inner {
                transport: self.transport,
                method: self.method,
                publisher: SessionEventPublisher::new(),
                token: ArcSwapOption::from(None),
                login_lock: tokio::sync::Mutex::new(()),
                lifecycle: Mutex::new(Lifecycle::Initial),
                renewal: Mutex::new(None),
                generation: AtomicU64::new(0),
                threshold: self.threshold,
                lease_strategy: self.lease_strategy,
                jitter: self.jitter,
                scheduler: self.scheduler,
            }),
        }
    }
}
