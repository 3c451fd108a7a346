//! Lifecycle events of the session manager.
//!
//! Dispatch is synchronous on the publishing task. A failing listener never
//! prevents other listeners from receiving the event and never reaches the
//! publisher; typed error events travel on a separate channel with a default
//! listener that logs at warn severity.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::error::Error;
use crate::token::SessionToken;

/// Events emitted over a login cycle, in emission order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    BeforeLogin,
    AfterLogin { token: SessionToken },
    BeforeTokenRenewal { token: SessionToken },
    AfterTokenRenewal { token: SessionToken },
    /// The current token could not be carried forward and a re-login was
    /// triggered.
    TokenExpired { token: SessionToken },
    BeforeTokenRevocation { token: SessionToken },
    AfterTokenRevocation { token: SessionToken },
    /// Self-lookup of a bare token failed; the raw token is retained.
    SelfLookupFailed { message: String },
}

/// Typed error events, discriminated by the failing phase.
#[derive(Debug, Clone)]
pub enum AuthFailure {
    LoginFailed(Error),
    TokenRenewalFailed(Error),
    TokenRevocationFailed(Error),
}

/// Receives every [`SessionEvent`] dispatched after subscription.
pub trait SessionListener: Send + Sync {
    fn on_session_event(&self, event: &SessionEvent);
}

impl<F> SessionListener for F
where
    F: Fn(&SessionEvent) + Send + Sync,
{
    fn on_session_event(&self, event: &SessionEvent) {
        self(event);
    }
}

/// Receives every [`AuthFailure`] dispatched after subscription.
pub trait SessionErrorListener: Send + Sync {
    fn on_auth_failure(&self, failure: &AuthFailure);
}

impl<F> SessionErrorListener for F
where
    F: Fn(&AuthFailure) + Send + Sync,
{
    fn on_auth_failure(&self, failure: &AuthFailure) {
        self(failure);
    }
}

/// Multicast publisher with copy-on-write listener sets: dispatch iterates a
/// snapshot, so listeners may subscribe and unsubscribe at any time.
pub(crate) struct SessionEventPublisher {
    listeners: RwLock<Arc<Vec<Arc<dyn SessionListener>>>>,
    error_listeners: RwLock<Arc<Vec<Arc<dyn SessionErrorListener>>>>,
}

impl std::fmt::Debug for SessionEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEventPublisher")
            .field("listeners", &self.snapshot().len())
            .finish_non_exhaustive()
    }
}

impl SessionEventPublisher {
    pub(crate) fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
            error_listeners: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        let mut guard = self.listeners.write().expect("Non-poisoned lock");
        let mut next = (**guard).clone();
        next.push(listener);
        *guard = Arc::new(next);
    }

    /// Remove a previously added listener, comparing by identity.
    pub(crate) fn remove_listener(&self, listener: &Arc<dyn SessionListener>) {
        let mut guard = self.listeners.write().expect("Non-poisoned lock");
        let next: Vec<_> = guard
            .iter()
            .filter(|existing| !Arc::ptr_eq(existing, listener))
            .cloned()
            .collect();
        *guard = Arc::new(next);
    }

    pub(crate) fn add_error_listener(&self, listener: Arc<dyn SessionErrorListener>) {
        let mut guard = self.error_listeners.write().expect("Non-poisoned lock");
        let mut next = (**guard).clone();
        next.push(listener);
        *guard = Arc::new(next);
    }

    fn snapshot(&self) -> Arc<Vec<Arc<dyn SessionListener>>> {
        Arc::clone(&self.listeners.read().expect("Non-poisoned lock"))
    }

    pub(crate) fn publish(&self, event: &SessionEvent) {
        for listener in self.snapshot().iter() {
            let listener = Arc::clone(listener);
            if catch_unwind(AssertUnwindSafe(|| listener.on_session_event(event))).is_err() {
                tracing::warn!("Session event listener panicked; continuing dispatch");
            }
        }
    }

    pub(crate) fn publish_error(&self, failure: &AuthFailure) {
        let snapshot = Arc::clone(&self.error_listeners.read().expect("Non-poisoned lock"));
        if snapshot.is_empty() {
            tracing::warn!("Authentication failure: {failure:?}");
            return;
        }
        for listener in snapshot.iter() {
            let listener = Arc::clone(listener);
            if catch_unwind(AssertUnwindSafe(|| listener.on_auth_failure(failure))).is_err() {
                tracing::warn!("Session error listener panicked; continuing dispatch");
            }
        }
    }
}
