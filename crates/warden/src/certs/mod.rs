//! Event-driven certificate registry with pre-expiry rotation.
//!
//! A [`CertificateContainer`] obtains every registered certificate on start,
//! schedules rotation ahead of `notAfter` using the same jittered delay
//! policy as token renewal, and dispatches lifecycle events to global and
//! per-certificate listeners. Failed rotations keep the current holder and
//! wait for an operator-forced [`CertificateContainer::rotate`].

mod authority;
mod events;
pub mod x509;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

pub use authority::{CertificateAuthority, CertificateRequest, IssuedCertificate};
use events::CertificateEventPublisher;
pub use events::{CertificateEvent, CertificateListener};

use crate::error::{Error, Result};
use crate::schedule::{
    renewal_delay, Clock, JitterSource, OneShotTrigger, RandomJitter, ScheduledTask, SystemClock,
    TaskScheduler,
};

const DEFAULT_EXPIRY_THRESHOLD: Duration = Duration::from_secs(60);

/// A certificate the container manages. Identity is the `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedCertificate {
    /// A key-and-certificate bundle issued against a PKI role.
    Bundle {
        name: String,
        role: String,
        request: CertificateRequest,
    },
    /// An issuer certificate fetched as a trust anchor.
    TrustAnchor { name: String, issuer: String },
}

impl RequestedCertificate {
    #[must_use]
    pub fn bundle(
        name: impl Into<String>,
        role: impl Into<String>,
        request: CertificateRequest,
    ) -> Self {
        RequestedCertificate::Bundle {
            name: name.into(),
            role: role.into(),
            request,
        }
    }

    #[must_use]
    pub fn trust_anchor(name: impl Into<String>, issuer: impl Into<String>) -> Self {
        RequestedCertificate::TrustAnchor {
            name: name.into(),
            issuer: issuer.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            RequestedCertificate::Bundle { name, .. }
            | RequestedCertificate::TrustAnchor { name, .. } => name,
        }
    }

    fn is_bundle(&self) -> bool {
        matches!(self, RequestedCertificate::Bundle { .. })
    }
}

/// The current material of a managed certificate.
#[derive(Debug, Clone)]
pub struct CertificateHolder {
    certificate: IssuedCertificate,
    not_after: SystemTime,
}

impl CertificateHolder {
    #[must_use]
    pub fn certificate(&self) -> &IssuedCertificate {
        &self.certificate
    }

    #[must_use]
    pub fn not_after(&self) -> SystemTime {
        self.not_after
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Initial,
    Started,
    Destroyed,
}

struct Registration {
    requested: RequestedCertificate,
    holder: Option<CertificateHolder>,
    task: Option<ScheduledTask>,
    generation: u64,
    obtained: bool,
}

struct ContainerState {
    lifecycle: Lifecycle,
    registrations: HashMap<String, Registration>,
}

/// Container managing a set of requested certificates. Cloning is cheap and
/// clones share all state.
#[derive(Clone)]
pub struct CertificateContainer {
    inner: Arc<ContainerInner>,
}

impl std::fmt::Debug for CertificateContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateContainer").finish_non_exhaustive()
    }
}

struct ContainerInner {
    authority: Arc<dyn CertificateAuthority>,
    publisher: CertificateEventPublisher,
    state: Mutex<ContainerState>,
    threshold: Mutex<Duration>,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    scheduler: TaskScheduler,
    generation: AtomicU64,
}

impl Drop for ContainerInner {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            for registration in state.registrations.values_mut() {
                if let Some(task) = registration.task.take() {
                    task.cancel();
                }
            }
        }
    }
}

impl CertificateContainer {
    /// Create a container with default settings: 60 s expiry threshold,
    /// system clock, random jitter.
    #[must_use]
    pub fn new(authority: Arc<dyn CertificateAuthority>) -> Self {
        Self::builder(authority).build()
    }

    /// Start building a container.
    #[must_use]
    pub fn builder(authority: Arc<dyn CertificateAuthority>) -> CertificateContainerBuilder {
        CertificateContainerBuilder {
            authority,
            threshold: DEFAULT_EXPIRY_THRESHOLD,
            clock: Arc::new(SystemClock),
            jitter: Arc::new(RandomJitter),
            scheduler: TaskScheduler,
        }
    }

    /// Add a certificate. On a running container it is obtained and
    /// scheduled immediately. Re-registering the same value is a no-op.
    ///
    /// # Errors
    /// Fails with [`Error::State`] after [`CertificateContainer::destroy`].
    pub async fn register(&self, requested: RequestedCertificate) -> Result<()> {
        self.register_internal(requested, None).await
    }

    /// As [`CertificateContainer::register`], additionally subscribing a
    /// listener that sees only this certificate's events.
    ///
    /// # Errors
    /// Fails with [`Error::State`] after [`CertificateContainer::destroy`].
    pub async fn register_with_listener(
        &self,
        requested: RequestedCertificate,
        listener: impl CertificateListener + 'static,
    ) -> Result<()> {
        self.register_internal(requested, Some(Arc::new(listener)))
            .await
    }

    async fn register_internal(
        &self,
        requested: RequestedCertificate,
        listener: Option<Arc<dyn CertificateListener>>,
    ) -> Result<()> {
        let name = requested.name().to_string();
        let obtain_now = {
            let mut guard = self.inner.state.lock().expect("Non-poisoned lock");
            let state = &mut *guard;
            if state.lifecycle == Lifecycle::Destroyed {
                return Err(Error::State("Certificate container is destroyed".into()));
            }
            let same_value = state
                .registrations
                .get(&name)
                .is_some_and(|existing| existing.requested == requested);
            if same_value {
                if let Some(listener) = listener {
                    self.inner.publisher.add_scoped(&name, listener);
                }
                return Ok(());
            }
            if let Some(mut existing) = state.registrations.remove(&name) {
                if let Some(task) = existing.task.take() {
                    task.cancel();
                }
            }
            state.registrations.insert(
                name.clone(),
                Registration {
                    requested,
                    holder: None,
                    task: None,
                    generation: self.inner.next_generation(),
                    obtained: false,
                },
            );
            state.lifecycle == Lifecycle::Started
        };
        if let Some(listener) = listener {
            self.inner.publisher.add_scoped(&name, listener);
        }
        if obtain_now {
            ContainerInner::obtain_and_schedule(&self.inner, &name).await;
        }
        Ok(())
    }

    /// Remove a certificate: cancel its rotation and drop its listeners.
    /// Emits no event. Returns whether it was present.
    pub fn unregister(&self, requested: &RequestedCertificate) -> bool {
        let removed = {
            let mut state = self.inner.state.lock().expect("Non-poisoned lock");
            state.registrations.remove(requested.name())
        };
        let Some(mut registration) = removed else {
            return false;
        };
        if let Some(task) = registration.task.take() {
            task.cancel();
        }
        self.inner.publisher.remove_scoped(requested.name());
        true
    }

    /// Obtain every registered certificate and schedule its rotation.
    /// Idempotent while running; a stopped container can be started again.
    ///
    /// # Errors
    /// Fails with [`Error::State`] after [`CertificateContainer::destroy`].
    pub async fn start(&self) -> Result<()> {
        let names = {
            let mut state = self.inner.state.lock().expect("Non-poisoned lock");
            match state.lifecycle {
                Lifecycle::Destroyed => {
                    return Err(Error::State("Certificate container is destroyed".into()))
                }
                Lifecycle::Started => return Ok(()),
                Lifecycle::Initial => {}
            }
            state.lifecycle = Lifecycle::Started;
            state.registrations.keys().cloned().collect::<Vec<_>>()
        };
        for name in names {
            ContainerInner::obtain_and_schedule(&self.inner, &name).await;
        }
        Ok(())
    }

    /// Cancel all rotations and drop all holders, keeping registrations and
    /// listeners. A subsequent [`CertificateContainer::start`] re-issues
    /// everything and re-emits obtained events.
    pub fn stop(&self) {
        let mut state = self.inner.state.lock().expect("Non-poisoned lock");
        if state.lifecycle != Lifecycle::Started {
            return;
        }
        state.lifecycle = Lifecycle::Initial;
        for registration in state.registrations.values_mut() {
            if let Some(task) = registration.task.take() {
                task.cancel();
            }
            registration.holder = None;
            registration.obtained = false;
            registration.generation = self.inner.next_generation();
        }
    }

    /// Terminal: cancel all rotations, clear registrations and listeners.
    /// Idempotent.
    pub fn destroy(&self) {
        {
            let mut state = self.inner.state.lock().expect("Non-poisoned lock");
            if state.lifecycle == Lifecycle::Destroyed {
                return;
            }
            state.lifecycle = Lifecycle::Destroyed;
            for (_, mut registration) in state.registrations.drain() {
                if let Some(task) = registration.task.take() {
                    task.cancel();
                }
            }
        }
        self.inner.publisher.clear();
    }

    /// Force rotation of a managed certificate now. Fetch failures surface
    /// as [`CertificateEvent::Error`], not as a return value.
    ///
    /// # Errors
    /// - [`Error::State`] if the container is not running.
    /// - [`Error::Certificate`] if the certificate is not managed.
    pub async fn rotate(&self, requested: &RequestedCertificate) -> Result<()> {
        {
            let state = self.inner.state.lock().expect("Non-poisoned lock");
            if state.lifecycle != Lifecycle::Started {
                return Err(Error::State(
                    "Certificate container is not started".into(),
                ));
            }
            if !state.registrations.contains_key(requested.name()) {
                return Err(Error::Certificate(format!(
                    "Certificate {} is not managed by this container",
                    requested.name()
                )));
            }
        }
        ContainerInner::obtain_and_schedule(&self.inner, requested.name()).await;
        Ok(())
    }

    /// The current holder of a managed certificate, if one has been obtained.
    #[must_use]
    pub fn current(&self, requested: &RequestedCertificate) -> Option<CertificateHolder> {
        self.inner
            .state
            .lock()
            .expect("Non-poisoned lock")
            .registrations
            .get(requested.name())
            .and_then(|registration| registration.holder.clone())
    }

    /// Minimum lead time before `notAfter` at which a certificate is due.
    /// Applies to rotations scheduled after the call. Default is 60 s.
    pub fn set_expiry_threshold(&self, threshold: Duration) {
        *self.inner.threshold.lock().expect("Non-poisoned lock") = threshold;
    }

    /// Subscribe to the events of every managed certificate.
    pub fn add_listener(
        &self,
        listener: impl CertificateListener + 'static,
    ) -> Arc<dyn CertificateListener> {
        let listener: Arc<dyn CertificateListener> = Arc::new(listener);
        self.inner.publisher.add_listener(Arc::clone(&listener));
        listener
    }
}

impl ContainerInner {
    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn threshold(&self) -> Duration {
        *self.threshold.lock().expect("Non-poisoned lock")
    }

    /// Fetch the certificate, install the holder and schedule the next
    /// rotation. A fetch whose registration was replaced or unregistered in
    /// the meantime is stale and discarded.
    async fn obtain_and_schedule(inner: &Arc<Self>, name: &str) {
        let snapshot = {
            let state = inner.state.lock().expect("Non-poisoned lock");
            state.registrations.get(name).map(|registration| {
                (
                    registration.requested.clone(),
                    registration.generation,
                    registration.holder.clone(),
                    !registration.obtained,
                )
            })
        };
        let Some((requested, entry_generation, outgoing, first)) = snapshot else {
            return;
        };

        let fetched = match &requested {
            RequestedCertificate::Bundle {
                name,
                role,
                request,
            } => inner.authority.issue_certificate(name, role, request).await,
            RequestedCertificate::TrustAnchor { name, issuer } => {
                inner.authority.get_issuer_certificate(name, issuer).await
            }
        };
        let certificate = match fetched {
            Ok(certificate) => certificate,
            Err(error) => {
                tracing::warn!("Fetching certificate {name} failed: {error}");
                inner.publisher.publish(&CertificateEvent::Error {
                    name: name.to_string(),
                    error,
                });
                return;
            }
        };
        let not_after = match certificate.not_after() {
            Ok(not_after) => not_after,
            Err(error) => {
                inner.publisher.publish(&CertificateEvent::Error {
                    name: name.to_string(),
                    error,
                });
                return;
            }
        };

        let serial = certificate.serial().unwrap_or_default();
        let holder = CertificateHolder {
            certificate,
            not_after,
        };
        let threshold = inner.threshold();
        let now = inner.clock.now();
        if !Self::install(inner, name, entry_generation, holder, not_after, threshold, now) {
            return;
        }

        let name = name.to_string();
        let event = match (requested.is_bundle(), first) {
            (true, true) => CertificateEvent::BundleIssued {
                name: name.clone(),
                serial,
            },
            (true, false) => CertificateEvent::BundleRotated {
                name: name.clone(),
                serial,
            },
            (false, true) => CertificateEvent::Obtained {
                name: name.clone(),
                serial,
            },
            (false, false) => CertificateEvent::Rotated {
                name: name.clone(),
                serial,
            },
        };
        inner.publisher.publish(&event);
        if let Some(outgoing) = outgoing {
            if now >= outgoing.not_after {
                inner
                    .publisher
                    .publish(&CertificateEvent::Expired { name });
            }
        }
    }

    fn install(
        inner: &Arc<Self>,
        name: &str,
        entry_generation: u64,
        holder: CertificateHolder,
        not_after: SystemTime,
        threshold: Duration,
        now: SystemTime,
    ) -> bool {
        let mut guard = inner.state.lock().expect("Non-poisoned lock");
        let state = &mut *guard;
        if state.lifecycle != Lifecycle::Started {
            return false;
        }
        let Some(registration) = state.registrations.get_mut(name) else {
            return false;
        };
        if registration.generation != entry_generation {
            return false;
        }
        let generation = inner.next_generation();
        registration.generation = generation;
        registration.holder = Some(holder);
        registration.obtained = true;

        let remaining = not_after.duration_since(now).unwrap_or(Duration::ZERO);
        let delay = renewal_delay(remaining, threshold, inner.jitter.as_ref());
        tracing::debug!(
            "Scheduling rotation of certificate {name} in {}s",
            delay.as_secs()
        );
        let weak = Arc::downgrade(inner);
        let task_name = name.to_string();
        let task = inner
            .scheduler
            .schedule(OneShotTrigger::after(delay), move || {
                let weak = weak.clone();
                let name = task_name.clone();
                async move {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let fresh = {
                        let state = inner.state.lock().expect("Non-poisoned lock");
                        state.lifecycle == Lifecycle::Started
                            && state
                                .registrations
                                .get(&name)
                                .is_some_and(|registration| registration.generation == generation)
                    };
                    if fresh {
                        Self::obtain_and_schedule(&inner, &name).await;
                    }
                }
            });
        if let Some(previous) = registration.task.replace(task) {
            previous.cancel();
        }
        true
    }
}

/// Builder for [`CertificateContainer`].
pub struct CertificateContainerBuilder {
    authority: Arc<dyn CertificateAuthority>,
    threshold: Duration,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    scheduler: TaskScheduler,
}

impl std::fmt::Debug for CertificateContainerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateContainerBuilder")
            .field("threshold", &self.threshold)
            .finish_non_exhaustive()
    }
}

impl CertificateContainerBuilder {
    /// Lead time before `notAfter` at which rotation is attempted.
    /// Default is 60 seconds.
    #[must_use]
    pub fn expiry_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    #[must_use]
    pub fn jitter_source(mut self, jitter: impl JitterSource + 'static) -> Self {
        self.jitter = Arc::new(jitter);
        self
    }

    #[must_use]
    pub fn build(self) -> CertificateContainer {
        CertificateContainer {
            inner: Arc::new(ContainerInner {
                authority: self.authority,
                publisher: CertificateEventPublisher::new(),
                state: Mutex::new(ContainerState {
                    lifecycle: Lifecycle::Initial,
                    registrations: HashMap::new(),
                }),
                threshold: Mutex::new(self.threshold),
                clock: self.clock,
                jitter: self.jitter,
                scheduler: self.scheduler,
                generation: AtomicU64::new(0),
            }),
        }
    }
}
