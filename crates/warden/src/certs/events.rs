//! Certificate lifecycle events and their publisher.
//!
//! Listeners registered against a specific certificate only see events whose
//! source carries that certificate's name; container-wide listeners see
//! everything.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use crate::error::Error;

/// Events dispatched by the certificate container. The `name` identifies the
/// requested certificate the event belongs to.
#[derive(Debug, Clone)]
pub enum CertificateEvent {
    /// First successful fetch of a trust-anchor certificate.
    Obtained { name: String, serial: String },
    /// First successful issuance of a bundle.
    BundleIssued { name: String, serial: String },
    /// Subsequent successful fetch of a trust-anchor certificate.
    Rotated { name: String, serial: String },
    /// Subsequent successful issuance of a bundle.
    BundleRotated { name: String, serial: String },
    /// An outgoing holder was rotated out after its own `notAfter` had
    /// already passed.
    Expired { name: String },
    /// Issuance or rotation failed. The previous holder, if any, stays in
    /// place.
    Error { name: String, error: Error },
}

impl CertificateEvent {
    /// Name of the requested certificate this event belongs to.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            CertificateEvent::Obtained { name, .. }
            | CertificateEvent::BundleIssued { name, .. }
            | CertificateEvent::Rotated { name, .. }
            | CertificateEvent::BundleRotated { name, .. }
            | CertificateEvent::Expired { name }
            | CertificateEvent::Error { name, .. } => name,
        }
    }
}

/// Receives certificate lifecycle events.
pub trait CertificateListener: Send + Sync {
    fn on_certificate_event(&self, event: &CertificateEvent);
}

impl<F> CertificateListener for F
where
    F: Fn(&CertificateEvent) + Send + Sync,
{
    fn on_certificate_event(&self, event: &CertificateEvent) {
        self(event);
    }
}

/// Copy-on-write publisher with per-certificate sharding.
pub(crate) struct CertificateEventPublisher {
    listeners: RwLock<Arc<Vec<Arc<dyn CertificateListener>>>>,
    scoped: RwLock<Arc<HashMap<String, Vec<Arc<dyn CertificateListener>>>>>,
}

impl std::fmt::Debug for CertificateEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateEventPublisher").finish_non_exhaustive()
    }
}

impl CertificateEventPublisher {
    pub(crate) fn new() -> Self {
        Self {
            listeners: RwLock::new(Arc::new(Vec::new())),
            scoped: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn CertificateListener>) {
        let mut guard = self.listeners.write().expect("Non-poisoned lock");
        let mut next = (**guard).clone();
        next.push(listener);
        *guard = Arc::new(next);
    }

    /// Subscribe a listener to events of one certificate.
    pub(crate) fn add_scoped(&self, name: &str, listener: Arc<dyn CertificateListener>) {
        let mut guard = self.scoped.write().expect("Non-poisoned lock");
        let mut next = (**guard).clone();
        next.entry(name.to_string()).or_default().push(listener);
        *guard = Arc::new(next);
    }

    /// Drop all listeners of one certificate.
    pub(crate) fn remove_scoped(&self, name: &str) {
        let mut guard = self.scoped.write().expect("Non-poisoned lock");
        let mut next = (**guard).clone();
        next.remove(name);
        *guard = Arc::new(next);
    }

    pub(crate) fn clear(&self) {
        *self.listeners.write().expect("Non-poisoned lock") = Arc::new(Vec::new());
        *self.scoped.write().expect("Non-poisoned lock") = Arc::new(HashMap::new());
    }

    pub(crate) fn publish(&self, event: &CertificateEvent) {
        let global = Arc::clone(&self.listeners.read().expect("Non-poisoned lock"));
        for listener in global.iter() {
            dispatch(listener, event);
        }
        let scoped = Arc::clone(&self.scoped.read().expect("Non-poisoned lock"));
        if let Some(listeners) = scoped.get(event.name()) {
            for listener in listeners {
                dispatch(listener, event);
            }
        }
    }
}

fn dispatch(listener: &Arc<dyn CertificateListener>, event: &CertificateEvent) {
    let listener = Arc::clone(listener);
    if catch_unwind(AssertUnwindSafe(|| listener.on_certificate_event(event))).is_err() {
        tracing::warn!("Certificate event listener panicked; continuing dispatch");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use super::*;

    fn recording() -> (Arc<Mutex<Vec<String>>>, Arc<dyn CertificateListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_listener = Arc::clone(&seen);
        let listener: Arc<dyn CertificateListener> =
            Arc::new(move |event: &CertificateEvent| {
                seen_in_listener
                    .lock()
                    .unwrap()
                    .push(event.name().to_string());
            });
        (seen, listener)
    }

    #[test]
    fn test_scoped_listener_sees_only_its_source() {
        let publisher = CertificateEventPublisher::new();
        let (seen, listener) = recording();
        publisher.add_scoped("cert-a", listener);

        publisher.publish(&CertificateEvent::Expired {
            name: "cert-a".into(),
        });
        publisher.publish(&CertificateEvent::Expired {
            name: "cert-b".into(),
        });
        assert_eq!(seen.lock().unwrap().clone(), vec!["cert-a".to_string()]);
    }

    #[test]
    fn test_global_listener_sees_everything() {
        let publisher = CertificateEventPublisher::new();
        let (seen, listener) = recording();
        publisher.add_listener(listener);

        publisher.publish(&CertificateEvent::Expired {
            name: "cert-a".into(),
        });
        publisher.publish(&CertificateEvent::Expired {
            name: "cert-b".into(),
        });
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_removed_scope_stops_receiving() {
        let publisher = CertificateEventPublisher::new();
        let (seen, listener) = recording();
        publisher.add_scoped("cert-a", listener);
        publisher.remove_scoped("cert-a");
        publisher.publish(&CertificateEvent::Expired {
            name: "cert-a".into(),
        });
        assert!(seen.lock().unwrap().is_empty());
    }
}
