//! Profile change notifications.
//!
//! Views that display a server profile subscribe to a [`ProfileEvents`]
//! subject and are told synchronously which field changed. Publishing only
//! happens from profile mutation, never while a query runs.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A profile field that can change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    /// Host name.
    Host,
    /// Port.
    Port,
    /// LDAPS flag.
    Secure,
    /// Operation timeout.
    Timeout,
    /// Base DN.
    BaseDn,
    /// Authentication kind or simple-bind parameters.
    Authentication,
    /// Kerberos principal.
    KerberosUsername,
    /// Kerberos password.
    KerberosPassword,
    /// Kerberos keytab.
    KerberosKeytab,
    /// Kerberos login configuration.
    KerberosLogin,
    /// Certificate validation flag.
    ValidateCertificates,
    /// Extra binary attribute names.
    BinaryAttributes,
}

/// One change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEvent {
    /// Host of the profile that changed, identifying the server.
    pub host: String,
    /// The field that changed.
    pub field: ProfileField,
}

/// Handle returned by [`ProfileEvents::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&ProfileEvent) + Send + Sync>;

/// Subject fanning profile events out to subscribers.
#[derive(Default)]
pub struct ProfileEvents {
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_id: AtomicU64,
}

impl ProfileEvents {
    /// Creates a subject with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&ProfileEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Calls every listener with `event`, in subscription order.
    ///
    /// Listeners run outside the subscriber lock and may subscribe or
    /// unsubscribe re-entrantly.
    pub fn publish(&self, event: &ProfileEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl fmt::Debug for ProfileEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileEvents")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
