//! Subscriber Registry
//!
//! Named callbacks that receive every decoded stream message.
//!
//! Names are unique: adding under an existing name swaps the callback in
//! place and keeps the original position. Dispatch runs callbacks in
//! registration order, outside the lock, so a callback may add or remove
//! subscribers without deadlocking. A failing or panicking callback is
//! reported and skipped; the rest still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::domain::location::LocationFeature;
use crate::infrastructure::metrics;

/// Subscriber callback failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriberError {
    /// The subscriber refused the message.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The subscriber panicked.
    #[error("subscriber panicked: {0}")]
    Panicked(String),
}

/// Callback invoked for each decoded message.
pub type SubscriberFn = Arc<dyn Fn(&LocationFeature) -> Result<(), SubscriberError> + Send + Sync>;

/// Result of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Callbacks that returned `Ok`.
    pub delivered: usize,
    /// Failed callbacks, by name.
    pub failures: Vec<(String, SubscriberError)>,
}

/// Registry of named subscribers.
#[derive(Default)]
pub struct SubscriberRegistry {
    entries: RwLock<Vec<(String, SubscriberFn)>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` under `name`, replacing any callback already
    /// registered under it.
    pub fn add<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&LocationFeature) -> Result<(), SubscriberError> + Send + Sync + 'static,
    {
        let name = name.into();
        let callback: SubscriberFn = Arc::new(callback);
        let mut entries = self.entries.write();

        if let Some(entry) = entries.iter_mut().find(|(existing, _)| *existing == name) {
            tracing::debug!(subscriber = %name, "Replacing subscriber");
            entry.1 = callback;
        } else {
            tracing::debug!(subscriber = %name, "Adding subscriber");
            entries.push((name, callback));
        }
    }

    /// Deregister `name`. Returns whether it was registered.
    pub fn remove(&self, name: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(existing, _)| existing != name);
        let removed = entries.len() != before;
        if removed {
            tracing::debug!(subscriber = %name, "Removed subscriber");
        }
        removed
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().iter().any(|(existing, _)| existing == name)
    }

    /// Registered names in dispatch order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.entries
            .read()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no subscriber is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Deliver `feature` to every subscriber in registration order.
    pub fn dispatch(&self, feature: &LocationFeature) -> DispatchReport {
        let entries = self.entries.read().clone();
        let mut report = DispatchReport::default();

        for (name, callback) in entries {
            let result = catch_unwind(AssertUnwindSafe(|| callback(feature)))
                .unwrap_or_else(|payload| Err(SubscriberError::Panicked(panic_message(&*payload))));

            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::error!(subscriber = %name, error = %e, "Subscriber failed");
                    metrics::record_subscriber_failure(&name);
                    report.failures.push((name, e));
                }
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
