//! Delivery channels.
//!
//! Every channel implements [`ChannelAdapter`] and is registered in an
//! [`AdapterTable`] keyed by [`DeliveryMethod`]. Adapters report failures as
//! a [`DeliveryOutcome`] and never return errors to the dispatcher.

pub mod email;
pub mod in_app;
pub mod push;
pub mod templates;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use herald_core::channels::DeliveryMethod;
use herald_db::models::notification::Notification;
use herald_db::models::recipient::Recipient;
use serde::Serialize;

// ---------------------------------------------------------------------------
// DeliveryOutcome
// ---------------------------------------------------------------------------

/// Result of one channel attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    /// Provider response summary or failure reason.
    pub detail: Option<String>,
}

impl DeliveryOutcome {
    pub fn sent() -> Self {
        Self {
            success: true,
            detail: None,
        }
    }

    pub fn sent_with(detail: impl Into<String>) -> Self {
        Self {
            success: true,
            detail: Some(detail.into()),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: Some(detail.into()),
        }
    }

    /// Failure reason to record in the funnel.
    pub fn failure_reason(&self) -> String {
        self.detail
            .clone()
            .unwrap_or_else(|| "unknown_error".to_string())
    }
}

// ---------------------------------------------------------------------------
// ChannelAdapter
// ---------------------------------------------------------------------------

/// One way of reaching a user.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn method(&self) -> DeliveryMethod;

    async fn send(&self, recipient: &Recipient, notification: &Notification) -> DeliveryOutcome;
}

/// Registered adapters, keyed by the method they implement.
#[derive(Clone, Default)]
pub struct AdapterTable {
    adapters: HashMap<DeliveryMethod, Arc<dyn ChannelAdapter>>,
}

impl AdapterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter, replacing any previous one for the same method.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.method(), adapter);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, method: DeliveryMethod) -> Option<&Arc<dyn ChannelAdapter>> {
        self.adapters.get(&method)
    }

    /// Registered methods, sorted.
    pub fn methods(&self) -> Vec<DeliveryMethod> {
        let mut methods: Vec<_> = self.adapters.keys().copied().collect();
        methods.sort();
        methods
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(DeliveryMethod);

    #[async_trait]
    impl ChannelAdapter for Fixed {
        fn method(&self) -> DeliveryMethod {
            self.0
        }

        async fn send(&self, _: &Recipient, _: &Notification) -> DeliveryOutcome {
            DeliveryOutcome::sent()
        }
    }

    #[test]
    fn table_is_keyed_by_method() {
        let table = AdapterTable::new()
            .with(Arc::new(Fixed(DeliveryMethod::Push)))
            .with(Arc::new(Fixed(DeliveryMethod::Email)))
            .with(Arc::new(Fixed(DeliveryMethod::Push)));
        assert_eq!(table.methods(), vec![DeliveryMethod::Email, DeliveryMethod::Push]);
        assert!(table.get(DeliveryMethod::Webhook).is_none());
    }

    #[test]
    fn failure_reason_defaults() {
        let outcome = DeliveryOutcome {
            success: false,
            detail: None,
        };
        assert_eq!(outcome.failure_reason(), "unknown_error");
        assert_eq!(DeliveryOutcome::failed("smtp down").failure_reason(), "smtp down");
    }
}
