#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use herald_core::categories::CategoryRegistry;
use herald_core::channels::DeliveryMethod;
use herald_db::models::analytics::{AttemptKey, DeliveryAnalytics};
use herald_db::models::notification::Notification;
use herald_db::models::preference::{PreferenceConfig, UpdatePreference};
use herald_db::models::recipient::Recipient;
use herald_db::MemoryStore;
use herald_events::{
    AdapterTable, ChannelAdapter, ConnectionRegistry, DeliveryFunnelTracker, DeliveryOutcome,
    DispatchConfig, DispatchWorkers, Dispatcher, EventBroadcaster, InAppAdapter,
};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fake adapters
// ---------------------------------------------------------------------------

/// Records every notification it is asked to send.
pub struct RecordingAdapter {
    method: DeliveryMethod,
    /// (recipient, notification id) per call.
    pub sent: Mutex<Vec<(Recipient, i64)>>,
}

impl RecordingAdapter {
    pub fn new(method: DeliveryMethod) -> Arc<Self> {
        Arc::new(Self {
            method,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn method(&self) -> DeliveryMethod {
        self.method
    }

    async fn send(&self, recipient: &Recipient, notification: &Notification) -> DeliveryOutcome {
        self.sent
            .lock()
            .unwrap()
            .push((recipient.clone(), notification.id));
        DeliveryOutcome::sent()
    }
}

/// Always fails with a fixed detail.
pub struct FailingAdapter {
    pub method: DeliveryMethod,
    pub detail: &'static str,
}

#[async_trait]
impl ChannelAdapter for FailingAdapter {
    fn method(&self) -> DeliveryMethod {
        self.method
    }

    async fn send(&self, _recipient: &Recipient, _notification: &Notification) -> DeliveryOutcome {
        DeliveryOutcome::failed(self.detail)
    }
}

/// Sleeps before succeeding.
pub struct SlowAdapter {
    pub method: DeliveryMethod,
    pub delay: Duration,
}

#[async_trait]
impl ChannelAdapter for SlowAdapter {
    fn method(&self) -> DeliveryMethod {
        self.method
    }

    async fn send(&self, _recipient: &Recipient, _notification: &Notification) -> DeliveryOutcome {
        tokio::time::sleep(self.delay).await;
        DeliveryOutcome::sent()
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: EventBroadcaster,
    pub dispatcher: Dispatcher,
    pub workers: DispatchWorkers,
    pub cancel: CancellationToken,
}

impl Harness {
    /// A dispatcher with the in-app adapter plus `extra` adapters.
    pub fn start(extra: Vec<Arc<dyn ChannelAdapter>>, config: DispatchConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.add_user(Recipient {
            user_id: 1,
            email: Some("ada@example.com".to_string()),
            display_name: Some("Ada".to_string()),
        });

        let registry = Arc::new(ConnectionRegistry::default());
        let broadcaster = EventBroadcaster::new(Arc::clone(&registry));

        let mut adapters =
            AdapterTable::new().with(Arc::new(InAppAdapter::new(broadcaster.clone())));
        for adapter in extra {
            adapters.register(adapter);
        }

        let cancel = CancellationToken::new();
        let (dispatcher, workers) = Dispatcher::start(
            store.clone(),
            Arc::new(CategoryRegistry::builtin()),
            adapters,
            &config,
            cancel.clone(),
        );

        Self {
            store,
            registry,
            broadcaster,
            dispatcher,
            workers,
            cancel,
        }
    }

    pub fn tracker(&self) -> &DeliveryFunnelTracker {
        self.dispatcher.tracker()
    }

    /// Give `user_id` an explicit instant preference for `category`.
    pub async fn prefer(&self, user_id: i64, category: &str, methods: &[&str]) {
        self.prefer_with(user_id, category, methods, "instant", None).await;
    }

    pub async fn prefer_with(
        &self,
        user_id: i64,
        category: &str,
        methods: &[&str],
        frequency: &str,
        quiet_hours: Option<(chrono::NaiveTime, chrono::NaiveTime)>,
    ) {
        let update = UpdatePreference {
            category: category.to_string(),
            config: PreferenceConfig {
                is_enabled: true,
                methods: methods.iter().map(|m| m.to_string()).collect(),
                quiet_hours_start: quiet_hours.map(|q| q.0),
                quiet_hours_end: quiet_hours.map(|q| q.1),
                frequency: frequency.to_string(),
                override_quiet_hours: false,
            },
        };
        self.dispatcher
            .resolver()
            .update_preferences(user_id, &[update])
            .await
            .unwrap();
    }

    /// Poll the funnel until the attempt exists, for up to two seconds.
    pub async fn wait_for_record(&self, key: AttemptKey) -> DeliveryAnalytics {
        for _ in 0..200 {
            if let Some(row) = self.tracker().get(&key).await.unwrap() {
                return row;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no delivery record for {key:?}");
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.workers.join().await;
    }
}

pub fn key(notification_id: i64, user_id: i64, method: DeliveryMethod) -> AttemptKey {
    AttemptKey {
        notification_id,
        user_id,
        method,
    }
}
