//! Notification dispatch.
//!
//! [`Dispatcher::notify`] is the single entry point for creating a
//! notification. It persists the row, pushes the live in-app message, asks
//! the [`PreferenceResolver`] what to do with each external method, and hands
//! the methods that should be sent now to a bounded job queue. A fixed pool
//! of worker tasks drains the queue, calls each [`ChannelAdapter`] under a
//! timeout, and records every attempt in the delivery funnel.
//!
//! `notify` never waits for external channels. It fails only when the input
//! is invalid or the notification cannot be stored.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chrono_tz::Tz;
use futures::future::join_all;
use herald_core::categories::CategoryRegistry;
use herald_core::channels::DeliveryMethod;
use herald_core::error::CoreError;
use herald_core::funnel::{REASON_NO_ADAPTER, REASON_QUEUE_FULL, REASON_TIMEOUT};
use herald_core::types::DbId;
use herald_db::models::analytics::AttemptKey;
use herald_db::models::digest::NewDigestEntry;
use herald_db::models::notification::{CreateNotification, Notification};
use herald_db::models::recipient::Recipient;
use herald_db::SharedStore;
use serde::Deserialize;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::delivery::{AdapterTable, DeliveryOutcome};
use crate::preferences::PreferenceResolver;
use crate::tracker::{DeliveryFunnelTracker, TrackOutcome};

/// Failure reason recorded when the worker pool has already stopped.
pub const REASON_DISPATCHER_STOPPED: &str = "dispatcher_stopped";

// ---------------------------------------------------------------------------
// DispatchConfig
// ---------------------------------------------------------------------------

const DEFAULT_WORKERS: usize = 4;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;
const DEFAULT_ENQUEUE_TIMEOUT_MS: u64 = 250;
pub(crate) const DEFAULT_CHANNEL_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of worker tasks draining the queue.
    pub workers: usize,
    /// Jobs the queue holds before `notify` starts waiting.
    pub queue_capacity: usize,
    /// How long `notify` waits for queue space before giving up.
    pub enqueue_timeout: Duration,
    /// Upper bound on a single adapter call.
    pub channel_timeout: Duration,
    /// Zone quiet-hours windows are evaluated in.
    pub timezone: Tz,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: Duration::from_millis(DEFAULT_ENQUEUE_TIMEOUT_MS),
            channel_timeout: Duration::from_secs(DEFAULT_CHANNEL_TIMEOUT_SECS),
            timezone: Tz::UTC,
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables. Unparseable values
    /// fall back to the default.
    ///
    /// | Variable                      | Default |
    /// |-------------------------------|---------|
    /// | `DISPATCH_WORKERS`            | `4`     |
    /// | `DISPATCH_QUEUE_CAPACITY`     | `1024`  |
    /// | `DISPATCH_ENQUEUE_TIMEOUT_MS` | `250`   |
    /// | `CHANNEL_TIMEOUT_SECS`        | `15`    |
    /// | `QUIET_HOURS_TZ`              | `UTC`   |
    pub fn from_env() -> Self {
        let timezone = match std::env::var("QUIET_HOURS_TZ") {
            Ok(name) => name.parse::<Tz>().unwrap_or_else(|e| {
                tracing::warn!(value = %name, error = %e, "Invalid QUIET_HOURS_TZ, using UTC");
                Tz::UTC
            }),
            Err(_) => Tz::UTC,
        };

        Self {
            workers: env_or("DISPATCH_WORKERS", DEFAULT_WORKERS).max(1),
            queue_capacity: env_or("DISPATCH_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY).max(1),
            enqueue_timeout: Duration::from_millis(env_or(
                "DISPATCH_ENQUEUE_TIMEOUT_MS",
                DEFAULT_ENQUEUE_TIMEOUT_MS,
            )),
            channel_timeout: Duration::from_secs(env_or(
                "CHANNEL_TIMEOUT_SECS",
                DEFAULT_CHANNEL_TIMEOUT_SECS,
            )),
            timezone,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Optional parts of a notification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationExtra {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// External methods to send one notification over.
#[derive(Debug, Clone)]
pub struct DispatchJob {
    pub notification: Notification,
    pub methods: Vec<DeliveryMethod>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Dispatcher {
    store: SharedStore,
    categories: Arc<CategoryRegistry>,
    adapters: AdapterTable,
    resolver: PreferenceResolver,
    tracker: DeliveryFunnelTracker,
    queue: mpsc::Sender<DispatchJob>,
    enqueue_timeout: Duration,
}

/// Handles of the running worker tasks.
pub struct DispatchWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl DispatchWorkers {
    /// Wait for every worker to exit. Workers stop when the cancellation
    /// token passed to [`Dispatcher::start`] fires, after draining the jobs
    /// already queued.
    pub async fn join(self) {
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch worker panicked");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Dispatcher {
    /// Build the dispatcher and spawn its worker pool.
    pub fn start(
        store: SharedStore,
        categories: Arc<CategoryRegistry>,
        adapters: AdapterTable,
        config: &DispatchConfig,
        cancel: CancellationToken,
    ) -> (Self, DispatchWorkers) {
        let (queue, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let tracker = DeliveryFunnelTracker::new(store.clone());

        let worker = Worker {
            store: store.clone(),
            adapters: adapters.clone(),
            tracker: tracker.clone(),
            channel_timeout: config.channel_timeout,
        };
        let handles = (0..config.workers.max(1))
            .map(|index| {
                let worker = worker.clone();
                let receiver = Arc::clone(&receiver);
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.run(index, receiver, cancel).await })
            })
            .collect::<Vec<_>>();

        tracing::info!(
            workers = handles.len(),
            queue_capacity = config.queue_capacity,
            channel_timeout_ms = config.channel_timeout.as_millis() as u64,
            timezone = %config.timezone,
            "Dispatcher started"
        );

        let resolver = PreferenceResolver::new(store.clone(), Arc::clone(&categories), config.timezone);
        let dispatcher = Self {
            store,
            categories,
            adapters,
            resolver,
            tracker,
            queue,
            enqueue_timeout: config.enqueue_timeout,
        };
        (dispatcher, DispatchWorkers { handles })
    }

    pub fn resolver(&self) -> &PreferenceResolver {
        &self.resolver
    }

    pub fn tracker(&self) -> &DeliveryFunnelTracker {
        &self.tracker
    }

    pub fn categories(&self) -> &CategoryRegistry {
        &self.categories
    }

    pub fn adapters(&self) -> &AdapterTable {
        &self.adapters
    }

    /// Create a notification and route it to every channel the user wants.
    ///
    /// Returns the stored notification whatever happens on the channels.
    pub async fn notify(
        &self,
        user_id: DbId,
        category: &str,
        title: &str,
        message: &str,
        extra: NotificationExtra,
    ) -> Result<Notification, CoreError> {
        self.categories.validate(category)?;
        if title.trim().is_empty() {
            return Err(CoreError::Validation("Notification title must not be empty".into()));
        }
        if message.trim().is_empty() {
            return Err(CoreError::Validation("Notification message must not be empty".into()));
        }

        let input = CreateNotification {
            user_id,
            category: category.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            link: extra.link,
            icon: extra.icon,
            data: extra.data,
        };
        let notification = self.store.create_notification(&input).await?;
        tracing::debug!(
            notification_id = notification.id,
            user_id,
            category,
            "Notification created"
        );

        self.deliver_in_app(&notification).await;

        let resolved = match self.resolver.resolve(user_id, category).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::error!(
                    notification_id = notification.id,
                    user_id,
                    error = %e,
                    "Failed to resolve preferences, skipping external channels"
                );
                return Ok(notification);
            }
        };
        let plan = self.resolver.plan(&resolved, Utc::now());

        for (method, reason) in &plan.suppressed {
            let key = attempt_key(&notification, *method);
            self.tracker.track_failed(key, category, *reason).await;
            tracing::debug!(
                notification_id = notification.id,
                method = %method,
                reason,
                "Delivery suppressed"
            );
        }

        for (method, frequency) in &plan.digest {
            let entry = NewDigestEntry {
                user_id,
                notification_id: notification.id,
                method: method.as_str().to_string(),
                frequency: frequency.as_str().to_string(),
            };
            if let Err(e) = self.store.enqueue_digest(&entry).await {
                tracing::error!(
                    notification_id = notification.id,
                    method = %method,
                    error = %e,
                    "Failed to queue notification for digest"
                );
            }
        }

        if !plan.deliver.is_empty() {
            self.submit(DispatchJob {
                notification: notification.clone(),
                methods: plan.deliver,
            })
            .await;
        }

        Ok(notification)
    }

    /// Push the live message and record the in-app attempt.
    async fn deliver_in_app(&self, notification: &Notification) {
        let outcome = match self.adapters.get(DeliveryMethod::InApp) {
            Some(adapter) => adapter.send(&Recipient::unknown(notification.user_id), notification).await,
            None => DeliveryOutcome::failed(REASON_NO_ADAPTER),
        };
        let key = attempt_key(notification, DeliveryMethod::InApp);
        record(&self.tracker, key, &notification.category, &outcome).await;
    }

    /// Put a job on the queue, waiting at most the enqueue timeout. A job
    /// that cannot be queued is recorded as failed for each of its methods.
    async fn submit(&self, job: DispatchJob) {
        let (job, reason) = match self.queue.send_timeout(job, self.enqueue_timeout).await {
            Ok(()) => return,
            Err(SendTimeoutError::Timeout(job)) => {
                tracing::warn!(
                    notification_id = job.notification.id,
                    "Dispatch queue full, dropping external delivery"
                );
                (job, REASON_QUEUE_FULL)
            }
            Err(SendTimeoutError::Closed(job)) => {
                tracing::error!(
                    notification_id = job.notification.id,
                    "Dispatch workers stopped, dropping external delivery"
                );
                (job, REASON_DISPATCHER_STOPPED)
            }
        };

        for method in &job.methods {
            let key = attempt_key(&job.notification, *method);
            self.tracker
                .track_failed(key, &job.notification.category, reason)
                .await;
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Worker {
    store: SharedStore,
    adapters: AdapterTable,
    tracker: DeliveryFunnelTracker,
    channel_timeout: Duration,
}

impl Worker {
    async fn run(
        self,
        index: usize,
        receiver: Arc<Mutex<mpsc::Receiver<DispatchJob>>>,
        cancel: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                job = async { receiver.lock().await.recv().await } => job,
            };
            match next {
                Some(job) => self.process(job).await,
                None => {
                    tracing::debug!(worker = index, "Dispatch queue closed");
                    return;
                }
            }
        }

        // Finish what was already accepted.
        loop {
            let next = receiver.lock().await.try_recv();
            match next {
                Ok(job) => self.process(job).await,
                Err(_) => break,
            }
        }
        tracing::info!(worker = index, "Dispatch worker shutting down");
    }

    async fn process(&self, job: DispatchJob) {
        let user_id = job.notification.user_id;
        let recipient = match self.store.find_recipient(user_id).await {
            Ok(Some(recipient)) => recipient,
            Ok(None) => Recipient::unknown(user_id),
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Failed to load recipient");
                Recipient::unknown(user_id)
            }
        };

        let attempts = job
            .methods
            .iter()
            .map(|method| self.attempt(&recipient, &job.notification, *method));
        join_all(attempts).await;
    }

    async fn attempt(&self, recipient: &Recipient, notification: &Notification, method: DeliveryMethod) {
        let outcome = match self.adapters.get(method) {
            Some(adapter) => {
                match tokio::time::timeout(self.channel_timeout, adapter.send(recipient, notification)).await {
                    Ok(outcome) => outcome,
                    Err(_) => DeliveryOutcome::failed(REASON_TIMEOUT),
                }
            }
            None => DeliveryOutcome::failed(REASON_NO_ADAPTER),
        };
        let key = attempt_key(notification, method);
        record(&self.tracker, key, &notification.category, &outcome).await;
    }
}

fn attempt_key(notification: &Notification, method: DeliveryMethod) -> AttemptKey {
    AttemptKey {
        notification_id: notification.id,
        user_id: notification.user_id,
        method,
    }
}

/// Record a channel outcome in the funnel.
pub(crate) async fn record(
    tracker: &DeliveryFunnelTracker,
    key: AttemptKey,
    category: &str,
    outcome: &DeliveryOutcome,
) -> TrackOutcome {
    if outcome.success {
        tracing::debug!(
            notification_id = key.notification_id,
            user_id = key.user_id,
            method = %key.method,
            detail = outcome.detail.as_deref().unwrap_or(""),
            "Delivery attempt sent"
        );
        tracker.track_sent(key, category).await
    } else {
        let reason = outcome.failure_reason();
        tracing::info!(
            notification_id = key.notification_id,
            user_id = key.user_id,
            method = %key.method,
            reason = %reason,
            "Delivery attempt failed"
        );
        tracker.track_failed(key, category, reason).await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use herald_db::MemoryStore;

    use super::*;

    fn start(config: &DispatchConfig) -> (Dispatcher, DispatchWorkers, CancellationToken) {
        let cancel = CancellationToken::new();
        let (dispatcher, workers) = Dispatcher::start(
            Arc::new(MemoryStore::new()),
            Arc::new(CategoryRegistry::builtin()),
            AdapterTable::new(),
            config,
            cancel.clone(),
        );
        (dispatcher, workers, cancel)
    }

    #[test]
    fn default_config_matches_documented_values() {
        let config = DispatchConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.enqueue_timeout, Duration::from_millis(250));
        assert_eq!(config.channel_timeout, Duration::from_secs(15));
        assert_eq!(config.timezone, Tz::UTC);
    }

    #[tokio::test]
    async fn spawns_configured_worker_count() {
        let config = DispatchConfig {
            workers: 3,
            ..DispatchConfig::default()
        };
        let (_dispatcher, workers, cancel) = start(&config);
        assert_eq!(workers.len(), 3);
        cancel.cancel();
        workers.join().await;
    }

    #[tokio::test]
    async fn rejects_unknown_category_and_blank_text() {
        let (dispatcher, workers, cancel) = start(&DispatchConfig::default());

        assert_matches!(
            dispatcher
                .notify(1, "no_such_category", "t", "m", NotificationExtra::default())
                .await,
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            dispatcher
                .notify(1, "system", "  ", "m", NotificationExtra::default())
                .await,
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            dispatcher
                .notify(1, "system", "t", "", NotificationExtra::default())
                .await,
            Err(CoreError::Validation(_))
        );

        cancel.cancel();
        workers.join().await;
    }

    #[tokio::test]
    async fn in_app_without_adapter_is_recorded_as_failed() {
        let (dispatcher, workers, cancel) = start(&DispatchConfig::default());
        let n = dispatcher
            .notify(1, "system", "Hello", "World", NotificationExtra::default())
            .await
            .unwrap();

        let key = attempt_key(&n, DeliveryMethod::InApp);
        let row = dispatcher.tracker().get(&key).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.failure_reason.as_deref(), Some(REASON_NO_ADAPTER));

        cancel.cancel();
        workers.join().await;
    }
}
