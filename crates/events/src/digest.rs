//! Digest notification scheduler.
//!
//! [`DigestScheduler`] runs as a background task. On every tick it looks for
//! users whose oldest pending digest entry is older than the digest window
//! (one day for `daily`, seven for `weekly`) and flushes what was held back:
//!
//! - entries held for email become a single summary email;
//! - entries held for any other channel are delivered one by one through
//!   that channel's adapter.
//!
//! Every flushed entry is marked compiled and its outcome recorded in the
//! funnel under the method it was held for. A transient email failure leaves
//! the email entries pending for the next tick; email that is not configured,
//! or a user without an address, fails them for good.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use herald_core::channels::DeliveryMethod;
use herald_core::error::CoreError;
use herald_core::funnel::{REASON_NO_ADAPTER, REASON_TIMEOUT};
use herald_core::policy::Frequency;
use herald_core::types::{DbId, Timestamp};
use herald_db::models::analytics::AttemptKey;
use herald_db::models::digest::DigestEntry;
use herald_db::models::notification::Notification;
use herald_db::models::recipient::Recipient;
use herald_db::SharedStore;
use tokio_util::sync::CancellationToken;

use crate::delivery::email::{EmailAdapter, EMAIL_NOT_CONFIGURED, NO_EMAIL_ADDRESS};
use crate::delivery::{AdapterTable, DeliveryOutcome};
use crate::dispatcher::{record, DEFAULT_CHANNEL_TIMEOUT_SECS};
use crate::tracker::DeliveryFunnelTracker;

/// How often the scheduler polls for due digests.
pub const DIGEST_CHECK_INTERVAL: Duration = Duration::from_secs(3600);

const DIGEST_FREQUENCIES: [Frequency; 2] = [Frequency::Daily, Frequency::Weekly];

/// Email failures that another attempt cannot fix.
const PERMANENT_EMAIL_FAILURES: [&str; 2] = [EMAIL_NOT_CONFIGURED, NO_EMAIL_ADDRESS];

// ---------------------------------------------------------------------------
// DigestScheduler
// ---------------------------------------------------------------------------

pub struct DigestScheduler {
    store: SharedStore,
    email: Arc<EmailAdapter>,
    adapters: AdapterTable,
    tracker: DeliveryFunnelTracker,
    interval: Duration,
    channel_timeout: Duration,
}

impl DigestScheduler {
    /// `adapters` delivers entries held for channels other than email.
    pub fn new(store: SharedStore, email: Arc<EmailAdapter>, adapters: AdapterTable) -> Self {
        Self {
            tracker: DeliveryFunnelTracker::new(store.clone()),
            store,
            email,
            adapters,
            interval: DIGEST_CHECK_INTERVAL,
            channel_timeout: Duration::from_secs(DEFAULT_CHANNEL_TIMEOUT_SECS),
        }
    }

    /// Override the polling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Override how long one held delivery may take.
    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    /// Run the scheduler loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Digest scheduler cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        tracing::error!(error = %e, "Failed to process digests");
                    }
                }
            }
        }
    }

    /// Flush every digest due at `now`. Returns the number of digest emails
    /// sent.
    pub async fn run_once(&self, now: Timestamp) -> Result<usize, CoreError> {
        let mut sent = 0;

        for frequency in DIGEST_FREQUENCIES {
            let Some(window) = frequency.digest_window() else {
                continue;
            };
            let pending = self.store.list_pending_digests(frequency.as_str()).await?;

            let mut by_user: BTreeMap<DbId, Vec<DigestEntry>> = BTreeMap::new();
            for entry in pending {
                by_user.entry(entry.user_id).or_default().push(entry);
            }

            for (user_id, entries) in by_user {
                let Some(oldest) = entries.iter().map(|e| e.created_at).min() else {
                    continue;
                };
                if now - oldest < window {
                    continue;
                }
                match self.flush_user(user_id, frequency, entries).await {
                    Ok(true) => sent += 1,
                    Ok(false) => {}
                    Err(e) => tracing::error!(
                        user_id,
                        frequency = %frequency,
                        error = %e,
                        "Failed to flush digest for user"
                    ),
                }
            }
        }

        if sent > 0 {
            tracing::info!(count = sent, "Processed digest deliveries");
        }
        Ok(sent)
    }

    /// Flush one user's due entries. Returns whether a digest email went out.
    async fn flush_user(
        &self,
        user_id: DbId,
        frequency: Frequency,
        entries: Vec<DigestEntry>,
    ) -> Result<bool, CoreError> {
        let ids: Vec<DbId> = entries
            .iter()
            .map(|e| e.notification_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut notifications = self.store.list_notifications_by_ids(user_id, &ids).await?;
        notifications.sort_by_key(|n| n.created_at);

        let recipient = self
            .store
            .find_recipient(user_id)
            .await?
            .unwrap_or_else(|| Recipient::unknown(user_id));

        let mut email_entries = Vec::new();
        let mut held_elsewhere = Vec::new();
        for entry in entries {
            match entry.method.parse::<DeliveryMethod>() {
                Ok(DeliveryMethod::Email) => email_entries.push(entry),
                Ok(method) => held_elsewhere.push((method, entry)),
                Err(e) => {
                    tracing::warn!(entry_id = entry.id, error = %e, "Dropping digest entry");
                    self.store.mark_digests_compiled(&[entry.id]).await?;
                }
            }
        }

        self.deliver_held(&recipient, &notifications, held_elsewhere).await?;

        if email_entries.is_empty() {
            return Ok(false);
        }
        self.send_email_digest(&recipient, frequency, &notifications, &email_entries)
            .await
    }

    /// Deliver entries held for non-email channels through their adapters.
    async fn deliver_held(
        &self,
        recipient: &Recipient,
        notifications: &[Notification],
        held: Vec<(DeliveryMethod, DigestEntry)>,
    ) -> Result<(), CoreError> {
        let by_id: HashMap<DbId, &Notification> = notifications.iter().map(|n| (n.id, n)).collect();

        for (method, entry) in held {
            if let Some(notification) = by_id.get(&entry.notification_id) {
                let outcome = match self.adapters.get(method) {
                    Some(adapter) => match tokio::time::timeout(
                        self.channel_timeout,
                        adapter.send(recipient, notification),
                    )
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => DeliveryOutcome::failed(REASON_TIMEOUT),
                    },
                    None => DeliveryOutcome::failed(REASON_NO_ADAPTER),
                };
                let key = AttemptKey {
                    notification_id: notification.id,
                    user_id: recipient.user_id,
                    method,
                };
                record(&self.tracker, key, &notification.category, &outcome).await;
            }
            self.store.mark_digests_compiled(&[entry.id]).await?;
        }
        Ok(())
    }

    /// Email the digest of `entries` and mark them compiled. Returns whether
    /// the email went out.
    async fn send_email_digest(
        &self,
        recipient: &Recipient,
        frequency: Frequency,
        notifications: &[Notification],
        entries: &[DigestEntry],
    ) -> Result<bool, CoreError> {
        let user_id = recipient.user_id;
        let held: BTreeSet<DbId> = entries.iter().map(|e| e.notification_id).collect();
        let included: Vec<Notification> = notifications
            .iter()
            .filter(|n| held.contains(&n.id))
            .cloned()
            .collect();

        let entry_ids: Vec<DbId> = entries.iter().map(|e| e.id).collect();
        if included.is_empty() {
            // Everything it referred to is gone.
            self.store.mark_digests_compiled(&entry_ids).await?;
            return Ok(false);
        }

        let outcome = self.email.send_digest(recipient, frequency, &included).await;
        if !outcome.success {
            let reason = outcome.failure_reason();
            if !PERMANENT_EMAIL_FAILURES.contains(&reason.as_str()) {
                tracing::warn!(
                    user_id,
                    frequency = %frequency,
                    reason = %reason,
                    "Digest email not sent, keeping entries"
                );
                return Ok(false);
            }
            tracing::info!(
                user_id,
                frequency = %frequency,
                reason = %reason,
                "Digest email cannot be sent, dropping entries"
            );
        }

        self.store.mark_digests_compiled(&entry_ids).await?;
        for notification in &included {
            let key = AttemptKey {
                notification_id: notification.id,
                user_id,
                method: DeliveryMethod::Email,
            };
            record(&self.tracker, key, &notification.category, &outcome).await;
        }

        if outcome.success {
            tracing::info!(
                user_id,
                frequency = %frequency,
                notification_count = included.len(),
                "Digest delivered"
            );
        }
        Ok(outcome.success)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use herald_db::models::digest::NewDigestEntry;
    use herald_db::models::notification::CreateNotification;
    use herald_db::{DigestStore, MemoryStore, NotificationStore};

    use super::*;
    use crate::delivery::email::{EmailError, MailTransport};
    use crate::delivery::templates::RenderedEmail;
    use crate::delivery::ChannelAdapter;

    #[derive(Default)]
    struct Outbox {
        subjects: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MailTransport for Outbox {
        async fn send(&self, _to: &str, email: &RenderedEmail) -> Result<(), EmailError> {
            self.subjects.lock().unwrap().push(email.subject.clone());
            Ok(())
        }
    }

    struct BrokenRelay;

    #[async_trait]
    impl MailTransport for BrokenRelay {
        async fn send(&self, _to: &str, _email: &RenderedEmail) -> Result<(), EmailError> {
            Err(EmailError::Build("relay down".into()))
        }
    }

    /// Push channel that records which notifications it was asked to send.
    #[derive(Default)]
    struct PushLog {
        sent: Mutex<Vec<DbId>>,
    }

    #[async_trait]
    impl ChannelAdapter for PushLog {
        fn method(&self) -> DeliveryMethod {
            DeliveryMethod::Push
        }

        async fn send(&self, _recipient: &Recipient, notification: &Notification) -> DeliveryOutcome {
            self.sent.lock().unwrap().push(notification.id);
            DeliveryOutcome::sent()
        }
    }

    async fn hold(store: &MemoryStore, user_id: DbId, method: &str, frequency: &str) -> DbId {
        let n = store
            .create_notification(&CreateNotification {
                user_id,
                category: "sms_received".into(),
                title: "New SMS".into(),
                message: "hello".into(),
                link: None,
                icon: None,
                data: None,
            })
            .await
            .unwrap();
        store
            .enqueue_digest(&NewDigestEntry {
                user_id,
                notification_id: n.id,
                method: method.into(),
                frequency: frequency.into(),
            })
            .await
            .unwrap();
        n.id
    }

    fn setup(transport: Option<Arc<dyn MailTransport>>, adapters: AdapterTable) -> (Arc<MemoryStore>, DigestScheduler) {
        let store = Arc::new(MemoryStore::new());
        store.add_user(Recipient {
            user_id: 1,
            email: Some("ada@example.com".into()),
            display_name: Some("Ada".into()),
        });
        let email = Arc::new(EmailAdapter::new(store.clone(), transport));
        let scheduler = DigestScheduler::new(store.clone(), email, adapters);
        (store, scheduler)
    }

    fn with_outbox(outbox: &Arc<Outbox>) -> Option<Arc<dyn MailTransport>> {
        Some(outbox.clone() as Arc<dyn MailTransport>)
    }

    fn key(notification_id: DbId, method: DeliveryMethod) -> AttemptKey {
        AttemptKey {
            notification_id,
            user_id: 1,
            method,
        }
    }

    #[tokio::test]
    async fn daily_digest_waits_for_its_window() {
        let outbox = Arc::new(Outbox::default());
        let (store, scheduler) = setup(with_outbox(&outbox), AdapterTable::new());
        hold(&store, 1, "email", "daily").await;
        hold(&store, 1, "email", "daily").await;

        assert_eq!(scheduler.run_once(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + ChronoDuration::hours(25);
        assert_eq!(scheduler.run_once(later).await.unwrap(), 1);
        assert_eq!(
            outbox.subjects.lock().unwrap().as_slice(),
            ["[Herald] Your daily summary (2 notifications)"]
        );
        assert!(store.list_pending_digests("daily").await.unwrap().is_empty());

        // Nothing left to send.
        assert_eq!(scheduler.run_once(later).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn weekly_entries_are_not_sent_after_a_day() {
        let outbox = Arc::new(Outbox::default());
        let (store, scheduler) = setup(with_outbox(&outbox), AdapterTable::new());
        hold(&store, 1, "email", "weekly").await;

        let tomorrow = Utc::now() + ChronoDuration::days(2);
        assert_eq!(scheduler.run_once(tomorrow).await.unwrap(), 0);

        let next_week = Utc::now() + ChronoDuration::days(8);
        assert_eq!(scheduler.run_once(next_week).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn push_entries_go_through_push_not_email() {
        let outbox = Arc::new(Outbox::default());
        let push = Arc::new(PushLog::default());
        let (store, scheduler) = setup(with_outbox(&outbox), AdapterTable::new().with(push.clone()));
        let id = hold(&store, 1, "push", "daily").await;

        let later = Utc::now() + ChronoDuration::hours(25);
        assert_eq!(scheduler.run_once(later).await.unwrap(), 0);

        assert!(outbox.subjects.lock().unwrap().is_empty());
        assert_eq!(push.sent.lock().unwrap().as_slice(), [id]);
        assert!(store.list_pending_digests("daily").await.unwrap().is_empty());

        let pushed = scheduler.tracker.get(&key(id, DeliveryMethod::Push)).await.unwrap().unwrap();
        assert_eq!(pushed.status, "sent");
        assert!(scheduler.tracker.get(&key(id, DeliveryMethod::Email)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mixed_entries_split_by_method() {
        let outbox = Arc::new(Outbox::default());
        let push = Arc::new(PushLog::default());
        let (store, scheduler) = setup(with_outbox(&outbox), AdapterTable::new().with(push.clone()));
        let mailed = hold(&store, 1, "email", "daily").await;
        let pushed = hold(&store, 1, "push", "daily").await;

        let later = Utc::now() + ChronoDuration::hours(25);
        assert_eq!(scheduler.run_once(later).await.unwrap(), 1);
        assert_eq!(
            outbox.subjects.lock().unwrap().as_slice(),
            ["[Herald] Your daily summary (1 notification)"]
        );
        assert_eq!(push.sent.lock().unwrap().as_slice(), [pushed]);
        assert!(scheduler.tracker.get(&key(pushed, DeliveryMethod::Email)).await.unwrap().is_none());
        assert!(scheduler.tracker.get(&key(mailed, DeliveryMethod::Push)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn held_entry_without_adapter_is_failed() {
        let (store, scheduler) = setup(None, AdapterTable::new());
        let id = hold(&store, 1, "webhook", "daily").await;

        scheduler
            .run_once(Utc::now() + ChronoDuration::hours(25))
            .await
            .unwrap();

        let row = scheduler.tracker.get(&key(id, DeliveryMethod::Webhook)).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.failure_reason.as_deref(), Some(REASON_NO_ADAPTER));
        assert!(store.list_pending_digests("daily").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_error_keeps_entries_pending() {
        let (store, scheduler) = setup(Some(Arc::new(BrokenRelay) as Arc<dyn MailTransport>), AdapterTable::new());
        let id = hold(&store, 1, "email", "daily").await;

        let later = Utc::now() + ChronoDuration::hours(25);
        assert_eq!(scheduler.run_once(later).await.unwrap(), 0);
        assert_eq!(store.list_pending_digests("daily").await.unwrap().len(), 1);
        assert!(scheduler.tracker.get(&key(id, DeliveryMethod::Email)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unconfigured_email_drains_entries_once() {
        let (store, scheduler) = setup(None, AdapterTable::new());
        let id = hold(&store, 1, "email", "daily").await;

        let later = Utc::now() + ChronoDuration::hours(25);
        assert_eq!(scheduler.run_once(later).await.unwrap(), 0);
        assert!(store.list_pending_digests("daily").await.unwrap().is_empty());

        let row = scheduler.tracker.get(&key(id, DeliveryMethod::Email)).await.unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(row.failure_reason.as_deref(), Some(EMAIL_NOT_CONFIGURED));
        assert_eq!(row.retry_count, 0);

        // The second tick has nothing to re-read.
        assert_eq!(scheduler.run_once(later + ChronoDuration::hours(1)).await.unwrap(), 0);
        let row = scheduler.tracker.get(&key(id, DeliveryMethod::Email)).await.unwrap().unwrap();
        assert_eq!(row.retry_count, 0);
    }

    #[tokio::test]
    async fn sent_digest_is_tracked_as_email() {
        let (store, scheduler) = setup(Some(Arc::new(Outbox::default()) as Arc<dyn MailTransport>), AdapterTable::new());
        let id = hold(&store, 1, "email", "daily").await;
        scheduler
            .run_once(Utc::now() + ChronoDuration::hours(25))
            .await
            .unwrap();

        let row = scheduler.tracker.get(&key(id, DeliveryMethod::Email)).await.unwrap().unwrap();
        assert_eq!(row.status, "sent");
    }
}
