//! Preference resolution and management.
//!
//! The effective configuration for a (user, category) pair is the most
//! specific one found, used as-is:
//!
//! 1. the user's explicit `notification_preferences` row;
//! 2. the category's `notification_preference_defaults` row;
//! 3. the hard-coded baseline (`enabled`, `[in_app]`, `instant`, no quiet
//!    hours).

use std::sync::Arc;

use chrono_tz::Tz;
use herald_core::categories::CategoryRegistry;
use herald_core::error::CoreError;
use herald_core::policy::{local_time_of_day, plan_delivery, DeliveryPlan, DeliverySettings};
use herald_core::types::{DbId, Timestamp};
use herald_db::models::preference::{
    NotificationPreference, PreferenceConfig, PreferenceDefault, UpdatePreference,
};
use herald_db::SharedStore;
use serde::Serialize;

/// Where a resolved configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceSource {
    User,
    Default,
    Baseline,
}

/// The effective configuration of one (user, category) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPreference {
    pub category: String,
    pub settings: DeliverySettings,
    pub source: PreferenceSource,
}

/// A category's effective configuration as reported to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectivePreference {
    pub category: String,
    #[serde(flatten)]
    pub config: PreferenceConfig,
    /// `true` when the user has an explicit row for this category.
    pub customized: bool,
    pub source: PreferenceSource,
}

#[derive(Clone)]
pub struct PreferenceResolver {
    store: SharedStore,
    categories: Arc<CategoryRegistry>,
    timezone: Tz,
}

impl PreferenceResolver {
    /// `timezone` is the zone quiet-hours windows are evaluated in.
    pub fn new(store: SharedStore, categories: Arc<CategoryRegistry>, timezone: Tz) -> Self {
        Self {
            store,
            categories,
            timezone,
        }
    }

    pub fn categories(&self) -> &CategoryRegistry {
        &self.categories
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Resolve the effective configuration. Never returns "nothing": the
    /// baseline applies when no row exists.
    ///
    /// A stored row that cannot be interpreted is skipped with a warning and
    /// the next level is used.
    pub async fn resolve(
        &self,
        user_id: DbId,
        category: &str,
    ) -> Result<ResolvedPreference, CoreError> {
        if let Some(row) = self.store.get_preference(user_id, category).await? {
            match row.config().to_settings() {
                Ok(settings) => {
                    return Ok(ResolvedPreference {
                        category: category.to_string(),
                        settings,
                        source: PreferenceSource::User,
                    })
                }
                Err(e) => tracing::warn!(
                    user_id,
                    category,
                    error = %e,
                    "Ignoring unreadable user preference"
                ),
            }
        }

        if let Some(row) = self.store.get_default(category).await? {
            match row.config().to_settings() {
                Ok(settings) => {
                    return Ok(ResolvedPreference {
                        category: category.to_string(),
                        settings,
                        source: PreferenceSource::Default,
                    })
                }
                Err(e) => tracing::warn!(
                    category,
                    error = %e,
                    "Ignoring unreadable preference default"
                ),
            }
        }

        Ok(ResolvedPreference {
            category: category.to_string(),
            settings: DeliverySettings::baseline(),
            source: PreferenceSource::Baseline,
        })
    }

    /// Classify the external methods of `resolved` for a dispatch at `now`.
    pub fn plan(&self, resolved: &ResolvedPreference, now: Timestamp) -> DeliveryPlan {
        let urgent = self.categories.is_urgent(&resolved.category);
        let local = local_time_of_day(now, self.timezone);
        plan_delivery(&resolved.settings, urgent, local)
    }

    // -----------------------------------------------------------------------
    // Management
    // -----------------------------------------------------------------------

    /// Effective configuration for every known category, or for one.
    pub async fn get_preferences(
        &self,
        user_id: DbId,
        category: Option<&str>,
    ) -> Result<Vec<EffectivePreference>, CoreError> {
        let names: Vec<String> = match category {
            Some(name) => {
                self.categories.validate(name)?;
                vec![name.to_string()]
            }
            None => self.categories.names().map(str::to_string).collect(),
        };

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let resolved = self.resolve(user_id, &name).await?;
            out.push(EffectivePreference {
                config: PreferenceConfig::from(&resolved.settings),
                customized: resolved.source == PreferenceSource::User,
                source: resolved.source,
                category: name,
            });
        }
        Ok(out)
    }

    /// Create or replace explicit preferences. All entries are validated
    /// before any is written.
    pub async fn update_preferences(
        &self,
        user_id: DbId,
        updates: &[UpdatePreference],
    ) -> Result<Vec<NotificationPreference>, CoreError> {
        if updates.is_empty() {
            return Err(CoreError::Validation(
                "At least one preference is required".to_string(),
            ));
        }
        for update in updates {
            self.validate_config(&update.category, &update.config)?;
        }

        let mut saved = Vec::with_capacity(updates.len());
        for update in updates {
            saved.push(self.store.upsert_preference(user_id, update).await?);
        }
        tracing::info!(user_id, count = saved.len(), "Notification preferences updated");
        Ok(saved)
    }

    /// Delete every explicit preference of the user, reverting to defaults.
    pub async fn reset_preferences(&self, user_id: DbId) -> Result<u64, CoreError> {
        let removed = self.store.delete_preferences(user_id).await?;
        tracing::info!(user_id, removed, "Notification preferences reset");
        Ok(removed)
    }

    pub async fn get_defaults(&self) -> Result<Vec<PreferenceDefault>, CoreError> {
        Ok(self.store.list_defaults().await?)
    }

    pub async fn upsert_default(
        &self,
        category: &str,
        config: &PreferenceConfig,
    ) -> Result<PreferenceDefault, CoreError> {
        self.validate_config(category, config)?;
        let saved = self.store.upsert_default(category, config).await?;
        tracing::info!(category, "Notification preference default updated");
        Ok(saved)
    }

    fn validate_config(&self, category: &str, config: &PreferenceConfig) -> Result<(), CoreError> {
        self.categories.validate(category)?;
        if config.methods.is_empty() {
            return Err(CoreError::Validation(format!(
                "Preference for '{category}' must list at least one delivery method"
            )));
        }
        config.to_settings().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{NaiveTime, TimeZone, Utc};
    use herald_core::categories::{CATEGORY_LOW_BALANCE, CATEGORY_SMS_RECEIVED};
    use herald_core::channels::DeliveryMethod;
    use herald_core::funnel::REASON_QUIET_HOURS;
    use herald_core::policy::Frequency;
    use herald_db::MemoryStore;

    use super::*;

    fn resolver() -> PreferenceResolver {
        PreferenceResolver::new(
            Arc::new(MemoryStore::new()),
            Arc::new(CategoryRegistry::builtin()),
            chrono_tz::UTC,
        )
    }

    fn config(methods: &[&str], frequency: &str) -> PreferenceConfig {
        PreferenceConfig {
            is_enabled: true,
            methods: methods.iter().map(|m| m.to_string()).collect(),
            quiet_hours_start: None,
            quiet_hours_end: None,
            frequency: frequency.to_string(),
            override_quiet_hours: false,
        }
    }

    fn night_config() -> PreferenceConfig {
        PreferenceConfig {
            quiet_hours_start: NaiveTime::from_hms_opt(22, 0, 0),
            quiet_hours_end: NaiveTime::from_hms_opt(8, 0, 0),
            ..config(&["in_app", "email"], "instant")
        }
    }

    #[tokio::test]
    async fn baseline_applies_without_rows() {
        let r = resolver();
        let resolved = r.resolve(1, CATEGORY_SMS_RECEIVED).await.unwrap();
        assert_eq!(resolved.source, PreferenceSource::Baseline);
        assert_eq!(resolved.settings, DeliverySettings::baseline());
    }

    #[tokio::test]
    async fn user_row_wins_over_default() {
        let r = resolver();
        r.upsert_default(CATEGORY_SMS_RECEIVED, &config(&["email"], "daily"))
            .await
            .unwrap();
        let resolved = r.resolve(1, CATEGORY_SMS_RECEIVED).await.unwrap();
        assert_eq!(resolved.source, PreferenceSource::Default);
        assert_eq!(resolved.settings.frequency, Frequency::Daily);

        r.update_preferences(
            1,
            &[UpdatePreference {
                category: CATEGORY_SMS_RECEIVED.to_string(),
                config: config(&["push"], "instant"),
            }],
        )
        .await
        .unwrap();
        let resolved = r.resolve(1, CATEGORY_SMS_RECEIVED).await.unwrap();
        assert_eq!(resolved.source, PreferenceSource::User);
        assert_eq!(resolved.settings.methods, vec![DeliveryMethod::Push]);
        assert_eq!(resolved.settings.frequency, Frequency::Instant);

        // Another user still gets the default.
        let other = r.resolve(2, CATEGORY_SMS_RECEIVED).await.unwrap();
        assert_eq!(other.source, PreferenceSource::Default);
    }

    #[tokio::test]
    async fn reset_reverts_to_defaults() {
        let r = resolver();
        r.update_preferences(
            1,
            &[UpdatePreference {
                category: CATEGORY_SMS_RECEIVED.to_string(),
                config: config(&["email"], "weekly"),
            }],
        )
        .await
        .unwrap();
        assert_eq!(r.reset_preferences(1).await.unwrap(), 1);
        let prefs = r.get_preferences(1, Some(CATEGORY_SMS_RECEIVED)).await.unwrap();
        assert_eq!(prefs.len(), 1);
        assert!(!prefs[0].customized);
    }

    #[tokio::test]
    async fn invalid_updates_write_nothing() {
        let r = resolver();
        let updates = [
            UpdatePreference {
                category: CATEGORY_SMS_RECEIVED.to_string(),
                config: config(&["email"], "instant"),
            },
            UpdatePreference {
                category: "not_a_category".to_string(),
                config: config(&["email"], "instant"),
            },
        ];
        assert_matches!(
            r.update_preferences(1, &updates).await,
            Err(CoreError::Validation(_))
        );
        let resolved = r.resolve(1, CATEGORY_SMS_RECEIVED).await.unwrap();
        assert_eq!(resolved.source, PreferenceSource::Baseline);
    }

    #[tokio::test]
    async fn empty_methods_and_half_quiet_hours_are_rejected() {
        let r = resolver();
        let empty = UpdatePreference {
            category: CATEGORY_SMS_RECEIVED.to_string(),
            config: config(&[], "instant"),
        };
        assert!(r.update_preferences(1, &[empty]).await.is_err());

        let half = UpdatePreference {
            category: CATEGORY_SMS_RECEIVED.to_string(),
            config: PreferenceConfig {
                quiet_hours_start: NaiveTime::from_hms_opt(22, 0, 0),
                ..config(&["email"], "instant")
            },
        };
        assert!(r.update_preferences(1, &[half]).await.is_err());
    }

    #[tokio::test]
    async fn get_preferences_lists_every_category() {
        let r = resolver();
        let prefs = r.get_preferences(1, None).await.unwrap();
        assert_eq!(prefs.len(), CategoryRegistry::builtin().names().count());
        assert!(r.get_preferences(1, Some("bogus")).await.is_err());
    }

    #[tokio::test]
    async fn quiet_hours_suppress_unless_urgent() {
        let r = resolver();
        for category in [CATEGORY_SMS_RECEIVED, CATEGORY_LOW_BALANCE] {
            r.update_preferences(
                1,
                &[UpdatePreference {
                    category: category.to_string(),
                    config: night_config(),
                }],
            )
            .await
            .unwrap();
        }
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();

        let sms = r.resolve(1, CATEGORY_SMS_RECEIVED).await.unwrap();
        let plan = r.plan(&sms, late);
        assert!(plan.deliver.is_empty());
        assert_eq!(plan.suppressed, vec![(DeliveryMethod::Email, REASON_QUIET_HOURS)]);

        let low_balance = r.resolve(1, CATEGORY_LOW_BALANCE).await.unwrap();
        let plan = r.plan(&low_balance, late);
        assert_eq!(plan.deliver, vec![DeliveryMethod::Email]);

        let noon = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(r.plan(&sms, noon).deliver, vec![DeliveryMethod::Email]);
    }

    #[tokio::test]
    async fn quiet_hours_use_the_configured_timezone() {
        let r = PreferenceResolver::new(
            Arc::new(MemoryStore::new()),
            Arc::new(CategoryRegistry::builtin()),
            chrono_tz::Asia::Tokyo,
        );
        r.update_preferences(
            1,
            &[UpdatePreference {
                category: CATEGORY_SMS_RECEIVED.to_string(),
                config: night_config(),
            }],
        )
        .await
        .unwrap();
        let resolved = r.resolve(1, CATEGORY_SMS_RECEIVED).await.unwrap();

        // 14:00 UTC is 23:00 in Tokyo.
        let afternoon_utc = Utc.with_ymd_and_hms(2026, 3, 1, 14, 0, 0).unwrap();
        assert!(r.plan(&resolved, afternoon_utc).deliver.is_empty());
    }
}
