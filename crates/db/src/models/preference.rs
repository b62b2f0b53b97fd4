//! Notification preference models and DTOs.

use chrono::NaiveTime;
use herald_core::channels::parse_methods;
use herald_core::error::CoreError;
use herald_core::policy::{DeliverySettings, QuietHours};
use herald_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `notification_preferences` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct NotificationPreference {
    pub id: DbId,
    pub user_id: DbId,
    pub category: String,
    pub is_enabled: bool,
    pub methods: Vec<String>,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub frequency: String,
    pub override_quiet_hours: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `notification_preference_defaults` table.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct PreferenceDefault {
    pub id: DbId,
    pub category: String,
    pub is_enabled: bool,
    pub methods: Vec<String>,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub frequency: String,
    pub override_quiet_hours: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// The configurable part of a preference (user row or category default).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferenceConfig {
    pub is_enabled: bool,
    pub methods: Vec<String>,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub frequency: String,
    #[serde(default)]
    pub override_quiet_hours: bool,
}

/// DTO for creating or replacing a user's preference for one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePreference {
    pub category: String,
    #[serde(flatten)]
    pub config: PreferenceConfig,
}

impl PreferenceConfig {
    /// Interpret the stored strings as typed delivery settings.
    pub fn to_settings(&self) -> Result<DeliverySettings, CoreError> {
        Ok(DeliverySettings {
            enabled: self.is_enabled,
            methods: parse_methods(&self.methods)?,
            quiet_hours: QuietHours::from_bounds(self.quiet_hours_start, self.quiet_hours_end)?,
            frequency: self.frequency.parse()?,
            override_quiet_hours: self.override_quiet_hours,
        })
    }
}

impl From<&DeliverySettings> for PreferenceConfig {
    fn from(settings: &DeliverySettings) -> Self {
        Self {
            is_enabled: settings.enabled,
            methods: settings.methods.iter().map(|m| m.as_str().to_string()).collect(),
            quiet_hours_start: settings.quiet_hours.map(|q| q.start),
            quiet_hours_end: settings.quiet_hours.map(|q| q.end),
            frequency: settings.frequency.as_str().to_string(),
            override_quiet_hours: settings.override_quiet_hours,
        }
    }
}

impl NotificationPreference {
    pub fn config(&self) -> PreferenceConfig {
        PreferenceConfig {
            is_enabled: self.is_enabled,
            methods: self.methods.clone(),
            quiet_hours_start: self.quiet_hours_start,
            quiet_hours_end: self.quiet_hours_end,
            frequency: self.frequency.clone(),
            override_quiet_hours: self.override_quiet_hours,
        }
    }
}

impl PreferenceDefault {
    pub fn config(&self) -> PreferenceConfig {
        PreferenceConfig {
            is_enabled: self.is_enabled,
            methods: self.methods.clone(),
            quiet_hours_start: self.quiet_hours_start,
            quiet_hours_end: self.quiet_hours_end,
            frequency: self.frequency.clone(),
            override_quiet_hours: self.override_quiet_hours,
        }
    }
}

#[cfg(test)]
mod tests {
    use herald_core::channels::DeliveryMethod;
    use herald_core::policy::Frequency;

    use super::*;

    fn config(frequency: &str) -> PreferenceConfig {
        PreferenceConfig {
            is_enabled: true,
            methods: vec!["in_app".to_string(), "email".to_string()],
            quiet_hours_start: NaiveTime::from_hms_opt(22, 0, 0),
            quiet_hours_end: NaiveTime::from_hms_opt(7, 0, 0),
            frequency: frequency.to_string(),
            override_quiet_hours: false,
        }
    }

    #[test]
    fn config_converts_to_settings() {
        let settings = config("daily").to_settings().unwrap();
        assert_eq!(settings.methods, vec![DeliveryMethod::InApp, DeliveryMethod::Email]);
        assert_eq!(settings.frequency, Frequency::Daily);
        assert!(settings.quiet_hours.is_some());
    }

    #[test]
    fn bad_frequency_is_rejected() {
        assert!(config("hourly").to_settings().is_err());
    }

    #[test]
    fn settings_convert_back_to_config() {
        let original = config("weekly");
        let settings = original.to_settings().unwrap();
        assert_eq!(PreferenceConfig::from(&settings), original);
    }

    #[test]
    fn update_preference_deserializes_flat() {
        let json = serde_json::json!({
            "category": "sms_received",
            "is_enabled": true,
            "methods": ["push"],
            "quiet_hours_start": null,
            "quiet_hours_end": null,
            "frequency": "instant"
        });
        let update: UpdatePreference = serde_json::from_value(json).unwrap();
        assert_eq!(update.category, "sms_received");
        assert!(!update.config.override_quiet_hours);
    }
}
