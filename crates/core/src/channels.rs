//! Delivery methods and well-known broadcast channel names.
//!
//! Two different things are called "channel" on the platform:
//!
//! - a [`DeliveryMethod`] is how a notification reaches a user (in-app,
//!   email, push, webhook). The set is closed because the dispatcher and
//!   the funnel tracker have fixed logic per method.
//! - a broadcast channel is a named topic that live connections subscribe
//!   to (`notifications`, `payments`, ...). Broadcast channels are open
//!   strings validated with [`validate_channel_name`].

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Broadcast channels
// ---------------------------------------------------------------------------

/// Per-user notification feed (notification bell UI).
pub const CHANNEL_NOTIFICATIONS: &str = "notifications";

/// Generic activity stream.
pub const CHANNEL_ACTIVITIES: &str = "activities";

/// Payment lifecycle updates.
pub const CHANNEL_PAYMENTS: &str = "payments";

/// Verification lifecycle updates.
pub const CHANNEL_VERIFICATIONS: &str = "verifications";

// ---------------------------------------------------------------------------
// Envelope message types
// ---------------------------------------------------------------------------

pub const MESSAGE_TYPE_NOTIFICATION: &str = "notification";
pub const MESSAGE_TYPE_ACTIVITY: &str = "activity";
pub const MESSAGE_TYPE_PAYMENT: &str = "payment";
pub const MESSAGE_TYPE_VERIFICATION: &str = "verification";

/// Maximum length of a broadcast channel name.
const MAX_CHANNEL_LEN: usize = 64;

static CHANNEL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_.:-]*$").expect("valid channel regex"));

/// Validate a broadcast channel name.
///
/// Rules:
/// - Must not be empty or exceed `MAX_CHANNEL_LEN` characters.
/// - Must start with a lowercase letter and contain only lowercase
///   alphanumerics, `_`, `.`, `:` or `-`.
pub fn validate_channel_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Channel name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_CHANNEL_LEN {
        return Err(CoreError::Validation(format!(
            "Channel name must not exceed {MAX_CHANNEL_LEN} characters"
        )));
    }
    if !CHANNEL_NAME_RE.is_match(name) {
        return Err(CoreError::Validation(format!(
            "Invalid channel name '{name}'"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// DeliveryMethod
// ---------------------------------------------------------------------------

/// A way a notification reaches a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
    InApp,
    Email,
    Push,
    Webhook,
}

impl DeliveryMethod {
    pub const ALL: [DeliveryMethod; 4] = [
        DeliveryMethod::InApp,
        DeliveryMethod::Email,
        DeliveryMethod::Push,
        DeliveryMethod::Webhook,
    ];

    /// Stored column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryMethod::InApp => "in_app",
            DeliveryMethod::Email => "email",
            DeliveryMethod::Push => "push",
            DeliveryMethod::Webhook => "webhook",
        }
    }

    /// Whether this method leaves the platform (and so is subject to
    /// preferences, quiet hours and frequency policy).
    pub fn is_external(&self) -> bool {
        !matches!(self, DeliveryMethod::InApp)
    }
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_app" => Ok(DeliveryMethod::InApp),
            "email" => Ok(DeliveryMethod::Email),
            "push" => Ok(DeliveryMethod::Push),
            "webhook" => Ok(DeliveryMethod::Webhook),
            other => Err(CoreError::Validation(format!(
                "Unknown delivery method '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Mobile platform of a push device token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Ios, Platform::Android];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            other => Err(CoreError::Validation(format!("Unknown platform '{other}'"))),
        }
    }
}

/// Parse a list of stored method names, dropping duplicates but keeping the
/// first-seen order.
pub fn parse_methods(values: &[String]) -> Result<Vec<DeliveryMethod>, CoreError> {
    let mut methods = Vec::with_capacity(values.len());
    for value in values {
        let method: DeliveryMethod = value.parse()?;
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    Ok(methods)
}
