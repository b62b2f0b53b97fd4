//! Notification category registry.
//!
//! Categories are open strings: new ones are added by configuration over
//! time. Every category a caller uses must be registered, otherwise it is
//! rejected at the boundary with a validation error.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Built-in categories
// ---------------------------------------------------------------------------

pub const CATEGORY_VERIFICATION_STARTED: &str = "verification_started";
pub const CATEGORY_VERIFICATION_COMPLETED: &str = "verification_completed";
pub const CATEGORY_SMS_RECEIVED: &str = "sms_received";
pub const CATEGORY_PAYMENT_COMPLETED: &str = "payment_completed";
pub const CATEGORY_REFUND_COMPLETED: &str = "refund_completed";
pub const CATEGORY_LOW_BALANCE: &str = "low_balance";
pub const CATEGORY_SYSTEM: &str = "system";

/// Maximum length of a category name.
const MAX_CATEGORY_LEN: usize = 64;

static CATEGORY_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid category regex"));

/// Metadata for a single notification category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryDefinition {
    pub name: String,
    /// Urgent categories are never suppressed by quiet hours.
    pub urgent: bool,
    pub description: String,
}

impl CategoryDefinition {
    pub fn new(name: impl Into<String>, urgent: bool, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            urgent,
            description: description.into(),
        }
    }
}

/// Validate the shape of a category name.
pub fn validate_category_name(name: &str) -> Result<(), CoreError> {
    if name.is_empty() {
        return Err(CoreError::Validation(
            "Category must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_CATEGORY_LEN {
        return Err(CoreError::Validation(format!(
            "Category must not exceed {MAX_CATEGORY_LEN} characters"
        )));
    }
    if !CATEGORY_NAME_RE.is_match(name) {
        return Err(CoreError::Validation(format!(
            "Invalid category name '{name}': use lowercase letters, digits and underscores"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CategoryRegistry
// ---------------------------------------------------------------------------

/// The set of categories the platform knows about.
#[derive(Debug, Clone, Default)]
pub struct CategoryRegistry {
    categories: BTreeMap<String, CategoryDefinition>,
}

impl CategoryRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry seeded with the platform's built-in categories.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let builtins = [
            (CATEGORY_VERIFICATION_STARTED, false, "A verification session started"),
            (CATEGORY_VERIFICATION_COMPLETED, false, "A verification session finished"),
            (CATEGORY_SMS_RECEIVED, false, "An SMS arrived on a rented number"),
            (CATEGORY_PAYMENT_COMPLETED, false, "A payment settled"),
            (CATEGORY_REFUND_COMPLETED, false, "A refund settled"),
            (CATEGORY_LOW_BALANCE, true, "Account balance dropped below the threshold"),
            (CATEGORY_SYSTEM, true, "Platform and security announcements"),
        ];
        for (name, urgent, description) in builtins {
            registry
                .categories
                .insert(name.to_string(), CategoryDefinition::new(name, urgent, description));
        }
        registry
    }

    /// Register (or replace) a category definition.
    pub fn register(&mut self, definition: CategoryDefinition) -> Result<(), CoreError> {
        validate_category_name(&definition.name)?;
        self.categories.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&CategoryDefinition> {
        self.categories.get(name)
    }

    /// Look up a category, failing with a validation error if it is unknown.
    pub fn validate(&self, name: &str) -> Result<&CategoryDefinition, CoreError> {
        self.categories
            .get(name)
            .ok_or_else(|| CoreError::Validation(format!("Unknown notification category '{name}'")))
    }

    pub fn is_urgent(&self, name: &str) -> bool {
        self.categories.get(name).is_some_and(|c| c.urgent)
    }

    /// Category names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.categories.keys().map(String::as_str)
    }

    pub fn definitions(&self) -> impl Iterator<Item = &CategoryDefinition> {
        self.categories.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_contains_known_categories() {
        let registry = CategoryRegistry::builtin();
        assert!(registry.validate(CATEGORY_PAYMENT_COMPLETED).is_ok());
        assert!(registry.validate(CATEGORY_SMS_RECEIVED).is_ok());
        assert_eq!(registry.names().count(), 7);
    }

    #[test]
    fn unknown_category_is_rejected() {
        let registry = CategoryRegistry::builtin();
        let err = registry.validate("pizza_delivered").unwrap_err();
        assert!(err.to_string().contains("Unknown notification category"));
    }

    #[test]
    fn urgent_flags() {
        let registry = CategoryRegistry::builtin();
        assert!(registry.is_urgent(CATEGORY_SYSTEM));
        assert!(registry.is_urgent(CATEGORY_LOW_BALANCE));
        assert!(!registry.is_urgent(CATEGORY_PAYMENT_COMPLETED));
        assert!(!registry.is_urgent("missing"));
    }

    #[test]
    fn register_adds_new_category() {
        let mut registry = CategoryRegistry::builtin();
        registry
            .register(CategoryDefinition::new("number_expiring", false, "Rental ends soon"))
            .unwrap();
        assert!(registry.validate("number_expiring").is_ok());
    }

    #[test]
    fn register_rejects_bad_names() {
        let mut registry = CategoryRegistry::new();
        assert!(registry
            .register(CategoryDefinition::new("Bad-Name", false, ""))
            .is_err());
        assert!(registry.register(CategoryDefinition::new("", false, "")).is_err());
        assert!(registry
            .register(CategoryDefinition::new("a".repeat(65), false, ""))
            .is_err());
    }
}
