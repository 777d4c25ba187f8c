use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::LoadError;

/// A single key/value pair produced by a [`Loader`].
#[derive(Debug, Clone, PartialEq)]
pub struct SettingEntry {
    pub key: String,
    pub value: Value,
}

impl SettingEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// Precedence tier of a settings source. Later tiers override earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tier {
    ExtensionDefault,
    ApplicationDefault,
    RuntimeOverride,
}

/// A source of settings.
///
/// Every variant yields the same structure: an ordered list of entries. The
/// locator identifies the source in logs, in the recorded source list and in
/// errors; two loaders with the same locator are treated as the same source.
pub trait Loader: Send + Sync + fmt::Debug {
    fn locator(&self) -> String;

    fn load(&self) -> Result<Vec<SettingEntry>, LoadError>;
}

/// A loader placed at a precedence tier.
#[derive(Debug, Clone)]
pub struct SourceDescriptor {
    pub tier: Tier,
    pub loader: Arc<dyn Loader>,
}

impl SourceDescriptor {
    pub fn new(tier: Tier, loader: Arc<dyn Loader>) -> Self {
        Self { tier, loader }
    }
}

/// Returns `true` for names that are recognised as settings: upper-case
/// letters, digits and underscores, with at least one letter.
pub fn is_setting_key(key: &str) -> bool {
    key.chars().any(|c| c.is_ascii_uppercase())
        && key
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setting_keys() {
        assert!(is_setting_key("DEBUG"));
        assert!(is_setting_key("DB_POOL_2"));
        assert!(is_setting_key("_PRIVATE_UPPER"));

        assert!(!is_setting_key(""));
        assert!(!is_setting_key("lower_value"));
        assert!(!is_setting_key("mixed_VALUE"));
        assert!(!is_setting_key("__"));
        assert!(!is_setting_key("123"));
        assert!(!is_setting_key("WITH-DASH"));
    }

    #[test]
    fn test_tiers_are_ordered() {
        assert!(Tier::ExtensionDefault < Tier::ApplicationDefault);
        assert!(Tier::ApplicationDefault < Tier::RuntimeOverride);
    }
}
