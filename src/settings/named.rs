//! Named configuration blocks.
//!
//! A setting such as
//!
//! ```toml
//! [QUEUES.default]
//! url = "amqp://localhost"
//!
//! [QUEUES.audit]
//! url = "amqp://audit.internal"
//! durable = true
//! ```
//!
//! holds several named blocks; [`NamedConfig`] selects one and fills in defaults.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::container::Settings;
use super::SettingsError;

pub const DEFAULT_NAME: &str = "default";

#[derive(Debug, Clone)]
pub struct NamedConfig {
    setting: String,
    default_name: String,
    defaults: Map<String, Value>,
    required_keys: Vec<String>,
}

impl NamedConfig {
    pub fn new(setting: impl Into<String>) -> Self {
        Self {
            setting: setting.into(),
            default_name: DEFAULT_NAME.to_string(),
            defaults: Map::new(),
            required_keys: Vec::new(),
        }
    }

    #[must_use]
    pub fn default_name(mut self, name: impl Into<String>) -> Self {
        self.default_name = name.into();
        self
    }

    /// Value used for `key` when the selected block does not define it.
    #[must_use]
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn require(mut self, key: impl Into<String>) -> Self {
        self.required_keys.push(key.into());
        self
    }

    /// Names of all blocks in the setting.
    pub fn available(&self, settings: &Settings) -> Result<Vec<String>, SettingsError> {
        let blocks: Map<String, Value> = settings.get(&self.setting)?;
        Ok(blocks.into_iter().map(|(name, _)| name).collect())
    }

    /// Returns the block called `name` (or the default block) with defaults applied.
    pub fn get(
        &self,
        settings: &Settings,
        name: Option<&str>,
    ) -> Result<Map<String, Value>, SettingsError> {
        let name = name.unwrap_or(self.default_name.as_str());
        let mut blocks: BTreeMap<String, Map<String, Value>> = settings.get(&self.setting)?;

        let block = blocks
            .remove(name)
            .ok_or_else(|| SettingsError::NamedConfigNotFound {
                key: self.setting.clone(),
                name: name.to_string(),
            })?;

        let mut config = self.defaults.clone();
        config.extend(block);

        if let Some(field) = self.required_keys.iter().find(|k| !config.contains_key(*k)) {
            return Err(SettingsError::MissingRequiredKey {
                key: self.setting.clone(),
                name: name.to_string(),
                field: field.clone(),
            });
        }

        Ok(config)
    }
}
