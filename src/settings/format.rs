//! Content formats understood by the file and remote loaders.

use std::path::Path;

use serde_json::Value;

use super::source::{is_setting_key, SettingEntry};
use super::LoadError;

pub const JSON_MIME_TYPE: &str = "application/json";
pub const TOML_MIME_TYPE: &str = "application/toml";
pub const YAML_MIME_TYPE: &str = "application/x-yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Json,
    Yaml,
    Toml,
}

impl Format {
    /// Infers a format from a file extension (`.json`, `.yaml`, `.yml`, `.toml`).
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Parses a MIME type or short format name. Parameters such as
    /// `; charset=utf-8` are ignored.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.as_str() {
            "application/json" | "text/json" | "json" => Some(Self::Json),
            "application/x-yaml" | "application/yaml" | "text/yaml" | "text/x-yaml" | "yaml"
            | "yml" => Some(Self::Yaml),
            "application/toml" | "text/toml" | "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Json => JSON_MIME_TYPE,
            Self::Yaml => YAML_MIME_TYPE,
            Self::Toml => TOML_MIME_TYPE,
        }
    }

    /// Parses a document and returns its upper-case top-level keys as entries.
    ///
    /// Nested mappings are kept whole. The root must be a mapping.
    pub fn parse_entries(self, text: &str, locator: &str) -> Result<Vec<SettingEntry>, LoadError> {
        let root: Value = match self {
            Self::Json => serde_json::from_str(text).map_err(|e| LoadError::parse(locator, e))?,
            Self::Yaml => serde_yaml::from_str(text).map_err(|e| LoadError::parse(locator, e))?,
            Self::Toml => toml::from_str(text).map_err(|e| LoadError::parse(locator, e))?,
        };

        let Value::Object(map) = root else {
            return Err(LoadError::parse(
                locator,
                "invalid root object, expected a mapping",
            ));
        };

        Ok(map
            .into_iter()
            .filter(|(key, _)| is_setting_key(key))
            .map(|(key, value)| SettingEntry::new(key, value))
            .collect())
    }
}
