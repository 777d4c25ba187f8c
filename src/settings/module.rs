//! Settings sources backed by in-process namespaces.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::source::{is_setting_key, Loader, SettingEntry};
use super::LoadError;

/// Anything that can enumerate named members and look up their values.
///
/// Only members whose names are upper case are read as settings.
pub trait SettingsNamespace: Send + Sync {
    /// Name the namespace is registered under (e.g. `myapp.default_settings`).
    fn name(&self) -> &str;

    fn keys(&self) -> Vec<String>;

    fn value(&self, key: &str) -> Option<Value>;
}

/// A fixed set of members, typically an application's or extension's
/// default settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Namespace {
    name: String,
    members: BTreeMap<String, Value>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.members.insert(key.into(), value.into());
    }
}

impl SettingsNamespace for Namespace {
    fn name(&self) -> &str {
        &self.name
    }

    fn keys(&self) -> Vec<String> {
        self.members.keys().cloned().collect()
    }

    fn value(&self, key: &str) -> Option<Value> {
        self.members.get(key).cloned()
    }
}

fn read_members(namespace: &dyn SettingsNamespace, keys: Vec<String>) -> Vec<SettingEntry> {
    keys.into_iter()
        .filter(|key| is_setting_key(key))
        .filter_map(|key| match namespace.value(&key) {
            Some(value) => Some(SettingEntry::new(key, value)),
            None => {
                debug!(namespace = namespace.name(), %key, "member not readable, skipped");
                None
            }
        })
        .collect()
}

/// Loads every upper-case member of a registered namespace.
///
/// A loader created for a module name that was never registered fails with
/// [`LoadErrorKind::NotFound`](super::LoadErrorKind::NotFound) when loaded.
#[derive(Clone)]
pub struct ModuleLoader {
    module: String,
    namespace: Option<Arc<dyn SettingsNamespace>>,
}

impl ModuleLoader {
    pub fn new(namespace: Arc<dyn SettingsNamespace>) -> Self {
        Self {
            module: namespace.name().to_string(),
            namespace: Some(namespace),
        }
    }

    pub(crate) fn unresolved(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            namespace: None,
        }
    }
}

impl fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("module", &self.module)
            .field("resolved", &self.namespace.is_some())
            .finish()
    }
}

impl Loader for ModuleLoader {
    fn locator(&self) -> String {
        format!("module:{}", self.module)
    }

    fn load(&self) -> Result<Vec<SettingEntry>, LoadError> {
        let namespace = self.namespace.as_deref().ok_or_else(|| {
            LoadError::not_found(
                self.locator(),
                format!("no settings module registered as '{}'", self.module),
            )
        })?;

        Ok(read_members(namespace, namespace.keys()))
    }
}

/// Mirrors settings from a live configuration object owned elsewhere.
///
/// Members that cannot be read are skipped, since the external object's
/// members vary between versions.
#[derive(Clone)]
pub struct ObjectLoader {
    object: Arc<dyn SettingsNamespace>,
    only: Option<Vec<String>>,
}

impl ObjectLoader {
    pub fn new(object: Arc<dyn SettingsNamespace>) -> Self {
        Self { object, only: None }
    }

    /// Restricts mirroring to the listed members.
    #[must_use]
    pub fn only<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(keys.into_iter().map(Into::into).collect());
        self
    }
}

impl fmt::Debug for ObjectLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLoader")
            .field("object", &self.object.name())
            .field("only", &self.only)
            .finish()
    }
}

impl Loader for ObjectLoader {
    fn locator(&self) -> String {
        format!("object:{}", self.object.name())
    }

    fn load(&self) -> Result<Vec<SettingEntry>, LoadError> {
        let keys = self.only.clone().unwrap_or_else(|| self.object.keys());
        Ok(read_members(self.object.as_ref(), keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::LoadErrorKind;
    use serde_json::json;

    fn sample() -> Arc<Namespace> {
        Arc::new(
            Namespace::new("tests.settings")
                .with("UPPER_VALUE", "foo")
                .with("lower_value", "bar")
                .with("mixed_VALUE", "eek")
                .with("SETTING_1", 1),
        )
    }

    #[test]
    fn test_module_loader_reads_upper_case_members() {
        let loader = ModuleLoader::new(sample());
        let entries = loader.load().unwrap();

        assert_eq!(
            entries,
            vec![
                SettingEntry::new("SETTING_1", json!(1)),
                SettingEntry::new("UPPER_VALUE", json!("foo")),
            ]
        );
        assert_eq!(loader.locator(), "module:tests.settings");
    }

    #[test]
    fn test_module_loader_unregistered_module() {
        let loader = ModuleLoader::unresolved("does.not.exist");
        let err = loader.load().unwrap_err();

        assert_eq!(err.kind, LoadErrorKind::NotFound);
        assert_eq!(err.locator, "module:does.not.exist");
    }

    #[test]
    fn test_object_loader_skips_missing_members() {
        let loader =
            ObjectLoader::new(sample()).only(["UPPER_VALUE", "NOT_PRESENT", "lower_value"]);
        let entries = loader.load().unwrap();

        assert_eq!(entries, vec![SettingEntry::new("UPPER_VALUE", json!("foo"))]);
        assert_eq!(loader.locator(), "object:tests.settings");
    }
}
