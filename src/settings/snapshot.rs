use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::source::Tier;
use super::SettingsError;

/// Key holding locators of further sources to load after the current one.
pub const INCLUDE_SETTINGS: &str = "INCLUDE_SETTINGS";

/// Where the current value of a key came from. Diagnostic only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub tier: Tier,
    pub locator: String,
}

/// An immutable, fully merged view of settings.
///
/// Two snapshots are equal when their values and applied sources are equal;
/// origins are not compared.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    values: BTreeMap<String, Value>,
    sources: Vec<String>,
    origins: BTreeMap<String, Origin>,
}

impl PartialEq for Snapshot {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.sources == other.sources
    }
}

impl Snapshot {
    /// A snapshot holding nothing at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The settings every container starts from.
    pub fn base() -> Self {
        let values = [
            ("DEBUG", json!(false)),
            ("LOGGING", json!({})),
            ("FEATURE_FLAGS", json!({})),
            ("FEATURE_FLAG_PREFIX", json!("LAYERCONF_FLAG_")),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect();

        Self {
            values,
            ..Self::default()
        }
    }

    pub(crate) fn from_parts(values: BTreeMap<String, Value>, sources: Vec<String>) -> Self {
        Self {
            values,
            sources,
            origins: BTreeMap::new(),
        }
    }

    /// Looks up a raw value.
    pub fn find(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the raw value of a setting.
    pub fn get_value(&self, key: &str) -> Result<&Value, SettingsError> {
        self.find(key)
            .ok_or_else(|| SettingsError::UndefinedSetting(key.to_string()))
    }

    /// Returns a setting converted to `T`.
    ///
    /// Fails with [`SettingsError::UndefinedSetting`] if no source defined the
    /// key and [`SettingsError::TypeMismatch`] if the value has the wrong shape.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, SettingsError> {
        convert(key, self.get_value(key)?)
    }

    /// Returns a value nested inside a setting, addressed as `KEY.field.0.name`.
    ///
    /// Numeric segments index into arrays.
    pub fn get_path<T: DeserializeOwned>(&self, path: &str) -> Result<T, SettingsError> {
        let undefined = || SettingsError::UndefinedSetting(path.to_string());

        let mut segments = path.split('.');
        let root = segments.next().filter(|s| !s.is_empty()).ok_or_else(undefined)?;
        let mut current = self.find(root).ok_or_else(undefined)?;

        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }
            .ok_or_else(undefined)?;
        }

        convert(path, current)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// All key/value pairs, sorted by key.
    pub fn items(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Locators of the sources applied, in application order.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// `true` once at least one source has been applied.
    pub fn is_configured(&self) -> bool {
        !self.sources.is_empty()
    }

    pub fn origin(&self, key: &str) -> Option<&Origin> {
        self.origins.get(key)
    }

    pub(crate) fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub(crate) fn set(&mut self, key: String, value: Value, origin: Origin) {
        self.origins.insert(key.clone(), origin);
        self.values.insert(key, value);
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<Value> {
        self.origins.remove(key);
        self.values.remove(key)
    }

    pub(crate) fn has_source(&self, locator: &str) -> bool {
        self.sources.iter().any(|s| s == locator)
    }

    pub(crate) fn push_source(&mut self, locator: String) {
        self.sources.push(locator);
    }
}

fn convert<T: DeserializeOwned>(key: &str, value: &Value) -> Result<T, SettingsError> {
    T::deserialize(value).map_err(|source| SettingsError::TypeMismatch {
        key: key.to_string(),
        expected: std::any::type_name::<T>(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn origin() -> Origin {
        Origin {
            tier: Tier::ApplicationDefault,
            locator: "module:tests".into(),
        }
    }

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::base();
        snapshot.set("WORKERS".into(), json!(4), origin());
        snapshot.set(
            "DATABASE".into(),
            json!({"host": "db.local", "port": 5432, "replicas": ["r1", "r2"]}),
            origin(),
        );
        snapshot
    }

    #[test]
    fn test_typed_get() {
        let snapshot = sample();

        assert_eq!(snapshot.get::<u32>("WORKERS").unwrap(), 4);
        assert!(!snapshot.get::<bool>("DEBUG").unwrap());
    }

    #[test]
    fn test_type_mismatch() {
        let err = sample().get::<String>("WORKERS").unwrap_err();

        match err {
            SettingsError::TypeMismatch { key, expected, .. } => {
                assert_eq!(key, "WORKERS");
                assert!(expected.contains("String"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_undefined_setting() {
        let err = Snapshot::empty().get::<Value>("NEVER_DECLARED").unwrap_err();
        assert!(matches!(err, SettingsError::UndefinedSetting(key) if key == "NEVER_DECLARED"));
    }

    #[test]
    fn test_key_path_access() {
        let snapshot = sample();

        assert_eq!(snapshot.get_path::<String>("DATABASE.host").unwrap(), "db.local");
        assert_eq!(snapshot.get_path::<String>("DATABASE.replicas.1").unwrap(), "r2");
        assert!(matches!(
            snapshot.get_path::<Value>("DATABASE.user"),
            Err(SettingsError::UndefinedSetting(path)) if path == "DATABASE.user"
        ));
        assert!(matches!(
            snapshot.get_path::<Value>("WORKERS.count"),
            Err(SettingsError::UndefinedSetting(_))
        ));
    }

    #[test]
    fn test_nested_value_into_struct() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Database {
            host: String,
            port: u16,
        }

        let db: Database = sample().get("DATABASE").unwrap();
        assert_eq!(
            db,
            Database {
                host: "db.local".into(),
                port: 5432
            }
        );
    }

    #[test]
    fn test_items_are_sorted() {
        let snapshot = sample();
        let keys: Vec<&str> = snapshot.keys().collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();

        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_origin_is_not_compared() {
        let a = sample();
        let b = Snapshot::from_parts(a.values().clone(), a.sources().to_vec());

        assert_eq!(a, b);
        assert!(a.origin("WORKERS").is_some());
        assert!(b.origin("WORKERS").is_none());
    }
}
