use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ArgError {
    #[error("missing argument '{0}'")]
    Missing(String),

    #[error("argument '{name}' is not a valid {expected}: {source}")]
    Invalid {
        name: String,
        expected: &'static str,
        source: serde_json::Error,
    },
}

/// Named constructor arguments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Args(BTreeMap<String, Value>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Adds every argument of `other`, replacing existing ones.
    pub fn merge(&mut self, other: Args) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<T, ArgError> {
        let value = self
            .0
            .get(name)
            .ok_or_else(|| ArgError::Missing(name.to_string()))?;
        convert(name, value)
    }

    pub fn get_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T, ArgError> {
        match self.0.get(name) {
            Some(value) => convert(name, value),
            None => Ok(default),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Args {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

fn convert<T: DeserializeOwned>(name: &str, value: &Value) -> Result<T, ArgError> {
    T::deserialize(value).map_err(|source| ArgError::Invalid {
        name: name.to_string(),
        expected: std::any::type_name::<T>(),
        source,
    })
}
