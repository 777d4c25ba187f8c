use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;
use tracing::{debug, info};

use super::args::Args;
use super::definition::FactoryDefinition;
use super::registry::FactoryRegistry;
use super::FactoryError;

/// Target that marks a plugin table entry as an alias.
pub const ALIAS_TARGET: &str = "alias";

enum Entry {
    Definition { target: String, args: Args },
    Alias(String),
}

impl<T: ?Sized + Send + Sync + 'static> FactoryRegistry<T> {
    /// Registers every plugin declared in the setting `key`.
    ///
    /// The setting maps names to `[target, {args}]`; an entry with the target
    /// `"alias"` and args `{"name": "<other>"}` names another entry of the same
    /// table instead. The table is validated as a whole and either all of it
    /// is registered or none. A null setting declares nothing.
    ///
    /// Returns the number of definitions registered.
    pub fn register_from_settings(&self, key: &str) -> Result<usize, FactoryError> {
        let snapshot = self.settings().snapshot();
        let table = match snapshot.get_value(key)? {
            Value::Null => return Ok(0),
            Value::Object(table) => table,
            other => {
                return Err(invalid(key, format!("expected a table of plugins, found {other}")));
            }
        };

        let mut entries = BTreeMap::new();
        for (name, entry) in table {
            entries.insert(name.as_str(), parse_entry(key, name, entry)?);
        }

        let mut definitions: BTreeMap<&str, FactoryDefinition> = BTreeMap::new();
        for (name, entry) in &entries {
            if let Entry::Definition { target, args } = entry {
                let definition =
                    FactoryDefinition::new(*name, target.as_str()).with_args(args.clone());
                definitions.insert(*name, definition);
            }
        }
        for name in entries.keys() {
            if let Entry::Alias(_) = entries[name] {
                let canonical = follow_alias(&entries, name)?;
                if let Some(definition) = definitions.get_mut(canonical) {
                    definition.aliases.insert(name.to_string());
                }
            }
        }

        let count = definitions.len();
        for definition in definitions.values() {
            self.ensure_open(&definition.name)?;
        }
        self.try_edit(|state| {
            for definition in definitions.into_values() {
                debug!(
                    factory = %definition.name,
                    target = %definition.target,
                    "registering plugin"
                );
                state.insert(definition)?;
            }
            Ok(())
        })?;

        info!(setting = key, plugins = count, "plugins registered from settings");
        Ok(count)
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> FactoryError {
    FactoryError::InvalidDefinition {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn bad_alias(alias: &str, reason: impl Into<String>) -> FactoryError {
    FactoryError::BadAlias {
        alias: alias.to_string(),
        reason: reason.into(),
    }
}

fn parse_entry(key: &str, name: &str, entry: &Value) -> Result<Entry, FactoryError> {
    let (target, args) = match entry.as_array().map(Vec::as_slice) {
        Some([Value::String(target)]) => (target, None),
        Some([Value::String(target), args]) => (target, Some(args)),
        _ => {
            return Err(invalid(key, format!("entry '{name}' is not [target, {{args}}]")));
        }
    };

    let args: Args = match args {
        None | Some(Value::Null) => Args::new(),
        Some(args @ Value::Object(_)) => serde_json::from_value(args.clone())
            .map_err(|e| invalid(key, format!("entry '{name}' has invalid args: {e}")))?,
        Some(_) => {
            return Err(invalid(key, format!("args of entry '{name}' must be a table")));
        }
    };

    if target != ALIAS_TARGET {
        return Ok(Entry::Definition {
            target: target.clone(),
            args,
        });
    }

    if args.iter().any(|(arg, _)| arg != "name") {
        return Err(bad_alias(name, "only a 'name' argument is allowed"));
    }
    match args.value("name") {
        Some(Value::String(other)) if !other.is_empty() => Ok(Entry::Alias(other.clone())),
        Some(Value::String(_)) => Err(bad_alias(name, "name of alias target is empty")),
        _ => Err(bad_alias(name, "name of alias target not defined")),
    }
}

/// Follows an alias chain to the definition it ends at.
fn follow_alias<'a>(
    entries: &'a BTreeMap<&'a str, Entry>,
    alias: &'a str,
) -> Result<&'a str, FactoryError> {
    let mut seen = BTreeSet::from([alias]);
    let mut current = alias;
    loop {
        match entries.get(current) {
            Some(Entry::Definition { .. }) => return Ok(current),
            Some(Entry::Alias(next)) => {
                if !seen.insert(next.as_str()) {
                    return Err(bad_alias(alias, "circular alias"));
                }
                current = next.as_str();
            }
            None => return Err(bad_alias(alias, format!("alias target '{current}' not found"))),
        }
    }
}
