//! Feature flags resolved from the environment, then from settings.
//!
//! A flag `my-flag` is looked up first in the environment variable
//! `<FEATURE_FLAG_PREFIX>MY_FLAG`, then in the `FEATURE_FLAGS` setting, then
//! falls back to the caller's default. The first answer for a flag is cached
//! for the lifetime of the [`FeatureFlags`] value.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::scope::{Overridable, OverrideFrame};
use crate::settings::Settings;

/// Setting holding `{flag: bool}` defaults.
pub const FEATURE_FLAGS: &str = "FEATURE_FLAGS";

/// Setting holding the prefix of flag environment variables.
pub const FEATURE_FLAG_PREFIX: &str = "FEATURE_FLAG_PREFIX";

const DEFAULT_FLAG_PREFIX: &str = "LAYERCONF_FLAG_";

const TRUE_VALUES: [&str; 6] = ["TRUE", "T", "YES", "Y", "ON", "1"];

/// Environment variable consulted for `flag`: upper case, with spaces and
/// dashes turned into underscores.
pub fn env_var_name(prefix: &str, flag: &str) -> String {
    let name: String = flag
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("{prefix}{name}")
}

fn text_to_bool(text: &str) -> bool {
    TRUE_VALUES.contains(&text.trim().to_ascii_uppercase().as_str())
}

/// Cached feature flag lookups.
#[derive(Debug)]
pub struct FeatureFlags {
    settings: Arc<Settings>,
    cache: Mutex<HashMap<String, bool>>,
}

impl FeatureFlags {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// State of `flag`, or `default` when neither the environment nor
    /// settings define it.
    pub fn get(&self, flag: &str, default: bool) -> bool {
        if let Some(value) = self.cache.lock().get(flag) {
            return *value;
        }
        let value = self.resolve(flag, default);
        *self.cache.lock().entry(flag.to_string()).or_insert(value)
    }

    /// Fixes the state of `flag` for the lifetime of this value.
    pub fn set(&self, flag: impl Into<String>, value: bool) {
        self.cache.lock().insert(flag.into(), value);
    }

    /// Runs `a` if the flag is enabled, else `b`.
    pub fn a_or_b<R>(
        &self,
        flag: &str,
        default: bool,
        a: impl FnOnce() -> R,
        b: impl FnOnce() -> R,
    ) -> R {
        if self.get(flag, default) {
            a()
        } else {
            b()
        }
    }

    /// Opens a scope in which flags can be changed temporarily.
    pub fn modify(&self) -> ModifyFlags<'_> {
        ModifyFlags {
            frame: OverrideFrame::enter(self),
        }
    }

    fn resolve(&self, flag: &str, default: bool) -> bool {
        let snapshot = self.settings.snapshot();

        let prefix = snapshot
            .find(FEATURE_FLAG_PREFIX)
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_FLAG_PREFIX);
        let var = env_var_name(prefix, flag);
        debug!(flag, %var, "resolving flag from environment");
        if let Some(text) = std::env::var(&var).ok().filter(|v| !v.is_empty()) {
            let value = text_to_bool(&text);
            info!(flag, value, "flag resolved from environment");
            return value;
        }

        let from_settings = snapshot
            .find(FEATURE_FLAGS)
            .and_then(|flags| flags.get(flag))
            .and_then(Value::as_bool);
        if let Some(value) = from_settings {
            info!(flag, value, "flag resolved from settings");
            return value;
        }

        default
    }
}

impl Overridable for FeatureFlags {
    type State = HashMap<String, bool>;

    fn capture_state(&self) -> HashMap<String, bool> {
        self.cache.lock().clone()
    }

    fn restore_state(&self, state: HashMap<String, bool>) {
        *self.cache.lock() = state;
    }
}

/// Handle for temporary flag changes, reverted on drop.
#[must_use = "changes are reverted as soon as the handle is dropped"]
pub struct ModifyFlags<'a> {
    frame: OverrideFrame<'a, FeatureFlags>,
}

impl ModifyFlags<'_> {
    pub fn set(&mut self, flag: impl Into<String>, value: bool) -> &mut Self {
        self.frame.target().set(flag, value);
        self
    }

    /// Forgets the state of `flag`; the next lookup resolves it again.
    pub fn clear(&mut self, flag: &str) -> &mut Self {
        self.frame.target().cache.lock().remove(flag);
        self
    }
}
