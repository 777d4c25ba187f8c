use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use super::builder::Sources;
use super::export;
use super::snapshot::{Origin, Snapshot};
use super::source::Tier;
use super::SettingsError;
use crate::scope::{Overridable, OverrideFrame};

/// Locator recorded as the origin of values set through [`ModifySettings`].
const MODIFY_LOCATOR: &str = "modify";

/// Holds the published settings snapshot.
///
/// Reads are lock-free loads of the current snapshot. [`compile`](Self::compile)
/// and [`restore`](Self::restore) build a complete snapshot first and publish
/// it with a single pointer swap, so readers never observe partial state.
#[derive(Debug)]
pub struct Settings {
    current: ArcSwap<Snapshot>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    /// Creates a container holding only the base settings.
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::base())
    }

    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
        }
    }

    /// Builds a container from an [`export`](Self::export) blob, for use in a
    /// worker that must not re-run the loaders.
    pub fn from_export(blob: &[u8]) -> Result<Self, SettingsError> {
        Ok(Self::from_snapshot(export::decode(blob)?))
    }

    /// Loads and merges every source, then publishes the result.
    ///
    /// On failure the previously published snapshot stays active.
    pub fn compile(&self, sources: &Sources) -> Result<Arc<Snapshot>, SettingsError> {
        let snapshot = Arc::new(sources.merge(Snapshot::base())?);
        self.current.store(Arc::clone(&snapshot));
        info!(
            sources = ?snapshot.sources(),
            settings = snapshot.len(),
            "settings published"
        );
        Ok(snapshot)
    }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, SettingsError> {
        self.current.load().get(key)
    }

    pub fn get_path<T: DeserializeOwned>(&self, path: &str) -> Result<T, SettingsError> {
        self.current.load().get_path(path)
    }

    pub fn get_value(&self, key: &str) -> Result<Value, SettingsError> {
        self.current.load().get_value(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.current.load().contains(key)
    }

    pub fn is_configured(&self) -> bool {
        self.current.load().is_configured()
    }

    pub fn keys(&self) -> Vec<String> {
        self.current.load().keys().map(str::to_string).collect()
    }

    /// Serializes the current snapshot into a versioned blob.
    pub fn export(&self) -> Result<Vec<u8>, SettingsError> {
        export::encode(&self.current.load())
    }

    /// Publishes the snapshot held in an [`export`](Self::export) blob.
    ///
    /// Blobs with an incompatible version are rejected and nothing changes.
    pub fn restore(&self, blob: &[u8]) -> Result<Arc<Snapshot>, SettingsError> {
        let snapshot = Arc::new(export::decode(blob)?);
        self.current.store(Arc::clone(&snapshot));
        debug!(settings = snapshot.len(), "settings restored from export");
        Ok(snapshot)
    }

    /// Opens a scope in which settings can be changed temporarily.
    ///
    /// Every change is reverted when the returned handle is dropped.
    ///
    /// ```
    /// use layerconf::settings::Settings;
    ///
    /// let settings = Settings::new();
    /// {
    ///     let mut patch = settings.modify();
    ///     patch.set("DEBUG", true);
    ///     assert!(settings.get::<bool>("DEBUG").unwrap());
    /// }
    /// assert!(!settings.get::<bool>("DEBUG").unwrap());
    /// ```
    pub fn modify(&self) -> ModifySettings<'_> {
        ModifySettings {
            frame: OverrideFrame::enter(self),
        }
    }

    fn update(&self, change: impl FnOnce(&mut Snapshot)) {
        let mut next = Snapshot::clone(&self.current.load());
        change(&mut next);
        self.current.store(Arc::new(next));
    }
}

impl Overridable for Settings {
    type State = Arc<Snapshot>;

    fn capture_state(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    fn restore_state(&self, state: Arc<Snapshot>) {
        self.current.store(state);
    }
}

/// What [`ModifySettings::reset`] resets to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetTo {
    /// Base settings only, with no sources applied.
    Defaults,
    /// No settings at all.
    Empty,
}

/// Handle for temporary changes to a [`Settings`] container.
#[must_use = "changes are reverted as soon as the handle is dropped"]
pub struct ModifySettings<'a> {
    frame: OverrideFrame<'a, Settings>,
}

impl ModifySettings<'_> {
    /// Adds or replaces a setting.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        self.frame.target().update(|snapshot| {
            let origin = Origin {
                tier: Tier::RuntimeOverride,
                locator: MODIFY_LOCATOR.to_string(),
            };
            snapshot.set(key, value, origin);
        });
        self
    }

    /// Removes a setting, if present.
    pub fn remove(&mut self, key: &str) -> &mut Self {
        self.frame.target().update(|snapshot| {
            snapshot.remove(key);
        });
        self
    }

    /// Replaces the whole snapshot, e.g. so that startup code can be
    /// exercised against an unconfigured container.
    pub fn reset(&mut self, to: ResetTo) -> &mut Self {
        let snapshot = match to {
            ResetTo::Defaults => Snapshot::base(),
            ResetTo::Empty => Snapshot::empty(),
        };
        self.frame.target().current.store(Arc::new(snapshot));
        self
    }

    pub fn settings(&self) -> &Settings {
        self.frame.target()
    }
}
