use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::locator::LoaderFactory;
use super::snapshot::{Origin, Snapshot, INCLUDE_SETTINGS};
use super::source::{Loader, SourceDescriptor, Tier};
use super::LoadError;

/// Ordered list of settings sources to compile.
///
/// Sources are applied tier by tier (extension defaults, then application
/// defaults, then runtime overrides) and, within a tier, in the order they
/// were added. Every key a source yields replaces the whole previous value
/// for that key; nested mappings are not merged.
///
/// ## Example
///
/// ```
/// use std::sync::Arc;
/// use layerconf::settings::{ModuleLoader, Namespace, Settings, Sources};
///
/// let defaults = Arc::new(Namespace::new("myapp.default_settings").with("WORKERS", 2));
/// let sources = Sources::new()
///     .application_default(ModuleLoader::new(defaults))
///     .runtime_locator("./config/production.yaml");
///
/// let settings = Settings::new();
/// // Fails: ./config/production.yaml does not exist, nothing is published.
/// assert!(settings.compile(&sources).is_err());
/// assert!(!settings.is_configured());
/// ```
#[derive(Debug, Clone, Default)]
#[must_use = "sources do nothing until compiled"]
pub struct Sources {
    descriptors: Vec<SourceDescriptor>,
    locators: Vec<(Tier, String)>,
    factory: LoaderFactory,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the factory used for locator strings and `INCLUDE_SETTINGS` entries.
    pub fn with_factory(mut self, factory: LoaderFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with(mut self, tier: Tier, loader: Arc<dyn Loader>) -> Self {
        self.descriptors.push(SourceDescriptor::new(tier, loader));
        self
    }

    pub fn extension_default(self, loader: impl Loader + 'static) -> Self {
        self.with(Tier::ExtensionDefault, Arc::new(loader))
    }

    pub fn application_default(self, loader: impl Loader + 'static) -> Self {
        self.with(Tier::ApplicationDefault, Arc::new(loader))
    }

    pub fn runtime_override(self, loader: impl Loader + 'static) -> Self {
        self.with(Tier::RuntimeOverride, Arc::new(loader))
    }

    /// Adds a runtime override by locator (module name, file path or URL).
    ///
    /// The locator is resolved through the factory at compile time.
    pub fn runtime_locator(mut self, locator: impl Into<String>) -> Self {
        self.locators.push((Tier::RuntimeOverride, locator.into()));
        self
    }

    pub fn factory(&self) -> &LoaderFactory {
        &self.factory
    }

    fn ordered(&self) -> Result<Vec<SourceDescriptor>, LoadError> {
        let mut ordered = self.descriptors.clone();
        for (tier, locator) in &self.locators {
            ordered.push(SourceDescriptor::new(*tier, self.factory.loader_for(locator)?));
        }
        // Stable: insertion order is kept within a tier.
        ordered.sort_by_key(|descriptor| descriptor.tier);
        Ok(ordered)
    }

    /// Applies every source on top of `base`, stopping at the first failure.
    pub(crate) fn merge(&self, base: Snapshot) -> Result<Snapshot, LoadError> {
        let mut snapshot = base;
        for descriptor in self.ordered()? {
            self.apply(descriptor.tier, descriptor.loader.as_ref(), &mut snapshot)?;
        }
        Ok(snapshot)
    }

    fn apply(
        &self,
        tier: Tier,
        loader: &dyn Loader,
        snapshot: &mut Snapshot,
    ) -> Result<(), LoadError> {
        let locator = loader.locator();
        if snapshot.has_source(&locator) {
            warn!(%locator, "settings already loaded, skipping");
            return Ok(());
        }

        info!(%locator, ?tier, "loading settings");
        for entry in loader.load()? {
            debug!(key = %entry.key, "importing setting");
            let origin = Origin {
                tier,
                locator: locator.clone(),
            };
            snapshot.set(entry.key, entry.value, origin);
        }
        snapshot.push_source(locator.clone());

        if let Some(includes) = snapshot.remove(INCLUDE_SETTINGS) {
            for include in include_locators(includes, &locator)? {
                let included = self.factory.loader_for(&include)?;
                self.apply(tier, included.as_ref(), snapshot)?;
            }
        }

        Ok(())
    }
}

fn include_locators(value: Value, locator: &str) -> Result<Vec<String>, LoadError> {
    serde_json::from_value(value).map_err(|e| {
        LoadError::parse(
            locator,
            format!("{INCLUDE_SETTINGS} must be a list of locators: {e}"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::module::{ModuleLoader, Namespace};
    use crate::settings::LoadErrorKind;
    use serde_json::json;

    fn module(name: &str, value: i64) -> ModuleLoader {
        ModuleLoader::new(Arc::new(Namespace::new(name).with("X", value)))
    }

    #[test]
    fn test_tiers_apply_in_precedence_order() {
        let sources = Sources::new()
            .runtime_override(module("runtime", 3))
            .application_default(module("app", 2))
            .extension_default(module("ext", 1));

        let snapshot = sources.merge(Snapshot::base()).unwrap();

        assert_eq!(snapshot.get::<i64>("X").unwrap(), 3);
        assert_eq!(
            snapshot.sources(),
            ["module:ext", "module:app", "module:runtime"]
        );
        assert_eq!(snapshot.origin("X").unwrap().tier, Tier::RuntimeOverride);
    }

    #[test]
    fn test_insertion_order_within_tier() {
        let sources = Sources::new()
            .extension_default(module("ext.a", 1))
            .extension_default(module("ext.b", 2));

        let snapshot = sources.merge(Snapshot::base()).unwrap();
        assert_eq!(snapshot.get::<i64>("X").unwrap(), 2);
    }

    #[test]
    fn test_nested_values_replaced_wholesale() {
        let first = Namespace::new("first").with("DB", json!({"host": "a", "port": 1}));
        let second = Namespace::new("second").with("DB", json!({"host": "b"}));
        let sources = Sources::new()
            .application_default(ModuleLoader::new(Arc::new(first)))
            .runtime_override(ModuleLoader::new(Arc::new(second)));

        let snapshot = sources.merge(Snapshot::base()).unwrap();

        assert_eq!(snapshot.get_value("DB").unwrap(), &json!({"host": "b"}));
    }

    #[test]
    fn test_include_settings() {
        let included = Arc::new(Namespace::new("myapp.plugins").with("PLUGIN_VALUE", "included"));
        let root = Namespace::new("myapp.settings")
            .with(INCLUDE_SETTINGS, json!(["myapp.plugins"]))
            .with("ROOT_VALUE", 1);
        let sources = Sources::new()
            .with_factory(LoaderFactory::new().with_module(included))
            .application_default(ModuleLoader::new(Arc::new(root)));

        let snapshot = sources.merge(Snapshot::base()).unwrap();

        assert_eq!(snapshot.get::<String>("PLUGIN_VALUE").unwrap(), "included");
        assert!(!snapshot.contains(INCLUDE_SETTINGS));
        assert_eq!(
            snapshot.sources(),
            ["module:myapp.settings", "module:myapp.plugins"]
        );
    }

    #[test]
    fn test_circular_include_is_loaded_once() {
        let a = Arc::new(
            Namespace::new("a")
                .with(INCLUDE_SETTINGS, json!(["b"]))
                .with("FROM_A", true),
        );
        let b = Arc::new(
            Namespace::new("b")
                .with(INCLUDE_SETTINGS, json!(["a"]))
                .with("FROM_B", true),
        );
        let sources = Sources::new()
            .with_factory(LoaderFactory::new().with_module(a.clone()).with_module(b))
            .application_default(ModuleLoader::new(a));

        let snapshot = sources.merge(Snapshot::base()).unwrap();

        assert_eq!(snapshot.sources(), ["module:a", "module:b"]);
        assert!(snapshot.contains("FROM_A"));
        assert!(snapshot.contains("FROM_B"));
    }

    #[test]
    fn test_invalid_include_list() {
        let root = Namespace::new("root").with(INCLUDE_SETTINGS, json!("not-a-list"));
        let sources = Sources::new().application_default(ModuleLoader::new(Arc::new(root)));

        let err = sources.merge(Snapshot::base()).unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::ParseError);
    }

    #[test]
    fn test_first_failure_stops_merge() {
        let sources = Sources::new()
            .application_default(module("app", 2))
            .runtime_locator("missing.module");

        let err = sources.merge(Snapshot::base()).unwrap_err();

        assert_eq!(err.kind, LoadErrorKind::NotFound);
        assert_eq!(err.locator, "module:missing.module");
    }
}
