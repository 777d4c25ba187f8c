//! Application start-up: settings compilation and extension wiring.

mod env;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

pub use env::{init_tracing, EnvNames, DEFAULT_PREFIX};

use crate::flags::FeatureFlags;
use crate::settings::{BoxError, Loader, LoaderFactory, Settings, Sources, Tier};
use crate::Error;

/// A unit of functionality discovered before start-up.
///
/// Extensions contribute default settings below the application's own
/// defaults and get a chance to register factories once settings are
/// published.
pub trait Extension: Send + Sync {
    fn name(&self) -> &str;

    /// Settings applied at the extension-default tier.
    fn default_settings(&self) -> Option<Arc<dyn Loader>> {
        None
    }

    /// Called after settings are compiled, in the order extensions were added.
    fn ready(&self, _settings: &Arc<Settings>) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Compiled settings plus the extensions that were started with them.
///
/// ## Example
///
/// ```no_run
/// use std::sync::Arc;
/// use layerconf::settings::{ModuleLoader, Namespace};
/// use layerconf::AppContext;
///
/// let defaults = Namespace::new("myapp.default_settings").with("WORKERS", 4);
/// let ctx = AppContext::builder()
///     .application_defaults(ModuleLoader::new(Arc::new(defaults)))
///     .build()?;
///
/// let workers: u32 = ctx.settings().get("WORKERS")?;
/// # Ok::<(), layerconf::Error>(())
/// ```
pub struct AppContext {
    env: EnvNames,
    settings: Arc<Settings>,
    flags: FeatureFlags,
    extensions: Vec<Arc<dyn Extension>>,
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("env", &self.env)
            .field("settings", &self.settings)
            .field("extensions", &self.extension_names())
            .finish()
    }
}

impl AppContext {
    pub fn builder() -> AppContextBuilder {
        AppContextBuilder::default()
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Feature flags backed by these settings.
    pub fn flags(&self) -> &FeatureFlags {
        &self.flags
    }

    pub fn env(&self) -> &EnvNames {
        &self.env
    }

    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }
}

/// Builder for [`AppContext`].
#[derive(Default)]
#[must_use = "builders do nothing until .build() is called"]
pub struct AppContextBuilder {
    env: EnvNames,
    settings: Option<Arc<Settings>>,
    factory: LoaderFactory,
    extensions: Vec<Arc<dyn Extension>>,
    defaults: Vec<Arc<dyn Loader>>,
    runtime_settings: Option<String>,
    loaders: Vec<Arc<dyn Loader>>,
}

impl AppContextBuilder {
    /// Sets the prefix of the environment variables consulted.
    pub fn with_env(mut self, env: EnvNames) -> Self {
        self.env = env;
        self
    }

    /// Compiles into an existing container instead of a new one.
    pub fn with_settings(mut self, settings: Arc<Settings>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Sets the factory used for the runtime locator and includes.
    pub fn with_loader_factory(mut self, factory: LoaderFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Adds an application-default source. At least one is required.
    pub fn application_defaults(mut self, loader: impl Loader + 'static) -> Self {
        self.defaults.push(Arc::new(loader));
        self
    }

    /// Runtime override locator. Takes precedence over `<PREFIX>_SETTINGS`.
    pub fn runtime_settings(mut self, locator: impl Into<String>) -> Self {
        self.runtime_settings = Some(locator.into());
        self
    }

    /// A source applied after the runtime override locator.
    pub fn loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }

    /// Compiles the settings, then runs every extension's ready hook.
    ///
    /// A failing hook stops start-up; hooks after it do not run, and the
    /// settings stay published.
    pub fn build(self) -> Result<AppContext, Error> {
        if self.defaults.is_empty() {
            return Err(Error::MissingDefaults);
        }

        let mut sources = Sources::new().with_factory(self.factory);
        for extension in &self.extensions {
            if let Some(loader) = extension.default_settings() {
                debug!(extension = extension.name(), "adding extension default settings");
                sources = sources.with(Tier::ExtensionDefault, loader);
            }
        }
        for loader in self.defaults {
            sources = sources.with(Tier::ApplicationDefault, loader);
        }
        if let Some(locator) = self.runtime_settings.or_else(|| self.env.runtime_settings()) {
            sources = sources.runtime_locator(locator);
        }
        for loader in self.loaders {
            sources = sources.with(Tier::RuntimeOverride, loader);
        }

        let settings = self.settings.unwrap_or_default();
        settings.compile(&sources)?;

        for extension in &self.extensions {
            extension.ready(&settings).map_err(|source| Error::Extension {
                name: extension.name().to_string(),
                source,
            })?;
            debug!(extension = extension.name(), "extension ready");
        }

        info!(extensions = self.extensions.len(), "application context ready");
        Ok(AppContext {
            env: self.env,
            flags: FeatureFlags::new(Arc::clone(&settings)),
            settings,
            extensions: self.extensions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::{Args, FactoryDefinition, FactoryRegistry, Implementation};
    use crate::settings::{ModuleLoader, Namespace};
    use parking_lot::Mutex;
    use std::io::Write;

    #[derive(Default)]
    struct Mail {
        hosts: Mutex<Vec<String>>,
    }

    impl Extension for Mail {
        fn name(&self) -> &str {
            "mail"
        }

        fn default_settings(&self) -> Option<Arc<dyn Loader>> {
            let defaults = Namespace::new("mail.default_settings")
                .with("MAIL_HOST", "localhost")
                .with("MAIL_PORT", 25);
            Some(Arc::new(ModuleLoader::new(Arc::new(defaults))))
        }

        fn ready(&self, settings: &Arc<Settings>) -> Result<(), BoxError> {
            let registry = FactoryRegistry::<String>::new(Arc::clone(settings));
            registry.provide(
                "mail::Host",
                Implementation::new(|args: &Args| Ok(Arc::new(args.get::<String>("host")?)))
                    .inject_from("host", "MAIL_HOST"),
            )?;
            registry.register(FactoryDefinition::new("default", "mail::Host"))?;

            let host = registry.resolve_default()?;
            self.hosts.lock().push(host.to_string());
            Ok(())
        }
    }

    struct Broken;

    impl Extension for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn ready(&self, _settings: &Arc<Settings>) -> Result<(), BoxError> {
            Err("no database".into())
        }
    }

    fn app_defaults() -> ModuleLoader {
        let defaults = Namespace::new("app.default_settings")
            .with("MAIL_HOST", "mail.example.com")
            .with("WORKERS", 2);
        ModuleLoader::new(Arc::new(defaults))
    }

    #[test]
    fn test_flags_follow_compiled_settings() {
        let defaults = Namespace::new("app.default_settings")
            .with("FEATURE_FLAGS", serde_json::json!({"beta-ui": true}));
        let ctx = AppContext::builder()
            .with_env(EnvNames::new("LAYERCONF_TEST_CONTEXT_FLAGS"))
            .application_defaults(ModuleLoader::new(Arc::new(defaults)))
            .build()
            .unwrap();

        assert!(ctx.flags().get("beta-ui", false));
        assert!(!ctx.flags().get("legacy-ui", false));
    }

    #[test]
    fn test_build_requires_defaults() {
        let err = AppContext::builder().build().unwrap_err();
        assert!(matches!(err, Error::MissingDefaults));
    }

    #[test]
    fn test_build_with_extension() {
        let mail = Arc::new(Mail::default());
        let ctx = AppContext::builder()
            .with_env(EnvNames::new("LAYERCONF_TEST_CONTEXT_EXT"))
            .extension(Arc::clone(&mail) as Arc<dyn Extension>)
            .application_defaults(app_defaults())
            .build()
            .unwrap();

        let settings = ctx.settings();
        assert_eq!(settings.get::<String>("MAIL_HOST").unwrap(), "mail.example.com");
        assert_eq!(settings.get::<u16>("MAIL_PORT").unwrap(), 25);
        assert_eq!(
            settings.snapshot().sources(),
            ["module:mail.default_settings", "module:app.default_settings"]
        );
        assert_eq!(ctx.extension_names(), ["mail"]);
        assert_eq!(*mail.hosts.lock(), ["mail.example.com"]);
    }

    #[test]
    fn test_runtime_settings_from_builder_and_env() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"WORKERS": 8}}"#).unwrap();
        let locator = file.path().display().to_string();

        let ctx = AppContext::builder()
            .with_env(EnvNames::new("LAYERCONF_TEST_CONTEXT_RUNTIME"))
            .application_defaults(app_defaults())
            .runtime_settings(locator.clone())
            .build()
            .unwrap();
        assert_eq!(ctx.settings().get::<u32>("WORKERS").unwrap(), 8);

        let env = EnvNames::new("LAYERCONF_TEST_CONTEXT_RUNTIME");
        std::env::set_var(env.settings_var(), &locator);
        let ctx = AppContext::builder()
            .with_env(env.clone())
            .application_defaults(app_defaults())
            .build();
        std::env::remove_var(env.settings_var());

        assert_eq!(ctx.unwrap().settings().get::<u32>("WORKERS").unwrap(), 8);
    }

    #[test]
    fn test_failing_ready_hook() {
        let mail = Arc::new(Mail::default());
        let err = AppContext::builder()
            .with_env(EnvNames::new("LAYERCONF_TEST_CONTEXT_BROKEN"))
            .extension(Arc::new(Broken))
            .extension(Arc::clone(&mail) as Arc<dyn Extension>)
            .application_defaults(app_defaults())
            .build()
            .unwrap_err();

        assert!(matches!(err, Error::Extension { ref name, .. } if name == "broken"));
        assert!(mail.hosts.lock().is_empty());
    }
}
