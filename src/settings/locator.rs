//! Turns locator strings (`--settings` values, `INCLUDE_SETTINGS` entries)
//! into loaders.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::file::FileLoader;
use super::format::Format;
use super::module::{ModuleLoader, SettingsNamespace};
use super::remote::{Fetch, RemoteLoader, RemoteOptions};
use super::source::Loader;
use super::LoadError;

/// Resolves locators by scheme.
///
/// | Locator                                | Loader          |
/// |----------------------------------------|-----------------|
/// | `myapp.settings`, `module:myapp.settings` | [`ModuleLoader`] |
/// | `file:///etc/app.yaml?type=yaml`, `./app.toml` | [`FileLoader`] |
/// | `https://host/app.json`                | [`RemoteLoader`] |
#[derive(Clone, Default)]
pub struct LoaderFactory {
    modules: BTreeMap<String, Arc<dyn SettingsNamespace>>,
    fetcher: Option<Arc<dyn Fetch>>,
    remote: RemoteOptions,
}

impl fmt::Debug for LoaderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderFactory")
            .field("modules", &self.modules.keys().collect::<Vec<_>>())
            .field("fetcher", &self.fetcher)
            .field("remote", &self.remote)
            .finish()
    }
}

impl LoaderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes a namespace addressable by its name.
    #[must_use]
    pub fn with_module(mut self, namespace: Arc<dyn SettingsNamespace>) -> Self {
        self.modules.insert(namespace.name().to_string(), namespace);
        self
    }

    #[must_use]
    pub fn with_fetcher(mut self, fetcher: Arc<dyn Fetch>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    #[must_use]
    pub fn with_remote_options(mut self, options: RemoteOptions) -> Self {
        self.remote = options;
        self
    }

    pub fn loader_for(&self, locator: &str) -> Result<Arc<dyn Loader>, LoadError> {
        let locator = locator.trim();

        match split_scheme(locator) {
            Some(("module" | "python", module)) => Ok(self.module(module)),
            Some(("file", rest)) => Ok(file_loader(rest.strip_prefix("//").unwrap_or(rest))),
            Some(("http" | "https", _)) => {
                let mut loader = RemoteLoader::new(locator).with_options(self.remote);
                if let Some(fetcher) = &self.fetcher {
                    loader = loader.with_fetcher(Arc::clone(fetcher));
                }
                Ok(Arc::new(loader))
            }
            Some((scheme, _)) => Err(LoadError::not_found(
                locator,
                format!("unknown scheme '{scheme}' in settings locator"),
            )),
            None if looks_like_path(locator) => Ok(file_loader(locator)),
            None => Ok(self.module(locator)),
        }
    }

    fn module(&self, name: &str) -> Arc<dyn Loader> {
        match self.modules.get(name) {
            Some(namespace) => Arc::new(ModuleLoader::new(Arc::clone(namespace))),
            None => Arc::new(ModuleLoader::unresolved(name)),
        }
    }
}

/// Splits `scheme:rest`. Single-letter prefixes are drive letters, not schemes.
fn split_scheme(locator: &str) -> Option<(&str, &str)> {
    let (scheme, rest) = locator.split_once(':')?;
    let valid = scheme.len() > 1
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    valid.then_some((scheme, rest))
}

fn looks_like_path(locator: &str) -> bool {
    locator.contains('/') || locator.contains('\\') || Format::from_path(locator).is_some()
}

fn file_loader(path_and_query: &str) -> Arc<dyn Loader> {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    let declared = query.and_then(|query| {
        query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == "type")
            .and_then(|(_, value)| Format::from_content_type(value))
    });

    match declared {
        Some(format) => Arc::new(FileLoader::with_format(path, format)),
        None => Arc::new(FileLoader::new(path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::module::Namespace;
    use crate::settings::LoadErrorKind;

    fn factory() -> LoaderFactory {
        let namespace = Namespace::new("myapp.settings").with("VALUE", 1);
        LoaderFactory::new().with_module(Arc::new(namespace))
    }

    #[test]
    fn test_bare_name_is_module() {
        let loader = factory().loader_for("myapp.settings").unwrap();

        assert_eq!(loader.locator(), "module:myapp.settings");
        assert_eq!(loader.load().unwrap().len(), 1);
    }

    #[test]
    fn test_module_scheme() {
        let loader = factory().loader_for("module:myapp.settings").unwrap();
        assert_eq!(loader.locator(), "module:myapp.settings");
    }

    #[test]
    fn test_unknown_module_fails_on_load() {
        let loader = factory().loader_for("other.settings").unwrap();
        assert_eq!(loader.load().unwrap_err().kind, LoadErrorKind::NotFound);
    }

    #[test]
    fn test_file_url_with_type() {
        let loader = factory()
            .loader_for("file:///etc/app/settings.conf?type=application/json")
            .unwrap();

        assert_eq!(
            loader.locator(),
            "file:///etc/app/settings.conf?type=application/json"
        );
    }

    #[test]
    fn test_bare_path_is_file() {
        let loader = factory().loader_for("./config/prod.toml").unwrap();
        assert_eq!(loader.locator(), "file://./config/prod.toml?type=application/toml");

        let loader = factory().loader_for("prod.yaml").unwrap();
        assert_eq!(loader.locator(), "file://prod.yaml?type=application/x-yaml");
    }

    #[test]
    fn test_https_url_is_remote() {
        let loader = factory().loader_for("https://config.example.com/app.json").unwrap();
        assert_eq!(loader.locator(), "https://config.example.com/app.json");
    }

    #[test]
    fn test_plain_http_is_refused_on_load() {
        let loader = factory().loader_for("http://config.example.com/app.json").unwrap();
        assert_eq!(loader.load().unwrap_err().kind, LoadErrorKind::Insecure);
    }

    #[test]
    fn test_unknown_scheme() {
        let err = factory().loader_for("ftp://config.example.com/app.json").unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::NotFound);
    }
}
