use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::args::Args;
use crate::settings::BoxError;

/// How resolved instances are cached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// A new instance on every resolve.
    #[default]
    None,
    /// One instance per process until the registry is reset.
    Singleton,
    /// One instance per calling thread.
    SingletonPerThread,
}

/// A named recipe for producing an instance.
#[derive(Debug, Clone, PartialEq)]
pub struct FactoryDefinition {
    pub name: String,
    /// Reference to a provided [`Implementation`].
    pub target: String,
    pub fixed_args: Args,
    pub cache_mode: CacheMode,
    pub aliases: BTreeSet<String>,
}

impl FactoryDefinition {
    pub fn new(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            fixed_args: Args::new(),
            cache_mode: CacheMode::None,
            aliases: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn with_args(mut self, args: Args) -> Self {
        self.fixed_args = args;
        self
    }

    #[must_use]
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fixed_args.insert(name, value);
        self
    }

    #[must_use]
    pub fn cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    /// The name followed by every alias.
    pub(crate) fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

type Construct<T> = dyn Fn(&Args) -> Result<Arc<T>, BoxError> + Send + Sync;

/// A constructor parameter filled from settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injected {
    pub param: String,
    pub setting: String,
}

/// A concrete way to build a `T`, with the constructor parameters it wants
/// filled from settings.
pub struct Implementation<T: ?Sized> {
    injected: Vec<Injected>,
    construct: Arc<Construct<T>>,
}

impl<T: ?Sized> Clone for Implementation<T> {
    fn clone(&self) -> Self {
        Self {
            injected: self.injected.clone(),
            construct: Arc::clone(&self.construct),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Implementation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementation")
            .field("injected", &self.injected)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized> Implementation<T> {
    pub fn new<F>(construct: F) -> Self
    where
        F: Fn(&Args) -> Result<Arc<T>, BoxError> + Send + Sync + 'static,
    {
        Self {
            injected: Vec::new(),
            construct: Arc::new(construct),
        }
    }

    /// Always hands out the given instance. Useful for test doubles.
    pub fn instance(instance: Arc<T>) -> Self
    where
        T: Send + Sync + 'static,
    {
        Self::new(move |_| Ok(Arc::clone(&instance)))
    }

    /// Fills `param` from the setting of the same name in upper case.
    #[must_use]
    pub fn inject(self, param: impl Into<String>) -> Self {
        let param = param.into();
        let setting = param.to_ascii_uppercase();
        self.inject_from(param, setting)
    }

    /// Fills `param` from `setting`.
    #[must_use]
    pub fn inject_from(mut self, param: impl Into<String>, setting: impl Into<String>) -> Self {
        self.injected.push(Injected {
            param: param.into(),
            setting: setting.into(),
        });
        self
    }

    pub fn injected(&self) -> &[Injected] {
        &self.injected
    }

    pub(crate) fn construct(&self, args: &Args) -> Result<Arc<T>, BoxError> {
        (self.construct)(args)
    }
}
