use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thread_local::ThreadLocal;
use tracing::debug;

use super::args::Args;
use super::definition::{CacheMode, FactoryDefinition, Implementation};
use super::modify::ModifyFactories;
use super::FactoryError;
use crate::scope::{Overridable, OverrideFrame};
use crate::settings::Settings;

/// Name used when [`FactoryRegistry::resolve_default`] is called.
pub const DEFAULT_FACTORY: &str = "default";

type Slot<T> = Arc<Mutex<Option<Arc<T>>>>;

/// One thread's instances, keyed by `(name, cache generation)`. Values are `Arc<T>`.
type ThreadInstances = RefCell<HashMap<(String, u64), Box<dyn Any + Send>>>;

/// Definitions, aliases and implementations. Replaced as a whole on change.
pub(crate) struct RegistryState<T: ?Sized> {
    pub(crate) definitions: BTreeMap<String, FactoryDefinition>,
    pub(crate) aliases: BTreeMap<String, String>,
    pub(crate) implementations: BTreeMap<String, Implementation<T>>,
    pub(crate) default_name: Option<String>,
    pub(crate) require_explicit: bool,
}

impl<T: ?Sized> Clone for RegistryState<T> {
    fn clone(&self) -> Self {
        Self {
            definitions: self.definitions.clone(),
            aliases: self.aliases.clone(),
            implementations: self.implementations.clone(),
            default_name: self.default_name.clone(),
            require_explicit: self.require_explicit,
        }
    }
}

impl<T: ?Sized> RegistryState<T> {
    fn canonical<'a>(&'a self, name: &'a str) -> Option<&'a str> {
        if self.definitions.contains_key(name) {
            Some(name)
        } else {
            self.aliases.get(name).map(String::as_str)
        }
    }

    fn is_taken(&self, identifier: &str) -> bool {
        self.definitions.contains_key(identifier) || self.aliases.contains_key(identifier)
    }

    pub(crate) fn insert(&mut self, definition: FactoryDefinition) -> Result<(), FactoryError> {
        let mut seen = Vec::new();
        for identifier in definition.identifiers() {
            if self.is_taken(identifier) || seen.contains(&identifier) {
                return Err(FactoryError::DuplicateFactory(identifier.to_string()));
            }
            seen.push(identifier);
        }

        for alias in &definition.aliases {
            self.aliases.insert(alias.clone(), definition.name.clone());
        }
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<FactoryDefinition> {
        let definition = self.definitions.remove(name)?;
        for alias in &definition.aliases {
            self.aliases.remove(alias);
        }
        Some(definition)
    }
}

/// Resolves names to instances of a capability `T`, usually a trait object.
///
/// ```
/// use std::sync::Arc;
/// use layerconf::factory::{Args, CacheMode, FactoryDefinition, FactoryRegistry, Implementation};
/// use layerconf::settings::Settings;
///
/// trait Greeter: Send + Sync {
///     fn greet(&self) -> String;
/// }
///
/// struct English(String);
///
/// impl Greeter for English {
///     fn greet(&self) -> String {
///         format!("Hello, {}", self.0)
///     }
/// }
///
/// let registry = FactoryRegistry::<dyn Greeter>::new(Arc::new(Settings::new()));
/// registry.provide(
///     "greeters::English",
///     Implementation::new(|args: &Args| {
///         Ok(Arc::new(English(args.get("name")?)) as Arc<dyn Greeter>)
///     }),
/// )?;
/// registry.register(
///     FactoryDefinition::new("default", "greeters::English")
///         .with_arg("name", "world")
///         .cache_mode(CacheMode::Singleton),
/// )?;
///
/// assert_eq!(registry.resolve_default()?.greet(), "Hello, world");
/// # Ok::<(), layerconf::factory::FactoryError>(())
/// ```
pub struct FactoryRegistry<T: ?Sized> {
    settings: Arc<Settings>,
    state: RwLock<Arc<RegistryState<T>>>,
    singletons: Mutex<HashMap<String, Slot<T>>>,
    per_thread: ThreadLocal<ThreadInstances>,
    generation: AtomicU64,
    next_generation: AtomicU64,
    /// Generations saved by open override frames; their instances are kept.
    pinned: Mutex<Vec<u64>>,
    sealed: AtomicBool,
}

impl<T: ?Sized> fmt::Debug for FactoryRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("FactoryRegistry")
            .field("definitions", &state.definitions.keys().collect::<Vec<_>>())
            .field("default_name", &state.default_name)
            .finish_non_exhaustive()
    }
}

impl<T: ?Sized + Send + Sync + 'static> FactoryRegistry<T> {
    pub fn new(settings: Arc<Settings>) -> Self {
        let state = RegistryState {
            definitions: BTreeMap::new(),
            aliases: BTreeMap::new(),
            implementations: BTreeMap::new(),
            default_name: Some(DEFAULT_FACTORY.to_string()),
            require_explicit: false,
        };

        Self {
            settings,
            state: RwLock::new(Arc::new(state)),
            singletons: Mutex::new(HashMap::new()),
            per_thread: ThreadLocal::new(),
            generation: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
            pinned: Mutex::new(Vec::new()),
            sealed: AtomicBool::new(false),
        }
    }

    /// Changes the name used when no name is given.
    #[must_use]
    pub fn with_default_name(self, name: impl Into<String>) -> Self {
        self.edit(|state| state.default_name = Some(name.into()));
        self
    }

    /// Requires every resolve to name a factory; there is no implicit default.
    #[must_use]
    pub fn require_explicit_name(self) -> Self {
        self.edit(|state| {
            state.default_name = None;
            state.require_explicit = true;
        });
        self
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Makes an implementation available under a target reference.
    pub fn provide(
        &self,
        target: impl Into<String>,
        implementation: Implementation<T>,
    ) -> Result<(), FactoryError> {
        let target = target.into();
        self.ensure_open(&target)?;
        self.try_edit(|state| {
            if state.implementations.contains_key(&target) {
                return Err(FactoryError::DuplicateTarget(target));
            }
            state.implementations.insert(target, implementation);
            Ok(())
        })
    }

    /// Adds a definition. Names and aliases share one namespace.
    pub fn register(&self, definition: FactoryDefinition) -> Result<(), FactoryError> {
        self.ensure_open(&definition.name)?;
        debug!(factory = %definition.name, target = %definition.target, "registering factory");
        self.try_edit(|state| state.insert(definition))
    }

    /// Names of all registered definitions, sorted.
    pub fn available(&self) -> Vec<String> {
        self.state.read().definitions.keys().cloned().collect()
    }

    /// The definition a name or alias refers to.
    pub fn definition(&self, name: &str) -> Option<FactoryDefinition> {
        let state = self.current();
        let canonical = state.canonical(name)?;
        state.definitions.get(canonical).cloned()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<T>, FactoryError> {
        self.resolve_with(Some(name), Args::new())
    }

    pub fn resolve_default(&self) -> Result<Arc<T>, FactoryError> {
        self.resolve_with(None, Args::new())
    }

    /// Resolves `name` (or the default) to an instance.
    ///
    /// Constructor arguments are the definition's fixed arguments, overridden
    /// by injected settings, overridden by `call_args`. For cached modes the
    /// arguments only matter for the call that constructs the instance.
    pub fn resolve_with(
        &self,
        name: Option<&str>,
        call_args: Args,
    ) -> Result<Arc<T>, FactoryError> {
        self.sealed.store(true, Ordering::Release);
        let state = self.current();

        let requested = match name {
            Some(name) => name,
            None if state.require_explicit => return Err(FactoryError::NoDefault),
            None => state.default_name.as_deref().ok_or(FactoryError::NoDefault)?,
        };
        let canonical = state
            .canonical(requested)
            .ok_or_else(|| FactoryError::UnknownFactory(requested.to_string()))?;
        let definition = state
            .definitions
            .get(canonical)
            .ok_or_else(|| FactoryError::UnknownFactory(requested.to_string()))?;
        let implementation = state.implementations.get(&definition.target).ok_or_else(|| {
            FactoryError::CannotImport {
                name: definition.name.clone(),
                target: definition.target.clone(),
            }
        })?;

        match definition.cache_mode {
            CacheMode::None => self.construct(definition, implementation, call_args),
            CacheMode::Singleton => self.singleton(definition, implementation, call_args),
            CacheMode::SingletonPerThread => self.per_thread(definition, implementation, call_args),
        }
    }

    /// Opens a scope for temporary changes to definitions and caches.
    pub fn modify(&self) -> ModifyFactories<'_, T> {
        ModifyFactories::new(OverrideFrame::enter(self))
    }

    fn singleton(
        &self,
        definition: &FactoryDefinition,
        implementation: &Implementation<T>,
        call_args: Args,
    ) -> Result<Arc<T>, FactoryError> {
        let slot = Arc::clone(self.singletons.lock().entry(definition.name.clone()).or_default());

        // Held across construction: concurrent first resolves build once.
        let mut cached = slot.lock();
        if let Some(instance) = cached.as_ref() {
            return Ok(Arc::clone(instance));
        }
        let instance = self.construct(definition, implementation, call_args)?;
        *cached = Some(Arc::clone(&instance));
        Ok(instance)
    }

    fn per_thread(
        &self,
        definition: &FactoryDefinition,
        implementation: &Implementation<T>,
        call_args: Args,
    ) -> Result<Arc<T>, FactoryError> {
        let generation = self.generation.load(Ordering::Acquire);
        let key = (definition.name.clone(), generation);
        let instances = self.per_thread.get_or_default();

        let cached = instances
            .borrow()
            .get(&key)
            .and_then(|instance| instance.downcast_ref::<Arc<T>>().cloned());
        if let Some(instance) = cached {
            return Ok(instance);
        }

        // Not borrowed during construction: constructors may resolve other factories.
        let instance = self.construct(definition, implementation, call_args)?;
        let pinned = self.pinned.lock().clone();
        let mut instances = instances.borrow_mut();
        instances.retain(|(_, g), _| *g == generation || pinned.contains(g));
        instances.insert(key, Box::new(Arc::clone(&instance)));
        Ok(instance)
    }

    fn construct(
        &self,
        definition: &FactoryDefinition,
        implementation: &Implementation<T>,
        call_args: Args,
    ) -> Result<Arc<T>, FactoryError> {
        let snapshot = self.settings.snapshot();

        let mut args = definition.fixed_args.clone();
        for injected in implementation.injected() {
            if let Some(value) = snapshot.find(&injected.setting) {
                args.insert(injected.param.clone(), value.clone());
            }
        }
        args.merge(call_args);

        debug!(factory = %definition.name, target = %definition.target, "constructing instance");
        implementation
            .construct(&args)
            .map_err(|source| FactoryError::Construction {
                name: definition.name.clone(),
                source,
            })
    }
}

impl<T: ?Sized> FactoryRegistry<T> {
    pub(crate) fn current(&self) -> Arc<RegistryState<T>> {
        Arc::clone(&self.state.read())
    }

    pub(crate) fn ensure_open(&self, name: &str) -> Result<(), FactoryError> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(FactoryError::RegistrationClosed(name.to_string()));
        }
        Ok(())
    }

    fn edit(&self, change: impl FnOnce(&mut RegistryState<T>)) {
        let mut state = self.state.write();
        change(Arc::make_mut(&mut *state));
    }

    /// Applies `change` to a copy of the state and publishes it only on success.
    pub(crate) fn try_edit(
        &self,
        change: impl FnOnce(&mut RegistryState<T>) -> Result<(), FactoryError>,
    ) -> Result<(), FactoryError> {
        let mut state = self.state.write();
        let mut next = RegistryState::clone(&state);
        change(&mut next)?;
        *state = Arc::new(next);
        Ok(())
    }

    /// Drops every cached instance.
    pub(crate) fn invalidate(&self) {
        self.singletons.lock().clear();
        let generation = self.next_generation.fetch_add(1, Ordering::AcqRel);
        self.generation.store(generation, Ordering::Release);
    }
}

/// Captured definitions and cached instances.
pub struct RegistrySnapshot<T: ?Sized> {
    state: Arc<RegistryState<T>>,
    singletons: HashMap<String, Arc<T>>,
    generation: u64,
}

impl<T: ?Sized> Overridable for FactoryRegistry<T> {
    type State = RegistrySnapshot<T>;

    fn capture_state(&self) -> RegistrySnapshot<T> {
        let generation = self.generation.load(Ordering::Acquire);
        self.pinned.lock().push(generation);
        RegistrySnapshot {
            state: self.current(),
            singletons: self
                .singletons
                .lock()
                .iter()
                .filter_map(|(name, slot)| Some((name.clone(), Arc::clone(slot.lock().as_ref()?))))
                .collect(),
            generation,
        }
    }

    fn restore_state(&self, saved: RegistrySnapshot<T>) {
        *self.state.write() = saved.state;
        *self.singletons.lock() = saved
            .singletons
            .into_iter()
            .map(|(name, instance)| (name, Arc::new(Mutex::new(Some(instance)))))
            .collect();
        self.generation.store(saved.generation, Ordering::Release);

        let mut pinned = self.pinned.lock();
        if let Some(position) = pinned.iter().rposition(|g| *g == saved.generation) {
            pinned.remove(position);
        }
    }
}
