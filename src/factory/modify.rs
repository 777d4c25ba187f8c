use std::sync::Arc;

use tracing::debug;

use super::definition::{FactoryDefinition, Implementation};
use super::registry::FactoryRegistry;
use super::FactoryError;
use crate::scope::OverrideFrame;

/// Handle for temporary changes to a [`FactoryRegistry`].
///
/// Registration stays open through this handle after resolution has started.
/// Every change drops the cached instances, and dropping the handle restores
/// definitions and caches as they were when it was opened.
#[must_use = "changes are reverted as soon as the handle is dropped"]
pub struct ModifyFactories<'a, T: ?Sized> {
    frame: OverrideFrame<'a, FactoryRegistry<T>>,
}

impl<'a, T: ?Sized + Send + Sync + 'static> ModifyFactories<'a, T> {
    pub(crate) fn new(frame: OverrideFrame<'a, FactoryRegistry<T>>) -> Self {
        Self { frame }
    }

    pub fn registry(&self) -> &FactoryRegistry<T> {
        self.frame.target()
    }

    /// Adds a definition, replacing any existing one with the same name.
    pub fn register(&mut self, definition: FactoryDefinition) -> Result<&mut Self, FactoryError> {
        debug!(factory = %definition.name, target = %definition.target, "overriding factory");
        self.edit(|state| {
            state.remove(&definition.name);
            state.insert(definition)
        })
    }

    /// Removes a definition and its aliases.
    pub fn remove(&mut self, name: &str) -> Result<&mut Self, FactoryError> {
        self.edit(|state| {
            state
                .remove(name)
                .map(drop)
                .ok_or_else(|| FactoryError::UnknownFactory(name.to_string()))
        })
    }

    /// Provides an implementation for `target`, replacing any existing one.
    pub fn provide(
        &mut self,
        target: impl Into<String>,
        implementation: Implementation<T>,
    ) -> Result<&mut Self, FactoryError> {
        let target = target.into();
        self.edit(|state| {
            state.implementations.insert(target, implementation);
            Ok(())
        })
    }

    /// Makes `name` (or an alias of it) resolve to `instance`.
    ///
    /// Only the named definition changes; other definitions sharing its
    /// target keep their implementation.
    pub fn mock(&mut self, name: &str, instance: Arc<T>) -> Result<&mut Self, FactoryError> {
        self.edit(|state| {
            let mut definition = state
                .definitions
                .values()
                .find(|d| d.identifiers().any(|id| id == name))
                .cloned()
                .ok_or_else(|| FactoryError::UnknownFactory(name.to_string()))?;

            let target = format!("mock:{}", definition.name);
            state
                .implementations
                .insert(target.clone(), Implementation::instance(instance));
            definition.target = target;
            state.definitions.insert(definition.name.clone(), definition);
            Ok(())
        })
    }

    /// Drops every cached instance; the next resolve constructs afresh.
    pub fn reset(&mut self) -> &mut Self {
        self.frame.target().invalidate();
        self
    }

    fn edit(
        &mut self,
        change: impl FnOnce(&mut super::registry::RegistryState<T>) -> Result<(), FactoryError>,
    ) -> Result<&mut Self, FactoryError> {
        let registry = self.frame.target();
        registry.try_edit(change)?;
        registry.invalidate();
        Ok(self)
    }
}
