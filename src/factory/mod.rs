//! Named factories resolving to shared or fresh instances.

mod args;
mod definition;
mod error;
mod modify;
mod plugins;
mod registry;

pub use args::{ArgError, Args};
pub use definition::{CacheMode, FactoryDefinition, Implementation, Injected};
pub use error::FactoryError;
pub use modify::ModifyFactories;
pub use plugins::ALIAS_TARGET;
pub use registry::{FactoryRegistry, RegistrySnapshot, DEFAULT_FACTORY};
