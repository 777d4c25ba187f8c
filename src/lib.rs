//! Layered runtime settings and named factories.
//!
//! Settings are compiled from ordered sources into an immutable snapshot that
//! is published atomically; factories resolve names to instances, optionally
//! cached and with constructor arguments injected from settings. Both can be
//! changed temporarily through scoped handles that revert on drop. Feature
//! flags read their state from the environment and from settings.

pub mod context;
mod error;
pub mod factory;
pub mod flags;
pub mod scope;
pub mod settings;

pub use context::{AppContext, Extension};
pub use error::Error;
pub use factory::{FactoryError, FactoryRegistry};
pub use flags::FeatureFlags;
pub use settings::{Settings, SettingsError};
