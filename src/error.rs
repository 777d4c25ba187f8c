use thiserror::Error;

use crate::factory::FactoryError;
use crate::settings::{BoxError, LoadError, SettingsError};

/// Top-level error type for the layerconf library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("factory error: {0}")]
    Factory(#[from] FactoryError),

    #[error("settings source error: {0}")]
    Load(#[from] LoadError),

    #[error("application context requires at least one application-default settings source")]
    MissingDefaults,

    #[error("extension '{name}' failed to start: {source}")]
    Extension { name: String, source: BoxError },
}
