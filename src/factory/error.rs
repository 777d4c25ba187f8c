use thiserror::Error;

use crate::settings::{BoxError, SettingsError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FactoryError {
    #[error("factory name or alias already registered: {0}")]
    DuplicateFactory(String),

    #[error("implementation already provided for target: {0}")]
    DuplicateTarget(String),

    #[error("unknown factory: {0}")]
    UnknownFactory(String),

    #[error("factory '{name}' refers to target '{target}' which cannot be imported")]
    CannotImport { name: String, target: String },

    #[error("no factory name given and no default is available")]
    NoDefault,

    #[error("bad alias '{alias}': {reason}")]
    BadAlias { alias: String, reason: String },

    #[error("factory '{name}' failed to construct an instance: {source}")]
    Construction {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("invalid factory definitions in setting '{key}': {reason}")]
    InvalidDefinition { key: String, reason: String },

    #[error("cannot register factory '{0}' after resolution has started")]
    RegistrationClosed(String),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}
