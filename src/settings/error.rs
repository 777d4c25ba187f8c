use std::fmt;

use thiserror::Error;

/// Boxed error carried as the cause of a failure in a pluggable component.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Category of a [`LoadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum LoadErrorKind {
    /// The source does not exist (missing file, unregistered module, unknown scheme).
    NotFound,
    /// The source exists but could not be read or fetched.
    Unreachable,
    /// The source content is malformed or has the wrong shape.
    ParseError,
    /// The source would be fetched over plaintext or an outdated transport.
    Insecure,
    /// No parser is available for the declared or inferred format.
    UnsupportedFormat,
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotFound => "not found",
            Self::Unreachable => "unreachable",
            Self::ParseError => "parse error",
            Self::Insecure => "insecure source",
            Self::UnsupportedFormat => "unsupported format",
        };
        f.write_str(text)
    }
}

/// Failure of a single settings source.
#[derive(Debug, Error)]
#[error("{kind} in settings source '{locator}': {cause}")]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub locator: String,
    #[source]
    pub cause: BoxError,
}

impl LoadError {
    pub fn new(
        kind: LoadErrorKind,
        locator: impl Into<String>,
        cause: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            locator: locator.into(),
            cause: cause.into(),
        }
    }

    pub fn not_found(locator: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::new(LoadErrorKind::NotFound, locator, cause)
    }

    pub fn unreachable(locator: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::new(LoadErrorKind::Unreachable, locator, cause)
    }

    pub fn parse(locator: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::new(LoadErrorKind::ParseError, locator, cause)
    }

    pub fn insecure(locator: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::new(LoadErrorKind::Insecure, locator, cause)
    }

    pub fn unsupported_format(locator: impl Into<String>, cause: impl Into<BoxError>) -> Self {
        Self::new(LoadErrorKind::UnsupportedFormat, locator, cause)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("setting not defined: {0}")]
    UndefinedSetting(String),

    #[error("setting '{key}' is not a valid {expected}: {source}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        source: serde_json::Error,
    },

    #[error("incompatible settings export version {found} (expected {expected})")]
    IncompatibleExport { found: u32, expected: u32 },

    #[error("failed to encode settings export: {0}")]
    Export(#[source] serde_json::Error),

    #[error("failed to decode settings export: {0}")]
    Import(#[source] serde_json::Error),

    #[error("named config '{name}' not found in setting '{key}'")]
    NamedConfigNotFound { key: String, name: String },

    #[error("named config '{name}' in setting '{key}' is missing required key '{field}'")]
    MissingRequiredKey {
        key: String,
        name: String,
        field: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_error_display_includes_kind_and_locator() {
        let err = LoadError::unreachable("https://example.com/settings.json", "connection refused");
        let text = err.to_string();

        assert!(text.starts_with("unreachable"));
        assert!(text.contains("https://example.com/settings.json"));
        assert!(text.contains("connection refused"));
    }

    #[test]
    fn test_load_error_converts_into_settings_error() {
        let err: SettingsError =
            LoadError::parse("file://a.json?type=application/json", "bad").into();

        match err {
            SettingsError::Load(load) => assert_eq!(load.kind, LoadErrorKind::ParseError),
            other => panic!("unexpected error: {other}"),
        }
    }
}
