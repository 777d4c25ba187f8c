use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Prefix used when none is configured.
pub const DEFAULT_PREFIX: &str = "LAYERCONF";

const DEFAULT_LOG_LEVEL: &str = "info";

/// Names of the environment variables an application reads, all sharing one
/// prefix: `<PREFIX>_SETTINGS` and `<PREFIX>_LOGLEVEL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvNames {
    prefix: String,
}

impl Default for EnvNames {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl EnvNames {
    /// The prefix is upper-cased; a trailing `_` is ignored.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('_').to_ascii_uppercase(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Variable holding the runtime override locator.
    pub fn settings_var(&self) -> String {
        format!("{}_SETTINGS", self.prefix)
    }

    /// Variable holding the log filter directive.
    pub fn log_level_var(&self) -> String {
        format!("{}_LOGLEVEL", self.prefix)
    }

    /// The runtime override locator from the environment. Unset and empty
    /// are both treated as absent.
    pub fn runtime_settings(&self) -> Option<String> {
        read(&self.settings_var())
    }
}

fn read(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Installs a fmt subscriber filtered by `<PREFIX>_LOGLEVEL` (default `info`).
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing(names: &EnvNames) {
    let filter = EnvFilter::try_from_env(names.log_level_var())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    let layer = fmt::layer().with_target(true).with_thread_names(true);
    let _ = Registry::default().with(filter).with(layer).try_init();
}
