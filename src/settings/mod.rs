//! Settings loading, merging and access.

mod builder;
mod container;
mod error;
mod export;
mod file;
mod format;
mod locator;
mod module;
mod named;
mod remote;
mod snapshot;
mod source;

pub use builder::Sources;
pub use container::{ModifySettings, ResetTo, Settings};
pub use error::{BoxError, LoadError, LoadErrorKind, SettingsError};
pub use export::EXPORT_VERSION;
pub use file::FileLoader;
pub use format::Format;
pub use locator::LoaderFactory;
pub use module::{ModuleLoader, Namespace, ObjectLoader, SettingsNamespace};
pub use named::NamedConfig;
pub use remote::{Fetch, FetchError, Fetched, HttpFetcher, RemoteLoader, RemoteOptions};
pub use snapshot::{Origin, Snapshot, INCLUDE_SETTINGS};
pub use source::{is_setting_key, Loader, SettingEntry, SourceDescriptor, Tier};
pub use serde_json::Value;
