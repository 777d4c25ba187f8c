//! Versioned snapshot export, used to hand settings to workers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::snapshot::Snapshot;
use super::SettingsError;

pub const EXPORT_VERSION: u32 = 1;

#[derive(Serialize)]
struct ExportRef<'a> {
    version: u32,
    sources: &'a [String],
    settings: &'a BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Deserialize)]
struct Export {
    #[serde(default)]
    sources: Vec<String>,
    settings: BTreeMap<String, Value>,
}

pub(crate) fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, SettingsError> {
    let export = ExportRef {
        version: EXPORT_VERSION,
        sources: snapshot.sources(),
        settings: snapshot.values(),
    };
    serde_json::to_vec(&export).map_err(SettingsError::Export)
}

pub(crate) fn decode(blob: &[u8]) -> Result<Snapshot, SettingsError> {
    let header: Header = serde_json::from_slice(blob).map_err(SettingsError::Import)?;
    if header.version != EXPORT_VERSION {
        return Err(SettingsError::IncompatibleExport {
            found: header.version,
            expected: EXPORT_VERSION,
        });
    }

    let export: Export = serde_json::from_slice(blob).map_err(SettingsError::Import)?;
    Ok(Snapshot::from_parts(export.settings, export.sources))
}
