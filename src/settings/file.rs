//! File-based settings source.

use std::path::{Path, PathBuf};

use super::format::Format;
use super::source::{Loader, SettingEntry};
use super::LoadError;

/// A settings source that loads from a JSON, YAML or TOML file.
///
/// The format is taken from the file extension unless given explicitly.
#[derive(Debug, Clone)]
pub struct FileLoader {
    path: PathBuf,
    format: Option<Format>,
}

impl FileLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let format = Format::from_path(&path);
        Self { path, format }
    }

    pub fn with_format(path: impl AsRef<Path>, format: Format) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            format: Some(format),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Loader for FileLoader {
    fn locator(&self) -> String {
        let path = self.path.to_string_lossy();
        match self.format {
            Some(format) => format!("file://{path}?type={}", format.mime_type()),
            None => format!("file://{path}"),
        }
    }

    fn load(&self) -> Result<Vec<SettingEntry>, LoadError> {
        let locator = self.locator();
        let format = self.format.ok_or_else(|| {
            LoadError::unsupported_format(&locator, "cannot infer format from file name")
        })?;

        let contents = read_settings_file(&self.path, &locator)?;
        format.parse_entries(&contents, &locator)
    }
}

fn read_settings_file(path: &Path, locator: &str) -> Result<String, LoadError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LoadError::not_found(locator, e)),
        Err(e) => Err(LoadError::unreachable(locator, e)),
    }
}
