//! Errors raised while loading topology and policy documents.

use std::path::PathBuf;
use thiserror::Error;

/// Why a topology or policy document could not be loaded or stored.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document could not be read from disk.
    #[error("cannot read configuration document '{path}': {source}")]
    ReadFile {
        /// Document path.
        path: PathBuf,
        /// I/O cause.
        #[source]
        source: std::io::Error,
    },

    /// The document could not be stored.
    #[error("cannot store configuration document '{path}': {source}")]
    WriteFile {
        /// Document path.
        path: PathBuf,
        /// I/O cause.
        #[source]
        source: std::io::Error,
    },

    /// The directory meant to hold a stored document could not be made.
    #[error("cannot create configuration directory '{path}': {source}")]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// I/O cause.
        #[source]
        source: std::io::Error,
    },

    /// The document is not well-formed, or a field has the wrong shape.
    #[error("malformed configuration document: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// A topology or policy could not be rendered back to a document.
    #[error("cannot render configuration document: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Modules, devices, profiles or routes refer to each other wrongly,
    /// or a policy setting is out of range.
    #[error("inconsistent declarations: {0}")]
    Validation(#[from] crate::validation::ValidationError),
}

impl ConfigError {
    /// `path` could not be read.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// `path` could not be written.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// The directory `path` could not be created.
    pub fn create_dir(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::CreateDir {
            path: path.into(),
            source,
        }
    }
}

/// Writes `content` to `path`, creating parent directories as needed.
pub(crate) fn write_with_parents(path: &std::path::Path, content: &str) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
    }
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationError;
    use std::error::Error;

    fn missing() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotFound, "no such file")
    }

    #[test]
    fn unreadable_document_names_its_path() {
        let err = ConfigError::read_file("/etc/patchbay/topology.toml", missing());
        let msg = err.to_string();
        assert!(msg.contains("cannot read configuration document"), "got: {msg}");
        assert!(msg.contains("/etc/patchbay/topology.toml"), "got: {msg}");
        assert!(err.source().is_some());
    }

    #[test]
    fn store_errors_name_what_failed() {
        assert!(matches!(
            ConfigError::write_file("/x", missing()),
            ConfigError::WriteFile { .. }
        ));
        let err = ConfigError::create_dir("/a/b", missing());
        assert!(err.to_string().contains("cannot create configuration directory"));
    }

    #[test]
    fn malformed_document_converts() {
        let parse = toml::from_str::<toml::Value>("[[modules]\nname = ").unwrap_err();
        let err = ConfigError::from(parse);
        assert!(matches!(err, ConfigError::TomlParse(_)));
        assert!(err.to_string().starts_with("malformed configuration document"));
    }

    #[test]
    fn inconsistent_declarations_convert() {
        let err: ConfigError = ValidationError::UnknownName {
            kind: "device type",
            name: "out_theremin".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "inconsistent declarations: unknown device type 'out_theremin'"
        );
    }
}
