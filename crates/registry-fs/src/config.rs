//! Format-agnostic document loading and saving

use std::path::Path;

use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result, io};

/// Serialization format, detected from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Toml,
    Json,
    Yaml,
}

impl Format {
    /// Detect the format from a path's extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(Error::UnsupportedFormat { extension }),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Toml => "TOML",
            Self::Json => "JSON",
            Self::Yaml => "YAML",
        }
    }

    /// Deserialize `content` in this format.
    pub fn parse<T: DeserializeOwned>(self, content: &str, path: &Path) -> Result<T> {
        let parsed = match self {
            Self::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            Self::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| Error::ConfigParse {
            path: path.to_path_buf(),
            format: self.label().into(),
            message,
        })
    }

    /// Serialize `value` in this format.
    pub fn render<T: Serialize>(self, value: &T, path: &Path) -> Result<String> {
        let rendered = match self {
            Self::Toml => toml::to_string_pretty(value).map_err(|e| e.to_string()),
            Self::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        };
        rendered.map_err(|message| Error::ConfigSerialize {
            path: path.to_path_buf(),
            format: self.label().into(),
            message,
        })
    }
}

/// Format-agnostic document store.
///
/// Detects the format from the file extension and writes atomically.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigStore;

impl ConfigStore {
    pub fn new() -> Self {
        Self
    }

    /// Load a document from a file.
    ///
    /// Format is detected from file extension:
    /// - `.toml` -> TOML
    /// - `.json` -> JSON
    /// - `.yaml`, `.yml` -> YAML
    pub fn load<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        let format = Format::from_path(path)?;
        let content = io::read_text(path)?;
        format.parse(&content, path)
    }

    /// Load a document, falling back to `T::default()` when the file is absent.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, path: &Path) -> Result<T> {
        if !path.exists() {
            return Ok(T::default());
        }
        self.load(path)
    }

    /// Save a document atomically, in the format implied by its extension.
    pub fn save<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let format = Format::from_path(path)?;
        let content = format.render(value, path)?;
        io::write_atomic(path, content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
    }

    #[test]
    fn round_trips_every_format() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new();
        let sample = Sample {
            name: "parser".into(),
            count: 3,
        };

        for file in ["s.toml", "s.json", "s.yaml", "s.yml"] {
            let path = dir.path().join(file);
            store.save(&path, &sample).unwrap();
            let loaded: Sample = store.load(&path).unwrap();
            assert_eq!(loaded, sample, "format of {file}");
        }
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempdir().unwrap();
        let err = ConfigStore::new()
            .save(&dir.path().join("s.ini"), &Sample::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { extension } if extension == "ini"));
    }

    #[test]
    fn missing_file_loads_default() {
        let dir = tempdir().unwrap();
        let loaded: Sample = ConfigStore::new()
            .load_or_default(&dir.path().join("absent.toml"))
            .unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn parse_error_names_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        io::write_text(&path, "name: [unclosed").unwrap();

        let err = ConfigStore::new().load::<Sample>(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigParse { ref format, .. } if format == "YAML"));
    }
}
