//! Tool settings, persisted as JSON.
//!
//! ```json
//! {
//!   "log_level": "INFO",
//!   "backup": false,
//!   "backup_dir": null,
//!   "compression_format": "NONE",
//!   "dry_run": false,
//!   "verbose": false,
//!   "strict_mapping": false
//! }
//! ```
//!
//! Missing keys take their defaults.  Enum values are matched
//! case-insensitively.

use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::codec::CompressionFormat;
use crate::error::{Md1Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn name(self) -> &'static str {
        match self {
            LogLevel::Debug    => "DEBUG",
            LogLevel::Info     => "INFO",
            LogLevel::Warning  => "WARNING",
            LogLevel::Error    => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }

    /// `log` has no level above `Error`, so `Critical` shares it.
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug                       => LevelFilter::Debug,
            LogLevel::Info                        => LevelFilter::Info,
            LogLevel::Warning                     => LevelFilter::Warn,
            LogLevel::Error | LogLevel::Critical  => LevelFilter::Error,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG"    => Ok(LogLevel::Debug),
            "INFO"     => Ok(LogLevel::Info),
            "WARNING"  => Ok(LogLevel::Warning),
            "ERROR"    => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other      => Err(format!(
                "Invalid log level: {other}. Valid levels: DEBUG, INFO, WARNING, ERROR, CRITICAL"
            )),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, String> {
        s.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.name().to_owned()
    }
}

// ── Md1ImgConfig ──────────────────────────────────────────────────────────────

/// Read-only settings handed to the packer and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Md1ImgConfig {
    pub log_level:          LogLevel,
    pub backup:             bool,
    pub backup_dir:         Option<PathBuf>,
    /// Compression for packed files that have no mapping entry.
    pub compression_format: CompressionFormat,
    pub dry_run:            bool,
    pub verbose:            bool,
    /// Treat a missing `md1_file_map` as an error when loading.
    pub strict_mapping:     bool,
}

impl Md1ImgConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            let detail = if e.kind() == std::io::ErrorKind::NotFound {
                "Configuration file not found".to_owned()
            } else {
                e.to_string()
            };
            Md1Error::config(detail, Some(path))
        })?;
        Self::from_json(&text).map_err(|e| match e {
            Md1Error::ConfigurationInvalid { detail, .. } => Md1Error::config(detail, Some(path)),
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Md1Error::config(format!("Invalid JSON: {e}"), None))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Md1Error::config(e.to_string(), None))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        fs::write(path, json + "\n")
            .map_err(|e| Md1Error::config(format!("Failed to save configuration: {e}"), Some(path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let cfg = Md1ImgConfig::from_json(r#"{"dry_run": true}"#).unwrap();
        assert!(cfg.dry_run);
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg.compression_format, CompressionFormat::None);
        assert_eq!(cfg.backup_dir, None);
    }

    #[test]
    fn enum_values_are_case_insensitive() {
        let cfg = Md1ImgConfig::from_json(
            r#"{"log_level": "debug", "compression_format": "lzma", "backup_dir": "/tmp/bk"}"#,
        )
        .unwrap();
        assert_eq!(cfg.log_level, LogLevel::Debug);
        assert_eq!(cfg.compression_format, CompressionFormat::Xz);
        assert_eq!(cfg.backup_dir, Some(PathBuf::from("/tmp/bk")));
    }

    #[test]
    fn log_level_from_string() {
        assert_eq!(LogLevel::try_from("critical".to_owned()), Ok(LogLevel::Critical));
        assert_eq!(LogLevel::try_from("Warning".to_owned()), Ok(LogLevel::Warning));
        assert!(LogLevel::try_from("verbose".to_owned()).is_err());
        assert_eq!(String::from(LogLevel::Error), "ERROR");
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        for bad in [r#"{"log_level": "LOUD"}"#, r#"{"compression_format": "zip"}"#, "{not json"] {
            assert!(matches!(
                Md1ImgConfig::from_json(bad),
                Err(Md1Error::ConfigurationInvalid { .. })
            ));
        }
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = Md1ImgConfig {
            log_level: LogLevel::Warning,
            compression_format: CompressionFormat::Gzip,
            backup: true,
            ..Default::default()
        };
        cfg.save(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains(r#""compression_format": "GZIP""#));
        assert_eq!(Md1ImgConfig::from_file(&path).unwrap(), cfg);
    }

    #[test]
    fn missing_file_names_its_origin() {
        let err = Md1ImgConfig::from_file("/nonexistent/md1img.json").unwrap_err();
        match err {
            Md1Error::ConfigurationInvalid { origin, .. } => {
                assert_eq!(origin, Some(PathBuf::from("/nonexistent/md1img.json")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
