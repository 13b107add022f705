use facecast::PublisherConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::cli::RunArgs;
use crate::error::{AppError, Result};

/// On-disk configuration, `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub publisher: PublisherConfig,
}

impl AppConfig {
    /// `<config dir>/facecast/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("facecast").join("config.toml"))
    }

    /// Load from `path`, or from the default location when none is given.
    ///
    /// A missing default file yields the defaults; a missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load_file(&path),
                _ => {
                    debug!("No config file found, using defaults");
                    Ok(Self::default())
                }
            },
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| AppError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply command-line overrides on top of the file values.
    pub fn apply(&mut self, args: &RunArgs) {
        let publisher = &mut self.publisher;
        if let Some(endpoint) = &args.endpoint {
            publisher.endpoint = endpoint.clone();
        }
        if let Some(tick_ms) = args.tick_ms {
            publisher.tick_period_ms = tick_ms;
        }
        if let Some(retry_ms) = args.retry_ms {
            publisher.retry_delay_ms = retry_ms;
        }
        if let Some(timeout_ms) = args.connect_timeout_ms {
            publisher.connect_timeout_ms = timeout_ms;
        }
        if let Some(min_confidence) = args.min_confidence {
            publisher.min_confidence = min_confidence;
        }
        if let Some(overlap) = args.overlap {
            publisher.overlap = overlap.into();
        }
        if let Some(delivery) = args.delivery {
            publisher.delivery = delivery.into();
        }
    }

    pub fn show(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{DeliveryArg, OverlapArg};
    use facecast::{DeliveryPolicy, OverlapPolicy};
    use std::io::Write;

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[publisher]\nendpoint = \"ws://192.168.1.20:8080\"\noverlap = \"coalesce\""
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.publisher.endpoint, "ws://192.168.1.20:8080");
        assert_eq!(config.publisher.overlap, OverlapPolicy::Coalesce);
        assert_eq!(config.publisher.tick_period_ms, 100);
        assert_eq!(config.publisher.retry_delay_ms, 3000);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(AppError::Io(_))));
    }

    #[test]
    fn test_invalid_toml_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[publisher\nendpoint = 1").unwrap();

        let err = AppConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, AppError::ConfigParse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_overrides_win() {
        let mut config = AppConfig::default();
        config.apply(&RunArgs {
            endpoint: Some("ws://consumer:7000".into()),
            retry_ms: Some(500),
            min_confidence: Some(0.8),
            delivery: Some(DeliveryArg::ResendLatest),
            overlap: Some(OverlapArg::Skip),
            ..Default::default()
        });

        assert_eq!(config.publisher.endpoint, "ws://consumer:7000");
        assert_eq!(config.publisher.retry_delay_ms, 500);
        assert_eq!(config.publisher.min_confidence, 0.8);
        assert_eq!(
            config.publisher.delivery,
            DeliveryPolicy::ResendLatestOnReconnect
        );
        assert_eq!(config.publisher.tick_period_ms, 100);
    }

    #[test]
    fn test_show_reloads() {
        let config = AppConfig::default();
        let rendered = config.show().unwrap();
        assert!(rendered.contains("[publisher]"));

        let reparsed: AppConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed, config);
    }
}
