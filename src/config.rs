use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_NAME: &str = "patent_scraper";
const ENV_PREFIX: &str = "PATENTS";
const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Source(#[from] config::ConfigError),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Immutable run parameters. Layered: defaults, then an optional
/// `patent_scraper.{toml,json,yaml}` file, then `PATENTS_*` env vars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub patent_base_url: String,
    pub listing_base_url: String,
    pub timeout_secs: u64,
    pub request_delay_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_backoff_ms: u64,
    pub max_total_wait_ms: u64,
    pub halt_after_consecutive_failures: usize,
    pub output_dir: PathBuf,
    pub user_agent: String,
    pub start_page: u32,
    pub end_page: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            patent_base_url: "https://patents.google.com/patent/".into(),
            listing_base_url: "https://ised-isde.canada.ca/ipm-mcpi/patents-brevets".into(),
            timeout_secs: 30,
            request_delay_ms: 2000,
            max_retries: 3,
            backoff_base_ms: 2000,
            max_backoff_ms: 30_000,
            max_total_wait_ms: 120_000,
            halt_after_consecutive_failures: 5,
            output_dir: PathBuf::from("output"),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
            start_page: 1,
            end_page: 20,
        }
    }
}

impl Settings {
    /// Load settings. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        let settings: Settings = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "timeout_secs",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid {
                key: "max_retries",
                reason: format!("at most {} allowed", MAX_RETRIES_LIMIT),
            });
        }
        if self.start_page > self.end_page {
            return Err(ConfigError::Invalid {
                key: "start_page",
                reason: format!("{} is after end_page {}", self.start_page, self.end_page),
            });
        }
        for (key, url) in [
            ("patent_base_url", &self.patent_base_url),
            ("listing_base_url", &self.listing_base_url),
        ] {
            if reqwest::Url::parse(url).is_err() {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("not a valid URL: {}", url),
                });
            }
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        assert!(s.validate().is_ok());
        assert_eq!(s.request_delay(), Duration::from_secs(2));
        assert_eq!(s.max_retries, 3);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(
            &path,
            "request_delay_ms = 500\nmax_retries = 1\noutput_dir = \"captures\"\n",
        )
        .unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.request_delay_ms, 500);
        assert_eq!(s.max_retries, 1);
        assert_eq!(s.output_dir, PathBuf::from("captures"));
        // untouched keys keep their defaults
        assert_eq!(s.timeout_secs, 30);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn rejects_inverted_page_range() {
        let s = Settings {
            start_page: 5,
            end_page: 2,
            ..Settings::default()
        };
        assert!(matches!(
            s.validate(),
            Err(ConfigError::Invalid { key: "start_page", .. })
        ));
    }
}
