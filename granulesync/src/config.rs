//! INI configuration file.
//!
//! Settings are read from `~/.granulesync/config.ini` unless an explicit path
//! is given. Every key is optional; a missing file means all defaults.
//!
//! ```ini
//! [download]
//! directory = /data/gedi
//! max_workers = 8
//! timeout_secs = 300
//!
//! [retry]
//! max_retries = 5
//! backoff_factor = 0.5
//!
//! [auth]
//! netrc_file = ~/.netrc
//! host = urs.earthdata.nasa.gov
//!
//! [logging]
//! directory = ~/.granulesync/logs
//! level = info
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::auth::DEFAULT_MACHINE;
use crate::manager::DownloaderConfig;

/// Directory name under the home directory holding config and logs.
pub const CONFIG_DIR_NAME: &str = ".granulesync";

/// Config file name inside [`CONFIG_DIR_NAME`].
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Errors from reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but is not valid INI.
    #[error("failed to parse config file {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    /// A key has a value of the wrong type.
    #[error("invalid value {value:?} for [{section}] {key}: {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Default location of the config file, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Default log directory, if a home directory is known.
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join("logs"))
}

/// Settings read from the config file. `None` means "not set".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub download_dir: Option<PathBuf>,
    pub max_workers: Option<usize>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub backoff_factor: Option<Duration>,
    pub netrc_file: Option<PathBuf>,
    pub auth_host: Option<String>,
    pub log_dir: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl ConfigFile {
    /// Load from `path`, or from the default location when `None`.
    ///
    /// A file that does not exist yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
            Some(path) => path,
            None => return Ok(Self::default()),
        };
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(&path).map_err(|e| ConfigError::Parse {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        let config = Self::from_ini(&ini)?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Parse settings from INI text.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            reason: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        let get = |section: &str, key: &str| -> Option<String> {
            ini.section(Some(section))
                .and_then(|props| props.get(key))
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let max_workers: Option<usize> = parse_value(get("download", "max_workers"), "download", "max_workers")?;
        if max_workers == Some(0) {
            return Err(ConfigError::InvalidValue {
                section: "download".to_string(),
                key: "max_workers".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let timeout_secs: Option<u64> = parse_value(get("download", "timeout_secs"), "download", "timeout_secs")?;
        let backoff_secs: Option<f64> = parse_value(get("retry", "backoff_factor"), "retry", "backoff_factor")?;
        let backoff_factor = backoff_secs
            .map(|secs| {
                Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
                    section: "retry".to_string(),
                    key: "backoff_factor".to_string(),
                    value: secs.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            download_dir: get("download", "directory").map(|v| expand_tilde(&v)),
            max_workers,
            timeout: timeout_secs.map(Duration::from_secs),
            max_retries: parse_value(get("retry", "max_retries"), "retry", "max_retries")?,
            backoff_factor,
            netrc_file: get("auth", "netrc_file").map(|v| expand_tilde(&v)),
            auth_host: get("auth", "host"),
            log_dir: get("logging", "directory").map(|v| expand_tilde(&v)),
            log_level: get("logging", "level"),
        })
    }

    /// Login host for credentials.
    pub fn auth_host(&self) -> &str {
        self.auth_host.as_deref().unwrap_or(DEFAULT_MACHINE)
    }

    /// Merge the file settings into a downloader configuration.
    ///
    /// `download_dir` is used when the file does not name one.
    pub fn to_downloader_config(&self, download_dir: impl Into<PathBuf>) -> DownloaderConfig {
        let dir = self.download_dir.clone().unwrap_or_else(|| download_dir.into());
        let mut config = DownloaderConfig::new(dir);
        if let Some(workers) = self.max_workers {
            config = config.with_max_workers(workers);
        }
        if let Some(timeout) = self.timeout {
            config = config.with_timeout(timeout);
        }
        if let Some(retries) = self.max_retries {
            config.retry = config.retry.with_max_retries(retries);
        }
        if let Some(factor) = self.backoff_factor {
            config.retry = config.retry.with_backoff_factor(factor);
        }
        config
    }
}

fn parse_value<T>(raw: Option<String>, section: &str, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            reason: e.to_string(),
            value,
        })
    })
    .transpose()
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config = ConfigFile::parse(
            "[download]\n\
             directory = /data/gedi\n\
             max_workers = 8\n\
             timeout_secs = 60\n\
             [retry]\n\
             max_retries = 3\n\
             backoff_factor = 0.25\n\
             [auth]\n\
             host = login.example.com\n\
             [logging]\n\
             level = debug\n",
        )
        .unwrap();

        assert_eq!(config.download_dir, Some(PathBuf::from("/data/gedi")));
        assert_eq!(config.max_workers, Some(8));
        assert_eq!(config.timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.max_retries, Some(3));
        assert_eq!(config.backoff_factor, Some(Duration::from_millis(250)));
        assert_eq!(config.auth_host(), "login.example.com");
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = ConfigFile::parse("").unwrap();
        assert_eq!(config, ConfigFile::default());
        assert_eq!(config.auth_host(), DEFAULT_MACHINE);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = ConfigFile::parse("[download]\nmax_workers = many\n").unwrap_err();
        match err {
            ConfigError::InvalidValue { section, key, value, .. } => {
                assert_eq!(section, "download");
                assert_eq!(key, "max_workers");
                assert_eq!(value, "many");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_zero_workers_is_rejected() {
        assert!(matches!(
            ConfigFile::parse("[download]\nmax_workers = 0\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_negative_backoff_is_rejected() {
        assert!(matches!(
            ConfigFile::parse("[retry]\nbackoff_factor = -1\n"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_default() {
        let temp = tempfile::tempdir().unwrap();
        let config = ConfigFile::load(Some(&temp.path().join("absent.ini"))).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_load_from_file() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[download]\nmax_workers = 2\n").unwrap();

        let config = ConfigFile::load(Some(&path)).unwrap();
        assert_eq!(config.max_workers, Some(2));
    }

    #[test]
    fn test_to_downloader_config_merges() {
        let config = ConfigFile {
            max_workers: Some(6),
            max_retries: Some(1),
            ..ConfigFile::default()
        };

        let downloader = config.to_downloader_config("/fallback");
        assert_eq!(downloader.download_dir, PathBuf::from("/fallback"));
        assert_eq!(downloader.max_workers, 6);
        assert_eq!(downloader.retry.max_retries, 1);
        assert_eq!(downloader.timeout, Duration::from_secs(300));
    }
}
