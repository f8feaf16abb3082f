//! TOML configuration parsing.
//!
//! Only `[db]` is required; `[remote]` and `[sync]` fall back to defaults
//! that point at the public archive and use the stock flush thresholds.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::batch::{DEFAULT_ACTIVITY_THRESHOLD, DEFAULT_BATCH_SIZE};

/// Where the binary looks when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "./config/comics.toml";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: None,
        }
    }
}

fn default_base_url() -> String {
    "https://xkcd.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// Flush thresholds for the batch accumulator.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Items processed before the accumulator stops flushing one by one.
    #[serde(default = "default_activity_threshold")]
    pub activity_threshold: usize,
    /// Pending-list size that always triggers a flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            activity_threshold: DEFAULT_ACTIVITY_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

fn default_activity_threshold() -> usize {
    DEFAULT_ACTIVITY_THRESHOLD
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Config {
    /// Config with every default filled in and the database under `./data`.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/comics.sqlite"),
            },
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.sync.batch_size == 0 {
            anyhow::bail!("sync.batch_size must be >= 1");
        }

        let base = self.remote.base_url.trim();
        if base.is_empty() {
            anyhow::bail!("remote.base_url must not be empty");
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            anyhow::bail!(
                "remote.base_url must start with http:// or https://, got '{}'",
                base
            );
        }

        if self.remote.timeout_secs == 0 {
            anyhow::bail!("remote.timeout_secs must be >= 1");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

/// Load `path` if given. Without one, the default location is used when it
/// exists and `Config::minimal()` otherwise.
pub fn resolve_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return load_config(path);
    }
    let default = Path::new(DEFAULT_CONFIG_PATH);
    if default.exists() {
        load_config(default)
    } else {
        Ok(Config::minimal())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let cfg = parse_config("[db]\npath = \"/tmp/comics.sqlite\"\n").unwrap();
        assert_eq!(cfg.remote.base_url, "https://xkcd.com");
        assert_eq!(cfg.remote.timeout_secs, 30);
        assert_eq!(cfg.sync.activity_threshold, 50);
        assert_eq!(cfg.sync.batch_size, 200);
    }

    #[test]
    fn test_thresholds_override() {
        let cfg = parse_config(
            r#"
[db]
path = "/tmp/comics.sqlite"

[sync]
activity_threshold = 3
batch_size = 10
"#,
        )
        .unwrap();
        assert_eq!(cfg.sync.activity_threshold, 3);
        assert_eq!(cfg.sync.batch_size, 10);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = parse_config("[db]\npath = \"x\"\n[sync]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let err =
            parse_config("[db]\npath = \"x\"\n[remote]\nbase_url = \"ftp://example\"\n").unwrap_err();
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_minimal_is_valid_with_stock_defaults() {
        let cfg = Config::minimal();
        cfg.validate().unwrap();
        assert_eq!(cfg.db.path, PathBuf::from("./data/comics.sqlite"));
        assert_eq!(cfg.remote.base_url, "https://xkcd.com");
        assert_eq!(cfg.sync.activity_threshold, DEFAULT_ACTIVITY_THRESHOLD);
        assert_eq!(cfg.sync.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = resolve_config(Some(&tmp.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_missing_db_section_fails() {
        assert!(parse_config("[sync]\nbatch_size = 5\n").is_err());
    }
}
