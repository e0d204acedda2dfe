//! Configuration loading and types

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for the hostmap CLI
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Defaults applied when a flag is not given
    #[serde(default)]
    pub defaults: Defaults,
    /// Named host groups
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    /// File this configuration was read from (unset: built-in defaults)
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Log level used when neither the flag nor the config sets one
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Connection and logging defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Defaults {
    /// Remote user (empty: current login name)
    #[serde(default)]
    pub user: String,
    /// Private key path (empty: `~/.ssh/id_rsa`)
    #[serde(default)]
    pub key: String,
    /// SSH port (empty: `PORT` env var, then 22)
    #[serde(default)]
    pub port: String,
    /// Maximum hosts in flight (unset: unbounded)
    pub concurrency: Option<usize>,
    /// Connect timeout in seconds (unset: none)
    pub connect_timeout: Option<u64>,
    /// Log level or filter directive (unset: `warn`)
    pub log_level: Option<String>,
}

impl Defaults {
    /// Pick the log level: flag, then config, then `warn`
    pub fn log_level<'a>(&'a self, flag: Option<&'a str>) -> &'a str {
        flag.or(self.log_level.as_deref()).unwrap_or(DEFAULT_LOG_LEVEL)
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &Path) -> eyre::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load from explicit path, default paths, or use defaults
    ///
    /// # Errors
    /// Returns error if a config file exists but cannot be read or parsed
    pub fn load_default(explicit: Option<&Path>) -> eyre::Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        // Check environment variable
        if let Ok(path) = std::env::var("HOSTMAP_CONFIG") {
            return Self::load(&PathBuf::from(path));
        }

        // Try common paths
        let mut paths = vec![PathBuf::from("hostmap.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("hostmap/hostmap.toml"));
        }

        for path in paths {
            if path.exists() {
                return Self::load(&path);
            }
        }

        // No file found; the caller reports this once logging is up
        Ok(Config::default())
    }

    /// Look up a named group
    ///
    /// # Errors
    /// Returns error if the group is not defined
    pub fn group(&self, name: &str) -> eyre::Result<&[String]> {
        self.groups
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| eyre::eyre!("unknown host group: {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: Config = toml::from_str(
            r#"
            [defaults]
            user = "deploy"
            key = "/keys/deploy"
            port = "2222"
            concurrency = 16
            connect_timeout = 5

            [groups]
            web = ["web1", "web2"]
            db = ["db1"]
            "#,
        )
        .unwrap();

        assert_eq!(config.defaults.user, "deploy");
        assert_eq!(config.defaults.port, "2222");
        assert_eq!(config.defaults.concurrency, Some(16));
        assert_eq!(config.defaults.log_level(None), "warn");
        assert_eq!(config.group("web").unwrap(), ["web1", "web2"]);
        assert!(config.group("cache").is_err());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.defaults.user.is_empty());
        assert!(config.defaults.concurrency.is_none());
        assert!(config.groups.is_empty());
        assert!(config.source.is_none());
    }

    #[test]
    fn test_log_level_from_config() {
        let config: Config = toml::from_str("[defaults]\nlog_level = \"debug\"\n").unwrap();
        assert_eq!(config.defaults.log_level(None), "debug");
        assert_eq!(config.defaults.log_level(Some("error")), "error");
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostmap.toml");
        std::fs::write(&path, "[groups]\nall = [\"a\", \"b\"]\n").unwrap();

        let config = Config::load_default(Some(&path)).unwrap();
        assert_eq!(config.group("all").unwrap().len(), 2);
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }
}
