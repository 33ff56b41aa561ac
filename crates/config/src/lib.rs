//! Configuration loading and validation.
//!
//! Configuration is layered with [`figment`], later sources overriding
//! earlier ones:
//!
//! 1. Built-in defaults ([`Config::default`]).
//! 2. `config.toml` then `config.yaml` in the platform configuration
//!    directory, when they exist.
//! 3. An explicit file handed to [`Config::load`] (format chosen by
//!    extension: `.toml`, `.yaml`/`.yml` or `.json`).
//! 4. Environment variables prefixed `TRAWL_`, with `__` separating nested
//!    keys (e.g. `TRAWL_DATABASE__FALLBACK_URL`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "TRAWL_";
const APPLICATION: &str = "trawl";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
}

/// Where the shared record database lives and how connections behave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Primary connection target, tried first by every context.
    pub url: String,
    /// Secondary connection target, tried when the primary cannot be opened.
    pub fallback_url: Option<String>,
    /// How long a connection waits on a locked database before giving up.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let path = ProjectDirs::from("", "", APPLICATION)
            .map(|dirs| dirs.data_dir().join("trawl.db"))
            .unwrap_or_else(|| PathBuf::from("trawl.db"));
        Self {
            url: format!("sqlite://{}?mode=rwc", path.display()),
            fallback_url: None,
            busy_timeout_ms: 1500,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Scheduler timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Length of one startup-offset step, in seconds. Offsets in the schedule
    /// table are multiples of this unit.
    pub base_unit_secs: u64,
    /// How long to wait for running plugins after a stop request.
    pub shutdown_grace_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_unit_secs: 60,
            shutdown_grace_secs: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn base_unit(&self) -> Duration {
        Duration::from_secs(self.base_unit_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Config {
    /// Load configuration from defaults, the platform configuration
    /// directory, an optional explicit file, and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let dirs = ProjectDirs::from("", "", APPLICATION);
        Self::load_layered(dirs.as_ref().map(ProjectDirs::config_dir), file)
    }

    /// Same as [`load`](Self::load), but with the configuration directory
    /// chosen by the caller (or skipped entirely with `None`).
    pub fn load_layered(config_dir: Option<&Path>, file: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(config_dir, file).extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        tracing::debug!(database = %config.database.url, "Configuration loaded");
        Ok(config)
    }

    fn figment(config_dir: Option<&Path>, file: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(dir) = config_dir {
            figment = figment.merge(Toml::file(dir.join("config.toml"))).merge(Yaml::file(dir.join("config.yaml")));
        }
        if let Some(file) = file {
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(file)),
                Some("json") => figment.merge(Json::file(file)),
                _ => figment.merge(Toml::file(file)),
            };
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Reject values that would make the process unusable.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("database.url must not be empty"));
        }
        if self.database.fallback_url.as_deref().is_some_and(|url| url.trim().is_empty()) {
            exn::bail!(ErrorKind::Invalid("database.fallback_url must not be empty when set"));
        }
        if self.database.busy_timeout_ms == 0 {
            exn::bail!(ErrorKind::Invalid("database.busy_timeout_ms must be positive"));
        }
        if self.scheduler.base_unit_secs == 0 {
            exn::bail!(ErrorKind::Invalid("scheduler.base_unit_secs must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use rstest::rstest;

    fn load(jail: &Jail, file: Option<&str>) -> figment::error::Result<Config> {
        let file = file.map(|name| jail.directory().join(name));
        Config::load_layered(None, file.as_deref()).map_err(|err| err.to_string().into())
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.database.url.starts_with("sqlite://"));
        assert_eq!(config.database.fallback_url, None);
        assert_eq!(config.database.busy_timeout(), Duration::from_millis(1500));
        assert_eq!(config.scheduler.base_unit(), Duration::from_secs(60));
        assert_eq!(config.scheduler.shutdown_grace(), Duration::from_secs(30));
        config.validate().unwrap();
    }

    #[test]
    fn test_file_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "trawl.toml",
                r#"
                    [database]
                    url = "sqlite:///srv/trawl/records.db"
                    fallback_url = "sqlite:///mnt/shared/records.db"

                    [scheduler]
                    base_unit_secs = 1
                "#,
            )?;
            let config = load(jail, Some("trawl.toml"))?;
            assert_eq!(config.database.url, "sqlite:///srv/trawl/records.db");
            assert_eq!(config.database.fallback_url.as_deref(), Some("sqlite:///mnt/shared/records.db"));
            assert_eq!(config.scheduler.base_unit_secs, 1);
            // Untouched keys keep their defaults.
            assert_eq!(config.scheduler.shutdown_grace_secs, 30);
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file() {
        Jail::expect_with(|jail| {
            jail.create_file("trawl.yaml", "scheduler:\n  shutdown_grace_secs: 5\n")?;
            let config = load(jail, Some("trawl.yaml"))?;
            assert_eq!(config.scheduler.shutdown_grace_secs, 5);
            Ok(())
        });
    }

    #[test]
    fn test_environment_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("trawl.toml", "[database]\nurl = \"sqlite://from-file.db\"\n")?;
            jail.set_env("TRAWL_DATABASE__URL", "sqlite://from-env.db");
            jail.set_env("TRAWL_SCHEDULER__BASE_UNIT_SECS", "2");
            let config = load(jail, Some("trawl.toml"))?;
            assert_eq!(config.database.url, "sqlite://from-env.db");
            assert_eq!(config.scheduler.base_unit_secs, 2);
            Ok(())
        });
    }

    #[test]
    fn test_config_directory_is_layered() {
        Jail::expect_with(|jail| {
            jail.create_file("config.toml", "[database]\nbusy_timeout_ms = 250\n")?;
            let config = Config::load_layered(Some(jail.directory()), None).map_err(|err| err.to_string())?;
            assert_eq!(config.database.busy_timeout_ms, 250);
            Ok(())
        });
    }

    #[rstest]
    #[case("[database]\nurl = \"  \"\n")]
    #[case("[database]\nfallback_url = \"\"\n")]
    #[case("[database]\nbusy_timeout_ms = 0\n")]
    #[case("[scheduler]\nbase_unit_secs = 0\n")]
    fn test_invalid_values_are_rejected(#[case] contents: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, contents).unwrap();
        let err = Config::load_layered(None, Some(&path)).unwrap_err();
        assert!(matches!(*err, ErrorKind::Invalid(_)));
    }

    #[test]
    fn test_malformed_file_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[scheduler]\nbase_unit_secs = \"soon\"\n").unwrap();
        let err = Config::load_layered(None, Some(&path)).unwrap_err();
        assert_eq!(*err, ErrorKind::Load);
    }
}
