use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;
pub const DEFAULT_LOOKAHEAD_YEARS: u32 = 10;
pub const MAX_LOOKAHEAD_YEARS: u32 = 100;
pub const DEFAULT_LOG_FILTER: &str = "tempo_scheduler=info,tempo_runner=info";

/// Top-level config (tempo.toml + TEMPO_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TempoConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// How long `shutdown()` waits for in-flight invocations before returning.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Search horizon for the next fire time when the year field is unrestricted.
    #[serde(default = "default_lookahead_years")]
    pub lookahead_years: u32,
}

impl SchedulerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Lookahead clamped to `1..=MAX_LOOKAHEAD_YEARS`.
    pub fn lookahead_years(&self) -> u32 {
        self.lookahead_years.clamp(1, MAX_LOOKAHEAD_YEARS)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            lookahead_years: DEFAULT_LOOKAHEAD_YEARS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_shutdown_grace_secs() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_SECS
}
fn default_lookahead_years() -> u32 {
    DEFAULT_LOOKAHEAD_YEARS
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl TempoConfig {
    /// Load config from a TOML file with TEMPO_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. `TEMPO_CONFIG` env var
    ///   3. ~/.tempo/tempo.toml
    ///
    /// A missing file is not an error; defaults fill every absent key.
    /// Nested keys in env vars use a double underscore:
    /// `TEMPO_SCHEDULER__SHUTDOWN_GRACE_SECS=5`.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("TEMPO_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let config: TempoConfig = Figment::from(Serialized::defaults(TempoConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TEMPO_").ignore(&["config"]).split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.tempo/tempo.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|_jail| {
            let config = TempoConfig::load(Some("does-not-exist.toml")).expect("load");
            assert_eq!(config.scheduler.shutdown_grace_secs, DEFAULT_SHUTDOWN_GRACE_SECS);
            assert_eq!(config.scheduler.lookahead_years, DEFAULT_LOOKAHEAD_YEARS);
            assert_eq!(config.logging.filter, DEFAULT_LOG_FILTER);
            Ok(())
        });
    }

    #[test]
    fn file_values_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "tempo.toml",
                r#"
                [scheduler]
                shutdown_grace_secs = 3

                [logging]
                filter = "debug"
                "#,
            )?;
            let config = TempoConfig::load(Some("tempo.toml")).expect("load");
            assert_eq!(config.scheduler.shutdown_grace(), Duration::from_secs(3));
            assert_eq!(config.scheduler.lookahead_years, DEFAULT_LOOKAHEAD_YEARS);
            assert_eq!(config.logging.filter, "debug");
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("tempo.toml", "[scheduler]\nshutdown_grace_secs = 3\n")?;
            jail.set_env("TEMPO_SCHEDULER__SHUTDOWN_GRACE_SECS", "7");
            let config = TempoConfig::load(Some("tempo.toml")).expect("load");
            assert_eq!(config.scheduler.shutdown_grace_secs, 7);
            Ok(())
        });
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        Jail::expect_with(|jail| {
            jail.create_file("tempo.toml", "[scheduler]\nshutdown_grace_secs = \"soon\"\n")?;
            let err = TempoConfig::load(Some("tempo.toml")).unwrap_err();
            assert_eq!(err.code(), "CONFIG_ERROR");
            Ok(())
        });
    }

    #[test]
    fn lookahead_is_clamped() {
        let mut config = SchedulerConfig::default();
        config.lookahead_years = 0;
        assert_eq!(config.lookahead_years(), 1);
        config.lookahead_years = 10_000;
        assert_eq!(config.lookahead_years(), MAX_LOOKAHEAD_YEARS);
    }
}
