//! Runtime configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config
//! file. Environment variables prefixed `CASTFLOW_` override file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::cache::DEFAULT_TTL_SECONDS;
use crate::errors::ConfigError;
use crate::graph::DEFAULT_MAX_TRANSITIONS;
use crate::observability::LogFormat;
use crate::pipelines::TriggerTable;
use crate::retry::{BackoffStrategy, QualityThresholds, RetryConfig};

/// TTL cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL applied when a caller does not pass one.
    pub default_ttl_seconds: u64,
    /// Index file name inside `data_dir`.
    pub index_file: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            index_file: "cache_index.json".to_string(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between ticks.
    pub tick_interval_seconds: u64,
    /// Whether pending entries are written to `data_dir`.
    pub persist: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 60,
            persist: true,
        }
    }
}

/// Graph executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Stage invocations allowed per run.
    pub max_transitions: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_transitions: DEFAULT_MAX_TRANSITIONS,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CastflowConfig {
    /// Root for run records, the cache index and the schedule file.
    pub data_dir: PathBuf,
    /// Log output format.
    pub log_format: LogFormat,
    /// Cache settings.
    pub cache: CacheConfig,
    /// Retry policy for every step.
    pub retry: RetryConfig,
    /// Quality gates.
    pub quality: QualityThresholds,
    /// Scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Executor settings.
    pub executor: ExecutorConfig,
    /// Trigger events keyed by `{sport}_{trigger}`.
    pub triggers: TriggerTable,
}

impl Default for CastflowConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            log_format: LogFormat::default(),
            cache: CacheConfig::default(),
            retry: RetryConfig::default(),
            quality: QualityThresholds::default(),
            scheduler: SchedulerConfig::default(),
            executor: ExecutorConfig::default(),
            triggers: TriggerTable::default(),
        }
    }
}

impl CastflowConfig {
    /// Loads a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Defaults with `CASTFLOW_*` environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Loads `path` if given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides read through `lookup`.
    ///
    /// Recognised keys: `CASTFLOW_DATA_DIR`, `CASTFLOW_LOG_FORMAT`,
    /// `CASTFLOW_CACHE_TTL_SECONDS`, `CASTFLOW_RETRY_MAX_ATTEMPTS`,
    /// `CASTFLOW_RETRY_BASE_DELAY_MS`, `CASTFLOW_RETRY_MAX_DELAY_MS`,
    /// `CASTFLOW_RETRY_BACKOFF`, `CASTFLOW_MIN_RESEARCH_SOURCES`,
    /// `CASTFLOW_MIN_SCRIPT_WORD_COUNT`, `CASTFLOW_SCHEDULER_TICK_SECONDS`
    /// and `CASTFLOW_MAX_TRANSITIONS`.
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("CASTFLOW_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = lookup("CASTFLOW_LOG_FORMAT") {
            self.log_format = raw.parse().map_err(|_| invalid("CASTFLOW_LOG_FORMAT", &raw))?;
        }
        if let Some(raw) = lookup("CASTFLOW_RETRY_BACKOFF") {
            self.retry.backoff_strategy = parse_backoff(&raw).ok_or_else(|| invalid("CASTFLOW_RETRY_BACKOFF", &raw))?;
        }
        override_num(&lookup, "CASTFLOW_CACHE_TTL_SECONDS", &mut self.cache.default_ttl_seconds)?;
        override_num(&lookup, "CASTFLOW_RETRY_MAX_ATTEMPTS", &mut self.retry.max_attempts)?;
        override_num(&lookup, "CASTFLOW_RETRY_BASE_DELAY_MS", &mut self.retry.base_delay_ms)?;
        override_num(&lookup, "CASTFLOW_RETRY_MAX_DELAY_MS", &mut self.retry.max_delay_ms)?;
        override_num(&lookup, "CASTFLOW_MIN_RESEARCH_SOURCES", &mut self.quality.min_research_sources)?;
        override_num(&lookup, "CASTFLOW_MIN_SCRIPT_WORD_COUNT", &mut self.quality.min_script_word_count)?;
        override_num(&lookup, "CASTFLOW_SCHEDULER_TICK_SECONDS", &mut self.scheduler.tick_interval_seconds)?;
        override_num(&lookup, "CASTFLOW_MAX_TRANSITIONS", &mut self.executor.max_transitions)?;
        Ok(self)
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the quality gates.
    #[must_use]
    pub fn with_quality(mut self, quality: QualityThresholds) -> Self {
        self.quality = quality;
        self
    }

    /// Sets the default cache TTL.
    #[must_use]
    pub fn with_cache_ttl(mut self, seconds: u64) -> Self {
        self.cache.default_ttl_seconds = seconds;
        self
    }

    /// Sets the scheduler tick interval.
    #[must_use]
    pub fn with_tick_interval(mut self, seconds: u64) -> Self {
        self.scheduler.tick_interval_seconds = seconds;
        self
    }

    /// Enables or disables the schedule file.
    #[must_use]
    pub fn with_schedule_persistence(mut self, persist: bool) -> Self {
        self.scheduler.persist = persist;
        self
    }

    /// Sets the executor transition limit.
    #[must_use]
    pub fn with_max_transitions(mut self, limit: usize) -> Self {
        self.executor.max_transitions = limit;
        self
    }

    /// Sets the trigger table.
    #[must_use]
    pub fn with_triggers(mut self, triggers: TriggerTable) -> Self {
        self.triggers = triggers;
        self
    }

    /// Directory holding one JSON file per run.
    #[must_use]
    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    /// Path of the cache index.
    #[must_use]
    pub fn cache_index_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache.index_file)
    }

    /// Path of the schedule file, if persistence is enabled.
    #[must_use]
    pub fn schedule_path(&self) -> Option<PathBuf> {
        self.scheduler.persist.then(|| self.data_dir.join("schedules.json"))
    }

    /// Scheduler tick interval.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_seconds.max(1))
    }
}

fn override_num<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|_| invalid(key, &raw))?;
    }
    Ok(())
}

fn parse_backoff(raw: &str) -> Option<BackoffStrategy> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase())).ok()
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = CastflowConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.retry.max_delay_ms, 300_000);
        assert_eq!(config.cache.default_ttl_seconds, 86_400);
        assert_eq!(config.quality.min_research_sources, 5);
        assert_eq!(config.quality.min_script_word_count, 1500);
        assert_eq!(config.scheduler.tick_interval_seconds, 60);
        assert_eq!(config.executor.max_transitions, 256);
        assert_eq!(config.runs_dir(), PathBuf::from("data/runs"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("castflow.json");
        std::fs::write(
            &path,
            r#"{"data_dir": "/srv/castflow", "retry": {"max_attempts": 5}, "log_format": "json"}"#,
        )
        .unwrap();

        let config = CastflowConfig::from_file(&path).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/castflow"));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.triggers, TriggerTable::default());
    }

    #[test]
    fn test_bad_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("castflow.json");
        std::fs::write(&path, "{retry: 3").unwrap();
        assert!(matches!(CastflowConfig::from_file(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            CastflowConfig::from_file(dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let config = CastflowConfig::default()
            .with_env_overrides(env(&[
                ("CASTFLOW_DATA_DIR", "/tmp/cf"),
                ("CASTFLOW_RETRY_MAX_ATTEMPTS", "4"),
                ("CASTFLOW_RETRY_BACKOFF", "Linear"),
                ("CASTFLOW_MIN_RESEARCH_SOURCES", "2"),
            ]))
            .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/cf"));
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.backoff_strategy, BackoffStrategy::Linear);
        assert_eq!(config.quality.min_research_sources, 2);
    }

    #[test]
    fn test_invalid_env_value() {
        let err = CastflowConfig::default()
            .with_env_overrides(env(&[("CASTFLOW_RETRY_MAX_ATTEMPTS", "three")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for CASTFLOW_RETRY_MAX_ATTEMPTS: 'three'");
    }

    #[test]
    fn test_schedule_path_follows_persist_flag() {
        let config = CastflowConfig::default().with_data_dir("/d");
        assert_eq!(config.schedule_path(), Some(PathBuf::from("/d/schedules.json")));
        assert_eq!(config.with_schedule_persistence(false).schedule_path(), None);
    }
}
