//! Application configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `GDSYNC_*` environment variables (`__` separates nested keys,
//! e.g. `GDSYNC_FETCHER__REQUESTS_PER_SECOND=2`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::EntityType;

pub const ENV_PREFIX: &str = "GDSYNC";
pub const DEFAULT_CONFIG_FILE: &str = "config/default";

/// Upper bounds that keep the retry schedule finite and representable.
pub const MAX_RETRIES_LIMIT: u32 = 10;
pub const MAX_BACKOFF_FACTOR: f64 = 10.0;
pub const MAX_BASE_DELAY_MS: u64 = 60_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {source}")]
    Load {
        #[from]
        source: config::ConfigError,
    },

    #[error("Invalid configuration value for '{field}': {message}")]
    Validation { field: String, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetcher: FetcherConfig,
    pub extractor: ExtractorConfig,
    pub pipeline: PipelineConfig,
    pub sources: SourcesConfig,
    pub storage: StorageConfig,
    pub reconcile: ReconcileConfig,
    pub normalizer: NormalizerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    pub requests_per_second: f64,
    /// Total attempts per URL, including the first one.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub backoff_factor: f64,
    /// Upper bound of the random jitter, as a fraction of the computed delay.
    pub jitter_ratio: f64,
    pub timeout_seconds: u64,
    pub retryable_statuses: Vec<u16>,
    pub user_agents: Vec<String>,
    pub accept_language: String,
    pub respect_robots_txt: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 1.0,
            max_retries: 3,
            base_delay_ms: 2000,
            backoff_factor: 2.0,
            jitter_ratio: 0.3,
            timeout_seconds: 30,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            ],
            accept_language: "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
            respect_robots_txt: true,
        }
    }
}

impl FetcherConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub reference_level: String,
    pub description_max_chars: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            reference_level: "90".to_string(),
            description_max_chars: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub max_error_details: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_error_details: 50,
        }
    }
}

/// Where one entity type is scraped from, and which keys a run covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub base_url: String,
    #[serde(default)]
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub character: Option<SourceConfig>,
    pub weapon: Option<SourceConfig>,
    pub artifact: Option<SourceConfig>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        let wiki = "https://wiki.biligame.com/ys/".to_string();
        Self {
            character: Some(SourceConfig {
                base_url: wiki.clone(),
                keys: ["琴", "迪卢克", "温迪", "刻晴", "钟离", "甘雨", "胡桃", "七七"]
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            }),
            weapon: Some(SourceConfig {
                base_url: wiki.clone(),
                keys: ["风鹰剑", "天空之刃", "狼的末路", "护摩之杖", "阿莫斯之弓"]
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            }),
            artifact: Some(SourceConfig {
                base_url: wiki,
                keys: ["角斗士的终幕礼", "流浪大地的乐团", "翠绿之影", "炽烈的炎之魔女", "绝缘之旗印"]
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            }),
        }
    }
}

impl SourcesConfig {
    #[must_use]
    pub const fn for_type(&self, entity_type: EntityType) -> Option<&SourceConfig> {
        match entity_type {
            EntityType::Character => self.character.as_ref(),
            EntityType::Weapon => self.weapon.as_ref(),
            EntityType::Artifact => self.artifact.as_ref(),
            EntityType::Monster => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: format!("sqlite:{}", default_database_path().display()),
            max_connections: 5,
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("genshin-data-sync")
        .join("genshin.db")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Let an unmapped classification value replace a mapped stored one.
    pub overwrite_with_unmapped: bool,
}

/// Extra source tokens per logical field, mapped to canonical names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraAliases {
    pub element: HashMap<String, String>,
    pub weapon_category: HashMap<String, String>,
    pub region: HashMap<String, String>,
    pub stat_kind: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    pub extra_aliases: ExtraAliases,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "error", "warn", "info", "debug" or "trace"
    pub level: String,
    pub json_format: bool,
    pub console_output: bool,
    pub file_output: bool,
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
    /// Offset applied to log timestamps; the source wiki runs on UTC+8.
    pub utc_offset_hours: i32,
    /// Per-target levels, e.g. `sqlx = "warn"`.
    pub module_filters: HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        let module_filters = [("sqlx", "warn"), ("reqwest", "info"), ("hyper", "warn")]
            .into_iter()
            .map(|(target, level)| (target.to_string(), level.to_string()))
            .collect();
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: false,
            log_dir: None,
            file_prefix: "genshin-data-sync.log".to_string(),
            utc_offset_hours: 8,
            module_filters,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            fetcher: FetcherConfig::default(),
            extractor: ExtractorConfig::default(),
            pipeline: PipelineConfig::default(),
            sources: SourcesConfig::default(),
            storage: StorageConfig::default(),
            reconcile: ReconcileConfig::default(),
            normalizer: NormalizerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` (or `config/default.toml` when present),
    /// then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file_source = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(file_source)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("fetcher.retryable_statuses")
                    .with_list_parse_key("fetcher.user_agents")
                    .with_list_parse_key("sources.character.keys")
                    .with_list_parse_key("sources.weapon.keys")
                    .with_list_parse_key("sources.artifact.keys"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fetcher = &self.fetcher;
        if !(fetcher.requests_per_second.is_finite() && fetcher.requests_per_second > 0.0) {
            return Err(ConfigError::invalid(
                "fetcher.requests_per_second",
                "must be a positive number",
            ));
        }
        if !(1..=MAX_RETRIES_LIMIT).contains(&fetcher.max_retries) {
            return Err(ConfigError::invalid(
                "fetcher.max_retries",
                format!("must be within 1..={MAX_RETRIES_LIMIT}"),
            ));
        }
        if !(1..=MAX_BASE_DELAY_MS).contains(&fetcher.base_delay_ms) {
            return Err(ConfigError::invalid(
                "fetcher.base_delay_ms",
                format!("must be within 1..={MAX_BASE_DELAY_MS}"),
            ));
        }
        // NaN fails every range check below.
        if !(0.0..=0.3).contains(&fetcher.jitter_ratio) {
            return Err(ConfigError::invalid("fetcher.jitter_ratio", "must be within 0.0..=0.3"));
        }
        let min_factor = 1.0 + fetcher.jitter_ratio;
        if !(fetcher.backoff_factor > min_factor && fetcher.backoff_factor <= MAX_BACKOFF_FACTOR) {
            return Err(ConfigError::invalid(
                "fetcher.backoff_factor",
                format!(
                    "must exceed 1 + jitter_ratio ({min_factor:.2}) so retry delays keep growing, \
                     and be at most {MAX_BACKOFF_FACTOR}"
                ),
            ));
        }
        if fetcher.timeout_seconds == 0 {
            return Err(ConfigError::invalid("fetcher.timeout_seconds", "must be greater than 0"));
        }
        if fetcher.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(ConfigError::invalid("fetcher.user_agents", "pool must not be empty"));
        }

        if self.extractor.reference_level.trim().is_empty() {
            return Err(ConfigError::invalid("extractor.reference_level", "must not be empty"));
        }
        if self.pipeline.concurrency == 0 {
            return Err(ConfigError::invalid("pipeline.concurrency", "must be at least 1"));
        }
        if self.storage.max_connections == 0 {
            return Err(ConfigError::invalid("storage.max_connections", "must be at least 1"));
        }

        for (name, source) in [
            ("sources.character", self.sources.character.as_ref()),
            ("sources.weapon", self.sources.weapon.as_ref()),
            ("sources.artifact", self.sources.artifact.as_ref()),
        ] {
            if let Some(source) = source {
                if url::Url::parse(&source.base_url).is_err() {
                    return Err(ConfigError::invalid(
                        &format!("{name}.base_url"),
                        format!("'{}' is not an absolute URL", source.base_url),
                    ));
                }
            }
        }

        if !(-12..=14).contains(&self.logging.utc_offset_hours) {
            return Err(ConfigError::invalid("logging.utc_offset_hours", "must be within -12..=14"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.fetcher.max_retries, 3);
        assert_eq!(config.extractor.reference_level, "90");
        assert!(config.sources.for_type(EntityType::Artifact).is_some());
        assert!(config.sources.for_type(EntityType::Monster).is_none());
    }

    #[test]
    fn backoff_factor_must_outgrow_jitter() {
        let mut config = AppConfig::default();
        config.fetcher.backoff_factor = 1.2;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("fetcher.backoff_factor"));
    }

    #[rstest]
    #[case::nan_factor(|f: &mut FetcherConfig| f.backoff_factor = f64::NAN, "fetcher.backoff_factor")]
    #[case::infinite_factor(|f: &mut FetcherConfig| f.backoff_factor = f64::INFINITY, "fetcher.backoff_factor")]
    #[case::huge_factor(|f: &mut FetcherConfig| f.backoff_factor = 1e6, "fetcher.backoff_factor")]
    #[case::nan_jitter(|f: &mut FetcherConfig| f.jitter_ratio = f64::NAN, "fetcher.jitter_ratio")]
    #[case::too_many_retries(|f: &mut FetcherConfig| f.max_retries = 2000, "fetcher.max_retries")]
    #[case::zero_retries(|f: &mut FetcherConfig| f.max_retries = 0, "fetcher.max_retries")]
    #[case::zero_base_delay(|f: &mut FetcherConfig| f.base_delay_ms = 0, "fetcher.base_delay_ms")]
    #[case::huge_base_delay(|f: &mut FetcherConfig| f.base_delay_ms = u64::MAX, "fetcher.base_delay_ms")]
    fn unbounded_retry_schedules_are_rejected(#[case] tweak: fn(&mut FetcherConfig), #[case] expected: &str) {
        let mut config = AppConfig::default();
        tweak(&mut config.fetcher);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { field, .. }) if field == expected
        ));
    }

    #[test]
    fn retry_limit_itself_is_accepted() {
        let mut config = AppConfig::default();
        config.fetcher.max_retries = MAX_RETRIES_LIMIT;
        config.fetcher.backoff_factor = MAX_BACKOFF_FACTOR;
        config.fetcher.base_delay_ms = MAX_BASE_DELAY_MS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_rate_is_rejected() {
        let mut config = AppConfig::default();
        config.fetcher.requests_per_second = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { field, .. }) if field == "fetcher.requests_per_second"
        ));
    }

    #[test]
    fn file_layer_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[fetcher]
requests_per_second = 4.0
respect_robots_txt = false

[sources.weapon]
base_url = "https://example.org/wiki/"
keys = ["风鹰剑"]
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path())).unwrap();
        assert!((config.fetcher.requests_per_second - 4.0).abs() < f64::EPSILON);
        assert!(!config.fetcher.respect_robots_txt);
        assert_eq!(config.fetcher.max_retries, 3);
        let weapon = config.sources.for_type(EntityType::Weapon).unwrap();
        assert_eq!(weapon.base_url, "https://example.org/wiki/");
        assert_eq!(weapon.keys.first().map(String::as_str), Some("风鹰剑"));
    }
}
