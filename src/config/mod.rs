//! Engine configuration.
//!
//! Loaded from TOML following the teacher's `WellConfig::load()` search
//! order (env var path, then a local file, then built-in defaults) and
//! exposed through the same global-`OnceLock` pattern as
//! `config::init()` / `config::get()`.
//!
//! ```ignore
//! observatory::config::init(EngineConfig::load());
//! let interval = observatory::config::get().engine.evaluation_interval_secs;
//! ```

pub mod defaults;

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Parses a query time bound: RFC 3339 (`2024-01-01T00:00:00Z`) or Unix
/// seconds (`1704067200`).
pub fn parse_time(s: &str) -> CoreResult<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| CoreError::InvalidInput(format!("time out of range: {s}")));
    }
    Err(CoreError::InvalidInput(format!(
        "invalid time '{s}': expected RFC 3339 or Unix seconds"
    )))
}

/// Parses a duration string: `<decimal><unit>` with units `s`, `m`, `h`
/// (`30s`, `1m`, `24h`, `168h`).
pub fn parse_duration(s: &str) -> CoreResult<chrono::Duration> {
    let invalid = || CoreError::InvalidInput(format!("invalid duration '{s}'"));
    let unit = s.chars().last().ok_or_else(invalid)?;
    let multiplier_secs = match unit {
        's' => 1.0,
        'm' => 60.0,
        'h' => 3600.0,
        _ => return Err(invalid()),
    };
    let digits = &s[..s.len() - unit.len_utf8()];
    let value: f64 = digits.parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    let millis = (value * multiplier_secs * 1000.0).round() as i64;
    Ok(chrono::Duration::milliseconds(millis))
}

static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Initialize the global engine configuration. Must be called exactly once
/// before any call to `get()`.
pub fn init(config: EngineConfig) {
    if ENGINE_CONFIG.set(config).is_err() {
        warn!("config::init() called more than once — ignoring");
    }
}

/// Get the global engine configuration.
///
/// Panics if `init()` has not been called — a missing config is a fatal
/// startup error, not a recoverable runtime condition.
pub fn get() -> &'static EngineConfig {
    ENGINE_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

pub fn is_initialized() -> bool {
    ENGINE_CONFIG.get().is_some()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: AlertEngineConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub ingestor: IngestorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: AlertEngineConfig::default(),
            detector: DetectorConfig::default(),
            storage: StorageConfig::default(),
            ingestor: IngestorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Search order: `OBSERVATORY_CONFIG` env var, then `./observatory.toml`,
    /// then built-in defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("OBSERVATORY_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "loaded engine config from OBSERVATORY_CONFIG");
                        return config;
                    }
                    Err(e) => warn!(path = %p.display(), error = %e, "failed to load config from OBSERVATORY_CONFIG, falling back"),
                }
            } else {
                warn!(path = %path, "OBSERVATORY_CONFIG points to a non-existent file, falling back");
            }
        }

        let local = PathBuf::from("observatory.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("loaded engine config from ./observatory.toml");
                    return config;
                }
                Err(e) => warn!(error = %e, "failed to load ./observatory.toml, using defaults"),
            }
        }

        info!("no observatory.toml found — using built-in defaults");
        Self::default()
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.evaluation_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "engine.evaluation_interval_secs must be > 0".into(),
            ));
        }
        if self.detector.min_data_points == 0 {
            return Err(ConfigError::Invalid(
                "detector.min_data_points must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// For the engine: `{enabled, evaluation_interval, retention_days}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEngineConfig {
    #[serde(default = "defaults::engine_enabled")]
    pub enabled: bool,
    #[serde(default = "defaults::evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
    #[serde(default = "defaults::retention_days")]
    pub retention_days: i64,
    /// Notification work-queue capacity.
    #[serde(default = "defaults::notification_queue_capacity")]
    pub notification_queue_capacity: usize,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::engine_enabled(),
            evaluation_interval_secs: defaults::evaluation_interval_secs(),
            retention_days: defaults::retention_days(),
            notification_queue_capacity: defaults::notification_queue_capacity(),
        }
    }
}

/// Detector algorithm selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Statistical,
    Mad,
    Iqr,
    Grubbs,
    Seasonal,
    Ml,
}

/// Detector sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Sensitivity {
    /// z-score threshold: low -> 4.0, medium -> 3.0, high -> 2.0.
    pub fn z_threshold(self) -> f64 {
        match self {
            Sensitivity::Low => 4.0,
            Sensitivity::Medium => 3.0,
            Sensitivity::High => 2.0,
        }
    }
}

/// Detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "defaults::detector_algorithms")]
    pub algorithms: Vec<Algorithm>,
    #[serde(default = "defaults::sensitivity")]
    pub sensitivity: Sensitivity,
    #[serde(default = "defaults::baseline_window_secs")]
    pub baseline_window_secs: i64,
    #[serde(default = "defaults::min_data_points")]
    pub min_data_points: usize,
    /// Seasonal bucket minimum sample count.
    #[serde(default = "defaults::min_samples_per_bucket")]
    pub min_samples_per_bucket: u64,
    /// Seasonal detector threshold factor, `T * factor`.
    #[serde(default = "defaults::seasonal_threshold_factor")]
    pub seasonal_threshold_factor: f64,
    /// Baseline cache TTL, capped at 60s.
    #[serde(default = "defaults::baseline_cache_ttl_secs")]
    pub baseline_cache_ttl_secs: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            algorithms: defaults::detector_algorithms(),
            sensitivity: defaults::sensitivity(),
            baseline_window_secs: defaults::baseline_window_secs(),
            min_data_points: defaults::min_data_points(),
            min_samples_per_bucket: defaults::min_samples_per_bucket(),
            seasonal_threshold_factor: defaults::seasonal_threshold_factor(),
            baseline_cache_ttl_secs: defaults::baseline_cache_ttl_secs(),
        }
    }
}

/// Storage configuration: only `embedded` is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    Embedded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::storage_type")]
    pub storage_type: StorageType,
    #[serde(default = "defaults::storage_path")]
    pub path: String,
    /// Soft write-buffer capacity before back-pressure kicks in.
    #[serde(default = "defaults::write_buffer_capacity")]
    pub write_buffer_capacity: usize,
    /// Flush interval, roughly every second by default.
    #[serde(default = "defaults::flush_interval_secs")]
    pub flush_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: defaults::storage_type(),
            path: defaults::storage_path(),
            write_buffer_capacity: defaults::write_buffer_capacity(),
            flush_interval_secs: defaults::flush_interval_secs(),
        }
    }
}

/// Ingestor configuration: the bounded CDC-event queue's capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestorConfig {
    #[serde(default = "defaults::ingestor_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            queue_capacity: defaults::ingestor_queue_capacity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_time_accepts_rfc3339() {
        let t = parse_time("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(t.timestamp(), 1704067200);
    }

    #[test]
    fn parse_time_accepts_unix_seconds() {
        let t = parse_time("1704067200").unwrap();
        assert_eq!(t.timestamp(), 1704067200);
    }

    #[test]
    fn parse_time_rejects_garbage() {
        assert!(matches!(parse_time("not a time"), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("30s").unwrap(), chrono::Duration::seconds(30));
        assert_eq!(parse_duration("1m").unwrap(), chrono::Duration::minutes(1));
        assert_eq!(parse_duration("24h").unwrap(), chrono::Duration::hours(24));
        assert_eq!(parse_duration("168h").unwrap(), chrono::Duration::hours(168));
    }

    #[test]
    fn parse_duration_rejects_unknown_unit() {
        assert!(matches!(parse_duration("30d"), Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn parse_duration_rejects_malformed_number() {
        assert!(matches!(parse_duration("xs"), Err(CoreError::InvalidInput(_))));
    }
}
