//! Default values for `EngineConfig` fields.
//!
//! Centralizes magic numbers in one place instead of scattering them through
//! the subsystems, grouping constants by subsystem the way a config defaults
//! module typically does.

use super::{Algorithm, Sensitivity, StorageType};

// ============================================================================
// Alert engine
// ============================================================================

pub fn engine_enabled() -> bool {
    true
}

/// Default evaluation interval: every 30 seconds.
pub fn evaluation_interval_secs() -> u64 {
    30
}

pub fn retention_days() -> i64 {
    30
}

/// Default notification work-queue capacity: 100.
pub fn notification_queue_capacity() -> usize {
    100
}

// ============================================================================
// Detector
// ============================================================================

/// Default algorithm set: {statistical, seasonal}.
pub fn detector_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::Statistical, Algorithm::Seasonal]
}

pub fn sensitivity() -> Sensitivity {
    Sensitivity::Medium
}

/// Default baseline window; 24 hours is a reasonable rolling window.
pub fn baseline_window_secs() -> i64 {
    24 * 3600
}

/// Default minimum data points: 100.
pub fn min_data_points() -> usize {
    100
}

/// Default seasonal bucket minimum sample count.
pub fn min_samples_per_bucket() -> u64 {
    5
}

/// Default seasonal detector threshold factor, `T * 0.8`.
pub fn seasonal_threshold_factor() -> f64 {
    0.8
}

/// Default baseline cache TTL, capped at one minute.
pub fn baseline_cache_ttl_secs() -> u64 {
    60
}

// ============================================================================
// Storage
// ============================================================================

pub fn storage_type() -> StorageType {
    StorageType::Embedded
}

pub fn storage_path() -> String {
    "./observatory-data".to_string()
}

/// Default write-buffer target capacity: 1000, soft.
pub fn write_buffer_capacity() -> usize {
    1000
}

/// Default flush interval: roughly every second.
pub fn flush_interval_secs() -> u64 {
    1
}

// ============================================================================
// Ingestor
// ============================================================================

/// Default ingestor queue capacity: 10000.
pub fn ingestor_queue_capacity() -> usize {
    10_000
}
