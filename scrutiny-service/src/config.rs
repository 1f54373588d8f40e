//! Service configuration
//!
//! Loaded from `SCRUTINY_*` environment variables with development-friendly
//! defaults. Unparseable values fall back to the default rather than
//! aborting; the storage backend name is the one field that fails hard,
//! since silently falling back to the in-memory store would lose data.

use crate::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_FRAGMENT_MAX_AGE_SECS, DEFAULT_MAX_PENDING_FRAGMENTS,
    DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS, DEFAULT_SCHEDULE_INTERVAL_SECS,
};
use scrutiny_core::ScrutinyResult;
use scrutiny_storage::StorageConfig;
use std::time::Duration;

// ============================================================================
// RETENTION
// ============================================================================

/// Bounds on the pending-fragment pool. Fragments whose counterpart never
/// arrives are dropped once either bound is exceeded.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Maximum unmatched fragments held at once.
    pub max_pending: usize,
    /// Maximum time an unmatched fragment is held.
    pub max_age: Duration,
    /// How often the orphan sweep task runs.
    pub sweep_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_pending: DEFAULT_MAX_PENDING_FRAGMENTS,
            max_age: Duration::from_secs(DEFAULT_FRAGMENT_MAX_AGE_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS),
        }
    }
}

impl RetentionConfig {
    /// Short bounds for development and tests.
    pub fn development() -> Self {
        Self {
            max_pending: 100,
            max_age: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
        }
    }
}

// ============================================================================
// SCHEDULING
// ============================================================================

/// Tick cadence for the schedule registry's executor.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    pub interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_SCHEDULE_INTERVAL_SECS),
        }
    }
}

// ============================================================================
// SERVICE CONFIGURATION
// ============================================================================

/// Top-level configuration for the data plane.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    pub batch_size: usize,
    pub schedule: ScheduleConfig,
    pub retention: RetentionConfig,
}

impl ServiceConfig {
    /// Load from environment variables.
    ///
    /// - `SCRUTINY_STORAGE_KIND` / `SCRUTINY_STORAGE_DATA_DIR` /
    ///   `SCRUTINY_STORAGE_DATA_FILENAME`: see [`StorageConfig::from_env`]
    /// - `SCRUTINY_BATCH_SIZE`: trailing rows per metric read (default: 100)
    /// - `SCRUTINY_SCHEDULE_INTERVAL_SECS`: tick cadence (default: 30)
    /// - `SCRUTINY_MAX_PENDING_FRAGMENTS`: pending pool cap (default: 10000)
    /// - `SCRUTINY_FRAGMENT_MAX_AGE_SECS`: orphan age bound (default: 300)
    /// - `SCRUTINY_ORPHAN_SWEEP_INTERVAL_SECS`: sweep cadence (default: 60)
    pub fn from_env() -> ScrutinyResult<Self> {
        let storage = StorageConfig::from_env()?;

        let batch_size = env_parsed("SCRUTINY_BATCH_SIZE", DEFAULT_BATCH_SIZE);

        let schedule = ScheduleConfig {
            interval: Duration::from_secs(env_parsed(
                "SCRUTINY_SCHEDULE_INTERVAL_SECS",
                DEFAULT_SCHEDULE_INTERVAL_SECS,
            )),
        };

        let retention = RetentionConfig {
            max_pending: env_parsed(
                "SCRUTINY_MAX_PENDING_FRAGMENTS",
                DEFAULT_MAX_PENDING_FRAGMENTS,
            ),
            max_age: Duration::from_secs(env_parsed(
                "SCRUTINY_FRAGMENT_MAX_AGE_SECS",
                DEFAULT_FRAGMENT_MAX_AGE_SECS,
            )),
            sweep_interval: Duration::from_secs(env_parsed(
                "SCRUTINY_ORPHAN_SWEEP_INTERVAL_SECS",
                DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS,
            )),
        };

        Ok(Self {
            storage,
            batch_size,
            schedule,
            retention,
        })
    }
}

fn env_parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            schedule: ScheduleConfig::default(),
            retention: RetentionConfig::default(),
        }
    }
}
