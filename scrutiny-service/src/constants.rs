//! Constants for the SCRUTINY service layer

// ============================================================================
// BATCHING
// ============================================================================

/// Default number of trailing rows served to metric computations.
pub const DEFAULT_BATCH_SIZE: usize = 100;

// ============================================================================
// SCHEDULING
// ============================================================================

/// Default interval between schedule ticks, in seconds.
pub const DEFAULT_SCHEDULE_INTERVAL_SECS: u64 = 30;

// ============================================================================
// FRAGMENT RETENTION
// ============================================================================

/// Default cap on unmatched fragments held in the pending pool.
pub const DEFAULT_MAX_PENDING_FRAGMENTS: usize = 10_000;

/// Default age after which an unmatched fragment is evicted, in seconds.
pub const DEFAULT_FRAGMENT_MAX_AGE_SECS: u64 = 300;

/// Default interval between orphan sweep cycles, in seconds.
pub const DEFAULT_ORPHAN_SWEEP_INTERVAL_SECS: u64 = 60;
