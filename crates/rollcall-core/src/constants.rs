//! Default timing and capacity constants for the orchestration layer.
//!
//! Every timing value here is a default only: the orchestrator accepts
//! explicit overrides through its configuration, and correctness never
//! depends on a particular default. Capacities bound the in-memory channels
//! that connect supervisors, the decision engine, and downstream listeners.
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use rollcall_core::constants::DEFAULT_DEDUP_WINDOW_SECS;
//!
//! let window = Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS);
//! assert_eq!(window.as_secs(), 60);
//! ```

// ============================================================================
// Deduplication
// ============================================================================

/// Default identification dedup window in seconds.
///
/// Repeated identifications of the same subject inside this window collapse
/// into a single approved decision; the extras are reported as duplicates.
/// Sized to a typical entrance-queue interval.
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 60;

// ============================================================================
// Session lifecycle
// ============================================================================

/// Default grace period, in milliseconds, that `start_attendance` waits for
/// initial device connections before reporting which devices started.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 3_000;

/// Default per-supervisor stop acknowledgment timeout in milliseconds.
///
/// A supervisor that does not acknowledge within this bound is aborted and
/// logged; session teardown proceeds regardless.
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 5_000;

/// Default one-shot connection timeout in milliseconds, used by diagnostics
/// (`test_connection`) and bounding each supervisor connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Interval, in milliseconds, at which the orchestrator polls supervisor
/// health while the start grace period elapses.
pub const STATUS_POLL_INTERVAL_MS: u64 = 25;

/// Idle time, in milliseconds, after which a supervisor probes a quiet
/// link with a heartbeat. A device delivering captures is never probed.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 10_000;

// ============================================================================
// Supervisor retry
// ============================================================================

/// Initial reconnect backoff in milliseconds.
pub const RECONNECT_BACKOFF_BASE_MS: u64 = 1_000;

/// Reconnect backoff cap in milliseconds.
///
/// Backoff doubles after each failed attempt up to this cap and resets after
/// a successful connect. Retries continue for as long as the session lives.
pub const RECONNECT_BACKOFF_CAP_MS: u64 = 30_000;

// ============================================================================
// Channel capacities
// ============================================================================

/// Capacity of the shared identification event channel (the aggregation
/// point written by all supervisors, drained by the decision engine).
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Capacity of the decision broadcast channel feeding downstream listeners.
pub const DECISION_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Devices
// ============================================================================

/// Default device port when the configuration omits one.
pub const DEFAULT_DEVICE_PORT: u16 = 4370;

/// Maximum identification match quality score (0 is worst).
pub const MAX_MATCH_QUALITY: u8 = 100;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_bounds_ordered() {
        assert!(RECONNECT_BACKOFF_BASE_MS < RECONNECT_BACKOFF_CAP_MS);
    }

    #[test]
    fn test_capacities_nonzero() {
        assert!(EVENT_CHANNEL_CAPACITY > 0);
        assert!(DECISION_CHANNEL_CAPACITY > 0);
    }
}
