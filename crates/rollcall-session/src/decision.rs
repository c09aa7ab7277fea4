//! Outcome evaluation and cross-device duplicate suppression.
//!
//! The engine is the single arbiter for a session: every identification,
//! regardless of which device produced it, flows through [`DecisionEngine::evaluate`].
//! Duplicate suppression is keyed on the subject alone so a subject approved
//! at one gate is suppressed at every other gate for the dedup window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rollcall_core::constants::DEFAULT_DEDUP_WINDOW_SECS;
use rollcall_core::types::{Decision, DeviceId, IdentificationEvent, Outcome, SubjectUid};
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// Policy
// ============================================================================

/// Verdict of an [`AttendancePolicy`] for a single identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assessment {
    Approve,
    Deny,
}

/// Pluggable accept/reject rule applied after duplicate suppression.
///
/// Policies see only events that are not duplicates; a suppressed event is
/// never assessed.
pub trait AttendancePolicy: Send + Sync {
    fn assess(&self, event: &IdentificationEvent) -> Assessment;
}

/// Approves every identification. The default for attendance capture.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApproveAll;

impl AttendancePolicy for ApproveAll {
    fn assess(&self, _event: &IdentificationEvent) -> Assessment {
        Assessment::Approve
    }
}

/// Denies identifications whose match quality falls below a threshold.
#[derive(Debug, Clone, Copy)]
pub struct MinimumQuality {
    pub threshold: u8,
}

impl AttendancePolicy for MinimumQuality {
    fn assess(&self, event: &IdentificationEvent) -> Assessment {
        if event.match_quality >= self.threshold {
            Assessment::Approve
        } else {
            Assessment::Deny
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// Point-in-time decision counters for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecisionCounts {
    pub approved: u64,
    pub denied: u64,
    pub duplicate: u64,
}

impl DecisionCounts {
    pub fn total(&self) -> u64 {
        self.approved + self.denied + self.duplicate
    }
}

#[derive(Debug, Default)]
struct DecisionStats {
    approved: AtomicU64,
    denied: AtomicU64,
    duplicate: AtomicU64,
}

impl DecisionStats {
    fn record(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Approved => &self.approved,
            Outcome::Denied => &self.denied,
            Outcome::Duplicate => &self.duplicate,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DecisionCounts {
        DecisionCounts {
            approved: self.approved.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

const SHARD_COUNT: u64 = 16;

#[derive(Debug, Clone, Copy)]
struct LastDecision {
    outcome: Outcome,
    at: DateTime<Utc>,
}

/// Session-scoped decision state.
///
/// Per-subject history is sharded across plain mutexes; the critical section
/// is a map probe plus insert, so the engine never holds a lock across an
/// await point.
pub struct DecisionEngine {
    shards: Vec<Mutex<HashMap<SubjectUid, LastDecision>>>,
    window: TimeDelta,
    policy: Box<dyn AttendancePolicy>,
    locations: HashMap<DeviceId, String>,
    stats: DecisionStats,
}

impl DecisionEngine {
    /// Creates an engine with the given dedup window and policy.
    ///
    /// `locations` maps device ids to the human-readable location stamped on
    /// every decision; devices missing from the map report `"unknown"`.
    pub fn new(
        window: Duration,
        policy: Box<dyn AttendancePolicy>,
        locations: HashMap<DeviceId, String>,
    ) -> Self {
        let window = TimeDelta::from_std(window)
            .unwrap_or_else(|_| TimeDelta::seconds(DEFAULT_DEDUP_WINDOW_SECS as i64));
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            window,
            policy,
            locations,
            stats: DecisionStats::default(),
        }
    }

    /// Evaluates one identification into a decision.
    ///
    /// A subject with a prior Approved decision whose capture timestamps lie
    /// closer together than the dedup window yields Duplicate without
    /// touching the stored history. Anything else is assessed by the policy
    /// and recorded as the subject's new last decision.
    pub fn evaluate(&self, event: &IdentificationEvent) -> Decision {
        let shard = &self.shards[(event.subject.as_u64() % SHARD_COUNT) as usize];
        let mut history = shard.lock().unwrap_or_else(PoisonError::into_inner);

        let outcome = match history.get(&event.subject) {
            Some(last)
                if last.outcome == Outcome::Approved
                    && self.within_window(last.at, event.captured_at) =>
            {
                Outcome::Duplicate
            }
            _ => {
                let outcome = match self.policy.assess(event) {
                    Assessment::Approve => Outcome::Approved,
                    Assessment::Deny => Outcome::Denied,
                };
                history.insert(
                    event.subject,
                    LastDecision {
                        outcome,
                        at: event.captured_at,
                    },
                );
                outcome
            }
        };
        drop(history);

        self.stats.record(outcome);
        Decision {
            id: Uuid::new_v4(),
            subject: event.subject,
            outcome,
            device_id: event.device_id.clone(),
            location: self
                .locations
                .get(&event.device_id)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            decided_at: Utc::now(),
        }
    }

    /// Capture timestamps may arrive out of order across devices, so the
    /// comparison uses the absolute delta.
    fn within_window(&self, earlier: DateTime<Utc>, later: DateTime<Utc>) -> bool {
        (later - earlier).abs() < self.window
    }

    pub fn stats(&self) -> DecisionCounts {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("window", &self.window)
            .field("devices", &self.locations.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;
    use rollcall_core::types::DeviceId;

    fn event_at(device: &str, uid: u64, offset_secs: i64, quality: u8) -> IdentificationEvent {
        let base = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap();
        IdentificationEvent::new(
            DeviceId::new(device).unwrap(),
            SubjectUid::new(uid),
            base + TimeDelta::seconds(offset_secs),
            quality,
        )
        .unwrap()
    }

    fn engine(window_secs: u64) -> DecisionEngine {
        let mut locations = HashMap::new();
        locations.insert(DeviceId::new("gate-a").unwrap(), "Main Gate".to_string());
        locations.insert(DeviceId::new("gate-c").unwrap(), "Back Gate".to_string());
        DecisionEngine::new(
            Duration::from_secs(window_secs),
            Box::new(ApproveAll),
            locations,
        )
    }

    #[test]
    fn first_identification_is_approved() {
        let engine = engine(60);
        let decision = engine.evaluate(&event_at("gate-a", 1042, 0, 88));
        assert_eq!(decision.outcome, Outcome::Approved);
        assert_eq!(decision.location, "Main Gate");
    }

    #[test]
    fn repeat_within_window_is_duplicate_across_devices() {
        let engine = engine(60);
        assert_eq!(
            engine.evaluate(&event_at("gate-a", 1042, 0, 88)).outcome,
            Outcome::Approved
        );
        let repeat = engine.evaluate(&event_at("gate-c", 1042, 2, 91));
        assert_eq!(repeat.outcome, Outcome::Duplicate);
        assert_eq!(repeat.location, "Back Gate");
    }

    #[test]
    fn repeat_at_window_boundary_is_reapproved() {
        let engine = engine(60);
        engine.evaluate(&event_at("gate-a", 7, 0, 80));
        // Exactly the window apart is outside the suppression interval.
        assert_eq!(
            engine.evaluate(&event_at("gate-a", 7, 60, 80)).outcome,
            Outcome::Approved
        );
    }

    #[test]
    fn duplicate_does_not_extend_the_window() {
        let engine = engine(60);
        engine.evaluate(&event_at("gate-a", 9, 0, 80));
        assert_eq!(
            engine.evaluate(&event_at("gate-a", 9, 30, 80)).outcome,
            Outcome::Duplicate
        );
        // Measured from the original approval, not from the duplicate.
        assert_eq!(
            engine.evaluate(&event_at("gate-a", 9, 65, 80)).outcome,
            Outcome::Approved
        );
    }

    #[test]
    fn out_of_order_arrival_still_deduplicates() {
        let engine = engine(60);
        engine.evaluate(&event_at("gate-a", 11, 30, 80));
        // Earlier capture arriving later is still inside the window.
        assert_eq!(
            engine.evaluate(&event_at("gate-c", 11, 0, 80)).outcome,
            Outcome::Duplicate
        );
    }

    #[test]
    fn denied_subject_is_reassessed_immediately() {
        let mut locations = HashMap::new();
        locations.insert(DeviceId::new("gate-a").unwrap(), "Main Gate".to_string());
        let engine = DecisionEngine::new(
            Duration::from_secs(60),
            Box::new(MinimumQuality { threshold: 85 }),
            locations,
        );
        assert_eq!(
            engine.evaluate(&event_at("gate-a", 5, 0, 60)).outcome,
            Outcome::Denied
        );
        // A denial does not arm the dedup window.
        assert_eq!(
            engine.evaluate(&event_at("gate-a", 5, 1, 92)).outcome,
            Outcome::Approved
        );
    }

    #[test]
    fn distinct_subjects_never_suppress_each_other() {
        let engine = engine(60);
        assert_eq!(
            engine.evaluate(&event_at("gate-a", 1, 0, 80)).outcome,
            Outcome::Approved
        );
        assert_eq!(
            engine.evaluate(&event_at("gate-a", 2, 0, 80)).outcome,
            Outcome::Approved
        );
        // Shard-mates as well (1 and 17 share a shard).
        assert_eq!(
            engine.evaluate(&event_at("gate-a", 17, 0, 80)).outcome,
            Outcome::Approved
        );
    }

    #[test]
    fn unknown_device_reports_unknown_location() {
        let engine = engine(60);
        let decision = engine.evaluate(&event_at("side-door", 3, 0, 80));
        assert_eq!(decision.location, "unknown");
    }

    #[test]
    fn stats_track_every_outcome() {
        let engine = engine(60);
        engine.evaluate(&event_at("gate-a", 1, 0, 80));
        engine.evaluate(&event_at("gate-a", 1, 5, 80));
        engine.evaluate(&event_at("gate-a", 2, 0, 80));
        let counts = engine.stats();
        assert_eq!(counts.approved, 2);
        assert_eq!(counts.duplicate, 1);
        assert_eq!(counts.denied, 0);
        assert_eq!(counts.total(), 3);
    }
}
