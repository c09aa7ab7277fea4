//! Decision fan-out.
//!
//! Decisions are published on a tokio broadcast channel so any number of
//! consumers (console feed, door relay bridge, audit sink) can follow the
//! session live. Slow consumers lag and lose the oldest decisions rather
//! than stalling the decision pump.

use rollcall_core::constants::DECISION_CHANNEL_CAPACITY;
use rollcall_core::types::Decision;
use tokio::sync::broadcast;
use tracing::trace;

/// Cloneable publisher for session decisions.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Decision>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::with_capacity(DECISION_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes a decision to all current subscribers.
    ///
    /// Having no subscribers is not an error; the decision is simply
    /// dropped. Returns the number of subscribers that received it.
    pub fn publish(&self, decision: Decision) -> usize {
        trace!(subject = %decision.subject, outcome = %decision.outcome, "decision published");
        self.tx.send(decision).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Decision> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Renders a decision as the one-line feed format consumed by terminals
/// and log scrapers, e.g. `APPROVED: UID=1042, Device=gate-a, Location=Main Gate`.
pub fn status_line(decision: &Decision) -> String {
    format!(
        "{}: UID={}, Device={}, Location={}",
        decision.outcome, decision.subject, decision.device_id, decision.location
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use rollcall_core::types::{DeviceId, Outcome, SubjectUid};
    use uuid::Uuid;

    fn decision(outcome: Outcome) -> Decision {
        Decision {
            id: Uuid::new_v4(),
            subject: SubjectUid::new(1042),
            outcome,
            device_id: DeviceId::new("gate-a").unwrap(),
            location: "Main Gate".to_string(),
            decided_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_decisions() {
        let notifier = Notifier::new();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        let published = decision(Outcome::Approved);
        assert_eq!(notifier.publish(published.clone()), 2);

        assert_eq!(first.recv().await.unwrap().id, published.id);
        assert_eq!(second.recv().await.unwrap().id, published.id);
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let notifier = Notifier::new();
        assert_eq!(notifier.publish(decision(Outcome::Denied)), 0);
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[test]
    fn status_line_matches_feed_format() {
        assert_eq!(
            status_line(&decision(Outcome::Approved)),
            "APPROVED: UID=1042, Device=gate-a, Location=Main Gate"
        );
        assert_eq!(
            status_line(&decision(Outcome::Duplicate)),
            "DUPLICATE: UID=1042, Device=gate-a, Location=Main Gate"
        );
    }
}
