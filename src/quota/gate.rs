use super::{clock::Clock, ledger::CallRecord};
use std::time::{Duration, Instant};
use tracing::info;

/// Minimum wall-clock spacing between two outbound calls, independent of the
/// budget.
#[derive(Debug, Clone, Copy)]
pub struct MinIntervalGate {
    min_spacing: Duration,
}

impl MinIntervalGate {
    pub fn new(min_spacing: Duration) -> Self {
        Self { min_spacing }
    }

    pub fn remaining(&self, record: &CallRecord, now: Instant) -> Duration {
        match record.last_call {
            Some(last) => self
                .min_spacing
                .saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    /// Sleeps out whatever is left of the spacing window. Returns the time slept.
    pub async fn wait(&self, record: &CallRecord, clock: &dyn Clock) -> Duration {
        let remaining = self.remaining(record, clock.now());
        if remaining.is_zero() {
            return Duration::ZERO;
        }
        info!(
            target = "ingest.quota",
            wait_secs = remaining.as_secs_f64(),
            "spacing calls"
        );
        clock.sleep(remaining).await;
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::clock::ManualClock;

    #[tokio::test]
    async fn first_call_is_not_delayed() {
        let clock = ManualClock::new();
        let gate = MinIntervalGate::new(Duration::from_secs(60));
        let slept = gate.wait(&CallRecord::default(), &clock).await;
        assert_eq!(slept, Duration::ZERO);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn sleeps_only_the_remainder() {
        let clock = ManualClock::new();
        let gate = MinIntervalGate::new(Duration::from_secs(60));
        let record = CallRecord {
            last_call: Some(clock.now()),
            settled_calls: 1,
        };
        clock.advance(Duration::from_secs(45));
        assert_eq!(gate.wait(&record, &clock).await, Duration::from_secs(15));

        clock.advance(Duration::from_secs(120));
        assert_eq!(gate.wait(&record, &clock).await, Duration::ZERO);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(15)]);
    }
}
