use super::clock::Clock;
use crate::config::IngestConfig;
use serde::Serialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetParams {
    pub capacity: f64,
    pub refill_per_minute: f64,
    pub initial_balance: f64,
    /// Used in place of a computed wait when the refill rate is not positive.
    pub zero_refill_pause: Duration,
}

impl BudgetParams {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            capacity: config.budget_capacity,
            refill_per_minute: config.refill_per_minute,
            initial_balance: config.initial_balance,
            zero_refill_pause: config.zero_refill_pause(),
        }
    }
}

#[derive(Debug, Clone)]
struct Budget {
    balance: f64,
    capacity: f64,
    refill_per_minute: f64,
    last_refill: Instant,
}

/// Timestamp of the last outbound call; read only by the spacing gate.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallRecord {
    pub last_call: Option<Instant>,
    pub settled_calls: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reservation {
    pub estimated_cost: f64,
    pub balance: f64,
    pub waited: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerSnapshot {
    pub balance: f64,
    pub capacity: f64,
    pub refill_per_minute: f64,
    pub settled_calls: u64,
    pub total_settled: f64,
}

/// Single owner of the provider budget. All balance mutation goes through
/// [`QuotaLedger::refill`] and [`QuotaLedger::settle`].
pub struct QuotaLedger {
    budget: Budget,
    record: CallRecord,
    total_settled: f64,
    zero_refill_pause: Duration,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    pub fn new(params: BudgetParams, clock: Arc<dyn Clock>) -> Self {
        let capacity = params.capacity.max(0.0);
        let balance = if params.initial_balance.is_finite() {
            params.initial_balance.clamp(0.0, capacity)
        } else {
            0.0
        };
        Self {
            budget: Budget {
                balance,
                capacity,
                refill_per_minute: params.refill_per_minute,
                last_refill: clock.now(),
            },
            record: CallRecord::default(),
            total_settled: 0.0,
            zero_refill_pause: params.zero_refill_pause,
            clock,
        }
    }

    pub fn balance(&self) -> f64 {
        self.budget.balance
    }

    pub fn call_record(&self) -> CallRecord {
        self.record
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            balance: self.budget.balance,
            capacity: self.budget.capacity,
            refill_per_minute: self.budget.refill_per_minute,
            settled_calls: self.record.settled_calls,
            total_settled: self.total_settled,
        }
    }

    /// Credits linear refill for the time since the last computation. Never
    /// lifts the balance above capacity and never lowers it.
    pub fn refill(&mut self) -> f64 {
        let now = self.clock.now();
        let elapsed = now.saturating_duration_since(self.budget.last_refill);
        let rate = self.budget.refill_per_minute;
        if rate > 0.0 && self.budget.balance < self.budget.capacity {
            let added = elapsed.as_secs_f64() / 60.0 * rate;
            let before = self.budget.balance;
            self.budget.balance = (before + added).min(self.budget.capacity);
            if added > 0.0 {
                debug!(
                    target = "ingest.quota",
                    before,
                    after = self.budget.balance,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "budget refilled"
                );
            }
        }
        self.budget.last_refill = now;
        self.budget.balance
    }

    /// Waits until the balance covers `estimated_cost`. Does not deduct.
    ///
    /// Requests above capacity can never be satisfied and are clamped to
    /// capacity. With a non-positive refill rate a single fixed pause is taken
    /// and the caller proceeds on deficit.
    pub async fn reserve(&mut self, estimated_cost: f64) -> Reservation {
        let requested = if estimated_cost.is_finite() {
            estimated_cost.max(0.0)
        } else {
            0.0
        };
        let target = if requested > self.budget.capacity {
            warn!(
                target = "ingest.quota",
                requested,
                capacity = self.budget.capacity,
                "estimate exceeds capacity; waiting for a full bucket instead"
            );
            self.budget.capacity
        } else {
            requested
        };

        let mut waited = Duration::ZERO;
        loop {
            let balance = self.refill();
            if balance >= target {
                return Reservation {
                    estimated_cost: requested,
                    balance,
                    waited,
                };
            }

            let rate = self.budget.refill_per_minute;
            if rate <= 0.0 {
                let pause = self.zero_refill_pause;
                warn!(
                    target = "ingest.quota",
                    balance,
                    target,
                    pause_secs = pause.as_secs(),
                    "refill rate is not positive; taking fallback pause"
                );
                self.clock.sleep(pause).await;
                waited += pause;
                let balance = self.refill();
                return Reservation {
                    estimated_cost: requested,
                    balance,
                    waited,
                };
            }

            let deficit = target - balance;
            let wait_secs = ((deficit / rate) * 60.0).ceil().max(1.0) as u64;
            info!(
                target = "ingest.quota",
                balance,
                target,
                deficit,
                wait_secs,
                "insufficient budget; waiting for refill"
            );
            let wait = Duration::from_secs(wait_secs);
            self.clock.sleep(wait).await;
            waited += wait;
        }
    }

    /// Deducts the provider-reported cost of one completed call attempt and
    /// stamps the call time. The balance may go negative.
    ///
    /// When the provider also reports its remaining balance, that figure
    /// replaces the local one (capped at capacity). The local balance is only
    /// a model; the provider's count is the ground truth.
    pub fn settle(&mut self, authoritative_cost: f64, reported_left: Option<f64>) -> f64 {
        let cost = if authoritative_cost.is_finite() && authoritative_cost >= 0.0 {
            authoritative_cost
        } else {
            warn!(
                target = "ingest.quota",
                reported = authoritative_cost,
                "ignoring unusable reported cost"
            );
            0.0
        };
        let before = self.budget.balance;
        self.budget.balance = before - cost;
        self.total_settled += cost;
        let now = self.clock.now();
        self.record.last_call = Some(now);
        self.record.settled_calls += 1;

        if let Some(left) = reported_left.filter(|left| left.is_finite()) {
            let synced = left.min(self.budget.capacity);
            if (synced - self.budget.balance).abs() > f64::EPSILON {
                debug!(
                    target = "ingest.quota",
                    local = self.budget.balance,
                    provider = synced,
                    "balance synced to provider count"
                );
            }
            self.budget.balance = synced;
            self.budget.last_refill = now;
        }

        if self.budget.balance < 0.0 {
            info!(
                target = "ingest.quota",
                before,
                cost,
                after = self.budget.balance,
                "settled into deficit"
            );
        } else {
            debug!(target = "ingest.quota", before, cost, after = self.budget.balance, "settled");
        }
        crate::metrics::tokens_settled(cost, self.budget.balance);
        self.budget.balance
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::clock::ManualClock;

    fn ledger(initial: f64, rate: f64) -> (QuotaLedger, ManualClock) {
        let clock = ManualClock::new();
        let ledger = QuotaLedger::new(
            BudgetParams {
                capacity: 300.0,
                refill_per_minute: rate,
                initial_balance: initial,
                zero_refill_pause: Duration::from_secs(900),
            },
            Arc::new(clock.clone()),
        );
        (ledger, clock)
    }

    #[tokio::test]
    async fn reserve_returns_immediately_when_covered_then_settle_deducts() {
        let (mut ledger, clock) = ledger(100.0, 5.0);
        let reservation = ledger.reserve(50.0).await;
        assert_eq!(reservation.waited, Duration::ZERO);
        assert_eq!(ledger.balance(), 100.0);
        assert_eq!(ledger.settle(45.0, None), 55.0);
        assert!(clock.sleeps().is_empty());
        assert!(ledger.call_record().last_call.is_some());
    }

    #[tokio::test]
    async fn reserve_waits_exact_refill_time_for_deficit() {
        let (mut ledger, clock) = ledger(10.0, 5.0);
        let reservation = ledger.reserve(60.0).await;
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(600)]);
        assert_eq!(reservation.waited, Duration::from_secs(600));
        assert!(reservation.balance >= 60.0);
    }

    #[tokio::test]
    async fn reserve_credits_elapsed_refill_before_waiting() {
        let (mut ledger, clock) = ledger(0.0, 5.0);
        clock.advance(Duration::from_secs(60));
        let reservation = ledger.reserve(5.0).await;
        assert_eq!(reservation.waited, Duration::ZERO);
        assert_eq!(ledger.balance(), 5.0);
    }

    #[tokio::test]
    async fn refill_never_exceeds_capacity() {
        let (mut ledger, clock) = ledger(290.0, 5.0);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(ledger.refill(), 300.0);
    }

    #[tokio::test]
    async fn settle_can_drive_balance_negative_and_reserve_recovers() {
        let (mut ledger, clock) = ledger(20.0, 5.0);
        ledger.reserve(17.0).await;
        assert_eq!(ledger.settle(50.0, None), -30.0);

        ledger.reserve(10.0).await;
        // 40 units of deficit at 5/min
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(480)]);
        assert!(ledger.balance() >= 10.0);
    }

    #[tokio::test]
    async fn zero_refill_rate_takes_single_fallback_pause() {
        let (mut ledger, clock) = ledger(10.0, 0.0);
        let reservation = ledger.reserve(60.0).await;
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(900)]);
        assert_eq!(reservation.balance, 10.0);
    }

    #[tokio::test]
    async fn over_capacity_request_waits_for_full_bucket() {
        let (mut ledger, clock) = ledger(300.0, 5.0);
        let reservation = ledger.reserve(1_700.0).await;
        assert_eq!(reservation.waited, Duration::ZERO);
        assert_eq!(reservation.estimated_cost, 1_700.0);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn balance_tracks_every_settle_exactly() {
        let (mut ledger, _clock) = ledger(300.0, 5.0);
        let costs = [17.0, 0.0, 33.5, 120.0, 1.0];
        for cost in costs {
            ledger.reserve(cost).await;
            let before = ledger.balance();
            let after = ledger.settle(cost, None);
            assert_eq!(after, before - cost);
        }
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.settled_calls, costs.len() as u64);
        assert_eq!(snapshot.total_settled, costs.iter().sum::<f64>());
    }

    #[tokio::test]
    async fn negative_or_nan_cost_settles_as_zero() {
        let (mut ledger, _clock) = ledger(100.0, 5.0);
        assert_eq!(ledger.settle(-4.0, None), 100.0);
        assert_eq!(ledger.settle(f64::NAN, None), 100.0);
        assert_eq!(ledger.call_record().settled_calls, 2);
    }

    #[tokio::test]
    async fn provider_count_replaces_initial_guess() {
        let (mut ledger, _clock) = ledger(100.0, 5.0);
        ledger.reserve(5.0).await;
        assert_eq!(ledger.settle(5.0, Some(250.0)), 250.0);
        // later settles deduct from the synced figure
        assert_eq!(ledger.settle(10.0, None), 240.0);
        assert_eq!(ledger.snapshot().total_settled, 15.0);
    }

    #[tokio::test]
    async fn provider_count_is_capped_but_may_be_negative() {
        let (mut ledger, clock) = ledger(100.0, 5.0);
        assert_eq!(ledger.settle(1.0, Some(1_000.0)), 300.0);
        assert_eq!(ledger.settle(1.0, Some(-40.0)), -40.0);
        assert_eq!(ledger.settle(1.0, Some(f64::NAN)), -41.0);
        // refill restarts from the moment of the sync
        clock.advance(Duration::from_secs(120));
        assert_eq!(ledger.refill(), -31.0);
    }
}
