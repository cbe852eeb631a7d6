pub mod clock;
pub mod gate;
pub mod ledger;
pub mod preflight;

use crate::config::IngestConfig;
use clock::Clock;
use gate::MinIntervalGate;
use ledger::{BudgetParams, QuotaLedger, Reservation};
use std::{sync::Arc, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Admission {
    pub reservation: Reservation,
    pub spacing_wait: Duration,
}

/// Ledger plus spacing gate: the only path to an outbound call.
pub struct QuotaGovernor {
    ledger: QuotaLedger,
    gate: MinIntervalGate,
}

impl QuotaGovernor {
    pub fn new(ledger: QuotaLedger, gate: MinIntervalGate) -> Self {
        Self { ledger, gate }
    }

    pub fn from_config(config: &IngestConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            QuotaLedger::new(BudgetParams::from_config(config), clock),
            MinIntervalGate::new(config.min_call_spacing()),
        )
    }

    /// Budget first, then spacing. Spacing is measured after the budget wait
    /// so a long refill usually satisfies it for free.
    pub async fn admit(&mut self, estimated_cost: f64) -> Admission {
        let reservation = self.ledger.reserve(estimated_cost).await;
        let record = self.ledger.call_record();
        let clock = Arc::clone(self.ledger.clock());
        let spacing_wait = self.gate.wait(&record, clock.as_ref()).await;
        Admission {
            reservation,
            spacing_wait,
        }
    }

    pub fn settle(&mut self, authoritative_cost: f64, reported_left: Option<f64>) -> f64 {
        self.ledger.settle(authoritative_cost, reported_left)
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut QuotaLedger {
        &mut self.ledger
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(self.ledger.clock())
    }
}
