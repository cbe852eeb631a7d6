use super::ledger::QuotaLedger;
use crate::config::IngestConfig;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostEstimate {
    pub items: usize,
    pub primary: f64,
    pub secondary: f64,
    pub total: f64,
}

/// Run-level refusal: the estimate cannot be covered by the current balance.
#[derive(Debug, Clone, Copy, PartialEq, Error, Serialize)]
#[error("estimated cost {estimated:.1} exceeds available budget {available:.1}")]
pub struct BudgetShortfall {
    pub estimated: f64,
    pub available: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryDecision {
    Proceed,
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct PreflightCostGuard {
    pub cost_per_item: f64,
    pub secondary_cost_per_call: f64,
    pub secondary_batch_size: usize,
}

impl PreflightCostGuard {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            cost_per_item: config.est_cost_per_item,
            secondary_cost_per_call: config.secondary_cost_per_call,
            secondary_batch_size: config.secondary_batch_size.max(1),
        }
    }

    /// `items * per_item` plus one secondary call per started block of
    /// `secondary_batch_size` items.
    pub fn estimate(&self, items: usize) -> CostEstimate {
        let primary = items as f64 * self.cost_per_item;
        let secondary = self.secondary_cost(items);
        CostEstimate {
            items,
            primary,
            secondary,
            total: primary + secondary,
        }
    }

    pub fn secondary_cost(&self, keys: usize) -> f64 {
        keys.div_ceil(self.secondary_batch_size) as f64 * self.secondary_cost_per_call
    }

    /// Hard stop before any spend. Refills first so a stale balance never
    /// rejects an affordable run.
    pub fn check_run(
        &self,
        ledger: &mut QuotaLedger,
        items: usize,
    ) -> Result<CostEstimate, BudgetShortfall> {
        let estimate = self.estimate(items);
        let available = ledger.refill();
        if estimate.total > available {
            warn!(
                target = "ingest.preflight",
                items,
                estimated = estimate.total,
                available,
                "run refused: insufficient budget"
            );
            return Err(BudgetShortfall {
                estimated: estimate.total,
                available,
            });
        }
        info!(
            target = "ingest.preflight",
            items,
            estimated = estimate.total,
            available,
            "preflight passed"
        );
        Ok(estimate)
    }

    /// Narrower check for the optional secondary stage. Unaffordable means the
    /// stage is skipped, not that the run fails.
    pub fn check_secondary(&self, ledger: &mut QuotaLedger, keys: usize) -> SecondaryDecision {
        let needed = self.secondary_cost(keys);
        let available = ledger.refill();
        if needed > available {
            warn!(
                target = "ingest.preflight",
                keys,
                needed,
                available,
                "skipping secondary lookups: insufficient budget"
            );
            SecondaryDecision::Skip
        } else {
            SecondaryDecision::Proceed
        }
    }
}
