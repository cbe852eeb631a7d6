use super::provider::{CallError, Keyed, Reply};
use super::types::FetchOutcome;
use crate::quota::QuotaGovernor;
use std::{collections::HashMap, future::Future};
use tracing::{info, warn};

/// How the pre-call estimate for one batch is derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CostModel {
    PerItem(f64),
    PerCall(f64),
}

impl CostModel {
    pub fn estimate(&self, items: usize) -> f64 {
        match self {
            CostModel::PerItem(cost) => items as f64 * cost,
            CostModel::PerCall(cost) => *cost,
        }
    }
}

/// One gated batch call: reserve, space, call, classify, settle.
#[derive(Debug, Clone, Copy)]
pub struct BatchDetailFetcher {
    pub endpoint: &'static str,
    pub cost: CostModel,
}

impl BatchDetailFetcher {
    pub fn new(endpoint: &'static str, cost: CostModel) -> Self {
        Self { endpoint, cost }
    }

    pub async fn fetch<D, F, Fut>(
        &self,
        governor: &mut QuotaGovernor,
        identifiers: &[String],
        call: &mut F,
    ) -> FetchOutcome<D>
    where
        D: Keyed,
        F: FnMut(Vec<String>) -> Fut,
        Fut: Future<Output = Result<Reply<Vec<D>>, CallError>>,
    {
        let estimate = self.cost.estimate(identifiers.len());
        governor.admit(estimate).await;

        let result = call(identifiers.to_vec()).await;
        let tokens_left = match &result {
            Ok(reply) => reply.tokens_left,
            Err(err) => err.tokens_left(),
        };
        let outcome = match result {
            Ok(reply) => {
                let cost = match reply.tokens_consumed {
                    Some(cost) => cost,
                    None => {
                        warn!(
                            target = "ingest.fetch",
                            endpoint = self.endpoint,
                            estimate,
                            "response carried no cost; settling the estimate"
                        );
                        estimate
                    }
                };
                let mut details = HashMap::with_capacity(reply.data.len());
                for detail in reply.data {
                    details.insert(detail.key().to_string(), detail);
                }
                FetchOutcome::Success { details, cost }
            }
            Err(CallError::Throttled { reported_cost, .. }) => FetchOutcome::Throttled {
                cost: reported_cost.unwrap_or(0.0),
            },
            Err(err) => FetchOutcome::Failure {
                kind: err.kind(),
                cost: err.reported_cost().unwrap_or(0.0),
                message: err.to_string(),
            },
        };

        let balance = governor.settle(outcome.cost(), tokens_left);
        crate::metrics::calls_total(self.endpoint, outcome.label());
        info!(
            target = "ingest.fetch",
            endpoint = self.endpoint,
            ids = identifiers.len(),
            outcome = outcome.label(),
            estimate,
            cost = outcome.cost(),
            balance,
            "batch call settled"
        );
        outcome
    }
}
