use super::cancel::CancelFlag;
use super::fetcher::BatchDetailFetcher;
use super::provider::MarketplaceApi;
use super::retry::{BatchResult, RetryPolicy, resolve_batch};
use super::types::OutputRecord;
use crate::keepa::models::{Product, Seller};
use crate::keepa::offers::best_used_offer;
use crate::quota::{
    QuotaGovernor,
    preflight::{PreflightCostGuard, SecondaryDecision},
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SellerLookup {
    #[serde(skip)]
    pub sellers: HashMap<String, Seller>,
    pub requested: usize,
    pub batches: usize,
    pub failed_batches: usize,
    pub skipped: bool,
}

/// Seller ids behind each product's best used offer, first-seen order.
pub fn seller_ids(records: &[OutputRecord<Product>]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for product in records.iter().filter_map(OutputRecord::detail) {
        if let Some(id) = best_used_offer(product).and_then(|offer| offer.seller_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

pub struct SellerStage<'a> {
    pub guard: &'a PreflightCostGuard,
    pub fetcher: &'a BatchDetailFetcher,
    pub policy: &'a RetryPolicy,
    pub batch_size: usize,
}

impl SellerStage<'_> {
    /// Degrades instead of failing: unaffordable means skipped, a failed chunk
    /// only leaves its sellers unknown.
    pub async fn run<A: MarketplaceApi>(
        &self,
        api: &A,
        governor: &mut QuotaGovernor,
        cancel: &CancelFlag,
        ids: Vec<String>,
    ) -> SellerLookup {
        let mut lookup = SellerLookup {
            requested: ids.len(),
            ..SellerLookup::default()
        };
        if ids.is_empty() {
            return lookup;
        }
        if self.guard.check_secondary(governor.ledger_mut(), ids.len()) == SecondaryDecision::Skip {
            lookup.skipped = true;
            return lookup;
        }

        for chunk in ids.chunks(self.batch_size.max(1)) {
            lookup.batches += 1;
            let resolution = resolve_batch(governor, self.fetcher, self.policy, cancel, chunk, |ids| {
                api.seller_batch(ids)
            })
            .await;
            match resolution.result {
                BatchResult::Details(found) => lookup.sellers.extend(found),
                BatchResult::Abandoned { kind, message } => {
                    lookup.failed_batches += 1;
                    warn!(
                        target = "ingest.sellers",
                        kind = %kind,
                        reason = %message,
                        sellers = chunk.len(),
                        "seller batch abandoned"
                    );
                }
            }
        }
        info!(
            target = "ingest.sellers",
            requested = lookup.requested,
            found = lookup.sellers.len(),
            failed_batches = lookup.failed_batches,
            "seller lookup finished"
        );
        lookup
    }
}
