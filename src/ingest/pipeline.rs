use super::assembler::ResultAssembler;
use super::cancel::CancelFlag;
use super::fetcher::{BatchDetailFetcher, CostModel};
use super::pager::ListingPager;
use super::progress::{RunPhase, RunProgress};
use super::provider::MarketplaceApi;
use super::retry::{RetryPolicy, resolve_batch};
use super::rows::assemble_rows;
use super::sellers::{SellerLookup, SellerStage, seller_ids};
use super::types::{ErrorKind, OutputRecord, WorkItem, partition};
use crate::config::IngestConfig;
use crate::keepa::{
    models::{Deal, Product},
    validate_asin,
};
use crate::models::{RunReport, RunRequest, RunSummary, StageReport};
use crate::quota::{
    QuotaGovernor,
    clock::Clock,
    ledger::LedgerSnapshot,
    preflight::{BudgetShortfall, CostEstimate, PreflightCostGuard},
};
use crate::sink::RecordSink;
use chrono::Utc;
use serde_json::{Value, json};
use std::{collections::BTreeMap, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct RunError {
    stage: &'static str,
    message: String,
    kind: RunErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunErrorKind {
    /// Preflight refusal; nothing was spent on details.
    BudgetExhausted(BudgetShortfall),
    InvalidInput,
    Internal,
}

impl RunError {
    pub fn budget_exhausted(stage: &'static str, shortfall: BudgetShortfall) -> Self {
        Self {
            stage,
            message: shortfall.to_string(),
            kind: RunErrorKind::BudgetExhausted(shortfall),
        }
    }

    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: RunErrorKind::InvalidInput,
        }
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            kind: RunErrorKind::Internal,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> RunErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    pub fn shortfall(&self) -> Option<BudgetShortfall> {
        match self.kind {
            RunErrorKind::BudgetExhausted(shortfall) => Some(shortfall),
            _ => None,
        }
    }
}

fn record_stage(stages: &mut Vec<StageReport>, name: &'static str, started: Instant, output: Value) {
    let elapsed_ms = started.elapsed().as_millis();
    crate::metrics::stage_elapsed(name, elapsed_ms);
    stages.push(StageReport::new(name, elapsed_ms, output));
}

/// Owns the provider client, the sink and the quota governor. The governor
/// outlives individual runs so the ledger carries over between them.
pub struct Ingestor<A, S> {
    api: A,
    sink: S,
    config: Arc<IngestConfig>,
    governor: QuotaGovernor,
    guard: PreflightCostGuard,
    pager: ListingPager,
    details: BatchDetailFetcher,
    sellers: BatchDetailFetcher,
    policy: RetryPolicy,
}

impl<A: MarketplaceApi, S: RecordSink> Ingestor<A, S> {
    pub fn new(api: A, sink: S, config: Arc<IngestConfig>, clock: Arc<dyn Clock>) -> Self {
        Self {
            governor: QuotaGovernor::from_config(&config, clock),
            guard: PreflightCostGuard::from_config(&config),
            pager: ListingPager::new(config.est_cost_per_page, config.max_pages),
            details: BatchDetailFetcher::new(
                "product",
                CostModel::PerItem(config.est_cost_per_item),
            ),
            sellers: BatchDetailFetcher::new(
                "seller",
                CostModel::PerCall(config.secondary_cost_per_call),
            ),
            policy: RetryPolicy::from_config(&config),
            api,
            sink,
            config,
        }
    }

    pub fn ledger(&self) -> LedgerSnapshot {
        self.governor.ledger().snapshot()
    }

    pub async fn run(
        &mut self,
        run_id: Uuid,
        request: &RunRequest,
        progress: &RunProgress,
        cancel: &CancelFlag,
    ) -> Result<RunReport, RunError> {
        if request.item_cap == Some(0) {
            return Err(RunError::invalid_input("page_listings", "item_cap must be positive"));
        }
        let started_at = Utc::now();
        let mut stages = Vec::new();
        let api = &self.api;
        let governor = &mut self.governor;
        let sort_type = request.sort_type.unwrap_or(self.config.default_sort_type);
        let cap = request.item_cap.or(self.config.item_cap);
        info!(target = "ingest.run", %run_id, ?cap, sort_type, "run started");

        progress.set_phase(RunPhase::Paging);
        let started = Instant::now();
        let listings = self
            .pager
            .collect(governor, cap, progress, cancel, |page| {
                api.deal_page(page, sort_type)
            })
            .await;
        let paging_truncated = listings.failure.is_some();
        record_stage(
            &mut stages,
            "page_listings",
            started,
            json!({
                "pages": listings.pages,
                "items": listings.items.len(),
                "capped": listings.capped,
                "failed_page": listings.failure.as_ref().map(|f| f.page),
                "failure": listings.failure.as_ref().map(|f| f.error.to_string()),
            }),
        );
        let pages = listings.pages;
        let paging_capped = listings.capped;
        let deals: Vec<Deal> = listings.items;

        let started = Instant::now();
        let mut assembler: ResultAssembler<Product> =
            ResultAssembler::new(deals.iter().map(|d| d.asin.clone()).collect());
        let mut work: Vec<WorkItem<&Deal>> = Vec::with_capacity(deals.len());
        for (position, deal) in deals.iter().enumerate() {
            if validate_asin(&deal.asin) {
                work.push(WorkItem {
                    identifier: deal.asin.clone(),
                    payload: deal,
                    position,
                });
            } else {
                warn!(target = "ingest.run", asin = %deal.asin, position, "invalid asin skipped");
                assembler
                    .fill_placeholder(position, ErrorKind::Validation, format!("invalid asin {:?}", deal.asin))
                    .map_err(|err| RunError::internal("validate", err.to_string()))?;
            }
        }
        let invalid = deals.len() - work.len();
        progress.add_placeholders(invalid);
        record_stage(
            &mut stages,
            "validate",
            started,
            json!({ "valid": work.len(), "invalid": invalid }),
        );

        progress.set_phase(RunPhase::Preflight);
        let started = Instant::now();
        let estimate = if work.is_empty() {
            None
        } else {
            let estimate = self
                .guard
                .check_run(governor.ledger_mut(), work.len())
                .map_err(|shortfall| RunError::budget_exhausted("preflight", shortfall))?;
            Some(estimate)
        };
        record_stage(
            &mut stages,
            "preflight",
            started,
            json!({ "estimate": estimate, "balance": governor.ledger().balance() }),
        );

        progress.set_phase(RunPhase::FetchingDetails);
        let started = Instant::now();
        let batches = partition(&work, self.config.batch_size);
        progress.add_batches(batches.len());
        let mut batch_states: BTreeMap<&'static str, usize> = BTreeMap::new();
        for batch in &batches {
            let ids = batch.request_ids();
            let resolution = resolve_batch(governor, &self.details, &self.policy, cancel, &ids, |ids| {
                api.product_batch(ids)
            })
            .await;
            let (fetched, placeholders) = assembler
                .fill_batch(batch.items, &resolution.result)
                .map_err(|err| RunError::internal("fetch_details", err.to_string()))?;
            progress.batch_done(fetched, placeholders);
            *batch_states.entry(resolution.state.as_str()).or_default() += 1;
            info!(
                target = "ingest.run",
                batch = batch.index,
                of = batches.len(),
                state = resolution.state.as_str(),
                attempts = resolution.attempts,
                fetched,
                placeholders,
                "batch folded"
            );
        }
        let filled = assembler.filled();
        let records = assembler.finish();
        record_stage(
            &mut stages,
            "fetch_details",
            started,
            json!({ "batches": batches.len(), "states": batch_states, "filled": filled }),
        );

        progress.set_phase(RunPhase::FetchingSellers);
        let started = Instant::now();
        let lookup = if cancel.is_cancelled() {
            SellerLookup {
                skipped: true,
                ..SellerLookup::default()
            }
        } else {
            let stage = SellerStage {
                guard: &self.guard,
                fetcher: &self.sellers,
                policy: &self.policy,
                batch_size: self.config.secondary_batch_size,
            };
            stage.run(api, governor, cancel, seller_ids(&records)).await
        };
        record_stage(
            &mut stages,
            "fetch_sellers",
            started,
            serde_json::to_value(&lookup).unwrap_or(Value::Null),
        );

        let started = Instant::now();
        let rows = assemble_rows(&deals, &records, &lookup.sellers);
        record_stage(&mut stages, "assemble_rows", started, json!({ "rows": rows.len() }));

        progress.set_phase(RunPhase::Persisting);
        let started = Instant::now();
        let rows_persisted = self
            .sink
            .persist(&rows)
            .await
            .map_err(|err| RunError::internal("persist", err.to_string()))?;
        record_stage(&mut stages, "persist", started, json!({ "rows": rows_persisted }));

        let summary = summarize(
            &records,
            SummaryContext {
                pages,
                paging_truncated,
                paging_capped,
                cancelled: cancel.is_cancelled(),
                estimate,
                sellers: lookup,
                rows_persisted,
                ledger: governor.ledger().snapshot(),
            },
        );
        progress.set_phase(RunPhase::Done);
        info!(
            target = "ingest.run",
            %run_id,
            total = summary.total,
            fetched = summary.fetched,
            placeholders = summary.placeholder_total(),
            balance = summary.ledger.balance,
            "run finished"
        );
        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            stages,
            summary,
        })
    }
}

struct SummaryContext {
    pages: u32,
    paging_truncated: bool,
    paging_capped: bool,
    cancelled: bool,
    estimate: Option<CostEstimate>,
    sellers: SellerLookup,
    rows_persisted: usize,
    ledger: LedgerSnapshot,
}

fn summarize(records: &[OutputRecord<Product>], ctx: SummaryContext) -> RunSummary {
    let mut placeholders: BTreeMap<&'static str, usize> = BTreeMap::new();
    for kind in records.iter().filter_map(OutputRecord::error_kind) {
        *placeholders.entry(kind.as_str()).or_default() += 1;
    }
    for (kind, count) in &placeholders {
        crate::metrics::placeholders(*kind, *count);
    }
    RunSummary {
        total: records.len(),
        fetched: records.iter().filter(|r| r.detail().is_some()).count(),
        placeholders,
        pages: ctx.pages,
        paging_truncated: ctx.paging_truncated,
        paging_capped: ctx.paging_capped,
        cancelled: ctx.cancelled,
        estimate: ctx.estimate,
        sellers: ctx.sellers,
        rows_persisted: ctx.rows_persisted,
        ledger: ctx.ledger,
    }
}
