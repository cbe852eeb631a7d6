use crate::ingest::sellers::SellerLookup;
use crate::quota::{ledger::LedgerSnapshot, preflight::CostEstimate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RunRequest {
    /// Stop paging once this many listings are collected.
    #[serde(default)]
    pub item_cap: Option<usize>,
    #[serde(default)]
    pub sort_type: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub fetched: usize,
    /// Placeholder counts keyed by error kind.
    pub placeholders: BTreeMap<&'static str, usize>,
    pub pages: u32,
    pub paging_truncated: bool,
    pub paging_capped: bool,
    pub cancelled: bool,
    pub estimate: Option<CostEstimate>,
    pub sellers: SellerLookup,
    pub rows_persisted: usize,
    pub ledger: LedgerSnapshot,
}

impl RunSummary {
    pub fn placeholder_total(&self) -> usize {
        self.placeholders.values().sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<StageReport>,
    pub summary: RunSummary,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
