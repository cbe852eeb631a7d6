use crate::http::build_client;
use crate::ingest::rows::DealRow;
use reqwest::Client;
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

/// Rows per PostgREST request.
const UPSERT_CHUNK: usize = 500;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("store rejected rows: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Downstream persistence for assembled rows.
pub trait RecordSink: Send + Sync {
    fn persist(&self, rows: &[DealRow]) -> impl Future<Output = Result<usize, SinkError>> + Send;
}

#[derive(Debug, Clone)]
pub struct SupabaseSink {
    base_url: String,
    service_key: String,
    table: String,
    http: Client,
}

impl SupabaseSink {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let table = std::env::var("SUPABASE_DEALS_TABLE")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "deals".to_string());
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            table,
            http: build_client(),
        })
    }

    async fn upsert(&self, rows: &[DealRow]) -> Result<(), SinkError> {
        let url = format!("{}/rest/v1/{}?on_conflict=asin", self.base_url, self.table);
        let response = self
            .http
            .post(url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(rows)
            .send()
            .await
            .map_err(|err| SinkError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

impl RecordSink for SupabaseSink {
    async fn persist(&self, rows: &[DealRow]) -> Result<usize, SinkError> {
        for chunk in rows.chunks(UPSERT_CHUNK) {
            self.upsert(chunk).await?;
        }
        info!(target = "ingest.sink", table = %self.table, rows = rows.len(), "rows upserted");
        Ok(rows.len())
    }
}

/// Used when no store is configured; rows are only logged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl RecordSink for NullSink {
    async fn persist(&self, rows: &[DealRow]) -> Result<usize, SinkError> {
        warn!(target = "ingest.sink", rows = rows.len(), "no store configured; rows discarded");
        Ok(0)
    }
}

/// Runtime choice between the configured store and the null sink.
#[derive(Debug, Clone)]
pub enum ConfiguredSink {
    Supabase(SupabaseSink),
    Null(NullSink),
}

impl ConfiguredSink {
    pub fn from_env() -> Self {
        match SupabaseSink::from_env() {
            Some(sink) => ConfiguredSink::Supabase(sink),
            None => ConfiguredSink::Null(NullSink),
        }
    }
}

impl RecordSink for ConfiguredSink {
    async fn persist(&self, rows: &[DealRow]) -> Result<usize, SinkError> {
        match self {
            ConfiguredSink::Supabase(sink) => sink.persist(rows).await,
            ConfiguredSink::Null(sink) => sink.persist(rows).await,
        }
    }
}
