use serde::{Deserialize, Serialize};
use std::{env, str::FromStr, time::Duration};
use thiserror::Error;
use tracing::{info, warn};

/// Provider hard limit on identifiers per batch call.
pub const MAX_PROVIDER_BATCH: usize = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("unable to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid config file {path}: {message}")]
    Parse { path: String, message: String },
}

/// Tunables for one ingestion process. Every field has a default so a partial
/// YAML file (or none at all) is valid.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    pub budget_capacity: f64,
    pub refill_per_minute: f64,
    /// Starting balance before the first settle corrects it.
    pub initial_balance: f64,
    pub min_call_spacing_secs: u64,
    pub batch_size: usize,
    pub est_cost_per_item: f64,
    pub est_cost_per_page: f64,
    pub secondary_cost_per_call: f64,
    pub secondary_batch_size: usize,
    pub zero_refill_pause_secs: u64,
    pub max_throttle_retries: u32,
    pub throttle_pauses_secs: Vec<u64>,
    pub failure_pause_secs: u64,
    pub item_cap: Option<usize>,
    pub max_pages: u32,
    pub default_sort_type: u32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            budget_capacity: 300.0,
            refill_per_minute: 5.0,
            initial_balance: 100.0,
            min_call_spacing_secs: 60,
            batch_size: MAX_PROVIDER_BATCH,
            est_cost_per_item: 17.0,
            est_cost_per_page: 10.0,
            secondary_cost_per_call: 1.0,
            secondary_batch_size: MAX_PROVIDER_BATCH,
            zero_refill_pause_secs: 900,
            max_throttle_retries: 2,
            throttle_pauses_secs: vec![900, 1800],
            failure_pause_secs: 5,
            item_cap: None,
            max_pages: 10_000,
            default_sort_type: 4,
        }
    }
}

impl IngestConfig {
    /// File (if `INGEST_CONFIG_PATH` is set), then `INGEST_*` env overrides,
    /// then range validation.
    pub fn load() -> Result<Self, ConfigError> {
        let base = match env::var("INGEST_CONFIG_PATH") {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        let config = base.with_env_overrides().validated();
        info!(
            target = "ingest.config",
            capacity = config.budget_capacity,
            refill_per_minute = config.refill_per_minute,
            batch_size = config.batch_size,
            est_cost_per_item = config.est_cost_per_item,
            "ingest config loaded"
        );
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::Read {
            path: path.to_string(),
            message: err.to_string(),
        })?;
        Self::from_yaml_str(&raw).map_err(|message| ConfigError::Parse {
            path: path.to_string(),
            message,
        })
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, String> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw).map_err(|err| err.to_string())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("INGEST_BUDGET_CAPACITY") {
            self.budget_capacity = v;
        }
        if let Some(v) = env_parse("INGEST_REFILL_PER_MINUTE") {
            self.refill_per_minute = v;
        }
        if let Some(v) = env_parse("INGEST_INITIAL_BALANCE") {
            self.initial_balance = v;
        }
        if let Some(v) = env_parse("INGEST_MIN_CALL_SPACING_SECS") {
            self.min_call_spacing_secs = v;
        }
        if let Some(v) = env_parse("INGEST_BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = env_parse("INGEST_EST_COST_PER_ITEM") {
            self.est_cost_per_item = v;
        }
        if let Some(v) = env_parse("INGEST_EST_COST_PER_PAGE") {
            self.est_cost_per_page = v;
        }
        if let Some(v) = env_parse("INGEST_ITEM_CAP") {
            self.item_cap = Some(v);
        }
        if let Some(v) = env_parse("INGEST_MAX_PAGES") {
            self.max_pages = v;
        }
        if let Some(v) = env_parse("INGEST_FAILURE_PAUSE_SECS") {
            self.failure_pause_secs = v;
        }
        self
    }

    /// Clamps out-of-range values back to something the pipeline can run with.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if !(self.budget_capacity.is_finite() && self.budget_capacity > 0.0) {
            warn!(target = "ingest.config", value = self.budget_capacity, "invalid budget_capacity; using default");
            self.budget_capacity = defaults.budget_capacity;
        }
        if !self.refill_per_minute.is_finite() {
            warn!(target = "ingest.config", "non-finite refill_per_minute; using default");
            self.refill_per_minute = defaults.refill_per_minute;
        }
        if !self.initial_balance.is_finite() {
            self.initial_balance = 0.0;
        }
        self.initial_balance = self.initial_balance.clamp(0.0, self.budget_capacity);
        if self.batch_size == 0 || self.batch_size > MAX_PROVIDER_BATCH {
            warn!(target = "ingest.config", value = self.batch_size, "batch_size out of range; clamping");
            self.batch_size = self.batch_size.clamp(1, MAX_PROVIDER_BATCH);
        }
        if self.secondary_batch_size == 0 || self.secondary_batch_size > MAX_PROVIDER_BATCH {
            self.secondary_batch_size = self.secondary_batch_size.clamp(1, MAX_PROVIDER_BATCH);
        }
        for cost in [
            &mut self.est_cost_per_item,
            &mut self.est_cost_per_page,
            &mut self.secondary_cost_per_call,
        ] {
            if !(cost.is_finite() && *cost >= 0.0) {
                *cost = 0.0;
            }
        }
        if self.throttle_pauses_secs.is_empty() {
            self.throttle_pauses_secs = defaults.throttle_pauses_secs;
        }
        if self.max_pages == 0 {
            self.max_pages = defaults.max_pages;
        }
        if self.item_cap == Some(0) {
            warn!(target = "ingest.config", "item_cap 0 means no cap");
            self.item_cap = None;
        }
        self
    }

    pub fn min_call_spacing(&self) -> Duration {
        Duration::from_secs(self.min_call_spacing_secs)
    }

    pub fn zero_refill_pause(&self) -> Duration {
        Duration::from_secs(self.zero_refill_pause_secs)
    }

    pub fn failure_pause(&self) -> Duration {
        Duration::from_secs(self.failure_pause_secs)
    }

    pub fn throttle_pauses(&self) -> Vec<Duration> {
        self.throttle_pauses_secs
            .iter()
            .map(|secs| Duration::from_secs(*secs))
            .collect()
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(target = "ingest.config", key, value = %raw, "ignoring unparsable env override");
            None
        }
    }
}
