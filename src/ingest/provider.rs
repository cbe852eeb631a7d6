use super::types::ErrorKind;
use crate::keepa::models::{Deal, Product, Seller};
use std::future::Future;
use thiserror::Error;

/// Parsed payload plus the provider's own accounting for the call.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply<T> {
    pub data: T,
    pub tokens_consumed: Option<f64>,
    pub tokens_left: Option<f64>,
}

impl<T> Reply<T> {
    pub fn new(data: T, tokens_consumed: Option<f64>, tokens_left: Option<f64>) -> Self {
        Self {
            data,
            tokens_consumed,
            tokens_left,
        }
    }
}

/// Error bodies may still carry `tokensConsumed` and `tokensLeft`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    #[error("provider throttled the call")]
    Throttled {
        reported_cost: Option<f64>,
        tokens_left: Option<f64>,
    },
    #[error("provider returned HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        reported_cost: Option<f64>,
        tokens_left: Option<f64>,
    },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("unexpected provider response: {message}")]
    Protocol {
        message: String,
        reported_cost: Option<f64>,
        tokens_left: Option<f64>,
    },
}

impl CallError {
    pub fn reported_cost(&self) -> Option<f64> {
        match self {
            CallError::Throttled { reported_cost, .. }
            | CallError::Http { reported_cost, .. }
            | CallError::Protocol { reported_cost, .. } => *reported_cost,
            CallError::Transport(_) => None,
        }
    }

    pub fn tokens_left(&self) -> Option<f64> {
        match self {
            CallError::Throttled { tokens_left, .. }
            | CallError::Http { tokens_left, .. }
            | CallError::Protocol { tokens_left, .. } => *tokens_left,
            CallError::Transport(_) => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::Throttled { .. } => ErrorKind::Throttling,
            CallError::Http { status, .. } if *status >= 500 => ErrorKind::Transport,
            CallError::Http { .. } => ErrorKind::Protocol,
            CallError::Transport(_) => ErrorKind::Transport,
            CallError::Protocol { .. } => ErrorKind::Protocol,
        }
    }
}

/// Detail records are matched back to requested identifiers by this key.
pub trait Keyed {
    fn key(&self) -> &str;
}

/// The provider seam: the three endpoints the ingestion core drives.
pub trait MarketplaceApi: Send + Sync {
    fn deal_page(
        &self,
        page: u32,
        sort_type: u32,
    ) -> impl Future<Output = Result<Reply<Vec<Deal>>, CallError>> + Send;

    fn product_batch(
        &self,
        asins: Vec<String>,
    ) -> impl Future<Output = Result<Reply<Vec<Product>>, CallError>> + Send;

    fn seller_batch(
        &self,
        seller_ids: Vec<String>,
    ) -> impl Future<Output = Result<Reply<Vec<Seller>>, CallError>> + Send;
}
