//! In-memory provider and helpers shared by the ingestion tests.

use super::cancel::CancelFlag;
use super::provider::{CallError, Keyed, MarketplaceApi, Reply};
use super::rows::DealRow;
use crate::config::IngestConfig;
use crate::keepa::models::{Condition, Deal, Offer, Product, Seller};
use crate::quota::{QuotaGovernor, clock::ManualClock};
use crate::sink::{RecordSink, SinkError};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Minimal keyed detail for driving the generic fetch path.
#[derive(Debug, Clone, PartialEq)]
pub struct Echo(pub String);

impl Keyed for Echo {
    fn key(&self) -> &str {
        &self.0
    }
}

pub fn governor(config: IngestConfig) -> (QuotaGovernor, ManualClock) {
    let clock = ManualClock::new();
    let governor = QuotaGovernor::from_config(&config, Arc::new(clock.clone()));
    (governor, clock)
}

pub fn asin(n: usize) -> String {
    format!("B{n:09}")
}

pub fn deal(asin: &str) -> Deal {
    Deal {
        asin: asin.to_string(),
        title: Some(format!("Deal {asin}")),
        current: Vec::new(),
        last_update: Some(7_000_000),
        root_cat: Some(283155),
    }
}

pub fn product_with_offer(asin: &str, seller: &str, price: i64) -> Product {
    Product {
        asin: asin.to_string(),
        title: Some(format!("Product {asin}")),
        offers: vec![Offer {
            seller_id: Some(seller.to_string()),
            condition: Some(Condition::Code(2)),
            offer_csv: vec![1, price, 0],
            is_fba: Some(false),
        }],
        stats: None,
    }
}

type Scripted<T> = Mutex<VecDeque<Result<Reply<Vec<T>>, CallError>>>;

/// Provider fake. Scripted replies are served first; afterwards pages are
/// empty and batch calls echo one record per requested id at one unit each.
#[derive(Default)]
pub struct ScriptedApi {
    pages: Scripted<Deal>,
    products: Scripted<Product>,
    sellers: Scripted<Seller>,
    omitted: Mutex<HashSet<String>>,
    page_calls: Mutex<Vec<u32>>,
    product_calls: Mutex<Vec<Vec<String>>>,
    seller_calls: Mutex<Vec<Vec<String>>>,
    cancel_after: Mutex<Option<(usize, CancelFlag)>>,
}

impl ScriptedApi {
    pub fn with_pages(pages: Vec<Vec<String>>) -> Self {
        let api = Self::default();
        for page in pages {
            let deals = page.iter().map(|a| deal(a)).collect();
            api.push_page(Ok(Reply::new(deals, Some(10.0), None)));
        }
        api
    }

    pub fn push_page(&self, reply: Result<Reply<Vec<Deal>>, CallError>) {
        self.pages.lock().unwrap().push_back(reply);
    }

    pub fn push_products(&self, reply: Result<Reply<Vec<Product>>, CallError>) {
        self.products.lock().unwrap().push_back(reply);
    }

    pub fn push_sellers(&self, reply: Result<Reply<Vec<Seller>>, CallError>) {
        self.sellers.lock().unwrap().push_back(reply);
    }

    /// Echoed product responses will silently leave this asin out.
    pub fn omit(&self, asin: &str) {
        self.omitted.lock().unwrap().insert(asin.to_string());
    }

    /// Trips `flag` once `calls` product requests have been served.
    pub fn cancel_after_products(&self, calls: usize, flag: CancelFlag) {
        *self.cancel_after.lock().unwrap() = Some((calls, flag));
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.lock().unwrap().len()
    }

    pub fn product_requests(&self) -> Vec<Vec<String>> {
        self.product_calls.lock().unwrap().clone()
    }

    pub fn product_calls(&self) -> usize {
        self.product_calls.lock().unwrap().len()
    }

    pub fn seller_calls(&self) -> usize {
        self.seller_calls.lock().unwrap().len()
    }
}

impl MarketplaceApi for ScriptedApi {
    async fn deal_page(&self, page: u32, _sort_type: u32) -> Result<Reply<Vec<Deal>>, CallError> {
        self.page_calls.lock().unwrap().push(page);
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Reply::new(Vec::new(), Some(10.0), None)))
    }

    async fn product_batch(&self, asins: Vec<String>) -> Result<Reply<Vec<Product>>, CallError> {
        let served = {
            let mut calls = self.product_calls.lock().unwrap();
            calls.push(asins.clone());
            calls.len()
        };
        if let Some((after, flag)) = self.cancel_after.lock().unwrap().as_ref() {
            if served >= *after {
                flag.cancel();
            }
        }
        if let Some(reply) = self.products.lock().unwrap().pop_front() {
            return reply;
        }
        let omitted = self.omitted.lock().unwrap().clone();
        let cost = asins.len() as f64;
        let products = asins
            .iter()
            .filter(|a| !omitted.contains(*a))
            .map(|a| product_with_offer(a, &format!("SELLER{a}"), 1_000))
            .collect();
        Ok(Reply::new(products, Some(cost), None))
    }

    async fn seller_batch(&self, seller_ids: Vec<String>) -> Result<Reply<Vec<Seller>>, CallError> {
        self.seller_calls.lock().unwrap().push(seller_ids.clone());
        if let Some(reply) = self.sellers.lock().unwrap().pop_front() {
            return reply;
        }
        let sellers = seller_ids
            .into_iter()
            .map(|id| Seller {
                seller_name: Some(format!("Shop {id}")),
                seller_id: id,
                current_rating: Some(97),
                current_rating_count: Some(120),
            })
            .collect();
        Ok(Reply::new(sellers, Some(1.0), None))
    }
}

/// Captures persisted rows; can be told to reject writes.
#[derive(Default)]
pub struct MemorySink {
    pub rows: Mutex<Vec<DealRow>>,
    pub reject: bool,
}

impl RecordSink for MemorySink {
    async fn persist(&self, rows: &[DealRow]) -> Result<usize, SinkError> {
        if self.reject {
            return Err(SinkError::Rejected {
                status: 503,
                body: "store unavailable".into(),
            });
        }
        self.rows.lock().unwrap().extend_from_slice(rows);
        Ok(rows.len())
    }
}

impl RecordSink for Arc<MemorySink> {
    async fn persist(&self, rows: &[DealRow]) -> Result<usize, SinkError> {
        self.as_ref().persist(rows).await
    }
}

impl MarketplaceApi for Arc<ScriptedApi> {
    async fn deal_page(&self, page: u32, sort_type: u32) -> Result<Reply<Vec<Deal>>, CallError> {
        self.as_ref().deal_page(page, sort_type).await
    }

    async fn product_batch(&self, asins: Vec<String>) -> Result<Reply<Vec<Product>>, CallError> {
        self.as_ref().product_batch(asins).await
    }

    async fn seller_batch(&self, seller_ids: Vec<String>) -> Result<Reply<Vec<Seller>>, CallError> {
        self.as_ref().seller_batch(seller_ids).await
    }
}
