use crate::ingest::provider::Keyed;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::HashMap;

/// Sentinel the provider uses for "no value" in price arrays.
pub const NO_VALUE: i64 = -1;

/// Price-array slot for the lowest used price.
pub const USED_PRICE_INDEX: usize = 2;

/// Entry from the deal feed.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    #[serde(default)]
    pub asin: String,
    pub title: Option<String>,
    #[serde(default)]
    pub current: Vec<i64>,
    pub last_update: Option<i64>,
    pub root_cat: Option<i64>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub asin: String,
    pub title: Option<String>,
    #[serde(default)]
    pub offers: Vec<Offer>,
    pub stats: Option<Stats>,
}

impl Keyed for Product {
    fn key(&self) -> &str {
        &self.asin
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    #[serde(default)]
    pub current: Vec<i64>,
    pub buy_box_used_price: Option<i64>,
}

impl Stats {
    pub fn used_price(&self) -> Option<i64> {
        self.current
            .get(USED_PRICE_INDEX)
            .copied()
            .filter(|price| *price > 0)
    }
}

/// Offers arrive either with a bare condition code or wrapped as `{ "value": n }`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Condition {
    Code(i64),
    Tagged { value: i64 },
}

impl Condition {
    pub const NEW: i64 = 1;

    pub fn code(&self) -> i64 {
        match self {
            Condition::Code(code) | Condition::Tagged { value: code } => *code,
        }
    }

    pub fn is_new(&self) -> bool {
        self.code() == Self::NEW
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub seller_id: Option<String>,
    pub condition: Option<Condition>,
    /// Flat `[time, price, shipping, time, price, shipping, ...]` history.
    #[serde(rename = "offerCSV", default)]
    pub offer_csv: Vec<i64>,
    #[serde(rename = "isFBA")]
    pub is_fba: Option<bool>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Seller {
    #[serde(default)]
    pub seller_id: String,
    pub seller_name: Option<String>,
    /// Positive rating percentage, 0..=100.
    pub current_rating: Option<i64>,
    pub current_rating_count: Option<i64>,
}

impl Keyed for Seller {
    fn key(&self) -> &str {
        &self.seller_id
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealEnvelope {
    pub deals: Option<DealList>,
    pub tokens_consumed: Option<f64>,
    pub tokens_left: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DealList {
    #[serde(default)]
    pub dr: Vec<Deal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductEnvelope {
    pub products: Option<Vec<Product>>,
    pub tokens_consumed: Option<f64>,
    pub tokens_left: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerEnvelope {
    pub sellers: Option<HashMap<String, Seller>>,
    pub tokens_consumed: Option<f64>,
    pub tokens_left: Option<f64>,
}
