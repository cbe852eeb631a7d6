use super::types::{ErrorKind, OutputRecord};
use crate::keepa::models::{Deal, Product, Seller};
use crate::keepa::offers::{PriceSource, best_used_offer, seller_quality};
use serde::Serialize;
use std::collections::HashMap;

/// Persistence hand-off: one row per paged listing, in listing order. Every
/// row carries every key so bulk upserts see a uniform shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DealRow {
    pub asin: String,
    pub position: usize,
    pub fetched: bool,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub title: Option<String>,
    pub price_now_cents: Option<i64>,
    pub price_source: Option<PriceSource>,
    pub seller_id: Option<String>,
    pub seller_name: Option<String>,
    pub seller_rating_count: Option<i64>,
    pub seller_quality: Option<f64>,
    pub deal_last_update: Option<i64>,
}

pub fn assemble_rows(
    deals: &[Deal],
    records: &[OutputRecord<Product>],
    sellers: &HashMap<String, Seller>,
) -> Vec<DealRow> {
    records
        .iter()
        .enumerate()
        .map(|(position, record)| {
            let deal = deals.get(position);
            let mut row = DealRow {
                asin: record.identifier().to_string(),
                position,
                fetched: false,
                error_kind: None,
                error_message: None,
                title: deal.and_then(|d| d.title.clone()),
                price_now_cents: None,
                price_source: None,
                seller_id: None,
                seller_name: None,
                seller_rating_count: None,
                seller_quality: None,
                deal_last_update: deal.and_then(|d| d.last_update),
            };
            match record {
                OutputRecord::Fetched { detail, .. } => {
                    row.fetched = true;
                    if detail.title.is_some() {
                        row.title = detail.title.clone();
                    }
                    if let Some(best) = best_used_offer(detail) {
                        row.price_now_cents = Some(best.price_cents);
                        row.price_source = Some(best.source);
                        if let Some(seller) = best.seller_id.as_ref().and_then(|id| sellers.get(id)) {
                            row.seller_name = seller.seller_name.clone();
                            row.seller_rating_count = seller.current_rating_count;
                            row.seller_quality = seller_quality(seller);
                        }
                        row.seller_id = best.seller_id;
                    }
                }
                OutputRecord::Placeholder { kind, message, .. } => {
                    row.error_kind = Some(*kind);
                    row.error_message = Some(message.clone());
                }
            }
            row
        })
        .collect()
}
