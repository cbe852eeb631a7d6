use super::models::{NO_VALUE, Offer, Product, Seller};
use serde::Serialize;
use tracing::debug;

/// Amazon Warehouse; its offers are never used as the reference price.
pub const WAREHOUSE_SELLER_ID: &str = "A2L77EE7U53NWQ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    LiveOffer,
    StatsUsed,
    StatsBuyBoxUsed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BestOffer {
    pub price_cents: i64,
    /// Only known when the price came from a live offer.
    pub seller_id: Option<String>,
    pub source: PriceSource,
}

/// Latest total (price plus shipping) of a used, non-warehouse offer.
fn live_total(offer: &Offer) -> Option<i64> {
    let condition = offer.condition?;
    if condition.is_new() || offer.seller_id.as_deref() == Some(WAREHOUSE_SELLER_ID) {
        return None;
    }
    let csv = &offer.offer_csv;
    if csv.len() < 3 {
        return None;
    }
    let price = csv[csv.len() - 2];
    if price <= 0 {
        return None;
    }
    let shipping = match csv[csv.len() - 1] {
        NO_VALUE => 0,
        shipping => shipping,
    };
    let total = price + shipping;
    (total > 0).then_some(total)
}

/// Lowest used price for a product. Live offers win ties against the stats
/// block because they carry a seller.
pub fn best_used_offer(product: &Product) -> Option<BestOffer> {
    let live = product
        .offers
        .iter()
        .filter_map(|offer| live_total(offer).map(|total| (total, offer)))
        .min_by_key(|(total, _)| *total);

    let stats = product.stats.as_ref().and_then(|stats| {
        let used = stats
            .used_price()
            .map(|price| (price, PriceSource::StatsUsed));
        let buy_box = stats
            .buy_box_used_price
            .filter(|price| *price > 0)
            .map(|price| (price, PriceSource::StatsBuyBoxUsed));
        match (used, buy_box) {
            (Some(u), Some(b)) if b.0 < u.0 => Some(b),
            (Some(u), _) => Some(u),
            (None, b) => b,
        }
    });

    let best = match (live, stats) {
        (Some((total, offer)), Some((stats_price, _))) if total <= stats_price => {
            Some(live_offer(total, offer))
        }
        (Some((total, offer)), None) => Some(live_offer(total, offer)),
        (_, Some((price, source))) => Some(BestOffer {
            price_cents: price,
            seller_id: None,
            source,
        }),
        (None, None) => None,
    };
    debug!(
        target = "ingest.keepa",
        asin = %product.asin,
        price_cents = best.as_ref().map(|b| b.price_cents),
        "best used offer resolved"
    );
    best
}

fn live_offer(total: i64, offer: &Offer) -> BestOffer {
    BestOffer {
        price_cents: total,
        seller_id: offer.seller_id.clone(),
        source: PriceSource::LiveOffer,
    }
}

/// Wilson score lower bound (95%) of the seller's positive rating share.
pub fn seller_quality(seller: &Seller) -> Option<f64> {
    let total = seller.current_rating_count.filter(|count| *count > 0)? as f64;
    let share = seller.current_rating.unwrap_or(0).clamp(0, 100) as f64 / 100.0;
    let positive = (share * total).round();
    let p_hat = positive / total;
    let z = 1.96_f64;
    let z2 = z * z;
    let numerator = p_hat + z2 / (2.0 * total)
        - z * ((p_hat * (1.0 - p_hat) / total) + z2 / (4.0 * total * total)).sqrt();
    let score = numerator / (1.0 + z2 / total);
    score.is_finite().then_some(score)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keepa::models::{Condition, Stats};

    fn offer(seller: &str, condition: i64, csv: &[i64]) -> Offer {
        Offer {
            seller_id: Some(seller.to_string()),
            condition: Some(Condition::Code(condition)),
            offer_csv: csv.to_vec(),
            is_fba: None,
        }
    }

    fn product(offers: Vec<Offer>, stats: Option<Stats>) -> Product {
        Product {
            asin: "0316769487".into(),
            title: None,
            offers,
            stats,
        }
    }

    #[test]
    fn picks_cheapest_used_offer_skipping_new_and_warehouse() {
        let p = product(
            vec![
                offer("NEWGUY", 1, &[1, 100, 0]),
                offer(WAREHOUSE_SELLER_ID, 2, &[1, 200, 0]),
                offer("S1", 3, &[1, 900, 1000, 2, 800, -1]),
                offer("S2", 2, &[1, 700, 399]),
            ],
            None,
        );
        let best = best_used_offer(&p).unwrap();
        assert_eq!(best.price_cents, 800);
        assert_eq!(best.seller_id.as_deref(), Some("S1"));
        assert_eq!(best.source, PriceSource::LiveOffer);
    }

    #[test]
    fn cheaper_stats_price_has_no_seller() {
        let p = product(
            vec![offer("S1", 2, &[1, 1500, 0])],
            Some(Stats {
                current: vec![-1, -1, 1400],
                buy_box_used_price: Some(1300),
            }),
        );
        let best = best_used_offer(&p).unwrap();
        assert_eq!(best.price_cents, 1300);
        assert_eq!(best.seller_id, None);
        assert_eq!(best.source, PriceSource::StatsBuyBoxUsed);
    }

    #[test]
    fn offer_without_price_is_skipped_despite_shipping() {
        let p = product(
            vec![
                offer("S1", 2, &[1, NO_VALUE, 399]),
                offer("S2", 2, &[1, 0, 500]),
                offer("S3", 2, &[1, 900, 0]),
            ],
            None,
        );
        let best = best_used_offer(&p).unwrap();
        assert_eq!(best.price_cents, 900);
        assert_eq!(best.seller_id.as_deref(), Some("S3"));
    }

    #[test]
    fn short_csv_and_missing_condition_are_ignored() {
        let mut no_condition = offer("S3", 2, &[1, 500, 0]);
        no_condition.condition = None;
        let p = product(vec![offer("S1", 2, &[1, 500]), no_condition], None);
        assert_eq!(best_used_offer(&p), None);
    }

    #[test]
    fn quality_score_is_lower_bound() {
        let seller = Seller {
            seller_id: "S1".into(),
            seller_name: None,
            current_rating: Some(95),
            current_rating_count: Some(200),
        };
        let score = seller_quality(&seller).unwrap();
        assert!(score > 0.9 && score < 0.95);

        let fresh = Seller {
            current_rating_count: Some(0),
            ..seller
        };
        assert_eq!(seller_quality(&fresh), None);
    }
}
