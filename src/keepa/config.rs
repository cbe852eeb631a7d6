use once_cell::sync::Lazy;
use std::env;

pub static KEEPA_API_KEY: Lazy<String> =
    Lazy::new(|| env::var("KEEPA_API_KEY").unwrap_or_default());

pub static ROOT: Lazy<String> = Lazy::new(|| {
    env::var("KEEPA_API_ROOT")
        .ok()
        .map(|root| root.trim_end_matches('/').to_string())
        .filter(|root| !root.is_empty())
        .unwrap_or_else(|| "https://api.keepa.com".to_string())
});

/// Marketplace domain id; 1 is amazon.com.
pub static DOMAIN_ID: Lazy<u8> = Lazy::new(|| {
    env::var("KEEPA_DOMAIN_ID")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(1)
});

/// Days of history requested with each product (`stats` and `days` params).
pub static STATS_DAYS: Lazy<u32> = Lazy::new(|| {
    env::var("KEEPA_STATS_DAYS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(365)
});

pub static OFFERS_PER_PRODUCT: Lazy<u32> = Lazy::new(|| {
    env::var("KEEPA_OFFERS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| (20..=100).contains(v))
        .unwrap_or(20)
});

pub static QUERY_PATH: Lazy<Option<String>> = Lazy::new(|| {
    env::var("KEEPA_QUERY_PATH")
        .ok()
        .filter(|path| !path.trim().is_empty())
});

pub static DEAL_URL: Lazy<String> = Lazy::new(|| format!("{}/deal", *ROOT));
pub static PRODUCT_URL: Lazy<String> = Lazy::new(|| format!("{}/product", *ROOT));
pub static SELLER_URL: Lazy<String> = Lazy::new(|| format!("{}/seller", *ROOT));
