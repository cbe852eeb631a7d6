pub mod client;
pub mod config;
pub mod models;
pub mod offers;
pub mod query;

pub use client::KeepaClient;

/// ASINs are exactly ten ASCII letters or digits.
pub fn validate_asin(asin: &str) -> bool {
    asin.len() == 10 && asin.bytes().all(|b| b.is_ascii_alphanumeric())
}
