use reqwest::Client;
use std::time::Duration;

/// Shared client for the provider and the store. Product batches with offers
/// can take well over a minute, hence the generous default.
pub fn build_client() -> Client {
    let timeout = std::env::var("HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(120);
    let connect = std::env::var("HTTP_CONNECT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(10);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .gzip(true)
        .build()
        .unwrap_or_else(|_| Client::new())
}
