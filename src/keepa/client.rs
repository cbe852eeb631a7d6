use super::config::{
    DEAL_URL, DOMAIN_ID, KEEPA_API_KEY, OFFERS_PER_PRODUCT, PRODUCT_URL, QUERY_PATH, SELLER_URL,
    STATS_DAYS,
};
use super::models::{Deal, DealEnvelope, Product, ProductEnvelope, Seller, SellerEnvelope};
use super::query::{load_selection, selection_for};
use crate::config::{ConfigError, MAX_PROVIDER_BATCH};
use crate::http::build_client;
use crate::ingest::provider::{CallError, MarketplaceApi, Reply};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{error, info, warn};

const ERROR_BODY_LIMIT: usize = 300;

#[derive(Debug, Clone)]
pub struct KeepaClient {
    http: Client,
    api_key: String,
    domain: u8,
    selection: Value,
}

impl KeepaClient {
    pub fn from_env() -> Result<Self, ConfigError> {
        if KEEPA_API_KEY.trim().is_empty() {
            return Err(ConfigError::Missing("KEEPA_API_KEY"));
        }
        Ok(Self {
            http: build_client(),
            api_key: KEEPA_API_KEY.trim().to_string(),
            domain: *DOMAIN_ID,
            selection: load_selection(QUERY_PATH.as_deref()),
        })
    }

    async fn execute<E: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        url: String,
    ) -> Result<E, CallError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| CallError::Transport(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| CallError::Transport(err.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            let tokens = BodyTokens::parse(&body);
            error!(
                target = "ingest.keepa",
                endpoint,
                reported_cost = tokens.consumed,
                tokens_left = tokens.left,
                "provider throttled request"
            );
            return Err(CallError::Throttled {
                reported_cost: tokens.consumed,
                tokens_left: tokens.left,
            });
        }
        if !status.is_success() {
            let tokens = BodyTokens::parse(&body);
            warn!(
                target = "ingest.keepa",
                endpoint,
                status = status.as_u16(),
                reported_cost = tokens.consumed,
                tokens_left = tokens.left,
                "provider returned error status"
            );
            return Err(CallError::Http {
                status: status.as_u16(),
                message: truncate(&body),
                reported_cost: tokens.consumed,
                tokens_left: tokens.left,
            });
        }
        serde_json::from_str(&body).map_err(|err| {
            let tokens = BodyTokens::parse(&body);
            CallError::Protocol {
                message: format!("{endpoint}: {err}"),
                reported_cost: tokens.consumed,
                tokens_left: tokens.left,
            }
        })
    }
}

impl MarketplaceApi for KeepaClient {
    async fn deal_page(&self, page: u32, sort_type: u32) -> Result<Reply<Vec<Deal>>, CallError> {
        let selection = selection_for(&self.selection, page, sort_type);
        let url = format!(
            "{}?key={}&selection={}",
            *DEAL_URL,
            urlencoding::encode(&self.api_key),
            urlencoding::encode(&selection)
        );
        let envelope: DealEnvelope = self.execute("deal", url).await?;
        let deals = envelope.deals.map(|list| list.dr).unwrap_or_default();
        info!(
            target = "ingest.keepa",
            page,
            deals = deals.len(),
            tokens_consumed = envelope.tokens_consumed,
            tokens_left = envelope.tokens_left,
            "deal page fetched"
        );
        Ok(Reply::new(deals, envelope.tokens_consumed, envelope.tokens_left))
    }

    async fn product_batch(&self, asins: Vec<String>) -> Result<Reply<Vec<Product>>, CallError> {
        if asins.is_empty() {
            return Err(CallError::Protocol {
                message: "empty asin list".into(),
                reported_cost: None,
                tokens_left: None,
            });
        }
        let days = *STATS_DAYS;
        let url = format!(
            "{}?key={}&domain={}&asin={}&stats={days}&days={days}&offers={}&rating=1&history=0&only_live_offers=1",
            *PRODUCT_URL,
            urlencoding::encode(&self.api_key),
            self.domain,
            urlencoding::encode(&asins.join(",")),
            *OFFERS_PER_PRODUCT,
        );
        let envelope: ProductEnvelope = self.execute("product", url).await?;
        let Some(products) = envelope.products else {
            return Err(CallError::Protocol {
                message: "product response has no products field".into(),
                reported_cost: envelope.tokens_consumed,
                tokens_left: envelope.tokens_left,
            });
        };
        info!(
            target = "ingest.keepa",
            requested = asins.len(),
            returned = products.len(),
            tokens_consumed = envelope.tokens_consumed,
            tokens_left = envelope.tokens_left,
            "product batch fetched"
        );
        Ok(Reply::new(products, envelope.tokens_consumed, envelope.tokens_left))
    }

    async fn seller_batch(&self, seller_ids: Vec<String>) -> Result<Reply<Vec<Seller>>, CallError> {
        if seller_ids.is_empty() || seller_ids.len() > MAX_PROVIDER_BATCH {
            return Err(CallError::Protocol {
                message: format!(
                    "seller batch size {} outside 1..={MAX_PROVIDER_BATCH}",
                    seller_ids.len()
                ),
                reported_cost: None,
                tokens_left: None,
            });
        }
        let url = format!(
            "{}?key={}&domain={}&seller={}",
            *SELLER_URL,
            urlencoding::encode(&self.api_key),
            self.domain,
            urlencoding::encode(&seller_ids.join(",")),
        );
        let envelope: SellerEnvelope = self.execute("seller", url).await?;
        let Some(sellers) = envelope.sellers else {
            return Err(CallError::Protocol {
                message: "seller response has no sellers field".into(),
                reported_cost: envelope.tokens_consumed,
                tokens_left: envelope.tokens_left,
            });
        };
        let sellers = sellers
            .into_iter()
            .map(|(id, mut seller)| {
                if seller.seller_id.is_empty() {
                    seller.seller_id = id;
                }
                seller
            })
            .collect::<Vec<_>>();
        info!(
            target = "ingest.keepa",
            requested = seller_ids.len(),
            returned = sellers.len(),
            tokens_consumed = envelope.tokens_consumed,
            tokens_left = envelope.tokens_left,
            "seller batch fetched"
        );
        Ok(Reply::new(sellers, envelope.tokens_consumed, envelope.tokens_left))
    }
}

/// Token counters from any JSON body, including error bodies.
#[derive(Debug, Default, PartialEq)]
struct BodyTokens {
    consumed: Option<f64>,
    left: Option<f64>,
}

impl BodyTokens {
    fn parse(body: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(body) else {
            return Self::default();
        };
        let field = |name: &str| value.get(name).and_then(Value::as_f64);
        Self {
            consumed: field("tokensConsumed"),
            left: field("tokensLeft"),
        }
    }
}

fn truncate(body: &str) -> String {
    if body.len() <= ERROR_BODY_LIMIT {
        return body.to_string();
    }
    let mut end = ERROR_BODY_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
