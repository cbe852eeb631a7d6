use redis::AsyncCommands;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Maps an `Idempotency-Key` to the run it first enqueued. Redis when
/// configured, otherwise process memory.
#[derive(Clone)]
pub struct IdempotencyStore {
    redis: Option<redis::Client>,
    memory: Arc<Mutex<HashMap<String, Uuid>>>,
    ttl_secs: u64,
}

impl IdempotencyStore {
    pub fn from_env() -> Self {
        let redis = std::env::var("REDIS_URL")
            .ok()
            .and_then(|url| match redis::Client::open(url) {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!(target = "ingest.api", "invalid REDIS_URL; using memory: {err}");
                    None
                }
            });
        let ttl_secs = std::env::var("IDEMPOTENCY_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(86_400);
        Self {
            redis,
            memory: Arc::new(Mutex::new(HashMap::new())),
            ttl_secs,
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self {
            redis: None,
            memory: Arc::new(Mutex::new(HashMap::new())),
            ttl_secs: 60,
        }
    }

    pub async fn get(&self, key: &str) -> Option<Uuid> {
        match &self.redis {
            Some(client) => redis_get(client, key).await,
            None => self.memory.lock().await.get(key).copied(),
        }
    }

    pub async fn put(&self, key: &str, run_id: Uuid) {
        match &self.redis {
            Some(client) => redis_set(client, key, run_id, self.ttl_secs).await,
            None => {
                self.memory.lock().await.insert(key.to_string(), run_id);
            }
        }
    }
}

fn redis_key(key: &str) -> String {
    format!("ingest:idempotency:{key}")
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<Uuid> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(c) => c,
        Err(err) => {
            warn!(target = "ingest.api", "redis unavailable: {err}");
            return None;
        }
    };
    let stored: Option<String> = conn.get(redis_key(key)).await.ok();
    stored.and_then(|v| Uuid::parse_str(&v).ok())
}

async fn redis_set(client: &redis::Client, key: &str, run_id: Uuid, ttl_secs: u64) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
        let _: Result<(), _> = conn
            .set_ex(redis_key(key), run_id.to_string(), ttl_secs)
            .await;
    }
}
