use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc};
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, CallerRecord>>,
}

/// Who triggered a request; attached to the request extensions.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub caller: String,
    pub api_key_id: String,
}

#[derive(Clone)]
struct CallerRecord {
    caller: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let raw = env::var("INGEST_API_KEYS").unwrap_or_default();
        Self {
            records: Arc::new(parse_keys(&raw)),
        }
    }

    #[cfg(test)]
    pub fn with_keys(raw: &str) -> Self {
        Self {
            records: Arc::new(parse_keys(raw)),
        }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            caller: record.caller.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        return Ok(unauthorized_response(
            "missing_api_key",
            "Provide X-Ingest-Key or Bearer token",
        ));
    };

    let Some(context) = state.authenticate(&presented) else {
        return Ok(unauthorized_response("invalid_api_key", "Key not recognized"));
    };

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Ingest-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

/// Parses `caller:secret` pairs separated by commas.
fn parse_keys(raw: &str) -> HashMap<String, CallerRecord> {
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let caller = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (caller, key) {
            (Some(caller), Some(secret)) => {
                entries.insert(
                    secret.to_string(),
                    CallerRecord {
                        caller: caller.to_string(),
                        api_key_id: format!("key-{:02}", idx + 1),
                    },
                );
            }
            _ => warn!(
                target = "ingest.api",
                entry = idx + 1,
                "ignored malformed INGEST_API_KEYS entry"
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "ingest.api",
            "INGEST_API_KEYS produced no keys; run triggers will be refused"
        );
    } else {
        info!(
            target = "ingest.api",
            key_count = entries.len(),
            "loaded API keys"
        );
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_skips_malformed() {
        let state = AuthState::with_keys("scheduler:s3cret, broken, ops:other");
        let ctx = state.authenticate("s3cret").unwrap();
        assert_eq!(ctx.caller, "scheduler");
        assert_eq!(ctx.api_key_id, "key-01");
        assert_eq!(state.authenticate("other").unwrap().api_key_id, "key-03");
        assert!(state.authenticate("broken").is_none());
    }

    #[test]
    fn bearer_and_header_forms() {
        let mut headers = http::HeaderMap::new();
        headers.insert("X-Ingest-Key", "abc".parse().unwrap());
        assert_eq!(extract_api_key(&headers).as_deref(), Some("abc"));
        headers.insert(http::header::AUTHORIZATION, "Bearer xyz".parse().unwrap());
        assert_eq!(extract_api_key(&headers).as_deref(), Some("xyz"));
    }
}
