use serde_json::{Value, json};
use tracing::{debug, warn};

/// Built-in deal selection used when no query file is configured or the file
/// is unusable.
pub fn fallback_selection() -> Value {
    json!({
        "page": 0,
        "domainId": "1",
        "excludeCategories": [],
        "includeCategories": [283155],
        "priceTypes": [2],
        "deltaRange": [1950, 9900],
        "deltaPercentRange": [50, 2147483647_i64],
        "salesRankRange": [50000, 1500000],
        "currentRange": [2000, 30100],
        "minRating": 10,
        "isLowest": false,
        "isLowest90": false,
        "isLowestOffer": false,
        "isOutOfStock": false,
        "titleSearch": "",
        "isRangeEnabled": true,
        "isFilterEnabled": true,
        "filterErotic": false,
        "singleVariation": true,
        "hasReviews": false,
        "isPrimeExclusive": false,
        "mustHaveAmazonOffer": false,
        "mustNotHaveAmazonOffer": false,
        "sortType": 4,
        "dateRange": 3,
        "warehouseConditions": [2, 3, 4, 5]
    })
}

/// Reads the selection from `path` (JSON or YAML object). Anything else falls
/// back to the built-in query.
pub fn load_selection(path: Option<&str>) -> Value {
    let Some(path) = path else {
        return fallback_selection();
    };
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(target = "ingest.keepa", path, error = %err, "deal query file unreadable; using fallback query");
            return fallback_selection();
        }
    };
    parse_selection(&raw).unwrap_or_else(|| {
        warn!(target = "ingest.keepa", path, "deal query file invalid; using fallback query");
        fallback_selection()
    })
}

pub fn parse_selection(raw: &str) -> Option<Value> {
    let value: Value = serde_yaml::from_str(raw).ok()?;
    value.is_object().then_some(value)
}

/// Compact JSON for one page request. Page and sort order always come from the
/// caller; keys are emitted in sorted order.
pub fn selection_for(base: &Value, page: u32, sort_type: u32) -> String {
    let mut selection = if base.is_object() {
        base.clone()
    } else {
        fallback_selection()
    };
    if let Some(map) = selection.as_object_mut() {
        map.insert("page".to_string(), json!(page));
        map.insert("sortType".to_string(), json!(sort_type));
    }
    let encoded = sorted(&selection).to_string();
    debug!(target = "ingest.keepa", page, sort_type, bytes = encoded.len(), "deal selection built");
    encoded
}

fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::with_capacity(map.len());
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
