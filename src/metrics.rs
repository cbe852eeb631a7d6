use tracing::trace;

// Lightweight trace-based metric events. No metrics macros here so the
// dependency set stays small.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "ingest.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "ingest.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}

pub fn calls_total(endpoint: &'static str, outcome: &'static str) {
    trace!(
        target = "ingest.metrics",
        endpoint = endpoint,
        outcome = outcome,
        "provider_calls_total_inc"
    );
}

pub fn tokens_settled(cost: f64, balance: f64) {
    trace!(
        target = "ingest.metrics",
        cost = cost,
        balance = balance,
        "tokens_settled"
    );
}

pub fn throttled(endpoint: &'static str) {
    trace!(
        target = "ingest.metrics",
        endpoint = endpoint,
        "throttled_total_inc"
    );
}

pub fn placeholders(kind: &'static str, count: usize) {
    trace!(
        target = "ingest.metrics",
        kind = kind,
        count = count as u64,
        "placeholders_total_add"
    );
}
