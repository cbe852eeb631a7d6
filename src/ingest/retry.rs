use super::cancel::CancelFlag;
use super::fetcher::BatchDetailFetcher;
use super::provider::{CallError, Keyed, Reply};
use super::types::{ErrorKind, FetchOutcome};
use crate::config::IngestConfig;
use crate::quota::{QuotaGovernor, clock::Clock};
use serde::Serialize;
use std::{collections::HashMap, future::Future, time::Duration};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts is one more.
    pub max_retries: u32,
    /// Pause before retry n is `throttle_pauses[n - 1]`, repeating the last entry.
    pub throttle_pauses: Vec<Duration>,
    pub failure_pause: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            max_retries: config.max_throttle_retries,
            throttle_pauses: config.throttle_pauses(),
            failure_pause: config.failure_pause(),
        }
    }

    pub fn throttle_pause(&self, retry: u32) -> Duration {
        let index = retry.saturating_sub(1) as usize;
        self.throttle_pauses
            .get(index)
            .or_else(|| self.throttle_pauses.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Pending,
    InFlight,
    ThrottledRetry,
    Succeeded,
    ThrottledExhausted,
    FailedNonRetryable,
    Cancelled,
}

impl BatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchState::Pending => "pending",
            BatchState::InFlight => "in_flight",
            BatchState::ThrottledRetry => "throttled_retry",
            BatchState::Succeeded => "succeeded",
            BatchState::ThrottledExhausted => "throttled_exhausted",
            BatchState::FailedNonRetryable => "failed_non_retryable",
            BatchState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchState::Succeeded
                | BatchState::ThrottledExhausted
                | BatchState::FailedNonRetryable
                | BatchState::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Sleep, refill, then attempt the same batch again.
    Retry { pause: Duration },
    /// The batch is finished; sleep `pause` (if any) before the next one.
    Resolve { pause: Option<Duration> },
}

/// Per-batch state machine. Pure: it only decides, the driver sleeps.
#[derive(Debug, Clone)]
pub struct RetryBackoffController {
    policy: RetryPolicy,
    state: BatchState,
    attempts: u32,
    retries: u32,
}

impl RetryBackoffController {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: BatchState::Pending,
            attempts: 0,
            retries: 0,
        }
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn begin_attempt(&mut self) {
        self.state = BatchState::InFlight;
        self.attempts += 1;
    }

    pub fn observe<D>(&mut self, outcome: &FetchOutcome<D>) -> Decision {
        match outcome {
            FetchOutcome::Success { .. } => {
                self.state = BatchState::Succeeded;
                Decision::Resolve { pause: None }
            }
            FetchOutcome::Throttled { .. } if self.retries < self.policy.max_retries => {
                self.retries += 1;
                self.state = BatchState::ThrottledRetry;
                Decision::Retry {
                    pause: self.policy.throttle_pause(self.retries),
                }
            }
            FetchOutcome::Throttled { .. } => {
                self.state = BatchState::ThrottledExhausted;
                Decision::Resolve { pause: None }
            }
            FetchOutcome::Failure { .. } => {
                self.state = BatchState::FailedNonRetryable;
                Decision::Resolve {
                    pause: Some(self.policy.failure_pause),
                }
            }
        }
    }

    pub fn cancel(&mut self) {
        self.state = BatchState::Cancelled;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult<D> {
    Details(HashMap<String, D>),
    Abandoned { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchResolution<D> {
    pub state: BatchState,
    pub attempts: u32,
    pub pauses: Vec<Duration>,
    pub settled: f64,
    pub result: BatchResult<D>,
}

/// Sleeps unless cancellation arrives first. Returns false when cancelled.
async fn pause(clock: &dyn Clock, duration: Duration, cancel: &CancelFlag) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = clock.sleep(duration) => true,
    }
}

/// Drives one batch through the controller until it reaches a terminal state.
pub async fn resolve_batch<D, F, Fut>(
    governor: &mut QuotaGovernor,
    fetcher: &BatchDetailFetcher,
    policy: &RetryPolicy,
    cancel: &CancelFlag,
    identifiers: &[String],
    mut call: F,
) -> BatchResolution<D>
where
    D: Keyed,
    F: FnMut(Vec<String>) -> Fut,
    Fut: Future<Output = Result<Reply<Vec<D>>, CallError>>,
{
    let clock = governor.clock();
    let mut controller = RetryBackoffController::new(policy.clone());
    let mut pauses = Vec::new();
    let mut settled = 0.0;

    loop {
        if cancel.is_cancelled() {
            controller.cancel();
            return BatchResolution {
                state: controller.state(),
                attempts: controller.attempts(),
                pauses,
                settled,
                result: BatchResult::Abandoned {
                    kind: ErrorKind::Cancelled,
                    message: "run cancelled before batch completed".into(),
                },
            };
        }

        controller.begin_attempt();
        let outcome = fetcher.fetch(governor, identifiers, &mut call).await;
        settled += outcome.cost();

        match controller.observe(&outcome) {
            Decision::Retry { pause: wait } => {
                warn!(
                    target = "ingest.retry",
                    endpoint = fetcher.endpoint,
                    attempt = controller.attempts(),
                    pause_secs = wait.as_secs(),
                    "batch throttled; backing off before retry"
                );
                crate::metrics::throttled(fetcher.endpoint);
                pauses.push(wait);
                if !pause(clock.as_ref(), wait, cancel).await {
                    continue;
                }
                governor.ledger_mut().refill();
            }
            Decision::Resolve { pause: wait } => {
                let state = controller.state();
                debug_assert!(state.is_terminal());
                let result = match outcome {
                    FetchOutcome::Success { details, .. } => BatchResult::Details(details),
                    FetchOutcome::Throttled { .. } => BatchResult::Abandoned {
                        kind: ErrorKind::Throttling,
                        message: format!(
                            "throttled on all {} attempts",
                            controller.attempts()
                        ),
                    },
                    FetchOutcome::Failure { kind, message, .. } => {
                        BatchResult::Abandoned { kind, message }
                    }
                };
                if let Some(wait) = wait {
                    info!(
                        target = "ingest.retry",
                        endpoint = fetcher.endpoint,
                        pause_secs = wait.as_secs(),
                        "batch failed; pausing before next batch"
                    );
                    pauses.push(wait);
                    pause(clock.as_ref(), wait, cancel).await;
                }
                info!(
                    target = "ingest.retry",
                    endpoint = fetcher.endpoint,
                    state = ?state,
                    attempts = controller.attempts(),
                    settled,
                    "batch resolved"
                );
                return BatchResolution {
                    state,
                    attempts: controller.attempts(),
                    pauses,
                    settled,
                    result,
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fetcher::CostModel;
    use crate::ingest::testing::{Echo, governor};
    use std::collections::VecDeque;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("B{i:09}")).collect()
    }

    fn throttled() -> Result<Reply<Vec<Echo>>, CallError> {
        Err(CallError::Throttled {
            reported_cost: Some(5.0),
            tokens_left: None,
        })
    }

    #[test]
    fn controller_transitions() {
        let mut controller = RetryBackoffController::new(RetryPolicy::default());
        assert_eq!(controller.state(), BatchState::Pending);

        let throttled: FetchOutcome<Echo> = FetchOutcome::Throttled { cost: 0.0 };
        controller.begin_attempt();
        assert_eq!(
            controller.observe(&throttled),
            Decision::Retry {
                pause: Duration::from_secs(900)
            }
        );
        assert_eq!(controller.state(), BatchState::ThrottledRetry);
        controller.begin_attempt();
        assert_eq!(
            controller.observe(&throttled),
            Decision::Retry {
                pause: Duration::from_secs(1800)
            }
        );
        controller.begin_attempt();
        assert_eq!(controller.observe(&throttled), Decision::Resolve { pause: None });
        assert_eq!(controller.state(), BatchState::ThrottledExhausted);
        assert!(controller.state().is_terminal());
        assert_eq!(controller.attempts(), 3);
    }

    #[test]
    fn failure_is_not_retried() {
        let mut controller = RetryBackoffController::new(RetryPolicy::default());
        controller.begin_attempt();
        let failure: FetchOutcome<Echo> = FetchOutcome::Failure {
            kind: ErrorKind::Protocol,
            message: "schema drift".into(),
            cost: 0.0,
        };
        assert_eq!(
            controller.observe(&failure),
            Decision::Resolve {
                pause: Some(Duration::from_secs(5))
            }
        );
        assert_eq!(controller.state(), BatchState::FailedNonRetryable);
    }

    #[tokio::test]
    async fn throttled_twice_then_success() {
        let (mut gov, clock) = governor(IngestConfig::default());
        let fetcher = BatchDetailFetcher::new("product", CostModel::PerItem(1.0));
        let mut script: VecDeque<Result<Reply<Vec<Echo>>, CallError>> =
            VecDeque::from(vec![throttled(), throttled()]);
        let batch = ids(5);
        let resolution = resolve_batch(
            &mut gov,
            &fetcher,
            &RetryPolicy::default(),
            &CancelFlag::new(),
            &batch,
            |ids: Vec<String>| {
                let next = script.pop_front().unwrap_or_else(|| {
                    Ok(Reply::new(ids.into_iter().map(Echo).collect(), Some(5.0), None))
                });
                async move { next }
            },
        )
        .await;

        assert_eq!(resolution.state, BatchState::Succeeded);
        assert_eq!(resolution.attempts, 3);
        assert_eq!(
            resolution.pauses,
            vec![Duration::from_secs(900), Duration::from_secs(1800)]
        );
        assert_eq!(gov.ledger().call_record().settled_calls, 3);
        assert_eq!(resolution.settled, 15.0);
        match resolution.result {
            BatchResult::Details(details) => assert_eq!(details.len(), 5),
            other => panic!("expected details, got {other:?}"),
        }
        let slept = clock.sleeps();
        assert!(slept.contains(&Duration::from_secs(900)));
        assert!(slept.contains(&Duration::from_secs(1800)));
    }

    #[tokio::test]
    async fn always_throttled_gives_up_after_three_attempts() {
        let (mut gov, _clock) = governor(IngestConfig::default());
        let fetcher = BatchDetailFetcher::new("product", CostModel::PerItem(1.0));
        let mut calls = 0;
        let batch = ids(4);
        let resolution = resolve_batch(
            &mut gov,
            &fetcher,
            &RetryPolicy::default(),
            &CancelFlag::new(),
            &batch,
            |_ids: Vec<String>| {
                calls += 1;
                async { throttled() }
            },
        )
        .await;
        assert_eq!(calls, 3);
        assert_eq!(resolution.state, BatchState::ThrottledExhausted);
        assert!(matches!(
            resolution.result,
            BatchResult::Abandoned {
                kind: ErrorKind::Throttling,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn cancellation_during_backoff_abandons_batch() {
        let (mut gov, _clock) = governor(IngestConfig::default());
        let fetcher = BatchDetailFetcher::new("product", CostModel::PerItem(1.0));
        let cancel = CancelFlag::new();
        let mut calls = 0;
        let batch = ids(2);
        let resolution = resolve_batch(
            &mut gov,
            &fetcher,
            &RetryPolicy::default(),
            &cancel,
            &batch,
            |_ids: Vec<String>| {
                calls += 1;
                cancel.cancel();
                async { throttled() }
            },
        )
        .await;
        assert_eq!(calls, 1);
        assert_eq!(resolution.state, BatchState::Cancelled);
        assert_eq!(gov.ledger().call_record().settled_calls, 1);
    }
}
