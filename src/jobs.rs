use crate::{
    ingest::{
        cancel::CancelFlag,
        pipeline::Ingestor,
        progress::{ProgressSnapshot, RunProgress},
        provider::MarketplaceApi,
    },
    models::{ApiError, RunReport, RunRequest},
    quota::preflight::BudgetShortfall,
    sink::RecordSink,
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Runs are processed one at a time by a single worker that owns the
/// [`Ingestor`], so the quota ledger is never shared between tasks.
#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, RunState>>>,
    active: Arc<Mutex<Option<Arc<RunProgress>>>>,
    cancel: CancelFlag,
}

struct Job {
    id: Uuid,
    request: RunRequest,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Running {
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<ProgressSnapshot>,
    },
    Completed {
        report: Box<RunReport>,
    },
    Failed {
        error: String,
        stage: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        shortfall: Option<BudgetShortfall>,
    },
}

#[derive(Clone, Serialize)]
pub struct RunInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: RunState,
}

impl RunQueue {
    pub fn spawn<A, S>(mut ingestor: Ingestor<A, S>) -> (Self, JoinHandle<()>)
    where
        A: MarketplaceApi + 'static,
        S: RecordSink + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let active: Arc<Mutex<Option<Arc<RunProgress>>>> = Arc::new(Mutex::new(None));
        let cancel = CancelFlag::new();
        let statuses_bg = statuses.clone();
        let active_bg = active.clone();
        let cancel_bg = cancel.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let progress = Arc::new(RunProgress::default());
                cancel_bg.reset();
                *active_bg.lock().await = Some(progress.clone());
                statuses_bg
                    .lock()
                    .await
                    .insert(job.id, RunState::Running { progress: None });

                let result = ingestor
                    .run(job.id, &job.request, &progress, &cancel_bg)
                    .await;
                *active_bg.lock().await = None;

                let state = match result {
                    Ok(report) => RunState::Completed {
                        report: Box::new(report),
                    },
                    Err(err) => {
                        warn!(
                            target = "ingest.jobs",
                            run_id = %job.id,
                            stage = err.stage(),
                            "run failed: {err}"
                        );
                        RunState::Failed {
                            error: err.detail().to_string(),
                            stage: err.stage().to_string(),
                            shortfall: err.shortfall(),
                        }
                    }
                };
                statuses_bg.lock().await.insert(job.id, state);
            }
        });

        (
            Self {
                tx,
                statuses,
                active,
                cancel,
            },
            handle,
        )
    }

    pub async fn enqueue(&self, request: RunRequest) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        self.statuses.lock().await.insert(id, RunState::Queued);
        let job = Job { id, request };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        info!(target = "ingest.jobs", run_id = %id, "run queued");
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<RunInfo> {
        let state = self.statuses.lock().await.get(&id).cloned()?;
        let state = match state {
            RunState::Running { .. } => RunState::Running {
                progress: self.active.lock().await.as_ref().map(|p| p.snapshot()),
            },
            other => other,
        };
        Some(RunInfo {
            id: id.to_string(),
            state,
        })
    }

    /// Flags the active run for cancellation. Returns false when idle.
    pub async fn cancel_active(&self) -> bool {
        if self.active.lock().await.is_none() {
            return false;
        }
        self.cancel.cancel();
        info!(target = "ingest.jobs", "cancellation requested");
        true
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(16)
}
