use serde::Serialize;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Paging,
    Preflight,
    FetchingDetails,
    FetchingSellers,
    Persisting,
    Done,
}

impl RunPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => RunPhase::Paging,
            2 => RunPhase::Preflight,
            3 => RunPhase::FetchingDetails,
            4 => RunPhase::FetchingSellers,
            5 => RunPhase::Persisting,
            6 => RunPhase::Done,
            _ => RunPhase::Idle,
        }
    }
}

/// Counters a status poller can read while the worker runs.
#[derive(Debug, Default)]
pub struct RunProgress {
    phase: AtomicU8,
    items_paged: AtomicU64,
    pages: AtomicU64,
    items_fetched: AtomicU64,
    batches_done: AtomicU64,
    batches_total: AtomicU64,
    placeholders: AtomicU64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub phase: RunPhase,
    pub pages: u64,
    pub items_paged: u64,
    pub items_fetched: u64,
    pub batches_done: u64,
    pub batches_total: u64,
    pub placeholders: u64,
}

impl RunProgress {
    pub fn set_phase(&self, phase: RunPhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn page_collected(&self, items: usize) {
        self.pages.fetch_add(1, Ordering::Relaxed);
        self.items_paged.fetch_add(items as u64, Ordering::Relaxed);
    }

    pub fn add_batches(&self, count: usize) {
        self.batches_total.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn batch_done(&self, fetched: usize, placeholders: usize) {
        self.batches_done.fetch_add(1, Ordering::Relaxed);
        self.items_fetched.fetch_add(fetched as u64, Ordering::Relaxed);
        self.placeholders.fetch_add(placeholders as u64, Ordering::Relaxed);
    }

    pub fn add_placeholders(&self, count: usize) {
        self.placeholders.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: RunPhase::from_u8(self.phase.load(Ordering::Relaxed)),
            pages: self.pages.load(Ordering::Relaxed),
            items_paged: self.items_paged.load(Ordering::Relaxed),
            items_fetched: self.items_fetched.load(Ordering::Relaxed),
            batches_done: self.batches_done.load(Ordering::Relaxed),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            placeholders: self.placeholders.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() {
        let progress = RunProgress::default();
        assert_eq!(progress.snapshot().phase, RunPhase::Idle);
        progress.set_phase(RunPhase::FetchingDetails);
        progress.page_collected(50);
        progress.page_collected(20);
        progress.add_batches(1);
        progress.batch_done(68, 2);
        let snap = progress.snapshot();
        assert_eq!(snap.phase, RunPhase::FetchingDetails);
        assert_eq!(snap.pages, 2);
        assert_eq!(snap.items_paged, 70);
        assert_eq!(snap.items_fetched, 68);
        assert_eq!(snap.placeholders, 2);
        assert_eq!(snap.batches_done, 1);
    }
}
