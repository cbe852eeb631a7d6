use serde::Serialize;
use std::{collections::HashMap, fmt};

/// One identifier scheduled for lookup, with the listing it came from and its
/// position in the paged list.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem<P> {
    pub identifier: String,
    pub payload: P,
    pub position: usize,
}

/// Contiguous slice of the valid work list. Batches partition it exactly.
#[derive(Debug)]
pub struct Batch<'a, P> {
    pub index: usize,
    pub items: &'a [WorkItem<P>],
}

impl<P> Batch<'_, P> {
    /// Identifiers to send, de-duplicated in first-seen order.
    pub fn request_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::with_capacity(self.items.len());
        for item in self.items {
            if !ids.contains(&item.identifier) {
                ids.push(item.identifier.clone());
            }
        }
        ids
    }
}

pub fn partition<P>(items: &[WorkItem<P>], max_size: usize) -> Vec<Batch<'_, P>> {
    items
        .chunks(max_size.max(1))
        .enumerate()
        .map(|(index, items)| Batch { index, items })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed identifier, never sent.
    Validation,
    /// Throttling signal persisted through every retry.
    Throttling,
    Transport,
    Protocol,
    /// Run was cancelled before the batch was attempted or finished.
    Cancelled,
    /// Slot never written by any stage.
    Unresolved,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Throttling => "throttling",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified result of one outbound batch call. `cost` is what was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<D> {
    Success {
        details: HashMap<String, D>,
        cost: f64,
    },
    Throttled {
        cost: f64,
    },
    Failure {
        kind: ErrorKind,
        message: String,
        cost: f64,
    },
}

impl<D> FetchOutcome<D> {
    pub fn cost(&self) -> f64 {
        match self {
            FetchOutcome::Success { cost, .. }
            | FetchOutcome::Throttled { cost }
            | FetchOutcome::Failure { cost, .. } => *cost,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success { .. } => "success",
            FetchOutcome::Throttled { .. } => "throttled",
            FetchOutcome::Failure { .. } => "failure",
        }
    }
}

/// One entry per requested identifier, in original order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutputRecord<D> {
    Fetched {
        identifier: String,
        detail: D,
    },
    Placeholder {
        identifier: String,
        kind: ErrorKind,
        message: String,
    },
}

impl<D> OutputRecord<D> {
    pub fn identifier(&self) -> &str {
        match self {
            OutputRecord::Fetched { identifier, .. } | OutputRecord::Placeholder { identifier, .. } => {
                identifier
            }
        }
    }

    pub fn detail(&self) -> Option<&D> {
        match self {
            OutputRecord::Fetched { detail, .. } => Some(detail),
            OutputRecord::Placeholder { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            OutputRecord::Fetched { .. } => None,
            OutputRecord::Placeholder { kind, .. } => Some(*kind),
        }
    }
}
