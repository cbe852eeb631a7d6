use super::retry::BatchResult;
use super::types::{ErrorKind, OutputRecord, WorkItem};
use thiserror::Error;
use tracing::warn;

pub const MISSING_IN_BATCH_RESPONSE: &str = "missing_in_batch_response";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssembleError {
    #[error("slot {position} written twice")]
    AlreadyFilled { position: usize },
    #[error("slot {position} outside work list of {len}")]
    OutOfBounds { position: usize, len: usize },
}

/// Fixed-length output keyed by original position. Each slot is written once.
#[derive(Debug)]
pub struct ResultAssembler<D> {
    identifiers: Vec<String>,
    slots: Vec<Option<OutputRecord<D>>>,
}

impl<D: Clone> ResultAssembler<D> {
    pub fn new(identifiers: Vec<String>) -> Self {
        let slots = identifiers.iter().map(|_| None).collect();
        Self { identifiers, slots }
    }

    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn slot(&mut self, position: usize) -> Result<(&mut Option<OutputRecord<D>>, String), AssembleError> {
        let len = self.slots.len();
        let identifier = self
            .identifiers
            .get(position)
            .cloned()
            .ok_or(AssembleError::OutOfBounds { position, len })?;
        let slot = &mut self.slots[position];
        if slot.is_some() {
            return Err(AssembleError::AlreadyFilled { position });
        }
        Ok((slot, identifier))
    }

    pub fn fill_success(&mut self, position: usize, detail: D) -> Result<(), AssembleError> {
        let (slot, identifier) = self.slot(position)?;
        *slot = Some(OutputRecord::Fetched { identifier, detail });
        Ok(())
    }

    pub fn fill_placeholder(
        &mut self,
        position: usize,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<(), AssembleError> {
        let (slot, identifier) = self.slot(position)?;
        *slot = Some(OutputRecord::Placeholder {
            identifier,
            kind,
            message: message.into(),
        });
        Ok(())
    }

    /// Folds one resolved batch into its slots. Returns (fetched, placeholders).
    pub fn fill_batch<P>(
        &mut self,
        items: &[WorkItem<P>],
        result: &BatchResult<D>,
    ) -> Result<(usize, usize), AssembleError> {
        let mut fetched = 0;
        let mut placeholders = 0;
        for item in items {
            match result {
                BatchResult::Details(details) => match details.get(&item.identifier) {
                    Some(detail) => {
                        self.fill_success(item.position, detail.clone())?;
                        fetched += 1;
                    }
                    None => {
                        warn!(
                            target = "ingest.assemble",
                            identifier = %item.identifier,
                            "identifier missing from batch response"
                        );
                        self.fill_placeholder(item.position, ErrorKind::Protocol, MISSING_IN_BATCH_RESPONSE)?;
                        placeholders += 1;
                    }
                },
                BatchResult::Abandoned { kind, message } => {
                    self.fill_placeholder(item.position, *kind, message.clone())?;
                    placeholders += 1;
                }
            }
        }
        Ok((fetched, placeholders))
    }

    /// Closes the collection: any slot nobody wrote becomes `Unresolved`.
    pub fn finish(self) -> Vec<OutputRecord<D>> {
        self.slots
            .into_iter()
            .zip(self.identifiers)
            .map(|(slot, identifier)| {
                slot.unwrap_or(OutputRecord::Placeholder {
                    identifier,
                    kind: ErrorKind::Unresolved,
                    message: "no stage produced a result".into(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn work(ids: &[&str]) -> Vec<WorkItem<()>> {
        ids.iter()
            .enumerate()
            .map(|(position, id)| WorkItem {
                identifier: id.to_string(),
                payload: (),
                position,
            })
            .collect()
    }

    #[test]
    fn output_matches_input_length_and_order() {
        let ids = ["A", "B", "C", "D"];
        let items = work(&ids);
        let mut assembler: ResultAssembler<u32> =
            ResultAssembler::new(ids.iter().map(|s| s.to_string()).collect());
        assembler
            .fill_placeholder(1, ErrorKind::Validation, "invalid asin")
            .unwrap();
        let details = HashMap::from([("A".to_string(), 1), ("D".to_string(), 4)]);
        let batch = [items[0].clone(), items[2].clone(), items[3].clone()];
        let (fetched, placeholders) = assembler
            .fill_batch(&batch, &BatchResult::Details(details))
            .unwrap();
        assert_eq!((fetched, placeholders), (2, 1));

        let output = assembler.finish();
        let got: Vec<&str> = output.iter().map(|r| r.identifier()).collect();
        assert_eq!(got, ids);
        assert_eq!(output[0].detail(), Some(&1));
        assert_eq!(output[1].error_kind(), Some(ErrorKind::Validation));
        assert_eq!(output[2].error_kind(), Some(ErrorKind::Protocol));
        assert_eq!(output[3].detail(), Some(&4));
    }

    #[test]
    fn unwritten_slots_become_unresolved() {
        let assembler: ResultAssembler<u32> = ResultAssembler::new(vec!["A".into(), "B".into()]);
        let output = assembler.finish();
        assert_eq!(output.len(), 2);
        assert!(output.iter().all(|r| r.error_kind() == Some(ErrorKind::Unresolved)));
    }

    #[test]
    fn slots_are_written_once() {
        let mut assembler: ResultAssembler<u32> = ResultAssembler::new(vec!["A".into()]);
        assembler.fill_success(0, 7).unwrap();
        assert_eq!(
            assembler.fill_success(0, 8),
            Err(AssembleError::AlreadyFilled { position: 0 })
        );
        assert_eq!(
            assembler.fill_placeholder(3, ErrorKind::Transport, "x"),
            Err(AssembleError::OutOfBounds { position: 3, len: 1 })
        );
    }

    #[test]
    fn abandoned_batch_fills_every_item() {
        let items = work(&["A", "B", "C"]);
        let mut assembler: ResultAssembler<u32> =
            ResultAssembler::new(vec!["A".into(), "B".into(), "C".into()]);
        let result = BatchResult::Abandoned {
            kind: ErrorKind::Throttling,
            message: "throttled on all 3 attempts".into(),
        };
        assert_eq!(assembler.fill_batch(&items, &result).unwrap(), (0, 3));
        assert_eq!(assembler.filled(), 3);
    }
}
