//! Results of write operations.

use bson::Bson;

use crate::error::ItemFailure;

/// Result of `insert_one`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneOutcome {
    /// The `_id` of the inserted document, as assigned by the caller or the driver.
    pub inserted_id: Bson,
}

/// Result of `update_one` / `update_many`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Documents matching the filter.
    pub matched: u64,
    /// Documents actually changed.
    pub modified: u64,
    /// `_id` of the document inserted by an upsert.
    pub upserted_id: Option<Bson>,
}

/// Result of `delete_one` / `delete_many`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub deleted: u64,
}

/// Per-item outcomes of a bulk insert.
///
/// Outcomes are ordered by the position of the document in the request. Every item is
/// attempted, so a failure in one position says nothing about the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkWriteReport {
    pub outcomes: Vec<Result<Bson, ItemFailure>>,
}

impl BulkWriteReport {
    pub fn new(outcomes: Vec<Result<Bson, ItemFailure>>) -> Self {
        Self { outcomes }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// True when every item was written.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(Result::is_ok)
    }

    /// `(index, id)` of every written item.
    pub fn inserted_ids(&self) -> impl Iterator<Item = (usize, &Bson)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| outcome.as_ref().ok().map(|id| (index, id)))
    }

    /// `(index, failure)` of every rejected item.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &ItemFailure)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| outcome.as_ref().err().map(|failure| (index, failure)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_splits_successes_and_failures_by_index() {
        let report = BulkWriteReport::new(vec![
            Ok(Bson::Int32(1)),
            Err(ItemFailure { code: Some(11000), message: "duplicate".into() }),
            Ok(Bson::Int32(3)),
        ]);

        assert!(!report.is_complete());
        assert_eq!(report.inserted_ids().map(|(i, _)| i).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(report.failures().map(|(i, _)| i).collect::<Vec<_>>(), vec![1]);
    }
}
