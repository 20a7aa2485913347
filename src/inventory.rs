//! Reconciliation of request records into a deduplicated client inventory.
//!
//! The [`Inventory`] keeps exactly one [`RequestRecord`] per
//! [composite key](RequestRecord::composite_key): the most recent one. Records are compared by
//! their broker timestamp, so the final content depends only on the set of merged records and
//! not on the order in which files were processed.
//!
//! Records with the exact same timestamp are resolved by their provenance: the record from the
//! greater `(source_file, line_number)` wins. This keeps the result deterministic even when the
//! log source enumerates files in an arbitrary order.
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use itertools::Itertools;

use crate::trace::RequestRecord;

/// Result of merging a single record into the [`Inventory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First record seen for its key
    Inserted,
    /// The record superseded an older one
    Replaced,
    /// An equally recent or newer record was already present
    Kept,
}

impl MergeOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Replaced => "replaced",
            Self::Kept => "kept",
        }
    }
}

/// Recency order of two records, with provenance as the tie-break.
fn recency(a: &RequestRecord, b: &RequestRecord) -> Ordering {
    a.timestamp()
        .cmp(&b.timestamp())
        .then_with(|| a.source_file().cmp(b.source_file()))
        .then_with(|| a.line_number().cmp(&b.line_number()))
}

/// Mapping of composite keys to the most recent request observed for each.
#[derive(Debug, Default)]
pub struct Inventory {
    entries: HashMap<String, RequestRecord>,
}

impl Inventory {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `record`, keeping it only if it is more recent than the stored entry for its key.
    pub fn merge(&mut self, record: RequestRecord) -> MergeOutcome {
        match self.entries.entry(record.composite_key().to_owned()) {
            Entry::Vacant(entry) => {
                entry.insert(record);
                MergeOutcome::Inserted
            }
            Entry::Occupied(mut entry) => {
                if recency(&record, entry.get()) == Ordering::Greater {
                    entry.insert(record);
                    MergeOutcome::Replaced
                } else {
                    MergeOutcome::Kept
                }
            }
        }
    }

    /// Merge every record of `records`.
    pub fn merge_all<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = RequestRecord>,
    {
        for record in records {
            self.merge(record);
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by composite key.
    pub fn rows(&self) -> impl Iterator<Item = &RequestRecord> {
        self.entries
            .iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, record)| record)
    }

    /// Consumes the inventory into its entries ordered by composite key.
    pub fn into_rows(self) -> Vec<RequestRecord> {
        self.entries
            .into_iter()
            .sorted_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, record)| record)
            .collect()
    }
}

/// Reconcile record streams (typically one per file) into a single [`Inventory`].
pub fn reconcile<S, R>(streams: S) -> Inventory
where
    S: IntoIterator<Item = R>,
    R: IntoIterator<Item = RequestRecord>,
{
    let mut inventory = Inventory::new();
    for records in streams {
        inventory.merge_all(records);
    }
    inventory
}
