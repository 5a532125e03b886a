// crates/examflow-core/src/runtime/pending.rs
// ============================================================================
// Module: Examflow Pending Responses
// Description: Buffer for responses awaiting simultaneous submission.
// Purpose: Hold per-occurrence responses until the test part is left.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Under simultaneous submission, ending an attempt stages the bound
//! responses instead of scoring them. The buffer keeps one staging per item
//! occurrence, later stagings replace earlier ones, and leaving the test part
//! drains the buffer in route order so scoring runs in the order items were
//! selected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ItemId;
use crate::core::identifiers::VariableId;
use crate::core::value::Value;

// ============================================================================
// SECTION: Pending Buffer
// ============================================================================

/// Staged responses keyed by item occurrence.
///
/// # Invariants
/// - At most one staging per occurrence; restaging replaces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<PendingRecord>", into = "Vec<PendingRecord>")]
pub struct PendingResponseBuffer {
    /// Staged responses per item occurrence.
    entries: BTreeMap<(ItemId, u32), Vec<(VariableId, Value)>>,
}

/// Serialized form of one staged response set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRecord {
    /// Item identifier.
    pub item_id: ItemId,
    /// Occurrence index.
    pub occurrence: u32,
    /// Staged responses.
    pub responses: Vec<(VariableId, Value)>,
}

impl From<Vec<PendingRecord>> for PendingResponseBuffer {
    fn from(records: Vec<PendingRecord>) -> Self {
        let mut buffer = Self::new();
        for record in records {
            buffer.stage(record.item_id, record.occurrence, record.responses);
        }
        buffer
    }
}

impl From<PendingResponseBuffer> for Vec<PendingRecord> {
    fn from(buffer: PendingResponseBuffer) -> Self {
        buffer
            .entries
            .into_iter()
            .map(|((item_id, occurrence), responses)| PendingRecord {
                item_id,
                occurrence,
                responses,
            })
            .collect()
    }
}

impl PendingResponseBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages responses for an occurrence, replacing any earlier staging.
    pub fn stage(
        &mut self,
        item_id: ItemId,
        occurrence: u32,
        responses: Vec<(VariableId, Value)>,
    ) {
        self.entries.insert((item_id, occurrence), responses);
    }

    /// Returns true when an occurrence has a staging.
    #[must_use]
    pub fn contains(&self, item_id: &ItemId, occurrence: u32) -> bool {
        self.entries.contains_key(&(item_id.clone(), occurrence))
    }

    /// Returns the number of staged occurrences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drains stagings in the supplied occurrence order.
    ///
    /// Occurrences absent from `order` remain staged; the session drains per
    /// test part, so stagings never leak across parts in practice.
    pub fn drain_in_order(
        &mut self,
        order: &[(ItemId, u32)],
    ) -> Vec<(ItemId, u32, Vec<(VariableId, Value)>)> {
        let mut drained = Vec::new();
        for (item_id, occurrence) in order {
            if let Some(responses) = self.entries.remove(&(item_id.clone(), *occurrence)) {
                drained.push((item_id.clone(), *occurrence, responses));
            }
        }
        drained
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(
        clippy::panic,
        clippy::unwrap_used,
        clippy::expect_used,
        reason = "Test-only panic-based assertions are permitted."
    )]

    use super::*;
    use crate::core::value::BaseValue;

    fn answer(text: &str) -> Vec<(VariableId, Value)> {
        vec![(
            VariableId::new("RESPONSE"),
            Value::Single(BaseValue::String(text.to_string())),
        )]
    }

    #[test]
    fn restaging_replaces_the_previous_responses() {
        let mut buffer = PendingResponseBuffer::new();
        buffer.stage(ItemId::new("i1"), 0, answer("first"));
        buffer.stage(ItemId::new("i1"), 0, answer("second"));
        assert_eq!(buffer.len(), 1);
        let drained = buffer.drain_in_order(&[(ItemId::new("i1"), 0)]);
        assert_eq!(drained[0].2, answer("second"));
    }

    #[test]
    fn drain_follows_the_supplied_order() {
        let mut buffer = PendingResponseBuffer::new();
        buffer.stage(ItemId::new("i2"), 0, answer("b"));
        buffer.stage(ItemId::new("i1"), 0, answer("a"));
        let order = vec![(ItemId::new("i1"), 0), (ItemId::new("i2"), 0)];
        let drained = buffer.drain_in_order(&order);
        let ids: Vec<&str> = drained.iter().map(|(id, _, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["i1", "i2"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn occurrences_are_staged_independently() {
        let mut buffer = PendingResponseBuffer::new();
        buffer.stage(ItemId::new("i1"), 0, answer("a"));
        buffer.stage(ItemId::new("i1"), 1, answer("b"));
        assert_eq!(buffer.len(), 2);
        assert!(buffer.contains(&ItemId::new("i1"), 1));
    }
}
