// crates/examflow-core/src/runtime/timer.rs
// ============================================================================
// Module: Examflow Timing
// Description: Scope duration accumulation and time-constraint queries.
// Purpose: Track interacting time per scope against declared time limits.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! The engine never reads a wall clock; the host injects timestamps and the
//! duration store accumulates closed slices per scope. A slice opens when an
//! attempt begins inside the scope and closes when interaction stops, so
//! durations advance only while a candidate is interacting. All queries are
//! pure functions of the recorded slices and the supplied `now`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::spec::TimeLimits;
use crate::core::state::Scope;
use crate::core::time::Millis;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Duration Store
// ============================================================================

/// Accumulated interacting time per tracked scope.
///
/// # Invariants
/// - A scope has at most one open slice.
/// - Accumulated values only grow; closing a slice folds it in permanently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "DurationRecords", into = "DurationRecords")]
pub struct DurationStore {
    /// Closed, accumulated time per scope.
    accumulated: BTreeMap<Scope, Millis>,
    /// Open slice start per scope.
    open_since: BTreeMap<Scope, Timestamp>,
}

/// Serialized form of a duration store.
///
/// Scopes are structured values, so the maps serialize as record lists
/// instead of JSON object keys.
#[derive(Serialize, Deserialize)]
struct DurationRecords {
    /// Accumulated time entries.
    accumulated: Vec<(Scope, Millis)>,
    /// Open slice entries.
    open_since: Vec<(Scope, Timestamp)>,
}

impl From<DurationRecords> for DurationStore {
    fn from(records: DurationRecords) -> Self {
        Self {
            accumulated: records.accumulated.into_iter().collect(),
            open_since: records.open_since.into_iter().collect(),
        }
    }
}

impl From<DurationStore> for DurationRecords {
    fn from(store: DurationStore) -> Self {
        Self {
            accumulated: store.accumulated.into_iter().collect(),
            open_since: store.open_since.into_iter().collect(),
        }
    }
}

impl DurationStore {
    /// Creates an empty duration store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a slice for a scope; an already open slice keeps its start.
    pub fn open(&mut self, scope: Scope, now: Timestamp) {
        self.open_since.entry(scope).or_insert(now);
    }

    /// Closes the open slice for a scope, folding it into the accumulator.
    ///
    /// Closing a scope without an open slice is a no-op.
    pub fn close(&mut self, scope: &Scope, now: Timestamp) {
        if let Some(start) = self.open_since.remove(scope) {
            let slice = now.since(start);
            let total = self.accumulated.entry(scope.clone()).or_insert(Millis::ZERO);
            *total = total.saturating_add(slice);
        }
    }

    /// Closes every open slice at once.
    pub fn close_all(&mut self, now: Timestamp) {
        let scopes: Vec<Scope> = self.open_since.keys().cloned().collect();
        for scope in scopes {
            self.close(&scope, now);
        }
    }

    /// Returns true when the scope has an open slice.
    #[must_use]
    pub fn is_open(&self, scope: &Scope) -> bool {
        self.open_since.contains_key(scope)
    }

    /// Returns the elapsed interacting time for a scope as of `now`.
    ///
    /// Includes the live, still-open slice when one exists.
    #[must_use]
    pub fn elapsed(&self, scope: &Scope, now: Timestamp) -> Millis {
        let closed = self.accumulated.get(scope).copied().unwrap_or(Millis::ZERO);
        match self.open_since.get(scope) {
            Some(start) => closed.saturating_add(now.since(*start)),
            None => closed,
        }
    }

    /// Builds the constraint view for a scope against its declared limits.
    #[must_use]
    pub fn constraint(
        &self,
        scope: &Scope,
        limits: TimeLimits,
        now: Timestamp,
    ) -> TimeConstraint {
        let elapsed = self.elapsed(scope, now);
        let remaining = limits.max_time.map(|max| {
            Millis::from_millis(max.as_millis().saturating_sub(elapsed.as_millis()))
        });
        let exceeded = limits.max_time.is_some_and(|max| elapsed > max);
        let below_minimum = limits.min_time.is_some_and(|min| elapsed < min);
        TimeConstraint {
            scope: scope.clone(),
            limits,
            elapsed,
            remaining,
            exceeded,
            below_minimum,
        }
    }
}

// ============================================================================
// SECTION: Constraint View
// ============================================================================

/// Point-in-time view of one scope against its declared limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeConstraint {
    /// The scope this view describes.
    pub scope: Scope,
    /// Declared limits for the scope.
    pub limits: TimeLimits,
    /// Elapsed interacting time.
    pub elapsed: Millis,
    /// Remaining time before the maximum, when one is declared.
    pub remaining: Option<Millis>,
    /// Whether the maximum has been exceeded.
    pub exceeded: bool,
    /// Whether the minimum has not yet been reached.
    pub below_minimum: bool,
}

// ============================================================================
// SECTION: Tests
// ============================================================================
