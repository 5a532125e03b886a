// crates/examflow-core/src/core/variables.rs
// ============================================================================
// Module: Examflow Variable Declarations
// Description: Response/outcome declarations and per-session variable sets.
// Purpose: Hold declared variables with defaults, correct values, and constraints.
// Dependencies: crate::core::{identifiers, value}, serde
// ============================================================================

//! ## Overview
//! Each item occurrence and the test itself own a [`VariableSet`]: declared
//! response and outcome variables with current values. Declarations carry the
//! defaults and correct values used for skipping checks, response validation,
//! and `numberCorrect`-style aggregation. Value interpretation beyond
//! structural comparison belongs to the processing collaborator.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::VariableId;
use crate::core::value::Cardinality;
use crate::core::value::Value;

// ============================================================================
// SECTION: Completion Status
// ============================================================================

/// Reserved `completionStatus` outcome values maintained by the engine.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    /// The session has not been attempted.
    NotAttempted,
    /// Completion cannot be determined.
    Unknown,
    /// The session has been attempted but not completed.
    Incomplete,
    /// The session is complete.
    Completed,
}

/// Reserved identifier for the completion status outcome.
pub const COMPLETION_STATUS: &str = "completionStatus";

/// Reserved identifier suffix for synthetic duration variables.
pub const DURATION_VARIABLE: &str = "duration";

// ============================================================================
// SECTION: Declarations
// ============================================================================

/// Constraint applied to a response value during validation.
///
/// # Invariants
/// - `min_occurrences <= max_occurrences` when both are set; the spec
///   validator enforces this at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseConstraint {
    /// Minimum number of base values required.
    pub min_occurrences: Option<usize>,
    /// Maximum number of base values permitted.
    pub max_occurrences: Option<usize>,
    /// Regular-expression mask applied to string-like base values.
    pub pattern: Option<String>,
}

/// Response variable declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDeclaration {
    /// Variable identifier.
    pub identifier: VariableId,
    /// Declared cardinality.
    pub cardinality: Cardinality,
    /// Default value assigned on reset.
    #[serde(default)]
    pub default: Value,
    /// Declared correct value, when scoring defines one.
    pub correct: Option<Value>,
    /// Optional validation constraint.
    pub constraint: Option<ResponseConstraint>,
}

/// Outcome variable declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDeclaration {
    /// Variable identifier.
    pub identifier: VariableId,
    /// Declared cardinality.
    pub cardinality: Cardinality,
    /// Default value assigned on reset.
    #[serde(default)]
    pub default: Value,
}

// ============================================================================
// SECTION: Variable Set
// ============================================================================

/// Declared variables with current values for one session scope.
///
/// # Invariants
/// - Every value key corresponds to a declaration; lookups of undeclared
///   identifiers return `None`.
/// - Values are ordered by identifier for deterministic serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSet {
    /// Response declarations keyed by identifier.
    responses: BTreeMap<VariableId, ResponseDeclaration>,
    /// Outcome declarations keyed by identifier.
    outcomes: BTreeMap<VariableId, OutcomeDeclaration>,
    /// Current values keyed by identifier.
    values: BTreeMap<VariableId, Value>,
}

impl VariableSet {
    /// Builds a variable set from declarations, assigning default values.
    #[must_use]
    pub fn new(
        responses: impl IntoIterator<Item = ResponseDeclaration>,
        outcomes: impl IntoIterator<Item = OutcomeDeclaration>,
    ) -> Self {
        let responses: BTreeMap<VariableId, ResponseDeclaration> = responses
            .into_iter()
            .map(|declaration| (declaration.identifier.clone(), declaration))
            .collect();
        let outcomes: BTreeMap<VariableId, OutcomeDeclaration> = outcomes
            .into_iter()
            .map(|declaration| (declaration.identifier.clone(), declaration))
            .collect();
        let mut values = BTreeMap::new();
        for (identifier, declaration) in &responses {
            values.insert(identifier.clone(), declaration.default.clone());
        }
        for (identifier, declaration) in &outcomes {
            values.insert(identifier.clone(), declaration.default.clone());
        }
        Self {
            responses,
            outcomes,
            values,
        }
    }

    /// Returns the current value for an identifier.
    #[must_use]
    pub fn value(&self, identifier: &VariableId) -> Option<&Value> {
        self.values.get(identifier)
    }

    /// Sets the value for a declared identifier.
    ///
    /// Returns false when the identifier is not declared.
    pub fn set_value(&mut self, identifier: &VariableId, value: Value) -> bool {
        if self.responses.contains_key(identifier) || self.outcomes.contains_key(identifier) {
            self.values.insert(identifier.clone(), value);
            true
        } else {
            false
        }
    }

    /// Returns the response declaration for an identifier.
    #[must_use]
    pub fn response_declaration(&self, identifier: &VariableId) -> Option<&ResponseDeclaration> {
        self.responses.get(identifier)
    }

    /// Iterates over response declarations.
    pub fn response_declarations(&self) -> impl Iterator<Item = &ResponseDeclaration> {
        self.responses.values()
    }

    /// Iterates over outcome declarations.
    pub fn outcome_declarations(&self) -> impl Iterator<Item = &OutcomeDeclaration> {
        self.outcomes.values()
    }

    /// Iterates over all current values.
    pub fn values(&self) -> impl Iterator<Item = (&VariableId, &Value)> {
        self.values.iter()
    }

    /// Returns true when the identifier names a declared response variable.
    #[must_use]
    pub fn is_response(&self, identifier: &VariableId) -> bool {
        self.responses.contains_key(identifier)
    }

    /// Resets every variable to its declared default.
    pub fn reset_to_defaults(&mut self) {
        for (identifier, declaration) in &self.responses {
            self.values.insert(identifier.clone(), declaration.default.clone());
        }
        for (identifier, declaration) in &self.outcomes {
            self.values.insert(identifier.clone(), declaration.default.clone());
        }
    }

    /// Returns true when a candidate value equals the declared default or is null.
    ///
    /// Used by the skipping check: an attempt where every response satisfies
    /// this predicate counts as a skip.
    #[must_use]
    pub fn is_default_response(&self, identifier: &VariableId, value: &Value) -> bool {
        if value.is_null() {
            return true;
        }
        self.responses
            .get(identifier)
            .is_some_and(|declaration| declaration.default.matches(value))
    }

    /// Returns true when every declared response with a correct value matches it.
    ///
    /// Responses without a declared correct value are ignored; a set with no
    /// correct values at all reports false.
    #[must_use]
    pub fn is_correct(&self) -> bool {
        let mut any = false;
        for declaration in self.responses.values() {
            if let Some(correct) = &declaration.correct {
                any = true;
                let matches = self
                    .values
                    .get(&declaration.identifier)
                    .is_some_and(|value| value.matches(correct));
                if !matches {
                    return false;
                }
            }
        }
        any
    }

    /// Returns true when any declared response differs from its default.
    #[must_use]
    pub fn is_responded(&self) -> bool {
        self.responses.iter().any(|(identifier, _)| {
            self.values
                .get(identifier)
                .is_some_and(|value| !self.is_default_response(identifier, value))
        })
    }
}
