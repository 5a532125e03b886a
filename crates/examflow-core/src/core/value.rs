// crates/examflow-core/src/core/value.rs
// ============================================================================
// Module: Examflow Value Model
// Description: Candidate response and outcome value representations.
// Purpose: Provide typed, serializable values with cardinality-aware queries.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Values carried by response and outcome variables are closed enumerations:
//! a base value (boolean, number, string, identifier, pair, duration) wrapped
//! in a cardinality shell (single, multiple, ordered) or null. The engine
//! compares values structurally; interpretation of scores and conditions is
//! the processing collaborator's concern.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::time::Millis;

// ============================================================================
// SECTION: Base Values
// ============================================================================

/// Scalar value carried inside a [`Value`] container.
///
/// # Invariants
/// - Variants are stable for serialization and snapshot matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BaseValue {
    /// Boolean value.
    Boolean(bool),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// Free-text string value.
    String(String),
    /// Identifier value (choice identifiers and the like).
    Identifier(String),
    /// Directed pair of identifiers.
    Pair(String, String),
    /// Duration value in milliseconds.
    Duration(Millis),
}

impl BaseValue {
    /// Returns the textual content for string-like values.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::String(text) | Self::Identifier(text) => Some(text),
            Self::Boolean(_) | Self::Integer(_) | Self::Float(_) | Self::Pair(..)
            | Self::Duration(_) => None,
        }
    }
}

// ============================================================================
// SECTION: Cardinality
// ============================================================================

/// Declared cardinality of a variable.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Exactly one base value.
    Single,
    /// Unordered container of base values.
    Multiple,
    /// Ordered container of base values.
    Ordered,
}

// ============================================================================
// SECTION: Values
// ============================================================================

/// Variable value with explicit cardinality shell.
///
/// # Invariants
/// - `Multiple`/`Ordered` containers may be empty; an empty container is
///   treated as null for skipping checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cardinality", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// No value set.
    Null,
    /// Single base value.
    Single(BaseValue),
    /// Unordered container of base values.
    Multiple(Vec<BaseValue>),
    /// Ordered container of base values.
    Ordered(Vec<BaseValue>),
}

impl Value {
    /// Returns true when the value is null or an empty container.
    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Single(_) => false,
            Self::Multiple(values) | Self::Ordered(values) => values.is_empty(),
        }
    }

    /// Returns the number of contained base values.
    #[must_use]
    pub fn occurrence_count(&self) -> usize {
        match self {
            Self::Null => 0,
            Self::Single(_) => 1,
            Self::Multiple(values) | Self::Ordered(values) => values.len(),
        }
    }

    /// Returns the cardinality shell of this value, when not null.
    #[must_use]
    pub const fn cardinality(&self) -> Option<Cardinality> {
        match self {
            Self::Null => None,
            Self::Single(_) => Some(Cardinality::Single),
            Self::Multiple(_) => Some(Cardinality::Multiple),
            Self::Ordered(_) => Some(Cardinality::Ordered),
        }
    }

    /// Returns true when the value shape is compatible with a declared cardinality.
    ///
    /// Null values are compatible with every cardinality; nullness is policed
    /// by the skipping rules, not by shape validation.
    #[must_use]
    pub fn matches_cardinality(&self, declared: Cardinality) -> bool {
        match self.cardinality() {
            None => true,
            Some(actual) => actual == declared,
        }
    }

    /// Iterates over the contained base values.
    pub fn base_values(&self) -> std::slice::Iter<'_, BaseValue> {
        let slice: &[BaseValue] = match self {
            Self::Null => &[],
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multiple(values) | Self::Ordered(values) => values,
        };
        slice.iter()
    }

    /// Compares against another value, treating `Multiple` as order-insensitive.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Multiple(left), Self::Multiple(right)) => {
                left.len() == right.len()
                    && left.iter().all(|value| {
                        let needed =
                            left.iter().filter(|candidate| *candidate == value).count();
                        let found =
                            right.iter().filter(|candidate| *candidate == value).count();
                        needed == found
                    })
            }
            (left, right) => left == right,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl From<BaseValue> for Value {
    fn from(value: BaseValue) -> Self {
        Self::Single(value)
    }
}
