// crates/examflow-core/src/core/state.rs
// ============================================================================
// Module: Examflow Session States
// Description: Session state enumerations, scopes, and session configuration.
// Purpose: Define the closed state machines shared by item and test sessions.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! Item and test sessions share one closed state enumeration with exhaustive
//! transition handling; the test session occupies the
//! `Initial/Interacting/ModalFeedback/Suspended/Closed` subset. Scopes name
//! the nesting levels the timing model tracks. `SessionConfig` carries every
//! knob that must be fixed up front for a deterministic, replayable session.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ItemId;
use crate::core::identifiers::SectionId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TestPartId;

// ============================================================================
// SECTION: Session State
// ============================================================================

/// Session lifecycle state for item and test scope.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
/// - `Suspended` is a domain state, not a concurrency primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Route item exists but no session has been instantiated yet.
    NotSelected,
    /// Session instantiated, no attempt begun.
    Initial,
    /// An attempt is in progress; durations accumulate only here.
    Interacting,
    /// Modal feedback is being shown after an attempt.
    ModalFeedback,
    /// Session parked between attempts or navigated away from.
    Suspended,
    /// Session terminated; no further attempts possible.
    Closed,
    /// Model solution is being shown.
    Solution,
    /// Closed session is being reviewed.
    Review,
}

impl SessionState {
    /// Returns true once the session can no longer accept attempts.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Solution | Self::Review)
    }
}

// ============================================================================
// SECTION: Scopes
// ============================================================================

/// Nesting level of a tracked scope.
///
/// # Invariants
/// - Variants are ordered innermost to outermost.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// One item occurrence.
    Item,
    /// One section.
    Section,
    /// One test part.
    TestPart,
    /// The whole test.
    Test,
}

/// Concrete scope tracked by the timing model.
///
/// # Invariants
/// - Item scopes carry the occurrence index to keep repeated selections apart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    /// The whole test.
    Test,
    /// One test part.
    TestPart {
        /// Test-part identifier.
        part_id: TestPartId,
    },
    /// One section.
    Section {
        /// Section identifier.
        section_id: SectionId,
    },
    /// One item occurrence.
    Item {
        /// Item identifier.
        item_id: ItemId,
        /// Occurrence index.
        occurrence: u32,
    },
}

impl Scope {
    /// Returns the nesting level of this scope.
    #[must_use]
    pub const fn kind(&self) -> ScopeKind {
        match self {
            Self::Test => ScopeKind::Test,
            Self::TestPart {
                ..
            } => ScopeKind::TestPart,
            Self::Section {
                ..
            } => ScopeKind::Section,
            Self::Item {
                ..
            } => ScopeKind::Item,
        }
    }
}

// ============================================================================
// SECTION: Session Configuration
// ============================================================================

/// Item-session instantiation policy.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstantiationMode {
    /// Instantiate every item session when the route is built.
    Eager,
    /// Instantiate each item session on first visit.
    Lazy,
}

/// Result submission policy.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPolicy {
    /// Submit results after every outcome-processing pass.
    AtEachOutcomeProcessing,
    /// Submit results once when the test session ends.
    AtEndOfSession,
}

/// Configuration fixed when a test session is created.
///
/// # Invariants
/// - `shuffle_seed` fully determines selection and ordering; equal seeds over
///   equal specs produce equal routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session identifier.
    pub session_id: SessionId,
    /// Item-session instantiation policy.
    pub instantiation: InstantiationMode,
    /// Whether preconditions also apply under nonlinear navigation.
    pub force_preconditions: bool,
    /// Result submission policy.
    pub result_policy: ResultPolicy,
    /// Seed for the selection/ordering RNG.
    pub shuffle_seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: SessionId::new("session-1"),
            instantiation: InstantiationMode::Eager,
            force_preconditions: false,
            result_policy: ResultPolicy::AtEndOfSession,
            shuffle_seed: 0,
        }
    }
}
