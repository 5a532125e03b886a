// crates/examflow-core/src/interfaces/mod.rs
// ============================================================================
// Module: Examflow Interfaces
// Description: Backend-agnostic interfaces for processing, storage, and results.
// Purpose: Define the contract surfaces used by the Examflow session engine.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! Interfaces define how the session engine integrates with its external
//! collaborators without embedding their details: the expression/processing
//! evaluator, durable storage for serialized sessions, and result-submission
//! transport. Implementations must be deterministic; the engine hands them
//! opaque payloads and typed state views only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::ItemId;
use crate::core::identifiers::SessionId;
use crate::core::identifiers::TestId;
use crate::core::identifiers::VariableId;
use crate::core::spec::Expression;
use crate::core::state::SessionState;
use crate::core::time::Millis;
use crate::core::time::Timestamp;
use crate::core::value::Value;
use crate::core::variables::VariableSet;

// ============================================================================
// SECTION: Variable Lookup
// ============================================================================

/// Read-only view over the session's flat, dotted variable namespace.
///
/// Names follow `<item>[.<occurrence>].<variable>` for item-scoped variables,
/// a bare `<variable>` for test-level ones, and the reserved
/// `<scope>.duration` synthetic per tracked scope.
pub trait VariableLookup {
    /// Resolves a dotted variable name to its current value.
    fn lookup(&self, name: &str) -> Option<Value>;
}

// ============================================================================
// SECTION: Processing Engine
// ============================================================================

/// Processing procedure kinds dispatched to the collaborator.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingKind {
    /// Item response processing (scores one item occurrence).
    Response,
    /// Test outcome processing (aggregates test-level outcomes).
    Outcome,
    /// Item template processing (initializes template values).
    Template,
}

/// Processing collaborator errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Condition evaluation failed.
    #[error("condition evaluation error: {0}")]
    Condition(String),
    /// Processing procedure failed.
    #[error("processing error: {0}")]
    Processing(String),
}

/// Expression evaluator and response/outcome processor.
///
/// The core calls these opaquely and does not interpret expression syntax.
pub trait ProcessingEngine {
    /// Evaluates a boolean condition against the session variable namespace.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError`] when the expression cannot be evaluated.
    fn evaluate_condition(
        &self,
        expression: &Expression,
        state: &dyn VariableLookup,
    ) -> Result<bool, ProcessingError>;

    /// Runs a processing procedure, mutating the target variable set.
    ///
    /// For [`ProcessingKind::Response`] and [`ProcessingKind::Template`] the
    /// target is the item occurrence's variables; for
    /// [`ProcessingKind::Outcome`] it is the test-level variables. `state`
    /// exposes the full namespace for cross-scope reads.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessingError`] when the procedure fails.
    fn run_processing(
        &self,
        kind: ProcessingKind,
        variables: &mut VariableSet,
        state: &dyn VariableLookup,
    ) -> Result<(), ProcessingError>;
}

// ============================================================================
// SECTION: Session Storage
// ============================================================================

/// Session storage errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Read operation failed.
    #[error("session storage read error: {0}")]
    Read(String),
    /// Write operation failed.
    #[error("session storage write error: {0}")]
    Write(String),
    /// Key does not exist.
    #[error("session storage key not found: {0}")]
    Missing(String),
    /// Operation is not implemented by this backend.
    #[error("session storage operation unsupported: {0}")]
    Unsupported(String),
}

/// Durable key/value storage for serialized session snapshots.
///
/// Not used by the core engine itself; hosts persist snapshots between
/// candidate interactions through this contract.
pub trait SessionStorage {
    /// Reads the bytes stored under a key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Missing`] for unknown keys and
    /// [`StorageError::Read`] for backend failures.
    fn read(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Writes bytes under a key, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] for backend failures.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Returns true when a key exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] for backend failures.
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Deletes the value stored under a key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unsupported`] unless the backend implements
    /// deletion.
    fn delete(&self, key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unsupported(format!("delete not implemented for key: {key}")))
    }
}

// ============================================================================
// SECTION: Result Submission
// ============================================================================

/// Test-level result snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Session identifier.
    pub session_id: SessionId,
    /// Test identifier.
    pub test_id: TestId,
    /// Timestamp the snapshot was taken at.
    pub taken_at: Timestamp,
    /// Test-level variable values.
    pub variables: BTreeMap<VariableId, Value>,
    /// Total test duration.
    pub duration: Millis,
}

/// Item-level result snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    /// Item identifier.
    pub item_id: ItemId,
    /// Occurrence index.
    pub occurrence: u32,
    /// Item session state at snapshot time.
    pub state: SessionState,
    /// Consumed attempt count.
    pub attempts: u32,
    /// Item variable values.
    pub variables: BTreeMap<VariableId, Value>,
    /// Accumulated item duration.
    pub duration: Millis,
}

/// Result submission errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// Transport failed to deliver the results.
    #[error("result submission transport error: {0}")]
    Transport(String),
    /// The receiving system rejected the results.
    #[error("result submission rejected: {0}")]
    Rejected(String),
}

/// Result submission transport.
pub trait ResultSubmitter {
    /// Submits a test result snapshot with its item result snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError`] when delivery fails.
    fn submit(&self, test: &TestResult, items: &[ItemResult]) -> Result<(), SubmitError>;
}
