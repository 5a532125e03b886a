// crates/examflow-core/src/core/mod.rs
// ============================================================================
// Module: Examflow Core Types
// Description: Canonical test structure, value, and session-state types.
// Purpose: Provide stable, serializable types for test specs and session records.
// Dependencies: regex, serde
// ============================================================================

//! ## Overview
//! Examflow core types define the assessment test structure the route builder
//! flattens, the value and variable model carried by item and test sessions,
//! and the closed state enumerations shared across the engine. These types
//! are the canonical source of truth for any derived persistence or delivery
//! surface.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod hashing;
pub mod identifiers;
pub mod spec;
pub mod state;
pub mod time;
pub mod value;
pub mod variables;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use hashing::DEFAULT_HASH_ALGORITHM;
pub use hashing::HashAlgorithm;
pub use hashing::HashDigest;
pub use hashing::HashError;
pub use identifiers::ItemId;
pub use identifiers::SectionId;
pub use identifiers::SessionId;
pub use identifiers::TestId;
pub use identifiers::TestPartId;
pub use identifiers::VariableId;
pub use spec::BranchRuleSpec;
pub use spec::BranchTarget;
pub use spec::Expression;
pub use spec::ItemRefSpec;
pub use spec::NavigationMode;
pub use spec::OrderingSpec;
pub use spec::SectionPart;
pub use spec::SectionSpec;
pub use spec::SelectionSpec;
pub use spec::SessionControl;
pub use spec::SpecError;
pub use spec::SubmissionMode;
pub use spec::TestPartSpec;
pub use spec::TestSpec;
pub use spec::TimeLimits;
pub use state::InstantiationMode;
pub use state::ResultPolicy;
pub use state::Scope;
pub use state::ScopeKind;
pub use state::SessionConfig;
pub use state::SessionState;
pub use time::Millis;
pub use time::Timestamp;
pub use value::BaseValue;
pub use value::Cardinality;
pub use value::Value;
pub use variables::CompletionStatus;
pub use variables::OutcomeDeclaration;
pub use variables::ResponseConstraint;
pub use variables::ResponseDeclaration;
pub use variables::VariableSet;
pub use variables::COMPLETION_STATUS;
pub use variables::DURATION_VARIABLE;
