// crates/examflow-core/src/lib.rs
// ============================================================================
// Module: Examflow Core Library
// Description: Public API surface for the Examflow assessment engine.
// Purpose: Expose core types, interfaces, and session runtime helpers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Examflow core delivers assessment tests: it flattens a validated test spec
//! into a seeded, deterministic route, drives item and test sessions through
//! their state machines with explicit injected time, and persists everything
//! as serializable snapshots. It is backend-agnostic and integrates through
//! explicit interfaces for expression processing, storage, and result
//! submission rather than embedding a delivery frontend.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::ItemResult;
pub use interfaces::ProcessingEngine;
pub use interfaces::ProcessingError;
pub use interfaces::ProcessingKind;
pub use interfaces::ResultSubmitter;
pub use interfaces::SessionStorage;
pub use interfaces::StorageError;
pub use interfaces::SubmitError;
pub use interfaces::TestResult;
pub use interfaces::VariableLookup;
pub use runtime::resolve_test;
pub use runtime::AggregateFilter;
pub use runtime::DurationStore;
pub use runtime::InMemorySessionStorage;
pub use runtime::ItemSession;
pub use runtime::ItemSessionError;
pub use runtime::ItemSessionStore;
pub use runtime::Jump;
pub use runtime::PendingResponseBuffer;
pub use runtime::Placement;
pub use runtime::Route;
pub use runtime::RouteCountMode;
pub use runtime::RouteError;
pub use runtime::RouteItem;
pub use runtime::SessionError;
pub use runtime::SessionSnapshot;
pub use runtime::TestSession;
pub use runtime::TimeConstraint;
