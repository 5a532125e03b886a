// crates/examflow-core/src/runtime/mod.rs
// ============================================================================
// Module: Examflow Runtime
// Description: Selection, route, timing, and session machinery.
// Purpose: Turn a validated test spec into a running, replayable session.
// Dependencies: crate::core, crate::interfaces, rand, serde, thiserror
// ============================================================================

//! ## Overview
//! The runtime flattens a validated test spec into a route (seeded selection
//! and ordering, folded preconditions and branch rules), then drives delivery
//! through the test session: item-session state machines, the scope duration
//! store, the simultaneous-submission pending buffer, and snapshot-based
//! persistence.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod item_session;
pub mod pending;
pub mod route;
pub mod selection;
pub mod session;
pub mod store;
pub mod timer;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use item_session::ItemSession;
pub use item_session::ItemSessionError;
pub use pending::PendingRecord;
pub use pending::PendingResponseBuffer;
pub use route::Jump;
pub use route::Route;
pub use route::RouteCountMode;
pub use route::RouteError;
pub use route::RouteItem;
pub use selection::resolve_test;
pub use selection::Placement;
pub use session::AggregateFilter;
pub use session::SessionError;
pub use session::SessionSnapshot;
pub use session::TestSession;
pub use store::InMemorySessionStorage;
pub use store::ItemSessionStore;
pub use timer::DurationStore;
pub use timer::TimeConstraint;
