// crates/examflow-core/src/runtime/session.rs
// ============================================================================
// Module: Examflow Test Session
// Description: Test-session engine orchestrating route, attempts, and timing.
// Purpose: Drive one candidate through the route with scoring and submission.
// Dependencies: crate::core, crate::interfaces, crate::runtime, serde, thiserror
// ============================================================================

//! ## Overview
//! The test session owns the route, the item-session store, the pending
//! buffer, the duration store, and the test-level variables, and coordinates
//! them against the host-supplied collaborators. All timing is driven by
//! `set_time`; operations are synchronous and either commit fully or return
//! a typed error with state untouched. The session serializes to a
//! [`SessionSnapshot`] bound to the canonical hash of its test spec.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::identifiers::ItemId;
use crate::core::identifiers::TestPartId;
use crate::core::identifiers::VariableId;
use crate::core::spec::NavigationMode;
use crate::core::spec::SpecError;
use crate::core::spec::SubmissionMode;
use crate::core::spec::TestSpec;
use crate::core::state::InstantiationMode;
use crate::core::state::ResultPolicy;
use crate::core::state::Scope;
use crate::core::state::SessionConfig;
use crate::core::state::SessionState;
use crate::core::time::Timestamp;
use crate::core::value::BaseValue;
use crate::core::value::Value;
use crate::core::variables::VariableSet;
use crate::core::variables::DURATION_VARIABLE;
use crate::interfaces::ItemResult;
use crate::interfaces::ProcessingEngine;
use crate::interfaces::ProcessingError;
use crate::interfaces::ProcessingKind;
use crate::interfaces::ResultSubmitter;
use crate::interfaces::SubmitError;
use crate::interfaces::TestResult;
use crate::interfaces::VariableLookup;
use crate::runtime::item_session::ItemSession;
use crate::runtime::item_session::ItemSessionError;
use crate::runtime::pending::PendingResponseBuffer;
use crate::runtime::route::Jump;
use crate::runtime::route::Route;
use crate::runtime::route::RouteCountMode;
use crate::runtime::route::RouteError;
use crate::runtime::route::RouteItem;
use crate::runtime::selection::resolve_test;
use crate::runtime::store::ItemSessionStore;
use crate::runtime::timer::DurationStore;
use crate::runtime::timer::TimeConstraint;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Test-session operation errors.
///
/// # Invariants
/// - A returned error implies no partial mutation beyond what the variant
///   documents (duration errors commit durations and the documented state
///   change).
#[derive(Debug, Error)]
pub enum SessionError {
    /// No attempts remain for the item.
    #[error("attempts overflow for item {item}")]
    AttemptsOverflow {
        /// Item identifier.
        item: String,
    },
    /// Skipping is forbidden and every response was at its default.
    #[error("skipping forbidden for item {item}")]
    SkippingForbidden {
        /// Item identifier.
        item: String,
    },
    /// A response violates its declaration or constraint.
    #[error("response validation failed for item {item}, variable {identifier}: {reason}")]
    ResponseValidation {
        /// Item identifier.
        item: String,
        /// Offending variable identifier.
        identifier: String,
        /// Violation description.
        reason: String,
    },
    /// The scope's minimum time has not elapsed.
    #[error("duration underflow in scope {scope:?}")]
    DurationUnderflow {
        /// Scope whose minimum was not reached.
        scope: Scope,
    },
    /// The scope's maximum time is exceeded and late submission is disallowed.
    #[error("duration overflow in scope {scope:?}")]
    DurationOverflow {
        /// Scope whose maximum was exceeded.
        scope: Scope,
    },
    /// Operation is not legal in the current test-session state.
    #[error("operation {operation} illegal in test session state {state:?}")]
    IllegalState {
        /// Attempted operation name.
        operation: &'static str,
        /// Current state.
        state: SessionState,
    },
    /// Operation requires a different navigation mode.
    #[error("operation {operation} requires nonlinear navigation")]
    NavigationMode {
        /// Attempted operation name.
        operation: &'static str,
    },
    /// Position, target, or variable reference is out of bounds.
    #[error("out of bounds: {detail}")]
    OutOfBounds {
        /// Description of the offending reference.
        detail: String,
    },
    /// Snapshot was created against a different test spec.
    #[error("session snapshot does not match the supplied test spec")]
    SpecMismatch,
    /// Spec validation failed.
    #[error(transparent)]
    Spec(#[from] SpecError),
    /// Route construction failed.
    #[error(transparent)]
    Route(#[from] RouteError),
    /// Canonical hashing failed.
    #[error(transparent)]
    Hashing(#[from] HashError),
    /// Processing collaborator failed.
    #[error(transparent)]
    Processing(#[from] ProcessingError),
    /// Result submission failed.
    #[error(transparent)]
    Submission(#[from] SubmitError),
    /// Item session rejected an operation.
    #[error(transparent)]
    Item(ItemSessionError),
}

impl From<ItemSessionError> for SessionError {
    fn from(err: ItemSessionError) -> Self {
        match err {
            ItemSessionError::AttemptsExhausted {
                item,
            } => Self::AttemptsOverflow {
                item,
            },
            ItemSessionError::SkippingForbidden {
                item,
            } => Self::SkippingForbidden {
                item,
            },
            ItemSessionError::UndeclaredResponse {
                item,
                identifier,
            } => Self::ResponseValidation {
                item,
                identifier,
                reason: "undeclared response variable".to_string(),
            },
            ItemSessionError::InvalidResponse {
                item,
                identifier,
                reason,
            } => Self::ResponseValidation {
                item,
                identifier,
                reason,
            },
            other => Self::Item(other),
        }
    }
}

// ============================================================================
// SECTION: Aggregation Filter
// ============================================================================

/// Filter applied by the `number*` aggregation queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateFilter {
    /// Restrict to route items within this section.
    pub section: Option<crate::core::identifiers::SectionId>,
    /// When non-empty, require at least one of these categories.
    pub include_categories: Vec<String>,
    /// Exclude route items carrying any of these categories.
    pub exclude_categories: Vec<String>,
}

impl AggregateFilter {
    /// Returns true when a route item passes the filter.
    #[must_use]
    pub fn matches(&self, item: &RouteItem) -> bool {
        if let Some(section) = &self.section {
            if !item.sections.contains(section) {
                return false;
            }
        }
        if !self.include_categories.is_empty()
            && !self.include_categories.iter().any(|category| item.categories.contains(category))
        {
            return false;
        }
        !self.exclude_categories.iter().any(|category| item.categories.contains(category))
    }
}

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Fully serializable test-session state for host persistence.
///
/// # Invariants
/// - `spec_hash` binds the snapshot to the canonical hash of the spec the
///   session was created against; restore rejects any other spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Canonical hash of the originating test spec.
    pub spec_hash: HashDigest,
    /// Session configuration.
    pub config: SessionConfig,
    /// Test-session lifecycle state.
    pub state: SessionState,
    /// Scope that triggered a timeout, when one has fired.
    pub timed_out: Option<Scope>,
    /// Route with cursor position.
    pub route: Route,
    /// Instantiated item sessions.
    pub sessions: ItemSessionStore,
    /// Staged simultaneous-mode responses.
    pub pending: PendingResponseBuffer,
    /// Accumulated scope durations.
    pub durations: DurationStore,
    /// Test-level variables.
    pub test_variables: VariableSet,
    /// Last injected time.
    pub now: Timestamp,
}

// ============================================================================
// SECTION: Namespace View
// ============================================================================

/// Owned snapshot of the dotted variable namespace.
///
/// Built before each collaborator call so processing can read the whole
/// namespace while the engine mutates one variable set.
struct NamespaceSnapshot {
    /// Resolved values keyed by dotted name.
    entries: BTreeMap<String, Value>,
}

impl VariableLookup for NamespaceSnapshot {
    fn lookup(&self, name: &str) -> Option<Value> {
        self.entries.get(name).cloned()
    }
}

// ============================================================================
// SECTION: Test Session
// ============================================================================

/// Stateful delivery engine for one candidate and one test.
///
/// # Invariants
/// - The route cursor only moves through navigation operations; positions
///   beyond the route length mean the route is exhausted.
/// - Scope durations accumulate only while the current item session is
///   `Interacting`.
pub struct TestSession {
    /// Immutable test specification.
    spec: TestSpec,
    /// Canonical hash of the spec.
    spec_hash: HashDigest,
    /// Session configuration.
    config: SessionConfig,
    /// Test-session lifecycle state.
    state: SessionState,
    /// Scope that triggered a timeout, when one has fired.
    timed_out: Option<Scope>,
    /// Flattened route with cursor.
    route: Route,
    /// Instantiated item sessions.
    sessions: ItemSessionStore,
    /// Staged simultaneous-mode responses.
    pending: PendingResponseBuffer,
    /// Accumulated scope durations.
    durations: DurationStore,
    /// Test-level variables.
    test_variables: VariableSet,
    /// Last injected time.
    now: Timestamp,
    /// Expression evaluator and processing collaborator.
    processing: Box<dyn ProcessingEngine>,
    /// Result submission collaborator.
    submitter: Box<dyn ResultSubmitter>,
}

impl TestSession {
    /// Creates a session: validates the spec, resolves selection, builds the
    /// route, and eagerly instantiates item sessions when configured to.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Spec`] for invalid specs,
    /// [`SessionError::Route`] for malformed branch targets, and
    /// [`SessionError::Processing`] when template processing fails.
    pub fn new(
        spec: TestSpec,
        config: SessionConfig,
        processing: Box<dyn ProcessingEngine>,
        submitter: Box<dyn ResultSubmitter>,
    ) -> Result<Self, SessionError> {
        spec.validate()?;
        let spec_hash = spec.canonical_hash()?;
        let placements = resolve_test(&spec, config.shuffle_seed);
        let route = Route::build(&spec, &placements)?;
        let test_variables = VariableSet::new(Vec::new(), spec.outcomes.clone());
        let mut session = Self {
            spec,
            spec_hash,
            config,
            state: SessionState::Initial,
            timed_out: None,
            route,
            sessions: ItemSessionStore::new(),
            pending: PendingResponseBuffer::new(),
            durations: DurationStore::new(),
            test_variables,
            now: Timestamp::from_millis(0),
            processing,
            submitter,
        };
        if session.config.instantiation == InstantiationMode::Eager {
            let items: Vec<RouteItem> = session.route.items().to_vec();
            for item in &items {
                session.instantiate_session(item)?;
            }
        }
        Ok(session)
    }

    /// Restores a session from a snapshot taken against the same spec.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SpecMismatch`] when the snapshot's hash does
    /// not match the supplied spec.
    pub fn restore(
        spec: TestSpec,
        processing: Box<dyn ProcessingEngine>,
        submitter: Box<dyn ResultSubmitter>,
        snapshot: SessionSnapshot,
    ) -> Result<Self, SessionError> {
        let spec_hash = spec.canonical_hash()?;
        if spec_hash != snapshot.spec_hash {
            return Err(SessionError::SpecMismatch);
        }
        Ok(Self {
            spec,
            spec_hash,
            config: snapshot.config,
            state: snapshot.state,
            timed_out: snapshot.timed_out,
            route: snapshot.route,
            sessions: snapshot.sessions,
            pending: snapshot.pending,
            durations: snapshot.durations,
            test_variables: snapshot.test_variables,
            now: snapshot.now,
            processing,
            submitter,
        })
    }

    /// Takes a serializable snapshot of the full session state.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            spec_hash: self.spec_hash.clone(),
            config: self.config.clone(),
            state: self.state,
            timed_out: self.timed_out.clone(),
            route: self.route.clone(),
            sessions: self.sessions.clone(),
            pending: self.pending.clone(),
            durations: self.durations.clone(),
            test_variables: self.test_variables.clone(),
            now: self.now,
        }
    }

    // ========================================================================
    // SECTION: Time
    // ========================================================================

    /// Injects the current time and enforces any triggered timeout.
    ///
    /// Time never moves backwards; an earlier timestamp is ignored.
    pub fn set_time(&mut self, now: Timestamp) {
        if now > self.now {
            self.now = now;
        }
        self.enforce_timeouts();
    }

    /// Returns the scope that triggered a timeout, when one has fired.
    #[must_use]
    pub const fn is_timeout(&self) -> Option<&Scope> {
        self.timed_out.as_ref()
    }

    /// Returns the constraint views for the current item's scope chain.
    #[must_use]
    pub fn time_constraints(&self) -> Vec<TimeConstraint> {
        self.route.current().map_or_else(Vec::new, |item| {
            item.scopes
                .iter()
                .map(|(scope, limits)| self.durations.constraint(scope, *limits, self.now))
                .collect()
        })
    }

    /// Returns the constraint view for one scope, when the route declares it.
    #[must_use]
    pub fn time_constraint(&self, scope: &Scope) -> Option<TimeConstraint> {
        self.route
            .items()
            .iter()
            .flat_map(|item| &item.scopes)
            .find(|(candidate, _)| candidate == scope)
            .map(|(scope, limits)| self.durations.constraint(scope, *limits, self.now))
    }

    // ========================================================================
    // SECTION: State Queries
    // ========================================================================

    /// Returns the test-session lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns the test specification.
    #[must_use]
    pub const fn spec(&self) -> &TestSpec {
        &self.spec
    }

    /// Returns the resolved route.
    #[must_use]
    pub const fn route(&self) -> &Route {
        &self.route
    }

    /// Returns the route item under the cursor.
    #[must_use]
    pub fn current_item(&self) -> Option<&RouteItem> {
        self.route.current()
    }

    /// Returns the lifecycle state of an item occurrence.
    #[must_use]
    pub fn item_state(&self, item_id: &ItemId, occurrence: u32) -> SessionState {
        self.sessions.state(item_id, occurrence)
    }

    /// Returns the item session for an occurrence, when instantiated.
    #[must_use]
    pub fn item_session(&self, item_id: &ItemId, occurrence: u32) -> Option<&ItemSession> {
        self.sessions.get(item_id, occurrence)
    }

    /// Counts possible routes under the requested mode.
    #[must_use]
    pub fn route_count(&self, mode: RouteCountMode) -> usize {
        self.route.route_count(mode)
    }

    /// Returns the jump destinations reachable in the current test part.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NavigationMode`] under linear navigation and
    /// [`SessionError::OutOfBounds`] when the route is exhausted.
    pub fn possible_jumps(&self) -> Result<Vec<Jump>, SessionError> {
        let item = self.current_route_item()?;
        if item.navigation_mode != NavigationMode::Nonlinear {
            return Err(SessionError::NavigationMode {
                operation: "possible_jumps",
            });
        }
        let jumps = self
            .route
            .positions_in_part(&item.part_id)
            .into_iter()
            .filter(|position| *position != self.route.position())
            .filter_map(|position| self.route.item(position).map(|target| (position, target)))
            .filter(|(_, target)| {
                !self.sessions.state(&target.item_id, target.occurrence).is_terminal()
            })
            .map(|(position, target)| Jump {
                position,
                item_id: target.item_id.clone(),
                occurrence: target.occurrence,
            })
            .collect();
        Ok(jumps)
    }

    // ========================================================================
    // SECTION: Session Lifecycle
    // ========================================================================

    /// Begins the test session and arrives at the first deliverable item.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IllegalState`] unless the session is
    /// `Initial`, and propagates precondition evaluation failures.
    pub fn begin_test_session(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Initial {
            return Err(SessionError::IllegalState {
                operation: "begin_test_session",
                state: self.state,
            });
        }
        self.state = SessionState::Interacting;
        self.goto(None, 0)
    }

    /// Suspends the whole test session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IllegalState`] unless the session is
    /// `Interacting`.
    pub fn suspend(&mut self) -> Result<(), SessionError> {
        self.require_interacting("suspend")?;
        self.suspend_current_item()?;
        self.durations.close_all(self.now);
        self.state = SessionState::Suspended;
        Ok(())
    }

    /// Resumes a suspended test session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IllegalState`] unless the session is
    /// `Suspended`.
    pub fn resume(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Suspended {
            return Err(SessionError::IllegalState {
                operation: "resume",
                state: self.state,
            });
        }
        self.state = SessionState::Interacting;
        Ok(())
    }

    /// Ends the test session: flushes pending responses, closes every item
    /// session, runs final outcome processing, and submits results.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::IllegalState`] when already closed, and
    /// propagates processing and submission failures.
    pub fn end_test_session(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::IllegalState {
                operation: "end_test_session",
                state: self.state,
            });
        }
        self.durations.close_all(self.now);
        let part = self.route.current().map(|item| item.part_id.clone());
        if let Some(part) = part {
            self.exit_part(&part)?;
        }
        self.finish()
    }

    // ========================================================================
    // SECTION: Attempts
    // ========================================================================

    /// Begins an attempt on the current item.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::AttemptsOverflow`] when the budget is spent,
    /// [`SessionError::DurationOverflow`] when a timeout already sealed the
    /// current item, and [`SessionError::IllegalState`] otherwise outside
    /// `Interacting`.
    pub fn begin_attempt(&mut self) -> Result<(), SessionError> {
        self.check_timed_out()?;
        self.require_interacting("begin_attempt")?;
        let item = self.current_route_item()?.clone();
        self.ensure_session(&item)?;
        let session = self.require_session_mut(&item)?;
        session.begin_attempt()?;
        for (scope, _) in &item.scopes {
            self.durations.open(scope.clone(), self.now);
        }
        Ok(())
    }

    /// Ends the current attempt with the supplied responses.
    ///
    /// Under individual submission the responses are bound and scored
    /// immediately; under simultaneous submission they are validated, staged,
    /// and scored when the test part is left. `force_late_submission`
    /// bypasses maximum-time checks for this submission only.
    ///
    /// # Errors
    ///
    /// Returns duration, validation, and skipping errors per the timing and
    /// session-control rules; duration errors commit accumulated durations.
    /// A submission against a scope a timeout already sealed reports
    /// [`SessionError::DurationOverflow`] with that scope.
    pub fn end_attempt(
        &mut self,
        responses: Vec<(VariableId, Value)>,
        force_late_submission: bool,
    ) -> Result<(), SessionError> {
        self.check_timed_out()?;
        self.require_interacting("end_attempt")?;
        let position = self.route.position();
        let item = self.current_route_item()?.clone();
        if self.sessions.state(&item.item_id, item.occurrence) != SessionState::Interacting {
            return Err(SessionError::IllegalState {
                operation: "end_attempt",
                state: self.sessions.state(&item.item_id, item.occurrence),
            });
        }

        self.check_time_limits(&item, force_late_submission)?;

        {
            let session = self.require_session_mut(&item)?;
            session.check_skipping(&responses)?;
            session.validate_responses(&responses)?;
        }

        match item.submission_mode {
            SubmissionMode::Individual => {
                {
                    let session = self.require_session_mut(&item)?;
                    session.bind_responses(&responses)?;
                    session.complete_attempt()?;
                }
                self.durations.close_all(self.now);
                self.run_response_processing(&item.item_id, item.occurrence)?;
                self.run_outcome_processing()?;
            }
            SubmissionMode::Simultaneous => {
                {
                    let session = self.require_session_mut(&item)?;
                    session.suspend()?;
                }
                self.durations.close_all(self.now);
                self.pending.stage(item.item_id.clone(), item.occurrence, responses);
            }
        }

        // Modal feedback holds the cursor; move_next acknowledges it.
        if item.navigation_mode == NavigationMode::Linear
            && self.sessions.state(&item.item_id, item.occurrence) != SessionState::ModalFeedback
        {
            self.advance_from(position)?;
        }
        Ok(())
    }

    /// Skips the current item, ending the attempt without responses.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::SkippingForbidden`] when session control
    /// disallows skipping and [`SessionError::IllegalState`] without an
    /// attempt in progress.
    pub fn skip(&mut self) -> Result<(), SessionError> {
        self.require_interacting("skip")?;
        let position = self.route.position();
        let item = self.current_route_item()?.clone();
        if !item.session_control.allow_skipping {
            return Err(SessionError::SkippingForbidden {
                item: item.item_id.to_string(),
            });
        }
        {
            let session = self.require_session_mut(&item)?;
            session.complete_attempt()?;
        }
        self.durations.close_all(self.now);
        if item.navigation_mode == NavigationMode::Linear {
            self.advance_from(position)?;
        }
        Ok(())
    }

    /// Force-closes the current item session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::OutOfBounds`] when the route is exhausted.
    pub fn end_item_session(&mut self) -> Result<(), SessionError> {
        self.require_interacting("end_item_session")?;
        let item = self.current_route_item()?.clone();
        self.ensure_session(&item)?;
        if let Some(session) = self.sessions.get_mut(&item.item_id, item.occurrence) {
            session.close();
        }
        self.durations.close_all(self.now);
        Ok(())
    }

    // ========================================================================
    // SECTION: Review and Solution
    // ========================================================================

    /// Enters review on the current item.
    ///
    /// # Errors
    ///
    /// Propagates the item session's permission and state checks.
    pub fn review_item(&mut self) -> Result<(), SessionError> {
        let item = self.current_route_item()?.clone();
        let session = self.require_session_mut(&item)?;
        session.review()?;
        Ok(())
    }

    /// Shows the model solution on the current item.
    ///
    /// # Errors
    ///
    /// Propagates the item session's permission and state checks.
    pub fn show_item_solution(&mut self) -> Result<(), SessionError> {
        let item = self.current_route_item()?.clone();
        let session = self.require_session_mut(&item)?;
        session.show_solution()?;
        Ok(())
    }

    /// Leaves review or solution on the current item.
    ///
    /// # Errors
    ///
    /// Propagates the item session's state checks.
    pub fn exit_item_review(&mut self) -> Result<(), SessionError> {
        let item = self.current_route_item()?.clone();
        let session = self.require_session_mut(&item)?;
        session.exit_review()?;
        Ok(())
    }

    // ========================================================================
    // SECTION: Navigation
    // ========================================================================

    /// Moves to the next deliverable item.
    ///
    /// Suspends an in-progress attempt, acknowledges modal feedback,
    /// evaluates branch rules on leave (linear), and preconditions on
    /// arrival (linear or forced).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::OutOfBounds`] when the route is exhausted and
    /// propagates condition evaluation failures.
    pub fn move_next(&mut self) -> Result<(), SessionError> {
        self.require_interacting("move_next")?;
        let position = self.route.position();
        let _ = self.current_route_item()?;
        self.suspend_current_item()?;
        self.durations.close_all(self.now);
        self.advance_from(position)
    }

    /// Moves back one position within the current test part.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NavigationMode`] under linear navigation and
    /// [`SessionError::OutOfBounds`] at the first item of the part.
    pub fn move_back(&mut self) -> Result<(), SessionError> {
        self.require_interacting("move_back")?;
        let item = self.current_route_item()?.clone();
        if item.navigation_mode != NavigationMode::Nonlinear {
            return Err(SessionError::NavigationMode {
                operation: "move_back",
            });
        }
        let position = self.route.position();
        if position == 0 {
            return Err(SessionError::OutOfBounds {
                detail: "no previous route item".to_string(),
            });
        }
        let target = position - 1;
        let previous = self.route.item(target).cloned().ok_or_else(|| SessionError::OutOfBounds {
            detail: format!("no route item at position {target}"),
        })?;
        if previous.part_id != item.part_id {
            return Err(SessionError::OutOfBounds {
                detail: "previous item belongs to another test part".to_string(),
            });
        }
        self.suspend_current_item()?;
        self.durations.close_all(self.now);
        self.route.set_position(target);
        self.ensure_session(&previous)?;
        Ok(())
    }

    /// Jumps to a route position within the current test part.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NavigationMode`] under linear navigation and
    /// [`SessionError::OutOfBounds`] for positions outside the part.
    pub fn jump_to(&mut self, position: usize) -> Result<(), SessionError> {
        self.require_interacting("jump_to")?;
        let item = self.current_route_item()?.clone();
        if item.navigation_mode != NavigationMode::Nonlinear {
            return Err(SessionError::NavigationMode {
                operation: "jump_to",
            });
        }
        let target = self.route.item(position).cloned().ok_or_else(|| {
            SessionError::OutOfBounds {
                detail: format!("no route item at position {position}"),
            }
        })?;
        if target.part_id != item.part_id {
            return Err(SessionError::OutOfBounds {
                detail: "jump target belongs to another test part".to_string(),
            });
        }
        if self.config.force_preconditions && !self.preconditions_hold(&target)? {
            return Err(SessionError::OutOfBounds {
                detail: format!("precondition excludes item {}", target.item_id),
            });
        }
        self.suspend_current_item()?;
        self.durations.close_all(self.now);
        self.route.set_position(position);
        self.ensure_session(&target)?;
        Ok(())
    }

    // ========================================================================
    // SECTION: Aggregation Queries
    // ========================================================================

    /// Counts route items selected for delivery that pass the filter.
    #[must_use]
    pub fn number_selected(&self, filter: &AggregateFilter) -> usize {
        self.route.items().iter().filter(|item| filter.matches(item)).count()
    }

    /// Counts filtered items the candidate has attempted at least once.
    #[must_use]
    pub fn number_presented(&self, filter: &AggregateFilter) -> usize {
        self.filtered_sessions(filter).filter(|session| session.attempts() > 0).count()
    }

    /// Counts filtered items with any non-default response.
    #[must_use]
    pub fn number_responded(&self, filter: &AggregateFilter) -> usize {
        self.filtered_sessions(filter).filter(|session| session.is_responded()).count()
    }

    /// Counts filtered items whose responses match every declared correct value.
    #[must_use]
    pub fn number_correct(&self, filter: &AggregateFilter) -> usize {
        self.filtered_sessions(filter).filter(|session| session.variables().is_correct()).count()
    }

    /// Counts filtered, attempted items with a declared correct value not met.
    #[must_use]
    pub fn number_incorrect(&self, filter: &AggregateFilter) -> usize {
        self.filtered_sessions(filter)
            .filter(|session| {
                session.attempts() > 0
                    && session
                        .variables()
                        .response_declarations()
                        .any(|declaration| declaration.correct.is_some())
                    && !session.variables().is_correct()
            })
            .count()
    }

    // ========================================================================
    // SECTION: Internal Navigation
    // ========================================================================

    /// Requires the test session to be `Interacting`.
    fn require_interacting(&self, operation: &'static str) -> Result<(), SessionError> {
        if self.state == SessionState::Interacting {
            Ok(())
        } else {
            Err(SessionError::IllegalState {
                operation,
                state: self.state,
            })
        }
    }

    /// Returns the route item under the cursor or an out-of-bounds error.
    fn current_route_item(&self) -> Result<&RouteItem, SessionError> {
        self.route.current().ok_or_else(|| SessionError::OutOfBounds {
            detail: "route is exhausted".to_string(),
        })
    }

    /// Suspends or acknowledges the current item session when needed.
    fn suspend_current_item(&mut self) -> Result<(), SessionError> {
        let Some(item) = self.route.current().cloned() else {
            return Ok(());
        };
        if let Some(session) = self.sessions.get_mut(&item.item_id, item.occurrence) {
            match session.state() {
                SessionState::Interacting => session.suspend()?,
                SessionState::ModalFeedback => session.acknowledge_feedback()?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Leaves `position`, evaluating branch rules, and arrives forward.
    fn advance_from(&mut self, position: usize) -> Result<(), SessionError> {
        let Some(item) = self.route.item(position).cloned() else {
            return self.goto(None, position + 1);
        };
        let mut destination = position + 1;
        if item.navigation_mode == NavigationMode::Linear {
            let namespace = self.namespace();
            for (index, rule) in item.branch_rules.iter().enumerate() {
                if self.processing.evaluate_condition(&rule.condition, &namespace)? {
                    destination =
                        self.route.branch_destination(position, index).unwrap_or(destination);
                    break;
                }
            }
        }
        self.goto(Some(item.part_id), destination)
    }

    /// Arrives at the first deliverable position at or after `destination`.
    ///
    /// Skips items whose preconditions evaluate false, handles test-part
    /// exit, and finishes the session when the route is exhausted.
    fn goto(
        &mut self,
        from_part: Option<TestPartId>,
        destination: usize,
    ) -> Result<(), SessionError> {
        let end = self.route.len();
        let mut position = destination.min(end);
        while position < end {
            let Some(item) = self.route.item(position).cloned() else {
                break;
            };
            let applies = item.navigation_mode == NavigationMode::Linear
                || self.config.force_preconditions;
            if !applies || item.preconditions.is_empty() || self.preconditions_hold(&item)? {
                break;
            }
            position += 1;
        }

        let new_part = self.route.item(position).map(|item| item.part_id.clone());
        if let Some(from) = from_part {
            if new_part.as_ref() != Some(&from) {
                self.exit_part(&from)?;
            }
        }
        self.route.set_position(position);
        if position >= end {
            self.finish()
        } else {
            let item = self.route.item(position).cloned();
            if let Some(item) = item {
                self.ensure_session(&item)?;
            }
            Ok(())
        }
    }

    /// Evaluates every precondition of a route item.
    fn preconditions_hold(&self, item: &RouteItem) -> Result<bool, SessionError> {
        let namespace = self.namespace();
        for condition in &item.preconditions {
            if !self.processing.evaluate_condition(condition, &namespace)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Flushes pending responses and closes every session of a test part.
    fn exit_part(&mut self, part_id: &TestPartId) -> Result<(), SessionError> {
        let order: Vec<(ItemId, u32)> = self
            .route
            .positions_in_part(part_id)
            .into_iter()
            .filter_map(|position| self.route.item(position))
            .map(|item| (item.item_id.clone(), item.occurrence))
            .collect();

        let drained = self.pending.drain_in_order(&order);
        let scored = !drained.is_empty();
        for (item_id, occurrence, responses) in drained {
            {
                let session = self.sessions.get_mut(&item_id, occurrence).ok_or_else(|| {
                    SessionError::OutOfBounds {
                        detail: format!("no session for staged item {item_id}"),
                    }
                })?;
                session.bind_responses(&responses)?;
            }
            self.run_response_processing(&item_id, occurrence)?;
        }
        if scored {
            self.run_outcome_processing()?;
        }

        for (item_id, occurrence) in &order {
            if let Some(session) = self.sessions.get_mut(item_id, *occurrence) {
                session.close();
            }
        }
        Ok(())
    }

    /// Finalizes the session: closes everything, scores, submits, closes.
    fn finish(&mut self) -> Result<(), SessionError> {
        self.durations.close_all(self.now);
        for session in self.sessions.iter_mut() {
            session.close();
        }
        self.run_outcome_processing()?;
        if self.config.result_policy == ResultPolicy::AtEndOfSession {
            self.submit_results()?;
        }
        self.state = SessionState::Closed;
        Ok(())
    }

    // ========================================================================
    // SECTION: Timing Enforcement
    // ========================================================================

    /// Validates the current item's time limits before a submission commits.
    fn check_time_limits(
        &mut self,
        item: &RouteItem,
        force_late_submission: bool,
    ) -> Result<(), SessionError> {
        let Some((item_scope, item_limits)) = item.scopes.first().cloned() else {
            return Ok(());
        };
        let elapsed = self.durations.elapsed(&item_scope, self.now);

        if item.navigation_mode == NavigationMode::Linear {
            if let Some(min) = item_limits.min_time {
                if elapsed < min {
                    if let Some(session) = self.sessions.get_mut(&item.item_id, item.occurrence) {
                        session.suspend()?;
                    }
                    self.durations.close_all(self.now);
                    return Err(SessionError::DurationUnderflow {
                        scope: item_scope,
                    });
                }
            }
        }

        if force_late_submission {
            return Ok(());
        }

        if let Some(max) = item_limits.max_time {
            if !item_limits.allow_late_submission && elapsed > max {
                if let Some(session) = self.sessions.get_mut(&item.item_id, item.occurrence) {
                    session.close();
                }
                self.durations.close_all(self.now);
                self.timed_out = Some(item_scope.clone());
                return Err(SessionError::DurationOverflow {
                    scope: item_scope,
                });
            }
        }

        for (scope, limits) in item.scopes.iter().skip(1) {
            if let Some(max) = limits.max_time {
                if !limits.allow_late_submission && self.durations.elapsed(scope, self.now) > max {
                    let scope = scope.clone();
                    self.force_close_scope(scope.clone());
                    return Err(SessionError::DurationOverflow {
                        scope,
                    });
                }
            }
        }
        Ok(())
    }

    /// Surfaces the timed-out scope that sealed the current item, if any.
    ///
    /// Timeout enforcement closes sessions eagerly when the clock advances;
    /// without this check a later submission would only see an illegal state
    /// and never learn which scope overran.
    fn check_timed_out(&self) -> Result<(), SessionError> {
        let Some(scope) = &self.timed_out else {
            return Ok(());
        };
        let Some(item) = self.route.current() else {
            return Ok(());
        };
        if item.scopes.iter().any(|(candidate, _)| candidate == scope)
            && self.sessions.state(&item.item_id, item.occurrence).is_terminal()
        {
            return Err(SessionError::DurationOverflow {
                scope: scope.clone(),
            });
        }
        Ok(())
    }

    /// Walks the current scope chain and force-closes the first timed-out scope.
    fn enforce_timeouts(&mut self) {
        if self.state != SessionState::Interacting {
            return;
        }
        let Some(item) = self.route.current().cloned() else {
            return;
        };
        for (scope, limits) in &item.scopes {
            let Some(max) = limits.max_time else {
                continue;
            };
            if limits.allow_late_submission {
                continue;
            }
            if self.durations.elapsed(scope, self.now) > max {
                self.force_close_scope(scope.clone());
                return;
            }
        }
    }

    /// Force-closes every item session within a timed-out scope.
    fn force_close_scope(&mut self, scope: Scope) {
        self.durations.close_all(self.now);
        let positions: Vec<usize> = match &scope {
            Scope::Test => (0..self.route.len()).collect(),
            Scope::TestPart {
                part_id,
            } => self.route.positions_in_part(part_id),
            Scope::Section {
                section_id,
            } => self
                .route
                .items()
                .iter()
                .enumerate()
                .filter(|(_, item)| item.sections.contains(section_id))
                .map(|(position, _)| position)
                .collect(),
            Scope::Item {
                item_id,
                occurrence,
            } => self.route.position_of(item_id, *occurrence).into_iter().collect(),
        };
        for position in positions {
            if let Some(item) = self.route.item(position).cloned() {
                if let Some(session) = self.sessions.get_mut(&item.item_id, item.occurrence) {
                    session.close();
                }
            }
        }
        if matches!(scope, Scope::Test) {
            self.state = SessionState::Closed;
        }
        self.timed_out = Some(scope);
    }

    // ========================================================================
    // SECTION: Processing and Results
    // ========================================================================

    /// Instantiates the session for a route item and runs template processing.
    fn instantiate_session(&mut self, item: &RouteItem) -> Result<(), SessionError> {
        if self.sessions.get(&item.item_id, item.occurrence).is_some() {
            return Ok(());
        }
        let (responses, outcomes) = self
            .spec
            .item_ref(&item.item_id)
            .map(|item_ref| (item_ref.responses.clone(), item_ref.outcomes.clone()))
            .unwrap_or_default();
        let namespace = self.namespace();
        let session = self.sessions.get_or_instantiate(item, &responses, &outcomes);
        self.processing.run_processing(
            ProcessingKind::Template,
            session.variables_mut(),
            &namespace,
        )?;
        Ok(())
    }

    /// Ensures the session for a route item exists (lazy instantiation).
    fn ensure_session(&mut self, item: &RouteItem) -> Result<(), SessionError> {
        self.instantiate_session(item)
    }

    /// Returns the item session for a route item or an out-of-bounds error.
    fn require_session_mut(
        &mut self,
        item: &RouteItem,
    ) -> Result<&mut ItemSession, SessionError> {
        let item_id = item.item_id.clone();
        let occurrence = item.occurrence;
        self.sessions.get_mut(&item_id, occurrence).ok_or_else(|| SessionError::OutOfBounds {
            detail: format!("no session for item {item_id}.{occurrence}"),
        })
    }

    /// Runs item response processing for one occurrence.
    fn run_response_processing(
        &mut self,
        item_id: &ItemId,
        occurrence: u32,
    ) -> Result<(), SessionError> {
        let namespace = self.namespace();
        if let Some(session) = self.sessions.get_mut(item_id, occurrence) {
            self.processing.run_processing(
                ProcessingKind::Response,
                session.variables_mut(),
                &namespace,
            )?;
        }
        Ok(())
    }

    /// Runs test outcome processing, submitting when the policy asks for it.
    fn run_outcome_processing(&mut self) -> Result<(), SessionError> {
        let namespace = self.namespace();
        self.processing.run_processing(
            ProcessingKind::Outcome,
            &mut self.test_variables,
            &namespace,
        )?;
        if self.config.result_policy == ResultPolicy::AtEachOutcomeProcessing {
            self.submit_results()?;
        }
        Ok(())
    }

    /// Submits the current test and item result snapshots.
    fn submit_results(&self) -> Result<(), SessionError> {
        let test = TestResult {
            session_id: self.config.session_id.clone(),
            test_id: self.spec.test_id.clone(),
            taken_at: self.now,
            variables: self
                .test_variables
                .values()
                .map(|(identifier, value)| (identifier.clone(), value.clone()))
                .collect(),
            duration: self.durations.elapsed(&Scope::Test, self.now),
        };
        let items: Vec<ItemResult> = self
            .route
            .items()
            .iter()
            .filter_map(|item| {
                self.sessions.get(&item.item_id, item.occurrence).map(|session| ItemResult {
                    item_id: item.item_id.clone(),
                    occurrence: item.occurrence,
                    state: session.state(),
                    attempts: session.attempts(),
                    variables: session
                        .variables()
                        .values()
                        .map(|(identifier, value)| (identifier.clone(), value.clone()))
                        .collect(),
                    duration: self.durations.elapsed(&item.item_scope(), self.now),
                })
            })
            .collect();
        self.submitter.submit(&test, &items)?;
        Ok(())
    }

    // ========================================================================
    // SECTION: Variable Namespace
    // ========================================================================

    /// Builds an owned snapshot of the dotted variable namespace.
    fn namespace(&self) -> NamespaceSnapshot {
        let mut entries: BTreeMap<String, Value> = BTreeMap::new();
        for (identifier, value) in self.test_variables.values() {
            entries.insert(identifier.to_string(), value.clone());
        }
        for item in self.route.items() {
            if let Some(session) = self.sessions.get(&item.item_id, item.occurrence) {
                for (identifier, value) in session.variables().values() {
                    entries.insert(
                        format!("{}.{}.{}", item.item_id, item.occurrence, identifier),
                        value.clone(),
                    );
                    if item.occurrence == 0 {
                        entries
                            .insert(format!("{}.{}", item.item_id, identifier), value.clone());
                    }
                }
            }
        }
        for item in self.route.items() {
            for (scope, _) in &item.scopes {
                let duration =
                    Value::Single(BaseValue::Duration(self.durations.elapsed(scope, self.now)));
                match scope {
                    Scope::Test => {
                        entries.insert(DURATION_VARIABLE.to_string(), duration);
                    }
                    Scope::TestPart {
                        part_id,
                    } => {
                        entries.insert(format!("{part_id}.{DURATION_VARIABLE}"), duration);
                    }
                    Scope::Section {
                        section_id,
                    } => {
                        entries.insert(format!("{section_id}.{DURATION_VARIABLE}"), duration);
                    }
                    Scope::Item {
                        item_id,
                        occurrence,
                    } => {
                        entries.insert(
                            format!("{item_id}.{occurrence}.{DURATION_VARIABLE}"),
                            duration.clone(),
                        );
                        if *occurrence == 0 {
                            entries.insert(format!("{item_id}.{DURATION_VARIABLE}"), duration);
                        }
                    }
                }
            }
        }
        NamespaceSnapshot {
            entries,
        }
    }

    /// Returns an iterator over sessions of filtered route items.
    fn filtered_sessions<'a>(
        &'a self,
        filter: &'a AggregateFilter,
    ) -> impl Iterator<Item = &'a ItemSession> + 'a {
        self.route
            .items()
            .iter()
            .filter(|item| filter.matches(item))
            .filter_map(|item| self.sessions.get(&item.item_id, item.occurrence))
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
    use crate::core::identifiers::SessionId;
    use crate::core::identifiers::TestId;
    use crate::core::spec::ItemRefSpec;
    use crate::core::spec::OrderingSpec;
    use crate::core::spec::SessionControl;
    use crate::core::spec::TestPartSpec;
    use crate::core::spec::TimeLimits;

    /// Evaluates JSON `true`/`false` constants; everything else holds.
    struct StubEngine;

    impl ProcessingEngine for StubEngine {
        fn evaluate_condition(
            &self,
            expression: &crate::core::spec::Expression,
            _state: &dyn VariableLookup,
        ) -> Result<bool, ProcessingError> {
            Ok(expression.source().as_bool().unwrap_or(true))
        }

        fn run_processing(
            &self,
            _kind: ProcessingKind,
            _variables: &mut VariableSet,
            _state: &dyn VariableLookup,
        ) -> Result<(), ProcessingError> {
            Ok(())
        }
    }

    /// Accepts every submission.
    struct StubSubmitter;

    impl ResultSubmitter for StubSubmitter {
        fn submit(&self, _test: &TestResult, _items: &[ItemResult]) -> Result<(), SubmitError> {
            Ok(())
        }
    }

    fn item_ref(id: &str) -> ItemRefSpec {
        ItemRefSpec {
            item_id: ItemId::new(id),
            fixed: false,
            adaptive: false,
            categories: Vec::new(),
            session_control: None,
            time_limits: TimeLimits::NONE,
            preconditions: Vec::new(),
            branch_rules: Vec::new(),
            responses: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    fn linear_test(items: &[&str]) -> TestSpec {
        TestSpec {
            test_id: TestId::new("test"),
            title: "test".to_string(),
            outcomes: Vec::new(),
            time_limits: TimeLimits::NONE,
            test_parts: vec![TestPartSpec {
                part_id: TestPartId::new("p1"),
                navigation_mode: NavigationMode::Linear,
                submission_mode: SubmissionMode::Individual,
                session_control: SessionControl::default(),
                time_limits: TimeLimits::NONE,
                preconditions: Vec::new(),
                sections: vec![crate::core::spec::SectionSpec {
                    section_id: crate::core::identifiers::SectionId::new("s1"),
                    title: "s1".to_string(),
                    visible: true,
                    keep_together: true,
                    selection: None,
                    ordering: OrderingSpec::default(),
                    time_limits: TimeLimits::NONE,
                    preconditions: Vec::new(),
                    branch_rules: Vec::new(),
                    parts: items
                        .iter()
                        .map(|id| crate::core::spec::SectionPart::ItemRef(item_ref(id)))
                        .collect(),
                }],
            }],
        }
    }

    fn session(spec: TestSpec) -> TestSession {
        TestSession::new(
            spec,
            SessionConfig::default(),
            Box::new(StubEngine),
            Box::new(StubSubmitter),
        )
        .unwrap()
    }

    #[test]
    fn eager_instantiation_creates_every_session() {
        let session = session(linear_test(&["i1", "i2", "i3"]));
        assert_eq!(session.item_state(&ItemId::new("i2"), 0), SessionState::Initial);
        assert_eq!(session.state(), SessionState::Initial);
    }

    #[test]
    fn linear_individual_walkthrough_closes_the_session() {
        let mut session = session(linear_test(&["i1", "i2"]));
        session.begin_test_session().unwrap();
        assert_eq!(session.state(), SessionState::Interacting);

        session.begin_attempt().unwrap();
        session.end_attempt(Vec::new(), false).unwrap();
        assert_eq!(session.route().position(), 1);

        session.begin_attempt().unwrap();
        session.end_attempt(Vec::new(), false).unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::Closed);
    }

    #[test]
    fn snapshot_restore_rejects_a_different_spec() {
        let session = session(linear_test(&["i1", "i2"]));
        let snapshot = session.snapshot();
        let other = linear_test(&["i1", "i2", "i3"]);
        let restored = TestSession::restore(
            other,
            Box::new(StubEngine),
            Box::new(StubSubmitter),
            snapshot,
        );
        assert!(matches!(restored, Err(SessionError::SpecMismatch)));
    }

    #[test]
    fn snapshot_restore_resumes_the_same_spec() {
        let mut session = session(linear_test(&["i1", "i2"]));
        session.begin_test_session().unwrap();
        session.begin_attempt().unwrap();
        session.end_attempt(Vec::new(), false).unwrap();
        let snapshot = session.snapshot();

        let mut restored = TestSession::restore(
            linear_test(&["i1", "i2"]),
            Box::new(StubEngine),
            Box::new(StubSubmitter),
            snapshot,
        )
        .unwrap();
        assert_eq!(restored.route().position(), 1);
        restored.begin_attempt().unwrap();
        restored.end_attempt(Vec::new(), false).unwrap();
        assert_eq!(restored.state(), SessionState::Closed);
    }

    #[test]
    fn session_id_flows_from_config() {
        let config = SessionConfig {
            session_id: SessionId::new("candidate-7"),
            ..SessionConfig::default()
        };
        let session = TestSession::new(
            linear_test(&["i1"]),
            config,
            Box::new(StubEngine),
            Box::new(StubSubmitter),
        )
        .unwrap();
        assert_eq!(session.config().session_id.as_str(), "candidate-7");
    }
}
