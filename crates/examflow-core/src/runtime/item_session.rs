// crates/examflow-core/src/runtime/item_session.rs
// ============================================================================
// Module: Examflow Item Session
// Description: Per-occurrence item session state machine.
// Purpose: Track attempts, responses, and lifecycle state for one item occurrence.
// Dependencies: crate::core, regex, serde, thiserror
// ============================================================================

//! ## Overview
//! Each item occurrence on the route owns one item session: a state machine
//! over `Initial -> Interacting -> ModalFeedback/Suspended -> Closed ->
//! Review/Solution` with an attempt budget from its effective session
//! control. Transitions validate fully before mutating; a rejected operation
//! leaves the session untouched. Response binding validates declared
//! identifiers, cardinality, occurrence constraints, and pattern masks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::ItemId;
use crate::core::identifiers::VariableId;
use crate::core::spec::SessionControl;
use crate::core::state::SessionState;
use crate::core::value::BaseValue;
use crate::core::value::Value;
use crate::core::variables::CompletionStatus;
use crate::core::variables::OutcomeDeclaration;
use crate::core::variables::ResponseDeclaration;
use crate::core::variables::VariableSet;
use crate::core::variables::COMPLETION_STATUS;
use crate::runtime::route::RouteItem;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Item session operation errors.
///
/// # Invariants
/// - A returned error implies the session state is unchanged.
#[derive(Debug, Error)]
pub enum ItemSessionError {
    /// No attempts remain in the session's budget.
    #[error("attempts exhausted for item {item}")]
    AttemptsExhausted {
        /// Item identifier.
        item: String,
    },
    /// Operation is not legal in the current state.
    #[error("operation {operation} illegal for item {item} in state {state:?}")]
    IllegalState {
        /// Item identifier.
        item: String,
        /// Current session state.
        state: SessionState,
        /// Attempted operation name.
        operation: &'static str,
    },
    /// Review is not permitted by session control.
    #[error("review forbidden for item {item}")]
    ReviewForbidden {
        /// Item identifier.
        item: String,
    },
    /// Showing the solution is not permitted by session control.
    #[error("solution forbidden for item {item}")]
    SolutionForbidden {
        /// Item identifier.
        item: String,
    },
    /// Ending with all responses at defaults while skipping is forbidden.
    #[error("skipping forbidden for item {item}")]
    SkippingForbidden {
        /// Item identifier.
        item: String,
    },
    /// A bound response names an undeclared variable.
    #[error("undeclared response variable {identifier} for item {item}")]
    UndeclaredResponse {
        /// Item identifier.
        item: String,
        /// Offending variable identifier.
        identifier: String,
    },
    /// A bound response violates its declaration or constraint.
    #[error("invalid response {identifier} for item {item}: {reason}")]
    InvalidResponse {
        /// Item identifier.
        item: String,
        /// Offending variable identifier.
        identifier: String,
        /// Violation description.
        reason: String,
    },
}

// ============================================================================
// SECTION: Item Session
// ============================================================================

/// State machine for one item occurrence.
///
/// # Invariants
/// - `attempts` counts begun attempts; it increments in `begin_attempt` and
///   never decrements.
/// - Adaptive items ignore the attempt budget and close only when their
///   `completionStatus` outcome reports completed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemSession {
    /// Item identifier.
    item_id: ItemId,
    /// Occurrence index.
    occurrence: u32,
    /// Current lifecycle state.
    state: SessionState,
    /// Number of attempts begun so far.
    attempts: u32,
    /// Effective session control.
    control: SessionControl,
    /// Whether the referenced item is adaptive.
    adaptive: bool,
    /// State to resume to after leaving review or solution.
    resume_from: Option<SessionState>,
    /// Declared variables with current values.
    variables: VariableSet,
}

impl ItemSession {
    /// Instantiates a session for a route item in the `Initial` state.
    #[must_use]
    pub fn instantiate(
        route_item: &RouteItem,
        responses: impl IntoIterator<Item = ResponseDeclaration>,
        outcomes: impl IntoIterator<Item = OutcomeDeclaration>,
    ) -> Self {
        let mut session = Self {
            item_id: route_item.item_id.clone(),
            occurrence: route_item.occurrence,
            state: SessionState::Initial,
            attempts: 0,
            control: route_item.session_control,
            adaptive: route_item.adaptive,
            resume_from: None,
            variables: VariableSet::new(responses, outcomes),
        };
        session.set_completion_status(CompletionStatus::NotAttempted);
        session
    }

    /// Returns the item identifier.
    #[must_use]
    pub const fn item_id(&self) -> &ItemId {
        &self.item_id
    }

    /// Returns the occurrence index.
    #[must_use]
    pub const fn occurrence(&self) -> u32 {
        self.occurrence
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns the number of attempts begun so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the effective session control.
    #[must_use]
    pub const fn control(&self) -> &SessionControl {
        &self.control
    }

    /// Returns the declared variables with current values.
    #[must_use]
    pub const fn variables(&self) -> &VariableSet {
        &self.variables
    }

    /// Returns mutable access to the variables for processing passes.
    pub fn variables_mut(&mut self) -> &mut VariableSet {
        &mut self.variables
    }

    /// Returns the attempts remaining, or `None` for an unlimited budget.
    ///
    /// Adaptive items and `max_attempts == 0` both mean unlimited.
    #[must_use]
    pub const fn remaining_attempts(&self) -> Option<u32> {
        if self.adaptive || self.control.max_attempts == 0 {
            None
        } else {
            Some(self.control.max_attempts.saturating_sub(self.attempts))
        }
    }

    /// Returns true when another attempt may begin.
    #[must_use]
    pub const fn is_attemptable(&self) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        match self.remaining_attempts() {
            None => true,
            Some(remaining) => remaining > 0,
        }
    }

    /// Returns true when any response differs from its declared default.
    #[must_use]
    pub fn is_responded(&self) -> bool {
        self.variables.is_responded()
    }

    // ========================================================================
    // SECTION: Attempt Lifecycle
    // ========================================================================

    /// Begins an attempt, counting it against the budget.
    ///
    /// A spent budget reports [`ItemSessionError::AttemptsExhausted`] even
    /// from a terminal state, so callers see why the session is no longer
    /// attemptable rather than just that it is closed.
    ///
    /// # Errors
    ///
    /// Returns [`ItemSessionError::AttemptsExhausted`] when the budget is
    /// spent and [`ItemSessionError::IllegalState`] outside
    /// `Initial`/`Suspended`.
    pub fn begin_attempt(&mut self) -> Result<(), ItemSessionError> {
        if self.remaining_attempts() == Some(0) {
            return Err(ItemSessionError::AttemptsExhausted {
                item: self.item_id.to_string(),
            });
        }
        match self.state {
            SessionState::Initial | SessionState::Suspended => {}
            state => {
                return Err(ItemSessionError::IllegalState {
                    item: self.item_id.to_string(),
                    state,
                    operation: "begin_attempt",
                })
            }
        }
        self.attempts += 1;
        self.state = SessionState::Interacting;
        self.set_completion_status(CompletionStatus::Unknown);
        Ok(())
    }

    /// Validates candidate responses without mutating any value.
    ///
    /// # Errors
    ///
    /// Returns [`ItemSessionError::UndeclaredResponse`] or
    /// [`ItemSessionError::InvalidResponse`].
    pub fn validate_responses(
        &self,
        responses: &[(VariableId, Value)],
    ) -> Result<(), ItemSessionError> {
        for (identifier, value) in responses {
            let Some(declaration) = self.variables.response_declaration(identifier) else {
                return Err(ItemSessionError::UndeclaredResponse {
                    item: self.item_id.to_string(),
                    identifier: identifier.to_string(),
                });
            };
            if !value.matches_cardinality(declaration.cardinality) {
                return Err(self.invalid_response(identifier, "cardinality mismatch"));
            }
            if self.control.validate_responses {
                self.validate_constraint(declaration, identifier, value)?;
            }
        }
        Ok(())
    }

    /// Binds candidate responses, validating every one before mutating.
    ///
    /// # Errors
    ///
    /// Returns [`ItemSessionError::UndeclaredResponse`] or
    /// [`ItemSessionError::InvalidResponse`]; on error no value is written.
    pub fn bind_responses(
        &mut self,
        responses: &[(VariableId, Value)],
    ) -> Result<(), ItemSessionError> {
        self.validate_responses(responses)?;
        for (identifier, value) in responses {
            self.variables.set_value(identifier, value.clone());
        }
        Ok(())
    }

    /// Returns true when every bound response still equals its default.
    #[must_use]
    pub fn is_skip(&self, responses: &[(VariableId, Value)]) -> bool {
        responses
            .iter()
            .all(|(identifier, value)| self.variables.is_default_response(identifier, value))
    }

    /// Rejects a skipping submission when session control forbids it.
    ///
    /// # Errors
    ///
    /// Returns [`ItemSessionError::SkippingForbidden`] when `allow_skipping`
    /// is off and every response is at its default.
    pub fn check_skipping(&self, responses: &[(VariableId, Value)]) -> Result<(), ItemSessionError> {
        if !self.control.allow_skipping && self.is_skip(responses) {
            return Err(ItemSessionError::SkippingForbidden {
                item: self.item_id.to_string(),
            });
        }
        Ok(())
    }

    /// Completes the current attempt, moving to the post-attempt state.
    ///
    /// Moves to `ModalFeedback` when feedback is enabled, `Closed` when the
    /// budget is spent or an adaptive item reports completion, `Suspended`
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`ItemSessionError::IllegalState`] outside `Interacting`.
    pub fn complete_attempt(&mut self) -> Result<(), ItemSessionError> {
        if self.state != SessionState::Interacting {
            return Err(ItemSessionError::IllegalState {
                item: self.item_id.to_string(),
                state: self.state,
                operation: "complete_attempt",
            });
        }
        if self.control.show_feedback {
            self.state = SessionState::ModalFeedback;
        } else if self.budget_spent() {
            self.close_completed();
        } else {
            self.state = SessionState::Suspended;
        }
        Ok(())
    }

    /// Leaves modal feedback, closing when no attempts remain.
    ///
    /// # Errors
    ///
    /// Returns [`ItemSessionError::IllegalState`] outside `ModalFeedback`.
    pub fn acknowledge_feedback(&mut self) -> Result<(), ItemSessionError> {
        if self.state != SessionState::ModalFeedback {
            return Err(ItemSessionError::IllegalState {
                item: self.item_id.to_string(),
                state: self.state,
                operation: "acknowledge_feedback",
            });
        }
        if self.budget_spent() {
            self.close_completed();
        } else {
            self.state = SessionState::Suspended;
        }
        Ok(())
    }

    /// Suspends an in-progress attempt, preserving bound responses.
    ///
    /// # Errors
    ///
    /// Returns [`ItemSessionError::IllegalState`] outside
    /// `Interacting`/`ModalFeedback`.
    pub fn suspend(&mut self) -> Result<(), ItemSessionError> {
        match self.state {
            SessionState::Interacting | SessionState::ModalFeedback => {
                self.state = SessionState::Suspended;
                Ok(())
            }
            state => Err(ItemSessionError::IllegalState {
                item: self.item_id.to_string(),
                state,
                operation: "suspend",
            }),
        }
    }

    /// Closes the session regardless of remaining budget.
    ///
    /// Used by timeouts and test-part exit. Closing an already terminal
    /// session is a no-op.
    pub fn close(&mut self) {
        if !self.state.is_terminal() {
            if self.attempts == 0 {
                self.set_completion_status(CompletionStatus::NotAttempted);
            } else if self.state == SessionState::Interacting {
                self.set_completion_status(CompletionStatus::Incomplete);
            } else {
                self.set_completion_status(CompletionStatus::Completed);
            }
            self.state = SessionState::Closed;
        }
    }

    // ========================================================================
    // SECTION: Post-Closure States
    // ========================================================================

    /// Enters review from a closed or suspended session.
    ///
    /// # Errors
    ///
    /// Returns [`ItemSessionError::ReviewForbidden`] when session control
    /// disallows review and [`ItemSessionError::IllegalState`] when the
    /// session is neither closed nor suspended.
    pub fn review(&mut self) -> Result<(), ItemSessionError> {
        if !self.control.allow_review {
            return Err(ItemSessionError::ReviewForbidden {
                item: self.item_id.to_string(),
            });
        }
        match self.state {
            SessionState::Closed | SessionState::Suspended => {
                self.resume_from = Some(self.state);
                self.state = SessionState::Review;
                Ok(())
            }
            SessionState::Solution => {
                self.state = SessionState::Review;
                Ok(())
            }
            state => Err(ItemSessionError::IllegalState {
                item: self.item_id.to_string(),
                state,
                operation: "review",
            }),
        }
    }

    /// Shows the model solution from a closed or suspended session.
    ///
    /// # Errors
    ///
    /// Returns [`ItemSessionError::SolutionForbidden`] when session control
    /// disallows it and [`ItemSessionError::IllegalState`] when the session
    /// is neither closed, suspended, nor in review.
    pub fn show_solution(&mut self) -> Result<(), ItemSessionError> {
        if !self.control.show_solution {
            return Err(ItemSessionError::SolutionForbidden {
                item: self.item_id.to_string(),
            });
        }
        match self.state {
            SessionState::Closed | SessionState::Suspended => {
                self.resume_from = Some(self.state);
                self.state = SessionState::Solution;
                Ok(())
            }
            SessionState::Review => {
                self.state = SessionState::Solution;
                Ok(())
            }
            state => Err(ItemSessionError::IllegalState {
                item: self.item_id.to_string(),
                state,
                operation: "show_solution",
            }),
        }
    }

    /// Leaves review or solution, restoring the parked state.
    ///
    /// # Errors
    ///
    /// Returns [`ItemSessionError::IllegalState`] outside `Review`/`Solution`.
    pub fn exit_review(&mut self) -> Result<(), ItemSessionError> {
        match self.state {
            SessionState::Review | SessionState::Solution => {
                self.state = self.resume_from.take().unwrap_or(SessionState::Closed);
                Ok(())
            }
            state => Err(ItemSessionError::IllegalState {
                item: self.item_id.to_string(),
                state,
                operation: "exit_review",
            }),
        }
    }

    // ========================================================================
    // SECTION: Internal Helpers
    // ========================================================================

    /// Returns true when no further attempts remain after the current one.
    fn budget_spent(&self) -> bool {
        if self.adaptive {
            return self.adaptive_completed();
        }
        if self.control.max_attempts == 0 {
            return false;
        }
        self.attempts >= self.control.max_attempts
    }

    /// Returns true when an adaptive item reports completion.
    fn adaptive_completed(&self) -> bool {
        // Adaptive completion is driven by response processing writing the
        // reserved completionStatus outcome.
        matches!(
            self.completion_status_value(),
            Some(CompletionStatus::Completed)
        )
    }

    /// Closes after a completed attempt.
    fn close_completed(&mut self) {
        self.set_completion_status(CompletionStatus::Completed);
        self.state = SessionState::Closed;
    }

    /// Reads the reserved completion status outcome, when declared.
    fn completion_status_value(&self) -> Option<CompletionStatus> {
        match self.variables.value(&VariableId::new(COMPLETION_STATUS)) {
            Some(Value::Single(BaseValue::Identifier(status))) => match status.as_str() {
                "completed" => Some(CompletionStatus::Completed),
                "incomplete" => Some(CompletionStatus::Incomplete),
                "not_attempted" => Some(CompletionStatus::NotAttempted),
                _ => Some(CompletionStatus::Unknown),
            },
            _ => None,
        }
    }

    /// Writes the reserved completion status outcome, when declared.
    fn set_completion_status(&mut self, status: CompletionStatus) {
        let identifier = VariableId::new(COMPLETION_STATUS);
        let label = match status {
            CompletionStatus::NotAttempted => "not_attempted",
            CompletionStatus::Unknown => "unknown",
            CompletionStatus::Incomplete => "incomplete",
            CompletionStatus::Completed => "completed",
        };
        self.variables
            .set_value(&identifier, Value::Single(BaseValue::Identifier(label.to_string())));
    }

    /// Validates a response value against its declared constraint.
    fn validate_constraint(
        &self,
        declaration: &ResponseDeclaration,
        identifier: &VariableId,
        value: &Value,
    ) -> Result<(), ItemSessionError> {
        let Some(constraint) = &declaration.constraint else {
            return Ok(());
        };
        let count = value.occurrence_count();
        if let Some(min) = constraint.min_occurrences {
            if count < min {
                return Err(self.invalid_response(identifier, "too few values"));
            }
        }
        if let Some(max) = constraint.max_occurrences {
            if count > max {
                return Err(self.invalid_response(identifier, "too many values"));
            }
        }
        if let Some(pattern) = &constraint.pattern {
            // Patterns are validated at spec load; a failure here means the
            // spec bypassed validation.
            let mask = regex::Regex::new(pattern)
                .map_err(|err| self.invalid_response(identifier, &err.to_string()))?;
            for base in value.base_values() {
                if let Some(text) = base.as_text() {
                    if !mask.is_match(text) {
                        return Err(self.invalid_response(identifier, "pattern mismatch"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Builds an invalid-response error for an identifier.
    fn invalid_response(&self, identifier: &VariableId, reason: &str) -> ItemSessionError {
        ItemSessionError::InvalidResponse {
            item: self.item_id.to_string(),
            identifier: identifier.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
