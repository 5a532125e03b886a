// crates/examflow-core/tests/attempt_lifecycle.rs
// ============================================================================
// Module: Attempt Lifecycle Tests
// Description: End-to-end attempt budgets, skipping, feedback, and review.
// ============================================================================
//! ## Overview
//! Drives whole test sessions through attempt lifecycles and checks the
//! budget, skipping, feedback, and review rules at the session surface.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

use examflow_core::AggregateFilter;
use examflow_core::BaseValue;
use examflow_core::Cardinality;
use examflow_core::Expression;
use examflow_core::ItemId;
use examflow_core::ItemRefSpec;
use examflow_core::ItemResult;
use examflow_core::NavigationMode;
use examflow_core::OrderingSpec;
use examflow_core::ProcessingEngine;
use examflow_core::ProcessingError;
use examflow_core::ProcessingKind;
use examflow_core::ResponseDeclaration;
use examflow_core::ResultSubmitter;
use examflow_core::SectionId;
use examflow_core::SectionPart;
use examflow_core::SectionSpec;
use examflow_core::SessionConfig;
use examflow_core::SessionControl;
use examflow_core::SessionError;
use examflow_core::SessionState;
use examflow_core::SubmissionMode;
use examflow_core::SubmitError;
use examflow_core::TestId;
use examflow_core::TestPartId;
use examflow_core::TestPartSpec;
use examflow_core::TestResult;
use examflow_core::TestSession;
use examflow_core::TestSpec;
use examflow_core::TimeLimits;
use examflow_core::Value;
use examflow_core::VariableId;
use examflow_core::VariableLookup;
use examflow_core::VariableSet;

struct PassEngine;

impl ProcessingEngine for PassEngine {
    fn evaluate_condition(
        &self,
        expression: &Expression,
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

struct NullSubmitter;

impl ResultSubmitter for NullSubmitter {
    fn submit(&self, _test: &TestResult, _items: &[ItemResult]) -> Result<(), SubmitError> {
        Ok(())
    }
}

fn response(identifier: &str, correct: Option<Value>) -> ResponseDeclaration {
    ResponseDeclaration {
        identifier: VariableId::new(identifier),
        cardinality: Cardinality::Single,
        default: Value::Null,
        correct,
        constraint: None,
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
        responses: vec![response("RESPONSE", None)],
        outcomes: Vec::new(),
    }
}

fn spec_with(
    navigation: NavigationMode,
    control: SessionControl,
    items: Vec<ItemRefSpec>,
) -> TestSpec {
    TestSpec {
        test_id: TestId::new("attempts-test"),
        title: "attempts".to_string(),
        outcomes: Vec::new(),
        time_limits: TimeLimits::NONE,
        test_parts: vec![TestPartSpec {
            part_id: TestPartId::new("p1"),
            navigation_mode: navigation,
            submission_mode: SubmissionMode::Individual,
            session_control: control,
            time_limits: TimeLimits::NONE,
            preconditions: Vec::new(),
            sections: vec![SectionSpec {
                section_id: SectionId::new("s1"),
                title: "s1".to_string(),
                visible: true,
                keep_together: true,
                selection: None,
                ordering: OrderingSpec::default(),
                time_limits: TimeLimits::NONE,
                preconditions: Vec::new(),
                branch_rules: Vec::new(),
                parts: items.into_iter().map(SectionPart::ItemRef).collect(),
            }],
        }],
    }
}

fn session(spec: TestSpec) -> TestSession {
    TestSession::new(spec, SessionConfig::default(), Box::new(PassEngine), Box::new(NullSubmitter))
        .unwrap()
}

fn answer(text: &str) -> Vec<(VariableId, Value)> {
    vec![(VariableId::new("RESPONSE"), Value::Single(BaseValue::Identifier(text.to_string())))]
}

#[test]
fn revisiting_an_exhausted_item_reports_attempts_overflow() {
    let control = SessionControl {
        max_attempts: 1,
        ..SessionControl::default()
    };
    let spec = spec_with(NavigationMode::Nonlinear, control, vec![item_ref("i1"), item_ref("i2")]);
    let mut session = session(spec);
    session.begin_test_session().unwrap();

    session.begin_attempt().unwrap();
    session.move_next().unwrap();
    assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::Suspended);

    session.jump_to(0).unwrap();
    assert!(matches!(session.begin_attempt(), Err(SessionError::AttemptsOverflow { .. })));
}

#[test]
fn second_attempt_on_a_closed_item_reports_attempts_overflow() {
    let control = SessionControl {
        max_attempts: 1,
        ..SessionControl::default()
    };
    let spec = spec_with(NavigationMode::Nonlinear, control, vec![item_ref("i1"), item_ref("i2")]);
    let mut session = session(spec);
    session.begin_test_session().unwrap();

    session.begin_attempt().unwrap();
    session.end_attempt(answer("a"), false).unwrap();
    assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::Closed);

    // The spent budget is reported, not just the terminal state.
    assert!(matches!(session.begin_attempt(), Err(SessionError::AttemptsOverflow { .. })));
}

#[test]
fn unlimited_budget_allows_repeated_attempts() {
    let control = SessionControl {
        max_attempts: 0,
        ..SessionControl::default()
    };
    let spec = spec_with(NavigationMode::Nonlinear, control, vec![item_ref("i1"), item_ref("i2")]);
    let mut session = session(spec);
    session.begin_test_session().unwrap();

    for _ in 0..5 {
        session.begin_attempt().unwrap();
        session.end_attempt(answer("a"), false).unwrap();
    }
    let item = session.item_session(&ItemId::new("i1"), 0).unwrap();
    assert_eq!(item.attempts(), 5);
    assert_eq!(item.remaining_attempts(), None);
}

#[test]
fn forbidden_skip_rejects_default_responses() {
    let control = SessionControl {
        allow_skipping: false,
        ..SessionControl::default()
    };
    let spec = spec_with(NavigationMode::Linear, control, vec![item_ref("i1"), item_ref("i2")]);
    let mut session = session(spec);
    session.begin_test_session().unwrap();

    session.begin_attempt().unwrap();
    assert!(matches!(
        session.end_attempt(Vec::new(), false),
        Err(SessionError::SkippingForbidden { .. })
    ));
    assert!(matches!(session.skip(), Err(SessionError::SkippingForbidden { .. })));

    // A real response is still accepted.
    session.end_attempt(answer("choice_a"), false).unwrap();
    assert_eq!(session.route().position(), 1);
}

#[test]
fn skip_ends_the_attempt_and_advances() {
    let spec = spec_with(
        NavigationMode::Linear,
        SessionControl::default(),
        vec![item_ref("i1"), item_ref("i2")],
    );
    let mut session = session(spec);
    session.begin_test_session().unwrap();

    session.begin_attempt().unwrap();
    session.skip().unwrap();
    assert_eq!(session.route().position(), 1);
    assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::Closed);
}

#[test]
fn modal_feedback_holds_the_cursor_until_acknowledged() {
    let control = SessionControl {
        show_feedback: true,
        ..SessionControl::default()
    };
    let spec = spec_with(NavigationMode::Linear, control, vec![item_ref("i1"), item_ref("i2")]);
    let mut session = session(spec);
    session.begin_test_session().unwrap();

    session.begin_attempt().unwrap();
    session.end_attempt(answer("a"), false).unwrap();
    assert_eq!(session.route().position(), 0);
    assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::ModalFeedback);

    session.move_next().unwrap();
    assert_eq!(session.route().position(), 1);
    assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::Closed);
}

#[test]
fn review_after_closure_honors_session_control() {
    let control = SessionControl {
        allow_review: true,
        show_solution: false,
        max_attempts: 1,
        ..SessionControl::default()
    };
    let spec = spec_with(NavigationMode::Nonlinear, control, vec![item_ref("i1"), item_ref("i2")]);
    let mut session = session(spec);
    session.begin_test_session().unwrap();

    session.begin_attempt().unwrap();
    session.end_attempt(answer("a"), false).unwrap();
    assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::Closed);

    session.review_item().unwrap();
    assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::Review);
    assert!(matches!(session.show_item_solution(), Err(SessionError::Item(_))));
    session.exit_item_review().unwrap();
    assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::Closed);
}

#[test]
fn aggregates_count_selected_presented_and_correct() {
    let mut scored = item_ref("i1");
    scored.responses = vec![response(
        "RESPONSE",
        Some(Value::Single(BaseValue::Identifier("right".to_string()))),
    )];
    let mut missed = item_ref("i2");
    missed.responses = vec![response(
        "RESPONSE",
        Some(Value::Single(BaseValue::Identifier("right".to_string()))),
    )];
    let spec = spec_with(
        NavigationMode::Linear,
        SessionControl::default(),
        vec![scored, missed, item_ref("i3")],
    );
    let mut session = session(spec);
    session.begin_test_session().unwrap();

    session.begin_attempt().unwrap();
    session.end_attempt(answer("right"), false).unwrap();
    session.begin_attempt().unwrap();
    session.end_attempt(answer("wrong"), false).unwrap();

    let filter = AggregateFilter::default();
    assert_eq!(session.number_selected(&filter), 3);
    assert_eq!(session.number_presented(&filter), 2);
    assert_eq!(session.number_responded(&filter), 2);
    assert_eq!(session.number_correct(&filter), 1);
    assert_eq!(session.number_incorrect(&filter), 1);
}

#[test]
fn category_filters_restrict_aggregates() {
    let mut tagged = item_ref("i1");
    tagged.categories = vec!["math".to_string()];
    let spec = spec_with(
        NavigationMode::Linear,
        SessionControl::default(),
        vec![tagged, item_ref("i2")],
    );
    let session = session(spec);

    let math = AggregateFilter {
        include_categories: vec!["math".to_string()],
        ..AggregateFilter::default()
    };
    assert_eq!(session.number_selected(&math), 1);

    let not_math = AggregateFilter {
        exclude_categories: vec!["math".to_string()],
        ..AggregateFilter::default()
    };
    assert_eq!(session.number_selected(&not_math), 1);

    let in_section = AggregateFilter {
        section: Some(SectionId::new("s1")),
        ..AggregateFilter::default()
    };
    assert_eq!(session.number_selected(&in_section), 2);
}
