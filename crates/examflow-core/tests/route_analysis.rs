// crates/examflow-core/tests/route_analysis.rs
// ============================================================================
// Module: Route Analysis Tests
// Description: Route enumeration against actual session traversals.
// ============================================================================
//! ## Overview
//! Checks that static route enumeration covers branch and precondition
//! decisions and that a live session replays one of the enumerated routes.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

use examflow_core::BranchRuleSpec;
use examflow_core::BranchTarget;
use examflow_core::Expression;
use examflow_core::ItemId;
use examflow_core::ItemRefSpec;
use examflow_core::ItemResult;
use examflow_core::NavigationMode;
use examflow_core::OrderingSpec;
use examflow_core::ProcessingEngine;
use examflow_core::ProcessingError;
use examflow_core::ProcessingKind;
use examflow_core::ResultSubmitter;
use examflow_core::RouteCountMode;
use examflow_core::SectionId;
use examflow_core::SectionPart;
use examflow_core::SectionSpec;
use examflow_core::SessionConfig;
use examflow_core::SessionControl;
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
use examflow_core::VariableLookup;
use examflow_core::VariableSet;

/// Evaluates JSON boolean payloads literally.
struct LiteralEngine;

impl ProcessingEngine for LiteralEngine {
    fn evaluate_condition(
        &self,
        expression: &Expression,
        _state: &dyn VariableLookup,
    ) -> Result<bool, ProcessingError> {
        Ok(expression.source().as_bool().unwrap_or(false))
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

fn spec_with(items: Vec<ItemRefSpec>) -> TestSpec {
    TestSpec {
        test_id: TestId::new("analysis-test"),
        title: "analysis".to_string(),
        outcomes: Vec::new(),
        time_limits: TimeLimits::NONE,
        test_parts: vec![TestPartSpec {
            part_id: TestPartId::new("p1"),
            navigation_mode: NavigationMode::Linear,
            submission_mode: SubmissionMode::Individual,
            session_control: SessionControl::default(),
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
    TestSession::new(
        spec,
        SessionConfig::default(),
        Box::new(LiteralEngine),
        Box::new(NullSubmitter),
    )
    .unwrap()
}

fn branch(taken: bool, target: &str) -> BranchRuleSpec {
    BranchRuleSpec {
        condition: Expression::new(serde_json::json!(taken)),
        target: BranchTarget::Item {
            item_id: ItemId::new(target),
        },
    }
}

#[test]
fn branch_and_precondition_enumeration_counts() {
    let mut first = item_ref("i1");
    first.branch_rules.push(branch(false, "i4"));
    let mut third = item_ref("i3");
    third.preconditions.push(Expression::new(serde_json::json!(true)));
    let spec = spec_with(vec![first, item_ref("i2"), third, item_ref("i4")]);
    let session = session(spec);

    // Branch taken or not (2) times precondition held or not (2).
    let routes = session.route().possible_routes();
    assert!(routes.contains(&vec![0, 1, 2, 3]));
    assert!(routes.contains(&vec![0, 1, 3]));
    assert!(routes.contains(&vec![0, 3]));
    assert_eq!(routes.len(), 3);
    assert_eq!(session.route_count(RouteCountMode::All), 3);
    assert_eq!(session.route_count(RouteCountMode::Shortest), 1);
    assert_eq!(session.route_count(RouteCountMode::Longest), 1);
}

#[test]
fn taken_branch_replays_an_enumerated_route() {
    let mut first = item_ref("i1");
    first.branch_rules.push(branch(true, "i3"));
    let spec = spec_with(vec![first, item_ref("i2"), item_ref("i3")]);
    let mut session = session(spec);
    let enumerated = session.route().possible_routes();

    session.begin_test_session().unwrap();
    let mut visited = vec![session.route().position()];
    while session.state() == SessionState::Interacting {
        session.begin_attempt().unwrap();
        session.end_attempt(Vec::new(), false).unwrap();
        if session.state() == SessionState::Interacting {
            visited.push(session.route().position());
        }
    }

    assert_eq!(visited, vec![0, 2]);
    assert!(enumerated.contains(&visited));
    // The skipped item was never presented.
    assert_eq!(session.item_session(&ItemId::new("i2"), 0).unwrap().attempts(), 0);
}

#[test]
fn false_precondition_skips_the_item_on_arrival() {
    let mut second = item_ref("i2");
    second.preconditions.push(Expression::new(serde_json::json!(false)));
    let spec = spec_with(vec![item_ref("i1"), second, item_ref("i3")]);
    let mut session = session(spec);

    session.begin_test_session().unwrap();
    session.begin_attempt().unwrap();
    session.end_attempt(Vec::new(), false).unwrap();
    assert_eq!(session.route().position(), 2);
}

#[test]
fn exit_test_branch_finishes_the_session() {
    let mut first = item_ref("i1");
    first.branch_rules.push(BranchRuleSpec {
        condition: Expression::new(serde_json::json!(true)),
        target: BranchTarget::ExitTest,
    });
    let spec = spec_with(vec![first, item_ref("i2"), item_ref("i3")]);
    let mut session = session(spec);

    session.begin_test_session().unwrap();
    session.begin_attempt().unwrap();
    session.end_attempt(Vec::new(), false).unwrap();
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.item_state(&ItemId::new("i3"), 0), SessionState::Closed);
}

#[test]
fn first_true_branch_rule_wins() {
    let mut first = item_ref("i1");
    first.branch_rules.push(branch(false, "i2"));
    first.branch_rules.push(branch(true, "i3"));
    first.branch_rules.push(branch(true, "i4"));
    let spec = spec_with(vec![first, item_ref("i2"), item_ref("i3"), item_ref("i4")]);
    let mut session = session(spec);

    session.begin_test_session().unwrap();
    session.begin_attempt().unwrap();
    session.end_attempt(Vec::new(), false).unwrap();
    assert_eq!(session.route().position(), 2);
}
