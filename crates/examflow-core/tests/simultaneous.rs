// crates/examflow-core/tests/simultaneous.rs
// ============================================================================
// Module: Simultaneous Submission Tests
// Description: Pending-buffer staging and part-exit scoring order.
// ============================================================================
//! ## Overview
//! Under simultaneous submission, ending an attempt validates and stages
//! responses without scoring. These tests check that nothing is processed
//! until the test part is left, that the flush binds and scores in route
//! order, and that restaging replaces earlier responses.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

use std::sync::Arc;
use std::sync::Mutex;

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

/// Records every processing call, tagging response passes with the bound
/// RESPONSE value so tests can assert flush order.
struct RecordingEngine {
    /// Observed processing calls.
    calls: Arc<Mutex<Vec<String>>>,
}

impl ProcessingEngine for RecordingEngine {
    fn evaluate_condition(
        &self,
        _expression: &Expression,
        _state: &dyn VariableLookup,
    ) -> Result<bool, ProcessingError> {
        Ok(true)
    }

    fn run_processing(
        &self,
        kind: ProcessingKind,
        variables: &mut VariableSet,
        _state: &dyn VariableLookup,
    ) -> Result<(), ProcessingError> {
        let tag = match kind {
            ProcessingKind::Response => {
                let bound = variables
                    .value(&VariableId::new("RESPONSE"))
                    .and_then(|value| match value {
                        Value::Single(BaseValue::Identifier(text)) => Some(text.clone()),
                        _ => None,
                    })
                    .unwrap_or_default();
                format!("response:{bound}")
            }
            ProcessingKind::Outcome => "outcome".to_string(),
            ProcessingKind::Template => return Ok(()),
        };
        self.calls
            .lock()
            .map_err(|_| ProcessingError::Processing("poisoned".to_string()))?
            .push(tag);
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
        responses: vec![ResponseDeclaration {
            identifier: VariableId::new("RESPONSE"),
            cardinality: Cardinality::Single,
            default: Value::Null,
            correct: None,
            constraint: None,
        }],
        outcomes: Vec::new(),
    }
}

fn simultaneous_spec(navigation: NavigationMode, items: &[&str]) -> TestSpec {
    TestSpec {
        test_id: TestId::new("simultaneous-test"),
        title: "simultaneous".to_string(),
        outcomes: Vec::new(),
        time_limits: TimeLimits::NONE,
        test_parts: vec![TestPartSpec {
            part_id: TestPartId::new("p1"),
            navigation_mode: navigation,
            submission_mode: SubmissionMode::Simultaneous,
            session_control: SessionControl {
                max_attempts: 0,
                ..SessionControl::default()
            },
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
                parts: items.iter().map(|id| SectionPart::ItemRef(item_ref(id))).collect(),
            }],
        }],
    }
}

fn recording_session(spec: TestSpec) -> (TestSession, Arc<Mutex<Vec<String>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let engine = RecordingEngine {
        calls: Arc::clone(&calls),
    };
    let session =
        TestSession::new(spec, SessionConfig::default(), Box::new(engine), Box::new(NullSubmitter))
            .unwrap();
    (session, calls)
}

fn answer(text: &str) -> Vec<(VariableId, Value)> {
    vec![(VariableId::new("RESPONSE"), Value::Single(BaseValue::Identifier(text.to_string())))]
}

#[test]
fn staged_responses_are_not_scored_until_part_exit() {
    let spec = simultaneous_spec(NavigationMode::Linear, &["i1", "i2"]);
    let (mut session, calls) = recording_session(spec);
    session.begin_test_session().unwrap();

    session.begin_attempt().unwrap();
    session.end_attempt(answer("first"), false).unwrap();
    assert!(calls.lock().unwrap().is_empty());
    assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::Suspended);
    assert_eq!(session.snapshot().pending.len(), 1);

    // No value is bound while the submission is only staged.
    let staged = session.item_session(&ItemId::new("i1"), 0).unwrap();
    assert_eq!(staged.variables().value(&VariableId::new("RESPONSE")), Some(&Value::Null));

    session.begin_attempt().unwrap();
    session.end_attempt(answer("second"), false).unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    // Flush at part exit: responses in route order, then one outcome pass
    // plus the final pass when the session ends.
    let calls = calls.lock().unwrap();
    assert_eq!(
        calls.as_slice(),
        ["response:first", "response:second", "outcome", "outcome"]
    );
}

#[test]
fn flush_binds_the_latest_staging_per_item() {
    let spec = simultaneous_spec(NavigationMode::Nonlinear, &["i1", "i2"]);
    let (mut session, calls) = recording_session(spec);
    session.begin_test_session().unwrap();

    session.begin_attempt().unwrap();
    session.end_attempt(answer("draft"), false).unwrap();
    session.begin_attempt().unwrap();
    session.end_attempt(answer("final"), false).unwrap();
    assert_eq!(session.snapshot().pending.len(), 1);

    session.move_next().unwrap();
    session.begin_attempt().unwrap();
    session.end_attempt(answer("other"), false).unwrap();
    session.end_test_session().unwrap();

    let bound = session.item_session(&ItemId::new("i1"), 0).unwrap();
    assert_eq!(
        bound.variables().value(&VariableId::new("RESPONSE")),
        Some(&Value::Single(BaseValue::Identifier("final".to_string())))
    );
    let calls = calls.lock().unwrap();
    assert_eq!(
        calls.as_slice(),
        ["response:final", "response:other", "outcome", "outcome"]
    );
}

#[test]
fn invalid_responses_are_rejected_before_staging() {
    let spec = simultaneous_spec(NavigationMode::Linear, &["i1", "i2"]);
    let (mut session, _calls) = recording_session(spec);
    session.begin_test_session().unwrap();

    session.begin_attempt().unwrap();
    let wrong_shape = vec![(
        VariableId::new("RESPONSE"),
        Value::Multiple(vec![BaseValue::Identifier("a".to_string())]),
    )];
    assert!(matches!(
        session.end_attempt(wrong_shape, false),
        Err(SessionError::ResponseValidation { .. })
    ));
    assert!(session.snapshot().pending.is_empty());
    assert_eq!(session.item_state(&ItemId::new("i1"), 0), SessionState::Interacting);
}
