// crates/examflow-core/tests/selection_ordering.rs
// ============================================================================
// Module: Selection and Ordering Tests
// Description: Seeded selection, shuffling, and occurrence numbering.
// ============================================================================
//! ## Overview
//! Checks that the shuffle seed fully determines the resolved route, that
//! selection with replacement numbers repeated occurrences densely, and that
//! fixed item references keep their declared slots under shuffling.

#![allow(clippy::unwrap_used, reason = "Tests use unwrap on deterministic fixtures.")]

use std::collections::BTreeMap;

use examflow_core::resolve_test;
use examflow_core::ItemId;
use examflow_core::ItemRefSpec;
use examflow_core::OrderingSpec;
use examflow_core::SectionId;
use examflow_core::SectionPart;
use examflow_core::SectionSpec;
use examflow_core::SelectionSpec;
use examflow_core::SessionControl;
use examflow_core::SubmissionMode;
use examflow_core::NavigationMode;
use examflow_core::TestId;
use examflow_core::TestPartId;
use examflow_core::TestPartSpec;
use examflow_core::TestSpec;
use examflow_core::TimeLimits;

fn item_ref(id: &str, fixed: bool) -> ItemRefSpec {
    ItemRefSpec {
        item_id: ItemId::new(id),
        fixed,
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

fn spec_with_section(section: SectionSpec) -> TestSpec {
    TestSpec {
        test_id: TestId::new("selection-test"),
        title: "selection".to_string(),
        outcomes: Vec::new(),
        time_limits: TimeLimits::NONE,
        test_parts: vec![TestPartSpec {
            part_id: TestPartId::new("p1"),
            navigation_mode: NavigationMode::Linear,
            submission_mode: SubmissionMode::Individual,
            session_control: SessionControl::default(),
            time_limits: TimeLimits::NONE,
            preconditions: Vec::new(),
            sections: vec![section],
        }],
    }
}

fn section(
    selection: Option<SelectionSpec>,
    shuffle: bool,
    items: Vec<ItemRefSpec>,
) -> SectionSpec {
    SectionSpec {
        section_id: SectionId::new("s1"),
        title: "s1".to_string(),
        visible: true,
        keep_together: true,
        selection,
        ordering: OrderingSpec {
            shuffle,
        },
        time_limits: TimeLimits::NONE,
        preconditions: Vec::new(),
        branch_rules: Vec::new(),
        parts: items.into_iter().map(SectionPart::ItemRef).collect(),
    }
}

#[test]
fn equal_seeds_resolve_equal_routes() {
    let items = vec![item_ref("i1", false), item_ref("i2", false), item_ref("i3", false)];
    let spec = spec_with_section(section(None, true, items));
    let first = resolve_test(&spec, 42);
    let second = resolve_test(&spec, 42);
    assert_eq!(first, second);
}

#[test]
fn replacement_selection_numbers_occurrences_densely() {
    let selection = SelectionSpec {
        select: 5,
        with_replacement: true,
    };
    let items = vec![item_ref("i1", false), item_ref("i2", false)];
    let spec = spec_with_section(section(Some(selection), false, items));

    for seed in 0..8 {
        let placements = resolve_test(&spec, seed);
        assert_eq!(placements.len(), 5);

        let mut seen: BTreeMap<ItemId, Vec<u32>> = BTreeMap::new();
        for placement in &placements {
            seen.entry(placement.item_ref.item_id.clone())
                .or_default()
                .push(placement.occurrence);
        }
        for occurrences in seen.values() {
            let expected: Vec<u32> = (0..u32::try_from(occurrences.len()).unwrap()).collect();
            assert_eq!(occurrences, &expected);
        }
    }
}

#[test]
fn selection_without_replacement_keeps_occurrences_unique() {
    let selection = SelectionSpec {
        select: 2,
        with_replacement: false,
    };
    let items = vec![item_ref("i1", false), item_ref("i2", false), item_ref("i3", false)];
    let spec = spec_with_section(section(Some(selection), false, items));

    for seed in 0..8 {
        let placements = resolve_test(&spec, seed);
        assert_eq!(placements.len(), 2);
        assert!(placements.iter().all(|placement| placement.occurrence == 0));
        assert_ne!(placements[0].item_ref.item_id, placements[1].item_ref.item_id);
    }
}

#[test]
fn fixed_references_keep_their_slots_under_shuffle() {
    let items = vec![
        item_ref("i1", false),
        item_ref("anchor", true),
        item_ref("i3", false),
        item_ref("i4", false),
    ];
    let spec = spec_with_section(section(None, true, items));

    for seed in 0..16 {
        let placements = resolve_test(&spec, seed);
        assert_eq!(placements[1].item_ref.item_id, ItemId::new("anchor"));
    }
}

#[test]
fn unshuffled_sections_keep_declaration_order() {
    let items = vec![item_ref("i1", false), item_ref("i2", false), item_ref("i3", false)];
    let spec = spec_with_section(section(None, false, items));

    for seed in [0, 7, 99] {
        let ids: Vec<String> = resolve_test(&spec, seed)
            .iter()
            .map(|placement| placement.item_ref.item_id.to_string())
            .collect();
        assert_eq!(ids, vec!["i1", "i2", "i3"]);
    }
}
