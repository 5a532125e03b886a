// crates/examflow-core/src/runtime/selection.rs
// ============================================================================
// Module: Examflow Selection and Ordering
// Description: Resolves section selection/ordering rules into a flat item list.
// Purpose: Produce the deterministic placement sequence the route is built from.
// Dependencies: crate::core, rand
// ============================================================================

//! ## Overview
//! Selection and ordering process the section tree bottom-up with a seeded
//! RNG: `select` picks children (with or without replacement), `fixed`
//! children keep their declared positions, remaining children are permuted,
//! and invisible `keep_together = false` sections dissolve into their parent's
//! shuffle stream. The output is a flat, ordered list of item placements with
//! dense, zero-based occurrence indices per item reference.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;

use crate::core::identifiers::ItemId;
use crate::core::identifiers::SectionId;
use crate::core::identifiers::TestPartId;
use crate::core::spec::ItemRefSpec;
use crate::core::spec::SectionPart;
use crate::core::spec::SectionSpec;
use crate::core::spec::TestSpec;

// ============================================================================
// SECTION: Placements
// ============================================================================

/// One selected item occurrence with its enclosing chain.
///
/// # Invariants
/// - `sections` is ordered outermost to innermost.
/// - Occurrence indices are dense and zero-based per item identifier, in
///   instantiation order across the whole test.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    /// Enclosing test-part identifier.
    pub part_id: TestPartId,
    /// Enclosing section chain, outermost to innermost.
    pub sections: Vec<SectionId>,
    /// Resolved item reference.
    pub item_ref: ItemRefSpec,
    /// Occurrence index for this item identifier.
    pub occurrence: u32,
}

/// Resolves the whole test into an ordered placement list.
///
/// The caller is responsible for validating the spec first; selection counts
/// already checked by [`TestSpec::validate`] are not re-checked here.
#[must_use]
pub fn resolve_test(spec: &TestSpec, seed: u64) -> Vec<Placement> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut placements = Vec::new();
    for part in &spec.test_parts {
        for section in &part.sections {
            let entries = resolve_section(section, &mut rng);
            for mut entry in entries {
                entry.sections.insert(0, section.section_id.clone());
                placements.push(Placement {
                    part_id: part.part_id.clone(),
                    sections: entry.sections,
                    item_ref: entry.item_ref,
                    occurrence: 0,
                });
            }
        }
    }
    assign_occurrences(&mut placements);
    placements
}

// ============================================================================
// SECTION: Section Resolution
// ============================================================================

/// One resolved item with its section chain relative to the current level.
#[derive(Debug, Clone)]
struct Entry {
    /// Section chain from the current level down, outermost first.
    sections: Vec<SectionId>,
    /// Resolved item reference.
    item_ref: ItemRefSpec,
}

/// One orderable unit at a section level.
///
/// A unit is a contiguous run of entries: a single item reference, a resolved
/// visible or `keep_together` section, or one loose entry from a dissolved
/// invisible section.
#[derive(Debug, Clone)]
struct Unit {
    /// Whether the originating child was declared `fixed`.
    fixed: bool,
    /// Entries delivered contiguously for this unit.
    entries: Vec<Entry>,
}

/// Resolves one section bottom-up into an ordered entry list.
fn resolve_section(section: &SectionSpec, rng: &mut StdRng) -> Vec<Entry> {
    let selected = select_children(section, rng);

    let mut units = Vec::new();
    for index in selected {
        match &section.parts[index] {
            SectionPart::ItemRef(item_ref) => units.push(Unit {
                fixed: item_ref.fixed,
                entries: vec![Entry {
                    sections: Vec::new(),
                    item_ref: item_ref.clone(),
                }],
            }),
            SectionPart::Section(nested) => {
                let mut entries = resolve_section(nested, rng);
                for entry in &mut entries {
                    entry.sections.insert(0, nested.section_id.clone());
                }
                if !nested.visible && !nested.keep_together {
                    // Dissolve into loose units so the parent shuffle may
                    // interleave them with siblings.
                    for entry in entries {
                        units.push(Unit {
                            fixed: false,
                            entries: vec![entry],
                        });
                    }
                } else {
                    units.push(Unit {
                        fixed: false,
                        entries,
                    });
                }
            }
        }
    }

    let ordered = order_units(units, section.ordering.shuffle, rng);
    ordered.into_iter().flat_map(|unit| unit.entries).collect()
}

/// Selects child indices according to the section's selection rule.
///
/// Without a selection rule, every child is kept in declaration order. With
/// replacement, the same child may be drawn repeatedly; each draw later
/// produces a distinct occurrence.
fn select_children(section: &SectionSpec, rng: &mut StdRng) -> Vec<usize> {
    let pool = section.parts.len();
    let Some(selection) = &section.selection else {
        return (0..pool).collect();
    };
    if selection.with_replacement {
        let mut picks: Vec<usize> = (0..selection.select).map(|_| rng.gen_range(0..pool)).collect();
        picks.sort_unstable();
        picks
    } else {
        let mut indices: Vec<usize> = (0..pool).collect();
        indices.shuffle(rng);
        indices.truncate(selection.select);
        indices.sort_unstable();
        indices
    }
}

/// Orders units, pinning fixed units at their declaration positions.
///
/// Fixed units occupy the slots their declaration order implies among the
/// selected set; the remaining units are permuted across the free slots when
/// shuffling is enabled.
fn order_units(units: Vec<Unit>, shuffle: bool, rng: &mut StdRng) -> Vec<Unit> {
    if !shuffle {
        return units;
    }

    let total = units.len();
    let mut fixed = Vec::new();
    let mut movable = Vec::new();
    for (slot, unit) in units.into_iter().enumerate() {
        if unit.fixed {
            fixed.push((slot, unit));
        } else {
            movable.push(unit);
        }
    }
    movable.shuffle(rng);

    let mut ordered: Vec<Option<Unit>> = (0..total).map(|_| None).collect();
    for (slot, unit) in fixed {
        ordered[slot] = Some(unit);
    }
    let mut movable = movable.into_iter();
    for slot in &mut ordered {
        if slot.is_none() {
            *slot = movable.next();
        }
    }
    ordered.into_iter().flatten().collect()
}

// ============================================================================
// SECTION: Occurrence Assignment
// ============================================================================

/// Assigns dense, zero-based occurrence indices in instantiation order.
fn assign_occurrences(placements: &mut [Placement]) {
    let mut counters: BTreeMap<ItemId, u32> = BTreeMap::new();
    for placement in placements {
        let counter = counters.entry(placement.item_ref.item_id.clone()).or_insert(0);
        placement.occurrence = *counter;
        *counter += 1;
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
