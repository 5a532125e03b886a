// crates/examflow-core/src/runtime/route.rs
// ============================================================================
// Module: Examflow Route
// Description: Flattened delivery route with branch resolution and analysis.
// Purpose: Provide the ordered route items, validated jumps, and route enumeration.
// Dependencies: crate::core, crate::runtime::selection, serde, thiserror
// ============================================================================

//! ## Overview
//! The route is the flat, ordered list of item occurrences produced by
//! selection and ordering. Each route item carries everything navigation
//! needs locally: the enclosing scope chain with effective time limits, the
//! effective session control, and the preconditions and branch rules folded
//! down from enclosing scopes. Branch targets are resolved and validated
//! eagerly when the route is built, so runtime navigation never discovers a
//! malformed target. Static analysis enumerates every structurally possible
//! traversal with an explicit worklist.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::ItemId;
use crate::core::identifiers::SectionId;
use crate::core::identifiers::TestPartId;
use crate::core::spec::BranchRuleSpec;
use crate::core::spec::BranchTarget;
use crate::core::spec::Expression;
use crate::core::spec::NavigationMode;
use crate::core::spec::SectionPart;
use crate::core::spec::SectionSpec;
use crate::core::spec::SessionControl;
use crate::core::spec::SubmissionMode;
use crate::core::spec::TestSpec;
use crate::core::spec::TimeLimits;
use crate::core::state::Scope;
use crate::runtime::selection::Placement;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Route construction errors.
///
/// # Invariants
/// - Every variant names the offending source item so hosts can report the
///   defective rule without re-walking the spec.
#[derive(Debug, Error)]
pub enum RouteError {
    /// Branch rule targets an item absent from the resolved route.
    #[error("branch rule on item {from} targets item absent from route: {target}")]
    UnknownTarget {
        /// Item carrying the rule.
        from: String,
        /// Missing target item.
        target: String,
    },
    /// Branch rule targets its own item.
    #[error("branch rule on item {from} targets itself")]
    SelfTarget {
        /// Item carrying the rule.
        from: String,
    },
    /// Branch rule targets an item earlier in the route.
    #[error("branch rule on item {from} targets backward item: {target}")]
    BackwardTarget {
        /// Item carrying the rule.
        from: String,
        /// Backward target item.
        target: String,
    },
    /// Branch rule targets an item in another test part.
    #[error("branch rule on item {from} targets item outside its test part: {target}")]
    OutOfPartTarget {
        /// Item carrying the rule.
        from: String,
        /// Out-of-part target item.
        target: String,
    },
}

// ============================================================================
// SECTION: Route Items
// ============================================================================

/// One deliverable item occurrence on the route.
///
/// # Invariants
/// - `scopes` is ordered innermost to outermost and always ends with
///   [`Scope::Test`].
/// - `preconditions` include folded-down part and section preconditions when
///   this is the first route item of that scope, outermost first.
/// - `branch_rules` include folded-down section rules when this is the last
///   route item of that section, item rules first, then innermost to
///   outermost sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteItem {
    /// Item identifier.
    pub item_id: ItemId,
    /// Occurrence index for this item identifier.
    pub occurrence: u32,
    /// Enclosing test-part identifier.
    pub part_id: TestPartId,
    /// Enclosing section chain, outermost to innermost.
    pub sections: Vec<SectionId>,
    /// Navigation mode of the enclosing test part.
    pub navigation_mode: NavigationMode,
    /// Submission mode of the enclosing test part.
    pub submission_mode: SubmissionMode,
    /// Whether the referenced item is adaptive.
    pub adaptive: bool,
    /// Category tags used by aggregation filters.
    pub categories: Vec<String>,
    /// Effective session control for this occurrence.
    pub session_control: SessionControl,
    /// Enclosing scopes with their declared time limits, innermost first.
    pub scopes: Vec<(Scope, TimeLimits)>,
    /// Effective preconditions, outermost scope first.
    pub preconditions: Vec<Expression>,
    /// Effective branch rules in evaluation order.
    pub branch_rules: Vec<BranchRuleSpec>,
}

impl RouteItem {
    /// Returns the item-occurrence scope of this route item.
    #[must_use]
    pub fn item_scope(&self) -> Scope {
        Scope::Item {
            item_id: self.item_id.clone(),
            occurrence: self.occurrence,
        }
    }
}

/// A reachable jump destination under nonlinear navigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Jump {
    /// Route position of the destination.
    pub position: usize,
    /// Destination item identifier.
    pub item_id: ItemId,
    /// Destination occurrence index.
    pub occurrence: u32,
}

/// Route enumeration counting modes.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteCountMode {
    /// Count every distinct possible route.
    All,
    /// Count only routes of minimal length.
    Shortest,
    /// Count only routes of maximal length.
    Longest,
}

// ============================================================================
// SECTION: Route
// ============================================================================

/// Flattened delivery route with a cursor.
///
/// # Invariants
/// - `position <= items.len()`; `items.len()` is the end-of-route sentinel.
/// - `branch_exits[i][r]` is the pre-resolved destination of rule `r` on item
///   `i`; destinations never point backward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Ordered route items.
    items: Vec<RouteItem>,
    /// Pre-resolved branch destinations, parallel to each item's rules.
    branch_exits: Vec<Vec<usize>>,
    /// Current cursor position.
    position: usize,
}

impl Route {
    /// Builds and validates the route for a resolved placement list.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError`] when a branch rule resolves to a self, backward,
    /// out-of-part, or unknown destination.
    pub fn build(spec: &TestSpec, placements: &[Placement]) -> Result<Self, RouteError> {
        let sections = index_sections(spec);
        let items = assemble_items(spec, placements, &sections);
        let branch_exits = resolve_branches(&items)?;
        Ok(Self {
            items,
            branch_exits,
            position: 0,
        })
    }

    /// Returns the number of route items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true when the route contains no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the ordered route items.
    #[must_use]
    pub fn items(&self) -> &[RouteItem] {
        &self.items
    }

    /// Returns the route item at a position.
    #[must_use]
    pub fn item(&self, position: usize) -> Option<&RouteItem> {
        self.items.get(position)
    }

    /// Returns the current cursor position.
    ///
    /// A position equal to [`Route::len`] means the route is exhausted.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Returns the route item under the cursor.
    #[must_use]
    pub fn current(&self) -> Option<&RouteItem> {
        self.items.get(self.position)
    }

    /// Moves the cursor without bounds beyond the end-of-route sentinel.
    ///
    /// Callers must pass `position <= len()`; the session layer validates
    /// user-driven moves before delegating here.
    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.items.len());
    }

    /// Returns the pre-resolved destination of a branch rule.
    #[must_use]
    pub fn branch_destination(&self, position: usize, rule: usize) -> Option<usize> {
        self.branch_exits.get(position).and_then(|exits| exits.get(rule)).copied()
    }

    /// Returns the position just past the last item of the part at `position`.
    #[must_use]
    pub fn end_of_part(&self, position: usize) -> usize {
        let Some(part_id) = self.items.get(position).map(|item| item.part_id.clone()) else {
            return self.items.len();
        };
        last_index_where(&self.items, |item| item.part_id == part_id)
            .map_or(self.items.len(), |last| last + 1)
    }

    /// Returns the position just past the last item of the innermost section
    /// at `position`.
    #[must_use]
    pub fn end_of_section(&self, position: usize) -> usize {
        let Some(section_id) =
            self.items.get(position).and_then(|item| item.sections.last().cloned())
        else {
            return self.items.len();
        };
        last_index_where(&self.items, |item| item.sections.contains(&section_id))
            .map_or(self.items.len(), |last| last + 1)
    }

    /// Returns the first position belonging to a test part.
    #[must_use]
    pub fn first_of_part(&self, part_id: &TestPartId) -> Option<usize> {
        self.items.iter().position(|item| &item.part_id == part_id)
    }

    /// Returns the positions of every item occurrence in a test part.
    #[must_use]
    pub fn positions_in_part(&self, part_id: &TestPartId) -> Vec<usize> {
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| &item.part_id == part_id)
            .map(|(index, _)| index)
            .collect()
    }

    /// Returns the position of an item occurrence.
    #[must_use]
    pub fn position_of(&self, item_id: &ItemId, occurrence: u32) -> Option<usize> {
        self.items
            .iter()
            .position(|item| &item.item_id == item_id && item.occurrence == occurrence)
    }

    // ========================================================================
    // SECTION: Static Analysis
    // ========================================================================

    /// Enumerates every structurally possible route from the start.
    ///
    /// Preconditions contribute a skip edge per guarded item; branch rules
    /// contribute one edge per rule. Duplicate position sequences arising
    /// from different decisions are reported once, first enumeration wins.
    #[must_use]
    pub fn possible_routes(&self) -> Vec<Vec<usize>> {
        self.possible_routes_from(0)
    }

    /// Enumerates every structurally possible route from a position.
    #[must_use]
    pub fn possible_routes_from(&self, start: usize) -> Vec<Vec<usize>> {
        let end = self.items.len();
        let mut results: Vec<Vec<usize>> = Vec::new();
        let mut seen: BTreeSet<Vec<usize>> = BTreeSet::new();
        let mut worklist: Vec<(usize, Vec<usize>)> = vec![(start.min(end), Vec::new())];

        while let Some((position, path)) = worklist.pop() {
            if position >= end {
                if seen.insert(path.clone()) {
                    results.push(path);
                }
                continue;
            }

            // All edges are strictly forward, so the walk terminates without
            // a visited set.
            let mut edges = Vec::new();
            let mut taken = path.clone();
            taken.push(position);
            edges.push((position + 1, taken.clone()));
            if let Some(exits) = self.branch_exits.get(position) {
                for destination in exits {
                    edges.push((*destination, taken.clone()));
                }
            }
            if !self.items[position].preconditions.is_empty() {
                edges.push((position + 1, path));
            }
            for edge in edges.into_iter().rev() {
                worklist.push(edge);
            }
        }
        results
    }

    /// Returns the possible routes of minimal length, from the start.
    #[must_use]
    pub fn shortest_routes(&self) -> Vec<Vec<usize>> {
        self.shortest_routes_from(0)
    }

    /// Returns the possible routes of minimal length from a position.
    #[must_use]
    pub fn shortest_routes_from(&self, start: usize) -> Vec<Vec<usize>> {
        let routes = self.possible_routes_from(start);
        let shortest = routes.iter().map(Vec::len).min().unwrap_or(0);
        routes.into_iter().filter(|route| route.len() == shortest).collect()
    }

    /// Returns the possible routes of maximal length, from the start.
    #[must_use]
    pub fn longest_routes(&self) -> Vec<Vec<usize>> {
        self.longest_routes_from(0)
    }

    /// Returns the possible routes of maximal length from a position.
    #[must_use]
    pub fn longest_routes_from(&self, start: usize) -> Vec<Vec<usize>> {
        let routes = self.possible_routes_from(start);
        let longest = routes.iter().map(Vec::len).max().unwrap_or(0);
        routes.into_iter().filter(|route| route.len() == longest).collect()
    }

    /// Counts possible routes under the requested mode.
    #[must_use]
    pub fn route_count(&self, mode: RouteCountMode) -> usize {
        let routes = self.possible_routes();
        match mode {
            RouteCountMode::All => routes.len(),
            RouteCountMode::Shortest => {
                let shortest = routes.iter().map(Vec::len).min().unwrap_or(0);
                routes.iter().filter(|route| route.len() == shortest).count()
            }
            RouteCountMode::Longest => {
                let longest = routes.iter().map(Vec::len).max().unwrap_or(0);
                routes.iter().filter(|route| route.len() == longest).count()
            }
        }
    }
}

// ============================================================================
// SECTION: Construction Helpers
// ============================================================================

/// Indexes every section spec by identifier.
fn index_sections(spec: &TestSpec) -> BTreeMap<SectionId, SectionSpec> {
    fn walk(section: &SectionSpec, index: &mut BTreeMap<SectionId, SectionSpec>) {
        index.insert(section.section_id.clone(), section.clone());
        for part in &section.parts {
            if let SectionPart::Section(nested) = part {
                walk(nested, index);
            }
        }
    }
    let mut index = BTreeMap::new();
    for part in &spec.test_parts {
        for section in &part.sections {
            walk(section, &mut index);
        }
    }
    index
}

/// Assembles route items with folded preconditions, branch rules, and scopes.
fn assemble_items(
    spec: &TestSpec,
    placements: &[Placement],
    sections: &BTreeMap<SectionId, SectionSpec>,
) -> Vec<RouteItem> {
    let mut entered_parts: BTreeSet<TestPartId> = BTreeSet::new();
    let mut entered_sections: BTreeSet<SectionId> = BTreeSet::new();
    let mut items = Vec::with_capacity(placements.len());

    for (index, placement) in placements.iter().enumerate() {
        let part = spec.test_part(&placement.part_id);

        let mut preconditions = Vec::new();
        if entered_parts.insert(placement.part_id.clone()) {
            if let Some(part) = part {
                preconditions.extend(part.preconditions.iter().cloned());
            }
        }
        for section_id in &placement.sections {
            if entered_sections.insert(section_id.clone()) {
                if let Some(section) = sections.get(section_id) {
                    preconditions.extend(section.preconditions.iter().cloned());
                }
            }
        }
        preconditions.extend(placement.item_ref.preconditions.iter().cloned());

        let mut branch_rules = placement.item_ref.branch_rules.clone();
        for section_id in placement.sections.iter().rev() {
            let is_last = placements
                .iter()
                .skip(index + 1)
                .all(|later| !later.sections.contains(section_id));
            if is_last {
                if let Some(section) = sections.get(section_id) {
                    branch_rules.extend(section.branch_rules.iter().cloned());
                }
            }
        }

        let mut scopes = vec![(
            Scope::Item {
                item_id: placement.item_ref.item_id.clone(),
                occurrence: placement.occurrence,
            },
            placement.item_ref.time_limits,
        )];
        for section_id in placement.sections.iter().rev() {
            let limits = sections.get(section_id).map_or(TimeLimits::NONE, |s| s.time_limits);
            scopes.push((
                Scope::Section {
                    section_id: section_id.clone(),
                },
                limits,
            ));
        }
        scopes.push((
            Scope::TestPart {
                part_id: placement.part_id.clone(),
            },
            part.map_or(TimeLimits::NONE, |p| p.time_limits),
        ));
        scopes.push((Scope::Test, spec.time_limits));

        let session_control = placement
            .item_ref
            .session_control
            .unwrap_or_else(|| part.map_or_else(SessionControl::default, |p| p.session_control));

        items.push(RouteItem {
            item_id: placement.item_ref.item_id.clone(),
            occurrence: placement.occurrence,
            part_id: placement.part_id.clone(),
            sections: placement.sections.clone(),
            navigation_mode: part.map_or(NavigationMode::Linear, |p| p.navigation_mode),
            submission_mode: part.map_or(SubmissionMode::Individual, |p| p.submission_mode),
            adaptive: placement.item_ref.adaptive,
            categories: placement.item_ref.categories.clone(),
            session_control,
            scopes,
            preconditions,
            branch_rules,
        });
    }
    items
}

/// Resolves and validates every branch rule destination.
fn resolve_branches(items: &[RouteItem]) -> Result<Vec<Vec<usize>>, RouteError> {
    let end = items.len();
    let mut exits = Vec::with_capacity(end);
    for (index, item) in items.iter().enumerate() {
        let mut destinations = Vec::with_capacity(item.branch_rules.len());
        for rule in &item.branch_rules {
            let destination = match &rule.target {
                BranchTarget::ExitTest => end,
                BranchTarget::ExitTestPart => end_of_part_index(items, index),
                BranchTarget::ExitSection => end_of_section_index(items, index),
                BranchTarget::Item {
                    item_id,
                } => resolve_item_target(items, index, item_id)?,
            };
            destinations.push(destination);
        }
        exits.push(destinations);
    }
    Ok(exits)
}

/// Resolves an item branch target to its route position.
fn resolve_item_target(
    items: &[RouteItem],
    from: usize,
    target: &ItemId,
) -> Result<usize, RouteError> {
    let source = &items[from];
    if &source.item_id == target {
        return Err(RouteError::SelfTarget {
            from: source.item_id.to_string(),
        });
    }
    let Some(destination) = items.iter().position(|item| &item.item_id == target) else {
        return Err(RouteError::UnknownTarget {
            from: source.item_id.to_string(),
            target: target.to_string(),
        });
    };
    if destination <= from {
        return Err(RouteError::BackwardTarget {
            from: source.item_id.to_string(),
            target: target.to_string(),
        });
    }
    if items[destination].part_id != source.part_id {
        return Err(RouteError::OutOfPartTarget {
            from: source.item_id.to_string(),
            target: target.to_string(),
        });
    }
    Ok(destination)
}

/// Returns the position just past the last item sharing `index`'s part.
fn end_of_part_index(items: &[RouteItem], index: usize) -> usize {
    let part_id = &items[index].part_id;
    last_index_where(items, |item| &item.part_id == part_id).map_or(items.len(), |last| last + 1)
}

/// Returns the position just past the last item of `index`'s innermost section.
fn end_of_section_index(items: &[RouteItem], index: usize) -> usize {
    let Some(section_id) = items[index].sections.last() else {
        return end_of_part_index(items, index);
    };
    last_index_where(items, |item| item.sections.contains(section_id))
        .map_or(items.len(), |last| last + 1)
}

/// Returns the last index satisfying the predicate.
fn last_index_where(items: &[RouteItem], predicate: impl Fn(&RouteItem) -> bool) -> Option<usize> {
    items.iter().rposition(predicate)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
