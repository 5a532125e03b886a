// crates/examflow-core/src/core/spec.rs
// ============================================================================
// Module: Examflow Test Specification
// Description: Test, test-part, section, and item-reference specifications.
// Purpose: Define the canonical test structure with validation helpers.
// Dependencies: crate::core::{hashing, identifiers, time, variables}, regex, serde
// ============================================================================

//! ## Overview
//! Test specifications define the hierarchical assessment structure the route
//! builder flattens: test parts with navigation and submission modes, nested
//! sections with selection/ordering rules, and item references carrying
//! declarations, session control, time limits, preconditions, and branch
//! rules. Specs are validated at load time; structural errors abort session
//! creation before any route exists.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::hashing::HashDigest;
use crate::core::hashing::HashError;
use crate::core::hashing::DEFAULT_HASH_ALGORITHM;
use crate::core::identifiers::ItemId;
use crate::core::identifiers::SectionId;
use crate::core::identifiers::TestId;
use crate::core::identifiers::TestPartId;
use crate::core::time::Millis;
use crate::core::variables::OutcomeDeclaration;
use crate::core::variables::ResponseDeclaration;

// ============================================================================
// SECTION: Test Specification
// ============================================================================

/// Canonical assessment test specification.
///
/// # Invariants
/// - Immutable after construction; the session engine never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    /// Test identifier.
    pub test_id: TestId,
    /// Human-readable test title.
    pub title: String,
    /// Test-level outcome declarations.
    pub outcomes: Vec<OutcomeDeclaration>,
    /// Test-level time limits.
    pub time_limits: TimeLimits,
    /// Test parts in delivery order.
    pub test_parts: Vec<TestPartSpec>,
}

impl TestSpec {
    /// Computes the canonical hash of the test specification.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Canonicalization`] when serialization fails.
    pub fn canonical_hash(&self) -> Result<HashDigest, HashError> {
        crate::core::hashing::hash_canonical_json(DEFAULT_HASH_ALGORITHM, self)
    }

    /// Validates the test specification invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError`] when validation fails.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.test_parts.is_empty() {
            return Err(SpecError::MissingTestParts);
        }

        ensure_unique_part_ids(&self.test_parts)?;

        let mut section_ids = Vec::new();
        let mut item_ids = Vec::new();
        for part in &self.test_parts {
            if part.sections.is_empty() {
                return Err(SpecError::EmptyTestPart(part.part_id.to_string()));
            }
            for section in &part.sections {
                collect_section(section, &mut section_ids, &mut item_ids)?;
            }
        }

        ensure_unique(&section_ids, |id: &SectionId| {
            SpecError::DuplicateSectionId(id.to_string())
        })?;
        ensure_unique(&item_ids, |id: &ItemId| SpecError::DuplicateItemId(id.to_string()))?;
        ensure_branch_targets_exist(self, &item_ids)?;

        Ok(())
    }

    /// Returns the test part with the given identifier.
    #[must_use]
    pub fn test_part(&self, part_id: &TestPartId) -> Option<&TestPartSpec> {
        self.test_parts.iter().find(|part| &part.part_id == part_id)
    }

    /// Returns the item reference with the given identifier.
    #[must_use]
    pub fn item_ref(&self, item_id: &ItemId) -> Option<&ItemRefSpec> {
        fn find<'a>(section: &'a SectionSpec, item_id: &ItemId) -> Option<&'a ItemRefSpec> {
            for part in &section.parts {
                match part {
                    SectionPart::ItemRef(item_ref) if &item_ref.item_id == item_id => {
                        return Some(item_ref)
                    }
                    SectionPart::Section(nested) => {
                        if let Some(found) = find(nested, item_id) {
                            return Some(found);
                        }
                    }
                    SectionPart::ItemRef(_) => {}
                }
            }
            None
        }
        self.test_parts
            .iter()
            .flat_map(|part| &part.sections)
            .find_map(|section| find(section, item_id))
    }
}

// ============================================================================
// SECTION: Test Parts
// ============================================================================

/// Navigation mode governing branch rules, preconditions, and free jumps.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationMode {
    /// Forward-only delivery; branch rules and preconditions apply.
    Linear,
    /// Free movement; branch rules and preconditions are ignored unless forced.
    Nonlinear,
}

/// Submission mode governing scoring granularity.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionMode {
    /// Each item is processed as its attempt ends.
    Individual,
    /// Responses are buffered and processed when the test part is left.
    Simultaneous,
}

/// Test part specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestPartSpec {
    /// Test-part identifier.
    pub part_id: TestPartId,
    /// Navigation mode for this part.
    pub navigation_mode: NavigationMode,
    /// Submission mode for this part.
    pub submission_mode: SubmissionMode,
    /// Default item session control for contained item references.
    pub session_control: SessionControl,
    /// Test-part time limits.
    pub time_limits: TimeLimits,
    /// Preconditions gating entry into this part.
    pub preconditions: Vec<Expression>,
    /// Top-level sections in declaration order.
    pub sections: Vec<SectionSpec>,
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Selection rule applied to a section's children.
///
/// # Invariants
/// - `select >= 1`; `select` may exceed the pool only with replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionSpec {
    /// Number of children to select.
    pub select: usize,
    /// Whether the same child may be selected more than once.
    pub with_replacement: bool,
}

/// Ordering rule applied to a section's children.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderingSpec {
    /// Whether non-fixed children are shuffled.
    pub shuffle: bool,
}

/// Section specification with nested parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    /// Section identifier.
    pub section_id: SectionId,
    /// Human-readable section title.
    pub title: String,
    /// Whether the section is presented to the candidate.
    pub visible: bool,
    /// Whether an invisible section's items stay contiguous in the parent.
    pub keep_together: bool,
    /// Optional selection rule.
    pub selection: Option<SelectionSpec>,
    /// Ordering rule.
    pub ordering: OrderingSpec,
    /// Section time limits.
    pub time_limits: TimeLimits,
    /// Preconditions gating entry into this section.
    pub preconditions: Vec<Expression>,
    /// Branch rules evaluated when the section's last item is left.
    pub branch_rules: Vec<BranchRuleSpec>,
    /// Nested sections and item references in declaration order.
    pub parts: Vec<SectionPart>,
}

/// One child of a section: a nested section or an item reference.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionPart {
    /// Nested section.
    Section(SectionSpec),
    /// Item reference.
    ItemRef(ItemRefSpec),
}

// ============================================================================
// SECTION: Item References
// ============================================================================

/// Item reference specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRefSpec {
    /// Item identifier.
    pub item_id: ItemId,
    /// Whether the reference keeps its declared position during shuffling.
    pub fixed: bool,
    /// Whether the item is adaptive (unlimited attempts, self-completing).
    pub adaptive: bool,
    /// Category tags used by aggregation filters.
    pub categories: Vec<String>,
    /// Optional session-control override for this reference.
    pub session_control: Option<SessionControl>,
    /// Item time limits.
    pub time_limits: TimeLimits,
    /// Preconditions gating presentation of this item.
    pub preconditions: Vec<Expression>,
    /// Branch rules evaluated when the item is left.
    pub branch_rules: Vec<BranchRuleSpec>,
    /// Response declarations for the referenced item.
    pub responses: Vec<ResponseDeclaration>,
    /// Outcome declarations for the referenced item.
    pub outcomes: Vec<OutcomeDeclaration>,
}

/// Item session control settings.
///
/// # Invariants
/// - `max_attempts == 0` means unlimited attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionControl {
    /// Maximum number of attempts (0 = unlimited).
    pub max_attempts: u32,
    /// Whether modal feedback is shown after an attempt ends.
    pub show_feedback: bool,
    /// Whether closed sessions may be reviewed.
    pub allow_review: bool,
    /// Whether the model solution may be shown.
    pub show_solution: bool,
    /// Whether an attempt may end with all responses at their defaults.
    pub allow_skipping: bool,
    /// Whether responses are validated against constraints on submission.
    pub validate_responses: bool,
}

impl Default for SessionControl {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            show_feedback: false,
            allow_review: true,
            show_solution: false,
            allow_skipping: true,
            validate_responses: false,
        }
    }
}

// ============================================================================
// SECTION: Time Limits
// ============================================================================

/// Declared minimum/maximum time for a scope.
///
/// # Invariants
/// - Minimum time is enforced only under linear navigation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeLimits {
    /// Minimum time that must elapse before submission.
    pub min_time: Option<Millis>,
    /// Maximum time permitted for the scope.
    pub max_time: Option<Millis>,
    /// Whether attempts are accepted after the maximum time is exceeded.
    pub allow_late_submission: bool,
}

impl TimeLimits {
    /// Time limits with no constraints declared.
    pub const NONE: Self = Self {
        min_time: None,
        max_time: None,
        allow_late_submission: false,
    };

    /// Returns true when neither a minimum nor a maximum is declared.
    #[must_use]
    pub const fn is_unconstrained(&self) -> bool {
        self.min_time.is_none() && self.max_time.is_none()
    }
}

// ============================================================================
// SECTION: Conditions and Branch Rules
// ============================================================================

/// Opaque condition or processing expression.
///
/// # Invariants
/// - The core never interprets the payload; it is handed verbatim to the
///   processing collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Expression(serde_json::Value);

impl Expression {
    /// Creates an expression from an opaque payload.
    #[must_use]
    pub const fn new(source: serde_json::Value) -> Self {
        Self(source)
    }

    /// Returns the opaque payload.
    #[must_use]
    pub const fn source(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Branch rule mapping a condition to a navigation target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRuleSpec {
    /// Condition evaluated by the processing collaborator.
    pub condition: Expression,
    /// Target reached when the condition holds.
    pub target: BranchTarget,
}

/// Branch rule target.
///
/// # Invariants
/// - Item targets must resolve to a forward route item in the same test part;
///   the route builder enforces this eagerly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BranchTarget {
    /// Jump forward to the first occurrence of an item reference.
    Item {
        /// Target item identifier.
        item_id: ItemId,
    },
    /// Terminate the whole test.
    ExitTest,
    /// Leave the current test part.
    ExitTestPart,
    /// Leave the current section.
    ExitSection,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Test specification validation errors.
#[derive(Debug, Error)]
pub enum SpecError {
    /// Specification contains no test parts.
    #[error("test spec must define at least one test part")]
    MissingTestParts,
    /// Test part contains no sections.
    #[error("test part has no sections: {0}")]
    EmptyTestPart(String),
    /// Section contains no parts.
    #[error("section has no child parts: {0}")]
    EmptySection(String),
    /// Duplicate test-part identifiers detected.
    #[error("duplicate test part identifier: {0}")]
    DuplicatePartId(String),
    /// Duplicate section identifiers detected.
    #[error("duplicate section identifier: {0}")]
    DuplicateSectionId(String),
    /// Duplicate item identifiers detected.
    #[error("duplicate item identifier: {0}")]
    DuplicateItemId(String),
    /// Selection count is invalid for the section's pool.
    #[error("invalid selection for section {section}: select {select} from {pool} children")]
    InvalidSelection {
        /// Section identifier.
        section: String,
        /// Requested selection count.
        select: usize,
        /// Number of available children.
        pool: usize,
    },
    /// Response constraint declares an impossible occurrence range.
    #[error("invalid occurrence range for response {0}")]
    InvalidOccurrenceRange(String),
    /// Response constraint pattern does not compile.
    #[error("invalid pattern for response {identifier}: {reason}")]
    InvalidPattern {
        /// Response identifier.
        identifier: String,
        /// Compilation failure reason.
        reason: String,
    },
    /// Branch rule targets an unknown item.
    #[error("branch rule targets unknown item: {0}")]
    UnknownBranchTarget(String),
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Ensures test-part identifiers are unique within the spec.
fn ensure_unique_part_ids(parts: &[TestPartSpec]) -> Result<(), SpecError> {
    for (index, part) in parts.iter().enumerate() {
        if parts.iter().skip(index + 1).any(|other| other.part_id == part.part_id) {
            return Err(SpecError::DuplicatePartId(part.part_id.to_string()));
        }
    }
    Ok(())
}

/// Ensures a slice of identifiers contains no duplicates.
fn ensure_unique<T: PartialEq>(
    ids: &[T],
    error: impl Fn(&T) -> SpecError,
) -> Result<(), SpecError> {
    for (index, id) in ids.iter().enumerate() {
        if ids.iter().skip(index + 1).any(|other| other == id) {
            return Err(error(id));
        }
    }
    Ok(())
}

/// Walks a section, validating it and collecting identifiers.
fn collect_section(
    section: &SectionSpec,
    section_ids: &mut Vec<SectionId>,
    item_ids: &mut Vec<ItemId>,
) -> Result<(), SpecError> {
    if section.parts.is_empty() {
        return Err(SpecError::EmptySection(section.section_id.to_string()));
    }
    if let Some(selection) = &section.selection {
        let pool = section.parts.len();
        if selection.select == 0 || (!selection.with_replacement && selection.select > pool) {
            return Err(SpecError::InvalidSelection {
                section: section.section_id.to_string(),
                select: selection.select,
                pool,
            });
        }
    }
    section_ids.push(section.section_id.clone());
    for part in &section.parts {
        match part {
            SectionPart::Section(nested) => collect_section(nested, section_ids, item_ids)?,
            SectionPart::ItemRef(item_ref) => {
                validate_item_ref(item_ref)?;
                item_ids.push(item_ref.item_id.clone());
            }
        }
    }
    Ok(())
}

/// Validates an item reference's declarations.
fn validate_item_ref(item_ref: &ItemRefSpec) -> Result<(), SpecError> {
    for declaration in &item_ref.responses {
        if let Some(constraint) = &declaration.constraint {
            if let (Some(min), Some(max)) =
                (constraint.min_occurrences, constraint.max_occurrences)
            {
                if min > max {
                    return Err(SpecError::InvalidOccurrenceRange(
                        declaration.identifier.to_string(),
                    ));
                }
            }
            if let Some(pattern) = &constraint.pattern {
                regex::Regex::new(pattern).map_err(|err| SpecError::InvalidPattern {
                    identifier: declaration.identifier.to_string(),
                    reason: err.to_string(),
                })?;
            }
        }
    }
    Ok(())
}

/// Ensures every branch rule item target names a known item.
fn ensure_branch_targets_exist(spec: &TestSpec, item_ids: &[ItemId]) -> Result<(), SpecError> {
    let mut targets = Vec::new();
    for part in &spec.test_parts {
        for section in &part.sections {
            collect_branch_targets(section, &mut targets);
        }
    }
    for target in targets {
        if !item_ids.contains(&target) {
            return Err(SpecError::UnknownBranchTarget(target.to_string()));
        }
    }
    Ok(())
}

/// Collects item-target identifiers from a section's branch rules.
fn collect_branch_targets(section: &SectionSpec, targets: &mut Vec<ItemId>) {
    for rule in &section.branch_rules {
        if let BranchTarget::Item {
            item_id,
        } = &rule.target
        {
            targets.push(item_id.clone());
        }
    }
    for part in &section.parts {
        match part {
            SectionPart::Section(nested) => collect_branch_targets(nested, targets),
            SectionPart::ItemRef(item_ref) => {
                for rule in &item_ref.branch_rules {
                    if let BranchTarget::Item {
                        item_id,
                    } = &rule.target
                    {
                        targets.push(item_id.clone());
                    }
                }
            }
        }
    }
}
