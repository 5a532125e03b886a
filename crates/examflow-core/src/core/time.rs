// crates/examflow-core/src/core/time.rs
// ============================================================================
// Module: Examflow Time Model
// Description: Explicit timestamps and millisecond durations for timing rules.
// Purpose: Provide deterministic, replayable time values for session timing.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Examflow never reads wall-clock time. Hosts supply the current time via
//! `TestSession::set_time`, and every duration or timeout computation is a
//! pure function of recorded events and the supplied "now". Timestamps are
//! milliseconds since an arbitrary host epoch; tests typically use small
//! logical values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::ops::Add;
use std::ops::AddAssign;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp supplied by the hosting application.
///
/// # Invariants
/// - Values are explicitly provided by callers; the core never reads wall-clock time.
/// - Monotonicity is a caller responsibility; elapsed computations saturate at
///   zero when "now" moves backwards.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the host epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the host epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns the duration elapsed since an earlier timestamp.
    ///
    /// Saturates at zero when `earlier` is in the future relative to `self`.
    #[must_use]
    pub const fn since(self, earlier: Self) -> Millis {
        let delta = self.0.saturating_sub(earlier.0);
        if delta < 0 {
            Millis::ZERO
        } else {
            Millis::from_millis(delta as u64)
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

// ============================================================================
// SECTION: Durations
// ============================================================================

/// Non-negative duration in milliseconds.
///
/// # Invariants
/// - Arithmetic saturates instead of overflowing.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Millis(u64);

impl Millis {
    /// The zero duration.
    pub const ZERO: Self = Self(0);

    /// Creates a duration from milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Creates a duration from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    /// Returns the duration as milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Returns the saturating sum of two durations.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl Add for Millis {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for Millis {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.saturating_add(rhs);
    }
}

impl fmt::Display for Millis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
