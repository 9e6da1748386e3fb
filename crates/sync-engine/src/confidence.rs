// crates/sync-engine/src/confidence.rs
//! Confidence thresholds and penalties
//!
//! Every number that influences whether a resolution is applied
//! automatically lives here.

/// A resolution with no doubt attached
pub const CONFIDENCE_CERTAIN: f64 = 1.0;

/// Default auto-apply threshold
pub const CONFIDENCE_HIGH: f64 = 0.8;

/// Cap for merges that touch structural fields
pub const CONFIDENCE_MEDIUM: f64 = 0.6;

/// Cap for a strict-timestamp tie
pub const CONFIDENCE_LOW: f64 = 0.3;

/// Per differing field whose timestamps tie
pub const AMBIGUOUS_FIELD_PENALTY: f64 = 0.15;

/// Per high-severity difference
pub const HIGH_SEVERITY_PENALTY: f64 = 0.1;

/// Once, when either document has no `last_modified`
pub const MISSING_TIMESTAMP_PENALTY: f64 = 0.25;

/// Running confidence score, clamped to `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Confidence(f64);

impl Confidence {
    pub fn certain() -> Self {
        Self(CONFIDENCE_CERTAIN)
    }

    pub fn zero() -> Self {
        Self(0.0)
    }

    /// Subtracts `penalty` once per occurrence, flooring at zero
    pub fn penalize(self, penalty: f64, occurrences: usize) -> Self {
        Self((self.0 - penalty * occurrences as f64).max(0.0))
    }

    /// Caps the score at `max`
    pub fn cap(self, max: f64) -> Self {
        Self(self.0.min(max))
    }

    pub fn value(self) -> f64 {
        // Rounded so repeated penalties compare cleanly against thresholds
        (self.0 * 1000.0).round() / 1000.0
    }
}

/// Returns true if `confidence` allows applying without asking the user
pub fn meets_threshold(confidence: f64, threshold: f64) -> bool {
    confidence >= threshold
}
