//! Password quality classes, tracked metrics, and sufficiency checks.
//!
//! Quality classes form an explicit total order from [`PasswordQuality::
//! Unspecified`] up to [`PasswordQuality::Managed`]; aggregation takes the
//! maximum by ordinal. The character-count minimums (letters, digits,
//! symbols, case counts, non-letters) only apply at
//! [`PasswordQuality::Complex`] and above, both when aggregating a single
//! admin's declaration and when checking sufficiency.

use serde::{Deserialize, Serialize};

/// Password quality classes, weakest first.
///
/// The derived ordering is the aggregation order: a later variant is a
/// stricter requirement.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PasswordQuality {
    /// No requirement declared.
    #[default]
    Unspecified,
    /// A weak biometric unlock is acceptable.
    BiometricWeak,
    /// Some credential is required, pattern included.
    Something,
    /// Numeric credential required.
    Numeric,
    /// Numeric credential with no repeating or ordered sequences.
    NumericComplex,
    /// Alphabetic credential required.
    Alphabetic,
    /// Credential containing both letters and digits.
    Alphanumeric,
    /// Credential satisfying per-character-class minimums.
    Complex,
    /// Credential is managed externally; strictest class.
    Managed,
}

impl PasswordQuality {
    /// Returns `true` if per-character-class minimums apply at this quality.
    #[must_use]
    pub fn gates_complexity(self) -> bool {
        self >= Self::Complex
    }
}

/// The password strength metrics tracked for a user's current credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PasswordMetrics {
    /// Quality class the current credential satisfies.
    pub quality: PasswordQuality,
    /// Total length.
    pub length: u32,
    /// Letter count.
    pub letters: u32,
    /// Digit count.
    pub digits: u32,
    /// Symbol count.
    pub symbols: u32,
    /// Uppercase letter count.
    pub uppercase: u32,
    /// Lowercase letter count.
    pub lowercase: u32,
    /// Count of characters that are not letters.
    pub non_letter: u32,
}

impl PasswordMetrics {
    /// Computes metrics for a plaintext credential. Only used by tests and
    /// by callers that already hold the plaintext for other reasons; the
    /// engine itself never stores credentials.
    #[must_use]
    pub fn compute(password: &str, quality: PasswordQuality) -> Self {
        let mut m = Self {
            quality,
            length: password.chars().count() as u32,
            ..Self::default()
        };
        for ch in password.chars() {
            if ch.is_alphabetic() {
                m.letters += 1;
                if ch.is_uppercase() {
                    m.uppercase += 1;
                } else if ch.is_lowercase() {
                    m.lowercase += 1;
                }
            } else {
                m.non_letter += 1;
                if ch.is_ascii_digit() {
                    m.digits += 1;
                } else {
                    m.symbols += 1;
                }
            }
        }
        m
    }
}

/// Aggregated minimum requirements for a user context, produced by the
/// policy aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PasswordRequirements {
    /// Required quality class.
    pub quality: PasswordQuality,
    /// Minimum total length.
    pub min_length: u32,
    /// Minimum letter count (applies at `Complex` and above).
    pub min_letters: u32,
    /// Minimum digit count (applies at `Complex` and above).
    pub min_digits: u32,
    /// Minimum symbol count (applies at `Complex` and above).
    pub min_symbols: u32,
    /// Minimum uppercase count (applies at `Complex` and above).
    pub min_uppercase: u32,
    /// Minimum lowercase count (applies at `Complex` and above).
    pub min_lowercase: u32,
    /// Minimum non-letter count (applies at `Complex` and above).
    pub min_non_letter: u32,
}

impl PasswordRequirements {
    /// Checks the tracked metrics against these requirements.
    ///
    /// Short-circuits to `true` when no admin requires anything
    /// (`quality == Unspecified`). The per-character-class minimums are
    /// only enforced when the required quality gates complexity.
    #[must_use]
    pub fn satisfied_by(&self, metrics: &PasswordMetrics) -> bool {
        if self.quality == PasswordQuality::Unspecified {
            return true;
        }
        if metrics.quality < self.quality {
            return false;
        }
        if metrics.length < self.min_length {
            return false;
        }
        if !self.quality.gates_complexity() {
            return true;
        }
        metrics.letters >= self.min_letters
            && metrics.digits >= self.min_digits
            && metrics.symbols >= self.min_symbols
            && metrics.uppercase >= self.min_uppercase
            && metrics.lowercase >= self.min_lowercase
            && metrics.non_letter >= self.min_non_letter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_order_is_total_and_ascending() {
        use PasswordQuality::*;
        let ordered = [
            Unspecified,
            BiometricWeak,
            Something,
            Numeric,
            NumericComplex,
            Alphabetic,
            Alphanumeric,
            Complex,
            Managed,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{:?} must be below {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn unspecified_requirement_is_always_sufficient() {
        let req = PasswordRequirements::default();
        assert!(req.satisfied_by(&PasswordMetrics::default()));
    }

    #[test]
    fn complexity_counts_ignored_below_complex() {
        let req = PasswordRequirements {
            quality: PasswordQuality::Numeric,
            min_length: 4,
            min_uppercase: 99,
            ..PasswordRequirements::default()
        };
        let metrics = PasswordMetrics::compute("1234", PasswordQuality::Numeric);
        assert!(req.satisfied_by(&metrics));
    }

    #[test]
    fn complexity_counts_enforced_at_complex() {
        let req = PasswordRequirements {
            quality: PasswordQuality::Complex,
            min_length: 6,
            min_uppercase: 2,
            ..PasswordRequirements::default()
        };
        let weak = PasswordMetrics::compute("abcdef", PasswordQuality::Complex);
        assert!(!req.satisfied_by(&weak));
        let strong = PasswordMetrics::compute("ABcdef", PasswordQuality::Complex);
        assert!(req.satisfied_by(&strong));
    }

    #[test]
    fn lower_quality_metrics_are_insufficient() {
        let req = PasswordRequirements {
            quality: PasswordQuality::Alphanumeric,
            ..PasswordRequirements::default()
        };
        let metrics = PasswordMetrics::compute("1234", PasswordQuality::Numeric);
        assert!(!req.satisfied_by(&metrics));
    }

    #[test]
    fn compute_counts_character_classes() {
        let m = PasswordMetrics::compute("Ab1!", PasswordQuality::Complex);
        assert_eq!(m.length, 4);
        assert_eq!(m.letters, 2);
        assert_eq!(m.uppercase, 1);
        assert_eq!(m.lowercase, 1);
        assert_eq!(m.digits, 1);
        assert_eq!(m.symbols, 1);
        assert_eq!(m.non_letter, 2);
    }
}
