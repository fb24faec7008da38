//! Footer line detection

use std::sync::{Arc, LazyLock};

use regex::Regex;

static PURE_DIGITS: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^\d+$").unwrap()
});
static R_PREFIXED: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[Rr]\d+$").unwrap()
});
static T_PIPE_PREFIXED: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^[Tt]\|\d+$").unwrap()
});

/// Decides whether the last line of a file is a footer.
///
/// The detector only sees trimmed, non-empty candidates; blank last lines
/// are never footers.
#[derive(Clone, Default)]
pub enum FooterDetector {
    /// Pure digits, e.g. `3`
    PureDigits,
    /// `R` prefix with digits, e.g. `R00003`
    RPrefixed,
    /// `T|` prefix with digits, e.g. `T|3`
    TPipePrefixed,
    /// Any of the three common numeric formats
    #[default]
    CommonNumeric,
    /// Caller-supplied predicate
    Custom(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl FooterDetector {
    pub fn matches(&self, line: &str) -> bool {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return false;
        }
        match self {
            FooterDetector::PureDigits => PURE_DIGITS.is_match(trimmed),
            FooterDetector::RPrefixed => R_PREFIXED.is_match(trimmed),
            FooterDetector::TPipePrefixed => T_PIPE_PREFIXED.is_match(trimmed),
            FooterDetector::CommonNumeric => {
                PURE_DIGITS.is_match(trimmed)
                    || R_PREFIXED.is_match(trimmed)
                    || T_PIPE_PREFIXED.is_match(trimmed)
            },
            FooterDetector::Custom(predicate) => predicate(trimmed),
        }
    }
}

impl std::fmt::Debug for FooterDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FooterDetector::PureDigits => "PureDigits",
            FooterDetector::RPrefixed => "RPrefixed",
            FooterDetector::TPipePrefixed => "TPipePrefixed",
            FooterDetector::CommonNumeric => "CommonNumeric",
            FooterDetector::Custom(_) => "Custom",
        };
        write!(f, "FooterDetector::{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pure_digits() {
        let detector = FooterDetector::PureDigits;
        assert!(detector.matches("3"));
        assert!(detector.matches("  00042  "));
        assert!(!detector.matches("R3"));
        assert!(!detector.matches("A,1"));
        assert!(!detector.matches(""));
    }

    #[test]
    fn test_r_prefixed() {
        let detector = FooterDetector::RPrefixed;
        assert!(detector.matches("R00003"));
        assert!(detector.matches("r7"));
        assert!(!detector.matches("3"));
        assert!(!detector.matches("R"));
    }

    #[test]
    fn test_t_pipe_prefixed() {
        let detector = FooterDetector::TPipePrefixed;
        assert!(detector.matches("T|3"));
        assert!(detector.matches("t|123"));
        assert!(!detector.matches("T3"));
        assert!(!detector.matches("T|"));
    }

    #[test]
    fn test_common_numeric_accepts_all_formats() {
        let detector = FooterDetector::CommonNumeric;
        assert!(detector.matches("3"));
        assert!(detector.matches("R00003"));
        assert!(detector.matches("T|3"));
        assert!(!detector.matches("B,2"));
    }

    #[test]
    fn test_custom_predicate() {
        let detector = FooterDetector::Custom(Arc::new(|line| line.starts_with("EOF")));
        assert!(detector.matches("EOF 3"));
        assert!(!detector.matches("3"));
    }
}
