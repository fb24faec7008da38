//! Frame model types: lines, header and footer metadata, parser hooks

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A raw line with its 1-based position in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub number: u64,
    pub text: String,
}

/// Metadata parsed from a file's header line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderInfo {
    /// Business date declared by the header, if any
    pub business_date: Option<NaiveDate>,
    /// Free-form metadata
    pub metadata: Map<String, Value>,
}

impl HeaderInfo {
    pub fn with_date(date: NaiveDate) -> Self {
        Self {
            business_date: Some(date),
            metadata: Map::new(),
        }
    }
}

/// Metadata parsed from a file's footer line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FooterInfo {
    /// Record count the file declares for itself
    pub declared_count: u64,
    /// Free-form metadata (checksums and the like)
    pub metadata: Map<String, Value>,
}

impl FooterInfo {
    pub fn with_count(count: u64) -> Self {
        Self {
            declared_count: count,
            metadata: Map::new(),
        }
    }
}

pub type HeaderParserFn = Arc<dyn Fn(&str) -> anyhow::Result<HeaderInfo> + Send + Sync>;
pub type HeaderValidatorFn = Arc<dyn Fn(&HeaderInfo) -> anyhow::Result<()> + Send + Sync>;
pub type FooterParserFn = Arc<dyn Fn(&str) -> anyhow::Result<FooterInfo> + Send + Sync>;
/// Validates the parsed footer against the number of records already emitted.
pub type FooterValidatorFn = Arc<dyn Fn(&FooterInfo, u64) -> anyhow::Result<()> + Send + Sync>;

/// Header handling for a run.
///
/// When a spec is configured, the very first line of the file is always
/// treated as a header candidate. Parse or validation failure is fatal.
#[derive(Clone)]
pub struct HeaderSpec {
    pub(crate) parser: HeaderParserFn,
    pub(crate) validator: Option<HeaderValidatorFn>,
    pub(crate) required: bool,
}

impl HeaderSpec {
    pub fn new(parser: HeaderParserFn) -> Self {
        Self {
            parser,
            validator: None,
            required: false,
        }
    }

    /// Header that is a bare business date in the given chrono format.
    pub fn date(format: &'static str) -> Self {
        Self::new(Arc::new(move |line: &str| {
            let date = NaiveDate::parse_from_str(line.trim(), format)?;
            Ok(HeaderInfo::with_date(date))
        }))
    }

    pub fn with_validator(mut self, validator: HeaderValidatorFn) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Fail the run if the file has no header line (i.e. the file is empty).
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl std::fmt::Debug for HeaderSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderSpec")
            .field("validator", &self.validator.is_some())
            .field("required", &self.required)
            .finish()
    }
}

/// Footer handling for a run.
///
/// The last line of the file is tested against the detector; on a match it
/// is parsed (and optionally validated) instead of being emitted as data.
#[derive(Clone)]
pub struct FooterSpec {
    pub(crate) parser: FooterParserFn,
    pub(crate) validator: Option<FooterValidatorFn>,
    pub(crate) detector: super::FooterDetector,
}

impl FooterSpec {
    pub fn new(parser: FooterParserFn) -> Self {
        Self {
            parser,
            validator: None,
            detector: super::FooterDetector::default(),
        }
    }

    /// Footer that declares a record count in one of the common numeric
    /// formats (`3`, `R00003`, `T|3`).
    pub fn count() -> Self {
        Self::new(Arc::new(|line: &str| {
            let trimmed = line.trim();
            let digits = trimmed
                .trim_start_matches(['R', 'r'])
                .trim_start_matches(['T', 't'])
                .trim_start_matches('|');
            let count: u64 = digits
                .parse()
                .map_err(|_| anyhow::anyhow!("not a record count: {trimmed:?}"))?;
            Ok(FooterInfo::with_count(count))
        }))
    }

    pub fn with_validator(mut self, validator: FooterValidatorFn) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_detector(mut self, detector: super::FooterDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Detach the validator so a partition-scoped reader never judges the
    /// footer against its own partial emitted count.
    pub(crate) fn without_validator(mut self) -> Self {
        self.validator = None;
        self
    }
}

impl std::fmt::Debug for FooterSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FooterSpec")
            .field("validator", &self.validator.is_some())
            .field("detector", &self.detector)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_date_header_spec() {
        let spec = HeaderSpec::date("%Y%m%d");
        let info = (spec.parser)("20260119").unwrap();
        assert_eq!(
            info.business_date,
            Some(NaiveDate::from_ymd_opt(2026, 1, 19).unwrap())
        );
        assert!((spec.parser)("not-a-date").is_err());
    }

    #[test]
    fn test_count_footer_spec_formats() {
        let spec = FooterSpec::count();
        assert_eq!((spec.parser)("3").unwrap().declared_count, 3);
        assert_eq!((spec.parser)("R00003").unwrap().declared_count, 3);
        assert_eq!((spec.parser)("T|42").unwrap().declared_count, 42);
        assert!((spec.parser)("abc").is_err());
    }
}
