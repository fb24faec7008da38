//! Error taxonomy for the batch engine
//!
//! Record-level failures carry an explicit [`ErrorClass`] tag that the chunk
//! engine uses to decide between skip, retry and abort. Run-level failures
//! are always fatal and end the run with a FAILED ledger entry.

use thiserror::Error;

use crate::ledger::LedgerError;

/// Closed set of record-level failure classes.
///
/// - `Skippable`: the record is excluded and counted against the skip budget
/// - `Retryable`: the operation may be re-attempted up to the retry budget,
///   then downgraded to a skip
/// - `Fatal`: the chunk transaction rolls back and the run fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Skippable,
    Retryable,
    Fatal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Skippable => write!(f, "skippable"),
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// A classified failure attributable to a single record.
#[derive(Debug, Clone)]
pub struct RecordError {
    class: ErrorClass,
    line: Option<u64>,
    message: String,
}

impl RecordError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            line: None,
            message: message.into(),
        }
    }

    pub fn skippable(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Skippable, message)
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Retryable, message)
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Fatal, message)
    }

    /// Attach the 1-based line position the failure originated from.
    pub fn at_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    pub fn line(&self) -> Option<u64> {
        self.line
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} error at line {}: {}", self.class, line, self.message),
            None => write!(f, "{} error: {}", self.class, self.message),
        }
    }
}

impl std::error::Error for RecordError {}

/// Fatal, run-level failures.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("IO error reading input: {0}")]
    Io(#[from] std::io::Error),

    #[error("header parsing failed at line {line}: {message}")]
    HeaderParse { line: u64, message: String },

    #[error("header validation failed: {0}")]
    HeaderValidation(String),

    #[error("required header line is missing")]
    MissingHeader,

    #[error("footer parsing failed at line {line}: {message}")]
    FooterParse { line: u64, message: String },

    #[error("footer validation failed: {0}")]
    FooterValidation(String),

    #[error("skip limit {limit} exceeded: {cause}")]
    SkipLimitExceeded { limit: u64, cause: String },

    #[error("invalid run parameters: {0}")]
    Parameters(String),

    #[error("record processing failed: {0}")]
    Record(String),

    #[error("chunk write failed: {0}")]
    Write(String),

    #[error("record count mismatch: declared {declared}, actual {actual}")]
    CountMismatch { declared: u64, actual: u64 },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("partition worker failed: {0}")]
    Worker(String),
}
