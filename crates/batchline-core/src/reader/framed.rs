//! Deferred-decision line source
//!
//! Single forward pass over the input with O(1) buffered state. A line is
//! never released as data the moment it is read: it is held in a one-slot
//! buffer and released only once a subsequent line proves it is not the last
//! line of the file, hence not a footer candidate. At end of stream the
//! buffered line is the true last line and is either parsed as a footer or
//! released as the final data record.
//!
//! The buffer advances only when the caller explicitly consumes the
//! confirmed line, so a caller-level skip/retry policy can re-read the same
//! logical position without the source silently moving on.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::{debug, info};

use crate::error::RunError;

use super::model::{FooterInfo, FooterSpec, HeaderInfo, HeaderSpec, Line};

/// Line-range scope for partitioned reads. `skip_lines` raw lines are
/// discarded on open; `line_limit` caps how many raw lines are visible.
#[derive(Debug, Clone, Copy, Default)]
struct SourceScope {
    skip_lines: u64,
    line_limit: Option<u64>,
}

/// Frame state flushed out of the source when the stream closes.
#[derive(Debug, Clone, Default)]
pub struct FrameSummary {
    pub header: Option<HeaderInfo>,
    pub footer: Option<FooterInfo>,
    /// Data lines handed off successfully
    pub emitted: u64,
    /// Data lines consumed as skipped by the caller
    pub skipped: u64,
    /// Low-level line reads performed
    pub read_calls: u64,
}

/// Single-pass reader with deferred line classification.
pub struct FramedLineSource<B: BufRead> {
    input: B,
    header_spec: Option<HeaderSpec>,
    footer_spec: Option<FooterSpec>,
    scope: SourceScope,

    /// One-slot buffer: the line awaiting confirmation (or consumption)
    prev: Option<Line>,
    /// The line that confirmed `prev`, promoted to `prev` on consumption
    pending_next: Option<Line>,
    /// True once `prev` is known not to be the last line (or is the last
    /// line and failed the footer test)
    confirmed: bool,
    first_line_seen: bool,
    eof: bool,
    finished: bool,

    line_no: u64,
    scoped_reads: u64,
    read_calls: u64,
    emitted: u64,
    skipped: u64,

    header: Option<HeaderInfo>,
    footer: Option<FooterInfo>,
}

impl FramedLineSource<BufReader<File>> {
    /// Open a file-backed source.
    pub fn open(
        path: &Path,
        header: Option<HeaderSpec>,
        footer: Option<FooterSpec>,
    ) -> Result<Self, RunError> {
        debug!(path = %path.display(), "opening input file");
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), header, footer))
    }
}

impl<B: BufRead> FramedLineSource<B> {
    pub fn new(input: B, header: Option<HeaderSpec>, footer: Option<FooterSpec>) -> Self {
        Self {
            input,
            header_spec: header,
            footer_spec: footer,
            scope: SourceScope::default(),
            prev: None,
            pending_next: None,
            confirmed: false,
            first_line_seen: false,
            eof: false,
            finished: false,
            line_no: 0,
            scoped_reads: 0,
            read_calls: 0,
            emitted: 0,
            skipped: 0,
            header: None,
            footer: None,
        }
    }

    /// Restrict the source to a line range (partitioned execution). Line
    /// numbers stay global: the first visible line is `skip_lines + 1`.
    pub fn with_scope(mut self, skip_lines: u64, line_limit: Option<u64>) -> Self {
        self.scope = SourceScope {
            skip_lines,
            line_limit,
        };
        self
    }

    /// Return the next confirmed data line without consuming it.
    ///
    /// Pulls raw lines forward until the buffered line is confirmed
    /// non-terminal, the footer is recognized, or the stream ends. Repeated
    /// calls without an intervening [`consume`](Self::consume) return the
    /// same line.
    pub fn peek(&mut self) -> Result<Option<Line>, RunError> {
        loop {
            if self.confirmed {
                return Ok(self.prev.clone());
            }
            if self.eof {
                return Ok(None);
            }

            match self.next_raw_line()? {
                Some(line) => {
                    if !self.first_line_seen {
                        self.first_line_seen = true;
                        if self.header_spec.is_some() {
                            self.consume_header(&line)?;
                            continue;
                        }
                        self.prev = Some(line);
                        continue;
                    }
                    if self.prev.is_some() {
                        // The new line proves prev is not the last line.
                        self.pending_next = Some(line);
                        self.confirmed = true;
                    } else {
                        self.prev = Some(line);
                    }
                },
                None => {
                    self.eof = true;
                    self.finish_at_eof()?;
                },
            }
        }
    }

    /// Consume the confirmed line after a successful hand-off.
    pub fn consume(&mut self) -> Option<Line> {
        self.take_confirmed(false)
    }

    /// Consume the confirmed line as skipped (caller-level skip policy).
    pub fn consume_skipped(&mut self) -> Option<Line> {
        self.take_confirmed(true)
    }

    fn take_confirmed(&mut self, skipped: bool) -> Option<Line> {
        if !self.confirmed {
            return None;
        }
        let line = self.prev.take();
        self.prev = self.pending_next.take();
        self.confirmed = false;
        if skipped {
            self.skipped += 1;
        } else {
            self.emitted += 1;
        }
        line
    }

    /// Close the source and flush frame state for the ledger.
    pub fn finish(self) -> FrameSummary {
        debug!(
            emitted = self.emitted,
            skipped = self.skipped,
            read_calls = self.read_calls,
            "closing line source"
        );
        FrameSummary {
            header: self.header,
            footer: self.footer,
            emitted: self.emitted,
            skipped: self.skipped,
            read_calls: self.read_calls,
        }
    }

    pub fn header(&self) -> Option<&HeaderInfo> {
        self.header.as_ref()
    }

    pub fn footer(&self) -> Option<&FooterInfo> {
        self.footer.as_ref()
    }

    /// Data lines handed off successfully so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Low-level line reads performed so far.
    pub fn read_calls(&self) -> u64 {
        self.read_calls
    }

    fn consume_header(&mut self, line: &Line) -> Result<(), RunError> {
        // consume_header is only called when a spec is configured
        let Some(spec) = &self.header_spec else {
            return Ok(());
        };
        let header = (spec.parser)(&line.text).map_err(|e| RunError::HeaderParse {
            line: line.number,
            message: e.to_string(),
        })?;
        if let Some(validator) = &spec.validator {
            validator(&header).map_err(|e| RunError::HeaderValidation(e.to_string()))?;
        }
        info!(line = line.number, date = ?header.business_date, "header parsed");
        self.header = Some(header);
        Ok(())
    }

    /// The buffered line is the true last line: footer or final data record.
    fn finish_at_eof(&mut self) -> Result<(), RunError> {
        if let Some(last) = self.prev.take() {
            if let Some(spec) = &self.footer_spec {
                if spec.detector.matches(&last.text) {
                    let footer =
                        (spec.parser)(&last.text).map_err(|e| RunError::FooterParse {
                            line: last.number,
                            message: e.to_string(),
                        })?;
                    if let Some(validator) = &spec.validator {
                        validator(&footer, self.emitted)
                            .map_err(|e| RunError::FooterValidation(e.to_string()))?;
                    }
                    info!(
                        line = last.number,
                        declared = footer.declared_count,
                        emitted = self.emitted,
                        "footer parsed"
                    );
                    self.footer = Some(footer);
                    self.finished = true;
                    return Ok(());
                }
            }
            // Not a footer: release the last line as a final data record.
            self.prev = Some(last);
            self.confirmed = true;
        }
        if !self.finished {
            self.finished = true;
            if self.header.is_none() {
                if let Some(spec) = &self.header_spec {
                    if spec.required {
                        return Err(RunError::MissingHeader);
                    }
                }
            }
        }
        Ok(())
    }

    fn next_raw_line(&mut self) -> Result<Option<Line>, RunError> {
        while self.line_no < self.scope.skip_lines {
            let mut discard = String::new();
            if self.input.read_line(&mut discard)? == 0 {
                return Ok(None);
            }
            self.read_calls += 1;
            self.line_no += 1;
        }
        if let Some(limit) = self.scope.line_limit {
            if self.scoped_reads >= limit {
                return Ok(None);
            }
        }

        let mut buf = String::new();
        if self.input.read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        self.read_calls += 1;
        self.line_no += 1;
        self.scoped_reads += 1;
        while buf.ends_with('\n') || buf.ends_with('\r') {
            buf.pop();
        }
        Ok(Some(Line {
            number: self.line_no,
            text: buf,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn source(content: &str) -> FramedLineSource<Cursor<Vec<u8>>> {
        FramedLineSource::new(Cursor::new(content.as_bytes().to_vec()), None, None)
    }

    fn framed(
        content: &str,
        header: Option<HeaderSpec>,
        footer: Option<FooterSpec>,
    ) -> FramedLineSource<Cursor<Vec<u8>>> {
        FramedLineSource::new(Cursor::new(content.as_bytes().to_vec()), header, footer)
    }

    fn drain<B: BufRead>(src: &mut FramedLineSource<B>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = src.peek().unwrap() {
            out.push(line.text.clone());
            src.consume();
        }
        out
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let mut src = source("");
        assert!(src.peek().unwrap().is_none());
        let summary = src.finish();
        assert!(summary.header.is_none());
        assert!(summary.footer.is_none());
        assert_eq!(summary.emitted, 0);
    }

    #[test]
    fn test_header_only_file() {
        let mut src = framed("20260119\n", Some(HeaderSpec::date("%Y%m%d")), None);
        assert!(src.peek().unwrap().is_none());
        let summary = src.finish();
        assert!(summary.header.is_some());
        assert!(summary.footer.is_none());
        assert_eq!(summary.emitted, 0);
    }

    #[test]
    fn test_header_data_footer() {
        let mut src = framed(
            "20260119\nA,1\nB,2\n2",
            Some(HeaderSpec::date("%Y%m%d")),
            Some(FooterSpec::count()),
        );
        assert_eq!(drain(&mut src), vec!["A,1", "B,2"]);
        let summary = src.finish();
        assert_eq!(summary.footer.unwrap().declared_count, 2);
        assert_eq!(summary.emitted, 2);
    }

    #[test]
    fn test_single_read_pass() {
        // Exactly one low-level read per line in the file
        let mut src = framed(
            "20260119\nA,1\nB,2\n2",
            Some(HeaderSpec::date("%Y%m%d")),
            Some(FooterSpec::count()),
        );
        drain(&mut src);
        assert_eq!(src.read_calls(), 4);
    }

    #[test]
    fn test_last_line_failing_predicate_is_data() {
        // The last line is only withheld when it matches the detector
        let mut src = framed("A,1\nB,2\nC,3", None, Some(FooterSpec::count()));
        assert_eq!(drain(&mut src), vec!["A,1", "B,2", "C,3"]);
        assert!(src.footer().is_none());
    }

    #[test]
    fn test_last_line_is_data_without_footer_spec() {
        // A numeric last line is plain data when no footer parser is set
        let mut src = source("A,1\n2");
        assert_eq!(drain(&mut src), vec!["A,1", "2"]);
    }

    #[test]
    fn test_peek_is_stable_until_consumed() {
        let mut src = source("A,1\nB,2\nC,3");
        let first = src.peek().unwrap().unwrap();
        let again = src.peek().unwrap().unwrap();
        assert_eq!(first, again);
        src.consume();
        assert_eq!(src.peek().unwrap().unwrap().text, "B,2");
    }

    #[test]
    fn test_consume_skipped_counts_separately() {
        let mut src = source("A,1\nBAD\nC,3");
        src.peek().unwrap();
        src.consume();
        src.peek().unwrap();
        src.consume_skipped();
        src.peek().unwrap();
        src.consume();
        assert!(src.peek().unwrap().is_none());
        let summary = src.finish();
        assert_eq!(summary.emitted, 2);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_line_numbers_are_one_based() {
        let mut src = framed("20260119\nA,1\n1", Some(HeaderSpec::date("%Y%m%d")), None);
        let line = src.peek().unwrap().unwrap();
        assert_eq!(line.number, 2);
    }

    #[test]
    fn test_header_parse_failure_is_fatal() {
        let mut src = framed("garbage\nA,1\n", Some(HeaderSpec::date("%Y%m%d")), None);
        let err = src.peek().unwrap_err();
        assert!(matches!(err, RunError::HeaderParse { line: 1, .. }));
    }

    #[test]
    fn test_header_validation_failure_is_fatal() {
        let spec = HeaderSpec::date("%Y%m%d").with_validator(std::sync::Arc::new(|_| {
            Err(anyhow::anyhow!("date out of range"))
        }));
        let mut src = framed("20260119\nA,1\n", Some(spec), None);
        let err = src.peek().unwrap_err();
        assert!(matches!(err, RunError::HeaderValidation(_)));
    }

    #[test]
    fn test_footer_parse_failure_is_fatal() {
        // Custom detector matches a line the count parser cannot read
        let spec = FooterSpec::count().with_detector(super::super::FooterDetector::Custom(
            std::sync::Arc::new(|line: &str| line.starts_with("EOF")),
        ));
        let mut src = framed("A,1\nEOF x", None, Some(spec));
        src.peek().unwrap();
        src.consume();
        let err = src.peek().unwrap_err();
        assert!(matches!(err, RunError::FooterParse { line: 2, .. }));
    }

    #[test]
    fn test_footer_validator_sees_emitted_count() {
        let spec = FooterSpec::count().with_validator(std::sync::Arc::new(
            |footer: &FooterInfo, emitted: u64| {
                if footer.declared_count == emitted {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!(
                        "declared {} but emitted {}",
                        footer.declared_count,
                        emitted
                    ))
                }
            },
        ));
        let mut src = framed("A,1\nB,2\n2", None, Some(spec.clone()));
        assert_eq!(drain(&mut src), vec!["A,1", "B,2"]);

        let mut bad = framed("A,1\n2", None, Some(spec));
        bad.peek().unwrap();
        bad.consume();
        assert!(matches!(
            bad.peek().unwrap_err(),
            RunError::FooterValidation(_)
        ));
    }

    #[test]
    fn test_missing_required_header_fails_empty_file() {
        let mut src = framed("", Some(HeaderSpec::date("%Y%m%d").required()), None);
        assert!(matches!(src.peek().unwrap_err(), RunError::MissingHeader));
    }

    #[test]
    fn test_scope_limits_visible_lines() {
        // Lines 2..=3 of a five-line file; last scoped line is still data
        // because no footer spec is configured for a middle partition.
        let mut src = source("A,1\nB,2\nC,3\nD,4\nE,5").with_scope(1, Some(2));
        let lines = drain(&mut src);
        assert_eq!(lines, vec!["B,2", "C,3"]);
    }

    #[test]
    fn test_scope_preserves_global_line_numbers() {
        let mut src = source("A,1\nB,2\nC,3").with_scope(1, None);
        assert_eq!(src.peek().unwrap().unwrap().number, 2);
    }

    #[test]
    fn test_crlf_lines_are_trimmed() {
        let mut src = source("A,1\r\nB,2\r\n");
        assert_eq!(drain(&mut src), vec!["A,1", "B,2"]);
    }
}
