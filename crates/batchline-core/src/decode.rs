//! Line tokenizing and record decoding
//!
//! A [`LineTokenizer`] splits a raw line into fields, a [`ColumnSpec`] table
//! cleans and names those fields, and a [`MappedDecoder`] assembles them
//! into a typed record through an explicit mapping closure. Decode failures
//! are skippable by default so the chunk engine can count them against the
//! skip budget; a mapping that must abort the run returns a fatal error.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::error::RecordError;
use crate::reader::Line;

/// Splits a raw line into string fields.
#[derive(Debug, Clone)]
pub enum LineTokenizer {
    /// Single-character delimiter with optional surrounding-quote trimming
    Delimited { delimiter: char, quote: Option<char> },
    /// Fixed-width column ranges as `(start, end)` byte offsets, end exclusive
    FixedWidth(Vec<(usize, usize)>),
}

impl LineTokenizer {
    pub fn delimited(delimiter: char) -> Self {
        LineTokenizer::Delimited {
            delimiter,
            quote: None,
        }
    }

    /// Delimited fields whose values may be wrapped in a quote character.
    /// Only a matching leading and trailing pair is stripped.
    pub fn delimited_quoted(delimiter: char, quote: char) -> Self {
        LineTokenizer::Delimited {
            delimiter,
            quote: Some(quote),
        }
    }

    /// Fixed-width tokenizing fails when a column boundary lands inside a
    /// multi-byte character; the line is malformed for the layout, not a
    /// reason to bring the run down.
    pub fn tokenize(&self, line: &str) -> anyhow::Result<Vec<String>> {
        match self {
            LineTokenizer::Delimited { delimiter, quote } => Ok(line
                .split(*delimiter)
                .map(|field| match quote {
                    Some(q) => strip_quotes(field, *q).to_string(),
                    None => field.to_string(),
                })
                .collect()),
            LineTokenizer::FixedWidth(ranges) => ranges
                .iter()
                .map(|&(start, end)| {
                    let start = start.min(line.len());
                    let end = end.min(line.len());
                    line.get(start..end).map(str::to_string).ok_or_else(|| {
                        anyhow::anyhow!(
                            "column {start}..{end} splits a multi-byte character"
                        )
                    })
                })
                .collect(),
        }
    }
}

fn strip_quotes(field: &str, quote: char) -> &str {
    let trimmed = field.trim();
    if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
        &trimmed[quote.len_utf8()..trimmed.len() - quote.len_utf8()]
    } else {
        field
    }
}

/// An ordered set of decoded field values with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    fields: Vec<String>,
}

impl FieldSet {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn raw(&self, index: usize) -> anyhow::Result<&str> {
        self.fields
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| anyhow::anyhow!("field index {index} out of range"))
    }

    pub fn string(&self, index: usize) -> anyhow::Result<String> {
        Ok(self.raw(index)?.to_string())
    }

    pub fn u64(&self, index: usize) -> anyhow::Result<u64> {
        let raw = self.raw(index)?.trim();
        raw.parse()
            .map_err(|_| anyhow::anyhow!("field {index} is not an unsigned integer: {raw:?}"))
    }

    pub fn i64(&self, index: usize) -> anyhow::Result<i64> {
        let raw = self.raw(index)?.trim();
        raw.parse()
            .map_err(|_| anyhow::anyhow!("field {index} is not an integer: {raw:?}"))
    }

    pub fn f64(&self, index: usize) -> anyhow::Result<f64> {
        let raw = self.raw(index)?.trim();
        raw.parse()
            .map_err(|_| anyhow::anyhow!("field {index} is not a number: {raw:?}"))
    }

    pub fn date(&self, index: usize, format: &str) -> anyhow::Result<NaiveDate> {
        let raw = self.raw(index)?.trim();
        NaiveDate::parse_from_str(raw, format)
            .map_err(|_| anyhow::anyhow!("field {index} is not a {format} date: {raw:?}"))
    }
}

/// Case normalization applied to a cleaned field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseRule {
    Upper,
    Lower,
}

/// Declarative per-column cleaning rules.
///
/// Columns form an explicit mapping table: each spec names one source field
/// by position and says how to normalize it before the record is assembled.
#[derive(Debug, Clone)]
pub struct ColumnSpec {
    pub(crate) index: usize,
    pub(crate) name: &'static str,
    trim: bool,
    case: Option<CaseRule>,
    default_value: Option<String>,
}

impl ColumnSpec {
    pub fn new(index: usize, name: &'static str) -> Self {
        Self {
            index,
            name,
            trim: true,
            case: None,
            default_value: None,
        }
    }

    pub fn no_trim(mut self) -> Self {
        self.trim = false;
        self
    }

    pub fn uppercase(mut self) -> Self {
        self.case = Some(CaseRule::Upper);
        self
    }

    pub fn lowercase(mut self) -> Self {
        self.case = Some(CaseRule::Lower);
        self
    }

    /// Value substituted when the source field is missing or empty.
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    fn clean(&self, raw: Option<&str>) -> anyhow::Result<String> {
        let mut value = match raw {
            Some(v) => v.to_string(),
            None => match &self.default_value {
                Some(d) => return Ok(d.clone()),
                None => anyhow::bail!("missing field {} ({})", self.index, self.name),
            },
        };
        if self.trim {
            value = value.trim().to_string();
        }
        if value.is_empty() {
            if let Some(d) = &self.default_value {
                return Ok(d.clone());
            }
        }
        match self.case {
            Some(CaseRule::Upper) => value = value.to_uppercase(),
            Some(CaseRule::Lower) => value = value.to_lowercase(),
            None => {},
        }
        Ok(value)
    }
}

/// Turns a confirmed data line into a typed record.
pub trait RecordDecoder<T>: Send + Sync {
    fn decode(&self, line: &Line) -> Result<T, RecordError>;
}

impl<T, F> RecordDecoder<T> for F
where
    F: Fn(&Line) -> Result<T, RecordError> + Send + Sync,
{
    fn decode(&self, line: &Line) -> Result<T, RecordError> {
        self(line)
    }
}

type AssembleFn<T> = Arc<dyn Fn(&FieldSet) -> anyhow::Result<T> + Send + Sync>;

/// Tokenizer plus column table plus assembly closure.
///
/// The assembler sees the cleaned fields in column-table order, so the
/// record construction site reads like a positional schema.
#[derive(Clone)]
pub struct MappedDecoder<T> {
    tokenizer: LineTokenizer,
    columns: Vec<ColumnSpec>,
    assemble: AssembleFn<T>,
}

impl<T> MappedDecoder<T> {
    pub fn new(
        tokenizer: LineTokenizer,
        columns: Vec<ColumnSpec>,
        assemble: AssembleFn<T>,
    ) -> Self {
        Self {
            tokenizer,
            columns,
            assemble,
        }
    }
}

impl<T: Send + Sync> RecordDecoder<T> for MappedDecoder<T> {
    fn decode(&self, line: &Line) -> Result<T, RecordError> {
        let raw = self
            .tokenizer
            .tokenize(&line.text)
            .map_err(|e| RecordError::skippable(e.to_string()).at_line(line.number))?;
        let mut cleaned = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let value = column
                .clean(raw.get(column.index).map(String::as_str))
                .map_err(|e| RecordError::skippable(e.to_string()).at_line(line.number))?;
            cleaned.push(value);
        }
        (self.assemble)(&FieldSet::new(cleaned))
            .map_err(|e| RecordError::skippable(e.to_string()).at_line(line.number))
    }
}

impl<T> std::fmt::Debug for MappedDecoder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedDecoder")
            .field("tokenizer", &self.tokenizer)
            .field("columns", &self.columns)
            .finish()
    }
}

/// Optional transform between decode and write.
///
/// Returning `Ok(None)` filters the record out; filtered records are counted
/// separately from skips and never burn skip budget.
pub trait RecordProcessor<I, O>: Send + Sync {
    fn process(&self, record: I) -> Result<Option<O>, RecordError>;
}

impl<I, O, F> RecordProcessor<I, O> for F
where
    F: Fn(I) -> Result<Option<O>, RecordError> + Send + Sync,
{
    fn process(&self, record: I) -> Result<Option<O>, RecordError> {
        self(record)
    }
}
