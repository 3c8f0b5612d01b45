//! Delimited text record source
//!
//! Reads `id,firstname,lastname,age` rows after a single header line.
//!
//! # Tolerance
//! The tokenizer is non-strict: a row with fewer than four fields gets
//! defaults for the missing trailing ones (`id = None`, empty names,
//! `age = 0`) and extra fields are ignored. A field that is present but
//! cannot be coerced to its type (`age = "ten"`) is a hard
//! [`BatchError::Parse`] carrying the physical line number.

use batchload_common::{BatchError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::record::Student;

/// Column names, in positional order
pub const FIELD_NAMES: [&str; 4] = ["id", "firstname", "lastname", "age"];

const ID: usize = 0;
const FIRST_NAME: usize = 1;
const LAST_NAME: usize = 2;
const AGE: usize = 3;

/// Lines consumed before the CSV reader sees the stream
const HEADER_LINES: u64 = 1;

/// Forward-only, finite sequence of parsed records
///
/// Accessed from a single reader context; implementations need not be `Sync`.
pub trait RecordSource: Send {
    /// Next record, or `None` once the input is exhausted
    fn next_record(&mut self) -> Result<Option<Student>>;

    /// Number of records produced so far
    fn records_read(&self) -> u64;
}

/// CSV-backed [`RecordSource`]
pub struct CsvRecordSource<R: Read> {
    reader: csv::Reader<BufReader<R>>,
    row: csv::StringRecord,
    records_read: u64,
}

impl CsvRecordSource<File> {
    /// Open a file and skip its header line
    pub fn open(path: impl AsRef<Path>, delimiter: u8) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            BatchError::Io(std::io::Error::new(
                e.kind(),
                format!("failed to open {}: {}", path.display(), e),
            ))
        })?;

        debug!(path = %path.display(), "Opened record source");
        Self::from_reader(file, delimiter)
    }
}

impl<R: Read> CsvRecordSource<R> {
    /// Wrap any reader; the first line is discarded unconditionally
    pub fn from_reader(inner: R, delimiter: u8) -> Result<Self> {
        let mut buffered = BufReader::new(inner);

        // Raw bytes: the header is never decoded, so any encoding is fine
        let mut header = Vec::new();
        let bytes = buffered.read_until(b'\n', &mut header)?;
        debug!(
            bytes,
            header = %String::from_utf8_lossy(&header).trim_end(),
            "Skipped header line"
        );

        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(delimiter)
            .from_reader(buffered);

        Ok(Self {
            reader,
            row: csv::StringRecord::new(),
            records_read: 0,
        })
    }

    /// Release the underlying reader
    pub fn close(self) {
        debug!(records_read = self.records_read, "Closed record source");
    }
}

impl<R: Read + Send> RecordSource for CsvRecordSource<R> {
    fn next_record(&mut self) -> Result<Option<Student>> {
        if !self.reader.read_record(&mut self.row).map_err(csv_error)? {
            return Ok(None);
        }

        let line = self.row.position().map(|p| p.line()).unwrap_or(0) + HEADER_LINES;
        let student = parse_row(&self.row, line)?;
        self.records_read += 1;

        Ok(Some(student))
    }

    fn records_read(&self) -> u64 {
        self.records_read
    }
}

fn parse_row(row: &csv::StringRecord, line: u64) -> Result<Student> {
    let field = |idx: usize| row.get(idx).unwrap_or("");

    Ok(Student {
        id: parse_field(field(ID), FIELD_NAMES[ID], line)?,
        first_name: field(FIRST_NAME).to_string(),
        last_name: field(LAST_NAME).to_string(),
        age: parse_field(field(AGE), FIELD_NAMES[AGE], line)?.unwrap_or_default(),
    })
}

/// Empty means "missing", anything else must parse
fn parse_field<T>(raw: &str, name: &str, line: u64) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }

    raw.parse::<T>()
        .map(Some)
        .map_err(|e| BatchError::parse(line, format!("invalid {} '{}': {}", name, raw, e)))
}

fn csv_error(err: csv::Error) -> BatchError {
    let line = err.position().map(|p| p.line()).unwrap_or(0) + HEADER_LINES;
    let message = err.to_string();

    match err.into_kind() {
        csv::ErrorKind::Io(io) => BatchError::Io(io),
        _ => BatchError::parse(line, message),
    }
}
