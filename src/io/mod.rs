//! Record streams.
//!
//! The compiler and executor only see data files through [`RecordSource`] and
//! [`RecordSink`]: an ordered list of field names plus "read next record" and
//! "write record". A [`SourceProvider`] opens them from a [`SourceSpec`] or
//! [`SinkSpec`], so the same plan can run against files, standard streams or
//! in-memory buffers.

use crate::error::{Diagnostics, FatalError, FoodCalcError};
use crate::script::{Dialect, FileFormat};
use serde::{Deserialize, Serialize};

pub mod binary;
pub mod delimited;
pub mod fs;
pub mod memory;

pub use binary::{BinarySink, BinarySource};
pub use delimited::{DelimitedSink, DelimitedSource, format_value};
pub use fs::FileProvider;
pub use memory::MemoryProvider;

/// Field names declared by the script for sources without a header line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclaredFields {
    pub fields: Vec<String>,
    /// The first `star` fields are set by `*` lines and persist across records.
    pub star: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub file: String,
    pub format: FileFormat,
    pub dialect: Dialect,
    pub declared: Option<DeclaredFields>,
}

impl SourceSpec {
    /// A delimited text file with a header line.
    pub fn text(file: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            file: file.into(),
            format: FileFormat::Text,
            dialect,
            declared: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSpec {
    pub file: String,
    pub format: FileFormat,
    pub dialect: Dialect,
}

/// A stream of numeric records.
pub trait RecordSource {
    /// The name used in messages.
    fn name(&self) -> &str;

    /// Field names in column order, lowercased.
    fn fields(&self) -> &[String];

    /// How many leading fields come from `*` lines.
    fn star_fields(&self) -> usize;

    /// The line number of the record last returned.
    fn line(&self) -> usize;

    /// Marks columns whose values are text; they read as zero.
    fn set_text_columns(&mut self, text: &[bool]);

    /// Fills `buf` with the next record. Returns `Ok(false)` at the end of the
    /// stream. A malformed record is consumed and reported as a
    /// [`FoodCalcError::Data`] error; the caller may keep reading.
    fn next_record(&mut self, buf: &mut [f64]) -> Result<bool, FoodCalcError>;
}

pub trait RecordSink {
    fn write_header(&mut self, names: &[String]) -> Result<(), FatalError>;

    fn write_record(&mut self, values: &[f64]) -> Result<(), FatalError>;

    fn finish(&mut self) -> Result<(), FatalError>;
}

/// Opens record streams by name.
pub trait SourceProvider {
    fn open_source(&self, spec: &SourceSpec) -> Result<Box<dyn RecordSource>, FoodCalcError>;

    fn open_sink(&self, spec: &SinkSpec) -> Result<Box<dyn RecordSink>, FoodCalcError>;
}

/// Reads the next well-formed record into `buf`. Malformed records are
/// recorded in `diag` and skipped.
pub fn next_valid(
    source: &mut dyn RecordSource,
    buf: &mut [f64],
    diag: &mut Diagnostics,
) -> Result<bool, FatalError> {
    loop {
        match source.next_record(buf) {
            Ok(more) => return Ok(more),
            Err(FoodCalcError::Fatal(e)) => return Err(e),
            Err(e) => diag.record(e)?,
        }
    }
}

/// Wraps an opened byte stream in the reader for `spec.format`.
pub(crate) fn source_from_reader(
    spec: &SourceSpec,
    reader: Box<dyn std::io::BufRead>,
) -> Result<Box<dyn RecordSource>, FoodCalcError> {
    match spec.format {
        FileFormat::BinNative => {
            let declared = spec.declared.clone().unwrap_or_default();
            Ok(Box::new(BinarySource::new(&spec.file, reader, declared.fields)))
        }
        _ => Ok(Box::new(DelimitedSource::new(&spec.file, reader, spec)?)),
    }
}

pub(crate) fn sink_from_writer(
    spec: &SinkSpec,
    writer: Box<dyn std::io::Write>,
) -> Box<dyn RecordSink> {
    match spec.format {
        FileFormat::BinNative => Box::new(BinarySink::new(&spec.file, writer)),
        _ => Box::new(DelimitedSink::new(&spec.file, writer, spec.dialect)),
    }
}
