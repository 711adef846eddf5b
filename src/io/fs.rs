use super::{RecordSink, RecordSource, SinkSpec, SourceProvider, SourceSpec};
use crate::error::{FatalError, FoodCalcError};
use crate::script::FileFormat;
use std::fs::File;
use std::io::{BufReader, BufWriter};

/// Opens sources and sinks on the filesystem. The name `-` stands for
/// standard input or standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileProvider;

impl FileProvider {
    pub fn new() -> Self {
        Self
    }
}

impl SourceProvider for FileProvider {
    fn open_source(&self, spec: &SourceSpec) -> Result<Box<dyn RecordSource>, FoodCalcError> {
        let reader: Box<dyn std::io::BufRead> = if spec.file == "-" {
            if spec.format == FileFormat::BinNative {
                return Err(FatalError::Open {
                    file: spec.file.clone(),
                    message: "binary input can not be read from standard input".to_string(),
                }
                .into());
            }
            Box::new(BufReader::new(std::io::stdin()))
        } else {
            let file = File::open(&spec.file).map_err(|e| FatalError::Open {
                file: spec.file.clone(),
                message: e.to_string(),
            })?;
            Box::new(BufReader::new(file))
        };
        super::source_from_reader(spec, reader)
    }

    fn open_sink(&self, spec: &SinkSpec) -> Result<Box<dyn RecordSink>, FoodCalcError> {
        let writer: Box<dyn std::io::Write> = if spec.file == "-" {
            Box::new(BufWriter::new(std::io::stdout()))
        } else {
            let file = File::create(&spec.file).map_err(|e| FatalError::Open {
                file: spec.file.clone(),
                message: e.to_string(),
            })?;
            Box::new(BufWriter::new(file))
        };
        Ok(super::sink_from_writer(spec, writer))
    }
}
