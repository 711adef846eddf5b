use super::{RecordSink, RecordSource};
use crate::error::{DataError, FatalError, FoodCalcError};
use std::io::{BufRead, Read, Write};

const VALUE_WIDTH: usize = std::mem::size_of::<f64>();

/// Reads records of little-endian 8-byte floats, one per declared field.
pub struct BinarySource {
    name: String,
    reader: Box<dyn BufRead>,
    fields: Vec<String>,
    record: usize,
    bytes: Vec<u8>,
}

impl BinarySource {
    pub fn new(name: &str, reader: Box<dyn BufRead>, fields: Vec<String>) -> Self {
        let bytes = vec![0; fields.len() * VALUE_WIDTH];
        Self {
            name: name.to_string(),
            reader,
            fields,
            record: 0,
            bytes,
        }
    }

    /// Fills the record buffer, returning how many bytes were available.
    fn fill(&mut self) -> Result<usize, FoodCalcError> {
        let mut filled = 0;
        while filled < self.bytes.len() {
            match self.reader.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    return Err(FatalError::Io {
                        target: self.name.clone(),
                        message: e.to_string(),
                    }
                    .into());
                }
            }
        }
        Ok(filled)
    }
}

impl RecordSource for BinarySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fields(&self) -> &[String] {
        &self.fields
    }

    fn star_fields(&self) -> usize {
        0
    }

    fn line(&self) -> usize {
        self.record
    }

    fn set_text_columns(&mut self, _text: &[bool]) {}

    fn next_record(&mut self, buf: &mut [f64]) -> Result<bool, FoodCalcError> {
        if self.bytes.is_empty() {
            return Ok(false);
        }
        match self.fill()? {
            0 => Ok(false),
            n if n < self.bytes.len() => {
                // The partial record is dropped and the stream ends here.
                self.bytes.clear();
                Err(DataError::UnexpectedEof {
                    file: self.name.clone(),
                }
                .into())
            }
            _ => {
                self.record += 1;
                for (value, chunk) in buf.iter_mut().zip(self.bytes.chunks_exact(VALUE_WIDTH)) {
                    let mut raw = [0u8; VALUE_WIDTH];
                    raw.copy_from_slice(chunk);
                    *value = f64::from_le_bytes(raw);
                }
                Ok(true)
            }
        }
    }
}

/// Writes each record as consecutive little-endian 8-byte floats.
pub struct BinarySink {
    name: String,
    writer: Box<dyn Write>,
}

impl BinarySink {
    pub fn new(name: &str, writer: Box<dyn Write>) -> Self {
        Self {
            name: name.to_string(),
            writer,
        }
    }

    fn io_error(&self, e: std::io::Error) -> FatalError {
        FatalError::Io {
            target: self.name.clone(),
            message: e.to_string(),
        }
    }
}

impl RecordSink for BinarySink {
    /// Binary output carries no header.
    fn write_header(&mut self, _names: &[String]) -> Result<(), FatalError> {
        Ok(())
    }

    fn write_record(&mut self, values: &[f64]) -> Result<(), FatalError> {
        for value in values {
            self.writer
                .write_all(&value.to_le_bytes())
                .map_err(|e| self.io_error(e))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), FatalError> {
        self.writer.flush().map_err(|e| self.io_error(e))
    }
}

#[cfg(test)]
mod binary_tests {
    use super::*;

    #[test]
    fn test_partial_record_ends_stream() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1.5f64.to_le_bytes());
        bytes.extend_from_slice(&2.0f64.to_le_bytes());
        bytes.extend_from_slice(&3.0f64.to_le_bytes());
        let fields = vec!["a".to_string(), "b".to_string()];
        let mut source = BinarySource::new("in", Box::new(std::io::Cursor::new(bytes)), fields);
        let mut buf = [0.0; 2];

        assert!(source.next_record(&mut buf).unwrap());
        assert_eq!(buf, [1.5, 2.0]);
        assert!(matches!(
            source.next_record(&mut buf),
            Err(FoodCalcError::Data(DataError::UnexpectedEof { .. }))
        ));
        assert!(!source.next_record(&mut buf).unwrap());
    }
}
