use super::ObservationSink;
use crate::data::FoodTable;
use crate::error::{Diagnostics, FatalError};
use crate::io::RecordSink;

/// Writes the leading output slots of every observation to a record sink.
pub struct OutputWriter {
    sink: Box<dyn RecordSink>,
    width: usize,
    written: usize,
}

impl OutputWriter {
    pub fn new(sink: Box<dyn RecordSink>, width: usize) -> Self {
        Self {
            sink,
            width,
            written: 0,
        }
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

impl ObservationSink for OutputWriter {
    fn emit(&mut self, obs: &[f64], _diag: &mut Diagnostics) -> Result<(), FatalError> {
        self.sink.write_record(&obs[..self.width])?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self, _table: &mut FoodTable, _diag: &mut Diagnostics) -> Result<(), FatalError> {
        self.sink.finish()
    }
}
