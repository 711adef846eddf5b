use super::{RecordSink, RecordSource, SinkSpec, SourceProvider, SourceSpec};
use crate::error::{FatalError, FoodCalcError};
use ahash::AHashMap;
use std::cell::RefCell;
use std::io::{Cursor, Write};
use std::rc::Rc;

/// Serves named in-memory files and captures everything written to sinks.
///
/// ```
/// use foodcalc::io::{MemoryProvider, SourceProvider, SourceSpec};
/// use foodcalc::script::Dialect;
///
/// let provider = MemoryProvider::new().with_file("foods.txt", "foodid,e\n1,10\n");
/// let source = provider
///     .open_source(&SourceSpec::text("foods.txt", Dialect::default()))
///     .unwrap();
/// assert_eq!(source.fields(), ["foodid", "e"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    files: AHashMap<String, Vec<u8>>,
    outputs: Rc<RefCell<AHashMap<String, Vec<u8>>>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: impl Into<String>, contents: impl AsRef<[u8]>) -> Self {
        self.insert(name, contents);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, contents: impl AsRef<[u8]>) {
        self.files.insert(name.into(), contents.as_ref().to_vec());
    }

    /// Raw bytes written to the sink `name`, if it was opened.
    pub fn output(&self, name: &str) -> Option<Vec<u8>> {
        self.outputs.borrow().get(name).cloned()
    }

    /// Text written to the sink `name`.
    pub fn output_text(&self, name: &str) -> Option<String> {
        self.output(name)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl SourceProvider for MemoryProvider {
    fn open_source(&self, spec: &SourceSpec) -> Result<Box<dyn RecordSource>, FoodCalcError> {
        let contents = self.files.get(&spec.file).ok_or_else(|| FatalError::Open {
            file: spec.file.clone(),
            message: "no such file".to_string(),
        })?;
        super::source_from_reader(spec, Box::new(Cursor::new(contents.clone())))
    }

    fn open_sink(&self, spec: &SinkSpec) -> Result<Box<dyn RecordSink>, FoodCalcError> {
        self.outputs.borrow_mut().insert(spec.file.clone(), Vec::new());
        let writer = SharedBuffer {
            name: spec.file.clone(),
            outputs: Rc::clone(&self.outputs),
        };
        Ok(super::sink_from_writer(spec, Box::new(writer)))
    }
}

struct SharedBuffer {
    name: String,
    outputs: Rc<RefCell<AHashMap<String, Vec<u8>>>>,
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.outputs
            .borrow_mut()
            .entry(self.name.clone())
            .or_default()
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
