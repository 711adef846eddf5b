//! Prelude module for convenient imports
//!
//! This module re-exports the types needed to read a script, compile it and
//! run it against in-memory or file-backed data.
//!
//! # Example
//!
//! ```rust,no_run
//! use foodcalc::prelude::*;
//!
//! # fn run_example() -> Result<(), FoodCalcError> {
//! let mut diag = Diagnostics::new();
//! let mut reader = ScriptReader::new();
//! reader.read_file("nutrients.fc", &mut diag)?;
//! let script = reader.finish(&mut diag)?;
//!
//! let provider = FileProvider::new();
//! let outcome = Session::new(&provider).run_script(&script, &mut diag)?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

// Staged driver and compilation
pub use crate::compiler::{CompilationArtifacts, Compiler};
pub use crate::session::{Outcome, Session};

// Script model
pub use crate::script::{Command, Script, ScriptReader};

// Food table and saved state
pub use crate::artifact::SavedState;
pub use crate::data::{FoodEntry, FoodTable};

// Record I/O
pub use crate::io::{FileProvider, MemoryProvider, RecordSink, RecordSource, SourceProvider};

// Error types
pub use crate::error::{
    CompileError, DataError, Diagnostics, FatalError, FoodCalcError, ScriptError,
};
