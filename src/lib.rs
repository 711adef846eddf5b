//! # FoodCalc - Food Composition Calculation Engine
//!
//! **FoodCalc** compiles a small command language describing a nutrient
//! calculation into a flat, position-addressed plan and streams input
//! records through it. Each input line names a food and an amount; the
//! engine looks the food up in a table built from foods, groups and recipes
//! files, scales its nutrients, applies cooking and preparation losses,
//! evaluates derived fields, filters and finally writes one output record
//! per line or one per group.
//!
//! ## Core Workflow
//!
//! 1.  **Read the script**: [`script::ScriptReader`] turns command files into a typed [`script::Script`].
//! 2.  **Compile**: [`compiler::Compiler::builder`] resolves every field name, optimizes the `set` and `where` expressions and lowers them into a [`plan::CompiledPlan`].
//! 3.  **Load**: [`data::TableLoader`] builds the [`data::FoodTable`]; recipes files are folded into it by the executor.
//! 4.  **Run or save**: [`session::Session`] drives the stages and either writes the output or saves the compiled state with [`artifact::SavedState`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use foodcalc::prelude::*;
//!
//! fn main() -> Result<(), FoodCalcError> {
//!     let provider = MemoryProvider::new()
//!         .with_file("foods.txt", "foodid,energy\n1,100\n")
//!         .with_file("input.txt", "food,grams\n1,250\n");
//!
//!     let mut diag = Diagnostics::new();
//!     let mut reader = ScriptReader::new();
//!     reader.read_str(
//!         "script",
//!         "foods: foods.txt\ninput: input.txt\ninput scale: 0.01\noutput: out.txt\n",
//!         &mut diag,
//!     )?;
//!     let script = reader.finish(&mut diag)?;
//!
//!     Session::new(&provider).run_script(&script, &mut diag)?;
//!     println!("{}", provider.output_text("out.txt").unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod ast;
pub mod compiler;
pub mod data;
pub mod error;
pub mod executor;
pub mod io;
pub mod plan;
pub mod prelude;
pub mod script;
pub mod session;

pub use artifact::SavedState;
pub use compiler::Compiler;
pub use data::FoodTable;
pub use error::{Diagnostics, FoodCalcError};
pub use session::{Outcome, Session};
