//! The staged driver.
//!
//! A run compiles the script, builds the food table from the foods and
//! groups files, folds the recipes files into it and then either saves the
//! state or streams the input through the input plan.

use crate::artifact::SavedState;
use crate::compiler::Compiler;
use crate::data::{FoodTable, TableLoader};
use crate::error::{Diagnostics, FatalError, FoodCalcError};
use crate::executor::{Executor, OutputWriter, RecipeBuilder};
use crate::io::{RecordSource, SourceProvider};
use crate::plan::{ExecutionPlan, IoPlan};
use crate::script::{FileFormat, Script};
use tracing::info;

/// What a run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The state was saved instead of running the input.
    Saved { path: String, foods: usize },
    Ran { lines: usize, written: usize },
}

pub struct Session<'a> {
    provider: &'a dyn SourceProvider,
    input_override: Option<String>,
    output_override: Option<String>,
}

impl<'a> Session<'a> {
    pub fn new(provider: &'a dyn SourceProvider) -> Self {
        Self {
            provider,
            input_override: None,
            output_override: None,
        }
    }

    /// Reads the input from `file` instead of the file named in the script.
    pub fn with_input(mut self, file: Option<String>) -> Self {
        self.input_override = file;
        self
    }

    /// Writes the output to `file` instead of the file named in the script.
    pub fn with_output(mut self, file: Option<String>) -> Self {
        self.output_override = file;
        self
    }

    pub fn run_script(&self, script: &Script, diag: &mut Diagnostics) -> Result<Outcome, FoodCalcError> {
        let mut builder = Compiler::builder(script, self.provider);
        if let Some(input) = &self.input_override {
            builder = builder.with_input(input.clone());
        }
        if let Some(output) = &self.output_override {
            builder = builder.with_output(output.clone());
        }
        let artifacts = builder.build().compile(diag)?;
        let plan = artifacts.plan;

        let mut table = TableLoader::new(self.provider).load(&plan.load, diag)?;
        if let Some(weight_cook) = &plan.weight_cook {
            table.convert_weight_cooks(weight_cook);
        }

        for recipes in &plan.recipes {
            let mut source = self.provider.open_source(&recipes.source)?;
            let mut builder = RecipeBuilder::new(
                &recipes.assembly,
                recipes.recipe_sum,
                &recipes.source.file,
                table.width,
            );
            let stats = Executor::new(&recipes.execution).run(
                source.as_mut(),
                &mut table,
                &mut builder,
                diag,
            )?;
            info!(
                "Read recipes file {}. Recipes: {}. Ingredients: {}.",
                recipes.source.file,
                builder.recipes(),
                stats.lines
            );
        }
        info!("The food table contains {} foods", table.len());

        if let Some(path) = plan.save {
            let foods = table.len();
            SavedState::new(plan.input, plan.io, table).save(&path)?;
            return Ok(Outcome::Saved { path, foods });
        }
        self.execute(&plan.input, &plan.io, artifacts.input_source, &mut table, diag)
    }

    /// Runs the input plan of a saved state.
    pub fn run_saved(&self, state: SavedState, diag: &mut Diagnostics) -> Result<Outcome, FoodCalcError> {
        let SavedState { input, mut io, mut table } = state;
        if let Some(file) = &self.input_override {
            io.input.file = file.clone();
        }
        if let Some(file) = &self.output_override {
            io.output.file = file.clone();
        }
        info!("The food table contains {} foods", table.len());
        self.execute(&input, &io, None, &mut table, diag)
    }

    fn execute(
        &self,
        plan: &ExecutionPlan,
        io: &IoPlan,
        source: Option<Box<dyn RecordSource>>,
        table: &mut FoodTable,
        diag: &mut Diagnostics,
    ) -> Result<Outcome, FoodCalcError> {
        let mut source = match source {
            Some(source) => source,
            None => self.provider.open_source(&io.input)?,
        };
        if source.fields() != io.input_fields.as_slice() {
            return Err(FatalError::Open {
                file: io.input.file.clone(),
                message: "the input fields differ from the compiled ones".to_string(),
            }
            .into());
        }

        let mut sink = self.provider.open_sink(&io.output)?;
        if io.output.format == FileFormat::Text {
            sink.write_header(&io.header)?;
        }
        let mut writer = OutputWriter::new(sink, plan.core.real_width);
        let stats = Executor::new(plan).run(source.as_mut(), table, &mut writer, diag)?;

        info!(
            "Read input file {}. Lines: {}. Fields: {}",
            io.input.file,
            stats.lines,
            io.input_fields.len()
        );
        info!(
            "Wrote output file {}. Lines: {}. Fields: {}",
            io.output.file,
            writer.written(),
            io.header.len()
        );
        Ok(Outcome::Ran {
            lines: stats.lines,
            written: writer.written(),
        })
    }
}
