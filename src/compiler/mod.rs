//! Turns a [`Script`] into a [`CompiledPlan`].
//!
//! Compilation runs in stages, each finishing its whole pass before the run
//! aborts on the errors it recorded:
//!
//! 1. ingestion reads every data header into the field namespaces,
//! 2. classification builds rule objects and tags fields,
//! 3. output placement assigns observation slots,
//! 4. table placement assigns food table columns and drops unused files,
//! 5. lowering emits the position-addressed plan.

use crate::error::{Diagnostics, FoodCalcError};
use crate::io::{RecordSource, SourceProvider};
use crate::plan::CompiledPlan;
use crate::script::Script;
use tracing::{debug, info};

#[cfg(feature = "debug-tools")]
use {crate::plan::visualizer::visualize_plan, std::fs};

mod decision;
pub mod lexer;
mod lowering;
pub mod model;
pub mod parsing;
mod placement;
pub mod registry;
mod resolve;

pub use decision::DecisionBuilder;
pub use registry::{Field, FieldId, FieldOrigin, FieldRegistry};

use resolve::Resolver;

pub struct CompilationArtifacts {
    pub plan: CompiledPlan,
    /// Field names of every observation slot, written outputs first.
    pub slot_names: Vec<String>,
    /// The input source, when its header had to be read during compilation.
    pub input_source: Option<Box<dyn RecordSource>>,
}

pub struct Compiler<'a> {
    script: &'a Script,
    provider: &'a dyn SourceProvider,
    input_override: Option<String>,
    output_override: Option<String>,
}

pub struct CompilerBuilder<'a> {
    script: &'a Script,
    provider: &'a dyn SourceProvider,
    input_override: Option<String>,
    output_override: Option<String>,
}

impl<'a> CompilerBuilder<'a> {
    pub fn new(script: &'a Script, provider: &'a dyn SourceProvider) -> Self {
        Self {
            script,
            provider,
            input_override: None,
            output_override: None,
        }
    }

    /// Reads the input from `file` instead of the file named by `input`.
    pub fn with_input(mut self, file: impl Into<String>) -> Self {
        self.input_override = Some(file.into());
        self
    }

    /// Writes the output to `file` instead of the file named by `output`.
    pub fn with_output(mut self, file: impl Into<String>) -> Self {
        self.output_override = Some(file.into());
        self
    }

    pub fn build(self) -> Compiler<'a> {
        Compiler {
            script: self.script,
            provider: self.provider,
            input_override: self.input_override,
            output_override: self.output_override,
        }
    }
}

impl<'a> Compiler<'a> {
    pub fn builder(script: &'a Script, provider: &'a dyn SourceProvider) -> CompilerBuilder<'a> {
        CompilerBuilder::new(script, provider)
    }

    pub fn compile(self, diag: &mut Diagnostics) -> Result<CompilationArtifacts, FoodCalcError> {
        let mut resolver = Resolver::new(
            self.script,
            self.provider,
            self.input_override,
            self.output_override,
        );
        resolver.ingest(diag)?;
        diag.checkpoint("reading field names")?;
        resolver.classify(diag)?;
        diag.checkpoint("resolving commands")?;

        let Resolver {
            mut model,
            input_source,
            ..
        } = resolver;
        placement::place_outputs(&mut model, diag)?;
        diag.checkpoint("placing output fields")?;
        placement::place_sources(&mut model, diag)?;
        diag.checkpoint("placing food table fields")?;

        let registry = &model.registry;
        for (file, foods) in model.foods.iter().enumerate() {
            if !foods.used {
                info!(
                    "Did not have to read foods file {} (file {})",
                    foods.spec.file,
                    file + 1
                );
            }
        }
        for groups in model.groups.iter().filter(|g| !g.used) {
            info!("Did not have to read groups file {}", groups.spec.file);
        }
        debug!(
            "{} output fields ({} written), {} food table fields",
            registry.outputs().len(),
            registry.real_output_count(),
            registry.table().len()
        );

        let plan = lowering::lower(&model, diag)?;
        diag.checkpoint("compiling the plan")?;
        let Some(plan) = plan else {
            return Err(FoodCalcError::Fatal(crate::error::FatalError::PhaseFailed {
                phase: "compiling the plan".to_string(),
                errors: diag.error_count(),
            }));
        };
        let slot_names: Vec<String> = registry
            .outputs()
            .iter()
            .map(|id| registry.name(*id).to_string())
            .collect();

        #[cfg(feature = "debug-tools")]
        {
            self.write_debug_file(
                "tmp/plan_input.txt",
                &visualize_plan(&plan.input, &slot_names, "input"),
            )?;
            for (i, recipe) in plan.recipes.iter().enumerate() {
                self.write_debug_file(
                    &format!("tmp/plan_recipes_{}.txt", i + 1),
                    &visualize_plan(&recipe.execution, &slot_names, &recipe.source.file),
                )?;
            }
            let json = serde_json::to_string_pretty(&plan).map_err(|e| {
                crate::error::FatalError::Io {
                    target: "tmp/plan.json".to_string(),
                    message: e.to_string(),
                }
            })?;
            self.write_debug_file("tmp/plan.json", &json)?;
        }

        Ok(CompilationArtifacts {
            plan,
            slot_names,
            input_source,
        })
    }

    #[cfg(feature = "debug-tools")]
    fn write_debug_file(&self, path: &str, content: &str) -> Result<(), FoodCalcError> {
        let io_error = |e: std::io::Error| crate::error::FatalError::Io {
            target: path.to_string(),
            message: e.to_string(),
        };
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(path, content).map_err(io_error)?;
        Ok(())
    }
}
