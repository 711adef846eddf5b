//! The streaming interpreter.
//!
//! An [`Executor`] runs one [`ExecutionPlan`] over a record stream. Every
//! accepted food of a line becomes an observation that is either handed to an
//! [`ObservationSink`] directly or accumulated by the [`GroupEngine`] and
//! handed over when its group is complete.

use crate::data::FoodTable;
use crate::error::{DataError, Diagnostics, FatalError};
use crate::io::{RecordSource, next_valid};
use crate::plan::{ExecutionPlan, TestChain};
use tracing::debug;

mod groups;
mod output;
mod recipes;

pub use groups::GroupEngine;
pub use output::OutputWriter;
pub use recipes::RecipeBuilder;

/// Receives the observations computed by an [`Executor`].
pub trait ObservationSink {
    /// Takes one observation. The slice covers every slot of the plan.
    fn emit(&mut self, obs: &[f64], diag: &mut Diagnostics) -> Result<(), FatalError>;

    /// Called after every input line, when the food table is not borrowed.
    fn commit(&mut self, _table: &mut FoodTable, _diag: &mut Diagnostics) -> Result<(), FatalError> {
        Ok(())
    }

    /// Called when a food id is not in the table. Returns whether entries
    /// were added, in which case the lookup is retried once.
    fn resolve_missing(
        &mut self,
        _table: &mut FoodTable,
        _diag: &mut Diagnostics,
    ) -> Result<bool, FatalError> {
        Ok(false)
    }

    fn finish(&mut self, table: &mut FoodTable, diag: &mut Diagnostics) -> Result<(), FatalError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub lines: usize,
    pub emitted: usize,
}

/// Counts what passes through to the wrapped sink.
struct Counting<'s> {
    inner: &'s mut dyn ObservationSink,
    emitted: usize,
}

impl ObservationSink for Counting<'_> {
    fn emit(&mut self, obs: &[f64], diag: &mut Diagnostics) -> Result<(), FatalError> {
        self.emitted += 1;
        self.inner.emit(obs, diag)
    }

    fn commit(&mut self, table: &mut FoodTable, diag: &mut Diagnostics) -> Result<(), FatalError> {
        self.inner.commit(table, diag)
    }

    fn resolve_missing(&mut self, table: &mut FoodTable, diag: &mut Diagnostics) -> Result<bool, FatalError> {
        self.inner.resolve_missing(table, diag)
    }

    fn finish(&mut self, table: &mut FoodTable, diag: &mut Diagnostics) -> Result<(), FatalError> {
        self.inner.finish(table, diag)
    }
}

pub struct Executor<'p> {
    plan: &'p ExecutionPlan,
    obs: Vec<f64>,
    line: Vec<f64>,
    fractions: Vec<f64>,
    groups: Option<GroupEngine>,
}

impl<'p> Executor<'p> {
    pub fn new(plan: &'p ExecutionPlan) -> Self {
        let groups = plan.stream.is_grouped().then(|| GroupEngine::new(plan));
        Self {
            plan,
            obs: vec![0.0; plan.core.width],
            line: vec![0.0; plan.stream.columns],
            fractions: vec![0.0; plan.stream.reductions.len()],
            groups,
        }
    }

    /// Runs the plan over every record of `source`.
    pub fn run(
        &mut self,
        source: &mut dyn RecordSource,
        table: &mut FoodTable,
        sink: &mut dyn ObservationSink,
        diag: &mut Diagnostics,
    ) -> Result<RunStats, FatalError> {
        let plan = self.plan;
        let stream = &plan.stream;
        let file = source.name().to_string();
        source.set_text_columns(&stream.text);
        let mut sink = Counting {
            inner: sink,
            emitted: 0,
        };
        let mut lines = 0usize;

        while next_valid(source, &mut self.line, diag)? {
            lines += 1;
            if stream.blip > 0 && lines as u64 % stream.blip == 0 {
                eprint!(" {}\r", lines);
            }
            let line_no = source.line();

            if let Some(groups) = &mut self.groups {
                groups.begin_line(&self.line, &file, line_no, &mut sink, diag)?;
            }

            let id = self.line[stream.food] as i64;
            if !table.contains(id) && !(sink.resolve_missing(table, diag)? && table.contains(id)) {
                diag.record(DataError::FoodNotFound {
                    id,
                    line: line_no,
                    file: file.clone(),
                })?;
                continue;
            }
            if let Some(entry) = table.get(id) {
                let plain = entry.is_plain();
                for row in entry.rows() {
                    if !self.compute(row, plain, &file, line_no, diag)? {
                        continue;
                    }
                    match &mut self.groups {
                        Some(groups) => groups.accumulate(&self.obs, row),
                        None => sink.emit(&self.obs, diag)?,
                    }
                }
            }
            sink.commit(table, diag)?;
        }

        if lines > 0 {
            if let Some(groups) = &mut self.groups {
                groups.flush(&mut sink, diag)?;
            }
        }
        sink.finish(table, diag)?;
        debug!("{}: {} lines, {} observations", file, lines, sink.emitted);
        Ok(RunStats {
            lines,
            emitted: sink.emitted,
        })
    }

    /// Computes the observation of one food record for the current line.
    /// Returns `false` when the tests reject it.
    fn compute(
        &mut self,
        row: &[f64],
        plain: bool,
        file: &str,
        line_no: usize,
        diag: &mut Diagnostics,
    ) -> Result<bool, FatalError> {
        let plan = self.plan;
        let core = &plan.core;
        let stream = &plan.stream;
        let obs = &mut self.obs;
        let line = &self.line;

        if stream.tests.is_table() && !stream.tests.accepts_table(row) {
            return Ok(false);
        }

        for mv in &stream.moves {
            obs[mv.to] = line[mv.from];
        }
        for mv in &core.food_moves {
            obs[mv.to] = row[mv.from];
        }

        let mut amount = line[stream.amount];
        if let Some(non_edible) = &stream.non_edible {
            let enabled = non_edible.flag.is_none_or(|flag| line[flag] != 0.0);
            if plain && enabled {
                amount *= 1.0 - row[non_edible.fraction];
            }
        }

        let factor = amount * stream.scale;
        for mv in &core.nutrients {
            obs[mv.to] = factor * row[mv.from];
        }

        let plain_cut = core.plain_only_from.unwrap_or(core.sets.len());
        let run = if plain { core.sets.len() } else { plain_cut };
        if stream.recalc_weights {
            for step in &core.sets[..run] {
                step.apply(obs);
            }
        }
        for (reduction, fraction) in stream.reductions.iter().zip(self.fractions.iter_mut()) {
            let value = line[reduction.column];
            *fraction = match reduction.weight {
                Some(weight) if obs[weight] == 0.0 => 0.0,
                Some(weight) => amount * value / obs[weight],
                None => value,
            };
        }

        if let Some(column) = stream.cook {
            let cook_id = line[column] as i64;
            if cook_id != 0 {
                if !plain {
                    diag.record(DataError::CookRecipe {
                        id: line[stream.food] as i64,
                        line: line_no,
                        file: file.to_string(),
                    })?;
                } else if cook_id < 0 || cook_id as usize > core.cook_methods.len() {
                    diag.record(DataError::UnknownCookId {
                        id: cook_id,
                        line: line_no,
                        file: file.to_string(),
                    })?;
                } else {
                    for reduction in &core.cook_methods[cook_id as usize - 1].reductions {
                        let fraction = row[reduction.fraction];
                        if fraction != 0.0 {
                            for target in &reduction.targets {
                                obs[*target] *= 1.0 - fraction;
                            }
                        }
                    }
                }
            }
        }

        for (reduction, fraction) in stream.reductions.iter().zip(&self.fractions) {
            if *fraction != 0.0 {
                for target in &reduction.targets {
                    obs[*target] *= 1.0 - fraction;
                }
            }
        }

        for step in &core.sets[..run] {
            step.apply(obs);
        }
        if plain && plain_cut > 0 && plain_cut < core.sets.len() {
            // recipe sets may change fields the ordinary sets read
            for step in &core.sets[..plain_cut] {
                step.apply(obs);
            }
        }

        if let TestChain::Output(_) = stream.tests {
            if !stream.tests.accepts_output(obs) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
