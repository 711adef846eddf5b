use super::ObservationSink;
use crate::data::{FoodEntry, FoodTable};
use crate::error::{DataError, Diagnostics, FatalError};
use crate::plan::RecipeAssembly;
use tracing::debug;

/// A recipe whose ingredients are still being read.
struct PendingRecipe {
    id: i64,
    /// Sum of the weight field over the ingredients.
    sum: f64,
    amount: f64,
    /// Fraction (from the first ingredient) and summed denominator of each
    /// recipe reduction.
    reductions: Vec<(f64, f64)>,
    rows: Vec<Vec<f64>>,
}

/// Folds computed ingredients into food table entries.
///
/// Ingredients arrive grouped by recipe id. A recipe is finished when the id
/// changes, when a later line refers to a food that is not in the table yet,
/// or at the end of the file. Finished recipes are inserted into the table
/// on the next [`ObservationSink::commit`].
pub struct RecipeBuilder<'p> {
    assembly: &'p RecipeAssembly,
    recipe_sum: f64,
    file: String,
    width: usize,
    pending: Option<PendingRecipe>,
    ready: Vec<(i64, FoodEntry)>,
    recipes: usize,
}

impl<'p> RecipeBuilder<'p> {
    pub fn new(assembly: &'p RecipeAssembly, recipe_sum: f64, file: &str, width: usize) -> Self {
        Self {
            assembly,
            recipe_sum,
            file: file.to_string(),
            width,
            pending: None,
            ready: Vec::new(),
            recipes: 0,
        }
    }

    /// Recipes inserted into the food table so far.
    pub fn recipes(&self) -> usize {
        self.recipes
    }

    fn start(&self, id: i64, obs: &[f64]) -> PendingRecipe {
        PendingRecipe {
            id,
            sum: 0.0,
            amount: 0.0,
            reductions: self
                .assembly
                .reductions
                .iter()
                .map(|r| (obs[r.fraction], 0.0))
                .collect(),
            rows: if self.assembly.keep {
                Vec::new()
            } else {
                vec![vec![0.0; self.width]]
            },
        }
    }

    /// Finishes the pending recipe, if any.
    fn close(&mut self, diag: &mut Diagnostics) -> Result<(), FatalError> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        match self.finalize(pending) {
            Ok(ready) => self.ready.push(ready),
            Err(e) => diag.record(e)?,
        }
        Ok(())
    }

    fn finalize(&self, mut pending: PendingRecipe) -> Result<(i64, FoodEntry), DataError> {
        if pending.id <= 0 {
            return Err(DataError::BadRecipeId {
                id: pending.id,
                file: self.file.clone(),
            });
        }
        if pending.sum <= 0.0 {
            return Err(DataError::NonPositiveRecipeSum {
                sum: pending.sum,
                id: pending.id,
                file: self.file.clone(),
            });
        }

        let mut sum = pending.sum;
        for (rule, (fraction, weight)) in self.assembly.reductions.iter().zip(&pending.reductions) {
            if *weight <= 0.0 || *fraction == 0.0 {
                continue;
            }
            let loss = (pending.amount * fraction).min(*weight);
            sum -= loss;
            let factor = 1.0 - loss / weight;
            for row in &mut pending.rows {
                for target in &rule.targets {
                    row[*target] *= factor;
                }
            }
        }

        let scale = self.recipe_sum / sum;
        for row in &mut pending.rows {
            for mv in &self.assembly.nutrients {
                row[mv.to] *= scale;
            }
        }

        let entry = if self.assembly.keep {
            FoodEntry::Expanded(pending.rows)
        } else {
            FoodEntry::Recipe(pending.rows.pop().unwrap_or_else(|| vec![0.0; self.width]))
        };
        Ok((pending.id, entry))
    }
}

impl ObservationSink for RecipeBuilder<'_> {
    fn emit(&mut self, obs: &[f64], diag: &mut Diagnostics) -> Result<(), FatalError> {
        let id = obs[self.assembly.recipe_id] as i64;
        if self.pending.as_ref().map(|p| p.id) != Some(id) {
            self.close(diag)?;
            self.pending = Some(self.start(id, obs));
        }
        let assembly = self.assembly;
        let width = self.width;
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };

        pending.sum += obs[assembly.sum];
        pending.amount += obs[assembly.amount];
        for (rule, (_, weight)) in assembly.reductions.iter().zip(pending.reductions.iter_mut()) {
            *weight += obs[rule.denominator];
        }

        if assembly.keep {
            pending.rows.push(vec![0.0; width]);
        }
        if let Some(row) = pending.rows.last_mut() {
            for mv in &assembly.nutrients {
                row[mv.to] += obs[mv.from];
            }
            for mv in &assembly.moves {
                row[mv.to] = obs[mv.from];
            }
        }
        Ok(())
    }

    fn commit(&mut self, table: &mut FoodTable, diag: &mut Diagnostics) -> Result<(), FatalError> {
        for (id, entry) in self.ready.drain(..) {
            if table.insert(id, entry) {
                self.recipes += 1;
                debug!("Recipe {} added to the food table", id);
            } else {
                diag.record(DataError::DuplicateRecipe {
                    id,
                    file: self.file.clone(),
                })?;
            }
        }
        Ok(())
    }

    fn resolve_missing(&mut self, table: &mut FoodTable, diag: &mut Diagnostics) -> Result<bool, FatalError> {
        if self.pending.is_none() && self.ready.is_empty() {
            return Ok(false);
        }
        self.close(diag)?;
        let before = self.recipes;
        self.commit(table, diag)?;
        Ok(self.recipes > before)
    }

    fn finish(&mut self, table: &mut FoodTable, diag: &mut Diagnostics) -> Result<(), FatalError> {
        self.close(diag)?;
        self.commit(table, diag)
    }
}

#[cfg(test)]
mod recipe_tests {
    use super::*;
    use crate::plan::{Move, RecipeReduction};

    /// slots: 0 recipe id, 1 weight, 2 amount, 3 energy, 4 loss fraction
    fn assembly(keep: bool) -> RecipeAssembly {
        RecipeAssembly {
            recipe_id: 0,
            sum: 1,
            amount: 2,
            nutrients: vec![Move { from: 3, to: 1 }],
            moves: vec![Move { from: 0, to: 0 }],
            reductions: Vec::new(),
            keep,
        }
    }

    #[test]
    fn test_recipe_scaled_to_recipe_sum() {
        let assembly = assembly(false);
        let mut builder = RecipeBuilder::new(&assembly, 100.0, "recipes.txt", 2);
        let mut table = FoodTable::new(2, vec!["foodid".into(), "energy".into()]);
        let mut diag = Diagnostics::new();
        builder.emit(&[9.0, 150.0, 150.0, 30.0, 0.0], &mut diag).unwrap();
        builder.emit(&[9.0, 50.0, 50.0, 10.0, 0.0], &mut diag).unwrap();
        builder.finish(&mut table, &mut diag).unwrap();

        assert_eq!(table.get(9), Some(&FoodEntry::Recipe(vec![9.0, 20.0])));
        assert_eq!(builder.recipes(), 1);
    }

    #[test]
    fn test_recipe_weight_reduction() {
        let mut assembly = assembly(true);
        assembly.reductions.push(RecipeReduction {
            fraction: 4,
            denominator: 1,
            targets: vec![1],
        });
        let mut builder = RecipeBuilder::new(&assembly, 100.0, "recipes.txt", 2);
        let mut table = FoodTable::new(2, vec!["foodid".into(), "energy".into()]);
        let mut diag = Diagnostics::new();
        // loss 200 * 0.75 = 150 of 200, then scaled by 100 / 50
        builder.emit(&[4.0, 100.0, 200.0, 40.0, 0.75], &mut diag).unwrap();
        builder.emit(&[4.0, 100.0, 0.0, 0.0, 0.0], &mut diag).unwrap();
        builder.finish(&mut table, &mut diag).unwrap();

        let Some(FoodEntry::Expanded(rows)) = table.get(4) else {
            panic!("expected an expanded recipe");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![4.0, 20.0]);
        assert_eq!(rows[1], vec![4.0, 0.0]);
    }

    #[test]
    fn test_non_positive_recipe_id_is_rejected() {
        let assembly = assembly(false);
        let mut builder = RecipeBuilder::new(&assembly, 100.0, "recipes.txt", 2);
        let mut table = FoodTable::new(2, vec!["foodid".into(), "energy".into()]);
        let mut diag = Diagnostics::new();
        builder.emit(&[0.0, 10.0, 10.0, 1.0, 0.0], &mut diag).unwrap();
        builder.finish(&mut table, &mut diag).unwrap();
        assert!(table.is_empty());
        assert_eq!(diag.error_count(), 1);
    }
}
