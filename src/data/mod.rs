//! The food table: one numeric record per food or recipe id.

use crate::plan::WeightCookPlan;
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod loader;

pub use loader::TableLoader;

/// A food table entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FoodEntry {
    /// A food read from the foods files.
    Food(Vec<f64>),
    /// A recipe whose ingredients were summed into one record.
    Recipe(Vec<f64>),
    /// A recipe that keeps one record per ingredient, in recipe file order.
    Expanded(Vec<Vec<f64>>),
}

impl FoodEntry {
    /// The records computed for this entry, one per ingredient for expanded
    /// recipes.
    pub fn rows(&self) -> &[Vec<f64>] {
        match self {
            FoodEntry::Food(row) | FoodEntry::Recipe(row) => std::slice::from_ref(row),
            FoodEntry::Expanded(rows) => rows,
        }
    }

    /// Plain foods may be cooked, reduced for non-edible parts and take part
    /// in `recipe set` computations; recipes may not.
    pub fn is_plain(&self) -> bool {
        matches!(self, FoodEntry::Food(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoodTable {
    /// Number of columns of every record.
    pub width: usize,
    /// Column names, for listings only.
    pub fields: Vec<String>,
    entries: AHashMap<i64, FoodEntry>,
}

impl FoodTable {
    pub fn new(width: usize, fields: Vec<String>) -> Self {
        Self {
            width,
            fields,
            entries: AHashMap::new(),
        }
    }

    pub fn get(&self, id: i64) -> Option<&FoodEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: i64) -> Option<&mut FoodEntry> {
        self.entries.get_mut(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Inserts `entry` unless `id` is taken. Returns whether it was inserted.
    pub fn insert(&mut self, id: i64, entry: FoodEntry) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        self.entries.insert(id, entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn foods_mut(&mut self) -> impl Iterator<Item = (i64, &mut Vec<f64>)> {
        self.entries.iter_mut().filter_map(|(id, entry)| match entry {
            FoodEntry::Food(row) => Some((*id, row)),
            _ => None,
        })
    }

    /// Rewrites every `weight cook` fraction of the plain foods into a
    /// fraction of the nutrient values, relative to the weight computed for
    /// `recipe_sum` units of the food.
    pub fn convert_weight_cooks(&mut self, plan: &WeightCookPlan) {
        let core = &plan.core;
        let mut obs = vec![0.0; core.width];
        let mut converted = 0usize;
        for (_, row) in self.foods_mut() {
            obs.iter_mut().for_each(|v| *v = 0.0);
            for mv in &core.food_moves {
                obs[mv.to] = row[mv.from];
            }
            for mv in &core.nutrients {
                obs[mv.to] = row[mv.from];
            }
            for step in &core.sets {
                step.apply(&mut obs);
            }
            for conversion in &plan.conversions {
                let weight = obs[conversion.denominator];
                row[conversion.fraction] = if weight == 0.0 {
                    0.0
                } else {
                    plan.recipe_sum * row[conversion.fraction] / weight
                };
            }
            converted += 1;
        }
        debug!("Converted weight cook fractions of {} foods", converted);
    }
}

#[cfg(test)]
mod table_tests {
    use super::*;
    use crate::plan::{CorePlan, Move, WeightConversion};

    #[test]
    fn test_insert_refuses_taken_id() {
        let mut table = FoodTable::new(2, vec!["foodid".into(), "e".into()]);
        assert!(table.insert(7, FoodEntry::Food(vec![7.0, 1.0])));
        assert!(!table.insert(7, FoodEntry::Recipe(vec![7.0, 2.0])));
        assert_eq!(table.get(7), Some(&FoodEntry::Food(vec![7.0, 1.0])));
    }

    #[test]
    fn test_weight_cook_conversion() {
        // columns: weight, yield fraction
        let mut table = FoodTable::new(2, vec!["weight".into(), "yield".into()]);
        table.insert(1, FoodEntry::Food(vec![50.0, 0.1]));
        table.insert(2, FoodEntry::Food(vec![0.0, 0.3]));
        let plan = WeightCookPlan {
            core: CorePlan {
                width: 1,
                real_width: 1,
                nutrients: vec![Move { from: 0, to: 0 }],
                ..CorePlan::default()
            },
            conversions: vec![WeightConversion {
                fraction: 1,
                denominator: 0,
            }],
            recipe_sum: 100.0,
        };
        table.convert_weight_cooks(&plan);
        let row = |id| table.get(id).unwrap().rows()[0].clone();
        assert!((row(1)[1] - 0.2).abs() < 1e-12);
        assert_eq!(row(2)[1], 0.0);
    }
}
