//! The compiled, index-based program.
//!
//! Everything here refers to positions only: a *slot* is a position in the
//! observation vector of one food, a *column* is a position in a food table
//! record or in a record of the streamed file. Plans are plain data and are
//! serialized as part of a saved state.

use crate::ast::RelOp;
use crate::io::{SinkSpec, SourceSpec};
use serde::{Deserialize, Serialize};

pub mod visualizer;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Constant(f64),
    Slot(usize),
}

impl Operand {
    #[inline]
    pub fn value(&self, obs: &[f64]) -> f64 {
        match *self {
            Operand::Constant(v) => v,
            Operand::Slot(slot) => obs[slot],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOp {
    Copy,
    Add,
    Sub,
    Mul,
    Div,
}

/// One arithmetic step `obs[target] (op)= operand`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetStep {
    pub target: usize,
    pub op: SetOp,
    pub operand: Operand,
}

impl SetStep {
    /// Applies the step. Division by zero yields zero.
    #[inline]
    pub fn apply(&self, obs: &mut [f64]) {
        let value = self.operand.value(obs);
        let target = &mut obs[self.target];
        match self.op {
            SetOp::Copy => *target = value,
            SetOp::Add => *target += value,
            SetOp::Sub => *target -= value,
            SetOp::Mul => *target *= value,
            SetOp::Div => *target = if value == 0.0 { 0.0 } else { *target / value },
        }
    }
}

/// Copies `from` of one vector to `to` of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: usize,
    pub to: usize,
}

/// One cook rule: `targets *= table[fraction]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookReduction {
    pub fraction: usize,
    pub targets: Vec<usize>,
}

/// The reductions of the cook type with the same position in `cook field`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CookMethod {
    pub reductions: Vec<CookReduction>,
}

/// A per-line reduction read from column `column` of the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reduction {
    pub column: usize,
    pub targets: Vec<usize>,
    /// Set for weight reductions: the slot holding the weight the
    /// fraction is relative to.
    pub weight: Option<usize>,
}

/// Compares a food table column with a constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableTest {
    pub op: RelOp,
    pub column: usize,
    pub value: f64,
    pub on_true: usize,
}

/// Compares two computed values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotTest {
    pub op: RelOp,
    pub left: Operand,
    pub right: Operand,
    pub on_true: usize,
}

/// A compiled decision list.
///
/// Evaluation starts at test 0. A test that holds jumps to its `on_true`
/// index, otherwise evaluation continues with the next test. Reaching index
/// `n` accepts the food, index `n + 1` rejects it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum TestChain {
    #[default]
    None,
    /// Every test compares a verbatim food field with a constant, so the
    /// chain runs on the raw table record before any computation.
    Table(Vec<TableTest>),
    Output(Vec<SlotTest>),
}

impl TestChain {
    pub fn is_table(&self) -> bool {
        matches!(self, TestChain::Table(_))
    }

    pub fn accepts_table(&self, record: &[f64]) -> bool {
        match self {
            TestChain::Table(tests) => {
                run_chain(tests.len(), |i| tests[i].op.apply(record[tests[i].column], tests[i].value), |i| tests[i].on_true)
            }
            _ => true,
        }
    }

    pub fn accepts_output(&self, obs: &[f64]) -> bool {
        match self {
            TestChain::Output(tests) => run_chain(
                tests.len(),
                |i| tests[i].op.apply(tests[i].left.value(obs), tests[i].right.value(obs)),
                |i| tests[i].on_true,
            ),
            _ => true,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TestChain::None => 0,
            TestChain::Table(tests) => tests.len(),
            TestChain::Output(tests) => tests.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn run_chain(len: usize, holds: impl Fn(usize) -> bool, jump: impl Fn(usize) -> usize) -> bool {
    let mut index = 0;
    while index < len {
        index = if holds(index) { jump(index) } else { index + 1 };
    }
    index == len
}

/// Spreads source values into `groups` generated fields per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transpose {
    /// Food table column holding the 1-based group number.
    pub pivot: usize,
    pub groups: usize,
    /// Slot of the first generated field.
    pub base: usize,
    pub sources: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonEdible {
    /// Food table column of the non-edible fraction.
    pub fraction: usize,
    /// Stream column of the "amount includes non-edible part" flag.
    pub flag: Option<usize>,
}

/// The per-food computation shared by every stream of a mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorePlan {
    pub width: usize,
    /// Slots written to the output; the rest are helpers.
    pub real_width: usize,
    /// Verbatim table columns, copied without scaling.
    pub food_moves: Vec<Move>,
    /// Accumulating table columns, scaled by the amount.
    pub nutrients: Vec<Move>,
    pub cook_methods: Vec<CookMethod>,
    pub sets: Vec<SetStep>,
    /// Steps from this index on only run for plain foods.
    pub plain_only_from: Option<usize>,
    pub group_sets: Vec<SetStep>,
}

/// How one streamed file feeds the core computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPlan {
    pub columns: usize,
    pub text: Vec<bool>,
    /// Stream column to slot.
    pub moves: Vec<Move>,
    pub food: usize,
    pub amount: usize,
    pub scale: f64,
    pub non_edible: Option<NonEdible>,
    pub cook: Option<usize>,
    pub reductions: Vec<Reduction>,
    /// Weight reductions relative to a computed field need a full pass over
    /// the sets before the fractions are known.
    pub recalc_weights: bool,
    /// Stream column and slot of the input grouping keys.
    pub input_groups: Vec<Move>,
    /// Slots of the food grouping keys.
    pub food_groups: Vec<usize>,
    pub tests: TestChain,
    pub transposes: Vec<Transpose>,
    pub blip: u64,
}

impl StreamPlan {
    pub fn is_grouped(&self) -> bool {
        !self.input_groups.is_empty() || !self.food_groups.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub core: CorePlan,
    pub stream: StreamPlan,
}

/// A recipe-file reduction applied when a recipe is flushed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeReduction {
    /// Slot of the recipe file column holding the fraction.
    pub fraction: usize,
    pub denominator: usize,
    /// Food table columns reduced.
    pub targets: Vec<usize>,
}

/// How computed ingredients are folded into food table records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeAssembly {
    pub recipe_id: usize,
    pub sum: usize,
    pub amount: usize,
    /// Slot to table column, accumulated.
    pub nutrients: Vec<Move>,
    /// Slot to table column, assigned.
    pub moves: Vec<Move>,
    pub reductions: Vec<RecipeReduction>,
    pub keep: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipePlan {
    pub source: SourceSpec,
    pub execution: ExecutionPlan,
    pub assembly: RecipeAssembly,
    pub recipe_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightConversion {
    /// Food table column of the yield factor, rewritten in place.
    pub fraction: usize,
    /// Slot of the weight it is relative to.
    pub denominator: usize,
}

/// Turns weight-cook yield factors into ratios against the recipe sum weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightCookPlan {
    pub core: CorePlan,
    pub conversions: Vec<WeightConversion>,
    pub recipe_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodsLoad {
    pub source: SourceSpec,
    pub text: Vec<bool>,
    pub id_column: usize,
    /// File column to table column.
    pub moves: Vec<Move>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupsLoad {
    pub source: SourceSpec,
    pub text: Vec<bool>,
    pub key_columns: Vec<usize>,
    /// Table columns holding the keys.
    pub key_table: Vec<usize>,
    pub moves: Vec<Move>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadPlan {
    pub width: usize,
    pub fields: Vec<String>,
    pub foods: Vec<FoodsLoad>,
    pub groups: Vec<GroupsLoad>,
}

/// Where the main stream comes from and goes to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IoPlan {
    pub input: SourceSpec,
    /// Field names the input plan was compiled against.
    pub input_fields: Vec<String>,
    pub output: SinkSpec,
    /// Names of the written output fields.
    pub header: Vec<String>,
}

/// Everything needed to build the food table and run the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPlan {
    pub load: LoadPlan,
    pub weight_cook: Option<WeightCookPlan>,
    pub recipes: Vec<RecipePlan>,
    pub input: ExecutionPlan,
    pub io: IoPlan,
    pub save: Option<String>,
}

#[cfg(test)]
mod plan_tests {
    use super::*;

    #[test]
    fn test_set_step_division_by_zero() {
        let mut obs = vec![4.0, 0.0];
        SetStep {
            target: 0,
            op: SetOp::Div,
            operand: Operand::Slot(1),
        }
        .apply(&mut obs);
        assert_eq!(obs[0], 0.0);
    }

    #[test]
    fn test_chain_jumps() {
        // a > 1 or a < -1
        let chain = TestChain::Output(vec![
            SlotTest {
                op: RelOp::Gt,
                left: Operand::Slot(0),
                right: Operand::Constant(1.0),
                on_true: 2,
            },
            SlotTest {
                op: RelOp::Ge,
                left: Operand::Slot(0),
                right: Operand::Constant(-1.0),
                on_true: 3,
            },
        ]);
        assert!(chain.accepts_output(&[2.0]));
        assert!(chain.accepts_output(&[-2.0]));
        assert!(!chain.accepts_output(&[0.0]));
    }
}
