//! The resolved semantic model: rule objects referring to fields by
//! [`FieldId`], built by the ingestion and classification passes.

use super::registry::{FieldId, FieldRegistry};
use crate::ast::RelOp;
use crate::io::{SinkSpec, SourceSpec};
use crate::plan::SetOp;
use crate::script::{CookKind, IngredientMode, ListItem, ReduceKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef {
    Constant(f64),
    Field(FieldId),
}

impl ValueRef {
    pub fn field(&self) -> Option<FieldId> {
        match self {
            ValueRef::Field(id) => Some(*id),
            ValueRef::Constant(_) => None,
        }
    }
}

/// `target = operand (op operand)...`; the first step is always a copy.
#[derive(Debug, Clone)]
pub struct SetRule {
    pub target: FieldId,
    pub steps: Vec<(SetOp, ValueRef)>,
}

#[derive(Debug, Clone)]
pub struct CookRule {
    pub kind: CookKind,
    pub fraction: FieldId,
    pub denominator: Option<FieldId>,
    pub targets: Vec<FieldId>,
}

impl CookRule {
    /// The field a weight fraction is relative to.
    pub fn weight_field(&self) -> Option<FieldId> {
        self.denominator.or_else(|| self.targets.first().copied())
    }
}

#[derive(Debug, Clone)]
pub struct CookType {
    pub name: String,
    pub rules: Vec<CookRule>,
}

/// A reduction driven by a column of the streamed file.
#[derive(Debug, Clone)]
pub struct ReduceRule {
    pub kind: ReduceKind,
    pub column: String,
    pub denominator: Option<FieldId>,
    pub targets: Vec<FieldId>,
}

impl ReduceRule {
    pub fn weight_field(&self) -> Option<FieldId> {
        self.denominator.or_else(|| self.targets.first().copied())
    }
}

/// One test of the decision list; `on_true` is patched after the whole
/// chain is built.
#[derive(Debug, Clone)]
pub struct TestRule {
    pub op: RelOp,
    pub left: ValueRef,
    pub right: ValueRef,
    pub on_true: usize,
}

#[derive(Debug, Clone)]
pub struct TransposeRule {
    pub pivot: FieldId,
    pub groups: usize,
    pub sources: Vec<FieldId>,
    /// First generated field of each source; the rest follow contiguously.
    pub generated: Vec<FieldId>,
}

#[derive(Debug, Clone)]
pub struct FoodsFile {
    pub spec: SourceSpec,
    pub columns: Vec<FieldId>,
    pub id_column: usize,
    pub used: bool,
}

#[derive(Debug, Clone)]
pub struct GroupsFile {
    pub spec: SourceSpec,
    pub columns: Vec<FieldId>,
    pub ids: Vec<FieldId>,
    pub used: bool,
}

#[derive(Debug, Clone)]
pub struct InputFile {
    pub spec: SourceSpec,
    pub columns: Vec<FieldId>,
    pub food: usize,
    pub amount: usize,
    pub scale: f64,
}

#[derive(Debug, Clone)]
pub struct RecipeFile {
    pub spec: SourceSpec,
    pub scope: usize,
    pub columns: Vec<FieldId>,
    pub recipe_id: usize,
    pub food_id: usize,
    pub amount: usize,
}

#[derive(Debug, Clone)]
pub struct NonEdibleRule {
    pub fraction: FieldId,
    pub flag: Option<String>,
}

/// Everything the placement and lowering stages need to know about a script.
#[derive(Debug, Default)]
pub struct Model {
    pub registry: FieldRegistry,
    pub foods: Vec<FoodsFile>,
    pub groups: Vec<GroupsFile>,
    pub input: Option<InputFile>,
    pub recipes: Vec<RecipeFile>,
    pub food_id: Option<FieldId>,
    pub output: Option<SinkSpec>,
    pub output_list: Option<Vec<ListItem>>,
    pub sets: Vec<SetRule>,
    pub recipe_sets: Vec<SetRule>,
    pub group_sets: Vec<SetRule>,
    pub cook_types: Vec<CookType>,
    /// Name of the cook id column and the cook types it selects, in id order.
    pub cook_field: Option<(String, Vec<usize>)>,
    pub reductions: Vec<ReduceRule>,
    pub recipe_reductions: Vec<ReduceRule>,
    pub tests: Vec<TestRule>,
    pub simple_tests: bool,
    pub transposes: Vec<TransposeRule>,
    pub non_edible: Option<NonEdibleRule>,
    pub group_input: Vec<FieldId>,
    pub group_food: Vec<FieldId>,
    pub recipe_sum: Option<(f64, FieldId)>,
    pub ingredients: IngredientMode,
    pub blip: u64,
    pub save: Option<String>,
}

impl Model {
    pub fn is_grouped(&self) -> bool {
        !self.group_input.is_empty() || !self.group_food.is_empty()
    }

    /// The cook rules selected by `cook field`, in cook id order.
    pub fn active_cook_rules(&self) -> impl Iterator<Item = &CookRule> {
        self.cook_field
            .iter()
            .flat_map(|(_, types)| types.iter())
            .flat_map(|t| self.cook_types[*t].rules.iter())
    }
}
