//! Lowers the placed model into the position-addressed plan.

use super::model::{Model, ReduceRule, SetRule, ValueRef};
use super::registry::{FieldId, FieldRegistry};
use crate::error::{CompileError, Diagnostics, FatalError};
use crate::plan::{
    CompiledPlan, CookMethod, CookReduction, CorePlan, ExecutionPlan, FoodsLoad, GroupsLoad,
    IoPlan, LoadPlan, Move, NonEdible, Operand, RecipeAssembly, RecipePlan, RecipeReduction,
    Reduction, SetStep, SlotTest, StreamPlan, TableTest, TestChain, Transpose, WeightConversion,
    WeightCookPlan,
};
use crate::script::{CookKind, ReduceKind};

fn operand(registry: &FieldRegistry, value: &ValueRef) -> Result<Operand, CompileError> {
    Ok(match value {
        ValueRef::Constant(v) => Operand::Constant(*v),
        ValueRef::Field(id) => Operand::Slot(registry.output_slot(*id)?),
    })
}

fn lower_rules(
    registry: &FieldRegistry,
    rules: &[SetRule],
    recipe: bool,
    out: &mut Vec<SetStep>,
) -> Result<(), CompileError> {
    for rule in rules {
        if !registry.field(rule.target).in_mode(recipe) {
            continue;
        }
        let target = registry.output_slot(rule.target)?;
        for (op, value) in &rule.steps {
            out.push(SetStep {
                target,
                op: *op,
                operand: operand(registry, value)?,
            });
        }
    }
    Ok(())
}

fn slots_in_mode(
    registry: &FieldRegistry,
    fields: &[FieldId],
    recipe: bool,
) -> Result<Vec<usize>, CompileError> {
    fields
        .iter()
        .filter(|id| registry.field(**id).in_mode(recipe))
        .map(|id| registry.output_slot(*id))
        .collect()
}

/// The per-food computation of input mode (`recipe == false`) or of recipe
/// synthesis.
pub(crate) fn core_plan(model: &Model, recipe: bool) -> Result<CorePlan, CompileError> {
    let registry = &model.registry;
    let width = registry.outputs().len();
    let mut core = CorePlan {
        width,
        real_width: if recipe {
            width
        } else {
            registry.real_output_count()
        },
        ..CorePlan::default()
    };

    for id in registry.table() {
        let field = registry.field(*id);
        if !field.in_mode(recipe) {
            continue;
        }
        let mv = Move {
            from: registry.source_column(*id)?,
            to: registry.output_slot(*id)?,
        };
        if field.no_calc {
            core.food_moves.push(mv);
        } else {
            core.nutrients.push(mv);
        }
    }

    if let Some((_, types)) = &model.cook_field {
        for t in types {
            let mut method = CookMethod::default();
            for rule in &model.cook_types[*t].rules {
                let targets = slots_in_mode(registry, &rule.targets, recipe)?;
                if !targets.is_empty() {
                    method.reductions.push(CookReduction {
                        fraction: registry.source_column(rule.fraction)?,
                        targets,
                    });
                }
            }
            core.cook_methods.push(method);
        }
    }

    lower_rules(registry, &model.sets, recipe, &mut core.sets)?;
    if recipe {
        core.plain_only_from = Some(core.sets.len());
        lower_rules(registry, &model.recipe_sets, true, &mut core.sets)?;
    } else if model.is_grouped() {
        lower_rules(registry, &model.group_sets, false, &mut core.group_sets)?;
    } else {
        lower_rules(registry, &model.group_sets, false, &mut core.sets)?;
    }
    Ok(core)
}

/// A column of a streamed file, found by name.
struct StreamColumns<'m> {
    file: &'m str,
    columns: &'m [FieldId],
}

impl StreamColumns<'_> {
    fn find(&self, registry: &FieldRegistry, name: &str) -> Option<usize> {
        self.columns.iter().position(|id| registry.name(*id) == name)
    }

    /// Looks up a numeric column. A missing column is a warning, a text
    /// column an error.
    fn numeric(
        &self,
        registry: &FieldRegistry,
        name: &str,
        usage: &str,
        diag: &mut Diagnostics,
    ) -> Result<Option<usize>, FatalError> {
        match self.find(registry, name) {
            None => {
                diag.warn(format!(
                    "{} field '{}' not found in file {}",
                    usage, name, self.file
                ));
                Ok(None)
            }
            Some(column) if registry.field(self.columns[column]).is_text => {
                diag.record(CompileError::TextField {
                    name: name.to_string(),
                    usage: format!("as {} field", usage.to_lowercase()),
                })?;
                Ok(None)
            }
            Some(column) => Ok(Some(column)),
        }
    }
}

struct StreamShape {
    columns: usize,
    text: Vec<bool>,
    moves: Vec<Move>,
    non_edible: Option<NonEdible>,
    cook: Option<usize>,
    reductions: Vec<Reduction>,
    recalc_weights: bool,
}

fn stream_shape(
    model: &Model,
    stream: &StreamColumns<'_>,
    recipe: bool,
    diag: &mut Diagnostics,
) -> Result<StreamShape, FatalError> {
    let registry = &model.registry;
    let mut moves = Vec::new();
    for (column, id) in stream.columns.iter().enumerate() {
        if let Some(slot) = registry.field(*id).output {
            moves.push(Move { from: column, to: slot });
        }
        if recipe {
            if let Some(placeholder) = registry.placeholders.get(registry.name(*id)) {
                if let Some(slot) = registry.field(placeholder).output {
                    moves.push(Move { from: column, to: slot });
                }
            }
        }
    }

    let non_edible = match &model.non_edible {
        Some(rule) => {
            let flag = match &rule.flag {
                Some(name) => stream.numeric(registry, name, "Non-edible flag", diag)?,
                None => None,
            };
            match registry.source_column(rule.fraction) {
                Ok(fraction) => Some(NonEdible { fraction, flag }),
                Err(e) => {
                    diag.record(e)?;
                    None
                }
            }
        }
        None => None,
    };

    let cook = match &model.cook_field {
        Some((name, types)) if !types.is_empty() => {
            stream.numeric(registry, name, "Cook", diag)?
        }
        _ => None,
    };

    let mut reductions = Vec::new();
    let mut recalc_weights = false;
    for rule in &model.reductions {
        match reduction(registry, rule, stream, recipe, diag)? {
            Some(lowered) => {
                recalc_weights |= rule.kind == ReduceKind::Weight && rule.denominator.is_some();
                reductions.push(lowered);
            }
            None => continue,
        }
    }

    Ok(StreamShape {
        columns: stream.columns.len(),
        text: stream
            .columns
            .iter()
            .map(|id| registry.field(*id).is_text)
            .collect(),
        moves,
        non_edible,
        cook,
        reductions,
        recalc_weights,
    })
}

fn reduction(
    registry: &FieldRegistry,
    rule: &ReduceRule,
    stream: &StreamColumns<'_>,
    recipe: bool,
    diag: &mut Diagnostics,
) -> Result<Option<Reduction>, FatalError> {
    let targets = match slots_in_mode(registry, &rule.targets, recipe) {
        Ok(targets) => targets,
        Err(e) => {
            diag.record(e)?;
            return Ok(None);
        }
    };
    if targets.is_empty() {
        return Ok(None);
    }
    let Some(column) = stream.numeric(registry, &rule.column, "Reduce", diag)? else {
        return Ok(None);
    };
    let weight = match rule.kind {
        ReduceKind::Weight => match rule.weight_field().map(|id| registry.output_slot(id)) {
            Some(Ok(slot)) => Some(slot),
            Some(Err(e)) => {
                diag.record(e)?;
                return Ok(None);
            }
            None => None,
        },
        _ => None,
    };
    Ok(Some(Reduction {
        column,
        targets,
        weight,
    }))
}

fn test_chain(model: &Model) -> Result<TestChain, CompileError> {
    let registry = &model.registry;
    if model.tests.is_empty() {
        return Ok(TestChain::None);
    }
    if model.simple_tests {
        let tests = model
            .tests
            .iter()
            .map(|t| {
                let (ValueRef::Field(field), ValueRef::Constant(value)) = (t.left, t.right) else {
                    return Err(CompileError::IllegalCombination(
                        "A simple test must compare a field with a constant".into(),
                    ));
                };
                Ok(TableTest {
                    op: t.op,
                    column: registry.source_column(field)?,
                    value,
                    on_true: t.on_true,
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        return Ok(TestChain::Table(tests));
    }
    let tests = model
        .tests
        .iter()
        .map(|t| {
            Ok(SlotTest {
                op: t.op,
                left: operand(registry, &t.left)?,
                right: operand(registry, &t.right)?,
                on_true: t.on_true,
            })
        })
        .collect::<Result<Vec<_>, CompileError>>()?;
    Ok(TestChain::Output(tests))
}

fn input_plan(model: &Model, diag: &mut Diagnostics) -> Result<Option<ExecutionPlan>, FatalError> {
    let Some(input) = &model.input else {
        return Ok(None);
    };
    let registry = &model.registry;
    let stream = StreamColumns {
        file: &input.spec.file,
        columns: &input.columns,
    };
    let shape = stream_shape(model, &stream, false, diag)?;
    let lowered = (|| -> Result<_, CompileError> {
        let core = core_plan(model, false)?;
        let input_groups = model
            .group_input
            .iter()
            .map(|id| {
                let column = input
                    .columns
                    .iter()
                    .position(|c| c == id)
                    .ok_or_else(|| CompileError::Unplaced(registry.name(*id).to_string()))?;
                Ok(Move {
                    from: column,
                    to: registry.output_slot(*id)?,
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        let food_groups = model
            .group_food
            .iter()
            .map(|id| registry.output_slot(*id))
            .collect::<Result<Vec<_>, CompileError>>()?;
        let transposes = model
            .transposes
            .iter()
            .map(|t| {
                Ok(Transpose {
                    pivot: registry.source_column(t.pivot)?,
                    groups: t.groups,
                    base: registry.output_slot(t.generated[0])?,
                    sources: t
                        .sources
                        .iter()
                        .map(|s| registry.output_slot(*s))
                        .collect::<Result<Vec<_>, CompileError>>()?,
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        Ok((core, input_groups, food_groups, transposes, test_chain(model)?))
    })();
    let (core, input_groups, food_groups, transposes, tests) = match lowered {
        Ok(parts) => parts,
        Err(e) => {
            diag.record(e)?;
            return Ok(None);
        }
    };
    Ok(Some(ExecutionPlan {
        core,
        stream: StreamPlan {
            columns: shape.columns,
            text: shape.text,
            moves: shape.moves,
            food: input.food,
            amount: input.amount,
            scale: input.scale,
            non_edible: shape.non_edible,
            cook: shape.cook,
            reductions: shape.reductions,
            recalc_weights: shape.recalc_weights,
            input_groups,
            food_groups,
            tests,
            transposes,
            blip: model.blip,
        },
    }))
}

fn recipe_plans(model: &Model, diag: &mut Diagnostics) -> Result<Vec<RecipePlan>, FatalError> {
    let Some((recipe_sum, weight)) = model.recipe_sum else {
        return Ok(Vec::new());
    };
    let registry = &model.registry;
    let core = match core_plan(model, true) {
        Ok(core) => core,
        Err(e) => {
            diag.record(e)?;
            return Ok(Vec::new());
        }
    };
    let keep = model.ingredients.keeps_ingredients();
    let mut plans = Vec::with_capacity(model.recipes.len());
    for file in &model.recipes {
        let stream = StreamColumns {
            file: &file.spec.file,
            columns: &file.columns,
        };
        let shape = stream_shape(model, &stream, true, diag)?;
        let assembly = (|| -> Result<RecipeAssembly, CompileError> {
            let mut nutrients = Vec::new();
            let mut moves = Vec::new();
            for id in registry.table() {
                let field = registry.field(*id);
                let Some(slot) = field.output else { continue };
                let mv = Move {
                    from: slot,
                    to: registry.source_column(*id)?,
                };
                if !field.no_calc {
                    nutrients.push(mv);
                } else if keep {
                    moves.push(mv);
                }
            }
            let recipe_id = registry.output_slot(file.columns[file.recipe_id])?;
            if !keep {
                if let Some(food_id) = model.food_id.filter(|id| registry.field(*id).output.is_some()) {
                    moves.push(Move {
                        from: recipe_id,
                        to: registry.source_column(food_id)?,
                    });
                }
            }
            for column in &file.columns {
                let field = registry.field(*column);
                if !field.copy_from_recipe {
                    continue;
                }
                if let Some(food) = registry.food.get(&field.name) {
                    moves.push(Move {
                        from: registry.output_slot(*column)?,
                        to: registry.source_column(food)?,
                    });
                }
            }
            let mut reductions = Vec::new();
            for rule in &model.recipe_reductions {
                let Some(column) = stream.find(registry, &rule.column) else {
                    continue;
                };
                let targets = rule
                    .targets
                    .iter()
                    .filter(|t| registry.field(**t).output.is_some())
                    .map(|t| registry.source_column(*t))
                    .collect::<Result<Vec<_>, CompileError>>()?;
                let Some(denominator) = rule.weight_field() else { continue };
                reductions.push(RecipeReduction {
                    fraction: registry.output_slot(file.columns[column])?,
                    denominator: registry.output_slot(denominator)?,
                    targets,
                });
            }
            Ok(RecipeAssembly {
                recipe_id,
                sum: registry.output_slot(weight)?,
                amount: registry.output_slot(file.columns[file.amount])?,
                nutrients,
                moves,
                reductions,
                keep,
            })
        })();
        let assembly = match assembly {
            Ok(assembly) => assembly,
            Err(e) => {
                diag.record(e)?;
                continue;
            }
        };
        plans.push(RecipePlan {
            source: file.spec.clone(),
            execution: ExecutionPlan {
                core: core.clone(),
                stream: StreamPlan {
                    columns: shape.columns,
                    text: shape.text,
                    moves: shape.moves,
                    food: file.food_id,
                    amount: file.amount,
                    scale: 1.0 / recipe_sum,
                    non_edible: shape.non_edible,
                    cook: shape.cook,
                    reductions: shape.reductions,
                    recalc_weights: shape.recalc_weights,
                    input_groups: Vec::new(),
                    food_groups: Vec::new(),
                    tests: TestChain::None,
                    transposes: Vec::new(),
                    blip: 0,
                },
            },
            assembly,
            recipe_sum,
        });
    }
    Ok(plans)
}

fn weight_cook_plan(model: &Model) -> Result<Option<WeightCookPlan>, CompileError> {
    let Some((recipe_sum, _)) = model.recipe_sum else {
        return Ok(None);
    };
    let registry = &model.registry;
    let mut conversions = Vec::new();
    for rule in model.active_cook_rules() {
        if rule.kind != CookKind::Weight
            || !rule.targets.iter().any(|t| registry.field(*t).output.is_some())
        {
            continue;
        }
        let Some(weight) = rule.weight_field() else { continue };
        conversions.push(WeightConversion {
            fraction: registry.source_column(rule.fraction)?,
            denominator: registry.output_slot(weight)?,
        });
    }
    if conversions.is_empty() {
        return Ok(None);
    }
    Ok(Some(WeightCookPlan {
        core: core_plan(model, true)?,
        conversions,
        recipe_sum,
    }))
}

fn load_plan(model: &Model) -> Result<LoadPlan, CompileError> {
    let registry = &model.registry;
    let text = |columns: &[FieldId]| -> Vec<bool> {
        columns.iter().map(|id| registry.field(*id).is_text).collect()
    };
    let mut foods = Vec::new();
    for file in model.foods.iter().filter(|f| f.used) {
        foods.push(FoodsLoad {
            source: file.spec.clone(),
            text: text(&file.columns),
            id_column: file.id_column,
            moves: file
                .columns
                .iter()
                .enumerate()
                .filter_map(|(i, id)| registry.field(*id).source.map(|to| Move { from: i, to }))
                .collect(),
        });
    }
    let mut groups = Vec::new();
    for file in model.groups.iter().filter(|g| g.used) {
        let key_columns = file
            .ids
            .iter()
            .map(|id| {
                file.columns
                    .iter()
                    .position(|c| c == id)
                    .ok_or_else(|| CompileError::Unplaced(registry.name(*id).to_string()))
            })
            .collect::<Result<Vec<_>, CompileError>>()?;
        let key_table = file
            .ids
            .iter()
            .map(|id| registry.source_column(*id))
            .collect::<Result<Vec<_>, CompileError>>()?;
        groups.push(GroupsLoad {
            source: file.spec.clone(),
            text: text(&file.columns),
            key_columns,
            key_table,
            moves: file
                .columns
                .iter()
                .enumerate()
                .filter(|(_, id)| !file.ids.contains(id))
                .filter_map(|(i, id)| registry.field(*id).source.map(|to| Move { from: i, to }))
                .collect(),
        });
    }
    Ok(LoadPlan {
        width: registry.table().len(),
        fields: registry
            .table()
            .iter()
            .map(|id| registry.name(*id).to_string())
            .collect(),
        foods,
        groups,
    })
}

pub(crate) fn lower(model: &Model, diag: &mut Diagnostics) -> Result<Option<CompiledPlan>, FatalError> {
    let load = match load_plan(model) {
        Ok(load) => Some(load),
        Err(e) => {
            diag.record(e)?;
            None
        }
    };
    let weight_cook = match weight_cook_plan(model) {
        Ok(plan) => plan,
        Err(e) => {
            diag.record(e)?;
            None
        }
    };
    let recipes = recipe_plans(model, diag)?;
    let input = input_plan(model, diag)?;
    let registry = &model.registry;
    let (Some(load), Some(input), Some(input_spec), Some(output)) = (
        load,
        input,
        model.input.as_ref().map(|i| i.spec.clone()),
        model.output.clone(),
    ) else {
        return Ok(None);
    };
    let input_fields = model
        .input
        .iter()
        .flat_map(|i| i.columns.iter())
        .map(|id| registry.name(*id).to_string())
        .collect();
    let header = registry.outputs()[..registry.real_output_count()]
        .iter()
        .map(|id| registry.name(*id).to_string())
        .collect();
    Ok(Some(CompiledPlan {
        load,
        weight_cook,
        recipes,
        input,
        io: IoPlan {
            input: input_spec,
            input_fields,
            output,
            header,
        },
        save: model.save.clone(),
    }))
}
