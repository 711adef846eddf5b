//! Output placement and food table placement.
//!
//! Output placement gives every field that is written or needed by another
//! computed field a position in the observation vector. Positions are handed
//! out densely in the order requests arrive; the written outputs come first.
//! Table placement then gives every food field that is read during the run a
//! dense column in the food table records.

use super::model::{Model, SetRule, ValueRef};
use super::registry::FieldId;
use crate::error::{CompileError, Diagnostics, FatalError};
use crate::script::ListItem;

fn report(diag: &mut Diagnostics, result: Result<(), CompileError>) -> Result<(), FatalError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => diag.record(e),
    }
}

pub(crate) fn place_outputs(model: &mut Model, diag: &mut Diagnostics) -> Result<(), FatalError> {
    let result = output_list(model);
    report(diag, result)?;

    for transpose in &model.transposes {
        for first in &transpose.generated {
            for k in 0..transpose.groups {
                model.registry.place_output(FieldId(first.0 + k), false);
            }
        }
    }
    model.registry.mark_real_outputs();

    for i in 0..model.transposes.len() {
        let sources = model.transposes[i].sources.clone();
        for source in sources {
            let result = model.registry.check_no_calc(source, "transpose");
            report(diag, result)?;
            model.registry.require_output(source, false);
        }
        model.registry.require_output(model.transposes[i].pivot, true);
    }

    let keys: Vec<FieldId> = model
        .group_input
        .iter()
        .chain(model.group_food.iter())
        .copied()
        .collect();
    for key in keys {
        model.registry.require_output(key, false);
    }

    place_cook_weights(model);
    place_reduce_weights(model);

    if let Some((_, weight)) = model.recipe_sum {
        let result = model.registry.check_no_calc(weight, "recipe sum");
        report(diag, result)?;
        model.registry.require_output(weight, true);
    }
    let recipe_weights: Vec<FieldId> = model
        .recipe_reductions
        .iter()
        .filter_map(|r| r.weight_field())
        .collect();
    for weight in recipe_weights {
        model.registry.require_output(weight, true);
    }

    let simple = model.simple_tests;
    let test_fields: Vec<FieldId> = model
        .tests
        .iter()
        .flat_map(|t| [t.left.field(), t.right.field()])
        .flatten()
        .collect();
    for field in test_fields {
        model.registry.require_output(field, simple);
    }

    let group_sets = std::mem::take(&mut model.group_sets);
    walk_sets(model, &group_sets, false);
    model.group_sets = group_sets;
    let recipe_sets = std::mem::take(&mut model.recipe_sets);
    walk_sets(model, &recipe_sets, true);
    model.recipe_sets = recipe_sets;
    let sets = std::mem::take(&mut model.sets);
    walk_sets(model, &sets, false);
    model.sets = sets;

    for file in 0..model.recipes.len() {
        let result = place_recipe_file(model, file);
        report(diag, result)?;
    }
    Ok(())
}

fn output_list(model: &mut Model) -> Result<(), CompileError> {
    let grouping = model.is_grouped();
    let registry = &mut model.registry;
    match model.output_list.clone() {
        Some(items) => {
            for item in &items {
                let ids = match item {
                    ListItem::Range(..) => {
                        registry.food_list(std::slice::from_ref(item), "in output fields")?
                    }
                    ListItem::Field(name) => {
                        let id = registry
                            .input
                            .get(name)
                            .or_else(|| registry.food.get(name))
                            .or_else(|| registry.calculated.get(name))
                            .or_else(|| registry.group_set.get(name))
                            .ok_or_else(|| CompileError::UnknownField {
                                name: name.clone(),
                                context: "in output fields".to_string(),
                            })?;
                        vec![id]
                    }
                };
                for id in ids {
                    registry.place_listed_output(id, grouping)?;
                }
            }
        }
        None => {
            let mut defaults: Vec<FieldId> = Vec::new();
            for id in registry.input.order().iter().chain(registry.food.order()) {
                let field = registry.field(*id);
                if !field.is_text && (!grouping || !field.no_calc || field.group_order.is_some()) {
                    defaults.push(*id);
                }
            }
            defaults.extend_from_slice(registry.calculated.order());
            defaults.extend_from_slice(registry.group_set.order());
            for id in defaults {
                registry.place_output(id, false);
            }
        }
    }
    Ok(())
}

fn place_cook_weights(model: &mut Model) {
    let Some((cook_field, types)) = model.cook_field.clone() else {
        return;
    };
    let cook_in_input = model.registry.input.contains(&cook_field);
    let mut requests = Vec::new();
    for t in types {
        for rule in &model.cook_types[t].rules {
            if rule.kind != crate::script::CookKind::Weight {
                continue;
            }
            let used: Vec<FieldId> = rule
                .targets
                .iter()
                .copied()
                .filter(|t| model.registry.field(*t).output.is_some())
                .collect();
            if used.is_empty() {
                continue;
            }
            let recipe_only = !(cook_in_input
                && used.iter().any(|t| !model.registry.field(*t).recipe_only));
            if let Some(weight) = rule.weight_field() {
                requests.push((weight, recipe_only));
            }
        }
    }
    for (weight, recipe_only) in requests {
        model.registry.require_output(weight, recipe_only);
    }
}

fn place_reduce_weights(model: &mut Model) {
    let mut requests = Vec::new();
    for rule in &model.reductions {
        if rule.kind != crate::script::ReduceKind::Weight {
            continue;
        }
        let used: Vec<FieldId> = rule
            .targets
            .iter()
            .copied()
            .filter(|t| model.registry.field(*t).output.is_some())
            .collect();
        if used.is_empty() {
            continue;
        }
        let recipe_only = !(model.registry.input.contains(&rule.column)
            && used.iter().any(|t| !model.registry.field(*t).recipe_only));
        if let Some(weight) = rule.weight_field() {
            requests.push((weight, recipe_only));
        }
    }
    for (weight, recipe_only) in requests {
        model.registry.require_output(weight, recipe_only);
    }
}

/// Walks `rules` backwards, giving the operands of every placed target a
/// position. Temporaries are computed before the rule that uses them, so a
/// single backward walk reaches every dependency.
fn walk_sets(model: &mut Model, rules: &[SetRule], recipe_only: bool) {
    for rule in rules.iter().rev() {
        let target = model.registry.field(rule.target);
        if target.output.is_none() {
            continue;
        }
        let only = recipe_only || target.recipe_only;
        for (_, operand) in &rule.steps {
            if let ValueRef::Field(id) = operand {
                model.registry.require_output(*id, only);
            }
        }
    }
}

fn place_recipe_file(model: &mut Model, index: usize) -> Result<(), CompileError> {
    let file = model.recipes[index].clone();
    let registry = &mut model.registry;
    registry.place_output(file.columns[file.recipe_id], true);
    registry.place_output(file.columns[file.amount], true);

    let scope = registry.recipe_files[file.scope].clone();
    for placeholder in registry.placeholders.order().to_vec() {
        let name = registry.name(placeholder).to_string();
        let column = scope.get(&name).ok_or_else(|| CompileError::UnknownField {
            name: name.clone(),
            context: format!("in recipes file {} but used in recipe set:", file.spec.file),
        })?;
        registry.check_text(column, "in recipe set")?;
    }
    for rule in &model.recipe_reductions {
        if let Some(column) = scope.get(&rule.column) {
            registry.check_text(column, "as recipe reduce field")?;
            registry.require_output(column, true);
        }
    }
    if model.ingredients.copies_recipe_fields() {
        for (i, column) in file.columns.iter().enumerate() {
            if i == file.food_id || registry.field(*column).output.is_some() {
                continue;
            }
            let name = registry.name(*column).to_string();
            let Some(food) = registry.food.get(&name) else {
                continue;
            };
            let target = registry.field(food);
            if target.output.is_some() && target.no_calc {
                registry.place_output(*column, true);
                registry.field_mut(*column).copy_from_recipe = true;
            }
        }
    }
    Ok(())
}

pub(crate) fn place_sources(model: &mut Model, diag: &mut Diagnostics) -> Result<(), FatalError> {
    let food_order = model.registry.food.order().to_vec();
    for id in food_order {
        if Some(id) == model.food_id || model.registry.field(id).output.is_some() {
            model.registry.place_source(id);
        }
    }
    if let Some(non_edible) = &model.non_edible {
        model.registry.place_source(non_edible.fraction);
    }

    let mut fractions = Vec::new();
    for rule in model.active_cook_rules() {
        let used: Vec<FieldId> = rule
            .targets
            .iter()
            .copied()
            .filter(|t| model.registry.field(*t).output.is_some())
            .collect();
        if used.is_empty() {
            continue;
        }
        for target in used {
            let result = model.registry.check_no_calc(target, "cook");
            report(diag, result)?;
        }
        fractions.push(rule.fraction);
    }
    for fraction in fractions {
        model.registry.place_source(fraction);
    }

    for (rules, usage) in [
        (&model.reductions, "reduce field"),
        (&model.recipe_reductions, "recipe reduce"),
    ] {
        for rule in rules {
            for target in &rule.targets {
                if model.registry.field(*target).output.is_some() {
                    let result = model.registry.check_no_calc(*target, usage);
                    report(diag, result)?;
                }
            }
        }
    }

    for index in (0..model.groups.len()).rev() {
        let groups = &model.groups[index];
        let read = groups
            .columns
            .iter()
            .filter(|c| model.registry.field(**c).source.is_some() && !groups.ids.contains(c))
            .count();
        let ids = groups.ids.clone();
        if read > 0 {
            for id in ids {
                model.registry.place_source(id);
            }
        } else {
            model.groups[index].used = false;
        }
    }

    for index in 0..model.foods.len() {
        let foods = &model.foods[index];
        let read = foods
            .columns
            .iter()
            .enumerate()
            .filter(|(i, c)| *i != foods.id_column && model.registry.field(**c).source.is_some())
            .count();
        if index > 0 && read == 0 {
            model.foods[index].used = false;
        }
    }
    Ok(())
}
