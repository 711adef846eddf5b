//! Ingestion and classification: reads every data header into the field
//! namespaces and turns commands into rule objects.

use super::decision::DecisionBuilder;
use super::model::{
    CookRule, CookType, FoodsFile, GroupsFile, InputFile, Model, NonEdibleRule, RecipeFile,
    ReduceRule, SetRule, TransposeRule, ValueRef,
};
use super::registry::{FieldId, FieldOrigin, FieldRegistry};
use crate::ast::{FactorValue, Operand, Product, Sum, TermValue};
use crate::error::{CompileError, Diagnostics, FatalError, FoodCalcError};
use crate::io::{DeclaredFields, RecordSource, SinkSpec, SourceProvider, SourceSpec};
use crate::plan::SetOp;
use crate::script::{
    CalculateTerm, Command, CookKind, Delimiters, Dialect, FileFormat, ListItem, ReduceKind,
    Script, SetScope,
};
use tracing::debug;

pub(crate) struct Resolver<'a> {
    script: &'a Script,
    provider: &'a dyn SourceProvider,
    global: Delimiters,
    input_override: Option<String>,
    output_override: Option<String>,
    pub(crate) model: Model,
    pub(crate) input_source: Option<Box<dyn RecordSource>>,
}

fn report<E: Into<FoodCalcError>>(
    diag: &mut Diagnostics,
    result: Result<(), E>,
) -> Result<(), FatalError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) => diag.record(e),
    }
}

fn unknown(name: &str, context: impl Into<String>) -> CompileError {
    CompileError::UnknownField {
        name: name.to_string(),
        context: context.into(),
    }
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        script: &'a Script,
        provider: &'a dyn SourceProvider,
        input_override: Option<String>,
        output_override: Option<String>,
    ) -> Self {
        Self {
            script,
            provider,
            global: script.global_delimiters(),
            input_override,
            output_override,
            model: Model::default(),
            input_source: None,
        }
    }

    fn registry(&mut self) -> &mut FieldRegistry {
        &mut self.model.registry
    }

    fn dialect(&self, local: &Delimiters) -> Dialect {
        Dialect::resolve(local, &self.global)
    }

    // ---- ingestion -------------------------------------------------------

    /// Reads every header and builds the field namespaces.
    pub(crate) fn ingest(&mut self, diag: &mut Diagnostics) -> Result<(), FatalError> {
        let script = self.script;
        for command in script.iter() {
            if let Command::Foods {
                file,
                id_field,
                delimiters,
            } = command
            {
                let result = self.foods_file(file, id_field.as_deref(), delimiters);
                report(diag, result)?;
            }
        }
        for command in script.iter() {
            if let Command::Groups {
                file,
                id_fields,
                delimiters,
            } = command
            {
                let result = self.groups_file(file, id_fields, delimiters);
                report(diag, result)?;
            }
        }

        let has_recipes = script.contains("recipes");
        for command in script.iter() {
            if let Command::Set {
                scope: SetScope::Recipe,
                target,
                ..
            } = command
            {
                if has_recipes {
                    self.registry().food_field(target);
                } else {
                    diag.record(CompileError::IllegalCombination(
                        "The recipe set: command can only be used together with recipes:".into(),
                    ))?;
                }
            }
        }

        let result = self.input_file();
        report(diag, result)?;
        let result = self.output_file();
        report(diag, result)?;

        for command in script.iter() {
            if let Command::Recipes {
                file,
                recipe_id,
                food_id,
                amount,
                delimiters,
            } = command
            {
                let ids = [recipe_id.as_deref(), food_id.as_deref(), amount.as_deref()];
                let result = self.recipes_file(file, ids, delimiters);
                report(diag, result)?;
            }
        }

        if has_recipes && !script.contains("recipe sum") {
            diag.record(CompileError::IllegalCombination(
                "The recipe sum: command is required when recipes: is used".into(),
            ))?;
        }
        if script.contains("ingredients") && !has_recipes {
            diag.record(CompileError::IllegalCombination(
                "The ingredients: command can only be used together with recipes:".into(),
            ))?;
        }
        if script.contains("save") && !script.contains("input fields") {
            diag.record(CompileError::IllegalCombination(
                "When saving, the input fields: command must be used".into(),
            ))?;
        }
        for command in script.iter() {
            match command {
                Command::Ingredients(mode) => self.model.ingredients = *mode,
                Command::Blip(every) => self.model.blip = *every,
                Command::Save(file) => self.model.save = Some(file.clone()),
                Command::OutputFields(items) => self.model.output_list = Some(items.clone()),
                _ => {}
            }
        }
        Ok(())
    }

    fn open_header(&self, spec: &SourceSpec) -> Result<Box<dyn RecordSource>, FoodCalcError> {
        let source = self.provider.open_source(spec)?;
        debug!("Header of {}: {:?}", spec.file, source.fields());
        Ok(source)
    }

    fn foods_file(
        &mut self,
        file: &str,
        id_field: Option<&str>,
        delimiters: &Delimiters,
    ) -> Result<(), FoodCalcError> {
        let spec = SourceSpec::text(file, self.dialect(delimiters));
        let names = self.open_header(&spec)?.fields().to_vec();
        if names.is_empty() {
            return Err(CompileError::TooFewFields {
                file: file.to_string(),
                required: 1,
            }
            .into());
        }
        let id_column = match id_field {
            Some(name) => names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| unknown(name, format!("as id field in foods file {}", file)))?,
            None => 0,
        };
        let id_name = match self.model.food_id {
            Some(id) => self.model.registry.name(id).to_string(),
            None => names[id_column].clone(),
        };
        let registry = &mut self.model.registry;
        let columns: Vec<FieldId> = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                registry.food_field(if i == id_column { &id_name } else { name })
            })
            .collect();
        let id = columns[id_column];
        registry.field_mut(id).no_calc = true;
        self.model.food_id = Some(id);
        self.model.foods.push(FoodsFile {
            spec,
            columns,
            id_column,
            used: true,
        });
        Ok(())
    }

    fn groups_file(
        &mut self,
        file: &str,
        id_fields: &[String],
        delimiters: &Delimiters,
    ) -> Result<(), FoodCalcError> {
        let spec = SourceSpec::text(file, self.dialect(delimiters));
        let names = self.open_header(&spec)?.fields().to_vec();
        let id_names: Vec<String> = if id_fields.is_empty() {
            names.iter().take(1).cloned().collect()
        } else {
            id_fields.to_vec()
        };
        if names.len() <= id_names.len() {
            return Err(CompileError::TooFewFields {
                file: file.to_string(),
                required: id_names.len() + 1,
            }
            .into());
        }
        for name in &id_names {
            if !self.model.registry.food.contains(name) {
                return Err(unknown(name, format!("for groups file {} in any foods file", file)).into());
            }
            if !names.contains(name) {
                return Err(unknown(name, format!("in groups file {}", file)).into());
            }
        }
        let registry = &mut self.model.registry;
        let columns: Vec<FieldId> = names.iter().map(|name| registry.food_field(name)).collect();
        let ids: Vec<FieldId> = id_names.iter().map(|name| registry.food_field(name)).collect();
        for id in &ids {
            registry.field_mut(*id).no_calc = true;
        }
        self.model.groups.push(GroupsFile {
            spec,
            columns,
            ids,
            used: true,
        });
        Ok(())
    }

    fn declared_input_fields(&self) -> Option<DeclaredFields> {
        let mut star = Vec::new();
        let mut normal = Vec::new();
        let mut declared = false;
        for command in self.script.iter() {
            if let Command::InputFields { star: is_star, fields } = command {
                declared = true;
                if *is_star {
                    star.extend(fields.iter().cloned());
                } else {
                    normal.extend(fields.iter().cloned());
                }
            }
        }
        declared.then(|| DeclaredFields {
            star: star.len(),
            fields: star.into_iter().chain(normal).collect(),
        })
    }

    fn input_file(&mut self) -> Result<(), FoodCalcError> {
        let script = self.script;
        let Some((file, food_field, amount_field, delimiters)) = script.iter().find_map(|c| match c {
            Command::Input {
                file,
                food_field,
                amount_field,
                delimiters,
            } => Some((file, food_field, amount_field, delimiters)),
            _ => None,
        }) else {
            return Ok(());
        };
        let file = self.input_override.clone().unwrap_or_else(|| file.clone());
        let declared = self.declared_input_fields();
        let requested = script.iter().find_map(|c| match c {
            Command::InputFormat(format) => Some(*format),
            _ => None,
        });
        let format = match (requested, &declared) {
            (Some(FileFormat::Text), Some(_)) => {
                return Err(CompileError::IllegalCombination(
                    "The input format text can not be used together with input fields:".into(),
                )
                .into());
            }
            (Some(format), None) if format != FileFormat::Text => {
                return Err(CompileError::IllegalCombination(format!(
                    "The input format {} requires input fields:",
                    format
                ))
                .into());
            }
            (Some(format), _) => format,
            (None, Some(_)) => FileFormat::TextNoHead,
            (None, None) => FileFormat::Text,
        };
        if format == FileFormat::BinNative {
            if declared.as_ref().is_some_and(|d| d.star > 0) {
                return Err(CompileError::IllegalCombination(
                    "The input format bin-native can not be used with star fields".into(),
                )
                .into());
            }
            if file == "-" {
                return Err(CompileError::IllegalCombination(
                    "The input format bin-native can not be used when reading standard input"
                        .into(),
                )
                .into());
            }
        }
        let spec = SourceSpec {
            file: file.clone(),
            format,
            dialect: self.dialect(delimiters),
            declared: declared.clone(),
        };
        let names = match (&declared, format) {
            (Some(declared), f) if f != FileFormat::Text => declared.fields.clone(),
            _ => {
                let source = self.open_header(&spec)?;
                let names = source.fields().to_vec();
                self.input_source = Some(source);
                names
            }
        };
        if names.len() < 2 {
            return Err(CompileError::TooFewFields { file, required: 2 }.into());
        }
        let mut columns = Vec::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            columns.push(self.registry().add_input(name, i)?);
        }
        let position = |name: &Option<String>, default: usize| -> Result<usize, CompileError> {
            match name {
                Some(name) => names
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| unknown(name, format!("in input file {}", file))),
                None => Ok(default),
            }
        };
        let food = position(food_field, 0)?;
        let amount = position(amount_field, 1)?;
        let scale = script
            .iter()
            .find_map(|c| match c {
                Command::InputScale(scale) => Some(*scale),
                _ => None,
            })
            .unwrap_or(1.0);
        if scale == 0.0 {
            return Err(CompileError::InvalidArgument {
                command: "input scale".into(),
                message: "the scale can not be zero".into(),
            }
            .into());
        }
        self.model.input = Some(InputFile {
            spec,
            columns,
            food,
            amount,
            scale,
        });
        Ok(())
    }

    fn output_file(&mut self) -> Result<(), FoodCalcError> {
        let script = self.script;
        let Some((file, delimiters)) = script.iter().find_map(|c| match c {
            Command::Output { file, delimiters } => Some((file, delimiters)),
            _ => None,
        }) else {
            return Ok(());
        };
        let file = self.output_override.clone().unwrap_or_else(|| file.clone());
        let format = script
            .iter()
            .find_map(|c| match c {
                Command::OutputFormat(format) => Some(*format),
                _ => None,
            })
            .unwrap_or(FileFormat::Text);
        if format == FileFormat::BinNative && file == "-" {
            return Err(CompileError::IllegalCombination(
                "The output format bin-native can not be used when writing standard output".into(),
            )
            .into());
        }
        self.model.output = Some(SinkSpec {
            file,
            format,
            dialect: self.dialect(delimiters),
        });
        Ok(())
    }

    fn recipes_file(
        &mut self,
        file: &str,
        ids: [Option<&str>; 3],
        delimiters: &Delimiters,
    ) -> Result<(), FoodCalcError> {
        let spec = SourceSpec::text(file, self.dialect(delimiters));
        let names = self.open_header(&spec)?.fields().to_vec();
        if names.len() < 3 {
            return Err(CompileError::TooFewFields {
                file: file.to_string(),
                required: 3,
            }
            .into());
        }
        let scope = self.registry().add_recipe_file();
        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            columns.push(self.registry().add_recipe_column(scope, name)?);
        }
        let mut positions = [0usize; 3];
        for (i, id) in ids.iter().enumerate() {
            positions[i] = match id {
                Some(name) => names
                    .iter()
                    .position(|n| n == name)
                    .ok_or_else(|| unknown(name, format!("in recipes file {}", file)))?,
                None => i,
            };
        }
        self.model.recipes.push(RecipeFile {
            spec,
            scope,
            columns,
            recipe_id: positions[0],
            food_id: positions[1],
            amount: positions[2],
        });
        Ok(())
    }

    // ---- classification --------------------------------------------------

    /// Tags fields and builds the rule objects, in dependency order of the
    /// command kinds.
    pub(crate) fn classify(&mut self, diag: &mut Diagnostics) -> Result<(), FatalError> {
        let script = self.script;
        for command in script.iter() {
            if let Command::NoCalcFields(items) = command {
                let result = self.no_calc_fields(items);
                report(diag, result)?;
            }
        }
        for command in script.iter() {
            if let Command::TextFields(items) = command {
                let result = self.text_fields(items);
                report(diag, result)?;
            }
        }
        let result = self.check_text_ids();
        report(diag, result)?;

        for command in script.iter() {
            let result = match command {
                Command::NonEdible { field, flag } => self.non_edible(field, flag.as_deref()),
                Command::GroupBy(names) => self.group_by(names),
                _ => continue,
            };
            report(diag, result)?;
        }
        for command in script.iter() {
            if let Command::Set {
                scope: SetScope::Normal,
                target,
                expression,
            } = command
            {
                let result = self.set(SetScope::Normal, target, expression);
                report(diag, result)?;
            }
        }
        for command in script.iter() {
            if let Command::Calculate { target, terms } = command {
                let result = self.calculate(target, terms);
                report(diag, result)?;
            }
        }
        for command in script.iter() {
            if let Command::RecipeSum { sum, fields } = command {
                let result = self.recipe_sum(*sum, fields);
                report(diag, result)?;
            }
        }
        for command in script.iter() {
            if let Command::Set {
                scope: SetScope::Recipe,
                target,
                expression,
            } = command
            {
                let result = self.set(SetScope::Recipe, target, expression);
                report(diag, result)?;
            }
        }
        for command in script.iter() {
            if let Command::Cook {
                kind,
                cook_type,
                field,
                targets,
            } = command
            {
                let result = self.cook(*kind, cook_type, field, targets);
                report(diag, result)?;
            }
        }
        for command in script.iter() {
            if let Command::CookField { field, types } = command {
                let result = self.cook_field(field, types);
                report(diag, result)?;
            }
        }
        for kind in [ReduceKind::Nutrient, ReduceKind::Weight, ReduceKind::RecipeWeight] {
            for command in script.iter() {
                if let Command::Reduce {
                    kind: k,
                    field,
                    targets,
                } = command
                {
                    if *k == kind {
                        let result = self.reduce(kind, field, targets);
                        report(diag, result)?;
                    }
                }
            }
        }
        for command in script.iter() {
            if let Command::Transpose {
                field,
                count,
                fields,
            } = command
            {
                let result = self.transpose(field, *count, fields);
                report(diag, result)?;
            }
        }
        let result = self.tests();
        report(diag, result)?;
        for command in script.iter() {
            if let Command::Set {
                scope: SetScope::Group,
                target,
                expression,
            } = command
            {
                let result = self.set(SetScope::Group, target, expression);
                report(diag, result)?;
            }
        }
        Ok(())
    }

    fn no_calc_fields(&mut self, items: &[ListItem]) -> Result<(), CompileError> {
        let ids = self.model.registry.food_list(items, "in no-calc fields")?;
        for id in ids {
            self.registry().field_mut(id).no_calc = true;
        }
        Ok(())
    }

    fn text_fields(&mut self, items: &[ListItem]) -> Result<(), CompileError> {
        for item in items {
            match item {
                ListItem::Range(..) => {
                    let ids = self
                        .model
                        .registry
                        .food_list(std::slice::from_ref(item), "in text fields")?;
                    for id in ids {
                        let field = self.registry().field_mut(id);
                        field.is_text = true;
                        field.no_calc = true;
                    }
                }
                ListItem::Field(name) => {
                    let registry = &mut self.model.registry;
                    let mut found = false;
                    if let Some(id) = registry.input.get(name) {
                        registry.field_mut(id).is_text = true;
                        found = true;
                    }
                    if let Some(id) = registry.food.get(name) {
                        let field = registry.field_mut(id);
                        field.is_text = true;
                        field.no_calc = true;
                        found = true;
                    }
                    for scope in 0..registry.recipe_files.len() {
                        if let Some(id) = registry.recipe_files[scope].get(name) {
                            registry.field_mut(id).is_text = true;
                            found = true;
                        }
                    }
                    if !found {
                        return Err(unknown(name, "in text fields"));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_text_ids(&self) -> Result<(), CompileError> {
        let registry = &self.model.registry;
        if let Some(input) = &self.model.input {
            registry.check_text(input.columns[input.food], "as input food id")?;
            registry.check_text(input.columns[input.amount], "as input amount")?;
        }
        if let Some(id) = self.model.food_id {
            registry.check_text(id, "as food id")?;
        }
        for groups in &self.model.groups {
            for id in &groups.ids {
                registry.check_text(*id, "as group id")?;
            }
        }
        for recipe in &self.model.recipes {
            registry.check_text(recipe.columns[recipe.recipe_id], "as recipe id")?;
            registry.check_text(recipe.columns[recipe.food_id], "as recipe food id")?;
            registry.check_text(recipe.columns[recipe.amount], "as recipe amount")?;
        }
        Ok(())
    }

    fn non_edible(&mut self, name: &str, flag: Option<&str>) -> Result<(), CompileError> {
        let id = self
            .model
            .registry
            .food
            .get(name)
            .ok_or_else(|| unknown(name, "in non-edible field"))?;
        self.model.registry.check_text(id, "as non-edible field")?;
        self.registry().field_mut(id).no_calc = true;
        self.model.non_edible = Some(NonEdibleRule {
            fraction: id,
            flag: flag.map(str::to_string),
        });
        Ok(())
    }

    fn group_by(&mut self, names: &[String]) -> Result<(), CompileError> {
        let mut food_keys = false;
        for (order, name) in names.iter().enumerate() {
            let registry = &self.model.registry;
            let id = match registry.input.get(name) {
                Some(id) => id,
                None => {
                    food_keys = true;
                    registry
                        .food
                        .get(name)
                        .ok_or_else(|| unknown(name, "in group by"))?
                }
            };
            registry.check_text(id, "in group by")?;
            let field = self.registry().field_mut(id);
            field.group_order = Some(order + 1);
            field.no_calc = true;
            if food_keys {
                self.model.group_food.push(id);
            } else {
                self.model.group_input.push(id);
            }
        }
        Ok(())
    }

    fn check_new_target(&self, scope: SetScope, name: &str) -> Result<(), CompileError> {
        let registry = &self.model.registry;
        let kind = match scope {
            SetScope::Group => "Group set",
            _ => "Set",
        };
        let conflict = |reason: &str| CompileError::Conflict {
            kind: kind.to_string(),
            name: name.to_string(),
            reason: reason.to_string(),
        };
        if registry.food.contains(name) {
            return Err(conflict("is a food field"));
        }
        if registry.input.contains(name) {
            return Err(conflict("is an input field"));
        }
        if registry.calculated.contains(name) || registry.group_set.contains(name) {
            return Err(conflict("is set more than once"));
        }
        Ok(())
    }

    fn set(&mut self, scope: SetScope, target: &str, expression: &Sum) -> Result<(), CompileError> {
        let mut rules = Vec::new();
        match scope {
            SetScope::Recipe => {
                let food = self
                    .model
                    .registry
                    .food
                    .get(target)
                    .ok_or_else(|| unknown(target, "as recipe set target"))?;
                let temp = self.registry().temporary();
                self.lower_sum(scope, temp, expression, &mut rules)?;
                rules.push(SetRule {
                    target: food,
                    steps: vec![(SetOp::Copy, ValueRef::Field(temp))],
                });
                self.model.recipe_sets.extend(rules);
            }
            SetScope::Normal => {
                self.check_new_target(scope, target)?;
                let id = self.registry().reserve(target, FieldOrigin::Calculated);
                self.lower_sum(scope, id, expression, &mut rules)?;
                self.registry().publish(id);
                self.model.sets.extend(rules);
            }
            SetScope::Group => {
                self.check_new_target(scope, target)?;
                let id = self.registry().reserve(target, FieldOrigin::GroupSet);
                self.lower_sum(scope, id, expression, &mut rules)?;
                self.registry().publish(id);
                self.model.group_sets.extend(rules);
            }
        }
        Ok(())
    }

    fn operand(&mut self, scope: SetScope, name: &str) -> Result<ValueRef, CompileError> {
        let registry = &self.model.registry;
        let found = registry.food.get(name).or_else(|| registry.calculated.get(name));
        let id = match (found, scope) {
            (Some(id), _) => id,
            (None, SetScope::Group) => registry
                .group_set
                .get(name)
                .ok_or_else(|| unknown(name, "in group set expression"))?,
            (None, SetScope::Recipe) => self.registry().placeholder(name),
            (None, SetScope::Normal) => return Err(unknown(name, "in set expression")),
        };
        self.model.registry.check_text(id, "in a set expression")?;
        Ok(ValueRef::Field(id))
    }

    /// Lowers `sum` into rules computing `target`. Rules for nested
    /// subexpressions are pushed before the rule that uses them.
    fn lower_sum(
        &mut self,
        scope: SetScope,
        target: FieldId,
        sum: &Sum,
        rules: &mut Vec<SetRule>,
    ) -> Result<(), CompileError> {
        if let [term] = sum.terms.as_slice() {
            if let (false, TermValue::Product(product)) = (term.negated, &term.value) {
                return self.lower_product(scope, target, product, rules);
            }
        }
        let mut steps = Vec::with_capacity(sum.terms.len() + 1);
        for (i, term) in sum.terms.iter().enumerate() {
            let operand = match &term.value {
                TermValue::Constant(v) => ValueRef::Constant(*v),
                TermValue::Field(name) => self.operand(scope, name)?,
                TermValue::Product(product) => {
                    let temp = self.registry().temporary();
                    self.lower_product(scope, temp, product, rules)?;
                    ValueRef::Field(temp)
                }
            };
            match (i, term.negated) {
                (0, false) => steps.push((SetOp::Copy, operand)),
                (0, true) => {
                    steps.push((SetOp::Copy, ValueRef::Constant(0.0)));
                    steps.push((SetOp::Sub, operand));
                }
                (_, false) => steps.push((SetOp::Add, operand)),
                (_, true) => steps.push((SetOp::Sub, operand)),
            }
        }
        if steps.is_empty() {
            steps.push((SetOp::Copy, ValueRef::Constant(0.0)));
        }
        rules.push(SetRule { target, steps });
        Ok(())
    }

    fn lower_product(
        &mut self,
        scope: SetScope,
        target: FieldId,
        product: &Product,
        rules: &mut Vec<SetRule>,
    ) -> Result<(), CompileError> {
        let mut steps = Vec::with_capacity(product.factors.len() + 1);
        for (i, factor) in product.factors.iter().enumerate() {
            let operand = match &factor.value {
                FactorValue::Constant(v) => ValueRef::Constant(*v),
                FactorValue::Field(name) => self.operand(scope, name)?,
                FactorValue::Sum(sum) => {
                    let temp = self.registry().temporary();
                    self.lower_sum(scope, temp, sum, rules)?;
                    ValueRef::Field(temp)
                }
            };
            match (i, factor.reciprocal) {
                (0, false) => steps.push((SetOp::Copy, operand)),
                (0, true) => {
                    steps.push((SetOp::Copy, ValueRef::Constant(1.0)));
                    steps.push((SetOp::Div, operand));
                }
                (_, false) => steps.push((SetOp::Mul, operand)),
                (_, true) => steps.push((SetOp::Div, operand)),
            }
            if factor.negated {
                steps.push((SetOp::Mul, ValueRef::Constant(-1.0)));
            }
        }
        if steps.is_empty() {
            steps.push((SetOp::Copy, ValueRef::Constant(1.0)));
        }
        rules.push(SetRule { target, steps });
        Ok(())
    }

    fn calculate(&mut self, target: &str, terms: &[CalculateTerm]) -> Result<(), CompileError> {
        self.check_new_target(SetScope::Normal, target)?;
        let mut steps = Vec::with_capacity(terms.len());
        for term in terms {
            let operand = self.operand(SetScope::Normal, &term.field)?;
            let operand = match term.multiplier {
                Some(multiplier) => {
                    let temp = self.registry().temporary();
                    self.model.sets.push(SetRule {
                        target: temp,
                        steps: vec![
                            (SetOp::Copy, ValueRef::Constant(multiplier)),
                            (SetOp::Mul, operand),
                        ],
                    });
                    ValueRef::Field(temp)
                }
                None => operand,
            };
            let op = if steps.is_empty() {
                SetOp::Copy
            } else {
                SetOp::Add
            };
            steps.push((op, operand));
        }
        let id = self.registry().add_calculated(target);
        self.model.sets.push(SetRule { target: id, steps });
        Ok(())
    }

    fn recipe_sum(&mut self, sum: f64, fields: &[String]) -> Result<(), CompileError> {
        if sum <= 0.0 {
            return Err(CompileError::InvalidArgument {
                command: "recipe sum".into(),
                message: "the recipe sum must be positive".into(),
            });
        }
        let mut ids = Vec::with_capacity(fields.len());
        for name in fields {
            match self.operand(SetScope::Normal, name)? {
                ValueRef::Field(id) => ids.push(id),
                ValueRef::Constant(_) => {}
            }
        }
        let weight = match ids.as_slice() {
            [] => {
                return Err(CompileError::InvalidArgument {
                    command: "recipe sum".into(),
                    message: "a weight field is needed".into(),
                });
            }
            [single] => *single,
            several => {
                let steps = several
                    .iter()
                    .enumerate()
                    .map(|(i, id)| {
                        let op = if i == 0 { SetOp::Copy } else { SetOp::Add };
                        (op, ValueRef::Field(*id))
                    })
                    .collect();
                let id = self.registry().add_calculated("food weight");
                self.model.sets.push(SetRule { target: id, steps });
                id
            }
        };
        self.model.recipe_sum = Some((sum, weight));
        Ok(())
    }

    /// Splits a leading calculated field off a weight rule's list.
    fn weight_denominator<'l>(&self, items: &'l [ListItem]) -> (Option<FieldId>, &'l [ListItem]) {
        if let Some(ListItem::Field(name)) = items.first() {
            if let Some(id) = self.model.registry.calculated.get(name) {
                return (Some(id), &items[1..]);
            }
        }
        (None, items)
    }

    fn cook(
        &mut self,
        kind: CookKind,
        cook_type: &str,
        field: &str,
        targets: &[ListItem],
    ) -> Result<(), CompileError> {
        if kind == CookKind::Weight && !self.script.contains("recipe sum") {
            return Err(CompileError::IllegalCombination(
                "The weight cook: command requires food weight:".into(),
            ));
        }
        let fraction = self
            .model
            .registry
            .food
            .get(field)
            .ok_or_else(|| unknown(field, "in cook command"))?;
        self.model.registry.check_text(fraction, "as cook fraction")?;
        self.registry().field_mut(fraction).no_calc = true;
        let (denominator, targets) = match kind {
            CookKind::Weight => self.weight_denominator(targets),
            CookKind::Nutrient => (None, targets),
        };
        let targets = self.model.registry.food_list(targets, "in cook command")?;
        let rule = CookRule {
            kind,
            fraction,
            denominator,
            targets,
        };
        match self.model.cook_types.iter_mut().find(|t| t.name == cook_type) {
            Some(existing) => existing.rules.push(rule),
            None => self.model.cook_types.push(CookType {
                name: cook_type.to_string(),
                rules: vec![rule],
            }),
        }
        Ok(())
    }

    fn cook_field(&mut self, field: &str, types: &[String]) -> Result<(), CompileError> {
        let mut indices = Vec::with_capacity(types.len());
        for name in types {
            let index = self
                .model
                .cook_types
                .iter()
                .position(|t| t.name == *name)
                .ok_or_else(|| CompileError::UnknownCookType(name.clone()))?;
            indices.push(index);
        }
        self.model.cook_field = Some((field.to_string(), indices));
        Ok(())
    }

    fn reduce(
        &mut self,
        kind: ReduceKind,
        field: &str,
        items: &[ListItem],
    ) -> Result<(), CompileError> {
        let (denominator, items) = match kind {
            ReduceKind::Nutrient => (None, items),
            _ => self.weight_denominator(items),
        };
        if kind == ReduceKind::Weight && denominator.is_some() && !self.script.contains("recipe sum")
        {
            return Err(CompileError::IllegalCombination(
                "The weight reduce field: command with a calculated field requires food weight:"
                    .into(),
            ));
        }
        let targets = self.model.registry.food_list(items, "in reduce command")?;
        let rule = ReduceRule {
            kind,
            column: field.to_string(),
            denominator,
            targets,
        };
        match kind {
            ReduceKind::RecipeWeight => self.model.recipe_reductions.push(rule),
            _ => self.model.reductions.push(rule),
        }
        Ok(())
    }

    fn transpose(&mut self, field: &str, count: usize, items: &[ListItem]) -> Result<(), CompileError> {
        if !self.model.is_grouped() {
            return Err(CompileError::IllegalCombination(
                "The transpose: command requires group by:".into(),
            ));
        }
        if count == 0 {
            return Err(CompileError::InvalidArgument {
                command: "transpose".into(),
                message: "the number of groups must be at least 1".into(),
            });
        }
        let registry = &self.model.registry;
        let pivot = registry
            .food
            .get(field)
            .ok_or_else(|| unknown(field, "in transpose"))?;
        registry.check_text(pivot, "as transpose field")?;
        let mut sources = Vec::new();
        for item in items {
            match item {
                ListItem::Field(name) => sources.push(
                    registry
                        .food
                        .get(name)
                        .or_else(|| registry.calculated.get(name))
                        .ok_or_else(|| unknown(name, "in transpose"))?,
                ),
                ListItem::Range(..) => {
                    sources.extend(registry.food_list(std::slice::from_ref(item), "in transpose")?)
                }
            }
        }
        self.registry().field_mut(pivot).no_calc = true;
        let mut generated = Vec::with_capacity(sources.len());
        for source in &sources {
            let base = self.model.registry.name(*source).to_string();
            for k in 1..=count {
                let name = if count <= 9 {
                    format!("{}{}", base, k)
                } else {
                    format!("{}{:02}", base, k)
                };
                let id = self.registry().transposed(&name);
                if k == 1 {
                    generated.push(id);
                }
            }
        }
        self.model.transposes.push(TransposeRule {
            pivot,
            groups: count,
            sources,
            generated,
        });
        Ok(())
    }

    fn tests(&mut self) -> Result<(), CompileError> {
        let script = self.script;
        let mut includes = Vec::new();
        let mut excludes = Vec::new();
        for command in script.iter() {
            if let Command::If {
                negated,
                field,
                values,
            } = command
            {
                let id = self
                    .model
                    .registry
                    .food
                    .get(field)
                    .ok_or_else(|| unknown(field, "in if command"))?;
                self.model.registry.check_text(id, "in if command")?;
                self.registry().field_mut(id).no_calc = true;
                let operand = Operand::Field(field.clone());
                if *negated {
                    excludes.push((operand, values.clone()));
                } else {
                    includes.push((operand, values.clone()));
                }
            }
        }
        let predicate = script.iter().find_map(|c| match c {
            Command::Where(predicate) => Some(predicate),
            _ => None,
        });
        if predicate.is_none() && includes.is_empty() && excludes.is_empty() {
            return Ok(());
        }

        let registry = &self.model.registry;
        let mut resolve = |operand: &Operand| -> Result<ValueRef, CompileError> {
            match operand {
                Operand::Constant(v) => Ok(ValueRef::Constant(*v)),
                Operand::Field(name) => {
                    let id = registry
                        .food
                        .get(name)
                        .or_else(|| registry.calculated.get(name))
                        .ok_or_else(|| unknown(name, "in where"))?;
                    registry.check_text(id, "in where")?;
                    Ok(ValueRef::Field(id))
                }
            }
        };
        let mut builder = DecisionBuilder::new(&mut resolve);
        if let Some(predicate) = predicate {
            builder.predicate(predicate)?;
        }
        if !includes.is_empty() {
            builder.include(&includes)?;
        }
        for (field, values) in &excludes {
            builder.exclude(field, values)?;
        }
        let mut tests = builder.finish();

        let no_calc = |value: &ValueRef| match value {
            ValueRef::Field(id) => registry.field(*id).no_calc,
            ValueRef::Constant(_) => false,
        };
        for test in &mut tests {
            if matches!(test.left, ValueRef::Constant(_)) && no_calc(&test.right) {
                std::mem::swap(&mut test.left, &mut test.right);
                test.op = test.op.swap();
            }
        }
        let simple = tests
            .iter()
            .all(|t| no_calc(&t.left) && matches!(t.right, ValueRef::Constant(_)));
        self.model.simple_tests = simple;
        self.model.tests = tests;
        Ok(())
    }
}
