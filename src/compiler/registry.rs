use crate::error::CompileError;
use crate::script::ListItem;
use ahash::AHashMap;

/// Index of a field in the [`FieldRegistry`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrigin {
    /// A column of a foods or groups file, or the target of a `recipe set`.
    Food,
    /// A column of the input file.
    Input { column: usize },
    /// The target of `set` or `calculate`.
    Calculated,
    /// An intermediate value of a nested expression or a multiplied term.
    Temporary,
    GroupSet,
    /// A recipe file column referenced by a `recipe set` expression.
    RecipePlaceholder,
    /// A column of recipe file `file`.
    RecipeColumn { file: usize, column: usize },
    Transposed,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub origin: FieldOrigin,
    /// Position in the observation vector.
    pub output: Option<usize>,
    /// Column in the food table.
    pub source: Option<usize>,
    /// Copied verbatim and never accumulated.
    pub no_calc: bool,
    /// Ordinal among the `group by` keys.
    pub group_order: Option<usize>,
    /// Only needed while folding ingredients into recipes.
    pub recipe_only: bool,
    pub is_text: bool,
    /// A recipe file column copied onto the food field of the same name.
    pub copy_from_recipe: bool,
}

impl Field {
    fn new(name: &str, origin: FieldOrigin) -> Self {
        Self {
            name: name.to_string(),
            origin,
            output: None,
            source: None,
            no_calc: false,
            group_order: None,
            recipe_only: false,
            is_text: false,
            copy_from_recipe: false,
        }
    }

    /// Whether the field is computed in the given mode.
    pub fn in_mode(&self, recipe: bool) -> bool {
        self.output.is_some() && (recipe || !self.recipe_only)
    }
}

/// A name lookup table that remembers declaration order.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    by_name: AHashMap<String, FieldId>,
    order: Vec<FieldId>,
}

impl Scope {
    pub fn get(&self, name: &str) -> Option<FieldId> {
        self.by_name.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn order(&self) -> &[FieldId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn insert(&mut self, name: &str, id: FieldId) {
        self.by_name.insert(name.to_string(), id);
        self.order.push(id);
    }

    /// The fields from `from` to `to` inclusive in declaration order.
    pub fn range(&self, from: &str, to: &str) -> Option<&[FieldId]> {
        let first = self.get(from)?;
        let last = self.get(to)?;
        let start = self.order.iter().position(|id| *id == first)?;
        let end = self.order.iter().position(|id| *id == last)?;
        (start <= end).then(|| &self.order[start..=end])
    }
}

/// Owns every field of a script and the namespaces they live in.
///
/// Fields are created while commands are resolved and keep their identity
/// through output placement and table placement; later stages refer to them
/// by [`FieldId`] only.
#[derive(Debug, Default)]
pub struct FieldRegistry {
    fields: Vec<Field>,
    pub food: Scope,
    pub input: Scope,
    pub calculated: Scope,
    pub group_set: Scope,
    pub placeholders: Scope,
    pub recipe_files: Vec<Scope>,
    outputs: Vec<FieldId>,
    real_outputs: usize,
    table: Vec<FieldId>,
    temporaries: usize,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut Field {
        &mut self.fields[id.0]
    }

    pub fn name(&self, id: FieldId) -> &str {
        &self.fields[id.0].name
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn push(&mut self, name: &str, origin: FieldOrigin) -> FieldId {
        let id = FieldId(self.fields.len());
        self.fields.push(Field::new(name, origin));
        id
    }

    /// Returns the food field `name`, creating it at the end of the food order.
    pub fn food_field(&mut self, name: &str) -> FieldId {
        if let Some(id) = self.food.get(name) {
            return id;
        }
        let id = self.push(name, FieldOrigin::Food);
        self.food.insert(name, id);
        id
    }

    pub fn add_input(&mut self, name: &str, column: usize) -> Result<FieldId, CompileError> {
        if self.input.contains(name) {
            return Err(CompileError::DuplicateField {
                name: name.to_string(),
                context: "in input fields".to_string(),
            });
        }
        let id = self.push(name, FieldOrigin::Input { column });
        self.fields[id.0].no_calc = true;
        self.input.insert(name, id);
        Ok(id)
    }

    pub fn add_calculated(&mut self, name: &str) -> FieldId {
        let id = self.reserve(name, FieldOrigin::Calculated);
        self.publish(id);
        id
    }

    /// Creates a field that cannot be looked up until [`publish`](Self::publish)
    /// is called, so an expression cannot refer to its own target.
    pub fn reserve(&mut self, name: &str, origin: FieldOrigin) -> FieldId {
        self.push(name, origin)
    }

    /// Makes a reserved calculated or group-set field visible by name.
    pub fn publish(&mut self, id: FieldId) {
        let name = self.fields[id.0].name.clone();
        match self.fields[id.0].origin {
            FieldOrigin::Calculated => self.calculated.insert(&name, id),
            FieldOrigin::GroupSet => self.group_set.insert(&name, id),
            _ => {}
        }
    }

    pub fn placeholder(&mut self, name: &str) -> FieldId {
        if let Some(id) = self.placeholders.get(name) {
            return id;
        }
        let id = self.push(name, FieldOrigin::RecipePlaceholder);
        self.placeholders.insert(name, id);
        id
    }

    /// Opens a new namespace for the columns of a recipe file.
    pub fn add_recipe_file(&mut self) -> usize {
        self.recipe_files.push(Scope::default());
        self.recipe_files.len() - 1
    }

    pub fn add_recipe_column(&mut self, file: usize, name: &str) -> Result<FieldId, CompileError> {
        if self.recipe_files[file].contains(name) {
            return Err(CompileError::DuplicateField {
                name: name.to_string(),
                context: "in recipes file".to_string(),
            });
        }
        let column = self.recipe_files[file].len();
        let id = self.push(name, FieldOrigin::RecipeColumn { file, column });
        self.recipe_files[file].insert(name, id);
        Ok(id)
    }

    pub fn temporary(&mut self) -> FieldId {
        self.temporaries += 1;
        let name = format!("temp{}", self.temporaries);
        self.push(&name, FieldOrigin::Temporary)
    }

    pub fn transposed(&mut self, name: &str) -> FieldId {
        self.push(name, FieldOrigin::Transposed)
    }

    /// Expands a field list over the food namespace.
    pub fn food_list(&self, items: &[ListItem], context: &str) -> Result<Vec<FieldId>, CompileError> {
        let mut ids = Vec::new();
        for item in items {
            match item {
                ListItem::Field(name) => {
                    ids.push(self.food.get(name).ok_or_else(|| CompileError::UnknownField {
                        name: name.clone(),
                        context: context.to_string(),
                    })?)
                }
                ListItem::Range(from, to) => {
                    let range = self.food.range(from, to).ok_or_else(|| {
                        CompileError::UnknownField {
                            name: format!("{}--{}", from, to),
                            context: context.to_string(),
                        }
                    })?;
                    ids.extend_from_slice(range);
                }
            }
        }
        Ok(ids)
    }

    /// Gives `id` the next output position without any checks. Returns
    /// whether a position was assigned.
    pub fn place_output(&mut self, id: FieldId, recipe_only: bool) -> bool {
        if self.fields[id.0].output.is_some() {
            return false;
        }
        let slot = self.outputs.len();
        self.outputs.push(id);
        let field = &mut self.fields[id.0];
        field.output = Some(slot);
        field.recipe_only = recipe_only;
        true
    }

    /// Places a field named by the output list.
    pub fn place_listed_output(&mut self, id: FieldId, grouping: bool) -> Result<(), CompileError> {
        let field = &self.fields[id.0];
        if field.output.is_some() {
            return Err(CompileError::OutputListedTwice(field.name.clone()));
        }
        if field.is_text {
            return Err(CompileError::OutputText(field.name.clone()));
        }
        if grouping && field.no_calc && field.group_order.is_none() {
            return Err(CompileError::OutputNoCalc(field.name.clone()));
        }
        self.place_output(id, false);
        Ok(())
    }

    /// Makes sure `id` is computed. A field already placed for recipes only
    /// is promoted when it is now needed outside recipes as well.
    pub fn require_output(&mut self, id: FieldId, recipe_only: bool) {
        if !self.place_output(id, recipe_only) && !recipe_only {
            self.fields[id.0].recipe_only = false;
        }
    }

    /// Gives `id` the next food table column if it has none.
    pub fn place_source(&mut self, id: FieldId) {
        if self.fields[id.0].source.is_none() {
            self.fields[id.0].source = Some(self.table.len());
            self.table.push(id);
        }
    }

    pub fn mark_real_outputs(&mut self) {
        self.real_outputs = self.outputs.len();
    }

    pub fn outputs(&self) -> &[FieldId] {
        &self.outputs
    }

    /// Outputs written to the output file, before the helper positions.
    pub fn real_output_count(&self) -> usize {
        self.real_outputs
    }

    pub fn table(&self) -> &[FieldId] {
        &self.table
    }

    pub fn output_slot(&self, id: FieldId) -> Result<usize, CompileError> {
        self.fields[id.0]
            .output
            .ok_or_else(|| CompileError::Unplaced(self.fields[id.0].name.clone()))
    }

    pub fn source_column(&self, id: FieldId) -> Result<usize, CompileError> {
        self.fields[id.0]
            .source
            .ok_or_else(|| CompileError::Unplaced(self.fields[id.0].name.clone()))
    }

    /// Fails when a field that is about to be modified is a no-calc field.
    pub fn check_no_calc(&self, id: FieldId, usage: &str) -> Result<(), CompileError> {
        let field = &self.fields[id.0];
        if field.no_calc {
            return Err(CompileError::NoCalcTarget {
                name: field.name.clone(),
                usage: usage.to_string(),
            });
        }
        Ok(())
    }

    /// Fails when a field that must hold numbers is a text field.
    pub fn check_text(&self, id: FieldId, usage: &str) -> Result<(), CompileError> {
        let field = &self.fields[id.0];
        if field.is_text {
            return Err(CompileError::TextField {
                name: field.name.clone(),
                usage: usage.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn test_range_follows_declaration_order() {
        let mut registry = FieldRegistry::new();
        for name in ["id", "energy", "fat", "water"] {
            registry.food_field(name);
        }
        let names: Vec<_> = registry
            .food
            .range("energy", "water")
            .unwrap()
            .iter()
            .map(|id| registry.name(*id).to_string())
            .collect();
        assert_eq!(names, ["energy", "fat", "water"]);
        assert!(registry.food.range("water", "energy").is_none());
    }

    #[test]
    fn test_require_output_promotes_recipe_only() {
        let mut registry = FieldRegistry::new();
        let fat = registry.food_field("fat");
        registry.require_output(fat, true);
        assert!(registry.field(fat).recipe_only);
        registry.require_output(fat, false);
        assert!(!registry.field(fat).recipe_only);
        assert_eq!(registry.outputs().len(), 1);
    }
}
