use super::{FoodEntry, FoodTable};
use crate::error::{DataError, Diagnostics, FoodCalcError};
use crate::io::{SourceProvider, next_valid};
use crate::plan::{FoodsLoad, GroupsLoad, LoadPlan};
use ahash::AHashMap;
use tracing::info;

/// Group rows of one groups file, keyed by the group id values. `None`
/// marks a key used by some food but missing from the file.
type GroupRows = AHashMap<Vec<i64>, Option<Vec<f64>>>;

/// Builds the food table from the foods and groups files of a [`LoadPlan`].
pub struct TableLoader<'a> {
    provider: &'a dyn SourceProvider,
}

impl<'a> TableLoader<'a> {
    pub fn new(provider: &'a dyn SourceProvider) -> Self {
        Self { provider }
    }

    /// Reads every groups file, then every foods file, then copies the group
    /// values into each food.
    pub fn load(&self, plan: &LoadPlan, diag: &mut Diagnostics) -> Result<FoodTable, FoodCalcError> {
        let mut groups = Vec::with_capacity(plan.groups.len());
        for load in &plan.groups {
            groups.push(self.read_groups(load, diag)?);
        }

        let mut table = FoodTable::new(plan.width, plan.fields.clone());
        for load in &plan.foods {
            self.read_foods(load, &mut table, diag)?;
        }

        for (load, mut rows) in plan.groups.iter().zip(groups) {
            expand_groups(&mut table, load, &mut rows, diag)?;
        }
        Ok(table)
    }

    fn read_groups(&self, load: &GroupsLoad, diag: &mut Diagnostics) -> Result<GroupRows, FoodCalcError> {
        let mut source = self.provider.open_source(&load.source)?;
        source.set_text_columns(&load.text);
        let mut record = vec![0.0; load.text.len()];
        let mut rows = GroupRows::new();
        'records: while next_valid(source.as_mut(), &mut record, diag)? {
            let mut key = Vec::with_capacity(load.key_columns.len());
            for column in &load.key_columns {
                let value = record[*column];
                if value as i64 <= 0 {
                    diag.record(DataError::BadGroupId {
                        value,
                        line: source.line(),
                        file: load.source.file.clone(),
                    })?;
                    continue 'records;
                }
                key.push(value as i64);
            }
            if rows.contains_key(&key) {
                diag.record(DataError::DuplicateGroup {
                    line: source.line(),
                    file: load.source.file.clone(),
                })?;
                continue;
            }
            let values = load.moves.iter().map(|mv| record[mv.from]).collect();
            rows.insert(key, Some(values));
        }
        info!("Read groups file {}. Groups: {}", load.source.file, rows.len());
        Ok(rows)
    }

    fn read_foods(
        &self,
        load: &FoodsLoad,
        table: &mut FoodTable,
        diag: &mut Diagnostics,
    ) -> Result<(), FoodCalcError> {
        let mut source = self.provider.open_source(&load.source)?;
        source.set_text_columns(&load.text);
        let mut record = vec![0.0; load.text.len()];
        let mut count = 0usize;
        while next_valid(source.as_mut(), &mut record, diag)? {
            let value = record[load.id_column];
            let id = value as i64;
            if id <= 0 {
                diag.record(DataError::BadFoodId {
                    value,
                    line: source.line(),
                    file: load.source.file.clone(),
                })?;
                continue;
            }
            if !table.contains(id) {
                table.insert(id, FoodEntry::Food(vec![0.0; table.width]));
            }
            if let Some(FoodEntry::Food(row)) = table.get_mut(id) {
                for mv in &load.moves {
                    row[mv.to] = record[mv.from];
                }
            }
            count += 1;
        }
        info!("Read foods file {}. Foods: {}", load.source.file, count);
        Ok(())
    }
}

fn expand_groups(
    table: &mut FoodTable,
    load: &GroupsLoad,
    rows: &mut GroupRows,
    diag: &mut Diagnostics,
) -> Result<(), FoodCalcError> {
    for (id, row) in table.foods_mut() {
        let key: Vec<i64> = load.key_table.iter().map(|c| row[*c] as i64).collect();
        if let Some(bad) = key.iter().find(|k| **k < 0) {
            diag.record(DataError::InvalidGroupKey {
                key: *bad,
                food: id,
                file: load.source.file.clone(),
            })?;
            continue;
        }
        if key.contains(&0) {
            continue;
        }
        match rows.get(&key) {
            Some(Some(values)) => {
                for (mv, value) in load.moves.iter().zip(values) {
                    row[mv.to] = *value;
                }
            }
            Some(None) => {}
            None => {
                diag.warn(format!(
                    "Group id used by food {} is not found in groups file {}",
                    id, load.source.file
                ));
                rows.insert(key, None);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod loader_tests {
    use super::*;
    use crate::io::{MemoryProvider, SourceSpec};
    use crate::plan::Move;
    use crate::script::Dialect;

    fn plan() -> LoadPlan {
        LoadPlan {
            width: 3,
            fields: vec!["foodid".into(), "grp".into(), "water".into()],
            foods: vec![FoodsLoad {
                source: SourceSpec::text("foods.txt", Dialect::default()),
                text: vec![false, false],
                id_column: 0,
                moves: vec![Move { from: 0, to: 0 }, Move { from: 1, to: 1 }],
            }],
            groups: vec![GroupsLoad {
                source: SourceSpec::text("groups.txt", Dialect::default()),
                text: vec![false, false],
                key_columns: vec![0],
                key_table: vec![1],
                moves: vec![Move { from: 1, to: 2 }],
            }],
        }
    }

    #[test]
    fn test_groups_expand_into_foods() {
        let provider = MemoryProvider::new()
            .with_file("foods.txt", "foodid,grp\n1,5\n2,6\n3,0\n-4,5\n")
            .with_file("groups.txt", "grp,water\n5,80\n5,81\n");
        let mut diag = Diagnostics::new();
        let table = TableLoader::new(&provider).load(&plan(), &mut diag).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1).unwrap().rows()[0], vec![1.0, 5.0, 80.0]);
        assert_eq!(table.get(2).unwrap().rows()[0], vec![2.0, 6.0, 0.0]);
        // bad food id and duplicate group
        assert_eq!(diag.error_count(), 2);
        assert_eq!(diag.warnings().len(), 1);
    }
}
