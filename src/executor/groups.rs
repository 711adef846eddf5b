use super::ObservationSink;
use crate::error::{Diagnostics, FatalError};
use crate::plan::{ExecutionPlan, Move, SetOp, SetStep, Transpose};
use ahash::AHashMap;

/// Accumulates observations into groups.
///
/// Input keys split the stream into runs of equal key values, which requires
/// the input to be sorted on them. Food keys pick a bucket per distinct key
/// combination within the current run; buckets are recycled through a free
/// list once their run is flushed.
pub struct GroupEngine {
    width: usize,
    input_keys: Vec<Move>,
    food_keys: Vec<usize>,
    /// Slots summed into a group.
    add: Vec<usize>,
    transposes: Vec<Transpose>,
    group_sets: Vec<SetStep>,
    /// Input key values of the current run, `None` before the first line.
    current: Option<Vec<f64>>,
    single: Vec<f64>,
    buckets: Vec<Vec<f64>>,
    index: AHashMap<Vec<i64>, usize>,
    /// Buckets of the current run in order of first appearance.
    live: Vec<usize>,
    free: Vec<usize>,
    key: Vec<i64>,
}

impl GroupEngine {
    pub fn new(plan: &ExecutionPlan) -> Self {
        let core = &plan.core;
        let stream = &plan.stream;
        let mut add: Vec<usize> = core.nutrients.iter().map(|mv| mv.to).collect();
        add.extend(
            core.sets
                .iter()
                .filter(|step| step.op == SetOp::Copy)
                .map(|step| step.target),
        );
        Self {
            width: core.width,
            input_keys: stream.input_groups.clone(),
            food_keys: stream.food_groups.clone(),
            add,
            transposes: stream.transposes.clone(),
            group_sets: core.group_sets.clone(),
            current: None,
            single: vec![0.0; core.width],
            buckets: Vec::new(),
            index: AHashMap::new(),
            live: Vec::new(),
            free: Vec::new(),
            key: Vec::with_capacity(stream.food_groups.len()),
        }
    }

    /// Checks the input keys of a new line and flushes the current run when
    /// they change.
    pub fn begin_line(
        &mut self,
        line: &[f64],
        file: &str,
        line_no: usize,
        sink: &mut dyn ObservationSink,
        diag: &mut Diagnostics,
    ) -> Result<(), FatalError> {
        if self.input_keys.is_empty() {
            return Ok(());
        }
        match &self.current {
            None => {}
            Some(current) => {
                let mut changed = false;
                for (mv, value) in self.input_keys.iter().zip(current) {
                    let new = line[mv.from];
                    if new != *value {
                        if new < *value {
                            return Err(FatalError::Unsorted {
                                file: file.to_string(),
                                line: line_no,
                            });
                        }
                        changed = true;
                        break;
                    }
                }
                if !changed {
                    return Ok(());
                }
                self.flush(sink, diag)?;
            }
        }
        let values: Vec<f64> = self.input_keys.iter().map(|mv| line[mv.from]).collect();
        if self.food_keys.is_empty() {
            self.single.iter_mut().for_each(|v| *v = 0.0);
            for (mv, value) in self.input_keys.iter().zip(&values) {
                self.single[mv.to] = *value;
            }
        }
        self.current = Some(values);
        Ok(())
    }

    /// Adds an accepted observation to its group.
    pub fn accumulate(&mut self, obs: &[f64], row: &[f64]) {
        let target = if self.food_keys.is_empty() {
            &mut self.single
        } else {
            let slot = self.bucket(obs);
            &mut self.buckets[slot]
        };
        for slot in &self.add {
            target[*slot] += obs[*slot];
        }
        for transpose in &self.transposes {
            let group = row[transpose.pivot] as i64;
            if group < 1 || group as usize > transpose.groups {
                continue;
            }
            let mut position = transpose.base + group as usize - 1;
            for source in &transpose.sources {
                target[position] += obs[*source];
                position += transpose.groups;
            }
        }
    }

    /// Finds or creates the bucket for the food keys of `obs`.
    fn bucket(&mut self, obs: &[f64]) -> usize {
        self.key.clear();
        self.key.extend(self.food_keys.iter().map(|slot| obs[*slot] as i64));
        if let Some(index) = self.index.get(&self.key) {
            return *index;
        }
        let index = match self.free.pop() {
            Some(index) => {
                self.buckets[index].iter_mut().for_each(|v| *v = 0.0);
                index
            }
            None => {
                self.buckets.push(vec![0.0; self.width]);
                self.buckets.len() - 1
            }
        };
        let bucket = &mut self.buckets[index];
        for slot in &self.food_keys {
            bucket[*slot] = obs[*slot];
        }
        if let Some(current) = &self.current {
            for (mv, value) in self.input_keys.iter().zip(current) {
                bucket[mv.to] = *value;
            }
        }
        self.index.insert(self.key.clone(), index);
        self.live.push(index);
        index
    }

    /// Emits every group of the current run.
    pub fn flush(&mut self, sink: &mut dyn ObservationSink, diag: &mut Diagnostics) -> Result<(), FatalError> {
        if self.food_keys.is_empty() {
            for step in &self.group_sets {
                step.apply(&mut self.single);
            }
            return sink.emit(&self.single, diag);
        }
        for index in self.live.drain(..) {
            let bucket = &mut self.buckets[index];
            for step in &self.group_sets {
                step.apply(bucket);
            }
            sink.emit(bucket, diag)?;
            self.free.push(index);
        }
        self.index.clear();
        Ok(())
    }
}

#[cfg(test)]
mod group_tests {
    use super::*;
    use crate::plan::{CorePlan, Operand, StreamPlan, TestChain};

    struct Collect(Vec<Vec<f64>>);

    impl ObservationSink for Collect {
        fn emit(&mut self, obs: &[f64], _diag: &mut Diagnostics) -> Result<(), FatalError> {
            self.0.push(obs.to_vec());
            Ok(())
        }

        fn finish(
            &mut self,
            _table: &mut crate::data::FoodTable,
            _diag: &mut Diagnostics,
        ) -> Result<(), FatalError> {
            Ok(())
        }
    }

    /// slots: 0 input key, 1 food key, 2 nutrient, 3 ratio
    fn plan(input_key: bool) -> ExecutionPlan {
        ExecutionPlan {
            core: CorePlan {
                width: 4,
                real_width: 4,
                nutrients: vec![Move { from: 0, to: 2 }],
                group_sets: vec![SetStep {
                    target: 3,
                    op: SetOp::Copy,
                    operand: Operand::Slot(2),
                }],
                ..CorePlan::default()
            },
            stream: StreamPlan {
                columns: 3,
                text: vec![false; 3],
                moves: Vec::new(),
                food: 1,
                amount: 2,
                scale: 1.0,
                non_edible: None,
                cook: None,
                reductions: Vec::new(),
                recalc_weights: false,
                input_groups: if input_key {
                    vec![Move { from: 0, to: 0 }]
                } else {
                    Vec::new()
                },
                food_groups: vec![1],
                tests: TestChain::None,
                transposes: Vec::new(),
                blip: 0,
            },
        }
    }

    #[test]
    fn test_food_buckets_in_first_appearance_order() {
        let mut engine = GroupEngine::new(&plan(false));
        let mut sink = Collect(Vec::new());
        let mut diag = Diagnostics::new();
        for (key, value) in [(7.0, 1.0), (3.0, 2.0), (7.0, 4.0)] {
            engine.accumulate(&[0.0, key, value, 0.0], &[]);
        }
        engine.flush(&mut sink, &mut diag).unwrap();
        assert_eq!(sink.0, vec![vec![0.0, 7.0, 5.0, 5.0], vec![0.0, 3.0, 2.0, 2.0]]);
    }

    #[test]
    fn test_decreasing_input_key_is_fatal() {
        let mut engine = GroupEngine::new(&plan(true));
        let mut sink = Collect(Vec::new());
        let mut diag = Diagnostics::new();
        engine
            .begin_line(&[2.0, 1.0, 1.0], "input.txt", 2, &mut sink, &mut diag)
            .unwrap();
        engine.accumulate(&[2.0, 1.0, 3.0, 0.0], &[]);
        let result = engine.begin_line(&[1.0, 1.0, 1.0], "input.txt", 3, &mut sink, &mut diag);
        assert!(matches!(result, Err(FatalError::Unsorted { line: 3, .. })));
        assert!(sink.0.is_empty());
    }
}
