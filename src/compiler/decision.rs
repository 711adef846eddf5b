//! Compiles predicate trees into a flat decision list by backpatching.
//!
//! Each relation becomes one test that either jumps or falls through to the
//! next test. While a subtree is emitted, tests whose jump target is not known
//! yet are collected in an on-true or an on-false list. A list is patched to a
//! concrete index as soon as that index is known; the lists left over at the
//! end are patched to the two terminal positions, accept (`n`) and reject
//! (`n + 1`).

use super::model::{TestRule, ValueRef};
use crate::ast::{Operand, Predicate, RelOp, Relation};
use crate::error::CompileError;

const UNPATCHED: usize = usize::MAX;

pub struct DecisionBuilder<'r> {
    tests: Vec<TestRule>,
    resolve: &'r mut dyn FnMut(&Operand) -> Result<ValueRef, CompileError>,
    on_false: Vec<usize>,
}

impl<'r> DecisionBuilder<'r> {
    pub fn new(resolve: &'r mut dyn FnMut(&Operand) -> Result<ValueRef, CompileError>) -> Self {
        Self {
            tests: Vec::new(),
            resolve,
            on_false: Vec::new(),
        }
    }

    fn push(&mut self, relation: &Relation) -> Result<usize, CompileError> {
        let left = (self.resolve)(&relation.left)?;
        let right = (self.resolve)(&relation.right)?;
        self.tests.push(TestRule {
            op: relation.op,
            left,
            right,
            on_true: UNPATCHED,
        });
        Ok(self.tests.len() - 1)
    }

    fn patch(&mut self, list: Vec<usize>, target: usize) {
        for index in list {
            self.tests[index].on_true = target;
        }
    }

    /// Emits a `where` predicate. Falling off its end means the food passes.
    pub fn predicate(&mut self, predicate: &Predicate) -> Result<(), CompileError> {
        let mut on_true = Vec::new();
        let mut on_false = Vec::new();
        match predicate {
            Predicate::Any(items) => self.any(items, true, &mut on_true, &mut on_false)?,
            Predicate::All(items) => self.all(items, true, &mut on_true, &mut on_false)?,
            Predicate::Relation(_) => {
                self.all(std::slice::from_ref(predicate), true, &mut on_true, &mut on_false)?
            }
        }
        let next = self.tests.len();
        self.patch(on_true, next);
        self.on_false.extend(on_false);
        Ok(())
    }

    fn any(
        &mut self,
        items: &[Predicate],
        fallthrough_true: bool,
        on_true: &mut Vec<usize>,
        on_false: &mut Vec<usize>,
    ) -> Result<(), CompileError> {
        let items = flatten(items, true);
        for (i, item) in items.iter().enumerate() {
            let last = i + 1 == items.len();
            match item {
                Predicate::Relation(relation) if last && fallthrough_true => {
                    let index = self.push(&relation.negated())?;
                    on_false.push(index);
                }
                Predicate::Relation(relation) => {
                    let index = self.push(relation)?;
                    on_true.push(index);
                }
                Predicate::All(children) if last => {
                    self.all(children, fallthrough_true, on_true, on_false)?
                }
                Predicate::All(children) => {
                    let mut local_false = Vec::new();
                    self.all(children, false, on_true, &mut local_false)?;
                    let next = self.tests.len();
                    self.patch(local_false, next);
                }
                // Flattened into `items` above.
                Predicate::Any(_) => {}
            }
        }
        Ok(())
    }

    fn all(
        &mut self,
        items: &[Predicate],
        fallthrough_true: bool,
        on_true: &mut Vec<usize>,
        on_false: &mut Vec<usize>,
    ) -> Result<(), CompileError> {
        let items = flatten(items, false);
        for (i, item) in items.iter().enumerate() {
            let last = i + 1 == items.len();
            match item {
                Predicate::Relation(relation) if last && !fallthrough_true => {
                    let index = self.push(relation)?;
                    on_true.push(index);
                }
                Predicate::Relation(relation) => {
                    let index = self.push(&relation.negated())?;
                    on_false.push(index);
                }
                Predicate::Any(children) if last => {
                    self.any(children, fallthrough_true, on_true, on_false)?
                }
                Predicate::Any(children) => {
                    let mut local_true = Vec::new();
                    self.any(children, true, &mut local_true, on_false)?;
                    let next = self.tests.len();
                    self.patch(local_true, next);
                }
                Predicate::All(_) => {}
            }
        }
        Ok(())
    }

    /// Emits the `if` commands: the food passes when the field equals any of
    /// the values of any command.
    pub fn include(&mut self, fields: &[(Operand, Vec<f64>)]) -> Result<(), CompileError> {
        let mut on_true = Vec::new();
        let total: usize = fields.iter().map(|(_, values)| values.len()).sum();
        let mut emitted = 0;
        for (field, values) in fields {
            for value in values {
                emitted += 1;
                let equal = Relation::new(RelOp::Eq, field.clone(), Operand::Constant(*value));
                if emitted == total {
                    let index = self.push(&equal.negated())?;
                    self.on_false.push(index);
                } else {
                    let index = self.push(&equal)?;
                    on_true.push(index);
                }
            }
        }
        let next = self.tests.len();
        self.patch(on_true, next);
        Ok(())
    }

    /// Emits an `if not` command: the food is rejected when the field equals
    /// any of the values.
    pub fn exclude(&mut self, field: &Operand, values: &[f64]) -> Result<(), CompileError> {
        for value in values {
            let equal = Relation::new(RelOp::Eq, field.clone(), Operand::Constant(*value));
            let index = self.push(&equal)?;
            self.on_false.push(index);
        }
        Ok(())
    }

    /// Patches the pending failures to the reject position and returns the chain.
    pub fn finish(mut self) -> Vec<TestRule> {
        let reject = self.tests.len() + 1;
        let on_false = std::mem::take(&mut self.on_false);
        self.patch(on_false, reject);
        self.tests
    }
}

/// Lifts nested lists of the same connective into their parent.
fn flatten(items: &[Predicate], alternatives: bool) -> Vec<&Predicate> {
    let mut flat = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Predicate::Any(children) if alternatives => flat.extend(flatten(children, true)),
            Predicate::All(children) if !alternatives => flat.extend(flatten(children, false)),
            other => flat.push(other),
        }
    }
    flat
}

#[cfg(test)]
mod decision_tests {
    use super::*;
    use crate::compiler::parsing::parse_predicate;
    use crate::plan::{Operand as SlotOperand, SlotTest, TestChain};
    use crate::compiler::registry::FieldId;

    fn chain(text: &str, names: &[&str]) -> TestChain {
        let predicate = parse_predicate(text).unwrap();
        let mut resolve = |operand: &Operand| -> Result<ValueRef, CompileError> {
            Ok(match operand {
                Operand::Constant(v) => ValueRef::Constant(*v),
                Operand::Field(name) => ValueRef::Field(FieldId(
                    names.iter().position(|n| n == name).unwrap(),
                )),
            })
        };
        let mut builder = DecisionBuilder::new(&mut resolve);
        builder.predicate(&predicate).unwrap();
        let slot = |v: ValueRef| match v {
            ValueRef::Constant(c) => SlotOperand::Constant(c),
            ValueRef::Field(id) => SlotOperand::Slot(id.0),
        };
        TestChain::Output(
            builder
                .finish()
                .into_iter()
                .map(|t| SlotTest {
                    op: t.op,
                    left: slot(t.left),
                    right: slot(t.right),
                    on_true: t.on_true,
                })
                .collect(),
        )
    }

    #[test]
    fn test_or_of_ands() {
        let chain = chain("a = 1 and b = 2 or c > 3", &["a", "b", "c"]);
        assert!(chain.accepts_output(&[1.0, 2.0, 0.0]));
        assert!(chain.accepts_output(&[0.0, 0.0, 4.0]));
        assert!(!chain.accepts_output(&[1.0, 0.0, 0.0]));
    }

    #[test]
    fn test_and_of_ors() {
        let chain = chain("(a = 1 or b = 1) and (c = 1 or c = 2)", &["a", "b", "c"]);
        assert!(chain.accepts_output(&[0.0, 1.0, 2.0]));
        assert!(!chain.accepts_output(&[0.0, 1.0, 3.0]));
        assert!(!chain.accepts_output(&[0.0, 0.0, 1.0]));
    }
}
