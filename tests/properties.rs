//! Property tests
//!
//! Randomized checks of the optimizer, the decision list compiler, slot
//! placement and grouping.
//!
mod common;
use common::*;
use foodcalc::ast::{Operand, Predicate};
use foodcalc::compiler::DecisionBuilder;
use foodcalc::compiler::FieldId;
use foodcalc::compiler::model::ValueRef;
use foodcalc::compiler::parsing::{parse_expression, parse_predicate};
use foodcalc::error::CompileError;
use foodcalc::plan::{Operand as SlotOperand, SlotTest, TestChain};
use foodcalc::prelude::*;
use proptest::prelude::*;

const NAMES: [&str; 3] = ["a", "b", "c"];

fn relation() -> impl Strategy<Value = String> {
    (
        prop::sample::select(NAMES.to_vec()),
        prop::sample::select(vec!["=", "<>", "<", "<=", ">", ">="]),
        0..5i32,
    )
        .prop_map(|(field, op, value)| format!("{} {} {}", field, op, value))
}

fn predicate_text() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        4 => relation(),
        1 => (prop::sample::select(NAMES.to_vec()), prop::collection::vec(0..5i32, 1..4)).prop_map(
            |(field, values)| {
                let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                format!("{} in ({})", field, values.join(", "))
            }
        ),
    ];
    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(l, r)| format!("({}) and ({})", l, r)),
            (inner.clone(), inner.clone()).prop_map(|(l, r)| format!("({}) or ({})", l, r)),
            inner.prop_map(|p| format!("not ({})", p)),
        ]
    })
}

fn expression_text() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        3 => prop::sample::select(NAMES.to_vec()).prop_map(String::from),
        1 => (0..5i32).prop_map(|v| v.to_string()),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), prop::sample::select(vec!["+", "-", "*", "/"]), inner.clone())
                .prop_map(|(l, op, r)| format!("({}) {} ({})", l, op, r)),
            inner.prop_map(|e| format!("-({})", e)),
        ]
    })
}

fn compile_chain(predicate: &Predicate) -> TestChain {
    let mut resolve = |operand: &Operand| -> Result<ValueRef, CompileError> {
        Ok(match operand {
            Operand::Constant(v) => ValueRef::Constant(*v),
            Operand::Field(name) => {
                ValueRef::Field(FieldId(NAMES.iter().position(|n| n == name).unwrap_or(0)))
            }
        })
    };
    let mut builder = DecisionBuilder::new(&mut resolve);
    builder.predicate(predicate).unwrap();
    let slot = |value: ValueRef| match value {
        ValueRef::Constant(c) => SlotOperand::Constant(c),
        ValueRef::Field(id) => SlotOperand::Slot(id.0),
    };
    TestChain::Output(
        builder
            .finish()
            .into_iter()
            .map(|test| SlotTest {
                op: test.op,
                left: slot(test.left),
                right: slot(test.right),
                on_true: test.on_true,
            })
            .collect(),
    )
}

fn no_negations(predicate: &Predicate) -> bool {
    match predicate {
        Predicate::Relation(_) => true,
        Predicate::Any(items) => items
            .iter()
            .all(|p| !matches!(p, Predicate::Any(_)) && no_negations(p)),
        Predicate::All(items) => items
            .iter()
            .all(|p| !matches!(p, Predicate::All(_)) && no_negations(p)),
    }
}

fn sum_by_person(rows: &[Vec<String>]) -> Vec<(String, f64)> {
    let mut sums: Vec<(String, f64)> = Vec::new();
    for row in rows.iter().skip(1) {
        let value: f64 = row[1].parse().unwrap();
        match sums.last_mut() {
            Some((person, sum)) if *person == row[0] => *sum += value,
            _ => sums.push((row[0].clone(), value)),
        }
    }
    sums
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_predicate_optimizer_is_idempotent(text in predicate_text()) {
        let once = parse_predicate(&text).unwrap();
        let twice = parse_predicate(&once.to_string()).unwrap();
        prop_assert!(no_negations(&once));
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn test_expression_optimizer_is_idempotent(text in expression_text()) {
        // constant division by zero is a parse error, not a property failure
        let once = parse_expression(&text);
        prop_assume!(once.is_ok());
        let once = once.unwrap();
        let twice = parse_expression(&once.to_string()).unwrap();
        prop_assert_eq!(&twice, &once);
        prop_assert_eq!(twice.to_string(), once.to_string());
    }

    #[test]
    fn test_decision_list_matches_direct_evaluation(
        text in predicate_text(),
        values in prop::collection::vec(0..5i32, 3),
    ) {
        let predicate = parse_predicate(&text).unwrap();
        let values: Vec<f64> = values.into_iter().map(f64::from).collect();
        let lookup = |name: &str| values[NAMES.iter().position(|n| *n == name).unwrap_or(0)];
        let chain = compile_chain(&predicate);
        prop_assert_eq!(chain.accepts_output(&values), predicate.evaluate(&lookup));
    }

    #[test]
    fn test_output_positions_follow_the_list(
        fields in Just(vec!["food", "grams", "foodid", "energy", "cookloss", "weight", "double"])
            .prop_shuffle()
            .prop_flat_map(|all| (1..=all.len()).prop_map(move |n| all[..n].to_vec())),
    ) {
        let provider = provider_with_input("food,grams\n1,100\n");
        let text = format!(
            "foods: foods.txt\ninput: input.txt\noutput: out.txt\nset: double = energy * 2\noutput fields: {}\n",
            fields.join(", ")
        );
        let script = script(&text);
        let mut diag = Diagnostics::new();
        let artifacts = Compiler::builder(&script, &provider).build().compile(&mut diag).unwrap();

        prop_assert_eq!(&artifacts.plan.io.header, &fields);
        prop_assert_eq!(artifacts.plan.input.core.real_width, fields.len());
        prop_assert_eq!(artifacts.slot_names.len(), artifacts.plan.input.core.width);
        for (i, name) in artifacts.slot_names.iter().enumerate() {
            prop_assert!(!artifacts.slot_names[i + 1..].contains(name));
        }
    }

    #[test]
    fn test_grouping_sums_the_ungrouped_lines(
        lines in prop::collection::vec((1..4u32, 1..4u32, 0..50u32), 1..20),
    ) {
        let mut lines = lines;
        lines.sort_by_key(|(person, _, _)| *person);
        let mut input = String::from("person,food,grams\n");
        for (person, food, grams) in &lines {
            input.push_str(&format!("{},{},{}\n", person, food, grams));
        }
        let base = "foods: foods.txt\ninput: input.txt, food, grams\noutput: out.txt\noutput fields: person, energy\n";

        let plain = provider_with_input(&input);
        let (result, _) = run(base, &plain);
        prop_assert!(result.is_ok());

        let grouped = provider_with_input(&input);
        let (result, _) = run(&format!("{}group by: person\n", base), &grouped);
        prop_assert!(result.is_ok());

        let expected = sum_by_person(&rows(&plain, "out.txt"));
        let actual = sum_by_person(&rows(&grouped, "out.txt"));
        prop_assert_eq!(actual, expected);
    }
}
