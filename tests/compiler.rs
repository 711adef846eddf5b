//! Compiler tests
//!
//! Compile scripts against in-memory files and inspect the resulting plans
//! and the errors recorded for invalid scripts.
//!
mod common;
use common::*;
use foodcalc::compiler::CompilationArtifacts;
use foodcalc::plan::TestChain;
use foodcalc::plan::visualizer::visualize_plan;
use foodcalc::prelude::*;

const BASIC: &str = "foods: foods.txt\ninput: input.txt\noutput: out.txt\n";

fn compile(text: &str) -> (Result<CompilationArtifacts, FoodCalcError>, Diagnostics) {
    let provider = provider_with_input("food,grams,cook,person\n1,100,0,1\n");
    let script = script(text);
    let mut diag = Diagnostics::new();
    let result = Compiler::builder(&script, &provider).build().compile(&mut diag);
    (result, diag)
}

fn compile_ok(extra: &str) -> CompilationArtifacts {
    let (result, diag) = compile(&format!("{}{}", BASIC, extra));
    match result {
        Ok(artifacts) => artifacts,
        Err(e) => panic!("{}: {:?}", e, diag.errors()),
    }
}

fn compile_errors(extra: &str) -> Vec<FoodCalcError> {
    let (result, diag) = compile(&format!("{}{}", BASIC, extra));
    assert!(result.is_err(), "expected the script to be rejected");
    diag.errors().to_vec()
}

#[cfg(test)]
mod compiler_tests {
    use super::*;

    #[test]
    fn test_header_follows_output_list() {
        let artifacts = compile_ok("set: double = energy * 2\noutput fields: double, food, energy\n");
        let plan = &artifacts.plan;

        assert_eq!(plan.io.header, vec!["double", "food", "energy"]);
        assert_eq!(plan.input.core.real_width, 3);
        assert_eq!(&artifacts.slot_names[..3], plan.io.header.as_slice());
        assert_eq!(plan.io.input_fields, vec!["food", "grams", "cook", "person"]);
    }

    #[test]
    fn test_default_output_list() {
        let artifacts = compile_ok("set: double = energy * 2\n");
        assert_eq!(
            artifacts.plan.io.header,
            vec![
                "food", "grams", "cook", "person", "foodid", "energy", "cookloss", "weight", "double"
            ]
        );
    }

    #[test]
    fn test_slots_are_dense_and_unique() {
        let artifacts = compile_ok(
            "set: kcal = (energy + 1) * (weight - cookloss)\nwhere: kcal > 10\noutput fields: kcal\n",
        );
        let names = &artifacts.slot_names;
        let width = artifacts.plan.input.core.width;
        assert_eq!(names.len(), width);
        for (i, name) in names.iter().enumerate() {
            assert!(!names[i + 1..].contains(name), "{} placed twice", name);
        }
    }

    #[test]
    fn test_simple_and_general_test_chains() {
        let simple = compile_ok("where: foodid = 1 or foodid > 2\noutput fields: energy\n");
        assert!(matches!(simple.plan.input.stream.tests, TestChain::Table(ref t) if t.len() == 2));

        let general = compile_ok("where: energy > 1\noutput fields: energy\n");
        assert!(matches!(general.plan.input.stream.tests, TestChain::Output(_)));

        let none = compile_ok("output fields: energy\n");
        assert_eq!(none.plan.input.stream.tests, TestChain::None);
    }

    #[test]
    fn test_grouping_and_cooking_in_plan() {
        let artifacts = compile_ok(
            "group by: person\ncook: boiled, cookloss, energy\ncook field: cook, boiled\noutput fields: person, energy\n",
        );
        let plan = &artifacts.plan.input;
        assert_eq!(plan.stream.input_groups.len(), 1);
        assert!(plan.stream.food_groups.is_empty());
        assert_eq!(plan.stream.cook, Some(2));
        assert_eq!(plan.core.cook_methods.len(), 1);
        assert!(plan.stream.is_grouped());
    }

    #[test]
    fn test_unknown_output_field() {
        let errors = compile_errors("output fields: energy, nothing\n");
        assert!(errors.iter().any(|e| matches!(
            e,
            FoodCalcError::Compile(CompileError::UnknownField { name, .. }) if name == "nothing"
        )));
    }

    #[test]
    fn test_set_target_must_be_new() {
        let errors = compile_errors("set: energy = weight * 2\n");
        assert!(matches!(
            &errors[0],
            FoodCalcError::Compile(CompileError::Conflict { name, .. }) if name == "energy"
        ));

        let errors = compile_errors("set: a = energy\nset: a = weight\n");
        assert!(matches!(errors[0], FoodCalcError::Compile(CompileError::Conflict { .. })));
    }

    #[test]
    fn test_set_cannot_read_its_own_target() {
        let errors = compile_errors("set: total = total + energy\n");
        assert!(!errors.is_empty());
    }

    #[test]
    fn test_undefined_cook_type() {
        let errors = compile_errors("cook: boiled, cookloss, energy\ncook field: cook, steamed\n");
        assert!(errors.iter().any(|e| matches!(
            e,
            FoodCalcError::Compile(CompileError::UnknownCookType(name)) if name == "steamed"
        )));
    }

    #[test]
    fn test_zero_input_scale() {
        let errors = compile_errors("input scale: 0\n");
        assert!(matches!(
            errors[0],
            FoodCalcError::Compile(CompileError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_output_listed_twice() {
        let errors = compile_errors("output fields: energy, energy\n");
        assert!(errors.iter().any(|e| matches!(
            e,
            FoodCalcError::Compile(CompileError::OutputListedTwice(_))
        )));
    }

    #[test]
    fn test_overrides_replace_file_names() {
        let provider = provider_with_input("food,grams\n1,100\n")
            .with_file("other.txt", "food,grams\n2,50\n");
        let script = script(BASIC);
        let mut diag = Diagnostics::new();
        let artifacts = Compiler::builder(&script, &provider)
            .with_input("other.txt")
            .with_output("-")
            .build()
            .compile(&mut diag)
            .unwrap();
        assert_eq!(artifacts.plan.io.input.file, "other.txt");
        assert_eq!(artifacts.plan.io.output.file, "-");
        assert!(artifacts.input_source.is_some());
    }

    #[test]
    fn test_plan_listing_names_slots() {
        let artifacts = compile_ok("set: double = energy * 2\noutput fields: double\n");
        let listing = visualize_plan(&artifacts.plan.input, &artifacts.slot_names, "input");
        assert!(listing.contains("PLAN: input"));
        assert!(listing.contains("double"));
    }
}
