//! Integration tests for FoodCalc
//!
//! End-to-end runs of scripts over in-memory foods, recipes and input files.
//!
mod common;
use common::*;
use foodcalc::prelude::*;

#[cfg(test)]
mod integration_tests {
    use super::*;

    const BASIC: &str = "\
foods: foods.txt
input: input.txt
input scale: 0.01
output: out.txt
";

    #[test]
    fn test_amount_and_cooking_loss() {
        let provider = provider_with_input("food,grams,cook\n1,100,0\n2,50,1\n");
        let text = format!(
            "{}cook: boiled, cookloss, energy\ncook field: cook, boiled\noutput fields: food, energy\n",
            BASIC
        );
        let (result, diag) = run(&text, &provider);

        assert_eq!(result.unwrap(), Outcome::Ran { lines: 2, written: 2 });
        assert_eq!(diag.error_count(), 0);
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["food", "energy"]), row(&["1", "10"]), row(&["2", "4"])]
        );
    }

    #[test]
    fn test_recipe_scaled_to_recipe_sum() {
        let provider = MemoryProvider::new()
            .with_file("foods.txt", "foodid,energy,weight\n1,10,100\n2,30,100\n")
            .with_file("recipes.txt", "recipe,food,amount\n10,1,150\n10,2,50\n")
            .with_file("input.txt", "food,grams\n10,200\n");
        let text = format!(
            "{}recipes: recipes.txt\nrecipe sum: 100, weight\noutput fields: food, energy, weight\n",
            BASIC
        );
        let (result, diag) = run(&text, &provider);

        assert!(result.is_ok(), "{:?}", diag.errors());
        // 200 g of ingredients with 30 energy, normalized to 100 g
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["food", "energy", "weight"]), row(&["10", "30", "200"])]
        );
    }

    #[test]
    fn test_grouped_by_person() {
        let provider = provider_with_input("person,food,grams\n1,1,100\n1,3,50\n2,1,100\n");
        let text = "\
foods: foods.txt
input: input.txt, food, grams
input scale: 0.01
output: out.txt
group by: person
output fields: person, energy
";
        let (result, _) = run(text, &provider);

        assert_eq!(result.unwrap(), Outcome::Ran { lines: 3, written: 2 });
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["person", "energy"]), row(&["1", "25"]), row(&["2", "10"])]
        );
    }

    #[test]
    fn test_unsorted_group_input_is_fatal() {
        let provider = provider_with_input("person,food,grams\n2,1,100\n1,1,100\n2,1,100\n");
        let text = "\
foods: foods.txt
input: input.txt, food, grams
output: out.txt
group by: person
output fields: person, energy
";
        let (result, _) = run(text, &provider);

        assert!(matches!(
            result,
            Err(FoodCalcError::Fatal(FatalError::Unsorted { .. }))
        ));
        assert!(rows(&provider, "out.txt").len() <= 1);
    }

    #[test]
    fn test_where_filters_computed_values() {
        let provider = provider_with_input("food,grams\n1,100\n1,50\n3,100\n");
        let text = format!("{}where: energy > 5\noutput fields: food, energy\n", BASIC);
        let (result, _) = run(&text, &provider);

        assert_eq!(result.unwrap(), Outcome::Ran { lines: 3, written: 2 });
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["food", "energy"]), row(&["1", "10"]), row(&["3", "30"])]
        );
    }

    #[test]
    fn test_if_selects_foods() {
        let provider = provider_with_input("food,grams\n1,100\n2,100\n3,100\n");
        let text = format!("{}if: foodid, 1, 3\noutput fields: food, energy\n", BASIC);
        let (result, _) = run(&text, &provider);

        assert!(result.is_ok());
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["food", "energy"]), row(&["1", "10"]), row(&["3", "30"])]
        );
    }

    #[test]
    fn test_set_rules_and_default_scale() {
        let provider = provider_with_input("food,grams\n3,2\n");
        let text = "\
foods: foods.txt
input: input.txt
output: out.txt
set: kcal = energy * 2 + 1
output fields: energy, kcal
";
        let (result, _) = run(text, &provider);

        assert!(result.is_ok());
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["energy", "kcal"]), row(&["60", "121"])]
        );
    }

    #[test]
    fn test_missing_food_is_reported_and_skipped() {
        let provider = provider_with_input("food,grams\n1,100\n42,100\n3,100\n");
        let text = format!("{}output fields: food, energy\n", BASIC);
        let (result, diag) = run(&text, &provider);

        assert_eq!(result.unwrap(), Outcome::Ran { lines: 3, written: 2 });
        assert_eq!(diag.error_count(), 1);
        assert!(matches!(
            diag.errors()[0],
            FoodCalcError::Data(DataError::FoodNotFound { id: 42, line: 3, .. })
        ));
    }

    #[test]
    fn test_unknown_cook_id_leaves_values_uncooked() {
        let provider = provider_with_input("food,grams,cook\n2,100,7\n");
        let text = format!(
            "{}cook: boiled, cookloss, energy\ncook field: cook, boiled\noutput fields: energy\n",
            BASIC
        );
        let (result, diag) = run(&text, &provider);

        assert!(result.is_ok());
        assert!(matches!(
            diag.errors()[0],
            FoodCalcError::Data(DataError::UnknownCookId { id: 7, .. })
        ));
        assert_eq!(rows(&provider, "out.txt")[1], row(&["10"]));
    }

    #[test]
    fn test_non_edible_fraction() {
        let provider = MemoryProvider::new()
            .with_file("foods.txt", "foodid,energy,waste\n1,10,0.25\n")
            .with_file("input.txt", "food,grams,raw\n1,100,1\n1,100,0\n");
        let text = format!(
            "{}non-edible field: waste, raw\noutput fields: energy\n",
            BASIC
        );
        let (result, _) = run(&text, &provider);

        assert!(result.is_ok());
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["energy"]), row(&["7.5"]), row(&["10"])]
        );
    }

    #[test]
    fn test_input_override() {
        let provider = provider_with_input("food,grams\n1,100\n")
            .with_file("other.txt", "food,grams\n3,100\n");
        let script = script(&format!("{}output fields: energy\n", BASIC));
        let mut diag = Diagnostics::new();
        let outcome = Session::new(&provider)
            .with_input(Some("other.txt".into()))
            .with_output(Some("other-out.txt".into()))
            .run_script(&script, &mut diag)
            .unwrap();

        assert_eq!(outcome, Outcome::Ran { lines: 1, written: 1 });
        assert_eq!(rows(&provider, "other-out.txt")[1], row(&["30"]));
        assert!(provider.output_text("out.txt").is_none());
    }

    #[test]
    fn test_missing_foods_file_is_fatal() {
        let provider = MemoryProvider::new().with_file("input.txt", "food,grams\n1,100\n");
        let (result, _) = run(BASIC, &provider);
        assert!(result.is_err());
    }

    /// Foods with a group kind used by the grouping and transpose tests.
    const KINDS: &str = "foodid,energy,kind,weight\n1,10,1,100\n2,20,2,100\n3,30,1,100\n";

    #[test]
    fn test_weight_reduce_field() {
        let provider = provider_with_input("food,grams,loss\n1,100,0.25\n1,100,0\n");
        let text = format!(
            "{}weight reduce field: loss, weight, energy\noutput fields: energy, weight\n",
            BASIC
        );
        let (result, diag) = run(&text, &provider);

        assert!(result.is_ok(), "{:?}", diag.errors());
        // a quarter of the 100 g is lost, taking energy with it
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["energy", "weight"]), row(&["7.5", "75"]), row(&["10", "100"])]
        );
    }

    #[test]
    fn test_weight_reduce_by_calculated_weight() {
        let provider = provider_with_input("food,grams,loss\n1,100,0.2\n2,100,0.5\n")
            .with_file("foods.txt", "foodid,energy,weight\n1,10,100\n2,10,20\n");
        let text = format!(
            "{}food weight: 100, weight\nset: cooked = weight - 20\n\
             weight reduce field: loss, cooked, energy\noutput fields: energy, cooked\n",
            BASIC
        );
        let (result, diag) = run(&text, &provider);

        assert!(result.is_ok(), "{:?}", diag.errors());
        assert_eq!(diag.error_count(), 0);
        // 20 g of 80 g lost; the second food has nothing left to lose from
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["energy", "cooked"]), row(&["7.5", "80"]), row(&["10", "0"])]
        );
    }

    #[test]
    fn test_transpose_by_food_kind() {
        let provider = provider_with_input("person,food,grams\n1,1,100\n1,2,100\n1,3,50\n2,2,50\n")
            .with_file("foods.txt", KINDS);
        let text = format!(
            "{}group by: person\ntranspose: kind, 2, energy\noutput fields: person, energy1, energy2\n",
            BASIC
        );
        let (result, diag) = run(&text, &provider);

        assert!(result.is_ok(), "{:?}", diag.errors());
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![
                row(&["person", "energy1", "energy2"]),
                row(&["1", "25", "20"]),
                row(&["2", "0", "10"]),
            ]
        );
    }

    #[test]
    fn test_group_set_runs_at_flush() {
        let provider = provider_with_input("person,food,grams\n1,1,100\n1,3,50\n2,1,100\n");
        let text = format!(
            "{}group by: person\ngroup set: density = energy / weight\n\
             output fields: person, energy, weight, density\n",
            BASIC
        );
        let (result, diag) = run(&text, &provider);

        assert!(result.is_ok(), "{:?}", diag.errors());
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![
                row(&["person", "energy", "weight", "density"]),
                row(&["1", "25", "150", "0.1667"]),
                row(&["2", "10", "100", "0.1"]),
            ]
        );
    }

    #[test]
    fn test_grouped_by_person_and_food_kind() {
        let provider = provider_with_input("person,food,grams\n1,1,100\n1,2,100\n1,3,50\n2,2,50\n")
            .with_file("foods.txt", KINDS);
        let text = format!(
            "{}group by: person, kind\noutput fields: person, kind, energy\n",
            BASIC
        );
        let (result, diag) = run(&text, &provider);

        assert_eq!(result.unwrap(), Outcome::Ran { lines: 4, written: 3 });
        assert_eq!(diag.error_count(), 0);
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![
                row(&["person", "kind", "energy"]),
                row(&["1", "1", "25"]),
                row(&["1", "2", "20"]),
                row(&["2", "2", "10"]),
            ]
        );
    }

    #[test]
    fn test_groups_file_expansion() {
        let provider = provider_with_input("food,grams\n1,100\n2,50\n4,100\n")
            .with_file(
                "foods.txt",
                "foodid,energy,kind\n1,10,1\n2,20,2\n4,10,9\n",
            )
            .with_file("groups.txt", "kind,factor\n1,3\n2,5\n");
        let text = format!(
            "{}groups: groups.txt, kind\nno-calc fields: factor\nset: boosted = energy * factor\n\
             output fields: food, boosted\n",
            BASIC
        );
        let (result, diag) = run(&text, &provider);

        assert!(result.is_ok(), "{:?}", diag.errors());
        // kind 9 has no group row
        assert!(diag
            .warnings()
            .iter()
            .any(|w| w.contains("not found in groups file")));
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![
                row(&["food", "boosted"]),
                row(&["1", "30"]),
                row(&["2", "50"]),
                row(&["4", "0"]),
            ]
        );
    }

    #[test]
    fn test_binary_input_and_output() {
        let input: Vec<u8> = [1.0f64, 100.0, 2.0, 50.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let provider = provider_with_input("").with_file("input.bin", input);
        let text = "\
foods: foods.txt
input: input.bin
input fields: food, grams
input format: bin-native
input scale: 0.01
output: out.bin
output format: bin-native
output fields: food, energy
";
        let (result, diag) = run(text, &provider);

        assert_eq!(result.unwrap(), Outcome::Ran { lines: 2, written: 2 });
        assert_eq!(diag.error_count(), 0);
        let bytes = provider.output("out.bin").unwrap();
        let values: Vec<f64> = bytes
            .chunks_exact(8)
            .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        assert_eq!(values, vec![1.0, 100.0 * 0.01 * 10.0, 2.0, 50.0 * 0.01 * 10.0]);
    }
}
