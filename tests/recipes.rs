//! Recipe synthesis tests
//!
//! Recipes files are folded into the food table before the input runs; these
//! tests observe the synthesized entries through the output of the input run.
//!
mod common;
use common::*;
use foodcalc::prelude::*;

const SCRIPT: &str = "\
foods: foods.txt
recipes: recipes.txt
recipe sum: 100, weight
input: input.txt
input scale: 0.01
output: out.txt
";

fn provider(recipes: &str, input: &str) -> MemoryProvider {
    provider_with_input(input).with_file("recipes.txt", recipes)
}

#[cfg(test)]
mod recipe_tests {
    use super::*;

    #[test]
    fn test_recipe_of_recipes() {
        let provider = provider(
            "recipe,food,amount\n10,1,100\n10,3,100\n20,10,100\n20,2,100\n",
            "food,grams\n10,100\n20,100\n",
        );
        let (result, diag) = run(&format!("{}output fields: food, energy\n", SCRIPT), &provider);

        assert!(result.is_ok(), "{:?}", diag.errors());
        assert_eq!(diag.error_count(), 0);
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["food", "energy"]), row(&["10", "20"]), row(&["20", "15"])]
        );
    }

    #[test]
    fn test_sum_mode_writes_recipe_id() {
        let provider = provider("recipe,food,amount\n10,1,100\n10,3,100\n", "food,grams\n10,100\n");
        let (result, _) = run(&format!("{}output fields: foodid, energy\n", SCRIPT), &provider);

        assert!(result.is_ok());
        assert_eq!(rows(&provider, "out.txt")[1], row(&["10", "20"]));
    }

    #[test]
    fn test_keep_mode_keeps_ingredients() {
        let provider = provider("recipe,food,amount\n10,1,100\n10,3,100\n", "food,grams\n10,100\n");
        let (result, _) = run(
            &format!("{}ingredients: keep\noutput fields: foodid, energy\n", SCRIPT),
            &provider,
        );

        assert_eq!(result.unwrap(), Outcome::Ran { lines: 1, written: 2 });
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![row(&["foodid", "energy"]), row(&["1", "5"]), row(&["3", "15"])]
        );
    }

    #[test]
    fn test_recipe_id_taken_by_a_food() {
        let provider = provider("recipe,food,amount\n1,3,100\n", "food,grams\n1,100\n");
        let (result, diag) = run(&format!("{}output fields: energy\n", SCRIPT), &provider);

        assert!(result.is_ok());
        assert!(matches!(
            diag.errors()[0],
            FoodCalcError::Data(DataError::DuplicateRecipe { id: 1, .. })
        ));
        // the food keeps its own values
        assert_eq!(rows(&provider, "out.txt")[1], row(&["10"]));
    }

    #[test]
    fn test_recipe_without_weight_is_rejected() {
        let provider = provider("recipe,food,amount\n10,1,0\n11,3,100\n", "food,grams\n11,100\n");
        let (result, diag) = run(&format!("{}output fields: energy\n", SCRIPT), &provider);

        assert!(result.is_ok());
        assert_eq!(diag.error_count(), 1);
        assert!(matches!(
            diag.errors()[0],
            FoodCalcError::Data(DataError::NonPositiveRecipeSum { id: 10, .. })
        ));
        assert_eq!(rows(&provider, "out.txt")[1], row(&["30"]));
    }

    #[test]
    fn test_unknown_ingredient_is_reported() {
        let provider = provider("recipe,food,amount\n10,99,100\n10,1,100\n", "food,grams\n10,100\n");
        let (result, diag) = run(&format!("{}output fields: energy\n", SCRIPT), &provider);

        assert!(result.is_ok());
        assert!(matches!(
            diag.errors()[0],
            FoodCalcError::Data(DataError::FoodNotFound { id: 99, .. })
        ));
        assert_eq!(rows(&provider, "out.txt")[1], row(&["10"]));
    }

    #[test]
    fn test_recipe_set_only_for_plain_ingredients() {
        let provider = provider(
            "recipe,food,amount\n10,1,100\n10,3,100\n20,10,100\n20,2,100\n",
            "food,grams\n1,100\n10,100\n20,100\n",
        );
        let (result, diag) = run(
            &format!("{}recipe set: square = energy * energy\noutput fields: food, square\n", SCRIPT),
            &provider,
        );

        assert!(result.is_ok(), "{:?}", diag.errors());
        // recipe 20 takes the stored 500 of recipe 10 instead of 20 * 20
        assert_eq!(
            rows(&provider, "out.txt"),
            vec![
                row(&["food", "square"]),
                row(&["1", "0"]),
                row(&["10", "500"]),
                row(&["20", "300"]),
            ]
        );
    }

    #[test]
    fn test_recipe_weight_reduce_field() {
        let provider = provider(
            "recipe,food,amount,loss\n10,1,100,0.5\n10,3,100,0\n",
            "food,grams\n10,100\n",
        );
        let (result, diag) = run(
            &format!(
                "{}set: cooked = weight\nrecipe weight reduce field: loss, cooked, energy\n\
                 output fields: food, energy, weight\n",
                SCRIPT
            ),
            &provider,
        );

        assert!(result.is_ok(), "{:?}", diag.errors());
        // half of the 200 g is lost, so the weight is not scaled down
        assert_eq!(rows(&provider, "out.txt")[1], row(&["10", "20", "200"]));
    }
}
