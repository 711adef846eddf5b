//! Saved state tests
//!
//! A state saved by the `save` command must run exactly like the script it
//! was compiled from.
//!
mod common;
use common::*;
use foodcalc::prelude::*;
use tempfile::tempdir;

#[cfg(test)]
mod persistence_tests {
    use super::*;

    const SCRIPT: &str = "\
foods: foods.txt
input: input.txt, food, grams
input scale: 0.01
output: out.txt
recipes: recipes.txt
recipe sum: 100, weight
cook: boiled, cookloss, energy
cook field: cook, boiled
set: double = energy * 2
output fields: food, energy, double
";

    fn provider() -> MemoryProvider {
        provider_with_input("food,grams,cook\n1,100,0\n2,50,1\n10,100,0\n")
            .with_file("recipes.txt", "recipe,food,amount\n10,1,100\n10,3,100\n")
    }

    #[test]
    fn test_saved_state_runs_like_the_script() {
        let direct = provider();
        let (result, _) = run(SCRIPT, &direct);
        assert!(result.is_ok());

        let dir = tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let path = path.to_str().unwrap();
        let saving = provider();
        let (result, _) = run(&format!("{}save: \"{}\"\n", SCRIPT, path), &saving);
        assert_eq!(
            result.unwrap(),
            Outcome::Saved {
                path: path.to_string(),
                foods: 4
            }
        );
        assert!(saving.output_text("out.txt").is_none());

        let state = SavedState::from_file(path).unwrap();
        let replay = provider();
        let mut diag = Diagnostics::new();
        let outcome = Session::new(&replay).run_saved(state, &mut diag).unwrap();

        assert_eq!(outcome, Outcome::Ran { lines: 3, written: 3 });
        assert_eq!(replay.output_text("out.txt"), direct.output_text("out.txt"));
    }

    #[test]
    fn test_saved_state_checks_input_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let path = path.to_str().unwrap();
        let (result, _) = run(&format!("{}save: \"{}\"\n", SCRIPT, path), &provider());
        assert!(result.is_ok());

        let other = provider().with_file("input.txt", "grams,food,cook\n100,1,0\n");
        let mut diag = Diagnostics::new();
        let result = Session::new(&other).run_saved(SavedState::from_file(path).unwrap(), &mut diag);
        assert!(matches!(result, Err(FoodCalcError::Fatal(FatalError::Open { .. }))));
    }

    #[test]
    fn test_garbage_state_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.bin");
        std::fs::write(&path, b"not a saved state").unwrap();
        assert!(SavedState::from_file(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_missing_state_file_is_reported() {
        let result = SavedState::from_file("/nonexistent/foodcalc/state.bin");
        assert!(matches!(result, Err(FatalError::Open { .. })));
    }
}
