//! Common test utilities for building scripts and in-memory data files.
use foodcalc::prelude::*;

/// Foods with per-100 g energy, a cooking loss fraction and a weight of 100.
///
/// Food 1 loses nothing when cooked, food 2 loses a fifth of its energy.
#[allow(dead_code)]
pub const FOODS: &str = "foodid,energy,cookloss,weight\n1,10,0,100\n2,10,0.2,100\n3,30,0,100\n";

/// Reads a script from `text`, panicking on syntax errors.
#[allow(dead_code)]
pub fn script(text: &str) -> Script {
    let mut diag = Diagnostics::new();
    let mut reader = ScriptReader::new();
    reader.read_str("test.fc", text, &mut diag).unwrap();
    reader.finish(&mut diag).unwrap()
}

/// Runs `text` against `provider`, returning the result together with the
/// recorded diagnostics.
#[allow(dead_code)]
pub fn run(text: &str, provider: &MemoryProvider) -> (Result<Outcome, FoodCalcError>, Diagnostics) {
    let script = script(text);
    let mut diag = Diagnostics::new();
    let result = Session::new(provider).run_script(&script, &mut diag);
    (result, diag)
}

/// The text output of `name` split into lines of fields.
#[allow(dead_code)]
pub fn rows(provider: &MemoryProvider, name: &str) -> Vec<Vec<String>> {
    provider
        .output_text(name)
        .unwrap_or_default()
        .lines()
        .map(|line| line.split(',').map(str::to_string).collect())
        .collect()
}

/// Builds one expected output row.
#[allow(dead_code)]
pub fn row(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| f.to_string()).collect()
}

/// A provider serving [`FOODS`] and the given input text.
#[allow(dead_code)]
pub fn provider_with_input(input: &str) -> MemoryProvider {
    MemoryProvider::new()
        .with_file("foods.txt", FOODS)
        .with_file("input.txt", input)
}
