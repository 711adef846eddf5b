//! Script reader tests
//!
//! Covers command syntax, argument lists, continuation lines and the errors
//! recorded for malformed commands.
//!
use foodcalc::error::{Diagnostics, FatalError, FoodCalcError, ScriptError};
use foodcalc::script::{Command, Delimiters, IngredientMode, ListItem, ScriptReader, SetScope};

fn read(text: &str) -> (Result<foodcalc::script::Script, FatalError>, Diagnostics) {
    let mut diag = Diagnostics::new();
    let mut reader = ScriptReader::new();
    let result = reader
        .read_str("test.fc", text, &mut diag)
        .and_then(|_| reader.finish(&mut diag));
    (result, diag)
}

const REQUIRED: &str = "foods: foods.txt\ninput: input.txt\noutput: out.txt\n";

#[test]
fn test_required_commands_are_read() {
    let (script, diag) = read(REQUIRED);
    let script = script.unwrap();
    assert_eq!(diag.error_count(), 0);
    assert_eq!(
        script.iter().next(),
        Some(&Command::Foods {
            file: "foods.txt".into(),
            id_field: None,
            delimiters: Delimiters::default(),
        })
    );
    assert!(script.contains("input"));
    assert!(script.contains("output"));
}

#[test]
fn test_missing_required_command() {
    let (result, diag) = read("foods: foods.txt\ninput: input.txt\n");
    assert!(matches!(result, Err(FatalError::PhaseFailed { .. })));
    assert_eq!(
        diag.errors(),
        &[FoodCalcError::Script(ScriptError::MissingCommand("output".into()))]
    );
}

#[test]
fn test_keywords_are_case_insensitive_and_blanks_collapse() {
    let (script, _) = read(&format!("{}OUTPUT   Fields: Energy, Protein--Fat\n", REQUIRED));
    let script = script.unwrap();
    let fields = script.iter().find_map(|c| match c {
        Command::OutputFields(items) => Some(items.clone()),
        _ => None,
    });
    assert_eq!(
        fields,
        Some(vec![
            ListItem::Field("energy".into()),
            ListItem::Range("protein".into(), "fat".into()),
        ])
    );
}

#[test]
fn test_continuation_and_comments() {
    let text = format!(
        "; a comment line\n{}set: total = a +\n= b ; trailing comment\n",
        REQUIRED
    );
    let (script, diag) = read(&text);
    let script = script.unwrap();
    assert_eq!(diag.error_count(), 0);
    let set = script.iter().find_map(|c| match c {
        Command::Set {
            scope,
            target,
            expression,
        } => Some((*scope, target.clone(), expression.to_string())),
        _ => None,
    });
    assert_eq!(set, Some((SetScope::Normal, "total".into(), "a + b".into())));
}

#[test]
fn test_single_command_used_twice() {
    let (result, diag) = read(&format!("{}output: other.txt\n", REQUIRED));
    assert!(result.is_err());
    assert!(matches!(
        diag.errors()[0],
        FoodCalcError::Script(ScriptError::DuplicateCommand { line: 4, .. })
    ));
}

#[test]
fn test_repeatable_commands() {
    let text = format!(
        "{}foods: more.txt\nif: group, 1, 2\nif: group, 3\n",
        REQUIRED
    );
    let (script, diag) = read(&text);
    assert!(script.is_ok(), "{:?}", diag.errors());
    let ifs: Vec<_> = script
        .unwrap()
        .iter()
        .filter_map(|c| match c {
            Command::If { values, .. } => Some(values.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(ifs, vec![vec![1.0, 2.0], vec![3.0]]);
}

#[test]
fn test_errors_are_collected_per_line() {
    let text = format!(
        "{}frobnicate: 1\ninput scale: many\nblip: 10 20\nset: x = (a\n",
        REQUIRED
    );
    let (result, diag) = read(&text);
    assert!(result.is_err());
    assert_eq!(diag.error_count(), 4);
    assert!(matches!(
        diag.errors()[0],
        FoodCalcError::Script(ScriptError::UnknownCommand { .. })
    ));
    assert!(matches!(
        diag.errors()[1],
        FoodCalcError::Script(ScriptError::BadArgument { .. })
    ));
    assert!(matches!(
        diag.errors()[2],
        FoodCalcError::Script(ScriptError::TooManyArguments { .. })
    ));
    assert!(matches!(
        diag.errors()[3],
        FoodCalcError::Script(ScriptError::Expression { .. })
    ));
}

#[test]
fn test_delimiter_arguments() {
    let (script, _) = read("foods: \"my foods.txt\", id, space, \",\"\ninput: input.txt\noutput: out.txt\n");
    let script = script.unwrap();
    assert_eq!(
        script.iter().next(),
        Some(&Command::Foods {
            file: "my foods.txt".into(),
            id_field: Some("id".into()),
            delimiters: Delimiters {
                separator: Some(' '),
                decimal_point: Some(','),
                comment: None,
            },
        })
    );
}

#[test]
fn test_ingredients_and_calculate() {
    let text = format!(
        "{}ingredients: keepx\ncalculate: total, fat, 2, protein\n",
        REQUIRED
    );
    let (script, _) = read(&text);
    let script = script.unwrap();
    assert!(script.iter().any(|c| *c == Command::Ingredients(IngredientMode::KeepCopy)));
    let terms = script.iter().find_map(|c| match c {
        Command::Calculate { target, terms } => Some((target.clone(), terms.len())),
        _ => None,
    });
    assert_eq!(terms, Some(("total".into(), 2)));
}
