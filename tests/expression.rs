//! Expression and predicate parser tests
//!
//! The parsers return optimized trees; these tests check the canonical forms
//! and that the optimization never changes the value of an expression.
//!
use foodcalc::ast::{Operand, Predicate, RelOp};
use foodcalc::compiler::lexer::{Lexer, Token};
use foodcalc::compiler::parsing::{parse_assignment, parse_expression, parse_predicate};
use foodcalc::error::ExpressionError;

fn values(name: &str) -> f64 {
    match name {
        "a" => 2.0,
        "b" => 5.0,
        "c" => -3.0,
        "x" => 0.5,
        "y" => 2.0,
        _ => 0.0,
    }
}

#[test]
fn test_lexer_lowercases_names_and_reads_quotes() {
    let tokens = Lexer::tokenize("Energy * \"Fat Total\" >= 1.5").unwrap();
    assert_eq!(
        tokens,
        vec![
            Token::Name("energy".into()),
            Token::Star,
            Token::Name("fat total".into()),
            Token::Gt,
            Token::Eq,
            Token::Number(1.5),
        ]
    );
}

#[test]
fn test_lexer_rejects_illegal_characters() {
    assert_eq!(
        Lexer::tokenize("a % b"),
        Err(ExpressionError::InvalidCharacter('%'))
    );
}

#[test]
fn test_canonical_sums() {
    assert_eq!(parse_expression("a+(b+c)").unwrap().to_string(), "a + b + c");
    assert_eq!(parse_expression("-a+b").unwrap().to_string(), "b - a");
    assert_eq!(parse_expression("-a-b").unwrap().to_string(), "0 - a - b");
}

#[test]
fn test_constants_fold() {
    let sum = parse_expression("2*3 + a - 1").unwrap();
    assert_eq!(sum.constant(), 5.0);
    assert_eq!(sum.field_names(), vec!["a"]);
    assert_eq!(parse_expression("4 / 2 * 3").unwrap().to_string(), "6");
}

#[test]
fn test_optimized_expression_keeps_its_value() {
    for text in [
        "(a + 2) * (b - 1) / 4",
        "-a * -b * c",
        "a * -b",
        "-(a - b) + c * (2 - a)",
        "a / (b + c) - 1 / a",
        "((a))",
    ] {
        let sum = parse_expression(text).unwrap();
        let reparsed = parse_expression(&sum.to_string()).unwrap();
        assert_eq!(sum.evaluate(&values), reparsed.evaluate(&values), "{}", text);
    }
    assert_eq!(parse_expression("(a + 2) * (b - 1) / 4").unwrap().evaluate(&values), 4.0);
    assert_eq!(parse_expression("-a * -b * c").unwrap().evaluate(&values), -30.0);
}

#[test]
fn test_reparsing_keeps_term_order() {
    let once = parse_expression("a * a + (a + a) * a").unwrap();
    assert_eq!(once.to_string(), "a * a + (a + a) * a");
    assert_eq!(parse_expression(&once.to_string()).unwrap(), once);

    let mixed = parse_expression("a - b + c * 2 + (a + b) / c").unwrap();
    assert_eq!(mixed.to_string(), "c * 2 + (a + b) / c + a - b");
    assert_eq!(parse_expression(&mixed.to_string()).unwrap(), mixed);

    let product = parse_expression("a / b * (a + c) * c").unwrap();
    assert_eq!(product.to_string(), "(a + c) * a * c / b");
    assert_eq!(parse_expression(&product.to_string()).unwrap(), product);
}

#[test]
fn test_division_by_constant_zero() {
    assert_eq!(parse_expression("a / 0"), Err(ExpressionError::DivisionByZero));
    assert!(parse_expression("a / (b - b)").is_ok());
}

#[test]
fn test_assignment() {
    let (target, sum) = parse_assignment("Total = a + b").unwrap();
    assert_eq!(target, "total");
    assert_eq!(sum.evaluate(&values), 7.0);
    assert!(parse_assignment("= a").is_err());
    assert!(parse_assignment("t = a +").is_err());
}

#[test]
fn test_not_is_pushed_into_relations() {
    let predicate = parse_predicate("not (x < 1 or y = 2)").unwrap();
    assert_eq!(predicate.to_string(), "x >= 1 and y <> 2");
}

#[test]
fn test_range_and_in_expand() {
    let range = parse_predicate("1 < a <= 3").unwrap();
    assert_eq!(range.to_string(), "1 < a and a <= 3");

    let list = parse_predicate("a in (1, 2, 3)").unwrap();
    assert_eq!(list.to_string(), "a = 1 or a = 2 or a = 3");

    let excluded = parse_predicate("a not in (1, 2)").unwrap();
    assert_eq!(excluded.to_string(), "a <> 1 and a <> 2");
}

#[test]
fn test_nested_connectives_flatten() {
    let predicate = parse_predicate("a = 1 or (b = 2 or (c = 3 or x = 4))").unwrap();
    let Predicate::Any(items) = &predicate else {
        panic!("expected alternatives, got {:?}", predicate);
    };
    assert_eq!(items.len(), 4);
    assert_eq!(predicate.relations()[3].op, RelOp::Eq);
    assert_eq!(predicate.relations()[3].right, Operand::Constant(4.0));
}

#[test]
fn test_predicate_evaluation() {
    let predicate = parse_predicate("a = 2 and not (b < 5 or c > 0)").unwrap();
    assert!(predicate.evaluate(&values));
    let predicate = parse_predicate("a > b or c >= 0").unwrap();
    assert!(!predicate.evaluate(&values));
}

#[test]
fn test_predicate_syntax_errors() {
    assert!(parse_predicate("a =").is_err());
    assert!(parse_predicate("(a = 1").is_err());
    assert!(parse_predicate("a in 1, 2").is_err());
    assert!(parse_predicate("a + 1 = 2").is_err());
}
