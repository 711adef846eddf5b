use serde::{Deserialize, Serialize};
use std::fmt;

/// An optimized arithmetic expression: a sum of signed terms.
///
/// The parser keeps sums in a canonical shape. Constants are folded into at
/// most one constant term, nested sums are flattened into their parent, and
/// the list never starts with a negated term (a leading constant is inserted
/// instead, so `-a-b` becomes `0 - a - b`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sum {
    pub terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub negated: bool,
    pub value: TermValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TermValue {
    Constant(f64),
    Field(String),
    Product(Product),
}

/// A product of factors, each optionally taken as a reciprocal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub factors: Vec<Factor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub reciprocal: bool,
    /// Only set on the single factor of a product whose folded constant was -1.
    pub negated: bool,
    pub value: FactorValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FactorValue {
    Constant(f64),
    Field(String),
    Sum(Sum),
}

impl Sum {
    /// The folded constant of this level, or zero if there is none.
    pub fn constant(&self) -> f64 {
        self.terms
            .iter()
            .map(|t| match t.value {
                TermValue::Constant(v) if t.negated => -v,
                TermValue::Constant(v) => v,
                _ => 0.0,
            })
            .sum()
    }

    /// Evaluates the expression with plain IEEE arithmetic.
    pub fn evaluate(&self, lookup: &impl Fn(&str) -> f64) -> f64 {
        self.terms
            .iter()
            .map(|t| {
                let v = match &t.value {
                    TermValue::Constant(v) => *v,
                    TermValue::Field(name) => lookup(name),
                    TermValue::Product(p) => p.evaluate(lookup),
                };
                if t.negated { -v } else { v }
            })
            .sum()
    }

    /// Every field name referenced anywhere in the expression, in order of appearance.
    pub fn field_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_names(&mut names);
        names
    }

    fn collect_names<'a>(&'a self, names: &mut Vec<&'a str>) {
        for term in &self.terms {
            match &term.value {
                TermValue::Constant(_) => {}
                TermValue::Field(name) => names.push(name),
                TermValue::Product(p) => {
                    for factor in &p.factors {
                        match &factor.value {
                            FactorValue::Constant(_) => {}
                            FactorValue::Field(name) => names.push(name),
                            FactorValue::Sum(s) => s.collect_names(names),
                        }
                    }
                }
            }
        }
    }
}

impl Product {
    pub fn evaluate(&self, lookup: &impl Fn(&str) -> f64) -> f64 {
        self.factors.iter().fold(1.0, |acc, f| {
            let mut v = match &f.value {
                FactorValue::Constant(v) => *v,
                FactorValue::Field(name) => lookup(name),
                FactorValue::Sum(s) => s.evaluate(lookup),
            };
            if f.negated {
                v = -v;
            }
            if f.reciprocal { acc / v } else { acc * v }
        })
    }
}

/// Writes a field name, quoting it when it would not lex back as a single name.
pub(crate) fn write_name(f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
    let plain = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| {
            !c.is_whitespace() && !"=+-*/()><,\"!%&?.;:".contains(c)
        })
        && !matches!(name, "and" | "or" | "not" | "in");
    if plain {
        write!(f, "{}", name)
    } else {
        write!(f, "\"{}\"", name.replace('"', "\"\""))
    }
}

impl fmt::Display for Sum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            let mut negated = term.negated;
            let mut value = &term.value;
            let flipped;
            if let TermValue::Constant(v) = term.value {
                if v < 0.0 && i > 0 {
                    negated = !negated;
                    flipped = TermValue::Constant(-v);
                    value = &flipped;
                }
            }
            if negated {
                write!(f, "{}", if i == 0 { "-" } else { " - " })?;
            } else if i > 0 {
                write!(f, " + ")?;
            }
            match value {
                TermValue::Constant(v) => write!(f, "{}", v)?,
                TermValue::Field(name) => write_name(f, name)?,
                TermValue::Product(p) => write!(f, "{}", p)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, factor) in self.factors.iter().enumerate() {
            if factor.reciprocal {
                write!(f, "{}", if i == 0 { "1 / " } else { " / " })?;
            } else if i > 0 {
                write!(f, " * ")?;
            }
            if factor.negated {
                write!(f, "-")?;
            }
            match &factor.value {
                FactorValue::Constant(v) => write!(f, "{}", v)?,
                FactorValue::Field(name) => write_name(f, name)?,
                FactorValue::Sum(s) => write!(f, "({})", s)?,
            }
        }
        Ok(())
    }
}

/// Renders an expression as an indented tree, for the `debug-tools` dumps.
pub struct DisplayExpression<'a> {
    pub expr: &'a Sum,
}

impl<'a> fmt::Display for DisplayExpression<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_sum(self.expr, f, "", true)
    }
}

impl<'a> DisplayExpression<'a> {
    fn fmt_sum(&self, sum: &Sum, f: &mut fmt::Formatter<'_>, prefix: &str, is_last: bool) -> fmt::Result {
        let node_marker = if is_last { "└── " } else { "├── " };
        writeln!(f, "{}{}sum", prefix, node_marker)?;
        let child_prefix = format!("{}{}", prefix, if is_last { "    " } else { "│   " });
        for (i, term) in sum.terms.iter().enumerate() {
            let last = i + 1 == sum.terms.len();
            let sign = if term.negated { "-" } else { "+" };
            match &term.value {
                TermValue::Constant(v) => self.fmt_leaf(f, &child_prefix, last, sign, &v.to_string())?,
                TermValue::Field(name) => self.fmt_leaf(f, &child_prefix, last, sign, name)?,
                TermValue::Product(p) => {
                    let marker = if last { "└── " } else { "├── " };
                    writeln!(f, "{}{}{} product", child_prefix, marker, sign)?;
                    let inner = format!("{}{}", child_prefix, if last { "    " } else { "│   " });
                    self.fmt_product(p, f, &inner)?;
                }
            }
        }
        Ok(())
    }

    fn fmt_product(&self, product: &Product, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        for (i, factor) in product.factors.iter().enumerate() {
            let last = i + 1 == product.factors.len();
            let op = match (factor.reciprocal, factor.negated) {
                (true, true) => "/-",
                (true, false) => "/",
                (false, true) => "*-",
                (false, false) => "*",
            };
            match &factor.value {
                FactorValue::Constant(v) => self.fmt_leaf(f, prefix, last, op, &v.to_string())?,
                FactorValue::Field(name) => self.fmt_leaf(f, prefix, last, op, name)?,
                FactorValue::Sum(s) => {
                    let marker = if last { "└── " } else { "├── " };
                    writeln!(f, "{}{}{}", prefix, marker, op)?;
                    let inner = format!("{}{}", prefix, if last { "    " } else { "│   " });
                    self.fmt_sum(s, f, &inner, true)?;
                }
            }
        }
        Ok(())
    }

    fn fmt_leaf(&self, f: &mut fmt::Formatter<'_>, prefix: &str, is_last: bool, op: &str, text: &str) -> fmt::Result {
        let marker = if is_last { "└── " } else { "├── " };
        writeln!(f, "{}{}{} {}", prefix, marker, op, text)
    }
}
