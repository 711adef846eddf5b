use super::expression::write_name;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The six relational operators of the predicate language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl RelOp {
    /// The operator that holds exactly when `self` does not.
    pub fn negate(self) -> Self {
        match self {
            RelOp::Eq => RelOp::Ne,
            RelOp::Ne => RelOp::Eq,
            RelOp::Gt => RelOp::Le,
            RelOp::Le => RelOp::Gt,
            RelOp::Lt => RelOp::Ge,
            RelOp::Ge => RelOp::Lt,
        }
    }

    /// The operator to use when the operands trade places.
    pub fn swap(self) -> Self {
        match self {
            RelOp::Eq => RelOp::Eq,
            RelOp::Ne => RelOp::Ne,
            RelOp::Gt => RelOp::Lt,
            RelOp::Lt => RelOp::Gt,
            RelOp::Ge => RelOp::Le,
            RelOp::Le => RelOp::Ge,
        }
    }

    #[inline]
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            RelOp::Eq => left == right,
            RelOp::Ne => left != right,
            RelOp::Gt => left > right,
            RelOp::Ge => left >= right,
            RelOp::Lt => left < right,
            RelOp::Le => left <= right,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            RelOp::Eq => "=",
            RelOp::Ne => "<>",
            RelOp::Gt => ">",
            RelOp::Ge => ">=",
            RelOp::Lt => "<",
            RelOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Constant(f64),
    Field(String),
}

impl Operand {
    pub fn evaluate(&self, lookup: &impl Fn(&str) -> f64) -> f64 {
        match self {
            Operand::Constant(v) => *v,
            Operand::Field(name) => lookup(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub op: RelOp,
    pub left: Operand,
    pub right: Operand,
}

impl Relation {
    pub fn new(op: RelOp, left: Operand, right: Operand) -> Self {
        Self { op, left, right }
    }

    pub fn negated(&self) -> Self {
        Self {
            op: self.op.negate(),
            left: self.left.clone(),
            right: self.right.clone(),
        }
    }

    pub fn evaluate(&self, lookup: &impl Fn(&str) -> f64) -> bool {
        self.op
            .apply(self.left.evaluate(lookup), self.right.evaluate(lookup))
    }
}

/// An optimized predicate. Negation has already been pushed into the
/// relations, and an `Any` never directly contains another `Any` (likewise for
/// `All`), and neither ever holds a single child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Relation(Relation),
    Any(Vec<Predicate>),
    All(Vec<Predicate>),
}

impl Predicate {
    /// Joins `items` as alternatives, flattening nested alternatives.
    pub fn any(items: Vec<Predicate>) -> Predicate {
        Self::join(items, true)
    }

    /// Joins `items` as conjuncts, flattening nested conjunctions.
    pub fn all(items: Vec<Predicate>) -> Predicate {
        Self::join(items, false)
    }

    fn join(items: Vec<Predicate>, alternatives: bool) -> Predicate {
        let mut flat = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Predicate::Any(children) if alternatives => flat.extend(children),
                Predicate::All(children) if !alternatives => flat.extend(children),
                other => flat.push(other),
            }
        }
        if flat.len() == 1 {
            return flat.remove(0);
        }
        if alternatives {
            Predicate::Any(flat)
        } else {
            Predicate::All(flat)
        }
    }

    pub fn evaluate(&self, lookup: &impl Fn(&str) -> f64) -> bool {
        match self {
            Predicate::Relation(r) => r.evaluate(lookup),
            Predicate::Any(items) => items.iter().any(|p| p.evaluate(lookup)),
            Predicate::All(items) => items.iter().all(|p| p.evaluate(lookup)),
        }
    }

    /// The relations of the predicate in left-to-right order.
    pub fn relations(&self) -> Vec<&Relation> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect<'a>(&'a self, out: &mut Vec<&'a Relation>) {
        match self {
            Predicate::Relation(r) => out.push(r),
            Predicate::Any(items) | Predicate::All(items) => {
                items.iter().for_each(|p| p.collect(out))
            }
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Constant(v) => write!(f, "{}", v),
            Operand::Field(name) => write_name(f, name),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.left, self.op.symbol(), self.right)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (items, connective) = match self {
            Predicate::Relation(r) => return write!(f, "{}", r),
            Predicate::Any(items) => (items, " or "),
            Predicate::All(items) => (items, " and "),
        };
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", connective)?;
            }
            match item {
                Predicate::Relation(r) => write!(f, "{}", r)?,
                nested => write!(f, "( {} )", nested)?,
            }
        }
        Ok(())
    }
}
