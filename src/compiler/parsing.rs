//! Recursive-descent parsers for the arithmetic and boolean sub-languages.
//!
//! Both parsers optimize while they descend, so the trees they return are
//! already in canonical form:
//!
//! ```text
//! a+(b+c)   -> a + b + c        flattening
//! -a+b      -> b - a            reordering to avoid a leading negation
//! a+(b*c)   -> b * c + a        products first
//! -a*-b*c   -> a * b * c        sign folding
//! a*-b      -> a * b * -1
//! -a-b      -> 0 - a - b
//! not (x < 1 or y = 2)  -> x >= 1 and y <> 2
//! ```

use super::lexer::{Lexer, Token};
use crate::ast::{
    Factor, FactorValue, Operand, Predicate, Product, RelOp, Relation, Sum, Term, TermValue,
};
use crate::error::ExpressionError;

/// Parses a complete arithmetic expression.
pub fn parse_expression(text: &str) -> Result<Sum, ExpressionError> {
    let mut parser = ExpressionParser::new(text)?;
    let sum = parser.parse_sum()?;
    parser.expect_end()?;
    Ok(sum)
}

/// Parses `name = expression`, the argument of the `set` family of commands.
pub fn parse_assignment(text: &str) -> Result<(String, Sum), ExpressionError> {
    let mut parser = ExpressionParser::new(text)?;
    let name = match parser.advance() {
        Token::Name(name) => name,
        other => return Err(unexpected(&other, "field name")),
    };
    parser.expect(Token::Eq, "=")?;
    let sum = parser.parse_sum()?;
    parser.expect_end()?;
    Ok((name, sum))
}

/// Parses a complete boolean predicate.
pub fn parse_predicate(text: &str) -> Result<Predicate, ExpressionError> {
    let mut parser = ExpressionParser::new(text)?;
    let predicate = parser.parse_or(false)?;
    parser.expect_end()?;
    Ok(predicate)
}

fn unexpected(found: &Token, expected: &str) -> ExpressionError {
    ExpressionError::UnexpectedToken {
        found: found.to_string(),
        expected: expected.to_string(),
    }
}

pub struct ExpressionParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExpressionParser {
    pub fn new(text: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            tokens: Lexer::tokenize(text)?,
            pos: 0,
        })
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::End)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<(), ExpressionError> {
        let found = self.advance();
        if found == token {
            Ok(())
        } else {
            Err(unexpected(&found, expected))
        }
    }

    fn expect_end(&mut self) -> Result<(), ExpressionError> {
        self.expect(Token::End, "end of line")
    }

    // --- arithmetic ---

    /// `Exp ::= Term {('+'|'-') Term}` with a running additive constant.
    pub fn parse_sum(&mut self) -> Result<Sum, ExpressionError> {
        let mut constant = 0.0;
        let mut terms = Vec::new();
        let mut negate = false;
        loop {
            self.fold_term(negate, &mut constant, &mut terms)?;
            match self.peek() {
                Token::Plus => negate = false,
                Token::Minus => negate = true,
                _ => break,
            }
            self.advance();
        }

        let leading_negation = terms.first().is_some_and(|t: &Term| t.negated);
        if constant != 0.0 || terms.is_empty() || leading_negation {
            let term = Term {
                negated: false,
                value: TermValue::Constant(constant),
            };
            if leading_negation {
                terms.insert(0, term);
            } else {
                terms.push(term);
            }
        }
        Ok(Sum { terms })
    }

    fn fold_term(
        &mut self,
        negate: bool,
        constant: &mut f64,
        terms: &mut Vec<Term>,
    ) -> Result<(), ExpressionError> {
        let mut product = self.parse_product()?;
        if product.factors.len() > 1 {
            link_term(
                Term {
                    negated: negate,
                    value: TermValue::Product(product),
                },
                constant,
                terms,
            );
            return Ok(());
        }

        let Some(factor) = product.factors.pop() else {
            return Ok(());
        };
        let negated = factor.negated ^ negate;
        match factor.value {
            FactorValue::Sum(inner) => {
                for term in inner.terms {
                    link_term(
                        Term {
                            negated: term.negated ^ negated,
                            value: term.value,
                        },
                        constant,
                        terms,
                    );
                }
            }
            FactorValue::Constant(v) => link_term(
                Term {
                    negated,
                    value: TermValue::Constant(v),
                },
                constant,
                terms,
            ),
            FactorValue::Field(name) => link_term(
                Term {
                    negated,
                    value: TermValue::Field(name),
                },
                constant,
                terms,
            ),
        }
        Ok(())
    }

    /// `Term ::= Factor {('*'|'/') Factor}` with a running multiplicative constant.
    fn parse_product(&mut self) -> Result<Product, ExpressionError> {
        let mut constant = 1.0;
        let mut factors = Vec::new();
        let mut reciprocal = false;
        loop {
            self.fold_factor(reciprocal, &mut constant, &mut factors)?;
            match self.peek() {
                Token::Star => reciprocal = false,
                Token::Slash => reciprocal = true,
                _ => break,
            }
            self.advance();
        }

        let leading_reciprocal = factors.first().is_some_and(|f: &Factor| f.reciprocal);
        if constant == -1.0 && factors.len() == 1 && !leading_reciprocal {
            factors[0].negated = true;
        } else if constant != 1.0 || factors.is_empty() || leading_reciprocal {
            let factor = Factor {
                reciprocal: false,
                negated: false,
                value: FactorValue::Constant(constant),
            };
            if leading_reciprocal {
                factors.insert(0, factor);
            } else {
                factors.push(factor);
            }
        }
        Ok(Product { factors })
    }

    fn fold_factor(
        &mut self,
        reciprocal: bool,
        constant: &mut f64,
        factors: &mut Vec<Factor>,
    ) -> Result<(), ExpressionError> {
        let factor = self.parse_factor()?;
        match factor.value {
            FactorValue::Sum(mut inner) if inner.terms.len() == 1 => {
                let Some(term) = inner.terms.pop() else {
                    return Ok(());
                };
                let negated = term.negated ^ factor.negated;
                match term.value {
                    TermValue::Product(p) => {
                        for mut f in p.factors {
                            f.reciprocal ^= reciprocal;
                            link_factor(f, constant, factors)?;
                        }
                        if negated {
                            *constant = -*constant;
                        }
                    }
                    TermValue::Constant(v) => link_factor(
                        Factor {
                            reciprocal,
                            negated,
                            value: FactorValue::Constant(v),
                        },
                        constant,
                        factors,
                    )?,
                    TermValue::Field(name) => link_factor(
                        Factor {
                            reciprocal,
                            negated,
                            value: FactorValue::Field(name),
                        },
                        constant,
                        factors,
                    )?,
                }
            }
            value => link_factor(
                Factor {
                    reciprocal,
                    negated: factor.negated,
                    value,
                },
                constant,
                factors,
            )?,
        }
        Ok(())
    }

    /// `Factor ::= ['-'] (Number | FieldName | '(' Exp ')')`
    fn parse_factor(&mut self) -> Result<Factor, ExpressionError> {
        let negated = if *self.peek() == Token::Minus {
            self.advance();
            true
        } else {
            false
        };
        let value = match self.advance() {
            Token::Number(v) => FactorValue::Constant(v),
            Token::Name(name) => FactorValue::Field(name),
            Token::LParen => {
                let sum = self.parse_sum()?;
                self.expect(Token::RParen, ")")?;
                FactorValue::Sum(sum)
            }
            other => return Err(unexpected(&other, "number, field name or (")),
        };
        Ok(Factor {
            reciprocal: false,
            negated,
            value,
        })
    }

    // --- boolean ---

    /// `Lexp ::= Lexp1 {'or' Lexp1}`. Under negation the connective flips.
    fn parse_or(&mut self, negated: bool) -> Result<Predicate, ExpressionError> {
        let mut items = vec![self.parse_and(negated)?];
        while *self.peek() == Token::Or {
            self.advance();
            items.push(self.parse_and(negated)?);
        }
        Ok(connect(items, !negated))
    }

    /// `Lexp1 ::= Lexp2 {'and' Lexp2}`
    fn parse_and(&mut self, negated: bool) -> Result<Predicate, ExpressionError> {
        let mut items = vec![self.parse_unary(negated)?];
        while *self.peek() == Token::And {
            self.advance();
            items.push(self.parse_unary(negated)?);
        }
        Ok(connect(items, negated))
    }

    fn parse_unary(&mut self, mut negated: bool) -> Result<Predicate, ExpressionError> {
        if *self.peek() == Token::Not {
            self.advance();
            negated = !negated;
        }
        if *self.peek() == Token::LParen {
            self.advance();
            let inner = self.parse_or(negated)?;
            self.expect(Token::RParen, ")")?;
            return Ok(inner);
        }

        let left = self.parse_value()?;
        let op = match self.advance() {
            Token::Eq => RelOp::Eq,
            Token::Lt => match self.peek() {
                Token::Gt => {
                    self.advance();
                    RelOp::Ne
                }
                Token::Eq => {
                    self.advance();
                    RelOp::Le
                }
                _ => RelOp::Lt,
            },
            Token::Gt => {
                if *self.peek() == Token::Eq {
                    self.advance();
                    RelOp::Ge
                } else {
                    RelOp::Gt
                }
            }
            Token::Not => {
                self.expect(Token::In, "in")?;
                return self.parse_in(!negated, left);
            }
            Token::In => return self.parse_in(negated, left),
            other => return Err(unexpected(&other, "relational operator or in")),
        };

        let right = self.parse_value()?;
        let chained = match op {
            RelOp::Lt | RelOp::Le if *self.peek() == Token::Lt => Some(RelOp::Lt),
            RelOp::Gt | RelOp::Ge if *self.peek() == Token::Gt => Some(RelOp::Gt),
            _ => None,
        };
        let Some(strict) = chained else {
            return Ok(relation(op, left, right, negated));
        };

        self.advance();
        let second = if *self.peek() == Token::Eq {
            self.advance();
            if strict == RelOp::Lt { RelOp::Le } else { RelOp::Ge }
        } else {
            strict
        };
        let third = self.parse_value()?;
        let items = vec![
            relation(op, left, right.clone(), negated),
            relation(second, right, third, negated),
        ];
        Ok(connect(items, negated))
    }

    /// `x in (v1, v2, ...)`; a negated list becomes a conjunction of `<>`.
    fn parse_in(&mut self, negated: bool, left: Operand) -> Result<Predicate, ExpressionError> {
        self.expect(Token::LParen, "(")?;
        let mut items = Vec::new();
        loop {
            let value = self.parse_value()?;
            items.push(relation(RelOp::Eq, left.clone(), value, negated));
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => break,
                other => return Err(unexpected(&other, ")")),
            }
        }
        Ok(connect(items, !negated))
    }

    /// `Val ::= ['-'] Number | FieldName`
    fn parse_value(&mut self) -> Result<Operand, ExpressionError> {
        match self.advance() {
            Token::Minus => match self.advance() {
                Token::Number(v) => Ok(Operand::Constant(-v)),
                other => Err(unexpected(&other, "number")),
            },
            Token::Number(v) => Ok(Operand::Constant(v)),
            Token::Name(name) => Ok(Operand::Field(name)),
            other => Err(unexpected(&other, "number or field name")),
        }
    }
}

fn relation(op: RelOp, left: Operand, right: Operand, negated: bool) -> Predicate {
    let op = if negated { op.negate() } else { op };
    Predicate::Relation(Relation::new(op, left, right))
}

fn connect(items: Vec<Predicate>, alternatives: bool) -> Predicate {
    if alternatives {
        Predicate::any(items)
    } else {
        Predicate::all(items)
    }
}

fn link_term(term: Term, constant: &mut f64, terms: &mut Vec<Term>) {
    if let TermValue::Constant(v) = term.value {
        if term.negated {
            *constant -= v;
        } else {
            *constant += v;
        }
        return;
    }
    let rank = term_rank(&term);
    let at = terms.iter().take_while(|t| term_rank(t) <= rank).count();
    terms.insert(at, term);
}

/// Sums list positive products first, then other positive terms, then the
/// negated ones. Insertion keeps arrival order within a rank, so printing and
/// reparsing yields the same list.
fn term_rank(term: &Term) -> u8 {
    match (term.negated, &term.value) {
        (true, _) => 2,
        (false, TermValue::Product(_)) => 0,
        (false, _) => 1,
    }
}

fn link_factor(
    mut factor: Factor,
    constant: &mut f64,
    factors: &mut Vec<Factor>,
) -> Result<(), ExpressionError> {
    if factor.negated {
        *constant = -*constant;
        factor.negated = false;
    }
    if let FactorValue::Constant(v) = factor.value {
        if factor.reciprocal {
            if v == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            *constant /= v;
        } else {
            *constant *= v;
        }
        return Ok(());
    }
    let rank = factor_rank(&factor);
    let at = factors.iter().take_while(|f| factor_rank(f) <= rank).count();
    factors.insert(at, factor);
    Ok(())
}

/// Products list sums first, then other multiplied factors, then reciprocals.
fn factor_rank(factor: &Factor) -> u8 {
    match (factor.reciprocal, &factor.value) {
        (true, _) => 2,
        (false, FactorValue::Sum(_)) => 0,
        (false, _) => 1,
    }
}
