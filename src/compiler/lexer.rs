use crate::error::ExpressionError;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Name(String),
    Eq,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Gt,
    Lt,
    Comma,
    And,
    Or,
    Not,
    In,
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(v) => write!(f, "{}", v),
            Token::Name(n) => write!(f, "{}", n),
            Token::Eq => write!(f, "="),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Gt => write!(f, ">"),
            Token::Lt => write!(f, "<"),
            Token::Comma => write!(f, ","),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::In => write!(f, "in"),
            Token::End => write!(f, "end of line"),
        }
    }
}

/// Characters that are neither part of a name nor a valid symbol.
const ILLEGAL: &str = "!%&?.;:";
const SYMBOLS: &str = "=+-*/()><,\"";

fn is_name_char(c: char) -> bool {
    !c.is_whitespace() && !SYMBOLS.contains(c) && !ILLEGAL.contains(c)
}

/// Splits one expression line into tokens. Names are lowercased.
pub struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
        }
    }

    pub fn tokenize(text: &str) -> Result<Vec<Token>, ExpressionError> {
        let mut lexer = Lexer::new(text);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let done = token == Token::End;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, ExpressionError> {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}

        let Some(&c) = self.chars.peek() else {
            return Ok(Token::End);
        };

        if c.is_ascii_digit() {
            return Ok(Token::Number(self.number()));
        }
        if c == '"' {
            self.chars.next();
            return self.quoted().map(Token::Name);
        }
        if ILLEGAL.contains(c) {
            return Err(ExpressionError::InvalidCharacter(c));
        }
        if is_name_char(c) {
            let mut name = String::new();
            while let Some(c) = self.chars.next_if(|c| is_name_char(*c)) {
                name.push(c);
            }
            let name = name.to_lowercase();
            return Ok(match name.as_str() {
                "and" => Token::And,
                "or" => Token::Or,
                "not" => Token::Not,
                "in" => Token::In,
                _ => Token::Name(name),
            });
        }

        self.chars.next();
        Ok(match c {
            '=' => Token::Eq,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '>' => Token::Gt,
            '<' => Token::Lt,
            ',' => Token::Comma,
            other => return Err(ExpressionError::InvalidCharacter(other)),
        })
    }

    fn number(&mut self) -> f64 {
        let mut text = String::new();
        while let Some(d) = self.chars.next_if(|c| c.is_ascii_digit()) {
            text.push(d);
        }
        if self.chars.next_if_eq(&'.').is_some() {
            text.push('.');
            while let Some(d) = self.chars.next_if(|c| c.is_ascii_digit()) {
                text.push(d);
            }
        }
        // digits with at most one point always parse
        text.parse().unwrap_or(0.0)
    }

    fn quoted(&mut self) -> Result<String, ExpressionError> {
        let mut name = String::new();
        loop {
            match self.chars.next() {
                None => return Err(ExpressionError::UnterminatedQuote),
                Some('"') => {
                    if self.chars.next_if_eq(&'"').is_some() {
                        name.push('"');
                    } else {
                        return Ok(name.to_lowercase());
                    }
                }
                Some(c) => name.push(c),
            }
        }
    }
}
