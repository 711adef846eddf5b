use super::{
    CalculateTerm, Command, CookKind, Delimiters, FileFormat, IngredientMode, ListItem,
    REQUIRED_COMMANDS, ReduceKind, Script, SetScope,
};
use crate::compiler::parsing::{parse_assignment, parse_predicate};
use crate::error::{Diagnostics, ExpressionError, FatalError, ScriptError};
use ahash::AHashSet;
use std::collections::VecDeque;
use std::fs;
use tracing::{debug, info};

#[cfg(feature = "debug-tools")]
use crate::ast::DisplayExpression;

/// Reads command files into a [`Script`].
///
/// Each logical line is one command `keyword: arguments`. A physical line
/// whose first non-blank character is `=` continues the previous line, and
/// lines starting with `;` are comments. Syntax errors are recorded in the
/// [`Diagnostics`] and reading resumes at the next line.
#[derive(Debug, Default)]
pub struct ScriptReader {
    commands: Vec<Command>,
    seen_single: AHashSet<&'static str>,
    includes: VecDeque<String>,
}

struct LogicalLine {
    number: usize,
    text: String,
}

impl ScriptReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a command file from disk. Failing to open it is fatal.
    pub fn read_file(&mut self, path: &str, diag: &mut Diagnostics) -> Result<usize, FatalError> {
        let text = fs::read_to_string(path).map_err(|e| FatalError::Open {
            file: path.to_string(),
            message: e.to_string(),
        })?;
        self.read_str(path, &text, diag)
    }

    /// Reads commands from `text`, reporting positions against `file`.
    pub fn read_str(
        &mut self,
        file: &str,
        text: &str,
        diag: &mut Diagnostics,
    ) -> Result<usize, FatalError> {
        let mut count = 0;
        for line in logical_lines(text) {
            match self.read_command(file, &line) {
                Ok(command) => {
                    if let Command::Commands(include) = &command {
                        self.includes.push_back(include.clone());
                    }
                    self.commands.push(command);
                    count += 1;
                }
                Err(e) => diag.record(e)?,
            }
        }
        info!("Read {} commands from file {}", count, file);
        Ok(count)
    }

    /// Reads every file named by a `commands` command, then checks that the
    /// required commands are present.
    pub fn finish(mut self, diag: &mut Diagnostics) -> Result<Script, FatalError> {
        while let Some(include) = self.includes.pop_front() {
            if diag.error_count() > 0 {
                break;
            }
            match fs::read_to_string(&include) {
                Ok(text) => {
                    self.read_str(&include, &text, diag)?;
                }
                Err(e) => diag.record(FatalError::Open {
                    file: include.clone(),
                    message: e.to_string(),
                })?,
            }
        }
        diag.checkpoint("reading commands")?;

        for required in REQUIRED_COMMANDS {
            if !self.commands.iter().any(|c| c.keyword() == required) {
                diag.record(ScriptError::MissingCommand(required.to_string()))?;
            }
        }
        diag.checkpoint("checking commands")?;
        Ok(Script::new(self.commands))
    }

    fn read_command(&mut self, file: &str, line: &LogicalLine) -> Result<Command, ScriptError> {
        let (head, rest) = match line.text.split_once(':') {
            Some(split) => split,
            None => (line.text.as_str(), ""),
        };
        let keyword = head
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();

        if !line.text.contains(':') {
            return Err(ScriptError::UnknownCommand {
                command: keyword,
                line: line.number,
                file: file.to_string(),
            });
        }
        let mut args = Args::new(rest, &keyword, line.number, file);

        let command = match keyword.as_str() {
            "commands" => Command::Commands(args.required_str()?),
            "log" => Command::Log(args.required_str()?),
            "verbosity" => Command::Verbosity(args.required_num()?.max(0.0) as u32),
            "separator" => Command::Separator(args.required_char()?),
            "decimal point" => Command::DecimalPoint(args.required_char()?),
            "comment" => Command::Comment(args.required_char()?),
            "foods" => Command::Foods {
                file: args.required_str()?,
                id_field: args.optional_name()?,
                delimiters: args.delimiters(2)?,
            },
            "groups" => Command::Groups {
                file: args.required_str()?,
                id_fields: args.required_names()?,
                delimiters: args.delimiters(3)?,
            },
            "input" => Command::Input {
                file: args.required_str()?,
                food_field: args.optional_name()?,
                amount_field: args.optional_name()?,
                delimiters: args.delimiters(3)?,
            },
            "input fields" | "input *fields" => Command::InputFields {
                star: keyword.contains('*'),
                fields: args.required_names()?,
            },
            "input format" => Command::InputFormat(args.format()?),
            "input scale" => Command::InputScale(args.required_num()?),
            "output" => Command::Output {
                file: args.required_str()?,
                delimiters: args.delimiters(2)?,
            },
            "output fields" => Command::OutputFields(args.required_list()?),
            "output format" => Command::OutputFormat(args.format()?),
            "text fields" => Command::TextFields(args.required_list()?),
            "no-calc fields" => Command::NoCalcFields(args.required_list()?),
            "non-edible field" => Command::NonEdible {
                field: args.required_name()?,
                flag: args.optional_name()?,
            },
            "group by" => Command::GroupBy(args.required_names()?),
            "calculate" => Command::Calculate {
                target: args.required_name()?,
                terms: args.calculate_terms()?,
            },
            "set" | "recipe set" | "group set" => {
                let scope = match keyword.as_str() {
                    "set" => SetScope::Normal,
                    "recipe set" => SetScope::Recipe,
                    _ => SetScope::Group,
                };
                let (target, expression) =
                    parse_assignment(&args.rest()).map_err(|e| args.expression(e))?;
                debug!("{}: {} = {}", keyword, target, expression);
                #[cfg(feature = "debug-tools")]
                debug!("\n{}", DisplayExpression { expr: &expression });
                Command::Set {
                    scope,
                    target,
                    expression,
                }
            }
            "where" => {
                let predicate = parse_predicate(&args.rest()).map_err(|e| args.expression(e))?;
                debug!("where: {}", predicate);
                Command::Where(predicate)
            }
            "if" | "if not" => Command::If {
                negated: keyword == "if not",
                field: args.required_name()?,
                values: args.numbers()?,
            },
            "cook" | "weight cook" => Command::Cook {
                kind: if keyword == "cook" {
                    CookKind::Nutrient
                } else {
                    CookKind::Weight
                },
                cook_type: args.required_name()?,
                field: args.required_name()?,
                targets: args.required_list()?,
            },
            "cook field" => Command::CookField {
                field: args.required_name()?,
                types: args.required_names()?,
            },
            "reduce field" | "recipe reduce field" | "weight reduce field"
            | "recipe weight reduce field" => Command::Reduce {
                kind: match keyword.as_str() {
                    "weight reduce field" => ReduceKind::Weight,
                    "recipe weight reduce field" => ReduceKind::RecipeWeight,
                    _ => ReduceKind::Nutrient,
                },
                field: args.required_name()?,
                targets: args.required_list()?,
            },
            "recipes" => Command::Recipes {
                file: args.required_str()?,
                recipe_id: args.optional_name()?,
                food_id: args.optional_name()?,
                amount: args.optional_name()?,
                delimiters: args.delimiters(3)?,
            },
            "recipe sum" | "food weight" => Command::RecipeSum {
                sum: args.required_num()?,
                fields: args.optional_names()?,
            },
            "ingredients" => {
                let word = args.required_name()?;
                Command::Ingredients(match word.as_str() {
                    "sum" => IngredientMode::Sum,
                    "keep" => IngredientMode::Keep,
                    "keepx" => IngredientMode::KeepCopy,
                    _ => return Err(args.bad(&format!("Unknown ingredients value '{}'", word))),
                })
            }
            "transpose" => {
                let field = args.required_name()?;
                let count = args.required_num()?;
                if count < 1.0 {
                    return Err(args.bad("Bad number of groups"));
                }
                Command::Transpose {
                    field,
                    count: count as usize,
                    fields: args.required_list()?,
                }
            }
            "blip" => Command::Blip(args.required_num()?.max(0.0) as u64),
            "save" => Command::Save(args.required_str()?),
            _ => {
                return Err(ScriptError::UnknownCommand {
                    command: keyword.clone(),
                    line: line.number,
                    file: file.to_string(),
                });
            }
        };
        args.finish()?;

        if command.is_single() && !self.seen_single.insert(command.keyword()) {
            return Err(ScriptError::DuplicateCommand {
                command: command.keyword().to_string(),
                line: line.number,
                file: file.to_string(),
            });
        }
        Ok(command)
    }
}

fn logical_lines(text: &str) -> Vec<LogicalLine> {
    let mut lines: Vec<LogicalLine> = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let trimmed = raw.trim_start();
        if trimmed.is_empty() || trimmed.starts_with(';') {
            continue;
        }
        if let Some(continued) = trimmed.strip_prefix('=') {
            if let Some(last) = lines.last_mut() {
                last.text.push(' ');
                last.text.push_str(continued);
                continue;
            }
        }
        lines.push(LogicalLine {
            number: index + 1,
            text: raw.to_string(),
        });
    }
    lines
}

/// A cursor over the arguments of one command.
struct Args<'a> {
    chars: Vec<char>,
    pos: usize,
    command: &'a str,
    line: usize,
    file: &'a str,
}

impl<'a> Args<'a> {
    fn new(text: &str, command: &'a str, line: usize, file: &'a str) -> Self {
        let mut args = Self {
            chars: text.chars().collect(),
            pos: 0,
            command,
            line,
            file,
        };
        args.skip_space();
        args
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_space(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), None | Some(';'))
    }

    fn bad(&self, message: &str) -> ScriptError {
        ScriptError::BadArgument {
            command: self.command.to_string(),
            message: message.to_string(),
            line: self.line,
            file: self.file.to_string(),
        }
    }

    fn expression(&self, source: ExpressionError) -> ScriptError {
        ScriptError::Expression {
            command: self.command.to_string(),
            line: self.line,
            file: self.file.to_string(),
            source,
        }
    }

    fn too_few(&self) -> ScriptError {
        ScriptError::TooFewArguments {
            command: self.command.to_string(),
            line: self.line,
            file: self.file.to_string(),
        }
    }

    fn finish(&mut self) -> Result<(), ScriptError> {
        self.skip_space();
        if self.at_end() {
            Ok(())
        } else {
            Err(ScriptError::TooManyArguments {
                command: self.command.to_string(),
                line: self.line,
                file: self.file.to_string(),
            })
        }
    }

    /// One token: a quoted string with `""` escapes, or a run of characters
    /// ending at a comma, whitespace, a comment or `--`.
    fn token(&mut self) -> Result<Option<String>, ScriptError> {
        self.skip_space();
        if self.at_end() {
            return Ok(None);
        }
        let mut text = String::new();
        if self.peek() == Some('"') {
            self.pos += 1;
            loop {
                match self.peek() {
                    None => return Err(self.bad("Unterminated quoted argument")),
                    Some('"') if self.peek_at(1) == Some('"') => {
                        text.push('"');
                        self.pos += 2;
                    }
                    Some('"') => {
                        self.pos += 1;
                        break;
                    }
                    Some(c) => {
                        text.push(c);
                        self.pos += 1;
                    }
                }
            }
        } else {
            while let Some(c) = self.peek() {
                if c == ',' || c == ';' || c.is_whitespace() {
                    break;
                }
                if c == '-' && self.peek_at(1) == Some('-') {
                    break;
                }
                text.push(c);
                self.pos += 1;
            }
            if text.is_empty() {
                return Err(self.bad("Error in argument"));
            }
        }
        Ok(Some(text))
    }

    /// Consumes an optional comma between two arguments.
    fn argument_separator(&mut self) {
        self.skip_space();
        if self.peek() == Some(',') {
            self.pos += 1;
        }
    }

    fn optional_str(&mut self) -> Result<Option<String>, ScriptError> {
        let token = self.token()?;
        self.argument_separator();
        Ok(token)
    }

    fn required_str(&mut self) -> Result<String, ScriptError> {
        self.optional_str()?.ok_or_else(|| self.too_few())
    }

    fn optional_name(&mut self) -> Result<Option<String>, ScriptError> {
        Ok(self.optional_str()?.map(|s| s.to_lowercase()))
    }

    fn required_name(&mut self) -> Result<String, ScriptError> {
        self.optional_name()?.ok_or_else(|| self.too_few())
    }

    fn optional_char(&mut self) -> Result<Option<char>, ScriptError> {
        let Some(token) = self.optional_str()? else {
            return Ok(None);
        };
        match token.to_lowercase().as_str() {
            "space" => return Ok(Some(' ')),
            "tab" => return Ok(Some('\t')),
            _ => {}
        }
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Some(c)),
            _ => Err(self.bad("Argument must be a single character")),
        }
    }

    fn required_char(&mut self) -> Result<char, ScriptError> {
        self.optional_char()?.ok_or_else(|| self.too_few())
    }

    fn delimiters(&mut self, count: usize) -> Result<Delimiters, ScriptError> {
        let mut delimiters = Delimiters::default();
        if count >= 1 {
            delimiters.separator = self.optional_char()?;
        }
        if count >= 2 {
            delimiters.decimal_point = self.optional_char()?;
        }
        if count >= 3 {
            delimiters.comment = self.optional_char()?;
        }
        Ok(delimiters)
    }

    fn required_num(&mut self) -> Result<f64, ScriptError> {
        let token = self.required_str()?;
        parse_number(&token).ok_or_else(|| self.bad("Error in numeric argument"))
    }

    fn format(&mut self) -> Result<FileFormat, ScriptError> {
        let word = self.required_name()?;
        FileFormat::parse(&word).ok_or_else(|| self.bad(&format!("Unknown format '{}'", word)))
    }

    /// A comma separated list in which `a--b` denotes a range.
    fn list(&mut self) -> Result<Option<Vec<ListItem>>, ScriptError> {
        let mut items = Vec::new();
        loop {
            let Some(first) = self.token()? else {
                if items.is_empty() {
                    return Ok(None);
                }
                return Err(self.bad("Error in list"));
            };
            let first = first.to_lowercase();
            self.skip_space();
            if self.peek() == Some('-') && self.peek_at(1) == Some('-') {
                self.pos += 2;
                let last = self
                    .token()?
                    .ok_or_else(|| self.bad("Error in range of fields"))?;
                items.push(ListItem::Range(first, last.to_lowercase()));
                self.skip_space();
            } else {
                items.push(ListItem::Field(first));
            }
            if self.peek() == Some(',') {
                self.pos += 1;
            } else {
                return Ok(Some(items));
            }
        }
    }

    fn required_list(&mut self) -> Result<Vec<ListItem>, ScriptError> {
        self.list()?.ok_or_else(|| self.too_few())
    }

    fn optional_names(&mut self) -> Result<Vec<String>, ScriptError> {
        let mut names = Vec::new();
        for item in self.list()?.unwrap_or_default() {
            match item {
                ListItem::Field(name) => names.push(name),
                ListItem::Range(..) => return Err(self.bad("Range of fields not allowed")),
            }
        }
        Ok(names)
    }

    fn required_names(&mut self) -> Result<Vec<String>, ScriptError> {
        let names = self.optional_names()?;
        if names.is_empty() {
            return Err(self.too_few());
        }
        Ok(names)
    }

    fn numbers(&mut self) -> Result<Vec<f64>, ScriptError> {
        self.required_names()?
            .iter()
            .map(|v| parse_number(v).ok_or_else(|| self.bad("Error in numeric argument")))
            .collect()
    }

    /// `name, [multiplier,] field, ...`: a list item starting with a digit
    /// scales the field that follows it.
    fn calculate_terms(&mut self) -> Result<Vec<CalculateTerm>, ScriptError> {
        let items = self.required_names()?;
        let mut terms = Vec::new();
        let mut items = items.into_iter();
        while let Some(item) = items.next() {
            if item.starts_with(|c: char| c.is_ascii_digit()) {
                let multiplier = parse_number(&item).unwrap_or(0.0);
                if multiplier == 0.0 {
                    return Err(self.bad(&format!("Bad multiplier {}", item)));
                }
                let field = items
                    .next()
                    .ok_or_else(|| self.bad("Field name missing after multiplier"))?;
                terms.push(CalculateTerm {
                    multiplier: Some(multiplier),
                    field,
                });
            } else {
                terms.push(CalculateTerm {
                    multiplier: None,
                    field: item,
                });
            }
        }
        Ok(terms)
    }

    /// The rest of the line, for commands with an expression argument.
    fn rest(&mut self) -> String {
        let mut text = String::new();
        let mut quoted = false;
        while let Some(c) = self.peek() {
            if c == '"' {
                quoted = !quoted;
            }
            if c == ';' && !quoted {
                break;
            }
            text.push(c);
            self.pos += 1;
        }
        text
    }
}

/// Parses `[+|-] digits [. digits]`, the number syntax of command arguments.
pub(crate) fn parse_number(text: &str) -> Option<f64> {
    let body = text.strip_prefix(['+', '-']).unwrap_or(text);
    if body.is_empty() || !body.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    if body.chars().filter(|c| *c == '.').count() > 1 {
        return None;
    }
    let value: f64 = body.parse().ok().or_else(|| (body == ".").then_some(0.0))?;
    Some(if text.starts_with('-') { -value } else { value })
}

#[cfg(test)]
mod reader_tests {
    use super::*;

    #[test]
    fn test_continuation_lines_join() {
        let lines = logical_lines("output fields: a,\n= b, c\n; comment\n\nfoods: f.txt");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "output fields: a,  b, c");
        assert_eq!(lines[1].number, 5);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("12.5"), Some(12.5));
        assert_eq!(parse_number("-3"), Some(-3.0));
        assert_eq!(parse_number("1e5"), None);
        assert_eq!(parse_number(""), None);
    }
}
