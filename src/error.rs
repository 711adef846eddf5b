use thiserror::Error;
use tracing::{error, warn};

/// Errors raised while reading an arithmetic or boolean expression embedded in
/// a `set`- or `where`-class command.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("Found {found} when expecting a {expected}")]
    UnexpectedToken { found: String, expected: String },

    #[error("Illegal character '{0}' in expression")]
    InvalidCharacter(char),

    #[error("Unterminated quoted field name")]
    UnterminatedQuote,

    #[error("Division by the constant zero")]
    DivisionByZero,
}

/// Command-level syntax errors found while reading a script.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScriptError {
    #[error("Unknown command '{command}' at line {line} of file {file}")]
    UnknownCommand {
        command: String,
        line: usize,
        file: String,
    },

    #[error("Command used more than once in command '{command}' at line {line} of file {file}")]
    DuplicateCommand {
        command: String,
        line: usize,
        file: String,
    },

    #[error("Too many arguments in command '{command}' at line {line} of file {file}")]
    TooManyArguments {
        command: String,
        line: usize,
        file: String,
    },

    #[error("Too few arguments in command '{command}' at line {line} of file {file}")]
    TooFewArguments {
        command: String,
        line: usize,
        file: String,
    },

    #[error("{message} in command '{command}' at line {line} of file {file}")]
    BadArgument {
        command: String,
        message: String,
        line: usize,
        file: String,
    },

    #[error("{source} in command '{command}' at line {line} of file {file}")]
    Expression {
        command: String,
        line: usize,
        file: String,
        source: ExpressionError,
    },

    #[error("Required command '{0}' not specified")]
    MissingCommand(String),
}

/// Semantic errors found while resolving fields and lowering rules into a plan.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Field '{name}' not found {context}")]
    UnknownField { name: String, context: String },

    #[error("Field '{name}' listed more than once {context}")]
    DuplicateField { name: String, context: String },

    #[error("{kind} field '{name}' {reason}")]
    Conflict {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("{0}")]
    IllegalCombination(String),

    #[error("Bad argument to command '{command}': {message}")]
    InvalidArgument { command: String, message: String },

    #[error("The field '{name}' used in {usage} must not be a no-calc field")]
    NoCalcTarget { name: String, usage: String },

    #[error("The field '{name}' can not be a text field because it is used {usage}")]
    TextField { name: String, usage: String },

    #[error("Output field '{0}' listed more than once")]
    OutputListedTwice(String),

    #[error("Output field '{0}' must not be a text field")]
    OutputText(String),

    #[error("Can not output field '{0}' because it is a no-calc field and not a group by field")]
    OutputNoCalc(String),

    #[error("Cook type '{0}' not defined by any cook command")]
    UnknownCookType(String),

    #[error("File {file} has too few fields, at least {required} are needed")]
    TooFewFields { file: String, required: usize },

    #[error("Field '{0}' has no position in the compiled plan")]
    Unplaced(String),
}

/// Problems with a single data line. The line is skipped and processing continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("Bad food id value {value} in line {line} of file {file}")]
    BadFoodId { value: f64, line: usize, file: String },

    #[error("Bad group id value {value} in line {line} of file {file}")]
    BadGroupId { value: f64, line: usize, file: String },

    #[error("Group id allready used in line {line} of file {file}")]
    DuplicateGroup { line: usize, file: String },

    #[error("Invalid group id {key} used by food {food} (groups file {file})")]
    InvalidGroupKey { key: i64, food: i64, file: String },

    #[error("Food id {id} not found in food table at line {line} of file {file}")]
    FoodNotFound { id: i64, line: usize, file: String },

    #[error("You can not cook a recipe (food id {id}) at line {line} of file {file}")]
    CookRecipe { id: i64, line: usize, file: String },

    #[error("Cook id {id} not defined at line {line} of file {file}")]
    UnknownCookId { id: i64, line: usize, file: String },

    #[error("Bad recipe id value {id} in file {file}")]
    BadRecipeId { id: i64, file: String },

    #[error("Recipe sum {sum} not positive for recipe {id} in file {file}")]
    NonPositiveRecipeSum { sum: f64, id: i64, file: String },

    #[error("Recipe id {id} allready in food table (file {file})")]
    DuplicateRecipe { id: i64, file: String },

    #[error("{message} in line {line} of file {file}")]
    Malformed {
        message: String,
        line: usize,
        file: String,
    },

    #[error("Unexpected end of binary file {file}")]
    UnexpectedEof { file: String },
}

/// Errors that stop the run immediately.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FatalError {
    #[error("Too many errors!")]
    TooManyErrors,

    #[error("Aborting after {phase}: {errors} error(s)")]
    PhaseFailed { phase: String, errors: usize },

    #[error("File {file} not sorted on the group by fields at line {line}")]
    Unsorted { file: String, line: usize },

    #[error("Saved state is corrupt: {0}")]
    CorruptState(String),

    #[error("Saved state was written by {identity} {major}.{minor} and can not be read")]
    IncompatibleState {
        identity: String,
        major: u16,
        minor: u16,
    },

    #[error("Could not open file {file}: {message}")]
    Open { file: String, message: String },

    #[error("I/O error on {target}: {message}")]
    Io { target: String, message: String },
}

/// The union of every error the crate produces.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FoodCalcError {
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Fatal(#[from] FatalError),
}

/// Batch error reporting.
///
/// Low-severity problems are logged and counted instead of stopping the run, so
/// a single pass over a script or data file reports as many mistakes as
/// possible. Once more than [`Diagnostics::ERROR_LIMIT`] errors have been
/// recorded the collector escalates to [`FatalError::TooManyErrors`].
#[derive(Debug, Default)]
pub struct Diagnostics {
    errors: Vec<FoodCalcError>,
    warnings: Vec<String>,
}

impl Diagnostics {
    pub const ERROR_LIMIT: usize = 20;

    pub fn new() -> Self {
        Self::default()
    }

    /// Records a non-fatal error. Fails only when the error cap is exceeded.
    pub fn record(&mut self, err: impl Into<FoodCalcError>) -> Result<(), FatalError> {
        let err = err.into();
        error!("{}", err);
        self.errors.push(err);
        if self.errors.len() > Self::ERROR_LIMIT {
            return Err(FatalError::TooManyErrors);
        }
        Ok(())
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.warnings.push(message);
    }

    /// Aborts at a phase boundary if anything was recorded so far.
    pub fn checkpoint(&self, phase: &str) -> Result<(), FatalError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(FatalError::PhaseFailed {
                phase: phase.to_string(),
                errors: self.errors.len(),
            })
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn errors(&self) -> &[FoodCalcError] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}
