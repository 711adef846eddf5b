//! The typed command model of a FoodCalc script.
//!
//! A script is an ordered list of [`Command`]s. The reader in [`reader`] turns
//! command files into this model; the compiler consumes it and never sees raw
//! script text again.

use crate::ast::{Predicate, Sum};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod reader;

pub use reader::ScriptReader;

/// One element of a field list: a single name or an inclusive range `a--b`
/// over the declaration order of the food table fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ListItem {
    Field(String),
    Range(String, String),
}

impl fmt::Display for ListItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListItem::Field(name) => write!(f, "{}", name),
            ListItem::Range(from, to) => write!(f, "{}--{}", from, to),
        }
    }
}

/// Separator, decimal point and comment characters given on a file command.
/// `None` falls back to the global `separator` / `decimal point` / `comment`
/// commands and then to [`Dialect::default`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Delimiters {
    pub separator: Option<char>,
    pub decimal_point: Option<char>,
    pub comment: Option<char>,
}

/// Fully resolved delimiters of a data file. A blank separator means that
/// values are separated by any run of whitespace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dialect {
    pub separator: char,
    pub decimal_point: char,
    pub comment: char,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            separator: ',',
            decimal_point: '.',
            comment: ';',
        }
    }
}

impl Dialect {
    /// Resolves `local` over `global`, each unset character falling through.
    pub fn resolve(local: &Delimiters, global: &Delimiters) -> Self {
        let default = Dialect::default();
        Self {
            separator: local
                .separator
                .or(global.separator)
                .unwrap_or(default.separator),
            decimal_point: local
                .decimal_point
                .or(global.decimal_point)
                .unwrap_or(default.decimal_point),
            comment: local.comment.or(global.comment).unwrap_or(default.comment),
        }
    }

    pub fn whitespace_separated(&self) -> bool {
        self.separator.is_whitespace()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileFormat {
    /// Delimited text with a header line of field names.
    Text,
    /// Delimited text without a header; the fields come from `input fields`.
    TextNoHead,
    /// Native 8-byte floating point values, no header.
    BinNative,
}

impl FileFormat {
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "text" => Some(FileFormat::Text),
            "text-no-head" => Some(FileFormat::TextNoHead),
            "bin-native" => Some(FileFormat::BinNative),
            _ => None,
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileFormat::Text => write!(f, "text"),
            FileFormat::TextNoHead => write!(f, "text-no-head"),
            FileFormat::BinNative => write!(f, "bin-native"),
        }
    }
}

/// How recipe ingredients end up in the food table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IngredientMode {
    /// Aggregate all ingredients into one record per recipe.
    #[default]
    Sum,
    /// Keep one record per ingredient.
    Keep,
    /// Keep one record per ingredient and copy matching recipe file columns.
    KeepCopy,
}

impl IngredientMode {
    pub fn keeps_ingredients(self) -> bool {
        matches!(self, IngredientMode::Keep | IngredientMode::KeepCopy)
    }

    pub fn copies_recipe_fields(self) -> bool {
        matches!(self, IngredientMode::Sum | IngredientMode::KeepCopy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetScope {
    /// `set`: computed for every record.
    Normal,
    /// `recipe set`: overrides a food field while plain ingredients are folded into recipes.
    Recipe,
    /// `group set`: computed on each aggregated group.
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CookKind {
    Nutrient,
    Weight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceKind {
    /// `reduce field` and its alias `recipe reduce field`.
    Nutrient,
    /// `weight reduce field`.
    Weight,
    /// `recipe weight reduce field`, applied when a recipe is flushed.
    RecipeWeight,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculateTerm {
    pub multiplier: Option<f64>,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Commands(String),
    Log(String),
    Verbosity(u32),
    Separator(char),
    DecimalPoint(char),
    Comment(char),
    Foods {
        file: String,
        id_field: Option<String>,
        delimiters: Delimiters,
    },
    Groups {
        file: String,
        id_fields: Vec<String>,
        delimiters: Delimiters,
    },
    Input {
        file: String,
        food_field: Option<String>,
        amount_field: Option<String>,
        delimiters: Delimiters,
    },
    InputFields {
        star: bool,
        fields: Vec<String>,
    },
    InputFormat(FileFormat),
    InputScale(f64),
    Output {
        file: String,
        delimiters: Delimiters,
    },
    OutputFields(Vec<ListItem>),
    OutputFormat(FileFormat),
    TextFields(Vec<ListItem>),
    NoCalcFields(Vec<ListItem>),
    NonEdible {
        field: String,
        flag: Option<String>,
    },
    GroupBy(Vec<String>),
    Calculate {
        target: String,
        terms: Vec<CalculateTerm>,
    },
    Set {
        scope: SetScope,
        target: String,
        expression: Sum,
    },
    Where(Predicate),
    If {
        negated: bool,
        field: String,
        values: Vec<f64>,
    },
    Cook {
        kind: CookKind,
        cook_type: String,
        field: String,
        targets: Vec<ListItem>,
    },
    CookField {
        field: String,
        types: Vec<String>,
    },
    Reduce {
        kind: ReduceKind,
        field: String,
        targets: Vec<ListItem>,
    },
    Recipes {
        file: String,
        recipe_id: Option<String>,
        food_id: Option<String>,
        amount: Option<String>,
        delimiters: Delimiters,
    },
    RecipeSum {
        sum: f64,
        fields: Vec<String>,
    },
    Ingredients(IngredientMode),
    Transpose {
        field: String,
        count: usize,
        fields: Vec<ListItem>,
    },
    Blip(u64),
    Save(String),
}

impl Command {
    /// The canonical keyword, used in messages and for duplicate detection.
    /// Aliases (`food weight`, `recipe reduce field`) map to their primary name.
    pub fn keyword(&self) -> &'static str {
        match self {
            Command::Commands(_) => "commands",
            Command::Log(_) => "log",
            Command::Verbosity(_) => "verbosity",
            Command::Separator(_) => "separator",
            Command::DecimalPoint(_) => "decimal point",
            Command::Comment(_) => "comment",
            Command::Foods { .. } => "foods",
            Command::Groups { .. } => "groups",
            Command::Input { .. } => "input",
            Command::InputFields { star: false, .. } => "input fields",
            Command::InputFields { star: true, .. } => "input *fields",
            Command::InputFormat(_) => "input format",
            Command::InputScale(_) => "input scale",
            Command::Output { .. } => "output",
            Command::OutputFields(_) => "output fields",
            Command::OutputFormat(_) => "output format",
            Command::TextFields(_) => "text fields",
            Command::NoCalcFields(_) => "no-calc fields",
            Command::NonEdible { .. } => "non-edible field",
            Command::GroupBy(_) => "group by",
            Command::Calculate { .. } => "calculate",
            Command::Set {
                scope: SetScope::Normal,
                ..
            } => "set",
            Command::Set {
                scope: SetScope::Recipe,
                ..
            } => "recipe set",
            Command::Set {
                scope: SetScope::Group,
                ..
            } => "group set",
            Command::Where(_) => "where",
            Command::If { negated: false, .. } => "if",
            Command::If { negated: true, .. } => "if not",
            Command::Cook {
                kind: CookKind::Nutrient,
                ..
            } => "cook",
            Command::Cook {
                kind: CookKind::Weight,
                ..
            } => "weight cook",
            Command::CookField { .. } => "cook field",
            Command::Reduce {
                kind: ReduceKind::Nutrient,
                ..
            } => "reduce field",
            Command::Reduce {
                kind: ReduceKind::Weight,
                ..
            } => "weight reduce field",
            Command::Reduce {
                kind: ReduceKind::RecipeWeight,
                ..
            } => "recipe weight reduce field",
            Command::Recipes { .. } => "recipes",
            Command::RecipeSum { .. } => "recipe sum",
            Command::Ingredients(_) => "ingredients",
            Command::Transpose { .. } => "transpose",
            Command::Blip(_) => "blip",
            Command::Save(_) => "save",
        }
    }

    /// Whether the command may appear at most once in a script.
    pub fn is_single(&self) -> bool {
        !matches!(
            self,
            Command::Commands(_)
                | Command::Foods { .. }
                | Command::Groups { .. }
                | Command::Cook { .. }
                | Command::Reduce { .. }
                | Command::TextFields(_)
                | Command::NoCalcFields(_)
                | Command::Calculate { .. }
                | Command::Set { .. }
                | Command::Recipes { .. }
                | Command::If { .. }
                | Command::Transpose { .. }
        )
    }
}

/// Commands a script must contain.
pub const REQUIRED_COMMANDS: [&str; 3] = ["foods", "input", "output"];

/// A parsed script in command order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub commands: Vec<Command>,
}

impl Script {
    pub fn new(commands: Vec<Command>) -> Self {
        Self { commands }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.commands.iter().any(|c| c.keyword() == keyword)
    }

    /// Global delimiter defaults set by the `separator`, `decimal point` and
    /// `comment` commands.
    pub fn global_delimiters(&self) -> Delimiters {
        let mut delimiters = Delimiters::default();
        for command in &self.commands {
            match command {
                Command::Separator(c) => delimiters.separator = Some(*c),
                Command::DecimalPoint(c) => delimiters.decimal_point = Some(*c),
                Command::Comment(c) => delimiters.comment = Some(*c),
                _ => {}
            }
        }
        delimiters
    }
}
