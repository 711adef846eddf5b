use clap::Parser;
use foodcalc::prelude::*;
use std::fs::File;
use std::sync::Mutex;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// Compiles food calculation scripts and runs them against an input file
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Command files, read in order
    command_files: Vec<String>,

    /// Log level: 0 warnings only, 1-49 info, 50-79 debug, 80 and above trace
    #[arg(short, long)]
    verbosity: Option<u32>,

    /// Read the input from this file instead of the one named by `input:`
    #[arg(short, long)]
    input: Option<String>,

    /// Write the output to this file instead of the one named by `output:`
    #[arg(short, long)]
    output: Option<String>,

    /// Write the log to this file instead of stderr
    #[arg(short, long)]
    log: Option<String>,

    /// Run a state saved by the `save:` command
    #[arg(short, long)]
    saved: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    let start = Instant::now();
    let mut diag = Diagnostics::new();

    if cli.saved.is_some() && !cli.command_files.is_empty() {
        exit_with_error("A saved state can not be combined with command files");
    }

    let script = if cli.saved.is_none() {
        if cli.command_files.is_empty() {
            exit_with_error("No command files given. Usage: foodcalc [options] <command files>");
        }
        Some(read_script(&cli.command_files, &mut diag))
    } else {
        None
    };

    let (script_log, script_verbosity) = script.as_ref().map_or((None, None), script_logging);
    init_logging(
        cli.log.clone().or(script_log),
        cli.verbosity.or(script_verbosity),
    );

    let provider = FileProvider::new();
    let session = Session::new(&provider)
        .with_input(cli.input.clone())
        .with_output(cli.output.clone());

    let result = match (&script, &cli.saved) {
        (Some(script), _) => session.run_script(script, &mut diag),
        (None, Some(path)) => SavedState::from_file(path)
            .map_err(FoodCalcError::from)
            .and_then(|state| session.run_saved(state, &mut diag)),
        (None, None) => exit_with_error("Nothing to run"),
    };

    match result {
        Ok(Outcome::Saved { path, foods }) => {
            tracing::info!("Saved {} foods to {} in {:?}", foods, path, start.elapsed());
        }
        Ok(Outcome::Ran { lines, written }) => {
            tracing::info!(
                "Processed {} lines into {} records in {:?}",
                lines,
                written,
                start.elapsed()
            );
        }
        Err(e) => exit_with_error(&e.to_string()),
    }

    if diag.error_count() > 0 {
        eprintln!("{} error(s) reported", diag.error_count());
        std::process::exit(1);
    }
}

/// Reads every command file. Logging is not set up yet, so problems are
/// printed directly.
fn read_script(files: &[String], diag: &mut Diagnostics) -> Script {
    let mut reader = ScriptReader::new();
    let mut result = Ok(0);
    for file in files {
        result = reader.read_file(file, diag);
        if result.is_err() {
            break;
        }
    }
    match result.and_then(|_| reader.finish(diag)) {
        Ok(script) => script,
        Err(e) => {
            for error in diag.errors() {
                eprintln!("{}", error);
            }
            exit_with_error(&e.to_string())
        }
    }
}

fn script_logging(script: &Script) -> (Option<String>, Option<u32>) {
    let mut log = None;
    let mut verbosity = None;
    for command in script.iter() {
        match command {
            Command::Log(file) => log = Some(file.clone()),
            Command::Verbosity(level) => verbosity = Some(*level),
            _ => {}
        }
    }
    (log, verbosity)
}

fn level_for(verbosity: u32) -> &'static str {
    match verbosity {
        0 => "warn",
        1..=49 => "info",
        50..=79 => "debug",
        _ => "trace",
    }
}

fn init_logging(log: Option<String>, verbosity: Option<u32>) {
    let filter = match verbosity {
        Some(level) => EnvFilter::new(level_for(level)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let writer = match log {
        Some(path) => match File::create(&path) {
            Ok(file) => BoxMakeWriter::new(Mutex::new(file)),
            Err(e) => exit_with_error(&format!("Failed to open log file '{}': {}", path, e)),
        },
        None => BoxMakeWriter::new(std::io::stderr),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .init();
}

fn exit_with_error(message: &str) -> ! {
    eprintln!("\nError: {}", message);
    std::process::exit(1);
}
