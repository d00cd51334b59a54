//! Ember CLI
//!
//! `ember` with no arguments starts the REPL; `ember <path>` runs a
//! script. Exit codes follow the sysexits convention: 65 for a compile
//! error, 70 for a runtime error, 74 when the file cannot be read.

mod repl;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

use clap::{CommandFactory, Parser};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use ember_runtime::{Engine, EngineConfig, InterpretError};

const EXIT_COMPILE_ERROR: i32 = 65;
const EXIT_RUNTIME_ERROR: i32 = 70;
const EXIT_IO_ERROR: i32 = 74;

#[derive(Parser)]
#[command(name = "ember")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "The Ember language interpreter", long_about = None)]
struct Cli {
    /// Script to execute; starts the REPL when omitted.
    path: Option<PathBuf>,

    /// Trace each instruction as it executes (very verbose).
    #[arg(long)]
    trace: bool,

    /// Run a garbage collection before every allocation.
    #[arg(long)]
    stress_gc: bool,

    /// Generate shell completions and exit.
    #[arg(long, value_enum, value_name = "SHELL")]
    completions: Option<Shell>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.trace);

    if let Some(shell) = cli.completions {
        let mut command = Cli::command();
        generate(shell, &mut command, "ember", &mut io::stdout());
        return;
    }

    let config = EngineConfig::new()
        .with_trace_execution(cli.trace)
        .with_stress_gc(cli.stress_gc);

    match cli.path {
        Some(path) => process::exit(run_file(&path, config)),
        None => repl::run(config),
    }
}

/// RUST_LOG wins when set; otherwise --trace opens the spigot.
fn init_tracing(trace: bool) {
    let default_filter = if trace { "trace" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Execute a script file and map the outcome to an exit code.
fn run_file(path: &Path, config: EngineConfig) -> i32 {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Could not read \"{}\": {e}.", path.display());
            return EXIT_IO_ERROR;
        }
    };
    let mut engine = Engine::new(config);
    match engine.interpret(&source) {
        Ok(()) => 0,
        Err(InterpretError::Compile(_)) => EXIT_COMPILE_ERROR,
        Err(InterpretError::Runtime(_)) => EXIT_RUNTIME_ERROR,
    }
}
