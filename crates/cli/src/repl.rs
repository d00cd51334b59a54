//! Interactive REPL
//!
//! One engine per session, so globals and functions defined on earlier
//! lines stay available. Errors are printed and the loop keeps going.
//! History persists in the home directory across sessions.

use std::path::PathBuf;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use ember_runtime::{Engine, EngineConfig};

const PROMPT: &str = "> ";
const QUIT_COMMAND: &str = ":q";
const HISTORY_FILE: &str = ".ember_history";

pub fn run(config: EngineConfig) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("Could not start line editor: {e}");
            return;
        }
    };

    let history_path = history_path();
    if let Some(path) = &history_path {
        // Missing history is normal on first run.
        let _ = editor.load_history(path);
    }

    println!("ember {} (:q to quit)", env!("CARGO_PKG_VERSION"));
    let mut engine = Engine::new(config);

    loop {
        match editor.readline(PROMPT) {
            Ok(line) => {
                if line == QUIT_COMMAND {
                    break;
                }
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                // Diagnostics were already printed; the engine survives.
                if let Err(e) = engine.interpret(&line) {
                    debug!("line failed: {e}");
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {e}");
                break;
            }
        }
    }

    if let Some(path) = &history_path {
        if let Err(e) = editor.save_history(path) {
            debug!("could not save history: {e}");
        }
    }
}

fn history_path() -> Option<PathBuf> {
    home::home_dir().map(|dir| dir.join(HISTORY_FILE))
}
