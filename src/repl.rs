//! The read-eval-print loop: a `db > ` prompt, meta-commands, and the
//! insert/select statements, speaking the exact strings callers script
//! against. All diagnostics go to the log file; stdout carries only the
//! conversational surface.

pub mod history;

use crate::errors::Error;
use crate::sql::{self, Statement};
use crate::storage::btree::{
    COMMON_NODE_HEADER_SIZE, LEAF_NODE_CELL_SIZE, LEAF_NODE_HEADER_SIZE, LEAF_NODE_MAX_CELLS,
    LEAF_NODE_SPACE_FOR_CELLS,
};
use crate::storage::row::ROW_SIZE;
use crate::storage::{insert_row, select_rows, Table};
use std::io::{self, BufRead, Write};
use std::path::Path;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Starts a REPL session against the database at `path`. Returns when the
/// user issues `.exit`; EOF and unreadable input terminate the process the
/// way the wire format of this CLI promises.
pub fn start(path: &Path) -> Result<(), Error> {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, path = %path.display(), "Starting REPL session...");

    let mut table = Table::open(path)?;
    let history_path = history::default_path();
    let mut session_history: Vec<String> = history_path
        .as_ref()
        .map(|path| history::load_history(path))
        .unwrap_or_default();
    info!(entries = session_history.len(), "Loaded command history");

    let stdin = io::stdin();
    let mut input = String::new();
    loop {
        print_prompt()?;

        input.clear();
        let bytes_read = stdin.lock().read_line(&mut input).unwrap_or(0);
        if bytes_read == 0 {
            println!("Error reading input");
            std::process::exit(1);
        }
        let input = input.trim_end_matches(['\n', '\r']);

        if !input.is_empty() {
            session_history.push(input.to_string());
            if let Some(history_path) = &history_path {
                if let Err(e) = history::append_history(input, history_path) {
                    warn!("Failed to append history: {}", e);
                }
            }
        }

        if input.starts_with('.') {
            match do_meta_command(input, &mut table)? {
                MetaCommandResult::Exit => break,
                MetaCommandResult::Handled => continue,
            }
        }

        let statement = match sql::prepare_statement(input) {
            Ok(statement) => statement,
            Err(Error::NegativeId) => {
                println!("ID must be positive.");
                continue;
            }
            Err(Error::StringTooLong) => {
                println!("String is too long.");
                continue;
            }
            Err(Error::Syntax(_)) => {
                println!("Syntax error. Could not parse statement.");
                continue;
            }
            Err(Error::Unrecognized(line)) => {
                println!("Unrecognized keyword at start of '{}'.", line);
                continue;
            }
            Err(e) => return Err(e),
        };

        execute_statement(statement, &mut table)?;
    }

    info!(session_id = %session_id, "Closed REPL session.");
    Ok(())
}

enum MetaCommandResult {
    Exit,
    Handled,
}

fn do_meta_command(input: &str, table: &mut Table) -> Result<MetaCommandResult, Error> {
    match input {
        ".exit" => {
            table.close()?;
            Ok(MetaCommandResult::Exit)
        }
        ".constants" => {
            println!("Constants:");
            print_constants();
            Ok(MetaCommandResult::Handled)
        }
        ".btree" => {
            println!("Tree:");
            print!("{}", table.tree_to_string()?);
            Ok(MetaCommandResult::Handled)
        }
        _ => {
            println!("Unrecognized command '{}'", input);
            Ok(MetaCommandResult::Handled)
        }
    }
}

fn execute_statement(statement: Statement, table: &mut Table) -> Result<(), Error> {
    match statement {
        Statement::Insert(row) => match insert_row(table, &row) {
            Ok(()) => println!("Executed."),
            Err(Error::DuplicateKey(key)) => {
                warn!(key, "Rejected duplicate key");
                println!("Error: Duplicate key.");
            }
            Err(Error::TableFull) => {
                warn!("Rejected insert into full table");
                println!("Error: Table full.");
            }
            Err(e) => return fatal(e),
        },
        Statement::Select => match select_rows(table) {
            Ok(rows) => {
                for row in rows {
                    println!("{}", row);
                }
                println!("Executed.");
            }
            Err(e) => return fatal(e),
        },
    }
    Ok(())
}

/// I/O and corruption failures end the session; everything else has already
/// been reported and recovered above.
fn fatal(e: Error) -> Result<(), Error> {
    error!("Unrecoverable engine error: {}", e);
    Err(e)
}

fn print_prompt() -> Result<(), Error> {
    print!("db > ");
    io::stdout().flush()?;
    Ok(())
}

fn print_constants() {
    println!("ROW_SIZE: {}", ROW_SIZE);
    println!("COMMON_NODE_HEADER_SIZE: {}", COMMON_NODE_HEADER_SIZE);
    println!("LEAF_NODE_HEADER_SIZE: {}", LEAF_NODE_HEADER_SIZE);
    println!("LEAF_NODE_CELL_SIZE: {}", LEAF_NODE_CELL_SIZE);
    println!("LEAF_NODE_SPACE_FOR_CELLS: {}", LEAF_NODE_SPACE_FOR_CELLS);
    println!("LEAF_NODE_MAX_CELLS: {}", LEAF_NODE_MAX_CELLS);
}
