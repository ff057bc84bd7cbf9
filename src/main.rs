#![allow(dead_code)]
#[macro_use]
mod errors;
mod repl;
mod sql;
mod storage;

use clap::Parser;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "minisql",
    version = VERSION,
    about = "Tiny single-table SQL database."
)]
struct Cli {
    /// Path to the database file. Created if it does not exist.
    file: PathBuf,
}

fn main() {
    if let Ok(file) = OpenOptions::new()
        .append(true)
        .create(true)
        .open("minisql.log")
    {
        tracing_subscriber::fmt()
            .with_writer(Arc::new(file))
            .with_ansi(false)
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .init();
    }

    let cli = Cli::parse();
    if let Err(e) = repl::start(&cli.file) {
        println!("{}", e);
        std::process::exit(1);
    }
}
