//! `nativerun` launcher binary.
//!
//! Runs one batch file and writes one results file. Isolated execution starts
//! this binary as a child so a crashing native call only kills the child.

use std::path::PathBuf;

use clap::Parser;

use nativerun::exit_codes;
use nativerun::launch::run_launcher;
use nativerun::logging;

#[derive(Parser)]
#[command(
    name = "nativerun",
    version,
    about = "Run a batch of native function invocations and record the results"
)]
struct Cli {
    /// Batch file to read.
    #[arg(long)]
    batch: PathBuf,
    /// Results file to write.
    #[arg(long)]
    results: PathBuf,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    if let Err(err) = run_launcher(&cli.batch, &cli.results) {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::INVALID);
    }
    std::process::exit(exit_codes::OK);
}
