//! # provflow CLI
//!
//! Command-line interface for the provenance-aware workflow engine.
//!
//! This binary provides human-friendly access to `provflow-core`.
//! Run `provflow --help` for usage information.

mod cli;
pub mod ui;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
