use centralink::cli::{Cli, run_cli};
use centralink::output::OutputFormatter;
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run_cli(cli, &INTERRUPTED) {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            OutputFormatter::error(&format!("ERROR: {}", e));
            ExitCode::FAILURE
        }
    }
}
