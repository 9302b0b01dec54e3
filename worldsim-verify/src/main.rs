//! Standalone parity comparison: two checkpoint-checksum dumps in, verdict
//! out. Exit codes follow the simulation driver: 0 parity holds, 5 parity
//! mismatch, 6 unreadable dumps.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "worldsim-verify", about = "Compare GUI-path and CLI-path parity dumps")]
struct Args {
    /// Parity CSV produced by the GUI-path run.
    gui: PathBuf,
    /// Parity CSV produced by the CLI-path run.
    cli: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let gui = match worldsim_verify::read_checksums_csv(&args.gui) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Parity read failed for GUI checksums: {e}");
            return ExitCode::from(6);
        }
    };
    let cli = match worldsim_verify::read_checksums_csv(&args.cli) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Parity read failed for CLI checksums: {e}");
            return ExitCode::from(6);
        }
    };

    match worldsim_verify::compare_dumps(&gui, &cli) {
        Ok(()) => {
            println!("Parity check PASSED for {} checkpoints.", gui.0.len());
            ExitCode::SUCCESS
        }
        Err(report) => {
            eprintln!("PARITY MISMATCH: {report}");
            ExitCode::from(5)
        }
    }
}
