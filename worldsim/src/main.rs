//! Headless simulation driver.
//!
//! Modes, in precedence order:
//! 1. `--parityRole gui|cli` - child mode, dump checkpoint checksums.
//! 2. `--parityCheckYears N` - parent mode, spawn both paths and compare.
//! 3. otherwise - batch run with checkpoint outputs.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;

use worldsim::run::{self, RunOptions};

#[derive(Parser, Debug)]
#[command(
    name = "worldsim",
    about = "Deterministic grid-based world-history simulator",
    allow_negative_numbers = true
)]
struct Args {
    /// World seed.
    #[arg(long, default_value_t = 1)]
    seed: u64,

    /// Simulation config (TOML key/value document).
    #[arg(long, default_value = "data/sim_config.toml")]
    config: PathBuf,

    #[arg(long = "startYear")]
    start_year: Option<i32>,

    #[arg(long = "endYear")]
    end_year: Option<i32>,

    #[arg(long = "checkpointEveryYears", default_value_t = 50)]
    checkpoint_every_years: i32,

    #[arg(long = "outDir")]
    out_dir: Option<PathBuf>,

    /// 0 or 1; overrides the config's economy.useGPU flag. The CPU economy
    /// is authoritative either way.
    #[arg(long = "useGPU")]
    use_gpu: Option<u8>,

    /// Asset directory holding the map layer PNGs.
    #[arg(long, default_value = "assets/images")]
    assets: PathBuf,

    /// Use a deterministic synthetic square map of this size instead of
    /// asset PNGs (CI and parity harness).
    #[arg(long = "mockMap")]
    mock_map: Option<usize>,

    #[arg(long = "parityCheckYears", default_value_t = 0)]
    parity_check_years: i32,

    #[arg(long = "parityCheckpointEveryYears", default_value_t = 25)]
    parity_checkpoint_every_years: i32,

    /// Internal: "gui" or "cli" (parity child mode).
    #[arg(long = "parityRole")]
    parity_role: Option<String>,

    /// Internal: checkpoint checksum output path (parity child mode).
    #[arg(long = "parityOut")]
    parity_out: Option<PathBuf>,
}

fn dispatch(args: Args) -> Result<u8> {
    let use_gpu = match args.use_gpu {
        Some(0) => Some(false),
        Some(1) => Some(true),
        Some(_) => {
            eprintln!("--useGPU expects 0 or 1");
            return Ok(run::EXIT_ARGUMENT_ERROR);
        }
        None => None,
    };

    let opts = RunOptions {
        seed: args.seed,
        config_path: args.config,
        start_year: args.start_year,
        end_year: args.end_year,
        checkpoint_every_years: args.checkpoint_every_years,
        out_dir: args.out_dir,
        use_gpu,
        assets_dir: args.assets,
        mock_map: args.mock_map,
        parity_check_years: args.parity_check_years,
        parity_checkpoint_every_years: args.parity_checkpoint_every_years,
    };

    if let Some(role) = &args.parity_role {
        let Some(out_path) = &args.parity_out else {
            eprintln!("--parityOut is required when --parityRole is set.");
            return Ok(run::EXIT_ARGUMENT_ERROR);
        };
        return run::run_parity_dump(&opts, role, out_path);
    }

    if opts.parity_check_years > 0 {
        return run::run_parity_check(&opts);
    }

    run::run_simulation(&opts)
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match dispatch(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(run::EXIT_INIT_FAILURE)
        }
    }
}
