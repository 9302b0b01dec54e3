//! The batch run loop and parity harness.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use worldsim_core::step::{run_cli_year_step, run_gui_headless_year_step};
use worldsim_core::{
    check_invariants, compute_snapshot, generate_world, EventLog, MetricsSnapshot,
    ParityChecksum, SimConfig, SimulationContext, World,
};

use crate::loader;

/// Exit codes shared by every driver mode.
pub const EXIT_OK: u8 = 0;
pub const EXIT_INIT_FAILURE: u8 = 1;
pub const EXIT_ARGUMENT_ERROR: u8 = 2;
pub const EXIT_INVARIANT_VIOLATION: u8 = 3;
pub const EXIT_PARITY_MISMATCH: u8 = 5;
pub const EXIT_PARITY_SUBPROCESS: u8 = 6;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub seed: u64,
    pub config_path: PathBuf,
    pub start_year: Option<i32>,
    pub end_year: Option<i32>,
    pub checkpoint_every_years: i32,
    pub out_dir: Option<PathBuf>,
    pub use_gpu: Option<bool>,
    pub assets_dir: PathBuf,
    /// Synthetic square map of this size instead of asset PNGs.
    pub mock_map: Option<usize>,
    pub parity_check_years: i32,
    pub parity_checkpoint_every_years: i32,
}

pub struct Runtime {
    pub world: World,
    pub ctx: SimulationContext,
    pub events: EventLog,
}

/// Build the runtime: config, layers, generated world.
pub fn build_runtime(opts: &RunOptions) -> Result<Runtime> {
    let config_bytes = std::fs::read(&opts.config_path)
        .with_context(|| format!("could not read config {}", opts.config_path.display()))?;
    let config_text = std::str::from_utf8(&config_bytes)
        .with_context(|| format!("config {} is not UTF-8", opts.config_path.display()))?;
    let mut config = SimConfig::from_toml_str(config_text)?;
    if let Some(use_gpu) = opts.use_gpu {
        config.economy.use_gpu = use_gpu;
    }
    let ctx = SimulationContext::new(opts.seed, config, &config_bytes);

    let layers = match opts.mock_map {
        Some(size) => loader::mock_layers(opts.seed, size, size),
        None => loader::load_layers(&opts.assets_dir)?,
    };

    let mut events = EventLog::default();
    let world = generate_world(&ctx, &layers, &mut events)?;
    Ok(Runtime { world, ctx, events })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TierShares {
    tier1_share: f64,
    tier2_share: f64,
    tier3_share: f64,
}

#[derive(Debug, Serialize)]
struct Spread {
    mean: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    p10: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p90: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckpointJson {
    year: i32,
    world_population: f64,
    urban_share: f64,
    median_country_pop: f64,
    median_country_area: f64,
    war_frequency_per_century: f64,
    trade_intensity: f64,
    tech_capability_levels: TierShares,
    collapse_count: i64,
    food_security: Spread,
    disease_burden: Spread,
}

impl From<&MetricsSnapshot> for CheckpointJson {
    fn from(s: &MetricsSnapshot) -> Self {
        Self {
            year: s.year,
            world_population: s.world_population,
            urban_share: s.urban_share,
            median_country_pop: s.median_country_pop,
            median_country_area: s.median_country_area,
            war_frequency_per_century: s.war_frequency_per_century,
            trade_intensity: s.trade_intensity,
            tech_capability_levels: TierShares {
                tier1_share: s.capability_tier1_share,
                tier2_share: s.capability_tier2_share,
                tier3_share: s.capability_tier3_share,
            },
            collapse_count: s.collapse_count,
            food_security: Spread {
                mean: s.food_security_mean,
                p10: Some(s.food_security_p10),
                p90: None,
            },
            disease_burden: Spread {
                mean: s.disease_burden_mean,
                p10: None,
                p90: Some(s.disease_burden_p90),
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InvariantsJson {
    ok: bool,
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    seed: u64,
    config_path: String,
    config_hash: String,
    start_year: i32,
    end_year: i32,
    world_start_year: i32,
    #[serde(rename = "useGPU")]
    use_gpu: bool,
    invariants: InvariantsJson,
    checkpoints: Vec<CheckpointJson>,
}

fn write_timeseries_csv(path: &Path, checkpoints: &[MetricsSnapshot]) -> Result<()> {
    let mut out = String::from(
        "year,worldPopulation,urbanShare,medianCountryPop,medianCountryArea,warFrequencyPerCentury,tradeIntensity,\
capabilityTier1Share,capabilityTier2Share,capabilityTier3Share,collapseCount,foodSecurityMean,foodSecurityP10,\
diseaseBurdenMean,diseaseBurdenP90\n",
    );
    for s in checkpoints {
        out.push_str(&format!(
            "{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{},{:.6},{:.6},{:.6},{:.6}\n",
            s.year,
            s.world_population,
            s.urban_share,
            s.median_country_pop,
            s.median_country_area,
            s.war_frequency_per_century,
            s.trade_intensity,
            s.capability_tier1_share,
            s.capability_tier2_share,
            s.capability_tier3_share,
            s.collapse_count,
            s.food_security_mean,
            s.food_security_p10,
            s.disease_burden_mean,
            s.disease_burden_p90
        ));
    }
    std::fs::write(path, out).with_context(|| format!("could not write {}", path.display()))?;
    Ok(())
}

/// The full batch run: warm-up, yearly loop with checkpointing and
/// invariant checks, then `timeseries.csv` and `run_summary.json`.
pub fn run_simulation(opts: &RunOptions) -> Result<u8> {
    let mut rt = match build_runtime(opts) {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return Ok(EXIT_INIT_FAILURE);
        }
    };

    let world_start = rt.ctx.config.world.start_year;
    let start_year = opts.start_year.unwrap_or(world_start).max(world_start);
    let end_year = opts.end_year.unwrap_or(rt.ctx.config.world.end_year);
    if end_year < start_year {
        eprintln!("Invalid year range: startYear={start_year} endYear={end_year}");
        return Ok(EXIT_ARGUMENT_ERROR);
    }
    let checkpoint_every = opts.checkpoint_every_years.max(1);

    let out_dir = opts
        .out_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("out/cli_runs/seed_{}", opts.seed)));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("could not create {}", out_dir.display()))?;

    println!(
        "worldsim seed={} config={} hash={} start={} end={} gpu={}",
        opts.seed,
        opts.config_path.display(),
        rt.ctx.config_hash,
        start_year,
        end_year,
        u8::from(rt.ctx.config.economy.use_gpu)
    );

    // Warm-up from world start to the requested range start.
    if rt.world.year < start_year {
        log::debug!("warming up {} years", start_year - rt.world.year);
    }
    while rt.world.year < start_year {
        run_cli_year_step(&mut rt.world, &rt.ctx, &mut rt.events);
        rt.events.drain();
    }

    let explicit_checkpoints: BTreeSet<i32> = rt
        .ctx
        .config
        .scoring
        .checkpoint_years
        .iter()
        .copied()
        .collect();

    let mut checkpoints: Vec<MetricsSnapshot> = Vec::new();
    let mut collapse_count: i64 = 0;
    let mut invariants_ok = true;
    let mut invariant_error = String::new();

    // Optional per-year world-food snapshots (visualization/debug).
    let mut food_snapshots = if rt.ctx.config.scoring.world_food_snapshots {
        Some(String::from("year,country,name,foodOutput\n"))
    } else {
        None
    };

    for year in start_year..=end_year {
        run_cli_year_step(&mut rt.world, &rt.ctx, &mut rt.events);
        for (_, event) in rt.events.drain() {
            if event.is_collapse() {
                collapse_count += 1;
            }
        }
        if let Some(buf) = food_snapshots.as_mut() {
            for c in &rt.world.countries {
                if c.alive() {
                    buf.push_str(&format!(
                        "{},{},{},{:.6}\n",
                        year, c.id, c.name, c.econ.last_food_output
                    ));
                }
            }
        }

        let cadence_hit = (year - start_year) % checkpoint_every == 0;
        let is_checkpoint = year == start_year
            || year == end_year
            || cadence_hit
            || explicit_checkpoints.contains(&year);
        if !is_checkpoint {
            continue;
        }

        if let Err(reason) = check_invariants(&rt.world) {
            invariants_ok = false;
            invariant_error = format!("year {year}: {reason}");
            break;
        }
        let years_elapsed = (year - start_year + 1).max(1);
        checkpoints.push(compute_snapshot(
            &rt.ctx,
            year,
            &rt.world,
            rt.world.war_starts,
            years_elapsed,
            collapse_count,
        ));
    }

    let csv_path = out_dir.join("timeseries.csv");
    let json_path = out_dir.join("run_summary.json");
    write_timeseries_csv(&csv_path, &checkpoints)?;
    if let Some(buf) = food_snapshots {
        std::fs::write(out_dir.join("world_food.csv"), buf)?;
    }

    let summary = RunSummary {
        seed: opts.seed,
        config_path: opts.config_path.display().to_string(),
        config_hash: rt.ctx.config_hash.clone(),
        start_year,
        end_year,
        world_start_year: world_start,
        use_gpu: rt.ctx.config.economy.use_gpu,
        invariants: InvariantsJson {
            ok: invariants_ok,
            message: invariant_error.clone(),
        },
        checkpoints: checkpoints.iter().map(CheckpointJson::from).collect(),
    };
    std::fs::write(&json_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("could not write {}", json_path.display()))?;

    println!("Wrote {} and {}", json_path.display(), csv_path.display());
    if !invariants_ok {
        eprintln!("Invariant failure: {invariant_error}");
        return Ok(EXIT_INVARIANT_VIOLATION);
    }
    Ok(EXIT_OK)
}

/// Run `parityCheckYears` years through one of the two driver paths and
/// collect checkpoint checksums.
pub fn collect_parity_checksums(
    opts: &RunOptions,
    use_gui_path: bool,
) -> Result<(Vec<i32>, Vec<ParityChecksum>)> {
    let mut rt = build_runtime(opts)?;
    let parity_years = opts.parity_check_years.max(1);
    let checkpoint_every = opts.parity_checkpoint_every_years.max(1);

    let world_start = rt.ctx.config.world.start_year;
    let end_year = world_start + parity_years - 1;
    let mut years = Vec::new();
    let mut sums = Vec::new();
    for year in world_start..=end_year {
        if use_gui_path {
            run_gui_headless_year_step(&mut rt.world, &rt.ctx, &mut rt.events);
        } else {
            run_cli_year_step(&mut rt.world, &rt.ctx, &mut rt.events);
        }
        rt.events.drain();

        let checkpoint = (year - world_start) % checkpoint_every == 0 || year == end_year;
        if checkpoint {
            years.push(year);
            sums.push(rt.world.parity_checksum());
        }
    }
    Ok((years, sums))
}

/// Child mode: dump one path's checksums to `--parityOut`.
pub fn run_parity_dump(opts: &RunOptions, role: &str, out_path: &Path) -> Result<u8> {
    if role != "gui" && role != "cli" {
        eprintln!("Invalid --parityRole. Expected gui or cli.");
        return Ok(EXIT_ARGUMENT_ERROR);
    }
    if opts.parity_check_years <= 0 {
        eprintln!("--parityCheckYears must be > 0 for parity dump mode.");
        return Ok(EXIT_ARGUMENT_ERROR);
    }
    let (years, sums) = match collect_parity_checksums(opts, role == "gui") {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Parity dump failed: {e:#}");
            return Ok(EXIT_INIT_FAILURE);
        }
    };
    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    worldsim_verify::write_checksums_csv(out_path, &years, &sums)?;
    Ok(EXIT_OK)
}

/// Parent mode: spawn one GUI-path and one CLI-path subprocess, then compare
/// their dumps within the parity tolerances.
pub fn run_parity_check(opts: &RunOptions) -> Result<u8> {
    let parity_years = opts.parity_check_years.max(1);
    let checkpoint_every = opts.parity_checkpoint_every_years.max(1);
    println!(
        "Running parity check: seed={} years={} checkpointEvery={}",
        opts.seed, parity_years, checkpoint_every
    );

    let parity_dir = PathBuf::from("out").join("cli_parity");
    std::fs::create_dir_all(&parity_dir)?;
    let suffix = format!("{}_{}_{}", opts.seed, parity_years, checkpoint_every);
    let gui_csv = parity_dir.join(format!("gui_{suffix}.csv"));
    let cli_csv = parity_dir.join(format!("cli_{suffix}.csv"));

    let exe = std::env::current_exe().context("could not locate current executable")?;
    for (role, csv) in [("gui", &gui_csv), ("cli", &cli_csv)] {
        let mut cmd = std::process::Command::new(&exe);
        cmd.arg("--seed")
            .arg(opts.seed.to_string())
            .arg("--config")
            .arg(&opts.config_path)
            .arg("--parityCheckYears")
            .arg(parity_years.to_string())
            .arg("--parityCheckpointEveryYears")
            .arg(checkpoint_every.to_string())
            .arg("--parityRole")
            .arg(role)
            .arg("--parityOut")
            .arg(csv);
        if let Some(use_gpu) = opts.use_gpu {
            cmd.arg("--useGPU").arg(if use_gpu { "1" } else { "0" });
        }
        if let Some(size) = opts.mock_map {
            cmd.arg("--mockMap").arg(size.to_string());
        } else {
            cmd.arg("--assets").arg(&opts.assets_dir);
        }
        let status = cmd.status();
        let ok = status.map(|s| s.success()).unwrap_or(false);
        if !ok {
            eprintln!("Parity child run failed for role={role}");
            return Ok(EXIT_PARITY_SUBPROCESS);
        }
    }

    let gui = match worldsim_verify::read_checksums_csv(&gui_csv) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Parity read failed for GUI checksums: {e:#}");
            return Ok(EXIT_PARITY_SUBPROCESS);
        }
    };
    let cli = match worldsim_verify::read_checksums_csv(&cli_csv) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("Parity read failed for CLI checksums: {e:#}");
            return Ok(EXIT_PARITY_SUBPROCESS);
        }
    };

    match worldsim_verify::compare_dumps(&gui, &cli) {
        Ok(()) => {
            println!("Parity check PASSED for {parity_years} years.");
            Ok(EXIT_OK)
        }
        Err(report) => {
            eprintln!("PARITY MISMATCH: {report}");
            Ok(EXIT_PARITY_MISMATCH)
        }
    }
}
