//! CLI integration tests using pre-built binaries
//!
//! Uses `assert_cmd` with `CARGO_BIN_EXE_worldsim` to run the pre-built
//! binary. Runs use small mock maps so no asset files are needed.

use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use tempfile::tempdir;

const CONFIG: &str = r#"
[world]
startYear = -5000
endYear = -4800
numCountries = 6
maxCountries = 50

[migration]
refugeeHalfLifeYears = 12.0
famineShockThreshold = 0.25
famineShockMultiplier = 0.55
epidemicShockThreshold = 0.08
epidemicShockMultiplier = 0.40
warShockMultiplier = 0.30
"#;

fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("sim_config.toml");
    fs::write(&path, CONFIG).unwrap();
    path
}

fn worldsim() -> Command {
    Command::new(env!("CARGO_BIN_EXE_worldsim"))
}

#[test]
fn test_cli_help() {
    worldsim().arg("--help").assert().success();
}

#[test]
fn test_bad_argument_exits_2() {
    worldsim()
        .arg("--seed")
        .arg("not-a-number")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_missing_config_fails_with_diagnostic() {
    worldsim()
        .args(["--config", "/nonexistent/sim_config.toml", "--mockMap", "48"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("could not read config"));
}

#[test]
fn test_short_run_writes_outputs() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let out = dir.path().join("out");

    worldsim()
        .args([
            "--seed",
            "1",
            "--config",
            config.to_str().unwrap(),
            "--startYear",
            "-5000",
            "--endYear",
            "-4960",
            "--checkpointEveryYears",
            "20",
            "--mockMap",
            "64",
            "--outDir",
            out.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(contains("Wrote"));

    let csv = fs::read_to_string(out.join("timeseries.csv")).unwrap();
    assert!(csv.starts_with("year,worldPopulation,urbanShare"));
    // Checkpoints at -5000, -4980, -4960 plus the header line.
    assert_eq!(csv.lines().count(), 4);

    let json = fs::read_to_string(out.join("run_summary.json")).unwrap();
    let summary: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(summary["seed"], 1);
    assert_eq!(summary["invariants"]["ok"], true);
    assert!(summary["checkpoints"].as_array().unwrap().len() == 3);
    assert!(summary["configHash"].as_str().unwrap().len() == 16);
}

#[test]
fn test_same_seed_identical_summaries() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let out_a = dir.path().join("a");
    let out_b = dir.path().join("b");

    for out in [&out_a, &out_b] {
        worldsim()
            .args([
                "--seed",
                "7",
                "--config",
                config.to_str().unwrap(),
                "--endYear",
                "-4950",
                "--mockMap",
                "64",
                "--outDir",
                out.to_str().unwrap(),
            ])
            .assert()
            .success();
    }
    let a = fs::read_to_string(out_a.join("run_summary.json")).unwrap();
    let b = fs::read_to_string(out_b.join("run_summary.json")).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_gpu_flag_does_not_change_outputs() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let out_cpu = dir.path().join("cpu");
    let out_gpu = dir.path().join("gpu");

    for (out, gpu) in [(&out_cpu, "0"), (&out_gpu, "1")] {
        worldsim()
            .args([
                "--seed",
                "3",
                "--config",
                config.to_str().unwrap(),
                "--endYear",
                "-4960",
                "--useGPU",
                gpu,
                "--mockMap",
                "64",
                "--outDir",
                out.to_str().unwrap(),
            ])
            .assert()
            .success();
    }
    let cpu: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_cpu.join("run_summary.json")).unwrap())
            .unwrap();
    let gpu: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_gpu.join("run_summary.json")).unwrap())
            .unwrap();
    // Only the recorded flag differs.
    assert_eq!(cpu["checkpoints"], gpu["checkpoints"]);
    assert_ne!(cpu["useGPU"], gpu["useGPU"]);
}

#[test]
fn test_parity_dump_writes_checkpoint_rows() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    let gui_csv = dir.path().join("gui.csv");
    let cli_csv = dir.path().join("cli.csv");

    for (role, path) in [("gui", &gui_csv), ("cli", &cli_csv)] {
        worldsim()
            .args([
                "--seed",
                "1",
                "--config",
                config.to_str().unwrap(),
                "--parityCheckYears",
                "30",
                "--parityCheckpointEveryYears",
                "10",
                "--parityRole",
                role,
                "--parityOut",
                path.to_str().unwrap(),
                "--mockMap",
                "64",
            ])
            .assert()
            .success();
    }

    let gui = fs::read_to_string(&gui_csv).unwrap();
    let cli = fs::read_to_string(&cli_csv).unwrap();
    assert!(gui.starts_with("year,worldPopulation,perCountryPopulationSum"));
    // Checkpoints at -5000, -4990, -4980, plus the forced end year -4971.
    assert_eq!(gui.lines().count(), 5);
    // The two paths are the same sequence; the dumps are identical.
    assert_eq!(gui, cli);
}

#[test]
fn test_parity_check_mode_passes() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());

    worldsim()
        .current_dir(dir.path())
        .args([
            "--seed",
            "1",
            "--config",
            config.to_str().unwrap(),
            "--parityCheckYears",
            "25",
            "--parityCheckpointEveryYears",
            "10",
            "--mockMap",
            "64",
        ])
        .assert()
        .success()
        .stdout(contains("Parity check PASSED"));
}

#[test]
fn test_parity_role_requires_out_path() {
    let dir = tempdir().unwrap();
    let config = write_config(dir.path());
    worldsim()
        .args([
            "--config",
            config.to_str().unwrap(),
            "--parityCheckYears",
            "10",
            "--parityRole",
            "gui",
            "--mockMap",
            "48",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(contains("--parityOut is required"));
}
