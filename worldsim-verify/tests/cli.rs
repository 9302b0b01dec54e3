//! CLI integration tests for the parity comparison binary.

use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use tempfile::tempdir;

const HEADER: &str =
    "year,worldPopulation,perCountryPopulationSum,totalGDPSum,totalStockpiles,totalTerritoryCells\n";

fn verify() -> Command {
    Command::new(env!("CARGO_BIN_EXE_worldsim-verify"))
}

#[test]
fn test_matching_dumps_pass() {
    let dir = tempdir().unwrap();
    let row = "-5000,1000000,1000000,5000.0,1234.5,90000\n";
    let gui = dir.path().join("gui.csv");
    let cli = dir.path().join("cli.csv");
    fs::write(&gui, format!("{HEADER}{row}")).unwrap();
    fs::write(&cli, format!("{HEADER}{row}")).unwrap();

    verify()
        .args([gui.to_str().unwrap(), cli.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("Parity check PASSED"));
}

#[test]
fn test_population_drift_fails_with_code_5() {
    let dir = tempdir().unwrap();
    let gui = dir.path().join("gui.csv");
    let cli = dir.path().join("cli.csv");
    fs::write(&gui, format!("{HEADER}-5000,1000000,1000000,5000.0,1234.5,90000\n")).unwrap();
    fs::write(&cli, format!("{HEADER}-5000,1000500,1000500,5000.0,1234.5,90000\n")).unwrap();

    verify()
        .args([gui.to_str().unwrap(), cli.to_str().unwrap()])
        .assert()
        .failure()
        .code(5)
        .stderr(contains("worldPopulation"));
}

#[test]
fn test_missing_file_fails_with_code_6() {
    let dir = tempdir().unwrap();
    let gui = dir.path().join("gui.csv");
    fs::write(&gui, HEADER).unwrap();

    verify()
        .args([gui.to_str().unwrap(), "/nonexistent/cli.csv"])
        .assert()
        .failure()
        .code(6);
}
