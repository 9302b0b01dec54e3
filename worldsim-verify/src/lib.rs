//! Parity checksum files and their comparison.
//!
//! A parity dump is a CSV of per-checkpoint [`ParityChecksum`] rows. Two
//! dumps (one from the GUI-path driver, one from the CLI-path driver) match
//! when every checkpoint agrees within the tolerances of the parity
//! contract: population within 128 people, territory within 8 cells, the
//! float sums within 5e-4 relative or 100 absolute.

use std::path::Path;

use anyhow::{bail, Context, Result};
pub use worldsim_core::ParityChecksum;

pub const POPULATION_TOLERANCE: i64 = 128;
pub const TERRITORY_TOLERANCE: i64 = 8;
pub const REL_EPS: f64 = 5e-4;
pub const ABS_EPS: f64 = 100.0;

fn almost_equal(a: f64, b: f64) -> bool {
    let diff = (a - b).abs();
    if diff <= ABS_EPS {
        return true;
    }
    diff <= REL_EPS * 1.0f64.max(a.abs()).max(b.abs())
}

fn relative_diff(a: f64, b: f64) -> f64 {
    let denom = 1.0f64.max(a.abs()).max(b.abs());
    (a - b).abs() / denom
}

/// Serialize checkpoint checksums to the parity CSV format.
pub fn write_checksums_csv(
    path: &Path,
    years: &[i32],
    sums: &[ParityChecksum],
) -> Result<()> {
    if years.len() != sums.len() {
        bail!("internal parity size mismatch");
    }
    let mut out = String::from(
        "year,worldPopulation,perCountryPopulationSum,totalGDPSum,totalStockpiles,totalTerritoryCells\n",
    );
    for (year, s) in years.iter().zip(sums) {
        out.push_str(&format!(
            "{},{},{},{:.17e},{:.17e},{}\n",
            year,
            s.world_population,
            s.per_country_population_sum,
            s.total_gdp_sum,
            s.total_stockpiles,
            s.total_territory_cells
        ));
    }
    std::fs::write(path, out).with_context(|| format!("could not write {}", path.display()))?;
    Ok(())
}

/// Parse a parity CSV back into checkpoint rows.
pub fn read_checksums_csv(path: &Path) -> Result<(Vec<i32>, Vec<ParityChecksum>)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("could not open parity file {}", path.display()))?;
    let mut lines = text.lines();
    let Some(_header) = lines.next() else {
        bail!("empty parity file {}", path.display());
    };

    let mut years = Vec::new();
    let mut sums = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let cols: Vec<&str> = line.split(',').collect();
        if cols.len() != 6 {
            bail!("malformed parity row in {}", path.display());
        }
        let parse_err = || format!("invalid parity value in {}", path.display());
        years.push(cols[0].parse::<i32>().with_context(parse_err)?);
        sums.push(ParityChecksum {
            world_population: cols[1].parse().with_context(parse_err)?,
            per_country_population_sum: cols[2].parse().with_context(parse_err)?,
            total_gdp_sum: cols[3].parse().with_context(parse_err)?,
            total_stockpiles: cols[4].parse().with_context(parse_err)?,
            total_territory_cells: cols[5].parse().with_context(parse_err)?,
        });
    }
    Ok((years, sums))
}

/// Empty string when the checkpoints agree; otherwise a line-per-field
/// mismatch report.
pub fn mismatch_report(gui: &ParityChecksum, cli: &ParityChecksum) -> String {
    let mut out = String::new();

    let pop_diff = (gui.world_population - cli.world_population).abs();
    if pop_diff > POPULATION_TOLERANCE {
        out.push_str(&format!(
            "  worldPopulation mismatch: gui={} cli={} absDiff={}\n",
            gui.world_population, cli.world_population, pop_diff
        ));
    }
    let sum_diff = (gui.per_country_population_sum - cli.per_country_population_sum).abs();
    if sum_diff > POPULATION_TOLERANCE {
        out.push_str(&format!(
            "  perCountryPopulationSum mismatch: gui={} cli={} absDiff={}\n",
            gui.per_country_population_sum, cli.per_country_population_sum, sum_diff
        ));
    }
    let territory_diff = (gui.total_territory_cells - cli.total_territory_cells).abs();
    if territory_diff > TERRITORY_TOLERANCE {
        out.push_str(&format!(
            "  totalTerritoryCells mismatch: gui={} cli={} absDiff={}\n",
            gui.total_territory_cells, cli.total_territory_cells, territory_diff
        ));
    }
    if !almost_equal(gui.total_gdp_sum, cli.total_gdp_sum) {
        out.push_str(&format!(
            "  totalGDPSum mismatch: gui={} cli={} absDiff={} relDiff={}\n",
            gui.total_gdp_sum,
            cli.total_gdp_sum,
            (gui.total_gdp_sum - cli.total_gdp_sum).abs(),
            relative_diff(gui.total_gdp_sum, cli.total_gdp_sum)
        ));
    }
    if !almost_equal(gui.total_stockpiles, cli.total_stockpiles) {
        out.push_str(&format!(
            "  totalStockpiles mismatch: gui={} cli={} absDiff={} relDiff={}\n",
            gui.total_stockpiles,
            cli.total_stockpiles,
            (gui.total_stockpiles - cli.total_stockpiles).abs(),
            relative_diff(gui.total_stockpiles, cli.total_stockpiles)
        ));
    }
    out
}

/// Compare two full dumps. `Ok(())` means parity holds; the error carries
/// the first mismatching year's report.
pub fn compare_dumps(
    gui: &(Vec<i32>, Vec<ParityChecksum>),
    cli: &(Vec<i32>, Vec<ParityChecksum>),
) -> std::result::Result<(), String> {
    if gui.0 != cli.0 || gui.1.len() != cli.1.len() {
        return Err("checkpoint structure differs between GUI-path and CLI-path runs".to_string());
    }
    for ((year, g), c) in gui.0.iter().zip(&gui.1).zip(&cli.1) {
        let report = mismatch_report(g, c);
        if !report.is_empty() {
            return Err(format!("mismatch at year {year}\n{report}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParityChecksum {
        ParityChecksum {
            world_population: 1_000_000,
            per_country_population_sum: 1_000_000,
            total_gdp_sum: 5000.0,
            total_stockpiles: 1234.5,
            total_territory_cells: 90_000,
        }
    }

    #[test]
    fn test_roundtrip_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parity.csv");
        let years = vec![-5000, -4975, -4950];
        let sums = vec![sample(), sample(), sample()];
        write_checksums_csv(&path, &years, &sums).unwrap();
        let (read_years, read_sums) = read_checksums_csv(&path).unwrap();
        assert_eq!(read_years, years);
        assert_eq!(read_sums[0], sums[0]);
    }

    #[test]
    fn test_tolerances_accept_small_drift() {
        let g = sample();
        let mut c = sample();
        c.world_population += 100; // within 128
        c.total_territory_cells += 5; // within 8
        c.total_gdp_sum += 60.0; // within abs 100
        assert!(mismatch_report(&g, &c).is_empty());
    }

    #[test]
    fn test_tolerances_reject_large_drift() {
        let g = sample();
        let mut c = sample();
        c.world_population += 500;
        let report = mismatch_report(&g, &c);
        assert!(report.contains("worldPopulation"));
    }

    #[test]
    fn test_structure_mismatch_detected() {
        let a = (vec![-5000], vec![sample()]);
        let b = (vec![-4999], vec![sample()]);
        assert!(compare_dumps(&a, &b).is_err());
    }

    #[test]
    fn test_float_relative_tolerance() {
        let mut g = sample();
        let mut c = sample();
        g.total_gdp_sum = 1.0e9;
        c.total_gdp_sum = 1.0e9 * (1.0 + 4.0e-4); // within 5e-4 relative
        assert!(mismatch_report(&g, &c).is_empty());
        c.total_gdp_sum = 1.0e9 * (1.0 + 1.0e-3);
        assert!(!mismatch_report(&g, &c).is_empty());
    }
}
