//! Timing metrics and checkpoint snapshots.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::context::SimulationContext;
use crate::numerics::{clamp01, percentile};
use crate::state::World;

/// Accumulated per-stage timings for simulation performance.
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct SimMetrics {
    pub total_years: u64,
    pub total_time: Duration,
    pub agents_time: Duration,
    pub weather_time: Duration,
    pub economy_time: Duration,
    pub demography_time: Duration,
    pub technology_time: Duration,
    pub culture_time: Duration,
    pub great_people_time: Duration,
    pub politics_time: Duration,
}

impl SimMetrics {
    pub fn year_avg_ms(&self) -> f64 {
        if self.total_years == 0 {
            0.0
        } else {
            self.total_time.as_secs_f64() * 1000.0 / self.total_years as f64
        }
    }

    pub fn years_per_second(&self) -> f64 {
        if self.total_time.as_secs_f64() == 0.0 {
            0.0
        } else {
            self.total_years as f64 / self.total_time.as_secs_f64()
        }
    }
}

/// One checkpoint row of the timeseries output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub year: i32,
    pub world_population: f64,
    pub urban_share: f64,
    pub median_country_pop: f64,
    pub median_country_area: f64,
    pub war_frequency_per_century: f64,
    pub trade_intensity: f64,
    pub capability_tier1_share: f64,
    pub capability_tier2_share: f64,
    pub capability_tier3_share: f64,
    pub collapse_count: i64,
    pub food_security_mean: f64,
    pub food_security_p10: f64,
    pub disease_burden_mean: f64,
    pub disease_burden_p90: f64,
}

/// Aggregate the world into one checkpoint row.
pub fn compute_snapshot(
    ctx: &SimulationContext,
    year: i32,
    world: &World,
    war_starts: u64,
    years_elapsed: i32,
    collapse_count: i64,
) -> MetricsSnapshot {
    let mut s = MetricsSnapshot {
        year,
        collapse_count,
        ..MetricsSnapshot::default()
    };

    let mut pops = Vec::new();
    let mut areas = Vec::new();
    let mut food_sec = Vec::new();
    let mut disease = Vec::new();
    let mut total_pop = 0.0;
    let mut total_urban = 0.0;
    let mut live = 0usize;
    let (mut tier1, mut tier2, mut tier3) = (0usize, 0usize, 0usize);

    let t_scale = ctx.config.technology.capability_threshold_scale.max(0.25);
    let t1 = 350.0 * t_scale;
    let t2 = 2800.0 * t_scale;
    let t3 = 16000.0 * t_scale;

    for c in &world.countries {
        if c.population <= 0 {
            continue;
        }
        let pop = c.population as f64;
        total_pop += pop;
        total_urban += c.total_city_population.max(0.0);
        pops.push(pop);
        areas.push(c.territory.len() as f64);
        food_sec.push(clamp01(c.econ.food_security));
        disease.push(clamp01(c.econ.disease_burden));
        live += 1;

        let mean_domain: f64 = c.knowledge.iter().map(|&v| v.max(0.0)).sum::<f64>()
            / c.knowledge.len() as f64;
        let access = clamp01(c.econ.market_access);
        let inst = clamp01(c.econ.institution_capacity);
        let composite = mean_domain * (0.7 + 0.3 * access) * (0.7 + 0.3 * inst);
        if composite >= t1 {
            tier1 += 1;
        }
        if composite >= t2 {
            tier2 += 1;
        }
        if composite >= t3 {
            tier3 += 1;
        }
    }

    s.world_population = total_pop;
    s.urban_share = if total_pop > 1e-9 {
        clamp01(total_urban / total_pop)
    } else {
        0.0
    };
    s.median_country_pop = percentile(pops, 0.50);
    s.median_country_area = percentile(areas, 0.50);
    s.food_security_mean = mean(&food_sec);
    s.food_security_p10 = percentile(food_sec, 0.10);
    s.disease_burden_mean = mean(&disease);
    s.disease_burden_p90 = percentile(disease, 0.90);

    if live > 0 {
        s.capability_tier1_share = tier1 as f64 / live as f64;
        s.capability_tier2_share = tier2 as f64 / live as f64;
        s.capability_tier3_share = tier3 as f64 / live as f64;
    }
    if years_elapsed > 0 {
        s.war_frequency_per_century = 100.0 * war_starts as f64 / years_elapsed as f64;
    }

    let n = world.countries.len();
    if n > 1 && world.trade_intensity.len() >= n * n {
        let mut sum = 0.0;
        let mut count = 0usize;
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    sum += world.trade_intensity[i * n + j].max(0.0) as f64;
                    count += 1;
                }
            }
        }
        if count > 0 {
            s.trade_intensity = sum / count as f64;
        }
    }

    s
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::WorldBuilder;

    #[test]
    fn test_snapshot_totals() {
        let (world, ctx) = WorldBuilder::new().size(48, 48).countries(3).build();
        let s = compute_snapshot(&ctx, world.year, &world, 0, 1, 0);
        let expect: f64 = world.countries.iter().map(|c| c.population as f64).sum();
        assert_eq!(s.world_population, expect);
        assert!(s.urban_share >= 0.0 && s.urban_share <= 1.0);
        assert!(s.median_country_pop > 0.0);
    }

    #[test]
    fn test_war_frequency_scaling() {
        let (world, ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        let s = compute_snapshot(&ctx, world.year, &world, 3, 50, 0);
        assert!((s.war_frequency_per_century - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_rates() {
        let mut m = SimMetrics::default();
        assert_eq!(m.year_avg_ms(), 0.0);
        m.total_years = 10;
        m.total_time = Duration::from_secs(1);
        assert!((m.year_avg_ms() - 100.0).abs() < 1e-9);
        assert!((m.years_per_second() - 10.0).abs() < 1e-9);
    }
}
