//! Climate baseline and dynamic weather anomalies at field resolution.
//!
//! The baseline (temperature, precipitation, biome) is computed once from
//! map geometry. Weather is an AR(1) anomaly pair on a coarse grid (1/8 of
//! field resolution) driven by hashed noise, upsampled nearest-neighbor and
//! folded into the per-field food-yield multiplier.

use std::hash::{Hash, Hasher};

use crate::context::SimulationContext;
use crate::map::field::FieldGrid;
use crate::map::layers::CellPotentials;
use crate::state::CountryId;

pub const BIOME_ICE: u8 = 0;
pub const BIOME_TUNDRA: u8 = 1;
pub const BIOME_TAIGA: u8 = 2;
pub const BIOME_TEMPERATE_FOREST: u8 = 3;
pub const BIOME_GRASSLAND: u8 = 4;
pub const BIOME_DESERT: u8 = 5;
pub const BIOME_SAVANNA: u8 = 6;
pub const BIOME_TROPICAL_FOREST: u8 = 7;
pub const BIOME_MEDITERRANEAN: u8 = 8;
pub const BIOME_WATER: u8 = 255;

/// Food-yield multiplier bounds.
pub const YIELD_MULT_MIN: f64 = 0.05;
pub const YIELD_MULT_MAX: f64 = 1.80;

const WEATHER_DOWNSAMPLE: usize = 8;
const WEATHER_PERIOD_YEARS: i32 = 2;
const AR1_PERSISTENCE: f64 = 0.72;
const TEMP_ANOM_SCALE: f64 = 2.2;
const PRECIP_ANOM_SCALE: f64 = 0.22;
const SALT_WEATHER_TEMP: u64 = 0x57;
const SALT_WEATHER_PRECIP: u64 = 0x58;

#[derive(Debug, Clone)]
pub struct ClimateGrid {
    pub width: usize,
    pub height: usize,
    pub climate_zone: Vec<u8>,
    pub biome: Vec<u8>,
    pub temp_mean: Vec<f32>,
    pub precip_mean: Vec<f32>,
    pub temp_anom: Vec<f32>,
    pub precip_anom: Vec<f32>,
    pub food_yield_mult: Vec<f32>,

    weather_w: usize,
    weather_h: usize,
    weather_temp: Vec<f32>,
    weather_precip: Vec<f32>,
    pub last_weather_year: i32,

    country_food_mult: Vec<f32>,
    country_cache_valid: bool,
}

impl ClimateGrid {
    pub fn new(field_w: usize, field_h: usize) -> Self {
        let n = field_w * field_h;
        let weather_w = (field_w / WEATHER_DOWNSAMPLE).max(1);
        let weather_h = (field_h / WEATHER_DOWNSAMPLE).max(1);
        Self {
            width: field_w,
            height: field_h,
            climate_zone: vec![BIOME_WATER; n],
            biome: vec![BIOME_WATER; n],
            temp_mean: vec![0.0; n],
            precip_mean: vec![0.0; n],
            temp_anom: vec![0.0; n],
            precip_anom: vec![0.0; n],
            food_yield_mult: vec![1.0; n],
            weather_w,
            weather_h,
            weather_temp: vec![0.0; weather_w * weather_h],
            weather_precip: vec![0.0; weather_w * weather_h],
            last_weather_year: i32::MIN,
            country_food_mult: Vec::new(),
            country_cache_valid: false,
        }
    }

    /// Compute the static baseline: coastal proximity by BFS from water,
    /// a west-to-east rain-shadow advection factor, latitude temperature,
    /// banded precipitation and the biome classification.
    pub fn initialize_baseline(&mut self, fields: &FieldGrid, potentials: &CellPotentials) {
        let (w, h) = (self.width, self.height);
        let n = w * h;

        // BFS distance-to-water at field resolution.
        let mut dist = vec![u32::MAX; n];
        let mut queue = std::collections::VecDeque::new();
        for i in 0..n {
            if !fields.land[i] {
                dist[i] = 0;
                queue.push_back(i);
            }
        }
        while let Some(i) = queue.pop_front() {
            let (x, y) = (i % w, i / w);
            let d = dist[i];
            let mut push = |nx: usize, ny: usize| {
                let j = ny * w + nx;
                if dist[j] == u32::MAX {
                    dist[j] = d + 1;
                    queue.push_back(j);
                }
            };
            if x > 0 {
                push(x - 1, y);
            }
            if x + 1 < w {
                push(x + 1, y);
            }
            if y > 0 {
                push(x, y - 1);
            }
            if y + 1 < h {
                push(x, y + 1);
            }
        }

        // Longitudinal advection: moisture carried eastward decays over land.
        let mut advection = vec![1.0f64; n];
        for y in 0..h {
            let mut moisture = 1.0f64;
            for x in 0..w {
                let i = y * w + x;
                if fields.land[i] {
                    moisture *= 0.965;
                } else {
                    moisture = (moisture + 0.30).min(1.0);
                }
                advection[i] = moisture;
            }
        }

        for y in 0..h {
            // Latitude in [-1, 1], 0 at the map equator.
            let lat = (y as f64 / (h.max(2) - 1) as f64) * 2.0 - 1.0;
            for x in 0..w {
                let i = y * w + x;
                if !fields.land[i] {
                    self.climate_zone[i] = BIOME_WATER;
                    self.biome[i] = BIOME_WATER;
                    self.temp_mean[i] = 0.0;
                    self.precip_mean[i] = 0.0;
                    continue;
                }
                let coast_prox = match dist[i] {
                    0..=1 => 1.0,
                    d => (1.0 / (1.0 + 0.25 * d as f64)).max(0.05),
                };

                // Latitude temperature curve moderated by coastal proximity
                // (oceans damp the extremes).
                let t_equator = 27.0;
                let t = t_equator - 40.0 * lat * lat;
                let t = t * (1.0 - 0.12 * coast_prox) + 8.0 * coast_prox * (1.0 - lat.abs());
                self.temp_mean[i] = t as f32;

                // Banded precipitation: equatorial wet, subtropical dry,
                // mid-latitude wet, polar dry; advection + coastal boost.
                let a = lat.abs();
                let equatorial = (-(a / 0.18) * (a / 0.18)).exp();
                let subtropical_dry = -0.65 * (-((a - 0.38) / 0.12) * ((a - 0.38) / 0.12)).exp();
                let mid_wet = 0.75 * (-((a - 0.62) / 0.15) * ((a - 0.62) / 0.15)).exp();
                let polar_dry = -0.35 * (-((a - 1.0) / 0.18) * ((a - 1.0) / 0.18)).exp();
                let band = 0.42 + equatorial + subtropical_dry + mid_wet + polar_dry;
                let p = (band * (0.35 + 0.65 * advection[i]) + 0.18 * coast_prox).clamp(0.0, 1.0);
                self.precip_mean[i] = p as f32;

                self.climate_zone[i] = classify_zone(a);
                self.biome[i] = classify_biome(t, p, coast_prox > 0.6);
            }
        }

        // Riverland wetness nudges the yield baseline through the biome's
        // food factor; recompute the multiplier field once so year -inf
        // state is already consistent.
        let _ = potentials;
        self.recompute_yield_multiplier(fields);
    }

    /// Advance weather anomalies. Runs the AR(1) update every second
    /// simulated year (or whenever a mega jump covers more than one year),
    /// then refreshes the yield multiplier field.
    pub fn tick_weather(&mut self, ctx: &SimulationContext, year: i32, dt_years: i32, fields: &FieldGrid) {
        let due = self.last_weather_year == i32::MIN
            || dt_years > 1
            || year - self.last_weather_year >= WEATHER_PERIOD_YEARS;
        if !due {
            return;
        }
        self.last_weather_year = year;

        for cy in 0..self.weather_h {
            for cx in 0..self.weather_w {
                let i = cy * self.weather_w + cx;
                let cell = (cy * self.weather_w + cx) as u64;
                let ut = ctx.unit(year, cell, SALT_WEATHER_TEMP) * 2.0 - 1.0;
                let up = ctx.unit(year, cell, SALT_WEATHER_PRECIP) * 2.0 - 1.0;
                let t = AR1_PERSISTENCE * self.weather_temp[i] as f64
                    + (1.0 - AR1_PERSISTENCE) * ut * TEMP_ANOM_SCALE;
                let p = AR1_PERSISTENCE * self.weather_precip[i] as f64
                    + (1.0 - AR1_PERSISTENCE) * up * PRECIP_ANOM_SCALE;
                self.weather_temp[i] = t as f32;
                self.weather_precip[i] = p as f32;
            }
        }

        // Nearest-neighbor upsample to field resolution.
        for fy in 0..self.height {
            let cy = (fy / WEATHER_DOWNSAMPLE).min(self.weather_h - 1);
            for fx in 0..self.width {
                let cx = (fx / WEATHER_DOWNSAMPLE).min(self.weather_w - 1);
                let i = fy * self.width + fx;
                let c = cy * self.weather_w + cx;
                self.temp_anom[i] = self.weather_temp[c];
                self.precip_anom[i] = self.weather_precip[c];
            }
        }

        self.recompute_yield_multiplier(fields);
        self.country_cache_valid = false;
    }

    fn recompute_yield_multiplier(&mut self, fields: &FieldGrid) {
        for i in 0..self.width * self.height {
            if !fields.land[i] {
                self.food_yield_mult[i] = 1.0;
                continue;
            }
            let t = self.temp_mean[i] as f64 + self.temp_anom[i] as f64;
            let p = (self.precip_mean[i] as f64 + self.precip_anom[i] as f64).clamp(0.0, 1.0);
            let base = biome_yield_base(self.biome[i]);
            let m = base * temp_response(t) * precip_response(p);
            self.food_yield_mult[i] = m.clamp(YIELD_MULT_MIN, YIELD_MULT_MAX) as f32;
        }
    }

    /// Food-potential-weighted average multiplier per country. Cached until
    /// the next weather tick.
    pub fn aggregate_country_multipliers(&mut self, fields: &FieldGrid, country_count: usize) {
        if self.country_cache_valid && self.country_food_mult.len() >= country_count {
            return;
        }
        let mut weighted = vec![0.0f64; country_count];
        let mut weights = vec![0.0f64; country_count];
        for i in 0..self.width * self.height {
            let owner = fields.owner[i];
            if owner < 0 || owner as usize >= country_count {
                continue;
            }
            let w = fields.food_potential[i] as f64;
            weighted[owner as usize] += w * self.food_yield_mult[i] as f64;
            weights[owner as usize] += w;
        }
        self.country_food_mult = (0..country_count)
            .map(|i| {
                if weights[i] > 1e-9 {
                    (weighted[i] / weights[i]) as f32
                } else {
                    1.0
                }
            })
            .collect();
        self.country_cache_valid = true;
    }

    pub fn country_food_multiplier(&self, id: CountryId) -> f64 {
        self.country_food_mult
            .get(id as usize)
            .copied()
            .unwrap_or(1.0) as f64
    }

    pub fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        self.last_weather_year.hash(hasher);
        for v in &self.weather_temp {
            v.to_bits().hash(hasher);
        }
        for v in &self.weather_precip {
            v.to_bits().hash(hasher);
        }
        for v in &self.food_yield_mult {
            v.to_bits().hash(hasher);
        }
    }
}

fn classify_zone(abs_lat: f64) -> u8 {
    if abs_lat < 0.2 {
        0
    } else if abs_lat < 0.45 {
        1
    } else if abs_lat < 0.7 {
        2
    } else if abs_lat < 0.9 {
        3
    } else {
        4
    }
}

/// Piecewise biome mapping on (temperature, precipitation, coastal).
fn classify_biome(t: f64, p: f64, coastal: bool) -> u8 {
    if t < -8.0 {
        BIOME_ICE
    } else if t < 0.0 {
        BIOME_TUNDRA
    } else if t < 8.0 {
        BIOME_TAIGA
    } else if t < 19.0 {
        if p < 0.22 {
            BIOME_DESERT
        } else if coastal && p < 0.45 {
            BIOME_MEDITERRANEAN
        } else if p < 0.40 {
            BIOME_GRASSLAND
        } else {
            BIOME_TEMPERATE_FOREST
        }
    } else if p < 0.20 {
        BIOME_DESERT
    } else if p < 0.48 {
        BIOME_SAVANNA
    } else {
        BIOME_TROPICAL_FOREST
    }
}

pub fn biome_yield_base(biome: u8) -> f64 {
    match biome {
        BIOME_ICE => 0.05,
        BIOME_TUNDRA => 0.35,
        BIOME_TAIGA => 0.60,
        BIOME_TEMPERATE_FOREST => 1.15,
        BIOME_GRASSLAND => 1.10,
        BIOME_DESERT => 0.25,
        BIOME_SAVANNA => 0.90,
        BIOME_TROPICAL_FOREST => 1.00,
        BIOME_MEDITERRANEAN => 1.05,
        _ => 1.0,
    }
}

/// Crop temperature response: optimum around 18 C, hard losses at extremes.
fn temp_response(t: f64) -> f64 {
    let d = (t - 18.0) / 14.0;
    (0.10 + 1.05 * (-d * d).exp()).min(1.2)
}

/// Precipitation response: optimum around 0.55.
fn precip_response(p: f64) -> f64 {
    let d = (p - 0.55) / 0.30;
    (0.15 + 1.00 * (-d * d).exp()).min(1.15)
}

/// Biome base move cost used by the field move-cost grid.
pub fn biome_move_cost(biome: u8) -> f32 {
    match biome {
        BIOME_ICE => 6.0,
        BIOME_TUNDRA => 3.5,
        BIOME_TAIGA => 2.8,
        BIOME_TEMPERATE_FOREST => 1.6,
        BIOME_GRASSLAND => 1.2,
        BIOME_DESERT => 3.0,
        BIOME_SAVANNA => 1.5,
        BIOME_TROPICAL_FOREST => 2.6,
        BIOME_MEDITERRANEAN => 1.4,
        _ => 25.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_biome_classification_extremes() {
        assert_eq!(classify_biome(-20.0, 0.5, false), BIOME_ICE);
        assert_eq!(classify_biome(25.0, 0.1, false), BIOME_DESERT);
        assert_eq!(classify_biome(25.0, 0.8, false), BIOME_TROPICAL_FOREST);
        assert_eq!(classify_biome(14.0, 0.6, false), BIOME_TEMPERATE_FOREST);
        assert_eq!(classify_biome(14.0, 0.35, true), BIOME_MEDITERRANEAN);
    }

    #[test]
    fn test_responses_bounded() {
        for t in -40..60 {
            let r = temp_response(t as f64);
            assert!(r > 0.0 && r <= 1.2);
        }
        for p in 0..=20 {
            let r = precip_response(p as f64 / 20.0);
            assert!(r > 0.0 && r <= 1.15);
        }
    }

    #[test]
    fn test_yield_mult_clamped() {
        for biome in 0..9u8 {
            for t in [-30.0, 0.0, 18.0, 45.0] {
                for p in [0.0, 0.55, 1.0] {
                    let m = (biome_yield_base(biome) * temp_response(t) * precip_response(p))
                        .clamp(YIELD_MULT_MIN, YIELD_MULT_MAX);
                    assert!((YIELD_MULT_MIN..=YIELD_MULT_MAX).contains(&m));
                }
            }
        }
    }
}
