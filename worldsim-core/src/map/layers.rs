//! Static input layers and the derived per-cell resource potentials.
//!
//! Drivers decode the PNG layer stack into [`MapLayers`]; the kernel turns
//! that into [`CellPotentials`] once at init. Potentials are immutable for
//! the rest of the run (read-mostly, shared via `Arc`).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::SimConfig;
use crate::context::unit_hash;

/// Resource types matched by exact palette color in the resource layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    Food,
    Horses,
    Salt,
    Iron,
    Coal,
    Gold,
}

/// Decoded input layers. All layers must share the base map's dimensions;
/// the driver validates sizes before constructing this.
#[derive(Debug, Clone)]
pub struct MapLayers {
    pub width: usize,
    pub height: usize,
    pub land: Vec<bool>,
    pub resource: Vec<Option<ResourceKind>>,
    pub coal: Vec<bool>,
    pub copper: Vec<bool>,
    pub tin: Vec<bool>,
    pub riverland: Vec<bool>,
    pub spawn: Vec<bool>,
}

impl MapLayers {
    /// An all-water world of the given size (tests grow land into it).
    pub fn water(width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            width,
            height,
            land: vec![false; n],
            resource: vec![None; n],
            coal: vec![false; n],
            copper: vec![false; n],
            tin: vec![false; n],
            riverland: vec![false; n],
            spawn: vec![false; n],
        }
    }

    #[inline]
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }
}

/// Immutable per-cell potentials derived from the input layers.
#[derive(Debug, Clone)]
pub struct CellPotentials {
    pub width: usize,
    pub height: usize,
    pub land: Vec<bool>,
    pub coastal: Vec<bool>,
    pub riverland: Vec<bool>,
    pub food: Vec<f64>,
    pub foraging: Vec<f64>,
    pub farming: Vec<f64>,
    pub ore: Vec<f64>,
    pub energy: Vec<f64>,
    pub construction: Vec<f64>,
    pub non_food: Vec<f64>,
}

impl CellPotentials {
    #[inline]
    pub fn idx(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    #[inline]
    pub fn is_land(&self, x: i32, y: i32) -> bool {
        self.in_bounds(x, y) && self.land[y as usize * self.width + x as usize]
    }
}

/// Latitude weight in [0, 1]: 1 at the map equator, falling toward poles.
#[inline]
fn latitude_weight(y: usize, height: usize) -> f64 {
    let lat = ((y as f64 / (height.max(2) - 1) as f64) - 0.5).abs() * 2.0;
    (1.0 - lat * lat).max(0.0)
}

/// Derive the static resource potentials. Salt in the derivation below: the
/// humidity proxy comes from riverland plus coastal adjacency; the formula
/// weights latitude, humidity and coast exactly once each.
pub fn derive_potentials(
    layers: &MapLayers,
    cfg: &SimConfig,
    world_seed: u64,
) -> Arc<CellPotentials> {
    let (w, h) = (layers.width, layers.height);
    let n = w * h;

    // 8-neighbor coastal adjacency.
    let mut coastal = vec![false; n];
    for y in 0..h {
        for x in 0..w {
            let i = y * w + x;
            if !layers.land[i] {
                continue;
            }
            'scan: for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x as i32 + dx, y as i32 + dy);
                    if nx < 0 || ny < 0 || nx as usize >= w || ny as usize >= h {
                        continue;
                    }
                    if !layers.land[ny as usize * w + nx as usize] {
                        coastal[i] = true;
                        break 'scan;
                    }
                }
            }
        }
    }

    let food_cfg = &cfg.food;
    let res_cfg = &cfg.resources;

    let mut food = vec![0.0; n];
    let mut foraging = vec![0.0; n];
    let mut farming = vec![0.0; n];
    let mut ore = vec![0.0; n];
    let mut energy = vec![0.0; n];
    let mut construction = vec![0.0; n];
    let mut non_food = vec![0.0; n];

    for y in 0..h {
        let lat_w = latitude_weight(y, h);
        for x in 0..w {
            let i = y * w + x;
            if !layers.land[i] {
                continue;
            }
            let river = layers.riverland[i];
            let coast = coastal[i];
            let humidity = 0.25 + 0.45 * f64::from(u8::from(river)) + 0.30 * f64::from(u8::from(coast));
            let coast_mult = 1.0 + if coast { food_cfg.coastal_bonus } else { 0.0 };

            foraging[i] = food_cfg.base_foraging * (0.35 + 0.65 * lat_w) * humidity * coast_mult;
            farming[i] = food_cfg.base_farming * lat_w * (0.30 + 0.70 * humidity);

            let mut f = (0.6 * foraging[i] + 0.8 * farming[i]) * coast_mult;
            if river {
                f = f.max(food_cfg.riverland_food_floor);
            }
            if layers.resource[i] == Some(ResourceKind::Food) {
                f += 0.5;
            }
            food[i] = f;

            // Ore: weighted iron/copper/tin presence.
            let iron = f64::from(u8::from(layers.resource[i] == Some(ResourceKind::Iron)));
            let copper = f64::from(u8::from(layers.copper[i]));
            let tin = f64::from(u8::from(layers.tin[i]));
            ore[i] = (iron * res_cfg.ore_weight_iron
                + copper * res_cfg.ore_weight_copper
                + tin * res_cfg.ore_weight_tin)
                / res_cfg.ore_normalization.max(1e-9);

            // Energy: biomass proxy (vegetation) + coal deposits.
            let biomass = 0.4 * lat_w * humidity;
            let coal = f64::from(u8::from(layers.coal[i] || layers.resource[i] == Some(ResourceKind::Coal)));
            energy[i] = (biomass + coal) / cfg.resources.energy_normalization.max(1e-9);

            // Construction: clay (riverland-boosted, occasional hotspot) plus
            // a dry-land stone proxy.
            let clay_roll = unit_hash(world_seed, 0, i as u64, 0x11);
            let mut clay = food_cfg.clay_min
                + (food_cfg.clay_max - food_cfg.clay_min) * humidity * f64::from(u8::from(river));
            if clay_roll < food_cfg.clay_hotspot_chance {
                clay = food_cfg.clay_max;
            }
            let stone = 0.25 * (1.0 - humidity);
            construction[i] =
                (clay + stone) / cfg.resources.construction_normalization.max(1e-9);

            non_food[i] = 0.5 * ore[i] + 0.3 * energy[i] + 0.2 * construction[i];
        }
    }

    Arc::new(CellPotentials {
        width: w,
        height: h,
        land: layers.land.clone(),
        coastal,
        riverland: layers.riverland.clone(),
        food,
        foraging,
        farming,
        ore,
        energy,
        construction,
        non_food,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimConfig, EXAMPLE_CONFIG_TOML};

    fn island_layers() -> MapLayers {
        let mut layers = MapLayers::water(16, 16);
        for y in 4..12 {
            for x in 4..12 {
                let i = layers.idx(x, y);
                layers.land[i] = true;
            }
        }
        let i = layers.idx(6, 6);
        layers.riverland[i] = true;
        layers
    }

    fn cfg() -> SimConfig {
        SimConfig::from_toml_str(EXAMPLE_CONFIG_TOML).unwrap()
    }

    #[test]
    fn test_water_cells_have_no_potential() {
        let p = derive_potentials(&island_layers(), &cfg(), 1);
        assert_eq!(p.food[0], 0.0);
        assert_eq!(p.non_food[0], 0.0);
        assert!(!p.land[0]);
    }

    #[test]
    fn test_coastal_cells_detected() {
        let layers = island_layers();
        let p = derive_potentials(&layers, &cfg(), 1);
        // Edge of the island touches water; the center does not.
        assert!(p.coastal[p.idx(4, 4)]);
        assert!(!p.coastal[p.idx(8, 8)]);
    }

    #[test]
    fn test_riverland_food_floor() {
        let layers = island_layers();
        let c = cfg();
        let p = derive_potentials(&layers, &c, 1);
        assert!(p.food[p.idx(6, 6)] >= c.food.riverland_food_floor);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let layers = island_layers();
        let c = cfg();
        let a = derive_potentials(&layers, &c, 7);
        let b = derive_potentials(&layers, &c, 7);
        assert_eq!(a.food, b.food);
        assert_eq!(a.construction, b.construction);
    }
}
