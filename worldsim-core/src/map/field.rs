//! Coarse field grids at the fixed downsample factor.
//!
//! Field resolution is where control, climate, migration and urbanization
//! live. The downsample factor must equal the economy accelerator's cell
//! size; two field grids that disagree on it cannot interop.

use std::hash::{Hash, Hasher};

use crate::map::climate::{biome_move_cost, ClimateGrid};
use crate::map::layers::CellPotentials;
use crate::map::ownership::OwnershipLayer;
use crate::state::{Country, UNOWNED};

/// Downsample factor between the cell grid and the field grid.
pub const FIELD_CELL_SIZE: usize = 6;

#[derive(Debug, Clone)]
pub struct FieldGrid {
    pub width: usize,
    pub height: usize,
    pub owner: Vec<i32>,
    pub control: Vec<f32>,
    pub move_cost: Vec<f32>,
    pub corridor_weight: Vec<f32>,
    pub food_potential: Vec<f32>,
    pub land: Vec<bool>,
    /// Coastal land candidates (field indices), ascending.
    pub coastal_land: Vec<usize>,

    // Urbanization diagnostics, refreshed by the population stage.
    pub crowding: Vec<f32>,
    pub specialization: Vec<f32>,
    pub urban_share: Vec<f32>,
    pub urban_pop: Vec<f32>,
}

impl FieldGrid {
    pub fn new(cell_w: usize, cell_h: usize) -> Self {
        let width = cell_w.div_ceil(FIELD_CELL_SIZE);
        let height = cell_h.div_ceil(FIELD_CELL_SIZE);
        let n = width * height;
        Self {
            width,
            height,
            owner: vec![UNOWNED; n],
            control: vec![0.0; n],
            move_cost: vec![1.0; n],
            corridor_weight: vec![1.0; n],
            food_potential: vec![0.0; n],
            land: vec![false; n],
            coastal_land: Vec::new(),
            crowding: vec![0.0; n],
            specialization: vec![0.0; n],
            urban_share: vec![0.0; n],
            urban_pop: vec![0.0; n],
        }
    }

    #[inline]
    pub fn idx(&self, fx: usize, fy: usize) -> usize {
        fy * self.width + fx
    }

    /// Field cell containing a fine-grid cell.
    #[inline]
    pub fn field_of(&self, x: u16, y: u16) -> usize {
        let fx = (x as usize / FIELD_CELL_SIZE).min(self.width - 1);
        let fy = (y as usize / FIELD_CELL_SIZE).min(self.height - 1);
        fy * self.width + fx
    }

    /// 4-neighbors of a field index, row-major order.
    pub fn neighbors4(&self, idx: usize) -> impl Iterator<Item = usize> {
        let (w, h) = (self.width, self.height);
        let x = idx % w;
        let y = idx / w;
        let mut out = [usize::MAX; 4];
        let mut k = 0;
        if y > 0 {
            out[k] = idx - w;
            k += 1;
        }
        if x > 0 {
            out[k] = idx - 1;
            k += 1;
        }
        if x + 1 < w {
            out[k] = idx + 1;
            k += 1;
        }
        if y + 1 < h {
            out[k] = idx + w;
            k += 1;
        }
        out.into_iter().take(k)
    }

    pub fn rebuild_land_mask(&mut self, potentials: &CellPotentials) {
        for fy in 0..self.height {
            for fx in 0..self.width {
                let mut any = false;
                'block: for dy in 0..FIELD_CELL_SIZE {
                    for dx in 0..FIELD_CELL_SIZE {
                        let (x, y) = (fx * FIELD_CELL_SIZE + dx, fy * FIELD_CELL_SIZE + dy);
                        if x < potentials.width
                            && y < potentials.height
                            && potentials.land[y * potentials.width + x]
                        {
                            any = true;
                            break 'block;
                        }
                    }
                }
                let i = self.idx(fx, fy);
                self.land[i] = any;
            }
        }
    }

    pub fn rebuild_food_potential(&mut self, potentials: &CellPotentials) {
        for fy in 0..self.height {
            for fx in 0..self.width {
                let mut sum = 0.0f64;
                for dy in 0..FIELD_CELL_SIZE {
                    for dx in 0..FIELD_CELL_SIZE {
                        let (x, y) = (fx * FIELD_CELL_SIZE + dx, fy * FIELD_CELL_SIZE + dy);
                        if x < potentials.width && y < potentials.height {
                            sum += potentials.food[y * potentials.width + x];
                        }
                    }
                }
                let i = self.idx(fx, fy);
                self.food_potential[i] = sum as f32;
            }
        }
    }

    /// Majority vote of owned land cells per block; ties resolve to the
    /// lowest id, blocks with no owned cells stay unowned.
    pub fn rebuild_owner(&mut self, own: &OwnershipLayer) {
        let mut counts: Vec<u16> = vec![0; own.max_countries()];
        for fy in 0..self.height {
            for fx in 0..self.width {
                counts.iter_mut().for_each(|c| *c = 0);
                let mut seen_any = false;
                for dy in 0..FIELD_CELL_SIZE {
                    for dx in 0..FIELD_CELL_SIZE {
                        let (x, y) = ((fx * FIELD_CELL_SIZE + dx) as i32, (fy * FIELD_CELL_SIZE + dy) as i32);
                        let o = own.owner_at(x, y);
                        if o >= 0 {
                            counts[o as usize] += 1;
                            seen_any = true;
                        }
                    }
                }
                let i = self.idx(fx, fy);
                if !seen_any {
                    self.owner[i] = UNOWNED;
                    continue;
                }
                let mut best = UNOWNED;
                let mut best_count = 0u16;
                for (id, &c) in counts.iter().enumerate() {
                    // `>` keeps the lowest id on ties.
                    if c > best_count {
                        best_count = c;
                        best = id as i32;
                    }
                }
                self.owner[i] = best;
            }
        }
    }

    /// Biome base cost, discounted by roads and ports, lowered on riverland.
    pub fn rebuild_move_cost(
        &mut self,
        climate: &ClimateGrid,
        potentials: &CellPotentials,
        countries: &[Country],
    ) {
        let n = self.width * self.height;
        let mut road_cells = vec![0u16; n];
        let mut port_cells = vec![0u16; n];
        for c in countries {
            for &(x, y) in &c.roads {
                road_cells[self.field_of(x, y)] += 1;
            }
            for &(x, y) in &c.ports {
                port_cells[self.field_of(x, y)] += 1;
            }
        }

        // Riverland share per block.
        for fy in 0..self.height {
            for fx in 0..self.width {
                let i = self.idx(fx, fy);
                if !self.land[i] {
                    self.move_cost[i] = 25.0;
                    self.corridor_weight[i] = 0.0;
                    continue;
                }
                let mut river_cells = 0usize;
                let mut land_cells = 0usize;
                for dy in 0..FIELD_CELL_SIZE {
                    for dx in 0..FIELD_CELL_SIZE {
                        let (x, y) = (fx * FIELD_CELL_SIZE + dx, fy * FIELD_CELL_SIZE + dy);
                        if x < potentials.width && y < potentials.height {
                            let ci = y * potentials.width + x;
                            if potentials.land[ci] {
                                land_cells += 1;
                                if potentials.riverland[ci] {
                                    river_cells += 1;
                                }
                            }
                        }
                    }
                }
                let river_share = if land_cells > 0 {
                    river_cells as f32 / land_cells as f32
                } else {
                    0.0
                };

                let mut cost = biome_move_cost(climate.biome[i]);
                if road_cells[i] > 0 {
                    cost *= 0.55;
                }
                if port_cells[i] > 0 {
                    cost *= 0.85;
                }
                cost *= 1.0 - 0.20 * river_share;
                self.move_cost[i] = cost.max(0.05);

                // Corridors: rivers and coasts are the preferred migration
                // channels.
                let coastal = self.coastal_land.binary_search(&i).is_ok();
                self.corridor_weight[i] =
                    1.0 + 0.8 * river_share + if coastal { 0.4 } else { 0.0 };
            }
        }
    }

    /// Field indices whose block contains coastal land, ascending.
    pub fn rebuild_coastal_candidates(&mut self, potentials: &CellPotentials) {
        self.coastal_land.clear();
        for fy in 0..self.height {
            for fx in 0..self.width {
                let mut coastal = false;
                'block: for dy in 0..FIELD_CELL_SIZE {
                    for dx in 0..FIELD_CELL_SIZE {
                        let (x, y) = (fx * FIELD_CELL_SIZE + dx, fy * FIELD_CELL_SIZE + dy);
                        if x < potentials.width
                            && y < potentials.height
                            && potentials.coastal[y * potentials.width + x]
                        {
                            coastal = true;
                            break 'block;
                        }
                    }
                }
                if coastal {
                    self.coastal_land.push(self.idx(fx, fy));
                }
            }
        }
    }

    pub fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        self.owner.hash(hasher);
        for v in &self.control {
            v.to_bits().hash(hasher);
        }
        for v in &self.move_cost {
            v.to_bits().hash(hasher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimConfig, EXAMPLE_CONFIG_TOML};
    use crate::map::layers::{derive_potentials, MapLayers};
    use crate::map::ownership::OwnershipLayer;

    fn setup() -> (OwnershipLayer, FieldGrid) {
        let mut layers = MapLayers::water(24, 24);
        for y in 0..24 {
            for x in 0..18 {
                let i = layers.idx(x, y);
                layers.land[i] = true;
            }
        }
        let cfg = SimConfig::from_toml_str(EXAMPLE_CONFIG_TOML).unwrap();
        let potentials = derive_potentials(&layers, &cfg, 1);
        let mut fields = FieldGrid::new(24, 24);
        fields.rebuild_land_mask(&potentials);
        fields.rebuild_food_potential(&potentials);
        (OwnershipLayer::new(potentials, 8), fields)
    }

    #[test]
    fn test_dimensions_round_up() {
        let f = FieldGrid::new(25, 13);
        assert_eq!(f.width, 5);
        assert_eq!(f.height, 3);
    }

    #[test]
    fn test_majority_vote_with_tie_to_lowest_id() {
        let (mut own, mut fields) = setup();
        // Field (0,0) covers cells 0..6 x 0..6. Give 3 cells to id 2 and
        // 3 cells to id 1: tie resolves to the lower id.
        for x in 0..3 {
            own.set_owner(x, 0, 2);
            own.set_owner(x, 1, 1);
        }
        fields.rebuild_owner(&own);
        assert_eq!(fields.owner[0], 1);
        // A block with no owned cells stays unowned.
        assert_eq!(fields.owner[fields.idx(1, 1)], UNOWNED);
    }

    #[test]
    fn test_food_potential_sums_block() {
        let (own, fields) = setup();
        let p = own.potentials();
        let mut expect = 0.0f64;
        for y in 0..6 {
            for x in 0..6 {
                expect += p.food[y * 24 + x];
            }
        }
        assert!((fields.food_potential[0] as f64 - expect).abs() < 1e-3);
    }

    #[test]
    fn test_land_mask_and_neighbors() {
        let (_, fields) = setup();
        assert!(fields.land[0]);
        // Column 3 of the field grid covers cells 18..24: all water.
        assert!(!fields.land[fields.idx(3, 0)]);
        let n: Vec<usize> = fields.neighbors4(fields.idx(1, 1)).collect();
        assert_eq!(n.len(), 4);
        // Row-major order: up, left, right, down.
        assert_eq!(n, vec![fields.idx(1, 0), fields.idx(0, 1), fields.idx(2, 1), fields.idx(1, 2)]);
    }
}
