//! Territorial ownership grid with incremental adjacency and per-owner
//! aggregates.
//!
//! `set_owner_synced` is the only legal way to change ownership. Each write
//! atomically updates (a) the grid cell, (b) the 8-neighbor border-contact
//! counts between the affected owners, (c) the derived adjacency lists and
//! bitsets, (d) the per-owner potential sums, and (e) the owning countries'
//! canonical territory vectors. Writing directly to the grid would desync
//! all of these, so the raw grid is never exposed mutably.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::map::layers::CellPotentials;
use crate::state::{Cell, Country, CountryId, UNOWNED};

#[derive(Debug)]
pub struct OwnershipLayer {
    width: usize,
    height: usize,
    potentials: Arc<CellPotentials>,
    owner: Vec<i32>,

    // Incremental adjacency tracking (border-contact counts).
    //
    // `border_contact[a][b]` is the number of 8-adjacent owned-cell pairs
    // between countries a and b; the lists and bitsets are derived from it
    // and updated on every 0<->1 transition.
    border_contact: Vec<Vec<u32>>,
    adjacency: Vec<Vec<CountryId>>,
    adjacency_bits: Vec<Vec<u64>>,

    // Per-owner aggregates.
    land_cell_count: Vec<usize>,
    food_sum: Vec<f64>,
    foraging_sum: Vec<f64>,
    farming_sum: Vec<f64>,
    ore_sum: Vec<f64>,
    energy_sum: Vec<f64>,
    construction_sum: Vec<f64>,
    non_food_sum: Vec<f64>,
}

const NEIGHBORS_8: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

impl OwnershipLayer {
    pub fn new(potentials: Arc<CellPotentials>, max_countries: usize) -> Self {
        let (width, height) = (potentials.width, potentials.height);
        let words = max_countries.div_ceil(64);
        Self {
            width,
            height,
            potentials,
            owner: vec![UNOWNED; width * height],
            border_contact: vec![vec![0; max_countries]; max_countries],
            adjacency: vec![Vec::new(); max_countries],
            adjacency_bits: vec![vec![0u64; words]; max_countries],
            land_cell_count: vec![0; max_countries],
            food_sum: vec![0.0; max_countries],
            foraging_sum: vec![0.0; max_countries],
            farming_sum: vec![0.0; max_countries],
            ore_sum: vec![0.0; max_countries],
            energy_sum: vec![0.0; max_countries],
            construction_sum: vec![0.0; max_countries],
            non_food_sum: vec![0.0; max_countries],
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn max_countries(&self) -> usize {
        self.land_cell_count.len()
    }

    #[inline]
    pub fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }

    #[inline]
    pub fn is_land(&self, x: i32, y: i32) -> bool {
        self.potentials.is_land(x, y)
    }

    #[inline]
    pub fn owner_at(&self, x: i32, y: i32) -> i32 {
        if !self.in_bounds(x, y) {
            return UNOWNED;
        }
        self.owner[y as usize * self.width + x as usize]
    }

    pub fn owner_grid(&self) -> &[i32] {
        &self.owner
    }

    pub fn potentials(&self) -> &CellPotentials {
        &self.potentials
    }

    /// Change a cell's owner without touching any country's territory vector.
    /// Only valid before countries exist (world generation bootstraps) and in
    /// grid-level tests; simulation code uses `set_owner_synced`.
    pub fn set_owner(&mut self, x: i32, y: i32, new_owner: i32) -> bool {
        self.set_owner_impl(x, y, new_owner).is_some()
    }

    /// The authoritative ownership write. Returns false (no side effects) for
    /// out-of-bounds or ocean cells; a same-owner write is a silent no-op.
    pub fn set_owner_synced(
        &mut self,
        x: i32,
        y: i32,
        new_owner: i32,
        countries: &mut [Country],
    ) -> bool {
        let Some(old_owner) = self.set_owner_impl(x, y, new_owner) else {
            return false;
        };
        let cell: Cell = (x as u16, y as u16);
        if old_owner >= 0 {
            if let Some(c) = countries.get_mut(old_owner as usize) {
                c.remove_territory_cell(cell);
            }
        }
        if new_owner >= 0 {
            if let Some(c) = countries.get_mut(new_owner as usize) {
                c.add_territory_cell(cell);
            }
        }
        true
    }

    /// Returns `Some(old_owner)` when the grid changed, `None` otherwise.
    fn set_owner_impl(&mut self, x: i32, y: i32, new_owner: i32) -> Option<i32> {
        if !self.in_bounds(x, y) || !self.is_land(x, y) {
            return None;
        }
        if new_owner >= 0 && new_owner as usize >= self.max_countries() {
            return None;
        }
        let i = y as usize * self.width + x as usize;
        let old_owner = self.owner[i];
        if old_owner == new_owner {
            // Idempotent: a same-value write is a no-op.
            return None;
        }

        // Border-contact updates for the 8 neighbors.
        for (dx, dy) in NEIGHBORS_8 {
            let (nx, ny) = (x + dx, y + dy);
            if !self.in_bounds(nx, ny) {
                continue;
            }
            let neighbor = self.owner[ny as usize * self.width + nx as usize];
            if neighbor < 0 {
                continue;
            }
            if old_owner >= 0 && neighbor != old_owner {
                self.remove_border_contact(old_owner as usize, neighbor as usize);
            }
            if new_owner >= 0 && neighbor != new_owner {
                self.add_border_contact(new_owner as usize, neighbor as usize);
            }
        }

        self.owner[i] = new_owner;

        // Per-owner aggregate adjustments from the cell's precomputed
        // potentials.
        let p = &self.potentials;
        if old_owner >= 0 {
            let o = old_owner as usize;
            self.land_cell_count[o] -= 1;
            self.food_sum[o] -= p.food[i];
            self.foraging_sum[o] -= p.foraging[i];
            self.farming_sum[o] -= p.farming[i];
            self.ore_sum[o] -= p.ore[i];
            self.energy_sum[o] -= p.energy[i];
            self.construction_sum[o] -= p.construction[i];
            self.non_food_sum[o] -= p.non_food[i];
        }
        if new_owner >= 0 {
            let o = new_owner as usize;
            self.land_cell_count[o] += 1;
            self.food_sum[o] += p.food[i];
            self.foraging_sum[o] += p.foraging[i];
            self.farming_sum[o] += p.farming[i];
            self.ore_sum[o] += p.ore[i];
            self.energy_sum[o] += p.energy[i];
            self.construction_sum[o] += p.construction[i];
            self.non_food_sum[o] += p.non_food[i];
        }

        Some(old_owner)
    }

    fn add_border_contact(&mut self, a: usize, b: usize) {
        self.border_contact[a][b] += 1;
        self.border_contact[b][a] += 1;
        if self.border_contact[a][b] == 1 {
            self.set_adjacency_edge(a, b, true);
        }
    }

    fn remove_border_contact(&mut self, a: usize, b: usize) {
        debug_assert!(self.border_contact[a][b] > 0);
        self.border_contact[a][b] -= 1;
        self.border_contact[b][a] -= 1;
        if self.border_contact[a][b] == 0 {
            self.set_adjacency_edge(a, b, false);
        }
    }

    fn set_adjacency_edge(&mut self, a: usize, b: usize, is_neighbor: bool) {
        let (wa, ba) = (b / 64, b % 64);
        let (wb, bb) = (a / 64, a % 64);
        if is_neighbor {
            self.adjacency_bits[a][wa] |= 1u64 << ba;
            self.adjacency_bits[b][wb] |= 1u64 << bb;
            // Insert keeping the neighbor list sorted so iteration order is
            // canonical.
            if let Err(pos) = self.adjacency[a].binary_search(&(b as CountryId)) {
                self.adjacency[a].insert(pos, b as CountryId);
            }
            if let Err(pos) = self.adjacency[b].binary_search(&(a as CountryId)) {
                self.adjacency[b].insert(pos, a as CountryId);
            }
        } else {
            self.adjacency_bits[a][wa] &= !(1u64 << ba);
            self.adjacency_bits[b][wb] &= !(1u64 << bb);
            if let Ok(pos) = self.adjacency[a].binary_search(&(b as CountryId)) {
                self.adjacency[a].remove(pos);
            }
            if let Ok(pos) = self.adjacency[b].binary_search(&(a as CountryId)) {
                self.adjacency[b].remove(pos);
            }
        }
    }

    /// O(1) adjacency query via the bitset row.
    #[inline]
    pub fn are_neighbors(&self, a: CountryId, b: CountryId) -> bool {
        let (a, b) = (a as usize, b as usize);
        if a >= self.adjacency_bits.len() || b >= self.max_countries() {
            return false;
        }
        (self.adjacency_bits[a][b / 64] >> (b % 64)) & 1 == 1
    }

    /// Number of 8-adjacent owned-cell pairs across the two countries.
    #[inline]
    pub fn border_contact(&self, a: CountryId, b: CountryId) -> u32 {
        let (a, b) = (a as usize, b as usize);
        if a >= self.border_contact.len() || b >= self.max_countries() {
            return 0;
        }
        self.border_contact[a][b]
    }

    /// Neighbor ids in ascending order.
    pub fn adjacent_countries(&self, a: CountryId) -> &[CountryId] {
        self.adjacency
            .get(a as usize)
            .map_or(&[][..], |v| v.as_slice())
    }

    pub fn country_land_cells(&self, id: CountryId) -> usize {
        self.land_cell_count.get(id as usize).copied().unwrap_or(0)
    }

    pub fn country_food_sum(&self, id: CountryId) -> f64 {
        self.food_sum.get(id as usize).copied().unwrap_or(0.0)
    }

    pub fn country_foraging_sum(&self, id: CountryId) -> f64 {
        self.foraging_sum.get(id as usize).copied().unwrap_or(0.0)
    }

    pub fn country_farming_sum(&self, id: CountryId) -> f64 {
        self.farming_sum.get(id as usize).copied().unwrap_or(0.0)
    }

    pub fn country_ore_sum(&self, id: CountryId) -> f64 {
        self.ore_sum.get(id as usize).copied().unwrap_or(0.0)
    }

    pub fn country_energy_sum(&self, id: CountryId) -> f64 {
        self.energy_sum.get(id as usize).copied().unwrap_or(0.0)
    }

    pub fn country_construction_sum(&self, id: CountryId) -> f64 {
        self.construction_sum.get(id as usize).copied().unwrap_or(0.0)
    }

    pub fn country_non_food_sum(&self, id: CountryId) -> f64 {
        self.non_food_sum.get(id as usize).copied().unwrap_or(0.0)
    }

    /// Border pairs in ascending `(min, max)` order - the canonical neighbor
    /// iteration order for contact-based systems.
    pub fn border_pairs(&self) -> Vec<(CountryId, CountryId)> {
        let mut pairs = Vec::new();
        for a in 0..self.max_countries() {
            for &b in &self.adjacency[a] {
                if (b as usize) > a {
                    pairs.push((a as CountryId, b));
                }
            }
        }
        pairs
    }

    /// Verify `count == 0 <=> not adjacent` and contact symmetry.
    pub fn check_adjacency_invariant(&self) -> Result<(), String> {
        for a in 0..self.max_countries() {
            for b in (a + 1)..self.max_countries() {
                let count = self.border_contact[a][b];
                if count != self.border_contact[b][a] {
                    return Err(format!("border contact asymmetry between {a} and {b}"));
                }
                let adj = self.are_neighbors(a as CountryId, b as CountryId);
                if adj != (count > 0) {
                    return Err(format!(
                        "adjacency bit desync between {a} and {b}: count={count} adjacent={adj}"
                    ));
                }
                let listed = self.adjacency[a].binary_search(&(b as CountryId)).is_ok();
                if listed != adj {
                    return Err(format!("adjacency list desync between {a} and {b}"));
                }
            }
        }
        Ok(())
    }

    pub fn hash_into<H: Hasher>(&self, hasher: &mut H) {
        self.owner.hash(hasher);
        for row in &self.border_contact {
            row.hash(hasher);
        }
        self.land_cell_count.hash(hasher);
        for v in &self.food_sum {
            v.to_bits().hash(hasher);
        }
        for v in &self.non_food_sum {
            v.to_bits().hash(hasher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimConfig, EXAMPLE_CONFIG_TOML};
    use crate::map::layers::{derive_potentials, MapLayers};

    fn small_layer() -> OwnershipLayer {
        let mut layers = MapLayers::water(10, 10);
        for y in 0..10 {
            for x in 0..8 {
                let i = layers.idx(x, y);
                layers.land[i] = true;
            }
        }
        let cfg = SimConfig::from_toml_str(EXAMPLE_CONFIG_TOML).unwrap();
        OwnershipLayer::new(derive_potentials(&layers, &cfg, 1), 8)
    }

    #[test]
    fn test_set_owner_rejects_ocean_and_oob() {
        let mut own = small_layer();
        assert!(!own.set_owner(9, 0, 0)); // ocean column
        assert!(!own.set_owner(-1, 0, 0));
        assert!(!own.set_owner(0, 100, 0));
        assert_eq!(own.owner_at(9, 0), UNOWNED);
    }

    #[test]
    fn test_set_owner_is_idempotent() {
        let mut own = small_layer();
        assert!(own.set_owner(2, 2, 0));
        // Second identical write is a no-op.
        assert!(!own.set_owner(2, 2, 0));
        assert_eq!(own.country_land_cells(0), 1);
    }

    #[test]
    fn test_adjacency_appears_and_disappears_with_contact() {
        let mut own = small_layer();
        own.set_owner(2, 2, 0);
        assert!(!own.are_neighbors(0, 1));
        own.set_owner(3, 2, 1);
        assert!(own.are_neighbors(0, 1));
        assert!(own.are_neighbors(1, 0));
        assert_eq!(own.border_contact(0, 1), 1);
        // Removing the only contact dissolves the adjacency.
        own.set_owner(3, 2, UNOWNED);
        assert!(!own.are_neighbors(0, 1));
        assert_eq!(own.border_contact(0, 1), 0);
        own.check_adjacency_invariant().unwrap();
    }

    #[test]
    fn test_border_contact_counts_pairs() {
        let mut own = small_layer();
        // Two vertical strips sharing a border of 3 rows: each boundary cell
        // of country 0 touches up to 3 cells of country 1.
        for y in 2..5 {
            own.set_owner(2, y, 0);
            own.set_owner(3, y, 1);
        }
        // Pairs: (2,y)-(3,y') for |y-y'|<=1 within 2..5 => 3+2+2 = 7.
        assert_eq!(own.border_contact(0, 1), 7);
        assert_eq!(own.border_contact(1, 0), 7);
        own.check_adjacency_invariant().unwrap();
    }

    #[test]
    fn test_aggregates_follow_ownership() {
        let mut own = small_layer();
        own.set_owner(2, 2, 0);
        own.set_owner(3, 2, 0);
        let food2 = own.country_food_sum(0);
        assert!(food2 > 0.0);
        own.set_owner(3, 2, UNOWNED);
        let food1 = own.country_food_sum(0);
        assert!(food1 < food2);
        assert_eq!(own.country_land_cells(0), 1);
    }

    #[test]
    fn test_synced_write_updates_territory_vec() {
        use crate::state::{Country, CountryType};
        let mut own = small_layer();
        let mut countries = vec![
            Country::new(0, 1, [10, 20, 30], (2, 2), 1000, 0.02, "A".into(), CountryType::Trader, -5000),
            Country::new(1, 1, [40, 50, 60], (5, 5), 1000, 0.02, "B".into(), CountryType::Trader, -5000),
        ];
        own.set_owner_synced(2, 2, 0, &mut countries);
        assert_eq!(countries[0].territory, vec![(2, 2)]);
        own.set_owner_synced(2, 2, 1, &mut countries);
        assert!(countries[0].territory.is_empty());
        assert_eq!(countries[1].territory, vec![(2, 2)]);
    }

    #[test]
    fn test_neighbor_lists_sorted() {
        let mut own = small_layer();
        own.set_owner(4, 4, 3);
        own.set_owner(5, 4, 1);
        own.set_owner(4, 5, 2);
        assert_eq!(own.adjacent_countries(3), &[1, 2]);
        own.check_adjacency_invariant().unwrap();
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // `count == 0 <=> not adjacent` must hold after every single
            // write, not just at quiescence.
            #[test]
            fn adjacency_invariant_after_every_write(
                writes in proptest::collection::vec((0..10i32, 0..10i32, -1..8i32), 1..200)
            ) {
                let mut own = small_layer();
                for (x, y, owner) in writes {
                    own.set_owner(x, y, owner);
                    prop_assert!(own.check_adjacency_invariant().is_ok());
                }
            }

            #[test]
            fn aggregates_never_go_negative(
                writes in proptest::collection::vec((0..10i32, 0..10i32, -1..8i32), 1..200)
            ) {
                let mut own = small_layer();
                for (x, y, owner) in writes {
                    own.set_owner(x, y, owner);
                }
                for id in 0..8u32 {
                    prop_assert!(own.country_food_sum(id) >= -1e-9);
                    prop_assert!(own.country_non_food_sum(id) >= -1e-9);
                }
            }
        }
    }
}
