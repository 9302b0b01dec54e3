//! The world map: ownership grid, static potentials, field grids, climate,
//! population and control reach.

pub mod climate;
pub mod control;
pub mod field;
pub mod layers;
pub mod ownership;
pub mod population;

pub use field::FIELD_CELL_SIZE;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::SimConfig;
use crate::map::climate::ClimateGrid;
use crate::map::control::ControlState;
use crate::map::field::FieldGrid;
use crate::map::layers::{derive_potentials, CellPotentials, MapLayers};
use crate::map::ownership::OwnershipLayer;
use crate::map::population::PopulationGrid;

/// All map-resolution state. The ownership layer sits behind one mutex;
/// acquisition discipline is once per cluster of writes, not per cell.
/// The other grids are owned by the kernel and only touched on their
/// designated tick stages.
#[derive(Debug)]
pub struct MapGrid {
    pub width: usize,
    pub height: usize,
    pub potentials: Arc<CellPotentials>,
    pub spawn_mask: Vec<bool>,
    ownership: Mutex<OwnershipLayer>,
    pub fields: FieldGrid,
    pub climate: ClimateGrid,
    pub population: PopulationGrid,
    pub control: ControlState,
}

impl MapGrid {
    pub fn new(layers: &MapLayers, cfg: &SimConfig, world_seed: u64) -> Self {
        let potentials = derive_potentials(layers, cfg, world_seed);
        let (width, height) = (layers.width, layers.height);

        let mut fields = FieldGrid::new(width, height);
        fields.rebuild_land_mask(&potentials);
        fields.rebuild_food_potential(&potentials);
        fields.rebuild_coastal_candidates(&potentials);

        let mut climate = ClimateGrid::new(fields.width, fields.height);
        climate.initialize_baseline(&fields, &potentials);

        let population = PopulationGrid::new(fields.width * fields.height);
        let ownership = Mutex::new(OwnershipLayer::new(
            potentials.clone(),
            cfg.world.max_countries as usize,
        ));

        Self {
            width,
            height,
            potentials,
            spawn_mask: layers.spawn.clone(),
            ownership,
            fields,
            climate,
            population,
            control: ControlState::default(),
        }
    }

    /// Lock the ownership layer. A poisoned lock is recovered: the layer's
    /// own invariants are checked separately and a panic mid-write would
    /// already have aborted the tick.
    pub fn ownership_lock(&self) -> MutexGuard<'_, OwnershipLayer> {
        self.ownership
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Refresh the field owner grid from the fine grid (majority vote).
    pub fn refresh_field_owners(&mut self) {
        let own = self
            .ownership
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.fields.rebuild_owner(&own);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimConfig, EXAMPLE_CONFIG_TOML};

    #[test]
    fn test_mapgrid_construction() {
        let mut layers = MapLayers::water(30, 30);
        for y in 0..30 {
            for x in 0..20 {
                let i = layers.idx(x, y);
                layers.land[i] = true;
            }
        }
        let cfg = SimConfig::from_toml_str(EXAMPLE_CONFIG_TOML).unwrap();
        let map = MapGrid::new(&layers, &cfg, 1);
        assert_eq!(map.fields.width, 5);
        assert_eq!(map.climate.width, map.fields.width);
        assert_eq!(map.population.pop.len(), map.fields.owner.len());
        let own = map.ownership_lock();
        assert_eq!(own.max_countries(), 400);
    }
}
