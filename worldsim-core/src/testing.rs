//! Test world construction helpers.
//!
//! `WorldBuilder` makes a small all-land world with `n` countries laid out
//! as adjacent vertical strips, so adjacency, trade and war paths are all
//! exercised without a real map.

use std::sync::Arc;

use crate::config::{SimConfig, EXAMPLE_CONFIG_TOML};
use crate::context::{CountryRng, SimulationContext};
use crate::init;
use crate::map::layers::MapLayers;
use crate::map::MapGrid;
use crate::state::{
    Country, CountryType, GreatPeopleState, PlagueState, PoliticsState, World,
};
use crate::systems::culture::standard_institutions;
use crate::systems::technology::TechCatalog;

pub struct WorldBuilder {
    width: usize,
    height: usize,
    n_countries: usize,
    seed: u64,
    barren: bool,
    initial_population: i64,
}

impl Default for WorldBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WorldBuilder {
    pub fn new() -> Self {
        Self {
            width: 48,
            height: 48,
            n_countries: 2,
            seed: 1,
            barren: false,
            initial_population: 30_000,
        }
    }

    pub fn size(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn countries(mut self, n: usize) -> Self {
        self.n_countries = n.max(1);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Zero out all food potential (farming and foraging both zero).
    pub fn barren(mut self) -> Self {
        self.barren = true;
        self
    }

    pub fn population(mut self, pop: i64) -> Self {
        self.initial_population = pop;
        self
    }

    pub fn build(self) -> (World, SimulationContext) {
        let mut config_text = EXAMPLE_CONFIG_TOML.to_string();
        if self.barren {
            config_text = config_text
                .replace("baseForaging = 0.55", "baseForaging = 0.0")
                .replace("baseFarming = 0.85", "baseFarming = 0.0")
                .replace("coastalBonus = 0.35", "coastalBonus = 0.0")
                .replace("riverlandFoodFloor = 0.60", "riverlandFoodFloor = 0.0");
        }
        let cfg = SimConfig::from_toml_str(&config_text)
            .unwrap_or_else(|e| panic!("builder config invalid: {e}"));
        let ctx = SimulationContext::new(self.seed, cfg, config_text.as_bytes());

        let mut layers = MapLayers::water(self.width, self.height);
        for v in layers.land.iter_mut() {
            *v = true;
        }
        let map = MapGrid::new(&layers, &ctx.config, self.seed);

        // Countries as adjacent vertical strips.
        let n = self.n_countries;
        let strip_w = self.width / n;
        let mut countries: Vec<Country> =
            Vec::with_capacity(ctx.config.world.max_countries as usize);
        for idx in 0..n {
            let x0 = idx * strip_w;
            let x1 = if idx + 1 == n {
                self.width
            } else {
                x0 + strip_w
            };
            let cx = ((x0 + x1) / 2) as u16;
            let cy = (self.height / 2) as u16;
            countries.push(Country::new(
                idx as u32,
                self.seed,
                [((idx * 60) % 255) as u8, 120, 80],
                (cx, cy),
                self.initial_population,
                0.02,
                format!("Country{idx}"),
                CountryType::Trader,
                ctx.config.world.start_year,
            ));
        }
        {
            // Leave unowned land above and below the strips so expansion
            // has somewhere to go.
            let margin = self.height / 8;
            let mut own = map.ownership_lock();
            for idx in 0..n {
                let x0 = idx * strip_w;
                let x1 = if idx + 1 == n {
                    self.width
                } else {
                    x0 + strip_w
                };
                for y in margin..(self.height - margin) {
                    for x in x0..x1 {
                        own.set_owner_synced(x as i32, y as i32, idx as i32, &mut countries);
                    }
                }
            }
        }

        let start_year = ctx.config.world.start_year;
        let mut world = World {
            world_seed: self.seed,
            map,
            countries,
            year: start_year,
            trade_intensity: vec![0.0; n * n],
            great_people: GreatPeopleState {
                next_event_year: start_year + 200,
                active: Vec::new(),
                rng: CountryRng::from_seed(self.seed ^ 0x6A09_E667_F3BC_C909),
            },
            plague: PlagueState::new(start_year, ctx.config.plague.interval_years),
            politics: PoliticsState::default(),
            war_starts: 0,
            tech_catalog: Arc::new(TechCatalog::standard()),
            institution_catalog: Arc::new(standard_institutions()),
            tech_first_known: rustc_hash::FxHashMap::default(),
        };
        init::finalize_world(&mut world);
        (world, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_strips_are_adjacent() {
        let (world, _ctx) = WorldBuilder::new().size(48, 48).countries(3).build();
        let own = world.map.ownership_lock();
        assert!(own.are_neighbors(0, 1));
        assert!(own.are_neighbors(1, 2));
        assert!(!own.are_neighbors(0, 2));
    }

    #[test]
    fn test_builder_population_seeded() {
        let (world, _ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        let total = world.map.population.country_total(&world.map.fields, 0);
        assert!((total - world.countries[0].population as f64).abs() < 1.0);
    }

    #[test]
    fn test_barren_world_has_no_food() {
        let (world, _ctx) = WorldBuilder::new().size(48, 48).countries(1).barren().build();
        let own = world.map.ownership_lock();
        assert!(own.country_food_sum(0) < 1e-9);
    }
}
