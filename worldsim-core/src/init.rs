//! World generation: spawn placement, country creation, initial grids.

use std::sync::Arc;

use thiserror::Error;

use crate::context::{CountryRng, SimulationContext};
use crate::map::layers::MapLayers;
use crate::map::{control, population, MapGrid};
use crate::observer::EventLog;
use crate::state::{
    Country, CountryType, GreatPeopleState, PlagueState, PoliticsState, World,
};
use crate::systems::culture::standard_institutions;
use crate::systems::technology::TechCatalog;

#[derive(Error, Debug)]
pub enum InitError {
    #[error("map has no spawnable land")]
    NoSpawnableLand,
    #[error("layer size mismatch: {0}")]
    LayerSizeMismatch(String),
}

const NAME_ONSETS: [&str; 12] = [
    "Al", "Bar", "Cal", "Dor", "El", "Far", "Gor", "Hal", "Ish", "Kar", "Mor", "Tal",
];
const NAME_MIDS: [&str; 10] = ["an", "en", "ar", "or", "il", "um", "av", "es", "on", "ir"];
const NAME_ENDS: [&str; 10] = ["ia", "or", "heim", "mark", "dor", "stan", "land", "ara", "eth", "un"];

/// Deterministic syllable-built country name.
pub fn generate_country_name(rng: &mut CountryRng) -> String {
    let mut name = String::new();
    name.push_str(NAME_ONSETS[rng.next_below(NAME_ONSETS.len())]);
    if rng.next_below(2) == 0 {
        name.push_str(NAME_MIDS[rng.next_below(NAME_MIDS.len())]);
    }
    name.push_str(NAME_ENDS[rng.next_below(NAME_ENDS.len())]);
    name
}

fn pick_country_type(rng: &mut CountryRng) -> CountryType {
    match rng.next_below(3) {
        0 => CountryType::Warmonger,
        1 => CountryType::Pacifist,
        _ => CountryType::Trader,
    }
}

/// Build a fresh world: derive grids, place countries in (preferred) spawn
/// zones, claim founding territory, seed population and control.
pub fn generate_world(
    ctx: &SimulationContext,
    layers: &MapLayers,
    events: &mut EventLog,
) -> Result<World, InitError> {
    let expected = layers.width * layers.height;
    for (label, len) in [
        ("land", layers.land.len()),
        ("resource", layers.resource.len()),
        ("coal", layers.coal.len()),
        ("copper", layers.copper.len()),
        ("tin", layers.tin.len()),
        ("riverland", layers.riverland.len()),
        ("spawn", layers.spawn.len()),
    ] {
        if len != expected {
            return Err(InitError::LayerSizeMismatch(label.to_string()));
        }
    }

    let cfg = &ctx.config;
    let start_year = cfg.world.start_year;
    let map = MapGrid::new(layers, cfg, ctx.world_seed);

    // Spawn candidates: preferred zones first, any land as fallback.
    let mut candidates: Vec<(u16, u16)> = Vec::new();
    for y in 0..layers.height {
        for x in 0..layers.width {
            let i = y * layers.width + x;
            if layers.land[i] && layers.spawn[i] {
                candidates.push((x as u16, y as u16));
            }
        }
    }
    if candidates.is_empty() {
        for y in 0..layers.height {
            for x in 0..layers.width {
                if layers.land[y * layers.width + x] {
                    candidates.push((x as u16, y as u16));
                }
            }
        }
    }
    if candidates.is_empty() {
        return Err(InitError::NoSpawnableLand);
    }

    let mut world_rng = CountryRng::from_seed(ctx.world_seed);
    let num = cfg.world.num_countries as usize;
    let min_sep = (((layers.width * layers.height) as f64 / num.max(1) as f64).sqrt() * 0.45)
        .max(4.0);

    // Greedy separated sampling from the candidate list.
    let mut sites: Vec<(u16, u16)> = Vec::new();
    let mut attempts = 0usize;
    while sites.len() < num && attempts < num * 40 {
        attempts += 1;
        let pick = candidates[world_rng.next_below(candidates.len())];
        let ok = sites.iter().all(|&(sx, sy)| {
            let dx = (sx as f64 - pick.0 as f64).abs();
            let dy = (sy as f64 - pick.1 as f64).abs();
            (dx * dx + dy * dy).sqrt() >= min_sep
        });
        if ok {
            sites.push(pick);
        }
    }

    let mut countries: Vec<Country> = Vec::with_capacity(cfg.world.max_countries as usize);
    let mut taken_names: Vec<String> = Vec::new();
    for (idx, &site) in sites.iter().enumerate() {
        let color = [
            40 + world_rng.next_below(200) as u8,
            40 + world_rng.next_below(200) as u8,
            40 + world_rng.next_below(200) as u8,
        ];
        let mut name = generate_country_name(&mut world_rng);
        while taken_names.contains(&name) {
            name = generate_country_name(&mut world_rng);
        }
        taken_names.push(name.clone());
        let population = 600 + world_rng.next_below(900) as i64;
        let growth = 0.015 + world_rng.next_f64() * 0.010;
        let kind = pick_country_type(&mut world_rng);
        countries.push(Country::new(
            idx as u32,
            ctx.world_seed,
            color,
            site,
            population,
            growth,
            name,
            kind,
            start_year,
        ));
    }

    // Founding claims: a radius-3 disk of land around each site.
    {
        let mut own = map.ownership_lock();
        for idx in 0..countries.len() {
            let (sx, sy) = countries[idx].starting_cell;
            for dy in -3i32..=3 {
                for dx in -3i32..=3 {
                    if dx * dx + dy * dy > 9 {
                        continue;
                    }
                    own.set_owner_synced(
                        sx as i32 + dx,
                        sy as i32 + dy,
                        idx as i32,
                        &mut countries,
                    );
                }
            }
        }
    }

    let n = countries.len();
    let mut world = World {
        world_seed: ctx.world_seed,
        map,
        countries,
        year: start_year,
        trade_intensity: vec![0.0; n * n],
        great_people: GreatPeopleState {
            next_event_year: start_year + 100 + world_rng.next_below(401) as i32,
            active: Vec::new(),
            rng: CountryRng::from_seed(ctx.world_seed ^ 0x6A09_E667_F3BC_C909),
        },
        plague: PlagueState::new(start_year, cfg.plague.interval_years),
        politics: PoliticsState::default(),
        war_starts: 0,
        tech_catalog: Arc::new(TechCatalog::standard()),
        institution_catalog: Arc::new(standard_institutions()),
        tech_first_known: rustc_hash::FxHashMap::default(),
    };

    finalize_world(&mut world);
    log::info!(
        "world generated: {}x{} map, {} countries, seed {}, config {}",
        layers.width,
        layers.height,
        world.countries.len(),
        ctx.world_seed,
        ctx.config_hash
    );
    let _ = events;
    Ok(world)
}

/// Derived-grid refresh shared by generation and the test builder: field
/// owners, move costs, climate aggregation, population seeding, control.
pub fn finalize_world(world: &mut World) {
    world.refresh_field_owners_and_move_cost();
    let n = world.countries.len();
    world
        .map
        .climate
        .aggregate_country_multipliers(&world.map.fields, n);
    population::initialize_from_countries(
        &mut world.map.population,
        &world.map.fields,
        &world.map.climate,
        &mut world.countries,
    );
    control::update_control_grid(
        &mut world.map.fields,
        &mut world.map.control,
        &mut world.countries,
        world.year,
        1,
    );
    world.trade_intensity.resize(n * n, 0.0);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SimConfig, EXAMPLE_CONFIG_TOML};

    fn small_layers() -> MapLayers {
        let mut layers = MapLayers::water(64, 64);
        for y in 4..60 {
            for x in 4..60 {
                let i = layers.idx(x, y);
                layers.land[i] = true;
            }
        }
        layers
    }

    fn ctx(num_countries: u32) -> SimulationContext {
        let text = EXAMPLE_CONFIG_TOML.replace("numCountries = 100", &format!("numCountries = {num_countries}"));
        let cfg = SimConfig::from_toml_str(&text).unwrap();
        SimulationContext::new(7, cfg, text.as_bytes())
    }

    #[test]
    fn test_generation_is_deterministic() {
        let layers = small_layers();
        let ctx = ctx(6);
        let mut ev = EventLog::default();
        let a = generate_world(&ctx, &layers, &mut ev).unwrap();
        let b = generate_world(&ctx, &layers, &mut ev).unwrap();
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.countries.len(), b.countries.len());
    }

    #[test]
    fn test_countries_have_territory_and_population() {
        let layers = small_layers();
        let ctx = ctx(5);
        let mut ev = EventLog::default();
        let world = generate_world(&ctx, &layers, &mut ev).unwrap();
        assert!(!world.countries.is_empty());
        for c in &world.countries {
            assert!(!c.territory.is_empty());
            assert!(c.population > 0);
            assert!(!c.name.is_empty());
        }
        // Capacity reserved up front so later spawns never reallocate.
        assert!(world.countries.capacity() >= ctx.config.world.max_countries as usize);
    }

    #[test]
    fn test_layer_size_mismatch_fails() {
        let mut layers = small_layers();
        layers.coal.pop();
        let ctx = ctx(3);
        let mut ev = EventLog::default();
        assert!(matches!(
            generate_world(&ctx, &layers, &mut ev),
            Err(InitError::LayerSizeMismatch(_))
        ));
    }

    #[test]
    fn test_all_water_map_fails() {
        let layers = MapLayers::water(32, 32);
        let ctx = ctx(3);
        let mut ev = EventLog::default();
        assert!(matches!(
            generate_world(&ctx, &layers, &mut ev),
            Err(InitError::NoSpawnableLand)
        ));
    }

    #[test]
    fn test_spawn_zones_preferred() {
        let mut layers = small_layers();
        // Mark a small preferred zone in the northwest.
        for y in 6..14 {
            for x in 6..14 {
                let i = layers.idx(x, y);
                layers.spawn[i] = true;
            }
        }
        let ctx = ctx(2);
        let mut ev = EventLog::default();
        let world = generate_world(&ctx, &layers, &mut ev).unwrap();
        for c in &world.countries {
            let (x, y) = c.starting_cell;
            assert!((6..14).contains(&(x as usize)) && (6..14).contains(&(y as usize)));
        }
    }

    #[test]
    fn test_name_generator_is_deterministic() {
        let mut a = CountryRng::from_seed(3);
        let mut b = CountryRng::from_seed(3);
        assert_eq!(generate_country_name(&mut a), generate_country_name(&mut b));
    }
}
