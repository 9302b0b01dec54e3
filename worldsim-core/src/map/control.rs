//! Territorial control reach.
//!
//! Control is a per-field scalar in [0, 1]: the sigmoid of how far inside a
//! country's logistics envelope a cell sits, with travel time measured by a
//! weighted multi-source Dijkstra from the capital and the largest cities.

use grid_pathfinding::{multi_source_dijkstra, Graph};
use serde::{Deserialize, Serialize};

use crate::map::field::FieldGrid;
use crate::numerics::sigmoid;
use crate::state::Country;

/// Countries recompute control on a staggered 5-10 year cadence.
const BASE_CADENCE_YEARS: i32 = 5;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ControlCache {
    pub last_computed_year: i32,
    pub road_count: usize,
    pub port_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ControlState {
    caches: Vec<ControlCache>,
}

impl ControlState {
    pub fn ensure_capacity(&mut self, n: usize) {
        if self.caches.len() < n {
            self.caches.resize(
                n,
                ControlCache {
                    last_computed_year: i32::MIN,
                    road_count: 0,
                    port_count: 0,
                },
            );
        }
    }

    pub fn cache(&self, idx: usize) -> ControlCache {
        self.caches.get(idx).copied().unwrap_or(ControlCache {
            last_computed_year: i32::MIN,
            road_count: 0,
            port_count: 0,
        })
    }

    pub fn mark_computed(&mut self, idx: usize, year: i32, roads: usize, ports: usize) {
        self.ensure_capacity(idx + 1);
        self.caches[idx] = ControlCache {
            last_computed_year: year,
            road_count: roads,
            port_count: ports,
        };
    }

    /// Force a recompute on the next update (road/port change, splits).
    pub fn invalidate(&mut self, idx: usize) {
        if let Some(c) = self.caches.get_mut(idx) {
            c.last_computed_year = i32::MIN;
        }
    }
}

/// Graph over the field cells owned by one country; 4-connected, step cost
/// is the average of the endpoint move costs.
struct OwnedFieldGraph<'a> {
    fields: &'a FieldGrid,
    owner: i32,
}

impl Graph<usize, ()> for OwnedFieldGraph<'_> {
    fn neighbors(&self, node: usize, _context: &()) -> Vec<usize> {
        self.fields
            .neighbors4(node)
            .filter(|&n| self.fields.owner[n] == self.owner)
            .collect()
    }

    fn cost(&self, from: usize, to: usize, _context: &()) -> f64 {
        0.5 * (self.fields.move_cost[from] as f64 + self.fields.move_cost[to] as f64)
    }

    fn heuristic(&self, _from: usize, _target: usize, _context: &()) -> f64 {
        0.0
    }
}

/// Deterministic seed set: capital field cell plus up to 7 largest cities,
/// sorted by population descending, then row, then column.
fn seed_fields(fields: &FieldGrid, country: &Country) -> Vec<usize> {
    let mut ranked: Vec<(f64, usize)> = country
        .cities
        .iter()
        .map(|c| (c.population, fields.field_of(c.location.0, c.location.1)))
        .collect();
    ranked.sort_by(|a, b| {
        b.0.total_cmp(&a.0)
            .then_with(|| (a.1 / fields.width).cmp(&(b.1 / fields.width)))
            .then_with(|| (a.1 % fields.width).cmp(&(b.1 % fields.width)))
    });

    let capital = fields.field_of(country.capital_cell().0, country.capital_cell().1);
    let mut seeds = vec![capital];
    for (_, f) in ranked.into_iter().take(7) {
        if !seeds.contains(&f) {
            seeds.push(f);
        }
    }
    seeds.retain(|&f| fields.owner[f] == country.id as i32);
    if seeds.is_empty() {
        seeds.push(capital);
    }
    seeds
}

/// How far the state apparatus reaches, in travel-time units.
fn reach_capacity(country: &Country) -> f64 {
    let p = &country.polity;
    let m = &country.econ;
    let base = 4.0
        + 14.0 * (0.45 * p.admin_share + 0.30 * p.infra_share)
        + 10.0 * p.logistics_reach
        + 8.0 * m.institution_capacity
        + 4.0 * country.avg_control;
    let comms = 1.0 + 0.45 * m.knowledge_stock + 0.30 * m.connectivity_index;
    base * comms * (0.5 + 0.5 * p.legitimacy)
}

fn control_softness(country: &Country) -> f64 {
    (1.25 + 3.0 * (1.0 - country.econ.institution_capacity)).clamp(1.25, 5.5)
}

/// Recompute one country's control field. Pure in (fields, country): calling
/// twice with no intervening writes yields identical values.
pub fn recompute_country_control(
    fields: &FieldGrid,
    country: &Country,
) -> (Vec<(usize, f32)>, f64) {
    let owner = country.id as i32;
    let owned: Vec<usize> = (0..fields.owner.len())
        .filter(|&i| fields.owner[i] == owner)
        .collect();
    if owned.is_empty() {
        return (Vec::new(), 0.0);
    }

    let graph = OwnedFieldGraph { fields, owner };
    let seeds: Vec<(usize, f64)> = seed_fields(fields, country)
        .into_iter()
        .map(|f| (f, 0.0))
        .collect();
    let reach = multi_source_dijkstra(&graph, &seeds, &());

    let capacity = reach_capacity(country);
    let softness = control_softness(country);
    let mut out = Vec::with_capacity(owned.len());
    let mut sum = 0.0f64;
    for &i in &owned {
        let control = match reach.travel_time.get(&i) {
            Some(&t) => sigmoid((capacity - t) / softness),
            // Disconnected from every seed: no effective reach.
            None => 0.0,
        };
        sum += control;
        out.push((i, control as f32));
    }
    let avg = sum / owned.len() as f64;
    (out, avg)
}

/// Update control for every country whose cadence is due (or whose roads or
/// ports changed, or when a mega jump covers more than one year).
pub fn update_control_grid(
    fields: &mut FieldGrid,
    state: &mut ControlState,
    countries: &mut [Country],
    year: i32,
    dt_years: i32,
) {
    state.ensure_capacity(countries.len());
    for idx in 0..countries.len() {
        let c = &countries[idx];
        if !c.alive() {
            continue;
        }
        let cache = state.cache(idx);
        let cadence = BASE_CADENCE_YEARS + (idx as i32 % 6);
        let due = cache.last_computed_year == i32::MIN
            || dt_years > 1
            || year - cache.last_computed_year >= cadence
            || cache.road_count != c.roads.len()
            || cache.port_count != c.ports.len();
        if !due {
            continue;
        }

        let (cells, avg) = recompute_country_control(fields, c);
        for (i, v) in cells {
            fields.control[i] = v;
        }
        let (roads, ports) = (c.roads.len(), c.ports.len());
        countries[idx].avg_control = avg;
        state.mark_computed(idx, year, roads, ports);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{CountryType, UNOWNED};

    fn fields_with_strip(owner: i32, len: usize) -> FieldGrid {
        // Three field rows; the strip sits on the top row.
        let mut f = FieldGrid::new(len * 6, 18);
        for i in 0..f.owner.len() {
            f.land[i] = true;
            f.owner[i] = UNOWNED;
            f.move_cost[i] = 1.0;
        }
        for x in 0..len {
            f.owner[x] = owner;
        }
        f
    }

    fn country() -> Country {
        let mut c = Country::new(
            0,
            1,
            [0, 0, 0],
            (0, 0),
            10_000,
            0.02,
            "Test".into(),
            CountryType::Trader,
            -5000,
        );
        c.avg_control = 0.5;
        c
    }

    #[test]
    fn test_control_decays_with_distance() {
        let fields = fields_with_strip(0, 12);
        let c = country();
        let (cells, avg) = recompute_country_control(&fields, &c);
        assert_eq!(cells.len(), 12);
        let near = cells.iter().find(|(i, _)| *i == 0).unwrap().1;
        let far = cells.iter().find(|(i, _)| *i == 11).unwrap().1;
        assert!(near > far);
        assert!((0.0..=1.0).contains(&avg));
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let fields = fields_with_strip(0, 8);
        let c = country();
        let (a, avg_a) = recompute_country_control(&fields, &c);
        let (b, avg_b) = recompute_country_control(&fields, &c);
        assert_eq!(a, b);
        assert_eq!(avg_a.to_bits(), avg_b.to_bits());
    }

    #[test]
    fn test_disconnected_component_has_zero_control() {
        let mut fields = fields_with_strip(0, 4);
        // An owned cell in the far corner with no path to the capital.
        let far = fields.idx(fields.width - 1, fields.height - 1);
        fields.owner[far] = 0;
        let c = country();
        let (cells, _) = recompute_country_control(&fields, &c);
        let v = cells.iter().find(|(i, _)| *i == far).unwrap().1;
        assert_eq!(v, 0.0);
    }

    #[test]
    fn test_update_respects_cadence() {
        let mut fields = fields_with_strip(0, 6);
        let mut state = ControlState::default();
        let mut countries = vec![country()];
        update_control_grid(&mut fields, &mut state, &mut countries, -5000, 1);
        let first = state.cache(0).last_computed_year;
        assert_eq!(first, -5000);
        // One year later nothing changed: no recompute.
        update_control_grid(&mut fields, &mut state, &mut countries, -4999, 1);
        assert_eq!(state.cache(0).last_computed_year, -5000);
        // A new road forces one.
        countries[0].roads.push((1, 1));
        update_control_grid(&mut fields, &mut state, &mut countries, -4999, 1);
        assert_eq!(state.cache(0).last_computed_year, -4999);
    }
}
