//! Cultural traits and institutions.
//!
//! Seven traits in [0, 1] drift toward knowledge-derived attractors with a
//! little hashed noise, and converge pairwise through contact. Institutions
//! unlock once their prerequisites hold and apply their bonuses exactly
//! once; none is ever revoked.

use tracing::instrument;

use crate::context::SimulationContext;
use crate::numerics::clamp01;
use crate::observer::EventLog;
use crate::state::{Country, World, CULTURE_TRAITS};
use crate::systems::technology;

pub const TRAIT_COLLECTIVISM: usize = 0;
pub const TRAIT_HIERARCHY: usize = 1;
pub const TRAIT_OPENNESS: usize = 2;
pub const TRAIT_MARTIAL: usize = 3;
pub const TRAIT_MERCANTILE: usize = 4;
pub const TRAIT_PIETY: usize = 5;
pub const TRAIT_SCHOLARLY: usize = 6;

const SALT_TRAIT_NOISE: u64 = 0xC1;
const TRAIT_DRIFT_RATE: f64 = 0.012;
const CONTACT_PULL_RATE: f64 = 0.020;

/// A civic institution: prerequisites plus one-shot bonuses.
#[derive(Debug, Clone)]
pub struct Institution {
    pub id: u16,
    pub name: &'static str,
    pub required_institutions: Vec<u16>,
    pub required_techs: Vec<u16>,
    pub min_urbanization: f64,
    pub min_admin_capacity: f64,
    pub min_avg_control: f64,
    pub min_legitimacy: f64,
    pub stability_bonus: f64,
    pub legitimacy_bonus: f64,
    pub admin_cap_bonus: f64,
    pub fiscal_cap_bonus: f64,
    pub logistics_bonus: f64,
    pub education_share_bonus: f64,
    pub health_share_bonus: f64,
    pub rnd_share_bonus: f64,
    pub debt_add: f64,
}

impl Institution {
    fn new(id: u16, name: &'static str) -> Self {
        Self {
            id,
            name,
            required_institutions: Vec::new(),
            required_techs: Vec::new(),
            min_urbanization: 0.0,
            min_admin_capacity: 0.0,
            min_avg_control: 0.0,
            min_legitimacy: 0.0,
            stability_bonus: 0.0,
            legitimacy_bonus: 0.0,
            admin_cap_bonus: 0.0,
            fiscal_cap_bonus: 0.0,
            logistics_bonus: 0.0,
            education_share_bonus: 0.0,
            health_share_bonus: 0.0,
            rnd_share_bonus: 0.0,
            debt_add: 0.0,
        }
    }
}

/// The civic progression.
pub fn standard_institutions() -> Vec<Institution> {
    let mut v = Vec::new();

    let mut i = Institution::new(1, "Village Elders");
    i.admin_cap_bonus = 0.02;
    i.stability_bonus = 0.05;
    v.push(i);

    let mut i = Institution::new(2, "Organized Chiefdom");
    i.required_institutions = vec![1];
    i.required_techs = vec![40];
    i.min_avg_control = 0.25;
    i.admin_cap_bonus = 0.04;
    i.logistics_bonus = 0.03;
    v.push(i);

    let mut i = Institution::new(3, "Tribute Collection");
    i.required_institutions = vec![2];
    i.min_admin_capacity = 0.10;
    i.fiscal_cap_bonus = 0.06;
    v.push(i);

    let mut i = Institution::new(4, "Written Records");
    i.required_institutions = vec![2];
    i.required_techs = vec![31];
    i.admin_cap_bonus = 0.05;
    i.education_share_bonus = 0.01;
    v.push(i);

    let mut i = Institution::new(5, "Codified Law");
    i.required_institutions = vec![4];
    i.required_techs = vec![41];
    i.min_avg_control = 0.35;
    i.legitimacy_bonus = 0.08;
    i.stability_bonus = 0.05;
    v.push(i);

    let mut i = Institution::new(6, "Standing Bureaucracy");
    i.required_institutions = vec![5];
    i.required_techs = vec![43];
    i.min_urbanization = 0.08;
    i.min_admin_capacity = 0.20;
    i.admin_cap_bonus = 0.08;
    i.fiscal_cap_bonus = 0.05;
    i.debt_add = 0.5;
    v.push(i);

    let mut i = Institution::new(7, "State Granaries");
    i.required_institutions = vec![3];
    i.required_techs = vec![10];
    i.logistics_bonus = 0.05;
    i.stability_bonus = 0.04;
    v.push(i);

    let mut i = Institution::new(8, "Public Health Boards");
    i.required_institutions = vec![6];
    i.required_techs = vec![61];
    i.min_urbanization = 0.12;
    i.health_share_bonus = 0.02;
    v.push(i);

    let mut i = Institution::new(9, "Scholarly Academies");
    i.required_institutions = vec![6];
    i.required_techs = vec![33];
    i.min_legitimacy = 0.35;
    i.education_share_bonus = 0.02;
    i.rnd_share_bonus = 0.01;
    v.push(i);

    v
}

/// Attractor each trait drifts toward, derived from the knowledge profile
/// and material circumstances.
fn trait_attractor(c: &Country) -> [f64; CULTURE_TRAITS] {
    let k = &c.knowledge;
    let total: f64 = k.iter().sum::<f64>().max(1.0);
    let gov = k[technology::DOMAIN_GOVERNANCE] / total;
    let letters = k[technology::DOMAIN_LETTERS] / total;
    let war = k[technology::DOMAIN_WARFARE] / total;
    let sea = k[technology::DOMAIN_SEAFARING] / total;
    let urban = clamp01(c.total_city_population / c.population.max(1) as f64 * 2.0);

    let mut a = [0.5; CULTURE_TRAITS];
    a[TRAIT_COLLECTIVISM] = clamp01(0.65 - 0.4 * urban);
    a[TRAIT_HIERARCHY] = clamp01(0.3 + 2.0 * gov + 0.2 * c.avg_control);
    a[TRAIT_OPENNESS] = clamp01(0.25 + 1.5 * sea + 0.5 * c.econ.connectivity_index);
    a[TRAIT_MARTIAL] = clamp01(0.25 + 2.5 * war + if c.war.at_war { 0.15 } else { 0.0 });
    a[TRAIT_MERCANTILE] = clamp01(0.2 + 0.8 * c.econ.market_access + 1.0 * sea);
    a[TRAIT_PIETY] = clamp01(0.7 - 1.5 * letters);
    a[TRAIT_SCHOLARLY] = clamp01(0.15 + 2.5 * letters);
    a
}

#[instrument(skip_all, name = "culture")]
pub fn tick_year(
    world: &mut World,
    ctx: &SimulationContext,
    year: i32,
    dt_years: i32,
    events: &mut EventLog,
) {
    let dt = dt_years.max(1) as f64;
    let n = world.countries.len();

    // (a) Drift toward attractors with small deterministic noise.
    for idx in 0..n {
        let c = &mut world.countries[idx];
        if !c.alive() {
            continue;
        }
        let attractor = trait_attractor(c);
        for t in 0..CULTURE_TRAITS {
            let noise =
                (ctx.unit(year, ((idx as u64) << 8) | t as u64, SALT_TRAIT_NOISE) - 0.5) * 0.01;
            let drift = TRAIT_DRIFT_RATE * (attractor[t] - c.traits[t]);
            c.traits[t] = clamp01(c.traits[t] + (drift + noise) * dt);
        }
    }

    // (b) Contact convergence: each pair pulls both members toward each
    // other in proportion to the trait gap, weighted by trade and border
    // contact. Canonical ascending pair order.
    let pairs: Vec<(u32, u32, f64)> = {
        let own = world.map.ownership_lock();
        own.border_pairs()
            .into_iter()
            .map(|(a, b)| {
                let contact = own.border_contact(a, b) as f64;
                (a, b, contact / (contact + 60.0))
            })
            .collect()
    };
    for (a, b, contact_w) in pairs {
        let (i, j) = (a as usize, b as usize);
        if !world.countries[i].alive() || !world.countries[j].alive() {
            continue;
        }
        let trade = world.trade_intensity[i * n + j] as f64;
        let weight = (0.5 * trade + 0.5 * contact_w).min(1.0);
        if weight <= 0.0 {
            continue;
        }
        for t in 0..CULTURE_TRAITS {
            let gap = world.countries[j].traits[t] - world.countries[i].traits[t];
            let pull = CONTACT_PULL_RATE * weight * gap * dt;
            world.countries[i].traits[t] = clamp01(world.countries[i].traits[t] + pull);
            world.countries[j].traits[t] = clamp01(world.countries[j].traits[t] - pull);
        }
    }

    // Institutions: unlock when every gate holds; bonuses apply once.
    let catalog = world.institution_catalog.clone();
    let tech_catalog = world.tech_catalog.clone();
    let adoption_threshold = ctx.config.technology.adoption_threshold;
    for idx in 0..n {
        let c = &mut world.countries[idx];
        if !c.alive() {
            continue;
        }
        for inst in catalog.iter() {
            if c.institutions.contains(&inst.id) {
                continue;
            }
            let civics_ok = inst
                .required_institutions
                .iter()
                .all(|r| c.institutions.contains(r));
            if !civics_ok {
                continue;
            }
            let techs_ok = inst.required_techs.iter().all(|&t| {
                tech_catalog
                    .dense_of(t)
                    .map(|d| technology::has_adopted(c, d, adoption_threshold))
                    .unwrap_or(false)
            });
            if !techs_ok {
                continue;
            }
            let urbanization = clamp01(c.total_city_population / c.population.max(1) as f64);
            if urbanization < inst.min_urbanization
                || c.polity.admin_capacity < inst.min_admin_capacity
                || c.avg_control < inst.min_avg_control
                || c.polity.legitimacy < inst.min_legitimacy
            {
                continue;
            }

            // Unlock: insert sorted, apply bonuses exactly once.
            let pos = c.institutions.binary_search(&inst.id).unwrap_or_else(|p| p);
            c.institutions.insert(pos, inst.id);
            c.polity.admin_capacity = clamp01(c.polity.admin_capacity + inst.admin_cap_bonus);
            c.polity.fiscal_capacity = clamp01(c.polity.fiscal_capacity + inst.fiscal_cap_bonus);
            c.polity.logistics_reach = clamp01(c.polity.logistics_reach + inst.logistics_bonus);
            c.polity.education_share =
                clamp01(c.polity.education_share + inst.education_share_bonus);
            c.polity.health_share = clamp01(c.polity.health_share + inst.health_share_bonus);
            c.polity.rnd_share = clamp01(c.polity.rnd_share + inst.rnd_share_bonus);
            c.polity.debt += inst.debt_add;
            c.stability = (c.stability + inst.stability_bonus).clamp(0.0, 2.0);
            c.polity.set_legitimacy(c.polity.legitimacy + inst.legitimacy_bonus);
            log::info!("{} establishes {}", c.name, inst.name);
        }
    }
    let _ = events;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::WorldBuilder;

    #[test]
    fn test_traits_stay_in_unit_range() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        let mut events = EventLog::default();
        for _ in 0..80 {
            let year = world.year;
            crate::systems::economy::tick_year(&mut world, &ctx, year, 1);
            tick_year(&mut world, &ctx, year, 1, &mut events);
            world.year += 1;
        }
        for c in &world.countries {
            for &t in &c.traits {
                assert!((0.0..=1.0).contains(&t));
            }
        }
    }

    #[test]
    fn test_contact_convergence_shrinks_gap() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        let adjacent = {
            let own = world.map.ownership_lock();
            own.are_neighbors(0, 1)
        };
        if !adjacent {
            return;
        }
        world.countries[0].traits = [0.9; CULTURE_TRAITS];
        world.countries[1].traits = [0.1; CULTURE_TRAITS];
        let mut events = EventLog::default();
        let year = world.year;
        crate::systems::economy::tick_year(&mut world, &ctx, year, 1);
        let before = (world.countries[0].traits[0] - world.countries[1].traits[0]).abs();
        for _ in 0..10 {
            let year = world.year;
            tick_year(&mut world, &ctx, year, 1, &mut events);
            world.year += 1;
        }
        let after = (world.countries[0].traits[0] - world.countries[1].traits[0]).abs();
        assert!(after < before);
    }

    #[test]
    fn test_first_institution_unlocks_once() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(1).build();
        let mut events = EventLog::default();
        let year = world.year;
        tick_year(&mut world, &ctx, year, 1, &mut events);
        // "Village Elders" has no gates; it unlocks immediately.
        assert!(world.countries[0].institutions.contains(&1));
        let admin_after_first = world.countries[0].polity.admin_capacity;
        let year = world.year + 1;
        tick_year(&mut world, &ctx, year, 1, &mut events);
        // Bonus applied exactly once.
        assert_eq!(world.countries[0].polity.admin_capacity, admin_after_first);
    }

    #[test]
    fn test_institutions_never_revoked() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(1).build();
        let mut events = EventLog::default();
        let year = world.year;
        tick_year(&mut world, &ctx, year, 1, &mut events);
        let unlocked = world.countries[0].institutions.clone();
        world.countries[0].avg_control = 0.0;
        world.countries[0].polity.set_legitimacy(0.0);
        for _ in 0..5 {
            let year = world.year;
            tick_year(&mut world, &ctx, year, 1, &mut events);
        }
        for id in unlocked {
            assert!(world.countries[0].institutions.contains(&id));
        }
    }
}
