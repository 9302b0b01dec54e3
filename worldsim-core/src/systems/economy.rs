//! Macro economy: budgets, prices, stockpiles, taxation and the trade
//! intensity matrix.
//!
//! The CPU model here is authoritative. A GPU heat-map pass can exist in an
//! interactive build as a display accelerator, but its outputs never feed
//! back into kernel state, so the `useGPU` flag must not change checksums.

use rayon::prelude::*;
use tracing::instrument;

use crate::context::SimulationContext;
use crate::numerics::{clamp01, guarded_div};
use crate::state::{Country, World};

/// Annual depreciation of the capital stock.
const DEPRECIATION_RATE: f64 = 0.04;

/// Per-capita yearly demand coefficients.
const FOOD_DEMAND_PC: f64 = 0.00100;
const GOODS_DEMAND_PC: f64 = 0.00055;
const SERVICES_DEMAND_PC: f64 = 0.00035;

const PRICE_MIN: f64 = 0.2;
const PRICE_MAX: f64 = 5.0;

/// Inputs for one country's yearly pass, gathered under the grid lock so
/// the per-country computation can run lock-free (and in parallel).
#[derive(Debug, Clone, Copy, Default)]
struct CountryInputs {
    food_sum: f64,
    non_food_sum: f64,
    ore_sum: f64,
    climate_mult: f64,
}

#[instrument(skip_all, name = "macro_economy")]
pub fn tick_year(world: &mut World, ctx: &SimulationContext, year: i32, dt_years: i32) {
    let n = world.countries.len();
    let dt = dt_years.max(1) as f64;

    world
        .map
        .climate
        .aggregate_country_multipliers(&world.map.fields, n);

    // PHASE 1: gather per-country inputs once under the grid lock.
    let inputs: Vec<CountryInputs> = {
        let own = world.map.ownership_lock();
        (0..n)
            .map(|i| CountryInputs {
                food_sum: own.country_food_sum(i as u32),
                non_food_sum: own.country_non_food_sum(i as u32),
                ore_sum: own.country_ore_sum(i as u32),
                climate_mult: world.map.climate.country_food_multiplier(i as u32),
            })
            .collect()
    };

    // PHASE 2: independent per-country updates. Countries only read their
    // own state here, so the loop parallelizes with a deterministic
    // index-order merge (results land back by index).
    let updates: Vec<CountryEconUpdate> = world
        .countries
        .par_iter()
        .enumerate()
        .map(|(i, c)| compute_country_year(c, inputs[i], ctx, dt))
        .collect();
    for (c, u) in world.countries.iter_mut().zip(updates) {
        apply_update(c, u);
    }

    // PHASE 3: the trade intensity matrix, in canonical pair order.
    rebuild_trade_intensity(world, year);

    // Connectivity depends on the fresh matrix.
    for i in 0..n {
        let row_mean = if n > 1 {
            let mut sum = 0.0;
            for j in 0..n {
                if j != i {
                    sum += world.trade_intensity[i * n + j] as f64;
                }
            }
            sum / (n - 1) as f64
        } else {
            0.0
        };
        let c = &mut world.countries[i];
        if !c.alive() {
            continue;
        }
        c.econ.connectivity_index = clamp01(
            0.6 * row_mean
                + 0.04 * c.ports.len() as f64
                + 0.02 * c.airways.len() as f64
                + 0.01 * c.roads.len().min(20) as f64,
        );
        c.econ.market_access = clamp01(
            0.15 + 0.5 * c.econ.connectivity_index + 0.35 * c.avg_control,
        );
    }
    let _ = year;
}

#[derive(Debug, Clone, Default)]
struct CountryEconUpdate {
    skip: bool,
    econ_patch: Box<Option<crate::state::MacroState>>,
    gold: f64,
    debt: f64,
    gdp: f64,
    wealth: f64,
    last_tax_base: f64,
    last_tax_take: f64,
    stability_delta: f64,
    legitimacy_delta: f64,
}

fn compute_country_year(
    c: &Country,
    inp: CountryInputs,
    ctx: &SimulationContext,
    dt: f64,
) -> CountryEconUpdate {
    if !c.alive() {
        return CountryEconUpdate {
            skip: true,
            ..CountryEconUpdate::default()
        };
    }
    let econ_cfg = &ctx.config.economy;
    let mut m = c.econ.clone();
    let pop = c.population.max(0) as f64;
    let workers = c.working_age_population().max(1.0);

    // --- Production ---------------------------------------------------
    // Food is min(land-limited, labor-limited); the land term carries the
    // climate multiplier, the labor term carries human capital.
    let land_limited = inp.food_sum * inp.climate_mult * 1.45;
    let labor_food = workers * 0.70;
    let labor_limited = labor_food * 0.0024 * (1.0 + 0.6 * m.human_capital);
    m.last_food_output = land_limited.min(labor_limited).max(0.0);

    let capital_boost = 1.0 + 0.25 * (m.capital_stock / (pop / 1000.0 + 1.0)).sqrt().min(4.0);
    m.last_goods_output =
        (inp.non_food_sum * 0.9 + inp.ore_sum * 0.4) * capital_boost * (0.3 + 0.7 * clamp01(workers * 0.3 / pop.max(1.0)) * 2.0).min(1.3);
    m.last_services_output = c.total_city_population * 0.0009 * (1.0 + m.human_capital);
    m.last_military_output = c.polity.military_share * m.last_goods_output * 0.5;
    m.last_non_food_output = m.last_goods_output + m.last_services_output;

    // --- Prices -------------------------------------------------------
    // Scarcity ratio of demand to supply moves each price a quarter step.
    let food_demand = pop * FOOD_DEMAND_PC;
    let goods_demand = pop * GOODS_DEMAND_PC;
    let services_demand = pop * SERVICES_DEMAND_PC;
    let reprice = |price: f64, demand: f64, supply: f64| -> f64 {
        let ratio = guarded_div(demand, supply.max(1e-6));
        (price * ratio.powf(0.25)).clamp(PRICE_MIN, PRICE_MAX)
    };
    m.price_food = reprice(m.price_food, food_demand, m.last_food_output + m.food_stock * 0.2);
    m.price_goods = reprice(m.price_goods, goods_demand, m.last_goods_output + m.non_food_stock * 0.2);
    m.price_services = reprice(m.price_services, services_demand, m.last_services_output.max(1e-6));
    m.price_military = reprice(
        m.price_military,
        c.polity.military_share * goods_demand,
        m.last_military_output.max(1e-6),
    );
    m.cpi = 0.5 * m.price_food + 0.3 * m.price_goods + 0.2 * m.price_services;

    let output_value = m.last_food_output * m.price_food
        + m.last_goods_output * m.price_goods
        + m.last_services_output * m.price_services
        + m.last_military_output * m.price_military;
    m.wage = guarded_div(output_value * 0.55, workers) * 1000.0;
    m.real_wage = guarded_div(m.wage, m.cpi);

    // --- Taxation -----------------------------------------------------
    let institution = m.institution_capacity;
    let infra_term = 1.0 + 0.15 * (m.infra_stock / (pop / 1000.0 + 1.0)).min(3.0);
    let tax_base = (inp.food_sum * inp.climate_mult * 0.6
        + inp.non_food_sum * 1.2
        + pop * 0.0008 * (1.0 + m.human_capital))
        * (0.4 + 0.6 * institution)
        * infra_term;
    m.leakage_rate = clamp01(econ_cfg.leakage_rate_base * (1.3 - 0.8 * institution));
    m.compliance = clamp01(0.35 + 0.4 * c.polity.legitimacy + 0.25 * c.avg_control);
    let tax_take = tax_base * c.polity.tax_rate * (1.0 - m.leakage_rate) * m.compliance;
    m.net_revenue = tax_take;

    // --- Stockpiles ---------------------------------------------------
    // Caps scale with population and infrastructure; every clamp is to the
    // cap, never unbounded.
    m.food_stock_cap = (pop * FOOD_DEMAND_PC * 2.0 + 10.0) * (1.0 + 0.5 * m.infra_stock.min(10.0));
    m.non_food_stock_cap = (pop * GOODS_DEMAND_PC * 3.0 + 10.0) * (1.0 + 0.5 * m.infra_stock.min(10.0));
    let food_cons = pop * FOOD_DEMAND_PC;
    m.last_food_cons = food_cons;
    let exports_q = m.exports_value / m.price_food.max(1e-9) * 0.25;
    let imports_q = m.imports_value / m.price_food.max(1e-9) * 0.25;
    m.food_stock = (m.food_stock + (m.last_food_output - food_cons - exports_q + imports_q) * dt)
        .clamp(0.0, m.food_stock_cap);
    let goods_cons = pop * GOODS_DEMAND_PC;
    m.non_food_stock = (m.non_food_stock + (m.last_goods_output - goods_cons) * dt)
        .clamp(0.0, m.non_food_stock_cap);
    m.services_stock = (m.services_stock + (m.last_services_output - services_demand) * dt)
        .clamp(0.0, m.non_food_stock_cap);
    m.military_supply_stock = (m.military_supply_stock
        + (m.last_military_output - 0.3 * m.military_supply_stock) * dt)
        .clamp(0.0, m.non_food_stock_cap);

    // --- Budget, investment and debt ---------------------------------
    let mut gold = c.gold;
    let mut debt = c.polity.debt;
    let revenue = tax_take * dt;
    let desired_spend = revenue * c.polity.treasury_spend_rate;
    let interest = econ_cfg.interest_rate;
    let debt_service = debt * interest * dt;
    let mut spendable = revenue;
    let borrowing_enabled = institution > econ_cfg.borrowing_institution_threshold;
    if desired_spend + debt_service > revenue + gold {
        let shortfall = desired_spend + debt_service - revenue - gold;
        if borrowing_enabled {
            debt += shortfall;
            spendable += shortfall;
        }
    }
    gold = (gold + spendable - desired_spend - debt_service).max(0.0);
    // Surpluses retire debt first.
    if gold > 0.0 && debt > 0.0 {
        let repay = gold.min(debt * 0.25);
        gold -= repay;
        debt -= repay;
    }

    let investment = desired_spend * (c.polity.infra_share * 0.6 + c.polity.admin_share * 0.2)
        * (0.5 + 0.5 * c.polity.legitimacy);
    m.last_investment = investment;
    m.last_depreciation = m.capital_stock * DEPRECIATION_RATE;
    m.capital_stock = (m.capital_stock + (investment - m.last_depreciation) * dt).max(0.0);
    m.infra_stock = (m.infra_stock
        + (desired_spend * c.polity.infra_share * 0.4 - m.infra_stock * 0.02) * dt)
        .max(0.0);

    // Debt burden feeds stability and legitimacy.
    let debt_to_revenue = guarded_div(debt, revenue.max(1.0));
    let service_to_revenue = guarded_div(debt * interest, revenue.max(1.0));
    let mut stability_delta = 0.0;
    let mut legitimacy_delta = 0.0;
    if debt_to_revenue > econ_cfg.debt_to_revenue_stress {
        stability_delta -= 0.01 * dt;
        legitimacy_delta -= 0.012 * dt;
    }
    if service_to_revenue > econ_cfg.debt_service_stress {
        legitimacy_delta -= 0.008 * dt;
    }
    legitimacy_delta += 0.004 * dt * (institution - 0.3) + 0.002 * dt * m.real_wage.min(2.0)
        - 0.01 * dt * m.famine_severity
        - 0.006 * dt * m.inequality.max(0.0)
        - 0.004 * dt * m.disease_burden;

    // Endogenous development stocks.
    m.human_capital = clamp01(
        m.human_capital + (0.004 * c.polity.education_share * 10.0 + 0.0006 * institution
            - 0.002 * m.human_capital) * dt,
    );
    m.inequality = clamp01(m.inequality + (0.002 * (1.0 - institution) - 0.0015 * c.polity.legitimacy) * dt);
    m.institution_capacity = clamp01(
        0.15 + 0.45 * c.polity.admin_capacity + 0.25 * m.human_capital + 0.15 * m.knowledge_stock,
    );

    // Trade bookkeeping: exports scale with connectivity and surplus.
    let food_surplus = (m.last_food_output - food_cons).max(0.0);
    m.exports_value = food_surplus * m.price_food * 0.3 * m.connectivity_index
        + m.last_goods_output * m.price_goods * 0.15 * m.connectivity_index;
    m.imports_value = m.exports_value * 0.9;

    let gdp = output_value;
    let wealth = gold + m.capital_stock * m.price_goods + m.food_stock * m.price_food;

    CountryEconUpdate {
        skip: false,
        econ_patch: Box::new(Some(m)),
        gold,
        debt,
        gdp,
        wealth,
        last_tax_base: tax_base,
        last_tax_take: tax_take,
        stability_delta,
        legitimacy_delta,
    }
}

fn apply_update(c: &mut Country, u: CountryEconUpdate) {
    if u.skip {
        return;
    }
    if let Some(m) = *u.econ_patch {
        c.econ = m;
    }
    c.gold = u.gold;
    c.polity.debt = u.debt;
    c.gdp = u.gdp;
    c.wealth = u.wealth;
    c.last_tax_base = u.last_tax_base;
    c.last_tax_take = u.last_tax_take;
    c.stability = (c.stability + u.stability_delta).clamp(0.0, 2.0);
    c.polity.set_legitimacy(c.polity.legitimacy + u.legitimacy_delta);
}

/// Dense N*N matrix in [0, 1] from neighbor contact, ports and price
/// differentials. This is the sole cross-country coupling consumed by
/// demography, culture and technology diffusion.
fn rebuild_trade_intensity(world: &mut World, _year: i32) {
    let n = world.countries.len();
    world.trade_intensity.resize(n * n, 0.0);
    world.trade_intensity.iter_mut().for_each(|v| *v = 0.0);

    // One lock for the whole cluster of reads.
    let pairs: Vec<(u32, u32, f64)> = {
        let own = world.map.ownership_lock();
        own.border_pairs()
            .into_iter()
            .map(|(a, b)| (a, b, own.border_contact(a, b) as f64))
            .collect()
    };

    // Neighbor pairs in ascending (min, max) order.
    for (a, b, contact) in pairs {
        let (i, j) = (a as usize, b as usize);
        if i >= n || j >= n {
            continue;
        }
        let ca = &world.countries[i];
        let cb = &world.countries[j];
        if !ca.alive() || !cb.alive() {
            continue;
        }
        let contact_term = 0.20 + 0.15 * (contact / (contact + 40.0));
        let port_term = if !ca.ports.is_empty() && !cb.ports.is_empty() {
            0.15
        } else {
            0.0
        };
        let price_gap = (ca.econ.price_food.ln() - cb.econ.price_food.ln()).abs()
            + (ca.econ.price_goods.ln() - cb.econ.price_goods.ln()).abs();
        let price_term = 0.15 * (price_gap / (1.0 + price_gap));
        let war_block = if ca.is_at_war_with(b) { 0.0 } else { 1.0 };
        let v = clamp01((contact_term + port_term + price_term) * war_block) as f32;
        world.trade_intensity[i * n + j] = v;
        world.trade_intensity[j * n + i] = v;
    }

    // Sea lanes: port-owning pairs trade even without a land border.
    let with_ports: Vec<usize> = (0..n)
        .filter(|&i| world.countries[i].alive() && !world.countries[i].ports.is_empty())
        .collect();
    for (ai, &i) in with_ports.iter().enumerate() {
        for &j in with_ports.iter().skip(ai + 1) {
            if world.trade_intensity[i * n + j] == 0.0 {
                let v = (0.10
                    * clamp01(
                        0.5 * world.countries[i].econ.connectivity_index
                            + 0.5 * world.countries[j].econ.connectivity_index
                            + 0.5,
                    )) as f32;
                world.trade_intensity[i * n + j] = v;
                world.trade_intensity[j * n + i] = v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::WorldBuilder;

    #[test]
    fn test_prices_stay_bounded() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        for _ in 0..20 {
            let year = world.year;
            tick_year(&mut world, &ctx, year, 1);
            world.year += 1;
        }
        for c in &world.countries {
            assert!(c.econ.price_food >= PRICE_MIN && c.econ.price_food <= PRICE_MAX);
            assert!(c.econ.price_goods >= PRICE_MIN && c.econ.price_goods <= PRICE_MAX);
        }
    }

    #[test]
    fn test_stockpiles_respect_caps() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        for _ in 0..30 {
            let year = world.year;
            tick_year(&mut world, &ctx, year, 1);
        }
        for c in &world.countries {
            assert!(c.econ.food_stock <= c.econ.food_stock_cap + 1e-9);
            assert!(c.econ.food_stock >= 0.0);
        }
    }

    #[test]
    fn test_trade_matrix_symmetric_and_bounded() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(3).build();
        let year = world.year;
        tick_year(&mut world, &ctx, year, 1);
        let n = world.countries.len();
        for i in 0..n {
            for j in 0..n {
                let v = world.trade_intensity[i * n + j];
                assert!((0.0..=1.0).contains(&v));
                assert_eq!(v, world.trade_intensity[j * n + i]);
            }
        }
    }

    #[test]
    fn test_neighbors_trade() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        let year = world.year;
        tick_year(&mut world, &ctx, year, 1);
        // The builder places countries adjacent on a small map.
        let adjacent = {
            let own = world.map.ownership_lock();
            own.are_neighbors(0, 1)
        };
        if adjacent {
            assert!(world.trade_intensity_between(0, 1) > 0.0);
        }
    }

    #[test]
    fn test_gpu_flag_does_not_change_state() {
        let (mut world_a, mut ctx_a) = WorldBuilder::new().size(48, 48).countries(2).build();
        let (mut world_b, mut ctx_b) = WorldBuilder::new().size(48, 48).countries(2).build();
        ctx_a.config.economy.use_gpu = false;
        ctx_b.config.economy.use_gpu = true;
        for _ in 0..5 {
            let year_a = world_a.year;
            tick_year(&mut world_a, &ctx_a, year_a, 1);
            let year_b = world_b.year;
            tick_year(&mut world_b, &ctx_b, year_b, 1);
        }
        assert_eq!(world_a.checksum(), world_b.checksum());
    }
}
