//! World and country state.
//!
//! Everything the yearly tick mutates lives here. Inter-country references
//! are stable [`CountryId`]s, never pointers or indices into reallocating
//! containers; an eliminated country is flagged extinct and its id stays
//! reserved for the rest of the run.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

use crate::context::CountryRng;
use crate::map::MapGrid;

pub type CountryId = u32;
pub type Cell = (u16, u16);

/// Sentinel owner id for unowned cells in the ownership grid.
pub const UNOWNED: i32 = -1;

/// Number of continuous knowledge domains per country.
pub const KNOWLEDGE_DOMAINS: usize = 8;

/// Number of cultural traits per country.
pub const CULTURE_TRAITS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CountryType {
    Warmonger,
    Pacifist,
    Trader,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ideology {
    Tribal,
    Chiefdom,
    Kingdom,
    Empire,
    Republic,
    Democracy,
    Dictatorship,
    Federation,
    Theocracy,
    CityState,
}

impl Ideology {
    pub fn label(self) -> &'static str {
        match self {
            Ideology::Tribal => "Tribal",
            Ideology::Chiefdom => "Chiefdom",
            Ideology::Kingdom => "Kingdom",
            Ideology::Empire => "Empire",
            Ideology::Republic => "Republic",
            Ideology::Democracy => "Democracy",
            Ideology::Dictatorship => "Dictatorship",
            Ideology::Federation => "Federation",
            Ideology::Theocracy => "Theocracy",
            Ideology::CityState => "City-State",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WarGoal {
    Raid,
    BorderShift,
    Tribute,
    Vassalization,
    RegimeChange,
    Annihilation,
}

/// Five-cohort demographic split: 0-4, 5-14, 15-49, 50-64, 65+.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Cohorts(pub [f64; 5]);

impl Cohorts {
    /// Canonical age-structure shares used at founding and renormalization.
    pub const FOUNDING_SHARES: [f64; 5] = [0.14, 0.22, 0.46, 0.11, 0.07];

    pub fn from_total(total: f64) -> Self {
        let mut c = [0.0; 5];
        for (slot, share) in c.iter_mut().zip(Self::FOUNDING_SHARES) {
            *slot = total * share;
        }
        Cohorts(c)
    }

    pub fn total(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Rescale so the cohort sum matches `total` (keeps the age structure).
    pub fn renormalize_to(&mut self, total: f64) {
        let sum = self.total();
        if sum > 1e-9 {
            let k = total / sum;
            for v in &mut self.0 {
                *v *= k;
            }
        } else {
            *self = Self::from_total(total.max(0.0));
        }
    }
}

/// SIR compartment state; `s + i + r == 1` within 1e-6 at year boundaries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EpidemicState {
    pub s: f64,
    pub i: f64,
    pub r: f64,
}

impl Default for EpidemicState {
    fn default() -> Self {
        Self {
            s: 0.999,
            i: 0.001,
            r: 0.0,
        }
    }
}

impl EpidemicState {
    pub fn renormalize(&mut self) {
        self.s = self.s.max(0.0);
        self.i = self.i.max(0.0);
        self.r = self.r.max(0.0);
        let sum = self.s + self.i + self.r;
        if sum > 1e-9 {
            self.s /= sum;
            self.i /= sum;
            self.r /= sum;
        } else {
            *self = Self::default();
        }
    }
}

/// Macro-economy state per country (CPU authoritative).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MacroState {
    pub initialized: bool,

    pub food_stock: f64,
    pub food_stock_cap: f64,
    pub non_food_stock: f64,
    pub non_food_stock_cap: f64,
    pub capital_stock: f64,
    pub infra_stock: f64,
    pub services_stock: f64,
    pub military_supply_stock: f64,

    /// Transient migration shock pressure in [0, 1], half-life decay.
    pub refugee_push: f64,

    pub last_food_output: f64,
    pub last_goods_output: f64,
    pub last_services_output: f64,
    pub last_military_output: f64,
    pub last_non_food_output: f64,
    pub last_food_cons: f64,
    pub last_investment: f64,
    pub last_depreciation: f64,
    pub last_births: f64,
    pub last_deaths: f64,
    pub last_avg_nutrition: f64,

    pub food_security: f64,
    pub market_access: f64,
    pub imports_value: f64,
    pub exports_value: f64,

    pub human_capital: f64,
    pub knowledge_stock: f64,
    pub inequality: f64,
    pub connectivity_index: f64,
    pub institution_capacity: f64,

    pub price_food: f64,
    pub price_goods: f64,
    pub price_services: f64,
    pub price_military: f64,
    pub cpi: f64,
    pub wage: f64,
    pub real_wage: f64,

    pub compliance: f64,
    pub leakage_rate: f64,
    pub net_revenue: f64,

    pub famine_severity: f64,
    pub migration_pressure_out: f64,
    pub migration_attractiveness: f64,
    pub disease_burden: f64,
}

impl Default for MacroState {
    fn default() -> Self {
        Self {
            initialized: false,
            food_stock: 0.0,
            food_stock_cap: 0.0,
            non_food_stock: 0.0,
            non_food_stock_cap: 0.0,
            capital_stock: 0.0,
            infra_stock: 0.0,
            services_stock: 0.0,
            military_supply_stock: 0.0,
            refugee_push: 0.0,
            last_food_output: 0.0,
            last_goods_output: 0.0,
            last_services_output: 0.0,
            last_military_output: 0.0,
            last_non_food_output: 0.0,
            last_food_cons: 0.0,
            last_investment: 0.0,
            last_depreciation: 0.0,
            last_births: 0.0,
            last_deaths: 0.0,
            last_avg_nutrition: 1.0,
            food_security: 1.0,
            market_access: 0.2,
            imports_value: 0.0,
            exports_value: 0.0,
            human_capital: 0.02,
            knowledge_stock: 0.01,
            inequality: 0.20,
            connectivity_index: 0.0,
            institution_capacity: 0.0,
            price_food: 1.0,
            price_goods: 1.0,
            price_services: 1.0,
            price_military: 1.0,
            cpi: 1.0,
            wage: 0.0,
            real_wage: 0.0,
            compliance: 0.5,
            leakage_rate: 0.15,
            net_revenue: 0.0,
            famine_severity: 0.0,
            migration_pressure_out: 0.0,
            migration_attractiveness: 0.0,
            disease_burden: 0.0,
        }
    }
}

impl MacroState {
    /// Sum of every stockpile (parity checksum term).
    pub fn total_stockpiles(&self) -> f64 {
        self.food_stock.max(0.0)
            + self.non_food_stock.max(0.0)
            + self.capital_stock.max(0.0)
            + self.infra_stock.max(0.0)
            + self.services_stock.max(0.0)
            + self.military_supply_stock.max(0.0)
    }
}

/// Polity scalars driving budgets, control reach and fragmentation risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolityState {
    pub legitimacy: f64,
    pub admin_capacity: f64,
    pub fiscal_capacity: f64,
    pub logistics_reach: f64,
    pub tax_rate: f64,
    pub treasury_spend_rate: f64,
    pub military_share: f64,
    pub admin_share: f64,
    pub infra_share: f64,
    pub health_share: f64,
    pub education_share: f64,
    pub rnd_share: f64,
    pub debt: f64,
}

impl Default for PolityState {
    fn default() -> Self {
        Self {
            legitimacy: 0.65,
            admin_capacity: 0.08,
            fiscal_capacity: 0.10,
            logistics_reach: 0.10,
            tax_rate: 0.08,
            treasury_spend_rate: 1.05,
            military_share: 0.34,
            admin_share: 0.28,
            infra_share: 0.38,
            health_share: 0.0,
            education_share: 0.0,
            rnd_share: 0.0,
            debt: 0.0,
        }
    }
}

impl PolityState {
    pub fn set_legitimacy(&mut self, v: f64) {
        self.legitimacy = v.clamp(0.0, 1.0);
    }
}

/// Effects of the adopted technology set. Recomputed from scratch each year
/// by a pure function of the adopted set; never accumulated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechEffects {
    pub research_mult: f64,
    pub growth_bonus: f64,
    pub carrying_capacity_mult: f64,
    pub plague_resistance: f64,
    pub military_mult: f64,
    pub territory_capture_bonus: f64,
    pub defensive_bonus: f64,
    pub war_duration_reduction: f64,
    pub max_size_mult: f64,
    pub flat_max_size_bonus: i32,
    pub expansion_rate_bonus: i32,
    pub burst_radius: i32,
    pub burst_frequency: i32,
    pub war_burst_radius: i32,
    pub war_burst_frequency: i32,
    pub enables_roads: bool,
    pub enables_ports: bool,
    pub enables_factories: bool,
    pub enables_airways: bool,
}

impl Default for TechEffects {
    fn default() -> Self {
        Self {
            research_mult: 1.0,
            growth_bonus: 0.0,
            carrying_capacity_mult: 1.0,
            plague_resistance: 0.0,
            military_mult: 1.0,
            territory_capture_bonus: 0.0,
            defensive_bonus: 0.0,
            war_duration_reduction: 0.0,
            max_size_mult: 1.0,
            flat_max_size_bonus: 0,
            expansion_rate_bonus: 0,
            burst_radius: 1,
            burst_frequency: 0,
            war_burst_radius: 1,
            war_burst_frequency: 0,
            enables_roads: false,
            enables_ports: false,
            enables_factories: false,
            enables_airways: false,
        }
    }
}

/// Per-country war bookkeeping. Enemies are ids, never references.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarState {
    pub at_war: bool,
    pub enemies: Vec<CountryId>,
    pub goal: WarGoal,
    pub duration: i32,
    pub annihilation: bool,
    pub conquest: bool,
    pub exhaustion: f64,
    pub supply_capacity: f64,
    pub peace_duration: i32,
    pub pre_war_population: i64,
    pub next_war_check_year: i32,
    /// Year the last war against each enemy ended (gates roads/tech sharing).
    pub last_war_end_year: FxHashMap<CountryId, i32>,
}

impl Default for WarGoal {
    fn default() -> Self {
        WarGoal::BorderShift
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ExplorationState {
    pub last_colonization_year: i32,
    pub exploration_drive: f64,
    pub colonial_overstretch: f64,
    pub overseas_low_control_years: i32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CityCandidate {
    pub fx: i32,
    pub fy: i32,
    pub streak: i32,
}

impl CityCandidate {
    pub fn none() -> Self {
        Self {
            fx: -1,
            fy: -1,
            streak: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub location: Cell,
    pub population: f64,
    pub admin_contribution: f64,
    pub major: bool,
    pub founded_year: i32,
}

/// A country. Created at world init or by fragmentation/breakaway; never
/// removed, only marked extinct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Country {
    pub id: CountryId,
    pub name: String,
    pub color: [u8; 3],
    pub kind: CountryType,
    pub ideology: Ideology,
    pub founding_year: i32,
    pub extinct: bool,
    pub rng: CountryRng,

    // Territory. `territory` is the canonical indexed vector used for every
    // deterministic sample; the index map keeps removal O(1) (swap-remove).
    pub territory: Vec<Cell>,
    #[serde(skip)]
    pub territory_index: FxHashMap<Cell, usize>,
    pub starting_cell: Cell,

    // Demography.
    pub population: i64,
    pub growth_rate: f64,
    pub cohorts: Cohorts,
    pub epi: EpidemicState,

    // Economy.
    pub gold: f64,
    pub econ: MacroState,
    pub last_tax_base: f64,
    pub last_tax_take: f64,
    pub gdp: f64,
    pub wealth: f64,

    // Knowledge & technology.
    pub knowledge: [f64; KNOWLEDGE_DOMAINS],
    pub known_tech: Vec<u8>,
    pub adoption: Vec<f32>,
    pub low_adoption_years: Vec<u16>,
    pub innovation_rate: f64,
    pub specialist_population: f64,
    pub knowledge_infra: f64,
    pub next_tech_sharing_year: i32,

    // Culture & institutions.
    pub traits: [f64; CULTURE_TRAITS],
    pub institutions: Vec<u16>,

    // Polity.
    pub polity: PolityState,
    pub stability: f64,
    pub avg_control: f64,
    pub autonomy_pressure: f64,
    pub autonomy_over_years: i32,
    pub fragmentation_cooldown: i32,
    pub stagnation_years: i32,
    pub years_since_war: i32,

    // Technology effects and military posture.
    pub effects: TechEffects,
    pub military_strength: f64,

    // Infrastructure.
    pub cities: Vec<City>,
    pub total_city_population: f64,
    pub roads: Vec<Cell>,
    pub ports: Vec<Cell>,
    pub factories: Vec<Cell>,
    pub airways: Vec<CountryId>,
    pub city_candidate: CityCandidate,
    pub next_city_check_year: i32,
    pub next_road_check_year: i32,
    pub next_port_check_year: i32,
    pub next_airway_check_year: i32,

    pub exploration: ExplorationState,
    pub war: WarState,

    // Expansion posture (agent-controlled).
    pub expansion_budget_cells: i32,
    pub content_with_size: bool,
    pub contentment_years_left: i32,
    pub expansion_stagger_offset: i32,
}

impl Country {
    pub fn new(
        id: CountryId,
        world_seed: u64,
        color: [u8; 3],
        start_cell: Cell,
        initial_population: i64,
        growth_rate: f64,
        name: String,
        kind: CountryType,
        founding_year: i32,
    ) -> Self {
        let mut rng = CountryRng::for_country(world_seed, id);
        let stagger = rng.next_below(16) as i32;
        Self {
            id,
            name,
            color,
            kind,
            ideology: Ideology::Tribal,
            founding_year,
            extinct: false,
            rng,
            territory: Vec::new(),
            territory_index: FxHashMap::default(),
            starting_cell: start_cell,
            population: initial_population,
            growth_rate,
            cohorts: Cohorts::from_total(initial_population as f64),
            epi: EpidemicState::default(),
            gold: 0.0,
            econ: MacroState::default(),
            last_tax_base: 0.0,
            last_tax_take: 0.0,
            gdp: 0.0,
            wealth: 0.0,
            knowledge: [0.0; KNOWLEDGE_DOMAINS],
            known_tech: Vec::new(),
            adoption: Vec::new(),
            low_adoption_years: Vec::new(),
            innovation_rate: 0.0,
            specialist_population: 0.0,
            knowledge_infra: 0.0,
            next_tech_sharing_year: i32::MIN,
            traits: [0.5; CULTURE_TRAITS],
            institutions: Vec::new(),
            polity: PolityState::default(),
            stability: 1.0,
            avg_control: 1.0,
            autonomy_pressure: 0.0,
            autonomy_over_years: 0,
            fragmentation_cooldown: 0,
            stagnation_years: 0,
            years_since_war: 0,
            effects: TechEffects::default(),
            military_strength: kind.base_military_strength(),
            cities: Vec::new(),
            total_city_population: 0.0,
            roads: Vec::new(),
            ports: Vec::new(),
            factories: Vec::new(),
            airways: Vec::new(),
            city_candidate: CityCandidate::none(),
            next_city_check_year: i32::MIN,
            next_road_check_year: i32::MIN,
            next_port_check_year: i32::MIN,
            next_airway_check_year: i32::MIN,
            exploration: ExplorationState {
                last_colonization_year: i32::MIN,
                ..ExplorationState::default()
            },
            war: WarState::default(),
            expansion_budget_cells: 0,
            content_with_size: false,
            contentment_years_left: 0,
            expansion_stagger_offset: stagger,
        }
    }

    pub fn alive(&self) -> bool {
        !self.extinct && self.population > 0
    }

    /// Append a cell to the canonical territory vector.
    pub fn add_territory_cell(&mut self, cell: Cell) {
        if self.territory_index.contains_key(&cell) {
            return;
        }
        self.territory_index.insert(cell, self.territory.len());
        self.territory.push(cell);
    }

    /// Swap-remove a cell from the canonical territory vector.
    pub fn remove_territory_cell(&mut self, cell: Cell) {
        let Some(idx) = self.territory_index.remove(&cell) else {
            return;
        };
        let last = self.territory.len() - 1;
        self.territory.swap_remove(idx);
        if idx < last {
            let moved = self.territory[idx];
            self.territory_index.insert(moved, idx);
        }
    }

    /// Rebuild the index map (after deserialization or bulk territory edits).
    pub fn rebuild_territory_index(&mut self) {
        self.territory_index = self
            .territory
            .iter()
            .enumerate()
            .map(|(i, &c)| (c, i))
            .collect();
    }

    /// Deterministic sample from the canonical territory vector.
    pub fn random_territory_cell(&mut self) -> Option<Cell> {
        if self.territory.is_empty() {
            return None;
        }
        let idx = self.rng.next_below(self.territory.len());
        Some(self.territory[idx])
    }

    pub fn capital_cell(&self) -> Cell {
        self.cities
            .first()
            .map(|c| c.location)
            .unwrap_or(self.starting_cell)
    }

    pub fn is_at_war_with(&self, other: CountryId) -> bool {
        self.war.at_war && self.war.enemies.contains(&other)
    }

    pub fn can_declare_war(&self) -> bool {
        !self.war.at_war && self.war.peace_duration <= 0 && self.kind != CountryType::Pacifist
    }

    pub fn reset_military_strength(&mut self) {
        self.military_strength = self.kind.base_military_strength();
    }

    pub fn apply_military_bonus(&mut self, bonus: f64) {
        self.military_strength *= bonus.max(0.0);
    }

    /// Renormalize cohorts to the integer population.
    pub fn renormalize_cohorts(&mut self) {
        self.cohorts.renormalize_to(self.population.max(0) as f64);
    }

    /// Labor supply proxy: working-age cohorts.
    pub fn working_age_population(&self) -> f64 {
        self.cohorts.0[2] + 0.5 * self.cohorts.0[3]
    }
}

impl CountryType {
    pub fn base_military_strength(self) -> f64 {
        match self {
            CountryType::Warmonger => 1.3,
            CountryType::Pacifist => 0.8,
            CountryType::Trader => 1.0,
        }
    }
}

/// One transient great-person bonus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreatPersonEffect {
    pub country: CountryId,
    pub field: GreatPersonField,
    pub name: String,
    pub multiplier: f64,
    pub start_year: i32,
    pub expiry_year: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GreatPersonField {
    Military,
    Science,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreatPeopleState {
    pub next_event_year: i32,
    pub active: Vec<GreatPersonEffect>,
    pub rng: CountryRng,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlagueState {
    pub active: bool,
    pub start_year: i32,
    pub next_outbreak_year: i32,
    pub death_toll: i64,
    /// Affected-country mask, grown as countries are created.
    pub affected: Vec<bool>,
}

impl PlagueState {
    pub fn new(start_year: i32, interval: i32) -> Self {
        Self {
            active: false,
            start_year: 0,
            next_outbreak_year: start_year + interval,
            death_toll: 0,
            affected: Vec::new(),
        }
    }

    pub fn is_country_affected(&self, id: CountryId) -> bool {
        self.active && self.affected.get(id as usize).copied().unwrap_or(false)
    }
}

/// Per-autonomy-center pressure state, keyed by packed field coordinates.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AutonomyCenter {
    pub pressure: f64,
    pub over_years: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoliticsState {
    pub autonomy_centers: FxHashMap<u64, AutonomyCenter>,
    pub last_autonomy_year: i32,
    pub splits_this_year: usize,
}

/// The complete dynamic world. Passed by mutable reference through every
/// tick stage; there is no hidden global state.
#[derive(Debug)]
pub struct World {
    pub world_seed: u64,
    pub map: MapGrid,
    pub countries: Vec<Country>,
    pub year: i32,
    /// Dense N*N trade intensity, row-major, values in [0, 1].
    pub trade_intensity: Vec<f32>,
    pub great_people: GreatPeopleState,
    pub plague: PlagueState,
    pub politics: PoliticsState,
    pub war_starts: u64,
    /// Static tech/civic tables (not part of the dynamic state).
    pub tech_catalog: std::sync::Arc<crate::systems::technology::TechCatalog>,
    pub institution_catalog: std::sync::Arc<Vec<crate::systems::culture::Institution>>,
    /// First year each `(country, dense tech index)` became known.
    pub tech_first_known: FxHashMap<(CountryId, u16), i32>,
}

impl World {
    pub fn trade_intensity_between(&self, a: CountryId, b: CountryId) -> f32 {
        let n = self.countries.len();
        let (a, b) = (a as usize, b as usize);
        if a >= n || b >= n || self.trade_intensity.len() < n * n {
            return 0.0;
        }
        self.trade_intensity[a * n + b]
    }

    /// Mark a country extinct: zero population, cleared territory and wars.
    /// The id stays reserved so existing references remain valid.
    pub fn mark_extinct(&mut self, id: CountryId) {
        let idx = id as usize;
        // Clear territory through the authoritative mutator.
        let cells: Vec<Cell> = self.countries[idx].territory.clone();
        {
            let mut own = self.map.ownership_lock();
            for (x, y) in cells {
                own.set_owner_synced(x as i32, y as i32, UNOWNED, &mut self.countries);
            }
        }
        let enemies: Vec<CountryId> = self.countries[idx].war.enemies.clone();
        for e in enemies {
            let w = &mut self.countries[e as usize].war;
            w.enemies.retain(|&x| x != id);
            if w.enemies.is_empty() {
                w.at_war = false;
                w.duration = 0;
            }
        }
        let c = &mut self.countries[idx];
        c.extinct = true;
        c.population = 0;
        c.cohorts = Cohorts::default();
        c.cities.clear();
        c.roads.clear();
        c.ports.clear();
        c.factories.clear();
        c.airways.clear();
        c.war = WarState::default();
        log::info!("{} collapses and becomes extinct", c.name);
    }

    /// Deterministic checksum over the full dynamic state. Identical states
    /// produce identical checksums; used by the determinism tests and the
    /// step-ordering negative test.
    pub fn checksum(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();

        self.year.hash(&mut hasher);

        // Ownership grid + derived adjacency.
        {
            let own = self.map.ownership_lock();
            own.hash_into(&mut hasher);
        }

        // Field-grid dynamic layers.
        self.map.fields.hash_into(&mut hasher);
        self.map.climate.hash_into(&mut hasher);
        self.map.population.hash_into(&mut hasher);

        // Countries in index order (indices are stable ids).
        for c in &self.countries {
            c.id.hash(&mut hasher);
            c.extinct.hash(&mut hasher);
            c.population.hash(&mut hasher);
            c.rng.state().hash(&mut hasher);
            c.gold.to_bits().hash(&mut hasher);
            c.gdp.to_bits().hash(&mut hasher);
            c.polity.debt.to_bits().hash(&mut hasher);
            c.polity.legitimacy.to_bits().hash(&mut hasher);
            c.polity.tax_rate.to_bits().hash(&mut hasher);
            c.stability.to_bits().hash(&mut hasher);
            c.avg_control.to_bits().hash(&mut hasher);
            for v in c.cohorts.0 {
                v.to_bits().hash(&mut hasher);
            }
            c.epi.s.to_bits().hash(&mut hasher);
            c.epi.i.to_bits().hash(&mut hasher);
            c.epi.r.to_bits().hash(&mut hasher);
            for v in c.knowledge {
                v.to_bits().hash(&mut hasher);
            }
            for v in c.traits {
                v.to_bits().hash(&mut hasher);
            }
            c.known_tech.hash(&mut hasher);
            for a in &c.adoption {
                a.to_bits().hash(&mut hasher);
            }
            c.institutions.hash(&mut hasher);
            c.econ.food_stock.to_bits().hash(&mut hasher);
            c.econ.non_food_stock.to_bits().hash(&mut hasher);
            c.econ.capital_stock.to_bits().hash(&mut hasher);
            c.econ.infra_stock.to_bits().hash(&mut hasher);
            c.econ.services_stock.to_bits().hash(&mut hasher);
            c.econ.military_supply_stock.to_bits().hash(&mut hasher);
            c.econ.refugee_push.to_bits().hash(&mut hasher);
            c.territory.len().hash(&mut hasher);
            c.cities.len().hash(&mut hasher);
            c.roads.len().hash(&mut hasher);
            c.ports.len().hash(&mut hasher);
            c.war.at_war.hash(&mut hasher);
            c.war.enemies.hash(&mut hasher);
            c.war.duration.hash(&mut hasher);
        }

        for v in &self.trade_intensity {
            v.to_bits().hash(&mut hasher);
        }

        self.plague.active.hash(&mut hasher);
        self.plague.next_outbreak_year.hash(&mut hasher);
        self.plague.affected.hash(&mut hasher);
        self.great_people.next_event_year.hash(&mut hasher);
        self.great_people.active.len().hash(&mut hasher);

        hasher.finish()
    }

    /// The five parity components compared between GUI-path and CLI-path runs.
    pub fn parity_checksum(&self) -> ParityChecksum {
        let mut c = ParityChecksum::default();
        for country in &self.countries {
            let pop = country.population.max(0);
            c.world_population += pop;
            c.per_country_population_sum += pop;
            c.total_gdp_sum += country.gdp.max(0.0);
            c.total_stockpiles += country.econ.total_stockpiles();
            c.total_territory_cells += country.territory.len() as i64;
        }
        c
    }
}

/// The parity tuple dumped at each checkpoint year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParityChecksum {
    pub world_population: i64,
    pub per_country_population_sum: i64,
    pub total_gdp_sum: f64,
    pub total_stockpiles: f64,
    pub total_territory_cells: i64,
}

/// Pure invariant check; the CLI driver calls this at every checkpoint and
/// fails the run with exit code 3 on the first violation.
pub fn check_invariants(world: &World) -> Result<(), String> {
    for (i, c) in world.countries.iter().enumerate() {
        if c.population < 0 {
            return Err(format!("negative population for country index {i}"));
        }
        let cohort_sum = c.cohorts.total();
        if c.alive() && (cohort_sum - c.population as f64).abs() > 1.0 + 1e-6 {
            return Err(format!(
                "cohort sum {} diverges from population {} for country index {i}",
                cohort_sum, c.population
            ));
        }
        let sir = c.epi.s + c.epi.i + c.epi.r;
        if (sir - 1.0).abs() > 1e-6 {
            return Err(format!("SIR sum {} != 1 for country index {i}", sir));
        }
        let m = &c.econ;
        let finite_checks = [
            m.food_stock,
            m.food_stock_cap,
            m.non_food_stock,
            m.capital_stock,
            m.infra_stock,
            m.military_supply_stock,
            m.services_stock,
            m.food_security,
            m.market_access,
            m.human_capital,
            m.knowledge_stock,
            m.inequality,
            m.institution_capacity,
            m.price_food,
            m.price_goods,
            m.price_services,
            m.price_military,
            m.famine_severity,
            m.migration_pressure_out,
            m.migration_attractiveness,
            m.disease_burden,
        ];
        for v in finite_checks {
            if !v.is_finite() {
                return Err(format!("non-finite macro value for country index {i}"));
            }
        }
        let stocks = [
            m.food_stock,
            m.non_food_stock,
            m.capital_stock,
            m.infra_stock,
            m.military_supply_stock,
            m.services_stock,
        ];
        for v in stocks {
            if v < 0.0 {
                return Err(format!("negative stock value for country index {i}"));
            }
        }
    }

    {
        let own = world.map.ownership_lock();
        if let Err(e) = own.check_adjacency_invariant() {
            return Err(e);
        }
        for (i, c) in world.countries.iter().enumerate() {
            let f = own.country_food_sum(c.id);
            let nf = own.country_non_food_sum(c.id);
            if !f.is_finite() || !nf.is_finite() {
                return Err(format!("non-finite map potential for country index {i}"));
            }
        }
    }

    let n = world.countries.len() as i32;
    for (idx, &ctl) in world.map.fields.control.iter().enumerate() {
        if !(0.0..=1.0).contains(&ctl) {
            return Err(format!("control {} out of range at field {idx}", ctl));
        }
        let owner = world.map.fields.owner[idx];
        if owner != UNOWNED && (owner < 0 || owner >= n) {
            return Err(format!("field owner {} out of range at field {idx}", owner));
        }
    }
    for (idx, &m) in world.map.climate.food_yield_mult.iter().enumerate() {
        if !(0.0..=1.80 + 1e-9).contains(&(m as f64)) {
            return Err(format!("food yield multiplier {} out of range at field {idx}", m));
        }
    }

    for v in &world.trade_intensity {
        if !v.is_finite() {
            return Err("non-finite trade intensity".to_string());
        }
    }

    Ok(())
}
