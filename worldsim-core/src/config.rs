//! Simulation configuration.
//!
//! The config document is the key/value TOML file recorded (by hash) next to
//! the world seed. Most knobs carry the calibrated defaults; the migration
//! shock block is deliberately default-free so a config that omits it fails
//! initialization instead of silently reverting to baked-in values.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldConfig {
    pub start_year: i32,
    pub end_year: i32,
    #[serde(default = "default_num_countries")]
    pub num_countries: u32,
    #[serde(default = "default_max_countries")]
    pub max_countries: u32,
}

fn default_num_countries() -> u32 {
    100
}
fn default_max_countries() -> u32 {
    400
}

/// Food potential coefficients; see the resource grid derivation for how
/// they combine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FoodConfig {
    pub coastal_bonus: f64,
    pub base_foraging: f64,
    pub base_farming: f64,
    pub riverland_food_floor: f64,
    pub clay_min: f64,
    pub clay_max: f64,
    pub clay_hotspot_chance: f64,
}

impl Default for FoodConfig {
    fn default() -> Self {
        Self {
            coastal_bonus: 0.35,
            base_foraging: 0.55,
            base_farming: 0.85,
            riverland_food_floor: 0.60,
            clay_min: 0.05,
            clay_max: 0.45,
            clay_hotspot_chance: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResourceConfig {
    pub ore_weight_iron: f64,
    pub ore_weight_copper: f64,
    pub ore_weight_tin: f64,
    pub ore_normalization: f64,
    pub energy_normalization: f64,
    pub construction_normalization: f64,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            ore_weight_iron: 1.0,
            ore_weight_copper: 0.6,
            ore_weight_tin: 0.4,
            ore_normalization: 1.0,
            energy_normalization: 1.0,
            construction_normalization: 1.0,
        }
    }
}

/// Migration constants. The shock thresholds and multipliers are required
/// keys: a config that omits them fails at startup instead of silently
/// running with baked-in values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationConfig {
    pub refugee_half_life_years: f64,
    pub famine_shock_threshold: f64,
    pub famine_shock_multiplier: f64,
    pub epidemic_shock_threshold: f64,
    pub epidemic_shock_multiplier: f64,
    pub war_shock_multiplier: f64,
    #[serde(default = "default_cultural_preference")]
    pub cultural_preference: f64,
    #[serde(default = "default_corridor_bonus")]
    pub corridor_bonus: f64,
    #[serde(default = "default_mig_rate")]
    pub short_hop_rate: f64,
}

fn default_cultural_preference() -> f64 {
    1.0
}
fn default_corridor_bonus() -> f64 {
    0.35
}
fn default_mig_rate() -> f64 {
    0.04
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TechnologyConfig {
    pub capability_threshold_scale: f64,
    pub cultural_friction_strength: f64,
    pub adoption_threshold: f64,
    pub diffusion_rate: f64,
    pub neighbor_diffusion_floor: f64,
}

impl Default for TechnologyConfig {
    fn default() -> Self {
        Self {
            capability_threshold_scale: 1.0,
            cultural_friction_strength: 1.6,
            adoption_threshold: 0.65,
            diffusion_rate: 0.045,
            neighbor_diffusion_floor: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EconomyConfig {
    /// Accepted for parity with the interactive build; the CPU model is
    /// always authoritative and this flag must not alter checksums.
    pub use_gpu: bool,
    pub spoilage_rate: f64,
    pub interest_rate: f64,
    pub borrowing_institution_threshold: f64,
    pub debt_to_revenue_stress: f64,
    pub debt_service_stress: f64,
    pub leakage_rate_base: f64,
}

impl Default for EconomyConfig {
    fn default() -> Self {
        Self {
            use_gpu: false,
            spoilage_rate: 0.12,
            interest_rate: 0.06,
            borrowing_institution_threshold: 0.25,
            debt_to_revenue_stress: 2.5,
            debt_service_stress: 0.35,
            leakage_rate_base: 0.15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoliticsConfig {
    pub fragmentation_min_territory_cells: usize,
    pub fragmentation_min_population: i64,
    pub fragmentation_threshold: f64,
    pub max_splits_per_year: usize,
    pub breakaway_low_control_threshold: f64,
    pub breakaway_required_years: i32,
    pub breakaway_min_component_fields: usize,
    pub breakaway_min_overseas_fraction: f64,
}

impl Default for PoliticsConfig {
    fn default() -> Self {
        Self {
            fragmentation_min_territory_cells: 180,
            fragmentation_min_population: 12_000,
            fragmentation_threshold: 0.62,
            max_splits_per_year: 2,
            breakaway_low_control_threshold: 0.22,
            breakaway_required_years: 120,
            breakaway_min_component_fields: 14,
            breakaway_min_overseas_fraction: 0.18,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlagueConfig {
    pub interval_years: i32,
    pub duration_years: i32,
}

impl Default for PlagueConfig {
    fn default() -> Self {
        Self {
            interval_years: 400,
            duration_years: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringConfig {
    /// Extra checkpoint years recorded in addition to the cadence.
    pub checkpoint_years: Vec<i32>,
    /// Dump per-country food output every simulated year during mega jumps.
    pub world_food_snapshots: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimConfig {
    pub world: WorldConfig,
    #[serde(default)]
    pub food: FoodConfig,
    #[serde(default)]
    pub resources: ResourceConfig,
    pub migration: MigrationConfig,
    #[serde(default)]
    pub technology: TechnologyConfig,
    #[serde(default)]
    pub economy: EconomyConfig,
    #[serde(default)]
    pub politics: PoliticsConfig,
    #[serde(default)]
    pub plague: PlagueConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl SimConfig {
    /// Parse from a TOML document string and validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: SimConfig = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse from a file path and validate.
    pub fn from_path(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.world.end_year < self.world.start_year {
            return Err(ConfigError::Invalid(format!(
                "world.endYear {} precedes world.startYear {}",
                self.world.end_year, self.world.start_year
            )));
        }
        if self.world.max_countries < self.world.num_countries {
            return Err(ConfigError::Invalid(
                "world.maxCountries below world.numCountries".into(),
            ));
        }
        if self.migration.refugee_half_life_years <= 0.0 {
            return Err(ConfigError::Invalid(
                "migration.refugeeHalfLifeYears must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.technology.adoption_threshold) {
            return Err(ConfigError::Invalid(
                "technology.adoptionThreshold outside [0, 1]".into(),
            ));
        }
        if self.economy.spoilage_rate < 0.0 || self.economy.spoilage_rate >= 1.0 {
            return Err(ConfigError::Invalid(
                "economy.spoilageRate outside [0, 1)".into(),
            ));
        }
        Ok(())
    }
}

/// A complete config document usable by tests and the demo driver path.
pub const EXAMPLE_CONFIG_TOML: &str = r#"
[world]
startYear = -5000
endYear = 1900
numCountries = 100
maxCountries = 400

[food]
coastalBonus = 0.35
baseForaging = 0.55
baseFarming = 0.85
riverlandFoodFloor = 0.60
clayMin = 0.05
clayMax = 0.45
clayHotspotChance = 0.02

[resources]
oreWeightIron = 1.0
oreWeightCopper = 0.6
oreWeightTin = 0.4
oreNormalization = 1.0
energyNormalization = 1.0
constructionNormalization = 1.0

[migration]
refugeeHalfLifeYears = 12.0
famineShockThreshold = 0.25
famineShockMultiplier = 0.55
epidemicShockThreshold = 0.08
epidemicShockMultiplier = 0.40
warShockMultiplier = 0.30
culturalPreference = 1.0
corridorBonus = 0.35
shortHopRate = 0.04

[technology]
capabilityThresholdScale = 1.0
culturalFrictionStrength = 1.6
adoptionThreshold = 0.65

[economy]
useGPU = false
spoilageRate = 0.12
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_example_config_parses() {
        let cfg = SimConfig::from_toml_str(EXAMPLE_CONFIG_TOML).unwrap();
        assert_eq!(cfg.world.start_year, -5000);
        assert_eq!(cfg.world.max_countries, 400);
        assert!((cfg.migration.refugee_half_life_years - 12.0).abs() < 1e-12);
        assert!(!cfg.economy.use_gpu);
        assert!((cfg.technology.adoption_threshold - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_missing_shock_block_fails() {
        // No silent fallback: a config without the migration block is invalid.
        let text = r#"
[world]
startYear = -5000
endYear = 1000
"#;
        assert!(SimConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_missing_shock_key_fails() {
        let text = r#"
[world]
startYear = -5000
endYear = 1000

[migration]
refugeeHalfLifeYears = 10.0
famineShockThreshold = 0.25
famineShockMultiplier = 0.55
epidemicShockThreshold = 0.08
# epidemicShockMultiplier missing
warShockMultiplier = 0.30
"#;
        assert!(SimConfig::from_toml_str(text).is_err());
    }

    #[test]
    fn test_invalid_year_range_rejected() {
        let text = EXAMPLE_CONFIG_TOML.replace("endYear = 1900", "endYear = -6000");
        assert!(SimConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn test_negative_half_life_rejected() {
        let text =
            EXAMPLE_CONFIG_TOML.replace("refugeeHalfLifeYears = 12.0", "refugeeHalfLifeYears = 0.0");
        assert!(SimConfig::from_toml_str(&text).is_err());
    }
}
