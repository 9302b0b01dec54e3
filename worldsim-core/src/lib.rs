//! # World Simulation Core
//!
//! Deterministic grid-based world-history simulation kernel.
//!
//! This crate implements the authoritative yearly tick: a fixed world map
//! divided into cells, up to a few hundred countries evolving over
//! multi-millennium horizons, with identical trajectories for headless and
//! interactive drivers given the same seed and configuration.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐      ┌──────────────────┐      ┌─────────────┐
//! │  MapLayers   │─────▶│  generate_world  │─────▶│    World    │
//! │ (PNG decode) │      │ (spawn + grids)  │      │  (dynamic)  │
//! └──────────────┘      └──────────────────┘      └──────┬──────┘
//!                                                        │
//!                       ┌──────────────┐         ┌───────▼───────┐
//!                       │  EventLog    │◀────────│   step_year   │
//!                       │ (observers)  │         │ (8 stages)    │
//!                       └──────────────┘         └───────────────┘
//! ```
//!
//! ## Key Types
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`World`] | Complete dynamic state (map grids, countries, plague) |
//! | [`SimulationContext`] | Seed + parsed config + config hash |
//! | [`step_year`] | The authoritative tick: eight stages in fixed order |
//! | [`mega_time_jump`] | Multi-year loop with cancel + progress callbacks |
//! | [`check_invariants`] | Pure invariant check for drivers |
//! | [`ParityChecksum`] | The 5-tuple compared between GUI/CLI paths |
//!
//! ## Determinism
//!
//! Every random draw derives from the world seed through splitmix64: each
//! country owns a [`CountryRng`] stream, and spatial noise uses salted
//! [`unit_hash`](context::unit_hash) values. Selections over unordered
//! containers always sort by a canonical key first, and parallel reductions
//! merge in index order, so single- and multi-threaded runs of the same
//! seed produce byte-identical state.

pub mod config;
pub mod context;
pub mod init;
pub mod map;
pub mod metrics;
pub mod numerics;
pub mod observer;
pub mod state;
pub mod step;
pub mod systems;
pub mod testing;

#[cfg(test)]
mod step_tests;

pub use config::{ConfigError, SimConfig};
pub use context::{mix64, u01_from_u64, CountryRng, SimulationContext};
pub use init::{generate_world, InitError};
pub use map::layers::{MapLayers, ResourceKind};
pub use map::{MapGrid, FIELD_CELL_SIZE};
pub use metrics::{compute_snapshot, MetricsSnapshot, SimMetrics};
pub use observer::{EventLog, GameEvent, SimObserver};
pub use state::{check_invariants, Country, CountryId, ParityChecksum, World};
pub use step::{mega_time_jump, step_year, JumpOutcome, SimError};
