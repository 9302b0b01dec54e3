//! The authoritative yearly step and the mega-jump driver loop.
//!
//! Step ordering is a hard contract: demography consumes the economy's
//! shortage flags computed the same year, and political events assume the
//! control grid and adjacency are current. The same sequence backs both the
//! GUI-path and CLI-path drivers, which is what the parity check verifies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use thiserror::Error;
use tracing::instrument;

use crate::context::SimulationContext;
use crate::metrics::SimMetrics;
use crate::observer::EventLog;
use crate::state::World;
use crate::systems;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("invariant violation at year {year}: {reason}")]
    InvariantViolation { year: i32, reason: String },
}

/// Advance the world by one year.
#[instrument(skip_all, name = "step_year", fields(year = world.year))]
pub fn step_year(
    world: &mut World,
    ctx: &SimulationContext,
    events: &mut EventLog,
    mut metrics: Option<&mut SimMetrics>,
) {
    let year = world.year;
    let dt_years = 1;
    let tick_start = Instant::now();

    // Yearly stage ordering:
    // 1. Country agents     -> expansion, wars, infrastructure, plague, control
    // 2. Weather            -> anomaly fields, food-yield multiplier
    // 3. Macro economy      -> budgets, prices, stockpiles, trade intensity
    // 4. Demography/cities  -> migration, births/deaths, SIR, urbanization
    // 5. Technology         -> knowledge, discovery, adoption
    // 6. Culture            -> trait drift/contact, institutions
    // 7. Great people       -> transient scalar bonuses
    // 8. Political events   -> fragmentation, tag replacement, breakaway
    //
    // Order matters: demography consumes the shortage flags the economy
    // computed this year, and political events need post-migration control.
    let t = Instant::now();
    systems::agents::update_countries(world, ctx, year, dt_years, events);
    if let Some(m) = metrics.as_mut() {
        m.agents_time += t.elapsed();
    }

    let t = Instant::now();
    world
        .map
        .climate
        .tick_weather(ctx, year, dt_years, &world.map.fields);
    if let Some(m) = metrics.as_mut() {
        m.weather_time += t.elapsed();
    }

    let t = Instant::now();
    systems::economy::tick_year(world, ctx, year, dt_years);
    if let Some(m) = metrics.as_mut() {
        m.economy_time += t.elapsed();
    }

    let t = Instant::now();
    systems::demography::tick_demography_and_cities(world, ctx, year, dt_years, events);
    if let Some(m) = metrics.as_mut() {
        m.demography_time += t.elapsed();
    }

    let t = Instant::now();
    systems::technology::tick_year(world, ctx, year, dt_years, events);
    if let Some(m) = metrics.as_mut() {
        m.technology_time += t.elapsed();
    }

    let t = Instant::now();
    systems::culture::tick_year(world, ctx, year, dt_years, events);
    if let Some(m) = metrics.as_mut() {
        m.culture_time += t.elapsed();
    }

    let t = Instant::now();
    systems::great_people::update_effects(world, year, dt_years, events);
    if let Some(m) = metrics.as_mut() {
        m.great_people_time += t.elapsed();
    }

    let t = Instant::now();
    systems::politics::process_political_events(world, ctx, year, dt_years, events);
    if let Some(m) = metrics.as_mut() {
        m.politics_time += t.elapsed();
    }

    world.year = year + dt_years;
    if let Some(m) = metrics {
        m.total_years += dt_years as u64;
        m.total_time += tick_start.elapsed();
    }
}

/// The GUI live-loop path. Intentionally the same sequence as the CLI path;
/// the parity check exists to prove the two never drift apart.
pub fn run_gui_headless_year_step(
    world: &mut World,
    ctx: &SimulationContext,
    events: &mut EventLog,
) {
    step_year(world, ctx, events, None);
}

/// The CLI batch path.
pub fn run_cli_year_step(world: &mut World, ctx: &SimulationContext, events: &mut EventLog) {
    step_year(world, ctx, events, None);
}

/// Outcome of a mega jump: where it stopped and whether it was canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JumpOutcome {
    pub last_completed_year: i32,
    pub canceled: bool,
}

/// Simulate up to (and including) `target_year`.
///
/// The cancel flag is polled at year boundaries: a stage either completes
/// atomically or is never started, so the world always reflects the last
/// completed year exactly. Progress callbacks fire between years.
pub fn mega_time_jump(
    world: &mut World,
    ctx: &SimulationContext,
    events: &mut EventLog,
    target_year: i32,
    cancel: Option<&AtomicBool>,
    mut progress: Option<&mut dyn FnMut(i32, i32)>,
    mut metrics: Option<&mut SimMetrics>,
) -> JumpOutcome {
    while world.year <= target_year {
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                return JumpOutcome {
                    last_completed_year: world.year - 1,
                    canceled: true,
                };
            }
        }
        step_year(world, ctx, events, metrics.as_deref_mut());
        if let Some(cb) = progress.as_mut() {
            cb(world.year - 1, target_year);
        }
    }
    JumpOutcome {
        last_completed_year: world.year - 1,
        canceled: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::WorldBuilder;

    #[test]
    fn test_step_advances_year() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        let mut events = EventLog::default();
        let y = world.year;
        step_year(&mut world, &ctx, &mut events, None);
        assert_eq!(world.year, y + 1);
    }

    #[test]
    fn test_mega_jump_reaches_target() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        let mut events = EventLog::default();
        let start = world.year;
        let outcome = mega_time_jump(&mut world, &ctx, &mut events, start + 9, None, None, None);
        assert!(!outcome.canceled);
        assert_eq!(outcome.last_completed_year, start + 9);
        assert_eq!(world.year, start + 10);
    }

    #[test]
    fn test_cancel_stops_at_year_boundary() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        let mut events = EventLog::default();
        let start = world.year;
        let cancel = AtomicBool::new(false);
        let mut fired = 0;
        let outcome = {
            let mut cb = |_year: i32, _target: i32| {
                fired += 1;
                if fired == 3 {
                    cancel.store(true, Ordering::Relaxed);
                }
            };
            mega_time_jump(
                &mut world,
                &ctx,
                &mut events,
                start + 99,
                Some(&cancel),
                Some(&mut cb),
                None,
            )
        };
        assert!(outcome.canceled);
        // Exactly three completed years, none partial.
        assert_eq!(world.year, start + 3);
        assert_eq!(outcome.last_completed_year, start + 2);
    }

    #[test]
    fn test_metrics_accumulate() {
        let (mut world, ctx) = WorldBuilder::new().size(48, 48).countries(2).build();
        let mut events = EventLog::default();
        let mut metrics = SimMetrics::default();
        for _ in 0..3 {
            step_year(&mut world, &ctx, &mut events, Some(&mut metrics));
        }
        assert_eq!(metrics.total_years, 3);
        assert!(metrics.total_time.as_nanos() > 0);
    }
}
