//! Observers: side effects live here, never in the tick itself.
//!
//! The kernel appends structured [`GameEvent`]s to an [`EventLog`] as it
//! steps; drivers read them for collapse counting, logging or display and
//! drain between years. Nothing in the event layer feeds back into state.

pub mod event_log;

pub use event_log::{EventLog, GameEvent};

use crate::state::World;

/// Observe completed years. Implementations must not mutate simulation
/// state; they see the world only between ticks.
pub trait SimObserver {
    fn on_year_end(&mut self, world: &World, events: &EventLog);
}

/// A do-nothing observer for drivers that only want checkpoints.
#[derive(Debug, Default)]
pub struct NullObserver;

impl SimObserver for NullObserver {
    fn on_year_end(&mut self, _world: &World, _events: &EventLog) {}
}
