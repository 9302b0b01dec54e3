//! Great people: rare transient scalar bonuses.
//!
//! Events fire at random 100-500 year intervals from the manager's own
//! stream. Bonuses are recomputed every year from the active list and never
//! accumulate; an effect simply stops contributing past its expiry year.

use tracing::instrument;

use crate::observer::{EventLog, GameEvent};
use crate::state::{GreatPersonEffect, GreatPersonField, World};

const NAME_FIRST: [&str; 8] = [
    "Ashur", "Beral", "Cyrel", "Darun", "Elam", "Ferun", "Galad", "Hamun",
];
const NAME_SECOND: [&str; 8] = [
    "the Wise", "the Bold", "the Elder", "of the River", "the Builder", "the Younger",
    "the Great", "the Quiet",
];

#[instrument(skip_all, name = "great_people")]
pub fn update_effects(world: &mut World, year: i32, dt_years: i32, events: &mut EventLog) {
    // Expire finished effects.
    world.great_people.active.retain(|e| e.expiry_year > year);

    // Fire a new event when due.
    while year >= world.great_people.next_event_year {
        let gp = &mut world.great_people;
        let interval = 100 + gp.rng.next_below(401) as i32;
        gp.next_event_year += interval;

        let alive: Vec<u32> = world
            .countries
            .iter()
            .filter(|c| c.alive())
            .map(|c| c.id)
            .collect();
        if alive.is_empty() {
            continue;
        }
        let gp = &mut world.great_people;
        let country = alive[gp.rng.next_below(alive.len())];
        let field = if gp.rng.next_below(2) == 0 {
            GreatPersonField::Military
        } else {
            GreatPersonField::Science
        };
        let multiplier = 1.25 + gp.rng.next_f64() * 0.75;
        let duration = 30 + gp.rng.next_below(11) as i32;
        let name = format!(
            "{} {}",
            NAME_FIRST[gp.rng.next_below(NAME_FIRST.len())],
            NAME_SECOND[gp.rng.next_below(NAME_SECOND.len())]
        );
        gp.active.push(GreatPersonEffect {
            country,
            field,
            name: name.clone(),
            multiplier,
            start_year: year,
            expiry_year: year + duration,
        });
        events.push(year, GameEvent::GreatPerson {
            country,
            name,
            field,
        });
    }

    // Recompute transient bonuses from scratch.
    for c in world.countries.iter_mut() {
        if !c.alive() {
            continue;
        }
        let mut military = 1.0;
        for e in &world.great_people.active {
            if e.country == c.id && e.expiry_year > year {
                match e.field {
                    GreatPersonField::Military => military = f64::max(military, e.multiplier),
                    GreatPersonField::Science => {}
                }
            }
        }
        c.reset_military_strength();
        c.apply_military_bonus(c.effects.military_mult * military);
    }
    let _ = dt_years;
}

/// Research multiplier from an active Science great person.
pub fn science_bonus(world: &World, country: u32, year: i32) -> f64 {
    world
        .great_people
        .active
        .iter()
        .filter(|e| {
            e.country == country && e.field == GreatPersonField::Science && e.expiry_year > year
        })
        .map(|e| e.multiplier)
        .fold(1.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::WorldBuilder;

    #[test]
    fn test_effects_expire() {
        let (mut world, _ctx) = WorldBuilder::new().size(48, 48).countries(1).build();
        let mut events = EventLog::default();
        world.great_people.active.push(GreatPersonEffect {
            country: 0,
            field: GreatPersonField::Military,
            name: "Test".into(),
            multiplier: 2.0,
            start_year: -5000,
            expiry_year: -4970,
        });
        world.great_people.next_event_year = 0;
        update_effects(&mut world, -4980, 1, &mut events);
        let boosted = world.countries[0].military_strength;
        update_effects(&mut world, -4960, 1, &mut events);
        let after = world.countries[0].military_strength;
        assert!(boosted > after);
        assert!(world.great_people.active.is_empty());
    }

    #[test]
    fn test_bonuses_never_accumulate() {
        let (mut world, _ctx) = WorldBuilder::new().size(48, 48).countries(1).build();
        let mut events = EventLog::default();
        world.great_people.next_event_year = 0;
        update_effects(&mut world, -5000, 1, &mut events);
        let a = world.countries[0].military_strength;
        update_effects(&mut world, -4999, 1, &mut events);
        let b = world.countries[0].military_strength;
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn test_events_fire_on_schedule() {
        let (mut world, _ctx) = WorldBuilder::new().size(48, 48).countries(1).build();
        let mut events = EventLog::default();
        world.great_people.next_event_year = -5000;
        update_effects(&mut world, -5000, 1, &mut events);
        assert_eq!(world.great_people.active.len(), 1);
        assert!(world.great_people.next_event_year >= -4900);
    }
}
