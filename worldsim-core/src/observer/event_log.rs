//! Structured event log.

use serde::{Deserialize, Serialize};

use crate::state::{Cell, CountryId, GreatPersonField, Ideology};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GameEvent {
    WarDeclared {
        attacker: CountryId,
        defender: CountryId,
        attacker_name: String,
        defender_name: String,
    },
    WarEnded {
        a: CountryId,
        b: CountryId,
    },
    CityFounded {
        country: CountryId,
        name: String,
        location: Cell,
    },
    CivilWar {
        parent: CountryId,
        child: CountryId,
        parent_name: String,
        child_name: String,
    },
    Breakaway {
        parent: CountryId,
        child: CountryId,
        parent_name: String,
        child_name: String,
    },
    TagReplaced {
        country: CountryId,
        old_name: String,
        new_name: String,
        ideology: Ideology,
    },
    Extinction {
        country: CountryId,
        name: String,
    },
    PlagueStarted,
    PlagueEnded {
        death_toll: i64,
    },
    TechDiscovered {
        country: CountryId,
        tech: String,
    },
    GreatPerson {
        country: CountryId,
        name: String,
        field: GreatPersonField,
    },
}

impl GameEvent {
    /// Events that count toward the collapse metric.
    pub fn is_collapse(&self) -> bool {
        matches!(
            self,
            GameEvent::CivilWar { .. } | GameEvent::Breakaway { .. } | GameEvent::Extinction { .. }
        )
    }
}

impl std::fmt::Display for GameEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GameEvent::WarDeclared {
                attacker_name,
                defender_name,
                ..
            } => write!(f, "{attacker_name} declares war on {defender_name}"),
            GameEvent::WarEnded { a, b } => write!(f, "war between {a} and {b} ends"),
            GameEvent::CityFounded { name, location, .. } => {
                write!(f, "{name} founds a city at ({}, {})", location.0, location.1)
            }
            GameEvent::CivilWar {
                parent_name,
                child_name,
                ..
            } => write!(f, "Civil war fractures {parent_name}; {child_name} secedes"),
            GameEvent::Breakaway {
                parent_name,
                child_name,
                ..
            } => write!(f, "Breakaway: {child_name} splits from overseas {parent_name}"),
            GameEvent::TagReplaced {
                old_name,
                new_name,
                ideology,
                ..
            } => write!(f, "{old_name} is reborn as the {} of {new_name}", ideology.label()),
            GameEvent::Extinction { name, .. } => {
                write!(f, "{name} collapses and becomes extinct")
            }
            GameEvent::PlagueStarted => write!(f, "A great plague begins to spread"),
            GameEvent::PlagueEnded { death_toll } => {
                write!(f, "The plague burns out after claiming {death_toll} lives")
            }
            GameEvent::TechDiscovered { tech, .. } => write!(f, "discovers {tech}"),
            GameEvent::GreatPerson { name, field, .. } => {
                write!(f, "{name} rises to prominence ({field:?})")
            }
        }
    }
}

/// Year-stamped events accumulated during ticks; drained by the driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventLog {
    events: Vec<(i32, GameEvent)>,
}

impl EventLog {
    pub fn push(&mut self, year: i32, event: GameEvent) {
        log::debug!("[{}] {}", year, event);
        self.events.push((year, event));
    }

    pub fn events(&self) -> &[(i32, GameEvent)] {
        &self.events
    }

    pub fn drain(&mut self) -> Vec<(i32, GameEvent)> {
        std::mem::take(&mut self.events)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_classification() {
        assert!(GameEvent::Extinction {
            country: 1,
            name: "X".into()
        }
        .is_collapse());
        assert!(!GameEvent::PlagueStarted.is_collapse());
    }

    #[test]
    fn test_drain_empties_log() {
        let mut log = EventLog::default();
        log.push(-5000, GameEvent::PlagueStarted);
        assert_eq!(log.len(), 1);
        let drained = log.drain();
        assert_eq!(drained.len(), 1);
        assert!(log.is_empty());
    }
}
