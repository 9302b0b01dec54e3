//! The eight tick-stage systems, in execution order.

pub mod agents;
pub mod culture;
pub mod demography;
pub mod economy;
pub mod great_people;
pub mod politics;
pub mod technology;

pub use agents::update_countries;
pub use culture::{standard_institutions, Institution};
pub use demography::tick_demography_and_cities;
pub use great_people::update_effects as update_great_people;
pub use politics::process_political_events;
pub use technology::{TechCatalog, Technology};
