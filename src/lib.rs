#[cfg(test)]
#[macro_use]
extern crate backend_test;

use rocket::{Build, Rocket};

pub mod api;
pub mod broadcast;
pub mod codec;
pub mod config;
pub mod error;
pub mod export;
pub mod lifecycle;
pub mod logging;
pub mod model;
pub mod periodic_task;
pub mod persistence;
pub mod recovery;

use config::ConfigFairing;
use lifecycle::StationFairing;
use logging::LoggerFairing;
use recovery::{Readiness, RecoveryFairing};

pub use config::Config;

/// The station server, configured from `Rocket.toml` and the environment.
pub fn build() -> Rocket<Build> {
    assemble(rocket::build())
}

/// Attach fairings, state and routes. Fairings ignite in the order attached.
fn assemble(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .attach(LoggerFairing)
        .attach(ConfigFairing)
        .attach(StationFairing)
        .attach(RecoveryFairing)
        .manage(Readiness::new())
        .mount("/", api::routes())
}

/// A station over the given data directory, broadcasting on loopback, that
/// answers the recovery prompt with `choice`.
#[cfg(test)]
pub(crate) fn rocket_for_recovery(
    data_dir: &std::path::Path,
    choice: recovery::RecoveryChoice,
) -> Rocket<Build> {
    let figment = rocket::Config::figment()
        .merge(("data_dir", data_dir))
        .merge(("broadcast_address", "127.0.0.1"))
        .merge(("recovery_choice", choice));
    assemble(rocket::custom(figment))
}

#[cfg(test)]
pub(crate) fn rocket_for_data_dir(data_dir: &std::path::Path) -> Rocket<Build> {
    rocket_for_recovery(data_dir, recovery::RecoveryChoice::Discard)
}
