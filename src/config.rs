use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use log::{error, info};
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};
use serde::Deserialize;

use crate::broadcast::DEFAULT_PORT;
use crate::persistence::{ROSTER_FILE, SETTINGS_FILE, SNAPSHOT_FILE};
use crate::recovery::RecoveryChoice;

/// Station configuration, derived from `Rocket.toml` and `ROCKET_*`
/// environment variables. This struct becomes managed state and can be
/// inspected by any endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_data_dir")]
    data_dir: PathBuf,
    #[serde(default)]
    export_dir: Option<PathBuf>,
    #[serde(default = "default_broadcast_address")]
    broadcast_address: Ipv4Addr,
    #[serde(default = "default_broadcast_port")]
    default_broadcast_port: u16,
    #[serde(default)]
    recovery_choice: Option<RecoveryChoice>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_broadcast_address() -> Ipv4Addr {
    Ipv4Addr::BROADCAST
}

fn default_broadcast_port() -> u16 {
    DEFAULT_PORT
}

impl Config {
    /// Directory holding everything the station persists.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Recovery snapshot of the session in progress.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    /// The saved candidate roster.
    pub fn roster_path(&self) -> PathBuf {
        self.data_dir.join(ROSTER_FILE)
    }

    /// Operator settings such as the broadcast port.
    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    /// Where exported results are written.
    /// Defaults to `exports` under the data directory.
    pub fn export_dir(&self) -> PathBuf {
        self.export_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("exports"))
    }

    /// Destination address of tally broadcasts.
    pub fn broadcast_address(&self) -> Ipv4Addr {
        self.broadcast_address
    }

    /// Port used when the operator's port is unset or out of range.
    pub fn default_broadcast_port(&self) -> u16 {
        self.default_broadcast_port
    }

    /// Answer to the recovery prompt given in advance, if any.
    /// Without one, the operator is asked on the terminal.
    pub fn recovery_choice(&self) -> Option<RecoveryChoice> {
        self.recovery_choice
    }
}

#[cfg(test)]
impl Config {
    /// Config for a throwaway station that broadcasts on loopback.
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            export_dir: None,
            broadcast_address: Ipv4Addr::LOCALHOST,
            default_broadcast_port: DEFAULT_PORT,
            recovery_choice: Some(RecoveryChoice::Discard),
        }
    }
}

/// A fairing that loads the station config and puts it in managed state.
pub struct ConfigFairing;

#[rocket::async_trait]
impl Fairing for ConfigFairing {
    fn info(&self) -> Info {
        Info {
            name: "Config",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let config = match rocket.figment().extract::<Config>() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load station config");
                rocket::config::pretty_print_error(e);
                return Err(rocket);
            }
        };
        info!(
            "Station data in {}, broadcasting to {}",
            config.data_dir().display(),
            config.broadcast_address()
        );

        Ok(rocket.manage(config))
    }
}
