//! Everything the station keeps on disk between runs.

mod roster;
mod settings;
mod snapshot;

pub use roster::{export_roster, import_roster, RosterFileError, RosterStore};
pub use settings::{Settings, SettingsStore};
pub use snapshot::{SessionPersistence, SnapshotError};

/// File name of the recovery snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "last_votes.json";

/// File name of the saved roster inside the data directory.
pub const ROSTER_FILE: &str = "candidates_data.json";

/// File name of the operator settings inside the data directory.
pub const SETTINGS_FILE: &str = "saved_data.json";
