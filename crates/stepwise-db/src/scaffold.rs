use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeDelta, Utc};
use stepwise_common::{Error, MigrationId, Result};
use tracing::info;

use crate::script::{MigrationSource, ScriptDir};

/// Identifier format; lexical order equals creation order.
pub const ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// Write an empty migration script named after the current UTC time and
/// return its path. The directory is created if needed.
pub fn scaffold(scripts: &ScriptDir) -> Result<PathBuf> {
    scaffold_at(scripts, Utc::now())
}

pub fn scaffold_at(scripts: &ScriptDir, now: DateTime<Utc>) -> Result<PathBuf> {
    std::fs::create_dir_all(scripts.dir()).map_err(|e| {
        Error::Discovery(format!(
            "failed to create migrations directory {}: {e}",
            scripts.dir().display()
        ))
    })?;

    let existing = scripts.list()?;
    let id = next_identifier(now, &existing);
    let path = scripts.path_for(&id);

    // create_new: never clobber a script, even one written concurrently
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))))?;
    file.write_all(template(&id).as_bytes())?;

    info!("created migration {}", path.display());
    Ok(path)
}

/// `now` formatted as an identifier, bumped one second past the newest
/// timestamp-shaped identifier in `existing` if it would not sort after it.
pub fn next_identifier(now: DateTime<Utc>, existing: &[MigrationId]) -> MigrationId {
    let mut stamp = now.naive_utc().trunc_subsecs(0);

    let latest = existing
        .iter()
        .filter_map(|id| NaiveDateTime::parse_from_str(id.as_str(), ID_FORMAT).ok())
        .max();
    if let Some(latest) = latest {
        if stamp <= latest {
            stamp = latest + TimeDelta::seconds(1);
        }
    }

    MigrationId::new(stamp.format(ID_FORMAT).to_string())
}

fn template(id: &MigrationId) -> String {
    format!(
        "-- Migration {id}\n\
         -- Statements under `-- up` apply the change; those under `-- down` undo it.\n\
         \n\
         -- up\n\
         \n\
         \n\
         -- down\n\
         \n"
    )
}
