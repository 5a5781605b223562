use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rusqlite::Connection;
use stepwise_common::{Direction, Error, MigrationId, Result};
use tracing::{debug, warn};

/// An up/down procedure pair for one migration.
///
/// Both halves receive the live connection (or the open transaction, which
/// derefs to one) and may perform arbitrary schema or data changes.
pub trait Procedure {
    fn up(&self, conn: &Connection) -> Result<()>;

    fn down(&self, conn: &Connection) -> Result<()>;

    fn run(&self, conn: &Connection, direction: Direction) -> Result<()> {
        match direction {
            Direction::Up => self.up(conn),
            Direction::Down => self.down(conn),
        }
    }
}

/// Where migrations come from. Implementations must return identifiers in
/// ascending lexical order and load procedures fresh on every call.
pub trait MigrationSource {
    fn list(&self) -> Result<Vec<MigrationId>>;

    fn load(&self, id: &MigrationId) -> Result<Box<dyn Procedure>>;
}

/// A SQL migration file split into its `-- up` and `-- down` sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    pub id: MigrationId,
    pub up_sql: String,
    pub down_sql: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

impl MigrationScript {
    /// Parse script text. Section markers are whole comment lines reading
    /// `-- up` / `-- down` (any case). Only comments and blank lines may
    /// precede `-- up`; the `-- down` section is optional.
    pub fn parse(id: MigrationId, content: &str) -> Result<Self> {
        let mut up = Vec::new();
        let mut down = Vec::new();
        let mut section = Section::Preamble;
        let mut seen_up = false;
        let mut seen_down = false;

        for (lineno, line) in content.lines().enumerate() {
            match section_marker(line) {
                Some(Section::Up) => {
                    if seen_up || seen_down {
                        return Err(Error::Script(format!(
                            "{id}: unexpected `-- up` marker on line {}",
                            lineno + 1
                        )));
                    }
                    seen_up = true;
                    section = Section::Up;
                    continue;
                }
                Some(Section::Down) => {
                    if !seen_up || seen_down {
                        return Err(Error::Script(format!(
                            "{id}: unexpected `-- down` marker on line {}",
                            lineno + 1
                        )));
                    }
                    seen_down = true;
                    section = Section::Down;
                    continue;
                }
                _ => {}
            }

            match section {
                Section::Preamble => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() && !trimmed.starts_with("--") {
                        return Err(Error::Script(format!(
                            "{id}: SQL on line {} appears before the `-- up` marker",
                            lineno + 1
                        )));
                    }
                }
                Section::Up => up.push(line),
                Section::Down => down.push(line),
            }
        }

        if !seen_up {
            return Err(Error::Script(format!("{id}: missing `-- up` marker")));
        }

        Ok(Self {
            id,
            up_sql: up.join("\n").trim().to_string(),
            down_sql: down.join("\n").trim().to_string(),
        })
    }

    fn execute(&self, conn: &Connection, direction: Direction) -> Result<()> {
        let sql = match direction {
            Direction::Up => &self.up_sql,
            Direction::Down => &self.down_sql,
        };
        if sql.is_empty() {
            debug!("{direction} section of {} is empty", self.id);
            return Ok(());
        }
        conn.execute_batch(sql)
            .map_err(|e| Error::procedure(&self.id, direction, e.to_string()))
    }
}

impl Procedure for MigrationScript {
    fn up(&self, conn: &Connection) -> Result<()> {
        self.execute(conn, Direction::Up)
    }

    fn down(&self, conn: &Connection) -> Result<()> {
        self.execute(conn, Direction::Down)
    }
}

fn section_marker(line: &str) -> Option<Section> {
    let rest = line.trim().strip_prefix("--")?.trim();
    if rest.eq_ignore_ascii_case("up") {
        Some(Section::Up)
    } else if rest.eq_ignore_ascii_case("down") {
        Some(Section::Down)
    } else {
        None
    }
}

/// Migration scripts stored as `<id>.<extension>` files in one directory.
pub struct ScriptDir {
    dir: PathBuf,
    extension: String,
}

impl ScriptDir {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn path_for(&self, id: &MigrationId) -> PathBuf {
        self.dir.join(format!("{id}.{}", self.extension))
    }
}

impl MigrationSource for ScriptDir {
    /// A directory that does not exist yet is an empty project.
    fn list(&self) -> Result<Vec<MigrationId>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("migrations directory {} does not exist", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(Error::Discovery(format!(
                    "failed to read {}: {e}",
                    self.dir.display()
                )));
            }
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                Error::Discovery(format!("failed to read entry in {}: {e}", self.dir.display()))
            })?;
            let path = entry.path();
            if !path.is_file() || path.extension().is_none_or(|ext| ext != self.extension.as_str()) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => ids.push(MigrationId::new(stem)),
                None => warn!("skipping migration with non UTF-8 name: {}", path.display()),
            }
        }

        ids.sort();
        debug!("found {} migration(s) in {}", ids.len(), self.dir.display());
        Ok(ids)
    }

    fn load(&self, id: &MigrationId) -> Result<Box<dyn Procedure>> {
        let path = self.path_for(id);
        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::Discovery(format!(
                "no migration script for {id} at {}",
                path.display()
            )),
            _ => Error::Discovery(format!("failed to read {}: {e}", path.display())),
        })?;
        Ok(Box::new(MigrationScript::parse(id.clone(), &content)?))
    }
}
