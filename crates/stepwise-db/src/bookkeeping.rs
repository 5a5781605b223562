use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use stepwise_common::{Error, MigrationId, Result};
use tracing::info;
use uuid::Uuid;

/// One row of the bookkeeping table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedRecord {
    pub id: String,
    pub name: MigrationId,
    pub applied_at: DateTime<Utc>,
}

/// The table recording which migrations have had their up-procedure run
/// and not reverted. Rows are only ever inserted or deleted.
///
/// The table name is spliced into SQL; callers pass a validated identifier.
#[derive(Debug, Clone)]
pub struct BookkeepingTable {
    name: String,
}

impl BookkeepingTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create the table if it is absent. Returns `true` when it was created.
    pub fn ensure(&self, conn: &Connection) -> Result<bool> {
        let exists: bool = conn
            .query_row(
                "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                params![self.name],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check {} table: {e}", self.name)))?;

        if exists {
            return Ok(false);
        }

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id TEXT PRIMARY KEY NOT NULL,
                name TEXT NOT NULL UNIQUE,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
            self.name
        ))
        .map_err(|e| Error::Database(format!("failed to create {} table: {e}", self.name)))?;

        info!("migrations table initialized");
        Ok(true)
    }

    /// All recorded names, ascending.
    pub fn applied(&self, conn: &Connection) -> Result<Vec<MigrationId>> {
        let mut stmt = conn
            .prepare(&format!("SELECT name FROM {} ORDER BY name ASC", self.name))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to query applied migrations: {e}")))?;

        let mut names = Vec::new();
        for row in rows {
            let name =
                row.map_err(|e| Error::Database(format!("failed to read migration row: {e}")))?;
            names.push(MigrationId::from(name));
        }
        Ok(names)
    }

    pub fn records(&self, conn: &Connection) -> Result<Vec<AppliedRecord>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, name, applied_at FROM {} ORDER BY name ASC",
                self.name
            ))
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to query applied migrations: {e}")))?;

        let mut records = Vec::new();
        for row in rows {
            let (id, name, applied_at) =
                row.map_err(|e| Error::Database(format!("failed to read migration row: {e}")))?;
            records.push(AppliedRecord {
                applied_at: parse_datetime(&applied_at).map_err(|e| {
                    Error::Database(format!("bad applied_at {applied_at:?} for {name}: {e}"))
                })?,
                id,
                name: MigrationId::from(name),
            });
        }
        Ok(records)
    }

    /// The lexically greatest recorded name: the current schema version.
    pub fn most_recent(&self, conn: &Connection) -> Result<Option<MigrationId>> {
        conn.query_row(
            &format!("SELECT name FROM {} ORDER BY name DESC LIMIT 1", self.name),
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .map(|name| name.map(MigrationId::from))
        .map_err(|e| Error::Database(format!("failed to query current migration: {e}")))
    }

    pub fn insert(&self, conn: &Connection, id: &MigrationId) -> Result<()> {
        conn.execute(
            &format!("INSERT INTO {} (id, name) VALUES (?1, ?2)", self.name),
            params![Uuid::new_v4().to_string(), id.as_str()],
        )
        .map_err(|e| Error::Bookkeeping(format!("failed to record {id}: {e}")))?;
        Ok(())
    }

    pub fn remove(&self, conn: &Connection, id: &MigrationId) -> Result<()> {
        let removed = conn
            .execute(
                &format!("DELETE FROM {} WHERE name = ?1", self.name),
                params![id.as_str()],
            )
            .map_err(|e| Error::Bookkeeping(format!("failed to remove record of {id}: {e}")))?;

        if removed == 0 {
            return Err(Error::Bookkeeping(format!("no record of {id} to remove")));
        }
        Ok(())
    }
}

/// Accepts RFC 3339 or the `YYYY-MM-DD HH:MM:SS` form of SQLite's
/// `datetime('now')` default.
fn parse_datetime(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> (Connection, BookkeepingTable) {
        let conn = Connection::open_in_memory().unwrap();
        let table = BookkeepingTable::new("migrations");
        table.ensure(&conn).unwrap();
        (conn, table)
    }

    #[test]
    fn ensure_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        let table = BookkeepingTable::new("migrations");
        assert!(table.ensure(&conn).unwrap());
        assert!(!table.ensure(&conn).unwrap());
        assert!(!table.ensure(&conn).unwrap());
    }

    #[test]
    fn empty_table_has_no_current_version() {
        let (conn, table) = table();
        assert!(table.applied(&conn).unwrap().is_empty());
        assert!(table.most_recent(&conn).unwrap().is_none());
    }

    #[test]
    fn most_recent_is_lexically_greatest() {
        let (conn, table) = table();
        for id in ["20240201000000", "20240301000000", "20240101000000"] {
            table.insert(&conn, &id.into()).unwrap();
        }

        assert_eq!(
            table.most_recent(&conn).unwrap(),
            Some(MigrationId::from("20240301000000"))
        );
        let applied = table.applied(&conn).unwrap();
        assert_eq!(applied.first().unwrap().as_str(), "20240101000000");
        assert_eq!(applied.len(), 3);
    }

    #[test]
    fn names_are_unique() {
        let (conn, table) = table();
        table.insert(&conn, &"a".into()).unwrap();
        assert!(matches!(
            table.insert(&conn, &"a".into()),
            Err(Error::Bookkeeping(_))
        ));
    }

    #[test]
    fn remove_deletes_only_the_named_row() {
        let (conn, table) = table();
        table.insert(&conn, &"a".into()).unwrap();
        table.insert(&conn, &"b".into()).unwrap();

        table.remove(&conn, &"b".into()).unwrap();
        assert_eq!(table.applied(&conn).unwrap(), vec![MigrationId::from("a")]);
        assert!(matches!(
            table.remove(&conn, &"b".into()),
            Err(Error::Bookkeeping(_))
        ));
    }

    #[test]
    fn records_carry_generated_ids_and_timestamps() {
        let (conn, table) = table();
        table.insert(&conn, &"a".into()).unwrap();
        table.insert(&conn, &"b".into()).unwrap();

        let records = table.records(&conn).unwrap();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].id, records[1].id);
        assert!(Uuid::parse_str(&records[0].id).is_ok());
        assert!(records[0].applied_at <= Utc::now());
    }

    #[test]
    fn unparsable_timestamp_is_a_database_error() {
        let (conn, table) = table();
        conn.execute(
            "INSERT INTO migrations (id, name, applied_at) VALUES ('x', 'a', 'yesterday')",
            [],
        )
        .unwrap();

        let err = table.records(&conn).unwrap_err();
        assert!(matches!(err, Error::Database(ref msg) if msg.contains("yesterday")));
    }

    #[test]
    fn parses_sqlite_and_rfc3339_timestamps() {
        let sqlite = parse_datetime("2024-03-01 12:30:00").unwrap();
        let rfc = parse_datetime("2024-03-01T12:30:00Z").unwrap();
        assert_eq!(sqlite, rfc);
    }
}
