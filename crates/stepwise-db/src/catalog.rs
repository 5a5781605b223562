use std::collections::BTreeMap;

use rusqlite::Connection;
use stepwise_common::{MigrationId, Result};

use crate::bookkeeping::{AppliedRecord, BookkeepingTable};
use crate::script::MigrationSource;

/// Where a migration identifier was seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationState {
    pub on_disk: bool,
    pub in_database: bool,
}

impl MigrationState {
    /// Recorded as applied but no longer present on disk.
    pub fn is_drifted(&self) -> bool {
        self.in_database && !self.on_disk
    }
}

/// Union of the disk and database listings, ordered by identifier.
pub type Reconciled = BTreeMap<MigrationId, MigrationState>;

/// Read-only view over the two sets of migration identifiers.
pub struct Catalog<'a> {
    source: &'a dyn MigrationSource,
    table: &'a BookkeepingTable,
}

impl<'a> Catalog<'a> {
    pub fn new(source: &'a dyn MigrationSource, table: &'a BookkeepingTable) -> Self {
        Self { source, table }
    }

    pub fn source(&self) -> &'a dyn MigrationSource {
        self.source
    }

    pub fn table(&self) -> &'a BookkeepingTable {
        self.table
    }

    pub fn list_disk_migrations(&self) -> Result<Vec<MigrationId>> {
        self.source.list()
    }

    pub fn list_applied_migrations(&self, conn: &Connection) -> Result<Vec<MigrationId>> {
        self.table.applied(conn)
    }

    pub fn most_recent_applied(&self, conn: &Connection) -> Result<Option<MigrationId>> {
        self.table.most_recent(conn)
    }

    pub fn applied_records(&self, conn: &Connection) -> Result<Vec<AppliedRecord>> {
        self.table.records(conn)
    }

    pub fn reconcile(&self, conn: &Connection) -> Result<Reconciled> {
        let disk = self.list_disk_migrations()?;
        let applied = self.list_applied_migrations(conn)?;
        Ok(reconcile(disk, applied))
    }
}

pub fn reconcile(
    disk: impl IntoIterator<Item = MigrationId>,
    applied: impl IntoIterator<Item = MigrationId>,
) -> Reconciled {
    let mut view = Reconciled::new();
    for id in disk {
        view.entry(id).or_default().on_disk = true;
    }
    for id in applied {
        view.entry(id).or_default().in_database = true;
    }
    view
}

/// The migration `up` should apply next: the first on disk when nothing is
/// applied, otherwise the strict successor of `current` in `disk`.
///
/// Returns `None` when `current` is the last identifier on disk or is not on
/// disk at all.
pub fn next_pending(disk: &[MigrationId], current: Option<&MigrationId>) -> Option<MigrationId> {
    match current {
        None => disk.first().cloned(),
        Some(current) => disk
            .iter()
            .position(|id| id == current)
            .and_then(|index| disk.get(index + 1))
            .cloned(),
    }
}
