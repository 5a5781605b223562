use rusqlite::{Connection, TransactionBehavior};
use stepwise_common::{Direction, Error, MigrationId, Result};
use tracing::{error, info, warn};

use crate::catalog::{Catalog, next_pending};
use crate::script::Procedure;

/// What a single step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Applied(MigrationId),
    Reverted(MigrationId),
    NothingToDo,
}

/// Applies or reverts exactly one migration per call.
///
/// When `atomic` is set the whole step runs inside one `BEGIN IMMEDIATE`
/// transaction: the write lock is taken before the current version is read,
/// and a failed step is rolled back after compensation has run.
pub struct StepExecutor<'a> {
    catalog: &'a Catalog<'a>,
    atomic: bool,
}

impl<'a> StepExecutor<'a> {
    pub fn new(catalog: &'a Catalog<'a>) -> Self {
        Self {
            catalog,
            atomic: true,
        }
    }

    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    /// Apply the next pending migration, if any.
    pub fn apply_next(&self, conn: &mut Connection) -> Result<StepOutcome> {
        self.run(conn, Direction::Up)
    }

    /// Revert the most recently applied migration, if any.
    pub fn revert_current(&self, conn: &mut Connection) -> Result<StepOutcome> {
        self.run(conn, Direction::Down)
    }

    fn run(&self, conn: &mut Connection, direction: Direction) -> Result<StepOutcome> {
        if !self.atomic {
            return self.step(conn, direction);
        }

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| Error::Database(format!("failed to begin step transaction: {e}")))?;

        match self.step(&tx, direction) {
            Ok(outcome) => {
                tx.commit()
                    .map_err(|e| Error::Database(format!("failed to commit step: {e}")))?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback() {
                    warn!("rollback after failed step also failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    fn step(&self, conn: &Connection, direction: Direction) -> Result<StepOutcome> {
        let current = self.catalog.most_recent_applied(conn)?;
        let target = match direction {
            Direction::Up => {
                let disk = self.catalog.list_disk_migrations()?;
                next_pending(&disk, current.as_ref())
            }
            Direction::Down => current,
        };

        let Some(target) = target else {
            info!("no migration to {direction}");
            return Ok(StepOutcome::NothingToDo);
        };

        let procedure = self.catalog.source().load(&target)?;
        match direction {
            Direction::Up => info!("inserting migration {target}"),
            Direction::Down => info!("removing migration {target}"),
        }

        self.attempt(conn, &target, procedure.as_ref(), direction)?;

        Ok(match direction {
            Direction::Up => StepOutcome::Applied(target),
            Direction::Down => StepOutcome::Reverted(target),
        })
    }

    /// Run one procedure and record the result, compensating with the
    /// inverse procedure if either part fails.
    fn attempt(
        &self,
        conn: &Connection,
        id: &MigrationId,
        procedure: &dyn Procedure,
        direction: Direction,
    ) -> Result<()> {
        let result = procedure
            .run(conn, direction)
            .and_then(|()| self.record(conn, id, direction));

        let Err(original) = result else {
            return Ok(());
        };
        error!("{direction} step for {id} failed: {original}");

        // SQLite aborts the whole transaction on some errors (disk full,
        // I/O); compensating then would run outside it.
        if self.atomic && conn.is_autocommit() {
            warn!("step transaction for {id} was aborted, skipping compensation");
            return Err(original);
        }

        let inverse = direction.inverse();
        warn!("compensating {id} with its {inverse} procedure");
        match procedure.run(conn, inverse) {
            Ok(()) => Err(original),
            Err(compensation) => {
                error!("compensation for {id} failed: {compensation}");
                Err(Error::Compensation {
                    original: Box::new(original),
                    compensation: Box::new(compensation),
                })
            }
        }
    }

    fn record(&self, conn: &Connection, id: &MigrationId, direction: Direction) -> Result<()> {
        let table = self.catalog.table();
        match direction {
            Direction::Up => table.insert(conn, id),
            Direction::Down => table.remove(conn, id),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use super::*;
    use crate::bookkeeping::BookkeepingTable;
    use crate::script::MigrationSource;

    type CallLog = Rc<RefCell<Vec<(String, Direction)>>>;

    /// In-process procedure that logs each invocation and runs fixed SQL.
    struct Scripted {
        id: String,
        up: &'static str,
        down: &'static str,
        calls: CallLog,
    }

    impl Scripted {
        fn exec(&self, conn: &Connection, direction: Direction, sql: &str) -> Result<()> {
            self.calls.borrow_mut().push((self.id.clone(), direction));
            conn.execute_batch(sql)
                .map_err(|e| Error::procedure(&self.id.as_str().into(), direction, e.to_string()))
        }
    }

    impl Procedure for Scripted {
        fn up(&self, conn: &Connection) -> Result<()> {
            self.exec(conn, Direction::Up, self.up)
        }

        fn down(&self, conn: &Connection) -> Result<()> {
            self.exec(conn, Direction::Down, self.down)
        }
    }

    #[derive(Default)]
    struct FakeSource {
        scripts: BTreeMap<String, (&'static str, &'static str)>,
        calls: CallLog,
    }

    impl FakeSource {
        fn with(mut self, id: &str, up: &'static str, down: &'static str) -> Self {
            self.scripts.insert(id.to_string(), (up, down));
            self
        }

        fn calls(&self) -> Vec<(String, Direction)> {
            self.calls.borrow().clone()
        }
    }

    impl MigrationSource for FakeSource {
        fn list(&self) -> Result<Vec<MigrationId>> {
            Ok(self.scripts.keys().map(|id| MigrationId::from(id.as_str())).collect())
        }

        fn load(&self, id: &MigrationId) -> Result<Box<dyn Procedure>> {
            let (up, down) = self
                .scripts
                .get(id.as_str())
                .copied()
                .ok_or_else(|| Error::Discovery(format!("no migration script for {id}")))?;
            Ok(Box::new(Scripted {
                id: id.to_string(),
                up,
                down,
                calls: self.calls.clone(),
            }))
        }
    }

    fn setup() -> (Connection, BookkeepingTable) {
        let conn = Connection::open_in_memory().unwrap();
        let table = BookkeepingTable::new("migrations");
        table.ensure(&conn).unwrap();
        (conn, table)
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
            [name],
            |row| row.get(0),
        )
        .unwrap()
    }

    fn sample_source() -> FakeSource {
        FakeSource::default()
            .with("001", "CREATE TABLE one (x);", "DROP TABLE one;")
            .with("002", "CREATE TABLE two (x);", "DROP TABLE two;")
    }

    #[test]
    fn up_applies_in_order_then_stops() {
        for atomic in [true, false] {
            let (mut conn, table) = setup();
            let source = sample_source();
            let catalog = Catalog::new(&source, &table);
            let executor = StepExecutor::new(&catalog).atomic(atomic);

            assert_eq!(
                executor.apply_next(&mut conn).unwrap(),
                StepOutcome::Applied("001".into())
            );
            assert_eq!(
                executor.apply_next(&mut conn).unwrap(),
                StepOutcome::Applied("002".into())
            );
            assert_eq!(
                executor.apply_next(&mut conn).unwrap(),
                StepOutcome::NothingToDo
            );

            assert_eq!(
                table.applied(&conn).unwrap(),
                vec![MigrationId::from("001"), MigrationId::from("002")]
            );
            assert!(table_exists(&conn, "one") && table_exists(&conn, "two"));
            assert_eq!(source.calls().len(), 2);
        }
    }

    #[test]
    fn down_on_empty_table_invokes_nothing() {
        let (mut conn, table) = setup();
        let source = sample_source();
        let catalog = Catalog::new(&source, &table);
        let executor = StepExecutor::new(&catalog);

        assert_eq!(
            executor.revert_current(&mut conn).unwrap(),
            StepOutcome::NothingToDo
        );
        assert!(source.calls().is_empty());
    }

    #[test]
    fn down_reverts_most_recent_only() {
        let (mut conn, table) = setup();
        let source = sample_source();
        let catalog = Catalog::new(&source, &table);
        let executor = StepExecutor::new(&catalog);

        executor.apply_next(&mut conn).unwrap();
        executor.apply_next(&mut conn).unwrap();
        assert_eq!(
            executor.revert_current(&mut conn).unwrap(),
            StepOutcome::Reverted("002".into())
        );

        assert_eq!(table.applied(&conn).unwrap(), vec![MigrationId::from("001")]);
        assert!(table_exists(&conn, "one"));
        assert!(!table_exists(&conn, "two"));
    }

    #[test]
    fn failed_up_compensates_once_and_keeps_original_error() {
        for atomic in [true, false] {
            let (mut conn, table) = setup();
            let source = FakeSource::default().with(
                "001",
                "CREATE TABLE partial (x); INSERT INTO missing VALUES (1);",
                "DROP TABLE partial;",
            );
            let catalog = Catalog::new(&source, &table);
            let executor = StepExecutor::new(&catalog).atomic(atomic);

            let err = executor.apply_next(&mut conn).unwrap_err();
            assert!(matches!(
                err,
                Error::Procedure {
                    direction: Direction::Up,
                    ..
                }
            ));

            assert_eq!(
                source.calls(),
                vec![
                    ("001".to_string(), Direction::Up),
                    ("001".to_string(), Direction::Down)
                ]
            );
            assert!(table.applied(&conn).unwrap().is_empty());
            assert!(!table_exists(&conn, "partial"));
        }
    }

    #[test]
    fn failed_compensation_surfaces_both_errors() {
        let (mut conn, table) = setup();
        let source = FakeSource::default().with(
            "001",
            "CREATE TABLE partial (x); INSERT INTO missing VALUES (1);",
            "DROP TABLE never_created;",
        );
        let catalog = Catalog::new(&source, &table);
        let executor = StepExecutor::new(&catalog);

        match executor.apply_next(&mut conn).unwrap_err() {
            Error::Compensation {
                original,
                compensation,
            } => {
                assert!(original.to_string().contains("missing"));
                assert!(compensation.to_string().contains("never_created"));
            }
            other => panic!("expected compensation error, got {other:?}"),
        }

        // the step transaction was rolled back, taking the partial table with it
        assert!(!table_exists(&conn, "partial"));
        assert!(table.applied(&conn).unwrap().is_empty());
    }

    #[test]
    fn non_atomic_compensation_failure_leaves_partial_state() {
        let (mut conn, table) = setup();
        let source = FakeSource::default().with(
            "001",
            "CREATE TABLE partial (x); INSERT INTO missing VALUES (1);",
            "DROP TABLE never_created;",
        );
        let catalog = Catalog::new(&source, &table);
        let executor = StepExecutor::new(&catalog).atomic(false);

        let err = executor.apply_next(&mut conn).unwrap_err();
        assert!(matches!(err, Error::Compensation { .. }));
        assert!(table_exists(&conn, "partial"));
        assert!(table.applied(&conn).unwrap().is_empty());
    }

    #[test]
    fn failed_down_compensates_with_up() {
        let (mut conn, table) = setup();
        let source = FakeSource::default().with(
            "001",
            "CREATE TABLE IF NOT EXISTS one (x);",
            "DROP TABLE one; DROP TABLE missing;",
        );
        let catalog = Catalog::new(&source, &table);
        let executor = StepExecutor::new(&catalog).atomic(false);

        executor.apply_next(&mut conn).unwrap();
        let err = executor.revert_current(&mut conn).unwrap_err();
        assert!(matches!(
            err,
            Error::Procedure {
                direction: Direction::Down,
                ..
            }
        ));

        assert_eq!(table.applied(&conn).unwrap(), vec![MigrationId::from("001")]);
        assert!(table_exists(&conn, "one"));
        assert_eq!(
            source.calls().last(),
            Some(&("001".to_string(), Direction::Up))
        );
    }

    #[test]
    fn bookkeeping_failure_triggers_compensation() {
        let (mut conn, table) = setup();
        // The procedure records itself, so the executor's insert collides.
        let source = FakeSource::default().with(
            "001",
            "CREATE TABLE one (x); INSERT INTO migrations (id, name) VALUES ('x', '001');",
            "DROP TABLE one; DELETE FROM migrations WHERE id = 'x';",
        );
        let catalog = Catalog::new(&source, &table);
        let executor = StepExecutor::new(&catalog).atomic(false);

        let err = executor.apply_next(&mut conn).unwrap_err();
        assert!(matches!(err, Error::Bookkeeping(_)));
        assert_eq!(source.calls().len(), 2);
        assert!(!table_exists(&conn, "one"));
        assert!(table.applied(&conn).unwrap().is_empty());
    }

    #[test]
    fn current_version_missing_from_disk_is_a_no_op() {
        let (mut conn, table) = setup();
        table.insert(&conn, &"000".into()).unwrap();
        let source = sample_source();
        let catalog = Catalog::new(&source, &table);
        let executor = StepExecutor::new(&catalog);

        assert_eq!(
            executor.apply_next(&mut conn).unwrap(),
            StepOutcome::NothingToDo
        );
        assert!(source.calls().is_empty());
    }

    #[test]
    fn reverting_a_migration_without_a_script_fails_before_mutation() {
        let (mut conn, table) = setup();
        table.insert(&conn, &"999".into()).unwrap();
        let source = sample_source();
        let catalog = Catalog::new(&source, &table);
        let executor = StepExecutor::new(&catalog);

        let err = executor.revert_current(&mut conn).unwrap_err();
        assert!(matches!(err, Error::Discovery(_)));
        assert_eq!(table.applied(&conn).unwrap(), vec![MigrationId::from("999")]);
    }
}
