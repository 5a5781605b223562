use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rusqlite::Connection;
use stepwise_common::Direction;
use stepwise_config::AppConfig;
use stepwise_db::{BookkeepingTable, Catalog, ScriptDir, StepExecutor, StepOutcome, connection, scaffold, status};
use tracing::info;

/// Everything one invocation works with: the open connection plus where
/// scripts and records live. Dropping it closes the connection.
pub struct Session {
    conn: Connection,
    scripts: ScriptDir,
    table: BookkeepingTable,
    atomic: bool,
}

impl Session {
    /// Open the database and make sure the bookkeeping table exists.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let conn = connection::open(&config.database)
            .with_context(|| format!("failed to open {}", config.database.display()))?;
        let table = BookkeepingTable::new(config.table.as_str());
        table
            .ensure(&conn)
            .context("failed to bootstrap the migrations table")?;

        Ok(Self {
            conn,
            scripts: ScriptDir::new(&config.migrations_dir, config.extension.as_str()),
            table,
            atomic: config.atomic,
        })
    }

    pub fn step(&mut self, direction: Direction) -> Result<StepOutcome> {
        let catalog = Catalog::new(&self.scripts, &self.table);
        let executor = StepExecutor::new(&catalog).atomic(self.atomic);
        let outcome = match direction {
            Direction::Up => executor.apply_next(&mut self.conn),
            Direction::Down => executor.revert_current(&mut self.conn),
        }
        .with_context(|| format!("migration {direction} failed"))?;

        if outcome == StepOutcome::NothingToDo {
            info!("database is already at the requested version");
        }
        Ok(outcome)
    }

    pub fn create(&self) -> Result<PathBuf> {
        scaffold(&self.scripts).context("failed to create migration file")
    }

    pub fn write_status(&self, out: &mut impl Write, verbose: bool) -> Result<()> {
        let catalog = Catalog::new(&self.scripts, &self.table);
        let view = catalog
            .reconcile(&self.conn)
            .context("failed to read migration status")?;

        let lines = if verbose {
            status::render_verbose(&view, &catalog.applied_records(&self.conn)?)
        } else {
            status::render(&view)
        };
        for line in lines {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}
