//! Migration catalog and single-step executor.
//!
//! Migrations are `{up, down}` procedure pairs identified by lexically
//! ordered names. The [`Catalog`] reconciles the identifiers found on disk
//! with those recorded in the bookkeeping table, and the [`StepExecutor`]
//! applies or reverts exactly one of them per call.

pub mod bookkeeping;
pub mod catalog;
pub mod connection;
pub mod executor;
pub mod scaffold;
pub mod script;
pub mod status;

pub use bookkeeping::{AppliedRecord, BookkeepingTable};
pub use catalog::{Catalog, MigrationState, Reconciled, next_pending, reconcile};
pub use executor::{StepExecutor, StepOutcome};
pub use scaffold::scaffold;
pub use script::{MigrationScript, MigrationSource, Procedure, ScriptDir};
