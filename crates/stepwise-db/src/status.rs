use std::collections::HashMap;

use chrono::{DateTime, Utc};
use stepwise_common::MigrationId;

use crate::bookkeeping::AppliedRecord;
use crate::catalog::{MigrationState, Reconciled};

/// Checkbox listing of every known migration, ascending:
/// `" [*] <id>"` when recorded in the database, `" [ ] <id>"` otherwise.
pub fn render(view: &Reconciled) -> Vec<String> {
    view.iter().map(|(id, state)| line(id, state)).collect()
}

/// Like [`render`], annotated with when each migration was applied and
/// which recorded migrations have lost their file.
pub fn render_verbose(view: &Reconciled, records: &[AppliedRecord]) -> Vec<String> {
    let applied_at: HashMap<&MigrationId, DateTime<Utc>> = records
        .iter()
        .map(|record| (&record.name, record.applied_at))
        .collect();

    view.iter()
        .map(|(id, state)| {
            let mut text = line(id, state);
            if let Some(at) = applied_at.get(id) {
                text.push_str(&format!("  (applied {})", at.format("%Y-%m-%d %H:%M:%S")));
            }
            if state.is_drifted() {
                text.push_str("  (missing file)");
            }
            text
        })
        .collect()
}

fn line(id: &MigrationId, state: &MigrationState) -> String {
    let marker = if state.in_database { '*' } else { ' ' };
    format!(" [{marker}] {id}")
}
