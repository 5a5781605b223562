use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stepwise_common::{Error, Result};

/// Settings for one `stepwise` invocation. Every field has a default, so an
/// empty file (or no file at all) is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database file.
    pub database: PathBuf,
    pub migrations_dir: PathBuf,
    /// Name of the bookkeeping table.
    pub table: String,
    /// File extension of migration scripts, without the dot.
    pub extension: String,
    /// Run each step inside a single immediate transaction.
    pub atomic: bool,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("stepwise.db"),
            migrations_dir: PathBuf::from("migrations"),
            table: "migrations".to_string(),
            extension: "sql".to_string(),
            atomic: true,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reject values that would be unsafe to splice into SQL or that make
    /// discovery meaningless.
    pub fn validate(&self) -> Result<()> {
        if !is_sql_identifier(&self.table) {
            return Err(Error::Config(format!(
                "table name `{}` must match [A-Za-z_][A-Za-z0-9_]*",
                self.table
            )));
        }
        if self.extension.is_empty() || self.extension.contains('.') {
            return Err(Error::Config(format!(
                "extension `{}` must be non-empty and given without a dot",
                self.extension
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
