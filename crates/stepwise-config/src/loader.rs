use std::path::{Path, PathBuf};

use stepwise_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// File names probed, in order, when no explicit config path is given.
const DEFAULT_FILES: &[&str] = &["stepwise.yml", "stepwise.yaml", "stepwise.toml"];

/// Locates and parses the config file for an invocation.
pub struct ConfigLoader {
    base_dir: PathBuf,
    explicit: Option<PathBuf>,
}

impl ConfigLoader {
    /// Probe the current working directory.
    pub fn new() -> Self {
        Self::in_dir(".")
    }

    pub fn in_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            explicit: None,
        }
    }

    /// Use `path` instead of probing. A missing explicit file is an error.
    pub fn with_path(mut self, path: Option<PathBuf>) -> Self {
        self.explicit = path;
        self
    }

    /// Load the config, falling back to defaults when no file is found.
    pub fn load(&self) -> Result<AppConfig> {
        let config = match self.resolve()? {
            Some(path) => {
                info!("loading config from {}", path.display());
                load_file(&path)?
            }
            None => {
                debug!("no config file found, using defaults");
                AppConfig::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    fn resolve(&self) -> Result<Option<PathBuf>> {
        if let Some(path) = &self.explicit {
            if !path.is_file() {
                return Err(Error::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Some(path.clone()));
        }

        Ok(DEFAULT_FILES
            .iter()
            .map(|name| self.base_dir.join(name))
            .find(|candidate| candidate.is_file()))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn load_file(path: &Path) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "yml" | "yaml" => {
            // serde_yaml rejects an empty document; treat it as all defaults.
            if contents.trim().is_empty() {
                return Ok(AppConfig::default());
            }
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display())))
        }
        "toml" => toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display()))),
        other => Err(Error::Config(format!(
            "unsupported config extension: {other}"
        ))),
    }
}
