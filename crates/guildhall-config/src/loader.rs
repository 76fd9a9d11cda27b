// SPDX-License-Identifier: MIT

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::home::guild_hall_home;
use crate::schema::Config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("writing {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

fn default_config_path() -> PathBuf {
    guild_hall_home().join("config.yaml")
}

/// Load the user config from the default location (`<home>/config.yaml`).
/// A missing file is not an error — it yields [`Config::default`].
pub fn load() -> Result<Config, ConfigError> {
    load_from(&default_config_path())
}

/// Load the user config from an explicit path.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.is_file() {
        debug!(path = %path.display(), "no config file found, using defaults");
        return Ok(Config::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Persist the config atomically (temp file + rename), creating the parent
/// directory if needed.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    save_to(&default_config_path(), config)
}

pub fn save_to(path: &Path, config: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let yaml = serde_yaml::to_string(config).expect("Config serializes infallibly");
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml).map_err(|source| ConfigError::Write {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
