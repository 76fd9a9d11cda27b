// SPDX-License-Identifier: MIT

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

fn default_session_ttl_hours() -> u64 {
    24
}

/// User-level configuration, loaded from YAML at `<home>/config.yaml`.
///
/// See spec §6: `{projects:[{name, path, description?, repoUrl?, meetingCap?}], settings?}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub projects: Vec<Project>,
    #[serde(default)]
    pub settings: Settings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "repoUrl")]
    pub repo_url: Option<String>,
    #[serde(default, rename = "meetingCap")]
    pub meeting_cap: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// How long an idle/completed session survives before the read path
    /// reports it as `expired` (see SPEC_FULL.md §D.I, Open Question 2).
    #[serde(default = "default_session_ttl_hours", rename = "sessionTtlHours")]
    pub session_ttl_hours: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProjectValidationError {
    #[error("project path {0:?} does not exist")]
    Missing(PathBuf),
    #[error("project path {0:?} is missing a .git/ directory")]
    NotAGitRepo(PathBuf),
    #[error("project path {0:?} is missing a .lore/ directory")]
    NoLoreDirectory(PathBuf),
}

/// A project path is valid iff it is a directory containing both `.git/`
/// and `.lore/` (spec §6).
pub fn validate_project_path(path: &Path) -> Result<(), ProjectValidationError> {
    if !path.is_dir() {
        return Err(ProjectValidationError::Missing(path.to_path_buf()));
    }
    if !path.join(".git").is_dir() {
        return Err(ProjectValidationError::NotAGitRepo(path.to_path_buf()));
    }
    if !path.join(".lore").is_dir() {
        return Err(ProjectValidationError::NoLoreDirectory(path.to_path_buf()));
    }
    Ok(())
}
