// SPDX-License-Identifier: MIT

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport a guild member's MCP server speaks. Only `http` is driven by the
/// Lifecycle Manager today (spec §4.E); `stdio` is parsed but rejected at
/// spawn time with a clear error, since the core's transport (§4.C/§4.D) is
/// HTTP-over-loopback only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Stdio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl LaunchSpec {
    /// Substitute the literal `${PORT}` marker in each arg with the bound
    /// port (spec §4.E.1 / §6).
    pub fn substitute_port(&self, port: u16) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("${PORT}", &port.to_string()))
            .collect()
    }
}

/// A guild member's on-disk manifest (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub version: String,
    pub transport: Transport,
    pub mcp: LaunchSpec,
    #[serde(default, rename = "portraitPath")]
    pub portrait_path: Option<String>,
}

pub const MANIFEST_FILE_NAME: &str = "plugin.json";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("reading {0:?}: {1}")]
    Read(std::path::PathBuf, std::io::Error),
    #[error("parsing manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

impl PluginManifest {
    /// Parse a manifest from a plugin directory. Returns `Ok(None)` when no
    /// manifest file is present (not a plugin directory at all); `Err` when a
    /// manifest file exists but fails to parse (spec §4.B: "invalid manifests
    /// become members with status=error carrying the validation message").
    pub fn load_from_dir(dir: &Path) -> Result<Option<Self>, ManifestError> {
        let path = dir.join(MANIFEST_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| ManifestError::Read(path, e))?;
        let manifest: PluginManifest = serde_json::from_str(&text)?;
        Ok(Some(manifest))
    }
}
