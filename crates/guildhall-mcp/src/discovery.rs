// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::path::Path;

use guildhall_config::PluginManifest;

/// Runtime state of a discovered guild member, independent of its manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberStatus {
    /// Discovered, never spawned (or spawned and since torn down cleanly).
    Disconnected,
    /// Spawned; awaiting `initialize`/`tools/list` to complete.
    Available,
    /// Initialized and serving tool calls.
    Connected,
    /// Spawn, initialize, or a live subprocess failed.
    Error,
}

/// A discovered capability provider — the manifest plus its current
/// runtime state (spec §3 "Guild Member").
#[derive(Debug, Clone)]
pub struct GuildMember {
    pub name: String,
    pub manifest: Option<PluginManifest>,
    pub status: MemberStatus,
    pub tools: Vec<String>,
    pub last_error: Option<String>,
    pub bound_port: Option<u16>,
}

impl GuildMember {
    fn valid(name: String, manifest: PluginManifest) -> Self {
        Self {
            name,
            manifest: Some(manifest),
            status: MemberStatus::Disconnected,
            tools: Vec::new(),
            last_error: None,
            bound_port: None,
        }
    }

    fn invalid(name: String, reason: String) -> Self {
        Self {
            name,
            manifest: None,
            status: MemberStatus::Error,
            tools: Vec::new(),
            last_error: Some(reason),
            bound_port: None,
        }
    }
}

/// Rejects names containing path separators, `..`, ASCII whitespace, or
/// non-ASCII bytes — a directory name is used verbatim as a member key and
/// must never escape the discovery root.
pub fn is_safe_plugin_name(name: &str) -> bool {
    if name.is_empty() || name == ".." || name.contains('/') || name.contains('\\') {
        return false;
    }
    name.bytes().all(|b| b.is_ascii() && !b.is_ascii_whitespace())
}

/// Descends at most two levels below `root` looking for plugin manifests,
/// keying each discovered member by its containing directory name (not the
/// manifest's own `name` field).
pub fn discover(root: &Path) -> HashMap<String, GuildMember> {
    let mut members = HashMap::new();
    if !root.is_dir() {
        return members;
    }

    let Ok(top) = std::fs::read_dir(root) else {
        return members;
    };

    for entry in top.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if !is_safe_plugin_name(&name) {
            continue;
        }

        if let Some(member) = load_candidate(&name, &path) {
            members.insert(name, member);
            continue;
        }

        let Ok(sub) = std::fs::read_dir(&path) else {
            continue;
        };
        for sub_entry in sub.flatten() {
            let sub_path = sub_entry.path();
            if !sub_path.is_dir() {
                continue;
            }
            let Some(sub_name) = sub_entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if !is_safe_plugin_name(&sub_name) {
                continue;
            }
            if let Some(member) = load_candidate(&sub_name, &sub_path) {
                members.insert(sub_name, member);
            }
        }
    }

    members
}

fn load_candidate(name: &str, dir: &Path) -> Option<GuildMember> {
    match PluginManifest::load_from_dir(dir) {
        Ok(Some(manifest)) => Some(GuildMember::valid(name.to_owned(), manifest)),
        Ok(None) => None,
        Err(err) => Some(GuildMember::invalid(name.to_owned(), err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_manifest(dir: &Path, body: &str) {
        fs::write(dir.join("plugin.json"), body).unwrap();
    }

    #[test]
    fn missing_root_returns_empty_map() {
        let members = discover(Path::new("/nonexistent/guild-hall-root"));
        assert!(members.is_empty());
    }

    #[test]
    fn discovers_one_level_deep() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin_dir = tmp.path().join("weather");
        fs::create_dir(&plugin_dir).unwrap();
        write_manifest(
            &plugin_dir,
            r#"{"name":"weather-plugin","displayName":"Weather","description":"d","version":"1.0","transport":"http","mcp":{"command":"./run","args":["--port","${PORT}"]}}"#,
        );

        let members = discover(tmp.path());
        assert_eq!(members.len(), 1);
        let member = &members["weather"];
        assert_eq!(member.status, MemberStatus::Disconnected);
        assert_eq!(member.manifest.as_ref().unwrap().display_name, "Weather");
    }

    #[test]
    fn discovers_two_levels_deep() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("group").join("weather");
        fs::create_dir_all(&nested).unwrap();
        write_manifest(
            &nested,
            r#"{"name":"weather-plugin","displayName":"Weather","description":"d","version":"1.0","transport":"http","mcp":{"command":"./run","args":[]}}"#,
        );

        let members = discover(tmp.path());
        assert_eq!(members.len(), 1);
        assert!(members.contains_key("weather"));
    }

    #[test]
    fn malformed_manifest_yields_error_member() {
        let tmp = tempfile::tempdir().unwrap();
        let plugin_dir = tmp.path().join("broken");
        fs::create_dir(&plugin_dir).unwrap();
        write_manifest(&plugin_dir, "{not json");

        let members = discover(tmp.path());
        let member = &members["broken"];
        assert_eq!(member.status, MemberStatus::Error);
        assert!(member.last_error.is_some());
    }

    #[test]
    fn unsafe_names_are_rejected() {
        assert!(!is_safe_plugin_name(".."));
        assert!(!is_safe_plugin_name("a/b"));
        assert!(!is_safe_plugin_name("a b"));
        assert!(!is_safe_plugin_name("café"));
        assert!(is_safe_plugin_name("weather-plugin"));
    }
}
