// SPDX-License-Identifier: MIT

use std::path::PathBuf;

/// Resolve the Guild Hall home directory.
///
/// `GUILD_HALL_HOME` overrides the default (`~/.guild-hall`), per §6 of the
/// spec. Falls back to `.guild-hall` in the current directory if the home
/// directory cannot be determined at all (headless/test environments).
pub fn guild_hall_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("GUILD_HALL_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|h| h.join(".guild-hall"))
        .unwrap_or_else(|| PathBuf::from(".guild-hall"))
}
