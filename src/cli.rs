// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser, Debug)]
#[command(
    name = "guild-hall",
    about = "Local multi-agent orchestration platform",
    version,
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the YAML config file (defaults to `<home>/config.yaml`).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the guild-hall server (HTTP + SSE surface, plugin lifecycle).
    Serve {
        /// Root directory to descend when discovering guild member plugins.
        #[arg(long)]
        guild_root: Option<PathBuf>,

        /// Base URL this process's own `/mcp` router is reachable at, handed
        /// to the agent SDK as the Worker Dispatch Bridge's tool server.
        #[arg(long, default_value = "http://127.0.0.1:8787")]
        local_mcp_base: String,

        /// Address to bind the HTTP surface to.
        #[arg(long, default_value = "127.0.0.1:8787")]
        bind: String,
    },

    /// Register a project with guild-hall. Fails if the name is already
    /// registered or the path is not a valid project (`.git/` + `.lore/`).
    Register {
        name: String,
        path: PathBuf,
        #[arg(long)]
        description: Option<String>,
        #[arg(long = "repo-url")]
        repo_url: Option<String>,
        #[arg(long = "meeting-cap")]
        meeting_cap: Option<u32>,
    },

    /// Validate every registered project's path. Exits nonzero if any fail.
    Validate,

    /// Report whether a guild-hall server is currently running.
    Status,

    /// Print the active configuration and exit.
    ShowConfig,

    /// Generate shell completion scripts.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
