// SPDX-License-Identifier: MIT

mod cli;
mod sdk;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use guildhall_config::{validate_project_path, Project};
use guildhall_server::ServerContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Completions { shell } => {
            cli::print_completions(shell);
            Ok(())
        }
        Commands::ShowConfig => show_config(cli.config.as_deref()),
        Commands::Status => status(),
        Commands::Validate => validate(cli.config.as_deref()),
        Commands::Register {
            name,
            path,
            description,
            repo_url,
            meeting_cap,
        } => register(cli.config.as_deref(), name, path, description, repo_url, meeting_cap),
        Commands::Serve {
            guild_root,
            local_mcp_base,
            bind,
        } => serve(cli.config.as_deref(), guild_root, local_mcp_base, bind).await,
    }
}

fn init_logging(verbosity: u8) {
    let default_level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<guildhall_config::Config> {
    match path {
        Some(p) => guildhall_config::load_from(p).with_context(|| format!("loading config from {}", p.display())),
        None => guildhall_config::load().context("loading config"),
    }
}

fn show_config(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
    Ok(())
}

/// Check every registered project's path against `.git/` + `.lore/`
/// (spec §6). Exits nonzero if any project fails.
fn validate(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mut failed = false;
    for project in &config.projects {
        match validate_project_path(&project.path) {
            Ok(()) => println!("OK    {} ({})", project.name, project.path.display()),
            Err(err) => {
                println!("FAIL  {} ({}): {err}", project.name, project.path.display());
                failed = true;
            }
        }
    }
    if failed {
        anyhow::bail!("one or more projects failed validation");
    }
    println!("\nAll {} project(s) valid.", config.projects.len());
    Ok(())
}

fn register(
    config_path: Option<&std::path::Path>,
    name: String,
    path: std::path::PathBuf,
    description: Option<String>,
    repo_url: Option<String>,
    meeting_cap: Option<u32>,
) -> anyhow::Result<()> {
    let mut config = load_config(config_path)?;

    if config.projects.iter().any(|p| p.name == name) {
        anyhow::bail!("a project named {name:?} is already registered");
    }
    validate_project_path(&path).with_context(|| format!("validating project path {}", path.display()))?;

    config.projects.push(Project {
        name: name.clone(),
        path,
        description,
        repo_url,
        meeting_cap,
    });

    match config_path {
        Some(p) => guildhall_config::save_to(p, &config),
        None => guildhall_config::save(&config),
    }
    .context("saving config")?;

    println!("Registered project {name:?}.");
    Ok(())
}

fn status() -> anyhow::Result<()> {
    let home = guildhall_config::guild_hall_home();
    match guildhall_server::SingleInstanceGuard::running_pid(&home) {
        Some(pid) => println!("guild-hall is running (pid {pid}, home {})", home.display()),
        None => println!("guild-hall is not running (home {})", home.display()),
    }
    Ok(())
}

async fn serve(
    config_path: Option<&std::path::Path>,
    guild_root: Option<std::path::PathBuf>,
    local_mcp_base: String,
    bind: String,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let home = guildhall_config::guild_hall_home();

    let guard = guildhall_server::SingleInstanceGuard::acquire(&home)
        .context("another guild-hall instance appears to be running")?;

    let guild_root = guild_root.unwrap_or_else(|| {
        config
            .projects
            .first()
            .map(|p| p.path.clone())
            .unwrap_or_else(|| home.join("guild"))
    });

    let ctx = Arc::new(ServerContext::with_settings(
        home.clone(),
        guild_root,
        Arc::new(sdk::EchoAgentSdk),
        local_mcp_base,
        config.settings,
    ));

    // Force boot cleanup + discovery before accepting traffic.
    let lifecycle = ctx.lifecycle().await;
    let mcp_transport = ctx.mcp_transport().await;

    let app = guildhall_server::router(ctx.clone()).merge(mcp_transport.router());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    tracing::info!(%bind, home = %home.display(), "guild-hall listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down, tearing down guild member subprocesses");
    lifecycle.shutdown_all().await;
    drop(guard);
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
