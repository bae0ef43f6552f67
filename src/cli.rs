//! Command-line interface for waymark-sync.
//!
//! Each subcommand opens the config and preset library, runs its jobs to
//! completion on the shared runtime and prints the resulting progress tree.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::runtime::{Handle, Runtime};
use waymark_sync_config::{Config, SubscriptionStore};
use waymark_sync_library::PresetStore;

use crate::subscription::{JobHandle, RunOutcome, SharedLibrary, SubscriptionManager};

/// waymark-sync - keep local waymark presets in sync with remote repositories
#[derive(Parser)]
#[command(name = "waymark-sync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Preset library file to use instead of the configured one
    #[arg(long, global = true, value_name = "PATH")]
    pub library: Option<PathBuf>,

    /// Set debug log level (overrides RUST_LOG and DEBUG_LEVEL)
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,
}

/// Log level argument for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevelArg {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    /// Convert to `log::LevelFilter`
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevelArg::Off => log::LevelFilter::Off,
            LogLevelArg::Error => log::LevelFilter::Error,
            LogLevelArg::Warn => log::LevelFilter::Warn,
            LogLevelArg::Info => log::LevelFilter::Info,
            LogLevelArg::Debug => log::LevelFilter::Debug,
            LogLevelArg::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe to a repository by its manifest URL
    Subscribe { url: String },

    /// Remove a subscription
    Unsubscribe {
        url: String,

        /// Also delete every preset imported from this repository
        #[arg(long)]
        delete_presets: bool,
    },

    /// List subscriptions and their update status
    List,

    /// Check for updates without changing the library
    Check {
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        url: Option<String>,

        /// Check every subscription
        #[arg(long)]
        all: bool,
    },

    /// Download and import updates from a repository
    Sync { url: String },
}

/// Run the parsed command. Returns the process exit code.
pub fn run(cli: Cli, runtime: &Runtime) -> Result<i32> {
    let config_path = cli.config.unwrap_or_else(Config::config_path);
    let store = Arc::new(
        SubscriptionStore::open(&config_path)
            .with_context(|| format!("Failed to open config {}", config_path.display()))?,
    );
    store.settings().validate()?;

    let library_path = cli.library.unwrap_or_else(|| store.library_path());
    let library: SharedLibrary = Arc::new(tokio::sync::Mutex::new(
        PresetStore::open(&library_path)
            .with_context(|| format!("Failed to open library {}", library_path.display()))?,
    ));

    let command = cli.command;
    runtime.block_on(async move {
        let manager = SubscriptionManager::with_http(store, library, Handle::current());
        dispatch(&manager, command).await
    })
}

async fn dispatch(manager: &SubscriptionManager, command: Commands) -> Result<i32> {
    match command {
        Commands::Subscribe { url } => subscribe(manager, &url).await,
        Commands::Unsubscribe {
            url,
            delete_presets,
        } => {
            let deleted = manager.unsubscribe(&url, delete_presets).await?;
            println!("Unsubscribed from {url}");
            if delete_presets {
                println!("Deleted {deleted} presets");
            }
            Ok(0)
        }
        Commands::List => {
            list(manager);
            Ok(0)
        }
        Commands::Check { url: Some(url), .. } => {
            let Some(job) = manager.schedule_check(&url)? else {
                println!("A job for {url} is already running");
                return Ok(0);
            };
            Ok(report(manager, job).await)
        }
        Commands::Check { url: None, .. } => {
            let mut code = 0;
            for job in manager.check_all() {
                code = code.max(report(manager, job).await);
            }
            Ok(code)
        }
        Commands::Sync { url } => {
            let job = manager.sync(&url)?;
            Ok(report(manager, job).await)
        }
    }
}

async fn subscribe(manager: &SubscriptionManager, url: &str) -> Result<i32> {
    let job = manager.subscribe(url)?;
    let result = job.wait().await;
    print_progress(manager, url);
    let repo = result?;
    println!(
        "Subscribed to '{}'. Run `waymark-sync sync {}` to import its presets.",
        repo.name, url
    );
    Ok(0)
}

fn list(manager: &SubscriptionManager) {
    let repos = manager.repos();
    if repos.is_empty() {
        println!("No subscriptions");
        return;
    }
    for repo in repos {
        println!(
            "{:<24} {:<8} last checked {}  {}",
            repo.name,
            if repo.has_updates { "UPDATES" } else { "ok" },
            repo.last_check_display(),
            repo.repo_url
        );
    }
}

/// Wait for a run, print its progress tree, and map the result to an exit code.
async fn report(manager: &SubscriptionManager, job: JobHandle<RunOutcome>) -> i32 {
    let url = job.url().to_string();
    let result = job.wait().await;
    print_progress(manager, &url);
    match result {
        Ok(outcome) if outcome.errored => {
            eprintln!(
                "waymark-sync: {} presets failed for {}",
                outcome.failed_items().count(),
                url
            );
            1
        }
        Ok(_) => 0,
        Err(e) => {
            eprintln!("waymark-sync: error: {e}");
            1
        }
    }
}

fn print_progress(manager: &SubscriptionManager, url: &str) {
    if let Some(progress) = manager.progress(url) {
        print!("{progress}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_unsubscribe_flag() {
        let cli = Cli::parse_from([
            "waymark-sync",
            "unsubscribe",
            "https://x/m.yaml",
            "--delete-presets",
        ]);
        assert!(matches!(
            cli.command,
            Commands::Unsubscribe {
                delete_presets: true,
                ..
            }
        ));
    }

    #[test]
    fn test_cli_check_requires_url_or_all() {
        assert!(Cli::try_parse_from(["waymark-sync", "check"]).is_err());
        assert!(Cli::try_parse_from(["waymark-sync", "check", "--all"]).is_ok());
        assert!(
            Cli::try_parse_from(["waymark-sync", "check", "https://x/m.yaml", "--all"]).is_err()
        );
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::parse_from([
            "waymark-sync",
            "list",
            "--config",
            "/tmp/c.yaml",
            "--log-level",
            "debug",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/c.yaml")));
        assert_eq!(cli.log_level, Some(LogLevelArg::Debug));
        assert_eq!(
            cli.log_level.map(LogLevelArg::to_level_filter),
            Some(log::LevelFilter::Debug)
        );
    }

    #[test]
    fn test_cli_rejects_unknown_log_level() {
        assert!(Cli::try_parse_from(["waymark-sync", "list", "--log-level", "loud"]).is_err());
    }
}
