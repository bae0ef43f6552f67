use anyhow::Result;
use clap::Parser;
use tokio::runtime::Runtime;
use waymark_sync::cli::{self, Cli, LogLevelArg};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize unified logging: routes all log::info!() etc. to the debug log.
    // When RUST_LOG is set, also mirrors to stderr for terminal debugging.
    // CLI --log-level flag takes precedence over RUST_LOG and DEBUG_LEVEL.
    waymark_sync::debug::init_log_bridge(cli.log_level.map(LogLevelArg::to_level_filter));

    log::info!("Starting waymark-sync {}", waymark_sync::VERSION);

    // Multi-threaded runtime for sync jobs and blocking HTTP
    let runtime = Runtime::new()?;

    let result = cli::run(cli, &runtime);

    // Use `shutdown_timeout` so a hung fetch can't keep the process alive
    log::info!("Shutting down runtime");
    runtime.shutdown_timeout(std::time::Duration::from_secs(2));

    match result {
        Ok(0) => Ok(()),
        // Non-zero exit: use process::exit so the shell sees the correct
        // exit code. The runtime is already shut down.
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("waymark-sync: error: {e:#}");
            std::process::exit(1);
        }
    }
}
