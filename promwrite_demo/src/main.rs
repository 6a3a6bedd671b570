//! Prometheus Remote Write Demo

mod config;

use anyhow::Result; // alias std::result::Result with dynamic error type
use env_logger::{Builder, Env};

use promwrite_core::error::debug_error_enabled;
use promwrite_core::run::{run, RunStatus};

use crate::config::Config;

/// The program's main entry point.
fn main() -> Result<()> {
    Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::load()?;
    debug_error_enabled(config.debug);
    log::debug!("Loaded config: {:?}", config);

    // Write the demo metrics once, then query them back
    match async_std::task::block_on(run(&config.demo))? {
        RunStatus::Completed => Ok(()),
        RunStatus::Unhealthy => {
            log::error!("Health check failed, exiting");
            std::process::exit(1)
        }
    }
}
