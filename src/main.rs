use std::{fs, io::{self, Write}, path::Path, process::ExitCode, sync::Arc};

use clap::Parser as _;
use tokio_util::sync::CancellationToken;

use crate::{cli::{Cli, Command}, config::Config, prelude::*, summary::Summary};


mod cli;
mod config;
mod driver;
mod engine;
mod log;
mod metrics;
mod prelude;
mod scenario;
mod summary;
#[cfg(test)]
mod test_util;
mod thresholds;
mod util;


#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

/// Exit code when the run completed but at least one threshold failed.
const THRESHOLDS_FAILED: u8 = 99;


#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.cmd {
        Command::GenConfigTemplate { out } => {
            let template = config::template();
            match out {
                Some(path) => fs::write(path, &template)?,
                None => io::stdout().write_all(template.as_bytes())?,
            }
        }

        Command::Check => {
            let config = load_config(config_path)?;
            check(&config)?;
        }

        Command::Run { summary_out } => {
            let config = load_config(config_path)?;
            let thresholds = config.thresholds.rules.clone();
            let ctx = Arc::new(engine::Context::new(config)?);

            let shutdown = CancellationToken::new();
            tokio::spawn(shutdown_signal(shutdown.clone()));

            let result = engine::run(ctx, shutdown).await?;
            let summary = Summary::new(&result, &thresholds);
            print!("{summary}");
            if let Some(path) = summary_out {
                summary.write_json(&path)?;
            }

            if !summary.passed() {
                error!("{} of {} thresholds failed", summary.failed_thresholds(), thresholds.len());
                return Ok(ExitCode::from(THRESHOLDS_FAILED));
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let (config, source) = config::load(path)?;
    log::init(&config.log).context("failed to initialize logging")?;
    match source {
        Some(path) => info!("Loaded configuration from '{}'", path.display()),
        None => info!("No configuration file found, using built-in defaults"),
    }
    Ok(config)
}

fn check(config: &Config) -> Result<()> {
    let driver = driver::Driver::new(&config.driver)?;
    let schedule = scenario::RampSchedule::new(&config.scenario);

    println!("Target: {}", driver.base_url().as_str());
    println!("Slugs: {}", config.driver.slugs.join(", "));
    let mix = driver.request_kinds().probabilities()
        .map(|(kind, p)| format!("{} {:.0}%", kind.tag(), p * 100.0))
        .collect::<Vec<_>>();
    println!("Request mix: {}", mix.join(", "));
    println!();

    println!("Schedule ({:?} in total):", schedule.total_duration());
    for line in schedule.describe() {
        println!("  {line}");
    }
    println!(
        "Workers: {} pre-allocated, at most {}; graceful stop {:?}",
        config.scenario.pre_allocated_vus,
        config.scenario.max_vus,
        config.scenario.graceful_stop,
    );
    println!();

    println!("Thresholds:");
    for threshold in config.thresholds.rules.iter() {
        println!("  {threshold}");
    }

    info!("Configuration is valid");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received Ctrl+C, stopping the run");
            token.cancel();
        }
        Err(e) => warn!("Could not listen for Ctrl+C, the run can only stop on its own: {e}"),
    }
}
