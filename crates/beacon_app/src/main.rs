mod config;
mod input;
mod progress;
mod screen;
mod views;

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use beacon_core::SystemClock;
use beacon_engine::Monitor;
use beacon_logging::{beacon_info, beacon_warn, LogDestination};
use clap::Parser;
use log::LevelFilter;

use crate::config::{AppConfig, DEFAULT_CONFIG_FILENAME};
use crate::screen::{Screen, ScreenSink};
use crate::views::AppViews;

/// Follows a Laminar CI server's dashboard from the terminal.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Base URL of the CI server.
    #[arg(long)]
    server: Option<String>,
    /// Page to open, such as `/jobs/build/latest`.
    #[arg(long)]
    route: Option<String>,
    /// RON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Also write log output to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = AppConfig::discover(cli.config.as_deref(), Path::new(DEFAULT_CONFIG_FILENAME))?;
    if let Some(server) = cli.server {
        config.server = server;
    }
    if let Some(route) = cli.route {
        config.route = route;
    }
    if let Some(log_file) = cli.log_file {
        config.log_file = Some(log_file);
    }

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let destination = match config.log_file.clone() {
        Some(path) => LogDestination::Both(path),
        None => LogDestination::Terminal,
    };
    beacon_logging::initialize(destination, level);
    beacon_info!("beacon {} following {}", env!("CARGO_PKG_VERSION"), config.server);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let screen = Screen::stdout();
    let views = AppViews::new(screen.clone(), Rc::new(SystemClock));
    let (monitor, handle) = Monitor::connect(
        config.to_settings(),
        Box::new(views),
        Box::new(ScreenSink::new(screen)),
    )
    .context("failed to set up the HTTP client")?;

    handle.navigate(config.route.clone());

    let ctrl_c = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ctrl_c.shutdown(),
            Err(err) => beacon_warn!("cannot listen for ctrl-c: {}", err),
        }
    });

    let stdin = handle.clone();
    std::thread::spawn(move || input::forward_lines(std::io::stdin().lock().lines(), &stdin));

    monitor.run().await;
    Ok(())
}
