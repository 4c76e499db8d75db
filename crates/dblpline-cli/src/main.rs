//! dblpline - DBLP release tracking, document crawling, and extraction
//!
//! Follows the DBLP XML releases, narrows each to the records that changed
//! since the last cycle, fetches their documents, and extracts abstracts
//! through GROBID.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dblpline_core::{LogConfig, ProgressContext, is_shutdown_requested};

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "dblpline")]
#[command(about = "Incremental DBLP release pipeline with document crawling")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, alias = "debug", global = true)]
    verbose: bool,

    /// Config file path (default: ./dblpline.toml or ~/.config/dblpline/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache root for releases, parsed trees, and crawled documents
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Read timeout in seconds for stall detection
    #[arg(long, global = true)]
    read_timeout: Option<u64>,

    /// Maximum retry attempts for transient failures
    #[arg(long, global = true)]
    max_retries: Option<u32>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch, filter, crawl, and store in a loop
    Continuous(cmd::continuous::ContinuousArgs),
    /// Show the resolved release artifacts
    Release(cmd::release::ReleaseArgs),
    /// Show current configuration
    Config,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let progress = Arc::new(ProgressContext::new());
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    dblpline_core::init_logging(&LogConfig::from_flags(cli.verbose, is_tty), multi);

    match run(cli, progress) {
        Ok(()) if is_shutdown_requested() => {
            log::warn!("Interrupted");
            ExitCode::from(130)
        }
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_shutdown_requested() => {
            log::warn!("Interrupted: {e:#}");
            ExitCode::from(130)
        }
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, progress: Arc<ProgressContext>) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    // Config file defaults, CLI overrides
    dblpline_core::set_http_config(dblpline_core::HttpConfig {
        request_timeout: std::time::Duration::from_secs(config.http.request_timeout),
        read_timeout: std::time::Duration::from_secs(
            cli.read_timeout.unwrap_or(config.http.read_timeout),
        ),
        max_retries: cli.max_retries.unwrap_or(config.http.max_retries),
    });

    match cli.command {
        Command::Continuous(args) => {
            dblpline_core::install_signal_handlers()?;
            let cache_dir = config.resolve_cache_dir(cli.cache_dir.as_deref())?;
            cmd::continuous::run(args, &config, &cache_dir, &progress)
        }
        Command::Release(args) => cmd::release::run(args, &config),
        Command::Config => {
            let cache_dir = config.resolve_cache_dir(cli.cache_dir.as_deref())?;
            cmd::config::run(&config, &cache_dir);
            Ok(())
        }
    }
}
