//! # Playchart
//!
//! Command-line entry point. Parses arguments, loads `config.json`, opens the
//! catalog behind a [`Coordinator`] and routes each command to the library.
//!
//! ## Usage
//!
//! ```bash
//! # Seed the catalog from MPD's play counters
//! playchart import
//!
//! # Show this month's top 20
//! playchart chart --filter this-month --limit 20
//!
//! # Keep the charts current in the background
//! playchart daemon start
//! ```

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use playchart::cli::{self, Command, DaemonAction};
use playchart::completion;
use playchart::config::RuntimeConfig;
use playchart::coordinator::{wait, Coordinator};
use playchart::daemon::{self, ChartDaemon};
use playchart::db::SqliteCatalog;
use playchart::mpd_client::MpcSource;
use playchart::notification::NotifierKind;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;

/// How often import progress is redrawn.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

fn open_coordinator(config: &RuntimeConfig, notifier: NotifierKind) -> Result<Coordinator> {
    let store = SqliteCatalog::open(&config.db_path)
        .with_context(|| format!("Failed to open catalog at {}", config.db_path.display()))?;
    Ok(Coordinator::spawn(store, notifier.build(), config.ranking_options()))
}

fn mpd_source(config: &RuntimeConfig) -> Arc<MpcSource> {
    Arc::new(MpcSource::new(
        config.mpd_host.clone(),
        config.counter_sticker.clone(),
    ))
}

fn run_import(config: &RuntimeConfig, batch_size: usize) -> Result<()> {
    let coordinator = open_coordinator(config, config.notifier)?;
    let (progress, reply) = coordinator.import(mpd_source(config), batch_size);

    let result = loop {
        match reply.recv_timeout(PROGRESS_INTERVAL) {
            Ok(result) => break result,
            Err(RecvTimeoutError::Timeout) => {
                eprint!(
                    "\rImporting... {:>3.0}% ({}/{})",
                    progress.fraction() * 100.0,
                    progress.processed(),
                    progress.total()
                );
                let _ = io::stderr().flush();
            }
            Err(RecvTimeoutError::Disconnected) => break wait(&reply),
        }
    };
    eprintln!();

    let report = result.context("Import failed")?;
    if report.already_populated {
        println!("Catalog already has songs, nothing imported");
        println!("Run `playchart reset` first to start over");
    } else {
        println!(
            "Imported {} songs ({} skipped for missing title or artist)",
            report.imported, report.skipped
        );
    }
    Ok(())
}

fn run_watch(config: &RuntimeConfig, notifier: NotifierKind) -> Result<()> {
    let coordinator = open_coordinator(config, notifier)?;
    let mut daemon = ChartDaemon::new(mpd_source(config), coordinator, config.import_batch_size)?;
    daemon.start_monitoring()
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

/// Main entry point for playchart.
///
/// Logging is controlled via `RUST_LOG`:
/// - `RUST_LOG=debug playchart chart` - Enable debug logging
/// - `RUST_LOG=playchart::ranking=trace playchart chart` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    let mut config = RuntimeConfig::load()?;
    if let Some(db) = args.db {
        config = config.with_db_path(db);
    }
    if args.mpd_host.is_some() {
        config.mpd_host = args.mpd_host;
    }
    debug!("Using catalog at {}", config.db_path.display());

    match args.command {
        Command::Import { batch_size } => {
            let batch_size = batch_size.unwrap_or(config.import_batch_size);
            info!("Importing MPD library in batches of {batch_size}");
            run_import(&config, batch_size)?;
        }
        Command::Chart { filter, limit, json } => {
            if let Some(limit) = limit {
                config.chart_limit = limit;
            }
            let coordinator = open_coordinator(&config, config.notifier)?;
            let chart = coordinator.get_ranked(filter)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&chart)?);
            } else {
                print!("{chart}");
            }
        }
        Command::Watch { notifier } => {
            if daemon::is_daemon_running()? {
                eprintln!("A daemon is already tracking plays; stop it first");
                return Ok(());
            }
            run_watch(&config, notifier.unwrap_or(config.notifier))?;
        }
        Command::Daemon { action } => match action {
            DaemonAction::Start => {
                if daemon::is_daemon_running()? {
                    eprintln!("Daemon is already running");
                    return Ok(());
                }

                // Fork and start daemon in background
                match unsafe { libc::fork() } {
                    0 => {
                        run_watch(&config, config.notifier)?;
                        std::process::exit(0);
                    }
                    pid if pid > 0 => {
                        println!("Starting play tracking daemon...");
                        std::thread::sleep(Duration::from_millis(500));

                        if daemon::is_daemon_running()? {
                            println!("Daemon started successfully");
                        } else {
                            eprintln!("Failed to start daemon");
                        }
                    }
                    _ => {
                        eprintln!("Failed to fork process");
                    }
                }
            }
            DaemonAction::Stop => {
                daemon::stop_daemon()?;
                println!("Daemon stopped");
            }
            DaemonAction::Status => {
                if daemon::is_daemon_running()? {
                    println!("Daemon is running");
                } else {
                    println!("Daemon is not running");
                }
            }
        },
        Command::Reset { yes } => {
            if !yes && !confirm("Delete every song, play and rank?")? {
                println!("Nothing deleted");
                return Ok(());
            }
            let coordinator = open_coordinator(&config, config.notifier)?;
            let removed = coordinator.reset()?;
            println!("Removed {removed} songs");
        }
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(&shell), &mut cmd);
        }
        Command::CompleteFilters => {
            completion::print_filter_completions();
        }
    }

    Ok(())
}
