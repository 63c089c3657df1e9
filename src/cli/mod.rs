//! Command-line interface for the reconciler.
//!
//! Provides commands for running the service, running a single pass,
//! inspecting active events and showing the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::core::{CompletionPolicy, PassReport, Reconciler};
use crate::domain::Page;
use crate::service::{Service, StopOutcome};
use crate::store::{SqliteProvider, SqliteStore, StatusStore};

/// reconciler - Completes overdue playlists and the events that own them
#[derive(Parser, Debug)]
#[command(name = "reconciler")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to .reconciler/config.yaml in this or a parent directory)
    #[arg(short, long, global = true, env = "RECONCILER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the reconciler until Ctrl+C
    Run {
        /// Seconds to wait for the current pass when stopping
        #[arg(long, default_value = "30")]
        shutdown_timeout: u64,
    },

    /// Run a single pass and print the report
    Sweep {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List active events and their playlists
    Status,

    /// Show resolved configuration
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let settings = Settings::load(self.config.as_deref()).context("Invalid configuration")?;

        match self.command {
            Commands::Run { shutdown_timeout } => {
                run_service(&settings, Duration::from_secs(shutdown_timeout)).await
            }
            Commands::Sweep { json } => run_sweep(&settings, json).await,
            Commands::Status => show_status(&settings).await,
            Commands::Config => show_config(&settings),
        }
    }
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Run the service until Ctrl+C, then stop gracefully
async fn run_service(settings: &Settings, shutdown_timeout: Duration) -> Result<()> {
    ensure_parent_dir(&settings.database)?;
    let provider = Arc::new(SqliteProvider::new(&settings.database));
    println!("Reconciling {} every {:?}", provider.path().display(), settings.check_interval);
    let service = Service::from_settings(provider, settings)?;

    let shutdown = CancellationToken::new();
    let handle = service.start(&shutdown);

    println!("    Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    println!();
    println!("Stopping...");

    // Give up waiting after the timeout
    let give_up = CancellationToken::new();
    let timer = {
        let give_up = give_up.clone();
        tokio::spawn(async move {
            tokio::time::sleep(shutdown_timeout).await;
            give_up.cancel();
        })
    };

    let outcome = handle.stop(&give_up).await?;
    timer.abort();

    match outcome {
        StopOutcome::Graceful { passes } => println!("Stopped after {} pass(es)", passes),
        StopOutcome::Abandoned => {
            println!("Timed out after {:?} waiting for the current pass", shutdown_timeout)
        }
    }

    Ok(())
}

/// Run exactly one pass
async fn run_sweep(settings: &Settings, json: bool) -> Result<()> {
    ensure_parent_dir(&settings.database)?;
    let provider = Arc::new(SqliteProvider::new(&settings.database));
    let reconciler = Reconciler::new(provider, settings);

    let report = reconciler.run_pass(&CancellationToken::new()).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else {
        print_report(&report);
    }

    Ok(())
}

fn print_report(report: &PassReport) {
    println!("Pass at {}", report.started_at.to_rfc3339());
    println!("  Events scanned:      {}", report.events_scanned);
    println!("  Events completed:    {}", report.events_completed);
    println!("  Playlists scanned:   {}", report.playlists_scanned);
    println!("  Playlists completed: {}", report.playlists_completed);
    println!("  Already handled:     {}", report.already_handled);
    println!("  Duration:            {}ms", report.duration_ms);

    if !report.failures.is_empty() {
        println!();
        println!("Failures ({}):", report.failures.len());
        for failure in &report.failures {
            println!(
                "  {} {} (event {}): {}",
                failure.kind, failure.id, failure.event_id, failure.reason
            );
        }
    }
}

/// List active events with their playlists and deadlines
async fn show_status(settings: &Settings) -> Result<()> {
    let store = SqliteStore::open(&settings.database)?;
    let policy = CompletionPolicy::new(settings.completed_after);
    let cancel = CancellationToken::new();
    let now = Utc::now();

    let events = store.list_active_events(&cancel).await?;
    if events.is_empty() {
        println!("No active events.");
        return Ok(());
    }

    for event in events {
        println!("{}  {}  [{}]", event.id, event.name, event.status);

        let mut page = Page::first(settings.page_size);
        let mut shown = 0usize;
        loop {
            let playlists = store.list_playlists(event.id, page, &cancel).await?;
            if playlists.is_empty() {
                break;
            }
            for playlist in &playlists {
                let due = match policy.deadline(playlist) {
                    Some(deadline) if policy.should_complete_playlist(playlist, now) => {
                        format!("due since {}", deadline.to_rfc3339())
                    }
                    Some(deadline) => format!("due {}", deadline.to_rfc3339()),
                    None => "no end time".to_string(),
                };
                println!("    {}  {}  [{}]  {}", playlist.id, playlist.name, playlist.status, due);
            }
            shown += playlists.len();
            page = page.next();
        }

        if shown == 0 {
            println!("    (no playlists)");
        }
    }

    Ok(())
}

fn grace_hours(grace: chrono::Duration) -> f64 {
    grace.num_milliseconds() as f64 / 3_600_000.0
}

/// Show the resolved configuration (for debugging)
fn show_config(settings: &Settings) -> Result<()> {
    println!("Reconciler Configuration");
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!(
        "Config file: {}",
        settings
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using environment)".to_string())
    );
    println!();
    println!("Schedule:");
    println!("  Check interval:   {:?}", settings.check_interval);
    println!("  Completed after:  {}h", grace_hours(settings.completed_after));
    println!();
    println!("Store:");
    println!("  Database:         {}", settings.database.display());
    println!("  Page size:        {}", settings.page_size);
    println!();
    println!("Sweep:");
    println!("  Max concurrent events: {}", settings.max_concurrent_events);

    Ok(())
}
