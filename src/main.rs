//! # Turnover: booking intake and cleaner coordination
//!
//! Usage:
//!   turnover intake                      # One mailbox pass, print the report
//!   turnover serve                       # Callback gateway + timeout sweeper
//!   turnover serve --intake-every 300    # ...and poll the mailbox
//!   turnover sweep                       # Expire overdue cleaner requests once
//!   turnover status                      # Open coordination runs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use turnover_channels::{EmailNotifier, ImapMailSource};
use turnover_core::{MailSource, TurnoverConfig};
use turnover_scheduler::{BookingStore, CoordinationWorkflow, Intake, TurnoverDb, execution};

#[derive(Parser)]
#[command(
    name = "turnover",
    version,
    about = "🧹 Turnover — booking intake and cleaner coordination"
)]
struct Cli {
    /// Config file (default ~/.turnover/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch booking emails once and start coordination for new or changed bookings
    Intake {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the callback gateway and the timeout sweeper
    Serve {
        /// Also poll the mailbox every N seconds
        #[arg(long)]
        intake_every: Option<u64>,
    },
    /// Expire overdue cleaner requests once
    Sweep,
    /// List open coordination runs
    Status,
}

fn load_config(path: Option<&str>) -> Result<TurnoverConfig> {
    let path = path
        .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
        .unwrap_or_else(TurnoverConfig::default_path);
    let config = TurnoverConfig::load_from(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    tracing::debug!(
        "Loaded {} with {} properties",
        path.display(),
        config.properties.len()
    );
    Ok(config)
}

fn open_db(config: &TurnoverConfig) -> Result<Arc<TurnoverDb>> {
    let path = config.storage.resolved_path();
    let db = TurnoverDb::open(&path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(db))
}

fn build_workflow(config: &TurnoverConfig, db: Arc<TurnoverDb>) -> Result<Arc<CoordinationWorkflow>> {
    let notifier = Arc::new(EmailNotifier::new(&config.mail)?);
    Ok(Arc::new(CoordinationWorkflow::new(
        db,
        notifier,
        config.workflow.clone(),
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; `turnover` prefixes every turnover_* target
    let filter = if cli.verbose {
        "turnover=debug,tower_http=debug"
    } else {
        "turnover=info"
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    let config = load_config(cli.config.as_deref())?;
    let db = open_db(&config)?;

    match cli.command {
        Commands::Intake { json } => {
            let workflow = build_workflow(&config, db.clone())?;
            let intake = Intake::from_config(&config, BookingStore::new(db), workflow)?;
            let source = ImapMailSource::new(config.mail.clone());
            let report = intake.run(&source).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("📊 {}", report.summary());
                for skipped in &report.skipped {
                    println!("   ⏭️  {} ({})", skipped.subject, skipped.reason);
                }
                for failure in &report.errors {
                    println!(
                        "   ❌ {} [{}]: {}",
                        failure.subject,
                        failure.booking.as_deref().unwrap_or("-"),
                        failure.error
                    );
                }
            }
        }
        Commands::Serve { intake_every } => {
            let workflow = build_workflow(&config, db.clone())?;

            tokio::spawn(turnover_scheduler::spawn_sweeper(
                workflow.clone(),
                config.workflow.sweep_interval_secs,
            ));

            if let Some(every) = intake_every {
                let intake = Intake::from_config(&config, BookingStore::new(db), workflow.clone())?;
                let source: Arc<dyn MailSource> = Arc::new(ImapMailSource::new(config.mail.clone()));
                tokio::spawn(turnover_scheduler::spawn_intake(Arc::new(intake), source, every));
            }

            turnover_gateway::serve(&config.gateway, turnover_gateway::AppState::new(workflow))
                .await?;
        }
        Commands::Sweep => {
            let workflow = build_workflow(&config, db)?;
            let report = workflow.expire_overdue(chrono::Utc::now()).await?;
            println!(
                "⏰ {} overdue, {} advanced, {} exhausted, {} confirmed, {} skipped",
                report.overdue, report.advanced, report.exhausted, report.confirmed, report.skipped
            );
            for error in &report.errors {
                println!("   ❌ {error}");
            }
        }
        Commands::Status => {
            let bookings = BookingStore::new(db.clone()).count()?;
            let open = db.with_conn(execution::open_executions)?;
            println!("📋 {bookings} bookings stored, {} open coordination runs", open.len());
            for exec in &open {
                println!(
                    "   {} {} [{}] waiting on {} (attempt {}), cleaning {}, deadline {}",
                    exec.id,
                    exec.booking_key,
                    exec.status,
                    exec.active_cleaner().map(|c| c.name).unwrap_or_else(|| "-".into()),
                    exec.attempt_count + 1,
                    exec.cleaning_at.format("%Y-%m-%d %H:%M UTC"),
                    exec.deadline
                        .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
                        .unwrap_or_else(|| "-".into()),
                );
            }
        }
    }

    Ok(())
}
