//! Strata - content-driven deployment controller
//!
//! Usage:
//!   strata status            # Show installed resources
//!   strata scan              # Run one reconciliation cycle
//!   strata watch             # Keep watching until Ctrl-C
//!   strata install <path>    # Install one resource now
//!   strata bundle load <dir> # Load bundle content into the store

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strata_core::bundle::{Bundle, DirBundle, RegisterOutcome, UnregisterOutcome};
use strata_core::config::ConfigStore;
use strata_core::content::NodeKind;
use strata_core::context::AppContext;
use strata_core::controller::CycleReport;
use strata_core::state::ResourceRecord;
use strata_core::types::{Payload, ResourceId, normalize_path};

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Content-driven deployment controller", long_about = None)]
struct Cli {
    /// Path to strata.toml (defaults to ./strata.toml, then the global config)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show installed resources
    Status {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Reconcile once: discover folders, scan them and run the queue
    Scan {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Reconcile continuously until interrupted
    Watch,

    /// Install the resource at a content path now
    Install {
        /// Content path, e.g. /apps/demo/install/app.jar
        path: String,
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Uninstall the resource recorded for a content path
    #[command(alias = "rm")]
    Uninstall {
        /// Content path of the resource
        path: String,
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Load or unload bundle content
    Bundle(BundleArgs),
}

#[derive(Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// Machine-readable JSON
    Json,
}

#[derive(Args)]
struct BundleArgs {
    #[command(subcommand)]
    command: BundleSubcommand,
}

#[derive(Subcommand)]
enum BundleSubcommand {
    /// Load the content of a bundle directory
    Load {
        /// Directory holding bundle.toml
        dir: PathBuf,
        /// Replace content loaded by a previous version
        #[arg(long)]
        update: bool,
    },

    /// Remove the content recorded for a bundle directory
    Unload {
        /// Directory holding bundle.toml
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata=info,strata_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let ctx = load_context(cli.config)?;

    match cli.command {
        Commands::Status { format } => run_status(&ctx, format),
        Commands::Scan { format } => run_scan(&ctx, format),
        Commands::Watch => run_watch(&ctx),
        Commands::Install { path, format } => run_install(&ctx, &path, format),
        Commands::Uninstall { path, format } => run_uninstall(&ctx, &path, format),
        Commands::Bundle(args) => run_bundle(&ctx, args.command),
    }
}

fn load_context(explicit: Option<PathBuf>) -> Result<AppContext> {
    let store = ConfigStore::discover(explicit.as_deref())?;
    let config = store.load()?;
    tracing::debug!(config = %store.config_path().display(), "loaded configuration");
    AppContext::from_config(config)
}

fn run_status(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let records = ctx.controller().records();
    match format {
        OutputFormat::Table => print_records(&records),
        OutputFormat::Json => {
            let output = serde_json::json!({
                "state_dir": ctx.state_dir(),
                "resources": records,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}

fn print_records(records: &[ResourceRecord]) {
    if records.is_empty() {
        println!("No resources installed.");
        return;
    }

    println!("{:<50} {:<10} {:<14} Updated", "Resource", "Processor", "Digest");
    println!("{}", "-".repeat(96));
    for record in records {
        let digest = record
            .digest
            .as_deref()
            .map(|d| d.chars().take(12).collect::<String>())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<50} {:<10} {:<14} {}",
            record.id.as_str(),
            record.processor.as_deref().unwrap_or("-"),
            digest,
            record.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    println!();
    println!("{} resources installed", records.len());
}

fn run_scan(ctx: &AppContext, format: OutputFormat) -> Result<()> {
    let mut observer = ctx.observer()?;
    let mut report = observer.startup()?;
    let cycle = observer.run_one_cycle()?;
    report.executed.extend(cycle.executed);
    report.failed.extend(cycle.failed);

    match format {
        OutputFormat::Table => {
            for folder in observer.watched_folders() {
                println!("Watching {}", folder);
            }
            print_cycle(&report);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn run_watch(ctx: &AppContext) -> Result<()> {
    let observer = ctx.observer()?;
    let interval = ctx.config().scan_interval();
    let handle = observer
        .spawn(interval)
        .context("Failed to start observer thread")?;
    println!(
        "Watching {} (every {} ms), press Ctrl-C to stop",
        ctx.config().roots.join(", "),
        interval.as_millis()
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    runtime
        .block_on(tokio::signal::ctrl_c())
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("stopping observer");
    handle.stop();
    Ok(())
}

fn run_install(ctx: &AppContext, path: &str, format: OutputFormat) -> Result<()> {
    let path = normalize_path(path);
    let node = ctx
        .store()
        .node(&path)?
        .with_context(|| format!("No node at '{}'", path))?;
    let payload = match (node.kind, node.data) {
        (NodeKind::Folder, _) => anyhow::bail!("'{}' is a folder, not a resource", path),
        (_, Some(data)) => Payload::new(data),
        // Property-only nodes install as the JSON of their properties
        (_, None) => Payload::new(serde_json::to_vec(&node.properties)?),
    };

    ctx.controller()
        .schedule_install(ResourceId::new(path), payload);
    let report = ctx.controller().execute_scheduled_operations()?;
    print_report(&report, format)
}

fn run_uninstall(ctx: &AppContext, path: &str, format: OutputFormat) -> Result<()> {
    let id = ResourceId::new(normalize_path(path));
    if ctx.controller().record(&id).is_none() {
        anyhow::bail!("'{}' is not installed", id);
    }
    ctx.controller().schedule_uninstall(id);
    let report = ctx.controller().execute_scheduled_operations()?;
    print_report(&report, format)
}

fn print_report(report: &CycleReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_cycle(report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

fn print_cycle(report: &CycleReport) {
    if report.is_empty() {
        println!("Nothing to do.");
        return;
    }
    for task in &report.executed {
        println!("  {:<10} {} ({:?})", format!("{:?}", task.kind), task.id, task.outcome);
    }
    for failure in &report.failed {
        println!("  ⚠ {:<8} {}: {}", format!("{:?}", failure.kind), failure.id, failure.error);
    }
    println!("{} changed, {} failed", report.changed(), report.failed.len());
}

fn run_bundle(ctx: &AppContext, command: BundleSubcommand) -> Result<()> {
    match command {
        BundleSubcommand::Load { dir, update } => {
            let bundle = Arc::new(DirBundle::open(&dir)?);
            let name = bundle.name().to_string();
            match ctx.loader().register_bundle(bundle, update) {
                RegisterOutcome::Loaded { created } => {
                    println!("✓ Loaded bundle '{}'", name);
                    for path in created {
                        println!("  + {}", path);
                    }
                }
                RegisterOutcome::AlreadyLoaded => {
                    println!("• Bundle '{}' is already loaded", name);
                }
                RegisterOutcome::NoContent => {
                    println!("• Bundle '{}' declares no content", name);
                }
                RegisterOutcome::Delayed { reason } | RegisterOutcome::Failed { reason } => {
                    anyhow::bail!("Bundle '{}' was not loaded: {}", name, reason);
                }
            }
        }
        BundleSubcommand::Unload { dir } => {
            let bundle = DirBundle::open(&dir)?;
            match ctx.loader().unregister_bundle(&bundle)? {
                UnregisterOutcome::Unloaded { removed } => {
                    println!("✓ Unloaded bundle '{}'", bundle.name());
                    for path in removed {
                        println!("  - {}", path);
                    }
                }
                UnregisterOutcome::NotLoaded | UnregisterOutcome::DroppedDelayed => {
                    println!("• Bundle '{}' has no loaded content", bundle.name());
                }
            }
        }
    }
    Ok(())
}
