use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use netbkp::adapters::{self, LocalStorage};
use netbkp::config::AppConfig;
use netbkp::context::AppContext;
use netbkp::core::models::{BatchReport, sanitize_component};
use netbkp::core::notifications::create_notifier;
use netbkp::core::{Orchestrator, StorageLayout};
use netbkp::inventory;
use netbkp::logging::{self, LogConfig};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};

#[derive(Parser)]
#[command(name = "netbkp")]
#[command(about = "Network device configuration backups", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (default: $NETBKP_CONFIG or /etc/netbkp/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up every device in the inventory for one client
    Run(RunArgs),
    /// List the effective vendor profiles
    Profiles,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum ReportFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Serialize)]
struct RunArgs {
    /// Client name; becomes the top-level backup directory
    #[serde(skip)]
    client: String,

    #[serde(skip)]
    #[arg(long, value_enum, default_value_t)]
    report: ReportFormat,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    inventory: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    backup_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    redundancy_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    retention: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    max_parallel: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    json_logs: Option<bool>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_file = cli.config.as_deref();

    match cli.command {
        Commands::Run(args) => {
            let config = AppConfig::load(config_file, Some(&args))
                .context("Failed to load configuration")?;
            run_backup(args, config).await
        }
        Commands::Profiles => {
            let config = AppConfig::load(config_file, None::<&RunArgs>)
                .context("Failed to load configuration")?;
            list_profiles(&config)
        }
        Commands::Config => {
            let config = AppConfig::load(config_file, None::<&RunArgs>)
                .context("Failed to load configuration")?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_backup(args: RunArgs, config: AppConfig) -> Result<()> {
    if sanitize_component(&args.client).is_empty() {
        bail!("client name '{}' has no usable characters", args.client);
    }

    let inventory =
        inventory::open(&config.inventory).context("Failed to read device inventory")?;

    let layout = StorageLayout::new(&config.backup_root, &config.redundancy_root, &args.client);
    init_logging(&config, layout.log_dir().join("netbkp.log"))?;

    let registry = config.registry().context("Invalid vendor profiles")?;
    let connector = adapters::get_connector(&config).context("Invalid session patterns")?;
    let notifier = create_notifier(&config.notifications);

    let records = match inventory.records() {
        Ok(records) => records,
        Err(e) => {
            error!(error = %e, "Cannot start batch");
            return Err(e).context("Failed to read device inventory");
        }
    };

    let ctx = AppContext::new(
        config,
        registry,
        connector,
        Arc::new(LocalStorage::default()),
    )
    .with_notifier(notifier);

    let report = Orchestrator::new(ctx)
        .run_batch(&args.client, records)
        .await;

    match args.report {
        ReportFormat::Text => print_report(&report),
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report.summary())?),
    }

    Ok(())
}

fn init_logging(config: &AppConfig, log_file: PathBuf) -> Result<()> {
    let with_file = LogConfig {
        json: config.json_logs,
        verbose: config.verbose,
        file: Some(log_file),
    };

    if let Err(file_error) = logging::init(with_file) {
        logging::init(LogConfig {
            json: config.json_logs,
            verbose: config.verbose,
            file: None,
        })?;
        warn!(error = %file_error, "Logging to console only");
    }
    Ok(())
}

fn print_report(report: &BatchReport) {
    let summary = report.summary();
    println!(
        "Backup of {} finished: {} of {} devices succeeded",
        summary.client, summary.succeeded, summary.total
    );

    for device in &summary.devices {
        match (&device.primary, &device.error) {
            (Some(primary), _) => println!(
                "  ok      {:<24} {:<16} {} ({})",
                device.label,
                device.host,
                primary.display(),
                device.mirror.as_deref().unwrap_or("no mirror")
            ),
            (None, Some(error)) => println!(
                "  FAILED  {:<24} {:<16} {}",
                device.label, device.host, error
            ),
            (None, None) => {}
        }
    }
}

fn list_profiles(config: &AppConfig) -> Result<()> {
    let registry = config.registry().context("Invalid vendor profiles")?;

    for (vendor, profile) in registry.iter() {
        println!(
            "{:<24} {:<20} {:<26} {}",
            vendor,
            profile.protocol,
            profile.strategy,
            profile.commands.join(" ; ")
        );
    }

    let aliases: Vec<String> = registry
        .aliases()
        .map(|(alias, target)| format!("{alias} -> {target}"))
        .collect();
    if !aliases.is_empty() {
        println!("\naliases: {}", aliases.join(", "));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_args(client: &str) -> RunArgs {
        RunArgs {
            client: client.into(),
            report: ReportFormat::Text,
            inventory: None,
            backup_root: None,
            redundancy_root: None,
            retention: None,
            max_parallel: None,
            simulation: None,
            verbose: None,
            json_logs: None,
        }
    }

    #[tokio::test]
    async fn missing_inventory_creates_no_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            inventory: dir.path().join("devices.csv"),
            backup_root: dir.path().join("backup"),
            redundancy_root: dir.path().join("mirror"),
            ..AppConfig::default()
        };

        let err = run_backup(run_args("acme"), config).await.unwrap_err();

        assert!(err.to_string().contains("inventory"), "{err:#}");
        assert!(!dir.path().join("backup").exists());
        assert!(!dir.path().join("mirror").exists());
    }
}
