use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use duel_referee_core::{
    Clock, ConfigLoader, DuelStore, RefereeConfig, StoreBackend, SystemClock,
    DEFAULT_CONFIG_PATH,
};
use duel_referee_engine::{
    acquire_lease, release_lease, run_service, DuelSummary, Referee, RefereeSettings,
    TimeoutGateway,
};
use duel_referee_onechain::{AdminSigner, OneChainClient, OneChainClientConfig};
use duel_referee_store::{open_store, InstanceLease};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "duel-referee")]
#[command(about = "Referee service that settles expired OneChain duels", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recover state, then ingest, settle, and persist until Ctrl-C
    Run {
        /// Keep state in memory only and skip the instance lease
        #[arg(long)]
        ephemeral: bool,
    },
    /// Run startup recovery once, save, and exit
    Recover,
    /// Print tracked duels from the configured store
    Status {
        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the admin address derived from the configured key
    Address,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    let config = ConfigLoader::load(&cli.config)?;

    match cli.command {
        Commands::Run { ephemeral } => run(config, ephemeral).await?,
        Commands::Recover => recover(config).await?,
        Commands::Status { json } => status(&config, json).await?,
        Commands::Address => address(&config)?,
    }

    Ok(())
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn build_client(config: &RefereeConfig, signer: Option<AdminSigner>) -> Result<OneChainClient> {
    let client_config = OneChainClientConfig::from_ledger(&config.ledger)
        .context("Invalid [ledger] configuration")?;
    OneChainClient::new(client_config, signer).context("Failed to create OneChain client")
}

fn lease_for(config: &RefereeConfig) -> Option<InstanceLease> {
    config
        .lease
        .enabled
        .then(|| InstanceLease::new(&config.lease.path, config.lease.ttl()))
}

async fn run(mut config: RefereeConfig, ephemeral: bool) -> Result<()> {
    if ephemeral {
        tracing::warn!("Ephemeral run: state is kept in memory and lost on exit");
        config.store.backend = StoreBackend::Memory;
        config.lease.enabled = false;
    }

    let signer = AdminSigner::from_env(&config.ledger.admin_key_env).with_context(|| {
        format!(
            "Admin key required to settle duels (set {})",
            config.ledger.admin_key_env
        )
    })?;
    let client = build_client(&config, Some(signer))?;
    tracing::info!(
        rpc_url = client.rpc_url(),
        package_id = %config.ledger.package_id,
        admin = client.admin_address().map_or("none", |a| a.as_str()),
        "Starting duel referee"
    );

    let gateway = TimeoutGateway::new(client, config.schedule.call_timeout());
    let store = open_store(&config.store)
        .await
        .context("Failed to open state store")?;
    let referee = Referee::new(
        gateway,
        store,
        SystemClock,
        RefereeSettings::from(&config.ingestion),
    );

    run_service(referee, &config.schedule, lease_for(&config), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await
}

async fn recover(config: RefereeConfig) -> Result<()> {
    let lease = lease_for(&config);
    if let Some(lease) = &lease {
        acquire_lease(lease)
            .await
            .context("Another referee holds the lease; stop it before running recovery")?;
    }

    let client = build_client(&config, None)?;
    let gateway = TimeoutGateway::new(client, config.schedule.call_timeout());
    let store = open_store(&config.store)
        .await
        .context("Failed to open state store")?;
    let mut referee = Referee::new(
        gateway,
        store,
        SystemClock,
        RefereeSettings::from(&config.ingestion),
    );

    let result = referee.start().await;
    release_lease(lease.as_ref()).await;
    let report = result.context("Recovery failed")?;

    println!("Recovery complete");
    println!("  loaded:              {}", report.loaded);
    println!("  examined:            {}", report.examined);
    println!("  recovered:           {}", report.recovered);
    println!("  skipped (settled):   {}", report.skipped_settled);
    println!("  skipped (inactive):  {}", report.skipped_not_active);
    println!("  failed:              {}", report.failed);
    println!("  tracked now:         {}", referee.book().len());

    let status = referee.status();
    if !status.persistence_healthy {
        anyhow::bail!(
            "Recovered state could not be saved: {}",
            status.last_persist_error.unwrap_or_default()
        );
    }
    Ok(())
}

async fn status(config: &RefereeConfig, json: bool) -> Result<()> {
    if config.store.backend == StoreBackend::Memory {
        anyhow::bail!("The memory store keeps no state between processes");
    }

    let store = open_store(&config.store)
        .await
        .context("Failed to open state store")?;
    let snapshot = store.load().await.context("Failed to read state store")?;

    let now_ms = SystemClock.now_ms();
    let duels: Vec<DuelSummary> = snapshot
        .duels
        .values()
        .map(|record| DuelSummary::from_record(record, now_ms, 0))
        .collect();

    if json {
        let output = serde_json::json!({
            "store": store.describe(),
            "tracked": duels.len(),
            "processed_events": snapshot.processed.len(),
            "duels": duels,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Store: {}", store.describe());
    println!(
        "Tracked duels: {}   Processed events: {}",
        duels.len(),
        snapshot.processed.len()
    );
    if duels.is_empty() {
        return Ok(());
    }

    println!();
    println!(
        "{:<14} {:<14} {:<14} {:>20} {:>20} {:>12} {:<8}",
        "DUEL", "CREATOR", "OPPONENT", "CREATOR START", "OPPONENT START", "REMAINING", "PHASE"
    );
    for duel in &duels {
        println!(
            "{:<14} {:<14} {:<14} {:>20} {:>20} {:>12} {:<8}",
            shorten(&duel.duel_id),
            shorten(&duel.creator),
            shorten(&duel.opponent),
            duel.creator_start_balance,
            duel.opponent_start_balance,
            format_remaining(duel.remaining_ms),
            duel.phase,
        );
    }
    Ok(())
}

fn address(config: &RefereeConfig) -> Result<()> {
    let signer = AdminSigner::from_env(&config.ledger.admin_key_env)
        .with_context(|| format!("Failed to load key from {}", config.ledger.admin_key_env))?;
    println!("{}", signer.address());
    Ok(())
}

fn shorten(id: &str) -> &str {
    &id[..id.len().min(12)]
}

fn format_remaining(remaining_ms: i64) -> String {
    if remaining_ms <= 0 {
        return "due".to_string();
    }
    let secs = remaining_ms / 1000;
    format!("{}m{:02}s", secs / 60, secs % 60)
}
