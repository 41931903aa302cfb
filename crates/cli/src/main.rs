mod card_commands;
mod config_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    cardvault_cards::{CardPolicy, CardService, SqliteCardStore},
    cardvault_config::CardvaultConfig,
    cardvault_gateway::AppState,
    cardvault_metrics::{MetricsRecorderConfig, init_metrics},
    cardvault_vault::Vault,
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "cardvault", about = "cardvault: encrypted payment card storage")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery in ./ and the user config dir).
    #[arg(long, global = true, env = "CARDVAULT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default when no subcommand is provided).
    Serve {
        /// Address to bind to (overrides config value).
        #[arg(long)]
        bind: Option<String>,
        /// Port to listen on (overrides config value).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check a card number: Luhn checksum, brand and masked form.
    CheckCard {
        number: String,
        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        None => serve(cli.config.as_deref(), None, None).await,
        Some(Commands::Serve { bind, port }) => serve(cli.config.as_deref(), bind, port).await,
        Some(Commands::CheckCard { number, json }) => {
            card_commands::handle_check_card(&number, json)
        },
        Some(Commands::Config { action }) => {
            config_commands::handle_config(action, cli.config.as_deref())
        },
    }
}

async fn serve(
    config_path: Option<&std::path::Path>,
    bind: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "cardvault starting");

    let mut config = cardvault_config::load(config_path)?;
    // CLI args override config values
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    check_config(&config)?;

    let pool = cardvault_cards::connect(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("failed to open database {}", config.database.url))?;
    cardvault_cards::run_migrations(&pool).await?;

    let vault = Arc::new(Vault::new()?);
    info!(key_version = vault.current_version(), "vault ready");

    let service = Arc::new(CardService::new(
        Arc::new(SqliteCardStore::with_pool(pool)),
        vault,
        CardPolicy {
            min_expiry_year: config.cards.min_expiry_year,
            max_batch_workers: config.batch.max_workers,
        },
    ));
    service.startup_check().await?;

    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: Vec::new(),
    })?;

    let state = AppState::new(service, &config).with_metrics(metrics);
    cardvault_gateway::serve(&config, state).await
}

/// Refuse to start on config errors; log warnings.
fn check_config(config: &CardvaultConfig) -> anyhow::Result<()> {
    let diagnostics = cardvault_config::validate_config(config);
    let mut errors = Vec::new();
    for d in diagnostics {
        match d.severity {
            cardvault_config::Severity::Error => errors.push(d.to_string()),
            _ => warn!("{d}"),
        }
    }
    if !errors.is_empty() {
        anyhow::bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }
    Ok(())
}
