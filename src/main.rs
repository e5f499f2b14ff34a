use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pitboard::{
    cache::{HotTier, WarmTier},
    config::Config,
    database::Database,
    models::RaceSelector,
    services::{
        provider::StaticScheduleProvider, RefreshService, Resolver, ScheduleProvider,
        SnapshotStore,
    },
};

#[derive(Parser)]
#[command(name = "pitboard")]
#[command(version = "0.1.0")]
#[command(about = "Race weekend e-ink calendar service with tiered bitmap caching")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the refresh scheduler daemon
    Run,
    /// Run one refresh cycle and exit (operational recovery)
    Refresh,
    /// Resolve one variant and write the raster to a file
    Render {
        /// Locale code
        #[arg(short, long, default_value = "en")]
        locale: String,

        /// IANA timezone identifier
        #[arg(short, long, default_value = "Europe/Prague")]
        timezone: String,

        /// Season year (requires --round)
        #[arg(long)]
        year: Option<i32>,

        /// Round number (requires --year)
        #[arg(long)]
        round: Option<u32>,

        /// Output file path
        #[arg(short, long, default_value = "calendar.bmp")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("pitboard={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting pitboard v{}", env!("CARGO_PKG_VERSION"));

    std::env::set_var("CONFIG_FILE", &cli.config);
    let mut config = Config::load()?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }
    info!("Using database: {}", config.database.url);

    let database = Database::new(&config.database).await?;
    database.migrate().await?;

    let store = Arc::new(SnapshotStore::new(config.storage.snapshot_path.clone()));
    let provider: Arc<dyn ScheduleProvider> = Arc::new(StaticScheduleProvider::new(store));

    let hot = HotTier::new(config.cache.hot_capacity);
    let warm = WarmTier::new(
        config.storage.raster_path.clone(),
        &config.storage.raster_prefix,
        &config.locales.default_timezone,
    );
    warm.ensure_storage_dir().await?;

    let refresh_service = Arc::new(RefreshService::new(
        database.clone(),
        warm.clone(),
        hot.clone(),
        provider.clone(),
        config.locales.clone(),
        config.popularity.clone(),
        config.scheduler.clone(),
    ));

    match cli.command {
        Command::Run => {
            refresh_service.start().await?;
        }
        Command::Refresh => {
            let outcome = refresh_service.refresh().await?;
            info!(
                "Refresh finished: {} generated, {} evicted",
                outcome.generated, outcome.evicted
            );
        }
        Command::Render {
            locale,
            timezone,
            year,
            round,
            output,
        } => {
            provider
                .reload()
                .await
                .map_err(|e| anyhow::anyhow!("snapshot reload failed: {e}"))?;

            let selector = match (year, round) {
                (Some(season), Some(round)) => RaceSelector::Round { season, round },
                (None, None) => RaceSelector::Next,
                _ => anyhow::bail!("--year and --round must be given together"),
            };

            let resolver = Resolver::new(
                hot,
                warm,
                database,
                provider,
                config.locales.supported.clone(),
                config.locales.default_locale.clone(),
                Duration::from_secs(config.provider.timeout_seconds),
            );

            let raster = match resolver.resolve(&locale, &timezone, selector).await {
                Ok(raster) => raster,
                Err(e) => {
                    tracing::error!("Resolve failed, writing error raster: {}", e);
                    resolver.error_raster(&e.to_string())
                }
            };
            tokio::fs::write(&output, raster.as_bytes()).await?;
            info!("Wrote {} bytes to {}", raster.len(), output);
        }
    }

    Ok(())
}
