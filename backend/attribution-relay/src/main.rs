use anyhow::{Context, Result};
use attribution_relay::config::LoggingConfig;
use attribution_relay::services::TrackerClient;
use attribution_relay::warehouse::ClickHouseWarehouse;
use attribution_relay::{run_once, Config, RunContext};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let logging = LoggingConfig::from_env().context("Invalid logging configuration")?;
    init_tracing(&logging);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting attribution-relay run");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.log_config();

    let tracker = TrackerClient::new(&config.tracker).context("Failed to build tracker client")?;
    let warehouse = ClickHouseWarehouse::new(&config.clickhouse);

    let ctx = RunContext::open(config)
        .await
        .context("Failed to open cache database")?;

    let outcome = run_once(&ctx, &warehouse, &tracker).await;
    ctx.close().await;

    match outcome.context("Attribution relay run failed")? {
        Some(summary) => summary.log(),
        None => tracing::info!("Nothing to forward"),
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let default_filter = if logging.debug {
        "debug,sqlx=warn,hyper=info"
    } else {
        "info,attribution_relay=info"
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
