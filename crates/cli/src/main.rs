use clap::Parser;
use loomgate_common::Error;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "loomgate", about = "Bridges a chat platform to external agent entities")]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
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
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = loomgate_config::GatewayConfig::from_env().map_err(Error::from)?;

    info!(version = env!("CARGO_PKG_VERSION"), "loomgate starting");

    if let Err(e) = loomgate_gateway::run(config).await {
        error!(error = %e, "loomgate exited with error");
        return Err(e);
    }

    Ok(())
}
