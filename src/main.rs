use anyhow::{Context, Result};
use clap::Parser;
use portracker_discovery::{
    config::Config,
    host::{Host, SystemHost},
    registry::resolve_collector,
    server,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/Default.toml")]
    config: String,

    /// Force a collector (truenas, docker, system) instead of detecting one
    #[arg(long, env = "PORTRACKER_PLATFORM")]
    platform: Option<String>,

    /// Run one collection, print it as JSON and exit
    #[arg(long)]
    once: bool,

    /// TrueNAS API key (overrides config)
    #[arg(long, env = "TRUENAS_API_KEY", hide_env_values = true)]
    truenas_api_key: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long, env = "DISCOVERY_PORT")]
    port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long, env = "DISCOVERY_ADDR")]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!(
        "Starting Portracker Discovery v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();

    let mut config = Config::load(&args.config)?;

    if let Some(platform) = args.platform {
        config.collector.platform = Some(platform);
    }
    if let Some(api_key) = args.truenas_api_key.filter(|k| !k.trim().is_empty()) {
        config.truenas.api_key = Some(secrecy::SecretString::from(api_key));
    }
    config.server.apply_overrides(args.addr, args.port);

    info!("Configuration loaded successfully");
    info!(
        "TrueNAS API key: {}",
        if config.truenas.has_api_key() { "configured" } else { "not set" }
    );

    if args.once {
        let host: Arc<dyn Host> = Arc::new(SystemHost);
        let collector = resolve_collector(&config, host).await;
        let result = collector.collect_all().await;
        let json = serde_json::to_string_pretty(&result).context("Failed to encode result")?;
        println!("{}", json);
        return Ok(());
    }

    if let Err(e) = server::start(config).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
