use clap::Parser;
use tracing::info;

use pricewatch_app::{AppConfig, Application};
use pricewatch_telemetry::init_logging;

#[derive(Parser, Debug)]
#[command(version, about = "Offline-resilient market data companion", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let args = Args::parse();
    info!("Starting pricewatch v{}", env!("CARGO_PKG_VERSION"));

    let config = match args.config {
        Some(path) => AppConfig::from_file(&path)?,
        None => AppConfig::load()?,
    };

    let app = Application::new(config).await?;
    app.run().await?;
    Ok(())
}
