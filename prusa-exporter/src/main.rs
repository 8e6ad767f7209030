//! Prometheus exporter for Prusa printers.

use clap::Parser;
use tracing::{error, info};

use prusa_common::{init_tracing, resolve_log_level};
use prusa_exporter::{Args, Exporter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing(resolve_log_level(&args.log_level), args.log_format)?;

    info!("Starting Prusa exporter");

    let exporter = match Exporter::build(&args).await {
        Ok(exporter) => exporter,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = exporter.run().await {
        error!("Exporter stopped: {}", e);
        return Err(e.into());
    }

    Ok(())
}
