//! Bus Workbench - Main Entry Point

use tracing::info;
use workbench::{init_logging, run, AppConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "workbench.toml".to_string());
    let config = AppConfig::load(&path)?;
    init_logging(&config.log_level)?;

    info!("=== Bus Workbench v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Polling group '{}' on a simulated bus", config.group.name);

    run(config).await?;

    Ok(())
}
