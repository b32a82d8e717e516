use anyhow::Result;
use odm_gateway::{GatewayConfig, run};

#[tokio::main]
async fn main() -> Result<()> {
    odm_telemetry::install("odm-gateway")?;
    let config = GatewayConfig::from_env();
    run(config).await
}
