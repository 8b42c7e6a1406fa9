use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lambda_streaming_runtime::{telemetry, RuntimeConfig, RuntimeLoop, WordSplitHandler};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init();

    let config = RuntimeConfig::from_env()?;
    info!(
        api = %config.api_base,
        function = %config.function_name,
        version = %config.function_version,
        "bootstrap starting"
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let mut runtime = RuntimeLoop::new(config, Arc::new(WordSplitHandler));
    runtime.run(cancel).await?;
    Ok(())
}
