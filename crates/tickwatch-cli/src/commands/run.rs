use serde_json::json;
use tickwatch_core::Engine;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::CliError;

use super::CommandResult;

/// Run the engine until Ctrl-C.
pub async fn run(engine: &Engine) -> Result<CommandResult, CliError> {
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(error) => warn!(error = %error, "cannot listen for Ctrl-C, shutting down"),
        }
        signal.cancel();
    });

    engine.run(shutdown).await;
    CommandResult::ok(json!({ "stopped": true }))
}
