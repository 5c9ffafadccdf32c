//! Worker-side command: fetch the session secret from the owning process.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use channel_mux::control::SecretClient;
use channel_mux::{Channel, LineChannel};
use color_eyre::eyre::Result as EyreResult;
use log::LevelFilter;
use serde_json::json;

use crate::logging;

/// Discriminant of the message carrying the fetched secret back to the owner
pub const SECRET_MESSAGE_TYPE: &str = "secret";

/// Ask the owner for the secret over stdin/stdout and report it as an
/// ordinary `{"type": "secret", "value": ...}` message.
pub fn request_secret(timeout: Duration, log_level: LevelFilter) -> ExitCode {
    let _logger = match logging::setup_logger(log_level, None) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: Failed to start logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(fetch_and_report(timeout));
    // The stdin reader is parked in a blocking read that cannot be cancelled
    runtime.shutdown_background();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn fetch_and_report(timeout: Duration) -> EyreResult<()> {
    let channel = Arc::new(LineChannel::stdio()?);
    let client = SecretClient::with_timeout(channel.clone(), timeout);

    let value = client.request_secret().await?;
    log::debug!("Owner answered; secret present: {}", value.is_some());
    channel.send(json!({ "type": SECRET_MESSAGE_TYPE, "value": value }))?;

    drop(client);
    if let Ok(channel) = Arc::try_unwrap(channel) {
        channel.close().await;
    }
    Ok(())
}
