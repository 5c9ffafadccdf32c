use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use channel_mux::control::SECRET_KEY;
use channel_mux::{
    Channel, ChannelFactory, EventKind, Observer, ProcessFactory, ProxyFactory, Session,
    SessionStore,
};
use color_eyre::eyre::Result as EyreResult;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::signal::{self, unix::SignalKind};
use tokio::sync::mpsc;

mod cli;
mod commands;
mod logging;

const BUILD_VERSION: &str = env!("CHANNEL_MUX_BUILD_VERSION");
const GIT_DESCRIBE: &str = env!("CHANNEL_MUX_GIT_DESCRIBE");

#[cfg(debug_assertions)]
fn install_eyre_hook() -> EyreResult<()> {
    color_eyre::config::HookBuilder::default()
        .display_env_section(true)
        .install()
}

#[cfg(not(debug_assertions))]
fn install_eyre_hook() -> EyreResult<()> {
    color_eyre::config::HookBuilder::default()
        .display_env_section(false)
        .install()
}

fn main() -> ExitCode {
    // Install eyre hook for nice error formatting
    if let Err(e) = install_eyre_hook() {
        eprintln!("Failed to install error hook: {}", e);
        return ExitCode::FAILURE;
    }

    let args = cli::Args::parse();

    match args.command {
        cli::Command::RequestSecret { timeout, log_level } => {
            commands::request_secret(Duration::from_secs(timeout), log_level.into())
        }
        cli::Command::Run {
            config_path,
            config,
        } => match cli::Config::from_run_args(config_path, config).and_then(run_owner) {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {:?}", e);
                ExitCode::FAILURE
            }
        },
    }
}

fn run_owner(config: cli::Config) -> EyreResult<ExitCode> {
    // LoggerHandle must be held until program termination so file logging takes place
    let _logger = logging::setup_logger(config.log_level.into(), config.log_file.as_deref())?;
    log::info!(
        "Starting channel-mux version {}; commit {}",
        BUILD_VERSION,
        GIT_DESCRIBE
    );
    log::debug!("Configuration file: {}", config.config_path.display());

    // A single thread is plenty: every inbound message is handled to completion
    // before the next, so there is nothing to parallelise
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(supervise(&config));
    // The stdin relay may be parked in a blocking read that cannot be cancelled
    runtime.shutdown_background();
    result
}

async fn supervise(config: &cli::Config) -> EyreResult<ExitCode> {
    let (program, channel_config) = config.worker_command()?;

    // Clears the secret when the worker session ends
    let session = Session::new(SessionStore::shared());
    match &config.token {
        Some(token) => session.store().set(SECRET_KEY, token.clone())?,
        None => log::warn!(
            "No token configured (--token or {}); secret requests will get null",
            cli::TOKEN_ENV
        ),
    }

    let factory = ProxyFactory::new(ProcessFactory::new(), session.store());
    let worker = Arc::new(factory.create(program, Some(&channel_config))?);

    worker.set_handler(Some(Observer::new(|event| {
        let mut stdout = std::io::stdout().lock();
        serde_json::to_writer(&mut stdout, &event.data)?;
        stdout.write_all(b"\n")?;
        stdout.flush()?;
        Ok(())
    })));
    worker.subscribe(
        EventKind::Error,
        Observer::infallible(|event| log::warn!("Worker channel error: {}", event.data)),
    );

    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
    worker.subscribe(
        EventKind::Exit,
        Observer::infallible(move |event| {
            let _ = exit_tx.send(event.data["code"].as_i64());
        }),
    );

    tokio::spawn(relay_stdin(worker.clone()));

    let mut sigterm = signal::unix::signal(SignalKind::terminate())?;

    select! {
        code = exit_rx.recv() => Ok(exit_code(code.flatten())),
        // Dropping the worker channel kills a worker that is still running
        _ = signal::ctrl_c() => { log::info!("Exiting on SIGINT"); Ok(ExitCode::SUCCESS) },
        Some(_) = sigterm.recv() => { log::info!("Exiting on SIGTERM"); Ok(ExitCode::SUCCESS) },
    }
}

/// Forward JSON lines from our stdin to the worker
async fn relay_stdin<C: Channel>(worker: Arc<C>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let message = serde_json::from_str(line)
                    .unwrap_or_else(|_| Value::String(line.to_string()));
                if let Err(e) = worker.send(message) {
                    log::warn!("Stopped relaying stdin: {}", e);
                    break;
                }
            }
            Ok(None) => {
                log::debug!("Stdin closed, no more input for the worker");
                break;
            }
            Err(e) => {
                log::warn!("Failed to read stdin: {}", e);
                break;
            }
        }
    }
}

fn exit_code(code: Option<i64>) -> ExitCode {
    match code.map(u8::try_from) {
        Some(Ok(code)) => ExitCode::from(code),
        Some(Err(_)) | None => ExitCode::FAILURE,
    }
}
