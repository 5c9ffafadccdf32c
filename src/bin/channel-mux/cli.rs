use std::{env, fs::File, io::Read, path::PathBuf};

use channel_mux::ChannelConfig;
use clap_serde_derive::{
    clap::{self, Parser, Subcommand, ValueEnum},
    serde::{self, Deserialize, Serialize},
    ClapSerde,
};
use color_eyre::eyre::{eyre, Result as EyreResult};
use expand_tilde::ExpandTilde;
use log::LevelFilter;

const APP_VERSION: &str = env!("CHANNEL_MUX_BUILD_VERSION");

/// Environment variable consulted when no token is configured
pub const TOKEN_ENV: &str = "CHANNEL_MUX_TOKEN";

fn default_config_path() -> PathBuf {
    let config_dir = env::var_os("XDG_CONFIG_HOME")
        .or_else(|| Some("~/.config".into()))
        .map(PathBuf::from)
        .and_then(|p| p.expand_tilde_owned().ok())
        .unwrap_or_else(|| PathBuf::from(".config"));

    config_dir
        .join(env!("CARGO_PKG_NAME"))
        .join(concat!(env!("CARGO_PKG_NAME"), ".toml"))
}

#[derive(Parser)]
#[command(author, version = APP_VERSION, about)]
pub struct Args {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Command {
    /// Run a worker behind the proxy, relaying its messages to stdout
    Run {
        /// Config file
        #[arg(short, long = "config", default_value_os_t = default_config_path())]
        config_path: PathBuf,

        /// Config from file or args
        #[command(flatten)]
        config: <Config as ClapSerde>::Opt,
    },

    /// Ask the owner for the session secret over stdin/stdout (worker side)
    RequestSecret {
        /// Seconds to wait for the owner's reply
        #[arg(long, default_value_t = 5)]
        timeout: u64,

        /// Log level (logs go to stderr)
        #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
        log_level: LogLevel,
    },
}

#[derive(ClapSerde, Clone, Serialize)]
pub struct Config {
    /// Log level
    #[default(LogLevel::Warn)]
    #[arg(long, value_enum)]
    pub log_level: LogLevel,

    /// Optional log file (logs to standard error, otherwise)
    #[arg(long, num_args = 1)]
    pub log_file: Option<PathBuf>,

    /// Secret handed to the worker on request
    #[arg(long)]
    pub token: Option<String>,

    /// Extra worker environment, as KEY=VALUE
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub worker_env: Vec<String>,

    /// Working directory for the worker
    #[arg(long = "cwd")]
    pub worker_dir: Option<PathBuf>,

    /// Worker program and its arguments
    #[arg()]
    pub worker: Vec<String>,

    /// Config file path (not an arg; copied from Command::Run)
    #[arg(skip)]
    #[serde(skip_deserializing, skip_serializing)]
    pub config_path: PathBuf,
}

impl Config {
    pub fn from_run_args(
        config_path: PathBuf,
        mut config_opt: <Config as ClapSerde>::Opt,
    ) -> EyreResult<Self> {
        let mut config = if let Ok(mut f) = File::open(&config_path) {
            log::info!("Read configuration from {}", config_path.display());
            let mut config_text = String::new();
            f.read_to_string(&mut config_text)?;
            let file_config = toml::from_str::<<Config as ClapSerde>::Opt>(&config_text)?;
            Config::from(file_config).merge(&mut config_opt)
        } else {
            Config::from(&mut config_opt)
        };

        config.config_path = config_path;
        config.log_file = config
            .log_file
            .map(|p| p.expand_tilde_owned())
            .transpose()?;
        config.worker_dir = config
            .worker_dir
            .map(|p| p.expand_tilde_owned())
            .transpose()?;
        if config.token.is_none() {
            config.token = env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        }

        Ok(config)
    }

    /// Split the worker command line into program and channel options
    pub fn worker_command(&self) -> EyreResult<(&str, ChannelConfig)> {
        let (program, args) = self
            .worker
            .split_first()
            .ok_or_else(|| eyre!("No worker program given (usage: channel-mux run -- PROGRAM [ARGS...])"))?;

        let env = self
            .worker_env
            .iter()
            .map(|entry| {
                entry
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| eyre!("Invalid worker environment entry {:?}, expected KEY=VALUE", entry))
            })
            .collect::<EyreResult<_>>()?;

        Ok((
            program,
            ChannelConfig {
                name: None,
                args: args.to_vec(),
                env,
                current_dir: self.worker_dir.clone(),
            },
        ))
    }
}

#[derive(ValueEnum, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    #[value(hide = true)]
    Trace = 5,
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl Args {
    pub fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }
}
