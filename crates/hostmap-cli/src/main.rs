//! hostmap CLI
//!
//! Runs one command, or copies one file, on a group of hosts over SSH

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use eyre::WrapErr;
use hostmap_exec::{
    CredentialInputs, DialOptions, Fanout, FanoutOptions, LocalConnector, UserEnv,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod hosts;
mod output;

use config::Config;
use hosts::HostSelection;
use output::Format;

/// Buffered outcome records between host tasks and the printer
const CHANNEL_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "hostmap", version)]
#[command(about = "Run a command or copy a file on many hosts over SSH", long_about = None)]
struct Cli {
    /// Remote user (default: current login name)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Private key path (default: ~/.ssh/id_rsa)
    #[arg(short = 'i', long, global = true)]
    key: Option<String>,

    /// SSH port (default: $PORT, then 22)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Maximum hosts in flight (default: all at once)
    #[arg(short, long, global = true)]
    concurrency: Option<usize>,

    /// Connect timeout in seconds (default: none)
    #[arg(long, global = true)]
    connect_timeout: Option<u64>,

    /// Run against this machine instead of connecting over SSH
    #[arg(long, global = true)]
    local: bool,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Result output format
    #[arg(long, value_enum, default_value_t = Format::Text, global = true)]
    output: Format,

    /// Log level (default: config `log_level`, then warn; overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a command on every host
    Run {
        #[command(flatten)]
        select: HostSelection,

        /// Command line to run, passed to the remote shell as one string
        #[arg(allow_hyphen_values = true)]
        command: String,
    },
    /// Copy a local file into a remote directory on every host
    Copy {
        #[command(flatten)]
        select: HostSelection,

        /// Local file to send
        local_path: PathBuf,

        /// Remote directory to place it in
        remote_dir: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only results
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr),
            )
            .init(),
    }
}

fn build_fanout(cli: &Cli, config: &Config) -> Result<Fanout> {
    let defaults = &config.defaults;

    let mut options = FanoutOptions::default();
    if let Some(limit) = cli.concurrency.or(defaults.concurrency) {
        options = options.with_concurrency_limit(limit);
    }

    if cli.local {
        return Ok(Fanout::new(Arc::new(LocalConnector::new()), options));
    }

    let mut dial = DialOptions::default();
    if let Some(secs) = cli.connect_timeout.or(defaults.connect_timeout) {
        dial = dial.with_connect_timeout(Duration::from_secs(secs));
    }

    let inputs = CredentialInputs::new(
        cli.user.clone().unwrap_or_else(|| defaults.user.clone()),
        cli.key.clone().unwrap_or_else(|| defaults.key.clone()),
    );
    let port = cli.port.clone().unwrap_or_else(|| defaults.port.clone());

    Fanout::ssh(&inputs, &port, &UserEnv::from_process(), dial, options)
        .wrap_err("cannot prepare SSH credential")
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let cli = Cli::parse();

    let config = Config::load_default(cli.config.as_deref())?;
    init_tracing(
        config.defaults.log_level(cli.log_level.as_deref()),
        cli.log_format,
    );
    match &config.source {
        Some(path) => debug!(path = %path.display(), "loaded config"),
        None => warn!("no config file found, using defaults"),
    }

    let fanout = build_fanout(&cli, &config)?;

    let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);
    let hosts = match &cli.command {
        Commands::Run { select, command } => {
            let hosts = select.resolve(&config)?;
            fanout.map_command(&hosts, command, &tx);
            hosts
        }
        Commands::Copy {
            select,
            local_path,
            remote_dir,
        } => {
            let hosts = select.resolve(&config)?;
            fanout.map_transfer(&hosts, local_path, remote_dir, &tx);
            hosts
        }
    };
    drop(tx);

    let mut failed = 0usize;
    let mut received = 0usize;
    let mut stdout = io::stdout().lock();
    while received < hosts.len() {
        let Some(record) = rx.recv().await else {
            break;
        };
        received += 1;
        if !record.is_success() {
            failed += 1;
        }
        output::write_record(&mut stdout, &record, cli.output)?;
    }
    stdout.flush()?;

    info!(hosts = hosts.len(), received, failed, "fan-out complete");

    if failed > 0 || received < hosts.len() {
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_keeps_command_string_intact() {
        let cli = Cli::try_parse_from([
            "hostmap",
            "run",
            "--hosts",
            "web1,web2",
            "grep -c 'a b' /etc/hosts",
        ])
        .unwrap();

        let Commands::Run { select, command } = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(command, "grep -c 'a b' /etc/hosts");
        assert_eq!(select.hosts, ["web1", "web2"]);
    }

    #[test]
    fn test_run_accepts_leading_dash_command() {
        let cli = Cli::try_parse_from(["hostmap", "run", "--hosts", "a", "--", "-x"]).unwrap();
        let Commands::Run { command, .. } = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(command, "-x");
    }

    #[test]
    fn test_run_rejects_split_command() {
        let err = Cli::try_parse_from(["hostmap", "run", "--hosts", "a", "uptime", "now"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_log_level_flag_is_optional() {
        let cli = Cli::try_parse_from(["hostmap", "copy", "--hosts", "a", "f.txt", "/tmp"]).unwrap();
        assert!(cli.log_level.is_none());

        let cli = Cli::try_parse_from([
            "hostmap",
            "--log-level",
            "debug",
            "copy",
            "--hosts",
            "a",
            "f.txt",
            "/tmp",
        ])
        .unwrap();
        assert_eq!(Config::default().defaults.log_level(cli.log_level.as_deref()), "debug");
    }
}
