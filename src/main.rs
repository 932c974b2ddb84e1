mod channel_file;
mod command;
mod config;
mod executor;
mod injectors;
mod lifecycle;
mod signals;
mod watcher;

use clap::Parser;
use command::{parse_line, ParsedLine};
use config::{InjectorKind, KeyfeedConfig};
use executor::KeyHoldExecutor;
use lifecycle::{ChannelController, StopOutcome};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Drive a running application by writing `KEY,DURATION` lines to a shared
/// command file: a background watcher picks up each new batch, holds every
/// key for its duration in order, then clears the file.
#[derive(Parser, Debug)]
#[command(name = "keyfeed", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "keyfeed.toml")]
    config: PathBuf,

    /// Command file to watch (overrides config)
    #[arg(long)]
    command_file: Option<PathBuf>,

    /// Poll interval in seconds (overrides config)
    #[arg(long)]
    check_interval: Option<f64>,

    /// Key injector backend (overrides config)
    #[arg(long, value_enum)]
    injector: Option<InjectorKind>,

    /// Seconds to wait for the watcher to exit on shutdown (overrides config)
    #[arg(long)]
    stop_timeout: Option<f64>,

    /// Write a command batch to the command file and exit; repeat for
    /// multiple lines (e.g. --send W,1 --send A,0.5)
    #[arg(long, value_name = "KEY,DURATION")]
    send: Vec<String>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-command parse and injector details)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Errors from `--send`.
#[derive(Debug)]
enum SendError {
    Invalid { line: String, reason: command::ParseError },
    Empty,
    File(channel_file::ChannelFileError),
}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendError::Invalid { line, reason } => {
                write!(f, "refusing to send invalid command '{line}': {reason}")
            }
            SendError::Empty => write!(f, "nothing to send: no valid commands given"),
            SendError::File(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SendError::Invalid { reason, .. } => Some(reason),
            SendError::Empty => None,
            SendError::File(e) => Some(e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = KeyfeedConfig::load(&cli.config)?;
    apply_overrides(&mut config, &cli);
    config.validate()?;

    if !cli.send.is_empty() {
        let sent = send_batch(&config.channel.command_file, &cli.send)?;
        println!(
            "Sent {sent} command(s) to {}",
            config.channel.command_file.display()
        );
        return Ok(());
    }

    if cli.dry_run {
        print_settings(&cli.config, &config);
        println!("Dry run mode: config validated, not running.");
        return Ok(());
    }

    run(config).await
}

fn init_tracing(cli: &Cli) {
    let default_level = if cli.verbose {
        "keyfeed=debug"
    } else if cli.quiet {
        "keyfeed=warn"
    } else {
        "keyfeed=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// CLI flags win over the config file.
fn apply_overrides(config: &mut KeyfeedConfig, cli: &Cli) {
    if let Some(path) = &cli.command_file {
        config.channel.command_file = path.clone();
    }
    if let Some(secs) = cli.check_interval {
        config.channel.check_interval_secs = secs;
    }
    if let Some(kind) = cli.injector {
        config.injector.kind = kind;
    }
    if let Some(secs) = cli.stop_timeout {
        config.shutdown.stop_timeout_secs = secs;
    }
}

fn print_settings(config_path: &Path, config: &KeyfeedConfig) {
    println!("keyfeed v{}", env!("CARGO_PKG_VERSION"));
    println!("Config file:    {}", config_path.display());
    println!("Command file:   {}", config.channel.command_file.display());
    println!("Check interval: {}s", config.channel.check_interval_secs);
    println!("Grace period:   {}ms", config.channel.grace_period_ms);
    println!("Injector:       {:?}", config.injector.kind);
    if config.injector.kind == InjectorKind::Command {
        println!(
            "  down: {} {}",
            config.injector.program,
            config.injector.down_args.join(" ")
        );
        println!(
            "  up:   {} {}",
            config.injector.program,
            config.injector.up_args.join(" ")
        );
    }
    println!("Stop timeout:   {}s", config.shutdown.stop_timeout_secs);
    if let Some(stop) = &config.shutdown.stop_file {
        println!("Stop file:      {}", stop.display());
    }
}

/// Validate every line, then replace the command file with the batch.
/// Returns the number of commands written.
fn send_batch(path: &Path, lines: &[String]) -> Result<usize, SendError> {
    let mut commands = 0;
    for line in lines {
        match parse_line(line) {
            ParsedLine::Command(_) => commands += 1,
            ParsedLine::Skip => {}
            ParsedLine::Reject(reason) => {
                return Err(SendError::Invalid {
                    line: line.clone(),
                    reason,
                })
            }
        }
    }
    if commands == 0 {
        return Err(SendError::Empty);
    }

    channel_file::ensure_exists(path).map_err(SendError::File)?;
    channel_file::write_batch(path, lines).map_err(SendError::File)?;
    tracing::info!(path = %path.display(), commands, "sent command batch");
    Ok(commands)
}

async fn run(config: KeyfeedConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("keyfeed starting");
    if let Some(stop) = &config.shutdown.stop_file {
        signals::clear_stale_stop_file(stop);
    }

    let executor = KeyHoldExecutor::new(injectors::from_config(&config.injector));
    let mut controller = ChannelController::new(
        config.channel.clone(),
        config.shutdown.stop_timeout(),
        executor,
    );
    controller.start()?;

    let reason = signals::wait_for_shutdown(config.shutdown.stop_file.as_deref()).await;
    tracing::info!(%reason, "shutdown requested");

    match controller.stop().await {
        StopOutcome::TimedOut => {
            tracing::warn!("exiting with watcher still running");
        }
        StopOutcome::Stopped | StopOutcome::NotRunning => {}
    }
    tracing::info!("keyfeed stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("keyfeed").chain(args.iter().copied()))
    }

    #[test]
    fn test_cli_defaults() {
        let cli = cli(&[]);
        assert_eq!(cli.config, PathBuf::from("keyfeed.toml"));
        assert!(cli.send.is_empty());
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_cli_send_keeps_commas() {
        let cli = cli(&["--send", "W,1", "--send", "A,0.5"]);
        assert_eq!(cli.send, vec!["W,1", "A,0.5"]);
    }

    #[test]
    fn test_cli_verbose_and_quiet_conflict() {
        let result = Cli::try_parse_from(["keyfeed", "-v", "-q"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_overrides() {
        let cli = cli(&[
            "--command-file",
            "/tmp/cmds.txt",
            "--check-interval",
            "0.1",
            "--injector",
            "command",
            "--stop-timeout",
            "5",
        ]);
        let mut config = KeyfeedConfig::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.channel.command_file, PathBuf::from("/tmp/cmds.txt"));
        assert_eq!(config.channel.check_interval_secs, 0.1);
        assert_eq!(config.injector.kind, InjectorKind::Command);
        assert_eq!(config.shutdown.stop_timeout_secs, 5.0);
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let mut config = KeyfeedConfig::default();
        apply_overrides(&mut config, &cli(&[]));
        assert_eq!(
            config.channel.command_file,
            PathBuf::from("frames/commands.txt")
        );
        assert_eq!(config.channel.check_interval_secs, 0.5);
    }

    #[test]
    fn test_send_batch_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames").join("commands.txt");
        let lines = vec!["W,0.5".to_string()];
        assert_eq!(send_batch(&path, &lines).unwrap(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "W,0.5\n");
    }

    #[test]
    fn test_send_batch_rejects_invalid_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.txt");
        let lines = vec!["W,1".to_string(), "ZZZ".to_string()];
        let err = send_batch(&path, &lines).unwrap_err();
        assert!(matches!(err, SendError::Invalid { .. }));
        assert!(err.to_string().contains("ZZZ"));
        assert!(!path.exists());
    }

    #[test]
    fn test_send_batch_needs_a_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("commands.txt");
        let lines = vec!["# only a comment".to_string()];
        assert!(matches!(
            send_batch(&path, &lines).unwrap_err(),
            SendError::Empty
        ));
    }
}
