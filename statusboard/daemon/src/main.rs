//! Statusboard - Status Display Daemon
//!
//! Polls chat presence and home automation sources, resolves them against
//! the rule file, and streams the combined status to display clients over
//! WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Run the daemon with the default config
//! statusboard daemon
//!
//! # Custom rule file and listen address, debug logging
//! statusboard daemon --rules ~/rules.md --listen 0.0.0.0:8765 --verbose
//!
//! # Tell a running daemon to refresh now
//! statusboard notify
//!
//! # Set the work account status for an hour
//! statusboard set-status --account work --emoji :car: --text Driving --expires-in-mins 60
//! ```
//!
//! # Files
//!
//! - Config: `$XDG_CONFIG_HOME/statusboard/config.toml`
//! - Control socket: `$XDG_RUNTIME_DIR/statusboard/control.sock` (or `/tmp/statusboard-$UID/`)
//! - PID file: `$XDG_RUNTIME_DIR/statusboard/statusboard.pid` (or `/tmp/statusboard-$UID/`)
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown (removes PID file and socket)

mod control;
mod server;

use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use statusboard_core::{
    default_config_path, default_runtime_dir, load_config_from_path, load_rules, PresenceProvider,
    SlackPresenceProvider, SourceStatus, StatusboardConfig,
};

use server::DaemonServer;

/// Statusboard - combined status display daemon
#[derive(Parser, Debug)]
#[command(name = "statusboard")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, global = true, env = "STATUSBOARD_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daemon in the foreground
    Daemon {
        /// Rule file path (overrides config)
        #[arg(short = 'r', long, value_name = "PATH")]
        rules: Option<PathBuf>,

        /// WebSocket listen address (overrides config)
        #[arg(short = 'l', long, value_name = "ADDR")]
        listen: Option<SocketAddr>,

        /// Debug logging
        #[arg(short = 'v', long)]
        verbose: bool,
    },

    /// Ask a running daemon to refresh now
    Notify,

    /// Print the running daemon's current status
    Status,

    /// Parse a rule file and print its rules in match order
    CheckRules {
        /// Rule file to check
        path: PathBuf,
    },

    /// Set a chat account's status, then notify the daemon
    SetStatus {
        /// Which account to update
        #[arg(short = 'a', long, value_enum)]
        account: Account,

        /// Status emoji (e.g. `:car:`)
        #[arg(short = 'e', long, default_value = "")]
        emoji: String,

        /// Status text
        #[arg(short = 't', long, default_value = "")]
        text: String,

        /// Clear the status after this many minutes
        #[arg(long, value_name = "MINS")]
        expires_in_mins: Option<i64>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Account {
    Work,
    Home,
}

impl Account {
    fn name(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::Home => "home",
        }
    }
}

/// Get the default PID file path
fn default_pid_path() -> PathBuf {
    default_runtime_dir().join("statusboard.pid")
}

/// Write PID file
fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create PID directory: {parent:?}"))?;
    }

    let pid = std::process::id();
    let mut file =
        fs::File::create(path).with_context(|| format!("Failed to create PID file: {path:?}"))?;
    writeln!(file, "{pid}")?;

    info!(pid = pid, path = ?path, "PID file created");
    Ok(())
}

/// Remove PID file
fn remove_pid_file(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(error = %e, path = ?path, "Failed to remove PID file");
        } else {
            info!(path = ?path, "PID file removed");
        }
    }
}

/// Refuse to start if the PID file names a live process
fn check_existing_daemon(pid_path: &Path) -> Result<()> {
    if !pid_path.exists() {
        return Ok(());
    }

    let pid_str = fs::read_to_string(pid_path)
        .with_context(|| format!("Failed to read PID file: {pid_path:?}"))?;
    let pid: i32 = pid_str.trim().parse().context("Invalid PID in file")?;

    // SAFETY: signal 0 only checks that the process exists
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        anyhow::bail!(
            "Another statusboard daemon is already running (PID: {pid}). \
             Stop it first or remove {pid_path:?} if it's stale."
        );
    }

    warn!(pid = pid, "Removing stale PID file");
    fs::remove_file(pid_path)?;
    Ok(())
}

/// Initialize logging
fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("statusboard={level}").parse()?)
                .add_directive(format!("statusboard_core={level}").parse()?),
        )
        .with_target(true)
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<StatusboardConfig> {
    let path = path.map(Path::to_path_buf).or_else(default_config_path);
    load_config_from_path(path.as_deref()).context("Failed to load configuration")
}

/// Flip `shutdown` on SIGTERM or SIGINT
fn spawn_signal_handler(shutdown: watch::Sender<bool>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
        }
        let _ = shutdown.send(true);
    });
    Ok(())
}

async fn run_daemon(
    config_path: Option<&Path>,
    rules: Option<PathBuf>,
    listen: Option<SocketAddr>,
    verbose: bool,
) -> Result<()> {
    init_logging(verbose)?;

    info!("Statusboard daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(config_path)?;
    if let Some(rules) = rules {
        config.rules.path = rules;
    }
    if let Some(listen) = listen {
        config.server.listen_addr = listen;
    }

    let pid_path = default_pid_path();
    check_existing_daemon(&pid_path)?;
    write_pid_file(&pid_path)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Err(e) = spawn_signal_handler(shutdown_tx) {
        remove_pid_file(&pid_path);
        return Err(e);
    }

    let result = DaemonServer::new(config).run(shutdown_rx).await;

    info!("Shutting down...");
    remove_pid_file(&pid_path);

    if let Err(ref e) = result {
        error!(error = %e, "Daemon exited with error");
    }
    result
}

async fn set_status(
    config: &StatusboardConfig,
    account: Account,
    emoji: String,
    text: String,
    expires_in_mins: Option<i64>,
) -> Result<()> {
    let account_config = match account {
        Account::Work => &config.slack.work,
        Account::Home => &config.slack.home,
    };
    let provider = SlackPresenceProvider::from_config(account.name(), account_config)?;

    let expiration = expires_in_mins
        .filter(|mins| *mins > 0)
        .map_or(0, |mins| chrono::Utc::now().timestamp() + mins * 60);
    provider
        .set_status(&SourceStatus::new(emoji, text, expiration))
        .await
        .with_context(|| format!("Failed to set {} status", account.name()))?;
    println!("Updated {} status", account.name());

    match control::send_command(&config.server.control_socket, control::STATUS_CHANGED).await {
        Ok(_) => println!("Daemon notified"),
        Err(e) => eprintln!("Daemon not notified: {e:#}"),
    }
    Ok(())
}

fn check_rules(path: &Path) -> Result<()> {
    let rules = load_rules(path).with_context(|| format!("Invalid rule file {path:?}"))?;
    println!("{} rule(s) in match order:", rules.len());
    for (i, rule) in rules.iter().enumerate() {
        let field = |f: &Option<String>| f.clone().unwrap_or_else(|| "-".to_string());
        println!(
            "{:>3}. work[{} {}] home[{} {}] => {} {}",
            i + 1,
            field(&rule.work_emoji),
            field(&rule.work_presence),
            field(&rule.home_emoji),
            field(&rule.home_presence),
            rule.display_emoji,
            rule.display_text,
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        Command::Daemon {
            rules,
            listen,
            verbose,
        } => run_daemon(config_path, rules, listen, verbose).await,
        Command::Notify => {
            let config = load_config(config_path)?;
            let reply =
                control::send_command(&config.server.control_socket, control::STATUS_CHANGED)
                    .await?;
            println!("{reply}");
            Ok(())
        }
        Command::Status => {
            let config = load_config(config_path)?;
            let reply =
                control::send_command(&config.server.control_socket, control::STATUS).await?;
            println!("{reply}");
            Ok(())
        }
        Command::CheckRules { path } => check_rules(&path),
        Command::SetStatus {
            account,
            emoji,
            text,
            expires_in_mins,
        } => {
            let config = load_config(config_path)?;
            set_status(&config, account, emoji, text, expires_in_mins).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_daemon_args() {
        let args = Args::parse_from([
            "statusboard",
            "daemon",
            "--rules",
            "/tmp/rules.md",
            "--listen",
            "0.0.0.0:9000",
            "-v",
        ]);
        match args.command {
            Command::Daemon {
                rules,
                listen,
                verbose,
            } => {
                assert_eq!(rules, Some(PathBuf::from("/tmp/rules.md")));
                assert_eq!(listen, Some("0.0.0.0:9000".parse().unwrap()));
                assert!(verbose);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_set_status() {
        let args = Args::parse_from([
            "statusboard",
            "set-status",
            "--account",
            "home",
            "--emoji",
            ":car:",
            "--text",
            "Driving",
            "--expires-in-mins",
            "30",
        ]);
        match args.command {
            Command::SetStatus {
                account,
                emoji,
                text,
                expires_in_mins,
            } => {
                assert_eq!(account, Account::Home);
                assert_eq!(emoji, ":car:");
                assert_eq!(text, "Driving");
                assert_eq!(expires_in_mins, Some(30));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_invalid_account_rejected() {
        let result = Args::try_parse_from(["statusboard", "set-status", "--account", "office"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_pid_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run").join("statusboard.pid");

        write_pid_file(&path).unwrap();
        let written: u32 = fs::read_to_string(&path).unwrap().trim().parse().unwrap();
        assert_eq!(written, std::process::id());

        // Our own PID is alive
        assert!(check_existing_daemon(&path).is_err());

        remove_pid_file(&path);
        assert!(!path.exists());
        assert!(check_existing_daemon(&path).is_ok());
    }

    #[test]
    fn test_check_rules_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_rules(&dir.path().join("missing.md")).is_err());
    }
}
