//! Control Socket
//!
//! A Unix socket (mode 0600) for local tools to poke the daemon. Each
//! connection carries exactly one request line and gets one JSON reply line:
//!
//! | Request                  | Reply                                      |
//! |--------------------------|--------------------------------------------|
//! | `status_changed` / empty | `{"ok":true}` after requesting a refresh   |
//! | `status`                 | the current combined status                |
//! | anything else            | `{"ok":false,"error":"unknown command"}`   |
//!
//! Connections from other users (except root) are rejected.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use statusboard_core::{RefreshTrigger, StatusCell};

/// Request line that triggers a refresh
pub const STATUS_CHANGED: &str = "status_changed";

/// Request line that asks for the current status
pub const STATUS: &str = "status";

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_BYTES: u64 = 1024;

/// A parsed control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// The user changed their status somewhere; refresh now
    StatusChanged,
    /// Report the current status
    Status,
}

/// Request line that is not a known command
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown command")]
pub struct UnknownCommand(pub String);

impl ControlCommand {
    /// Parse one request line
    pub fn parse(line: &str) -> Result<Self, UnknownCommand> {
        match line.trim() {
            "" | STATUS_CHANGED => Ok(Self::StatusChanged),
            STATUS => Ok(Self::Status),
            other => Err(UnknownCommand(other.to_string())),
        }
    }
}

#[derive(Serialize)]
struct Ack<'a> {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

/// Build the reply line for a request
pub fn respond(line: &str, trigger: &RefreshTrigger, status: &StatusCell) -> String {
    let reply = match ControlCommand::parse(line) {
        Ok(ControlCommand::StatusChanged) => {
            let queued = trigger.request();
            debug!(queued, "Refresh requested over control socket");
            serde_json::to_string(&Ack {
                ok: true,
                error: None,
            })
        }
        Ok(ControlCommand::Status) => serde_json::to_string(status.get().as_ref()),
        Err(e) => {
            warn!(command = %e.0, "Unknown control command");
            serde_json::to_string(&Ack {
                ok: false,
                error: Some("unknown command"),
            })
        }
    };
    reply.unwrap_or_else(|e| format!(r#"{{"ok":false,"error":"{e}"}}"#))
}

/// Unix socket server for control requests
pub struct ControlServer {
    socket_path: PathBuf,
    trigger: RefreshTrigger,
    status: StatusCell,
    shutdown: watch::Receiver<bool>,
}

impl ControlServer {
    /// Create a control server
    pub fn new(
        socket_path: PathBuf,
        trigger: RefreshTrigger,
        status: StatusCell,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            socket_path,
            trigger,
            status,
            shutdown,
        }
    }

    /// Prepare the socket path (create directory, remove stale socket)
    fn prepare_socket(&self) -> Result<()> {
        if let Some(parent) = self.socket_path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create socket directory: {parent:?}"))?;
                info!(path = ?parent, "Created socket directory");
            }
        }

        if self.socket_path.exists() {
            warn!(path = ?self.socket_path, "Removing stale socket file");
            fs::remove_file(&self.socket_path).with_context(|| {
                format!("Failed to remove stale socket: {:?}", self.socket_path)
            })?;
        }

        Ok(())
    }

    /// Bind the socket with owner-only permissions
    pub fn bind(&self) -> Result<UnixListener> {
        self.prepare_socket()?;

        let listener = UnixListener::bind(&self.socket_path)
            .with_context(|| format!("Failed to bind to {:?}", self.socket_path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.socket_path, perms)?;
        }

        info!(path = ?self.socket_path, "Control socket listening");
        Ok(listener)
    }

    /// Accept requests until shutdown, then remove the socket file
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        // SAFETY: getuid has no preconditions and cannot fail
        let our_uid = unsafe { libc::getuid() };

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let stream = match accepted {
                        Ok((stream, _)) => stream,
                        Err(e) => {
                            warn!(error = %e, "Control accept failed");
                            continue;
                        }
                    };

                    if let Ok(cred) = stream.peer_cred() {
                        if cred.uid() != our_uid && cred.uid() != 0 {
                            warn!(peer_uid = cred.uid(), our_uid, "Rejecting control connection from different user");
                            continue;
                        }
                    }

                    let trigger = self.trigger.clone();
                    let status = self.status.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &trigger, &status).await {
                            debug!(error = %e, "Control connection ended with error");
                        }
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if self.socket_path.exists() {
            fs::remove_file(&self.socket_path)
                .with_context(|| format!("Failed to remove socket: {:?}", self.socket_path))?;
            info!(path = ?self.socket_path, "Control socket removed");
        }
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    trigger: &RefreshTrigger,
    status: &StatusCell,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half).take(MAX_REQUEST_BYTES);

    let mut line = String::new();
    tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .context("Timed out waiting for control request")??;

    let mut reply = respond(&line, trigger, status);
    reply.push('\n');
    write_half.write_all(reply.as_bytes()).await?;
    write_half.shutdown().await?;
    Ok(())
}

/// Send one request to a running daemon and return its reply
pub async fn send_command(socket_path: &Path, command: &str) -> Result<String> {
    let mut stream = UnixStream::connect(socket_path).await.with_context(|| {
        format!("Failed to connect to {socket_path:?}. Is the statusboard daemon running?")
    })?;

    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    stream.shutdown().await?;

    let mut reply = String::new();
    tokio::time::timeout(READ_TIMEOUT, stream.read_to_string(&mut reply))
        .await
        .context("Timed out waiting for daemon reply")??;
    Ok(reply.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use statusboard_core::{
        ClientRegistry, CombinedStatus, Conductor, ConductorConfig, PollerError, Refresher,
    };

    struct Idle;

    #[async_trait]
    impl Refresher for Idle {
        async fn refresh(&self, old: CombinedStatus) -> Result<CombinedStatus, PollerError> {
            Ok(old)
        }
    }

    fn conductor() -> Conductor<Idle> {
        Conductor::new(Idle, ClientRegistry::new(), ConductorConfig::default())
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ControlCommand::parse("status_changed\n"), Ok(ControlCommand::StatusChanged));
        assert_eq!(ControlCommand::parse(""), Ok(ControlCommand::StatusChanged));
        assert_eq!(ControlCommand::parse("  status "), Ok(ControlCommand::Status));
        assert_eq!(
            ControlCommand::parse("reboot"),
            Err(UnknownCommand("reboot".into()))
        );
    }

    #[test]
    fn test_respond_replies() {
        let conductor = conductor();
        let trigger = conductor.trigger();
        let status = conductor.status_cell();

        assert_eq!(respond("status_changed", &trigger, &status), r#"{"ok":true}"#);
        // The refresh is now pending
        assert!(!trigger.request());

        assert_eq!(
            respond("bogus", &trigger, &status),
            r#"{"ok":false,"error":"unknown command"}"#
        );

        let reply: serde_json::Value =
            serde_json::from_str(&respond("status", &trigger, &status)).unwrap();
        assert_eq!(reply["text"], "");
        assert!(reply.get("last_updated_at").is_none());
    }

    #[tokio::test]
    async fn test_socket_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("run").join("control.sock");
        let conductor = conductor();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server = ControlServer::new(
            socket_path.clone(),
            conductor.trigger(),
            conductor.status_cell(),
            shutdown_rx,
        );
        let listener = server.bind().unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&socket_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let task = tokio::spawn(async move { server.serve(listener).await });

        let reply = send_command(&socket_path, STATUS_CHANGED).await.unwrap();
        assert_eq!(reply, r#"{"ok":true}"#);

        let reply = send_command(&socket_path, "nope").await.unwrap();
        assert_eq!(reply, r#"{"ok":false,"error":"unknown command"}"#);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(!socket_path.exists());
    }
}
