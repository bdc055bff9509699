//! Daemon Server
//!
//! Wires the core pieces together: rule store and watcher, the poller
//! thread, the conductor loop, the WebSocket stream server and the control
//! socket. Everything stops when the shutdown channel flips to true.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use statusboard_core::{
    ClientRegistry, ConditionStore, Conductor, ConductorConfig, EmojiRenderer,
    HomeAssistantProvider, PollSources, Poller, PtoRewrite, RuleWatcher, SlackPresenceProvider,
    StatusboardConfig, StreamServer,
};

use crate::control::ControlServer;

/// Build the three poll sources from config
pub fn build_sources(config: &StatusboardConfig) -> Result<PollSources> {
    let work = SlackPresenceProvider::from_config("work", &config.slack.work)
        .context("Failed to create work Slack provider")?;
    let home = SlackPresenceProvider::from_config("home", &config.slack.home)
        .context("Failed to create home Slack provider")?;
    let house = HomeAssistantProvider::from_config(&config.home_assistant)
        .context("Failed to create Home Assistant provider")?;

    info!(
        work = work.is_enabled(),
        home = home.is_enabled(),
        home_assistant = house.is_enabled(),
        "Status sources configured"
    );

    Ok(PollSources {
        work: Arc::new(work),
        home: Arc::new(home),
        house: Arc::new(house),
    })
}

/// The statusboard daemon
pub struct DaemonServer {
    config: StatusboardConfig,
}

impl DaemonServer {
    /// Create a daemon from a validated config
    pub fn new(config: StatusboardConfig) -> Self {
        Self { config }
    }

    /// Run until `shutdown` flips to true
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let config = self.config;

        let store = Arc::new(ConditionStore::open(&config.rules.path));
        info!(
            path = ?store.path(),
            rules = store.snapshot().len(),
            "Condition store opened"
        );

        let mut poller = Poller::new(build_sources(&config)?, Arc::clone(&store))
            .with_retry(config.sources.retry_policy());
        if config.hooks.pto_rewrite {
            poller = poller.with_hook(Box::new(PtoRewrite));
        }
        let poller = poller.spawn().context("Failed to start poller thread")?;

        let registry = ClientRegistry::new();
        let conductor = Conductor::new(
            poller,
            registry.clone(),
            ConductorConfig::from(&config.poll),
        )
        .with_renderer(Arc::new(EmojiRenderer));
        let trigger = conductor.trigger();
        let status = conductor.status_cell();

        let reload_trigger = trigger.clone();
        let mut watcher = RuleWatcher::start(Arc::clone(&store), config.rules.debounce(), move || {
            reload_trigger.request();
        });

        let stream_server = StreamServer::new(
            &config.server,
            registry,
            status.clone(),
            conductor.renderer(),
            shutdown.clone(),
        );
        let (listener, addr) = stream_server
            .bind()
            .await
            .with_context(|| format!("Failed to bind {}", config.server.listen_addr))?;
        info!(%addr, "Stream server listening");

        let control = ControlServer::new(
            config.server.control_socket.clone(),
            trigger,
            status,
            shutdown.clone(),
        );
        let control_listener = control.bind()?;

        let conductor_task = tokio::spawn(conductor.run(shutdown.clone()));
        let stream_task = tokio::spawn(async move { stream_server.serve(listener).await });

        if let Err(e) = control.serve(control_listener).await {
            error!(error = %e, "Control socket failed");
        }

        match stream_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Stream server stopped with error"),
            Err(e) => warn!(error = %e, "Stream server task panicked"),
        }
        if let Err(e) = conductor_task.await {
            warn!(error = %e, "Conductor task panicked");
        }

        watcher.stop();
        info!("Daemon shutdown complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use statusboard_core::PresenceProvider;

    #[test]
    fn test_build_sources_without_credentials() {
        let sources = build_sources(&StatusboardConfig::default()).unwrap();
        assert_eq!(sources.work.name(), "slack:work");
        assert_eq!(sources.home.name(), "slack:home");
    }

    #[tokio::test]
    async fn test_run_and_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = StatusboardConfig::default();
        config.rules.path = dir.path().join("rules.md");
        config.server.listen_addr = "127.0.0.1:0".parse().unwrap();
        config.server.control_socket = dir.path().join("control.sock");
        let socket = config.server.control_socket.clone();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(DaemonServer::new(config).run(shutdown_rx));

        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !socket.exists() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let reply = crate::control::send_command(&socket, "status").await.unwrap();
        let status: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert!(status.get("emoji").is_some());

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!socket.exists());
    }
}
