//! Poller - Background Fetch and Resolve
//!
//! The poller owns every outbound source call and the resolver run. It lives
//! on its own OS thread with a single-threaded tokio runtime and talks to the
//! rest of the daemon only through messages:
//!
//! ```text
//!   Conductor                          poller thread
//!   ─────────                          ─────────────
//!   PollRequest { old, reply } ──────▶ join!(work, home, house)
//!                                      resolve(old, ..) + hooks
//!   CombinedStatus ◀────────── reply ─
//! ```
//!
//! Statuses cross the boundary by value; nothing is shared between the two
//! sides except the rule store's read-only snapshots.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Local;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::conditions::ConditionStore;
use crate::hooks::{apply_hooks, StatusHook};
use crate::resolver::{reconcile_start_time, resolve_at};
use crate::sources::{fetch_with_retry, HomeProvider, PresenceProvider, RetryPolicy};
use crate::status::{CombinedStatus, HomeStatus, SourceStatus};

/// Thread name for the poller
pub const POLLER_THREAD_NAME: &str = "status-poller";

/// Errors talking to the poller thread
#[derive(Debug, Error)]
pub enum PollerError {
    /// The poller thread is gone
    #[error("Poller has stopped")]
    Stopped,

    /// The poller dropped the request without answering
    #[error("Poller dropped the refresh request")]
    ReplyDropped,

    /// The poller thread or its runtime could not be created
    #[error("Failed to start poller: {0}")]
    Start(#[from] std::io::Error),
}

/// Something that turns the current status into a fresh one
///
/// Implemented by [`PollerHandle`]; the conductor only depends on this trait.
#[async_trait]
pub trait Refresher: Send + Sync {
    /// Fetch sources and resolve against `old`
    async fn refresh(&self, old: CombinedStatus) -> Result<CombinedStatus, PollerError>;
}

/// The three sources a poll reads
#[derive(Clone)]
pub struct PollSources {
    /// Work chat account
    pub work: Arc<dyn PresenceProvider>,
    /// Home chat account
    pub home: Arc<dyn PresenceProvider>,
    /// Home automation
    pub house: Arc<dyn HomeProvider>,
}

/// Fetches sources and resolves the combined status
pub struct Poller {
    sources: PollSources,
    store: Arc<ConditionStore>,
    hooks: Vec<Box<dyn StatusHook>>,
    retry: RetryPolicy,
}

impl Poller {
    /// Create a poller with no hooks and the default retry policy
    #[must_use]
    pub fn new(sources: PollSources, store: Arc<ConditionStore>) -> Self {
        Self {
            sources,
            store,
            hooks: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Add a post-resolution hook
    #[must_use]
    pub fn with_hook(mut self, hook: Box<dyn StatusHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Set the per-source retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_presence(&self, provider: &dyn PresenceProvider) -> SourceStatus {
        match fetch_with_retry(provider.name(), self.retry, || provider.fetch_status()).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(source = provider.name(), error = %e, "Presence fetch failed");
                SourceStatus::error()
            }
        }
    }

    async fn fetch_house(&self, provider: &dyn HomeProvider) -> HomeStatus {
        match fetch_with_retry(provider.name(), self.retry, || provider.fetch_status()).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(source = provider.name(), error = %e, "Home fetch failed");
                HomeStatus::error()
            }
        }
    }

    /// Run one poll: fetch all sources concurrently, then resolve
    ///
    /// Never fails. Fetch errors become `ERROR` sentinels and a panic while
    /// resolving returns `old` unchanged.
    pub async fn poll_once(&self, old: CombinedStatus) -> CombinedStatus {
        let (work, home, house) = tokio::join!(
            self.fetch_presence(self.sources.work.as_ref()),
            self.fetch_presence(self.sources.home.as_ref()),
            self.fetch_house(self.sources.house.as_ref()),
        );

        let rules = self.store.snapshot();
        let now = Local::now();

        let resolved = catch_unwind(AssertUnwindSafe(|| {
            let resolved = resolve_at(&old, &work, &home, &house, &rules, &now);
            if self.hooks.is_empty() {
                resolved
            } else {
                reconcile_start_time(&old, apply_hooks(&self.hooks, resolved), &now)
            }
        }));

        match resolved {
            Ok(status) => status,
            Err(panic) => {
                let cause = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(cause = %cause, "Status resolution panicked, keeping previous status");
                old
            }
        }
    }

    /// Move the poller onto its own thread
    ///
    /// The thread exits once every [`PollerHandle`] is dropped. A panic
    /// while serving one request answers it with the unchanged status and
    /// the thread keeps serving.
    pub fn spawn(self) -> Result<PollerHandle, PollerError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, mut rx) = mpsc::channel::<PollRequest>(1);

        std::thread::Builder::new()
            .name(POLLER_THREAD_NAME.to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    tracing::debug!("Poller started");
                    while let Some(request) = rx.recv().await {
                        let fallback = request.old.clone();
                        let status = match AssertUnwindSafe(self.poll_once(request.old))
                            .catch_unwind()
                            .await
                        {
                            Ok(status) => status,
                            Err(_) => {
                                tracing::error!("Poll panicked, keeping previous status");
                                fallback
                            }
                        };
                        if request.reply.send(status).is_err() {
                            tracing::debug!("Refresh requester went away");
                        }
                    }
                    tracing::debug!("Poller stopped");
                });
            })?;

        Ok(PollerHandle { tx })
    }
}

struct PollRequest {
    old: CombinedStatus,
    reply: oneshot::Sender<CombinedStatus>,
}

/// Sending side of the poller thread
#[derive(Clone)]
pub struct PollerHandle {
    tx: mpsc::Sender<PollRequest>,
}

impl PollerHandle {
    /// Whether the poller thread is still running
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[async_trait]
impl Refresher for PollerHandle {
    async fn refresh(&self, old: CombinedStatus) -> Result<CombinedStatus, PollerError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(PollRequest { old, reply })
            .await
            .map_err(|_| PollerError::Stopped)?;
        response.await.map_err(|_| PollerError::ReplyDropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::{parse_rules, ConditionStore};
    use crate::hooks::PtoRewrite;
    use crate::sources::SourceFetchError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FixedPresence(SourceStatus);

    #[async_trait]
    impl PresenceProvider for FixedPresence {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn fetch_status(&self) -> Result<SourceStatus, SourceFetchError> {
            Ok(self.0.clone())
        }
    }

    struct FailingPresence(AtomicU32);

    #[async_trait]
    impl PresenceProvider for FailingPresence {
        fn name(&self) -> &str {
            "failing"
        }
        async fn fetch_status(&self) -> Result<SourceStatus, SourceFetchError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(SourceFetchError::Decode("garbage".into()))
        }
    }

    /// Panics on its first fetch, healthy afterwards
    struct PanicOnce(std::sync::atomic::AtomicBool);

    #[async_trait]
    impl PresenceProvider for PanicOnce {
        fn name(&self) -> &str {
            "panic-once"
        }
        async fn fetch_status(&self) -> Result<SourceStatus, SourceFetchError> {
            if !self.0.swap(true, Ordering::SeqCst) {
                panic!("provider exploded");
            }
            Ok(SourceStatus::new(":red_circle:", "Recovered", 0))
        }
    }

    struct FixedHouse(HomeStatus);

    #[async_trait]
    impl HomeProvider for FixedHouse {
        fn name(&self) -> &str {
            "house"
        }
        async fn fetch_status(&self) -> Result<HomeStatus, SourceFetchError> {
            Ok(self.0.clone())
        }
    }

    struct PanickingHook;

    impl StatusHook for PanickingHook {
        fn name(&self) -> &str {
            "panics"
        }
        fn apply(&self, _status: CombinedStatus) -> CombinedStatus {
            panic!("hook exploded")
        }
    }

    const RULES: &str = "\
| work_emoji | work_presence | home_emoji | home_presence | display_emoji | display_text |
| ERROR      |               |            |               | :warning:     | Work status unavailable |
| *          |               |            |               | :red_circle:  | (WORK_STATUS_TEXT) |
|            |               |            |               | :house:       | Home |
";

    fn store() -> Arc<ConditionStore> {
        Arc::new(ConditionStore::with_rules(
            "rules.md",
            parse_rules(RULES).unwrap(),
        ))
    }

    fn sources(work: Arc<dyn PresenceProvider>) -> PollSources {
        PollSources {
            work,
            home: Arc::new(FixedPresence(SourceStatus::empty())),
            house: Arc::new(FixedHouse(HomeStatus {
                washer_text: "Running".into(),
                ..Default::default()
            })),
        }
    }

    #[tokio::test]
    async fn test_poll_once_resolves() {
        let work = Arc::new(FixedPresence(SourceStatus::new(":red_circle:", "Standup", 0)));
        let poller = Poller::new(sources(work), store());

        let status = poller.poll_once(CombinedStatus::empty()).await;
        assert_eq!(status.text, "Standup");
        assert_eq!(status.emoji, ":red_circle:");
        assert_eq!(status.home.washer_text, "Running");
    }

    #[tokio::test]
    async fn test_empty_provider_is_not_an_error() {
        let work = Arc::new(FixedPresence(SourceStatus::empty()));
        let poller = Poller::new(sources(work), store());

        let status = poller.poll_once(CombinedStatus::empty()).await;
        assert_eq!(status.text, "Home");
    }

    #[tokio::test]
    async fn test_failed_fetch_becomes_error_sentinel() {
        let failing = Arc::new(FailingPresence(AtomicU32::new(0)));
        let poller = Poller::new(sources(failing.clone()), store())
            .with_retry(RetryPolicy::new(Duration::from_secs(1), 1));

        let status = poller.poll_once(CombinedStatus::empty()).await;
        assert_eq!(status.text, "Work status unavailable");
        // One retry
        assert_eq!(failing.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panic_keeps_previous_status() {
        let work = Arc::new(FixedPresence(SourceStatus::new(":red_circle:", "Standup", 0)));
        let poller = Poller::new(sources(work), store()).with_hook(Box::new(PanickingHook));
        let old = CombinedStatus {
            text: "Before".into(),
            ..Default::default()
        };

        assert_eq!(poller.poll_once(old.clone()).await, old);
    }

    #[tokio::test]
    async fn test_hook_applied_with_sticky_start() {
        let work = Arc::new(FixedPresence(SourceStatus::new(
            ":palm_tree:",
            "Out of office",
            0,
        )));
        let poller = Poller::new(sources(work), store()).with_hook(Box::new(PtoRewrite));
        let old = CombinedStatus {
            emoji: "🌴".into(),
            text: "PTO".into(),
            times: "Started @ 8:00 AM".into(),
            status_start_time: "8:00 AM".into(),
            ..Default::default()
        };

        let status = poller.poll_once(old).await;
        assert_eq!(status.text, "PTO");
        assert_eq!(status.status_start_time, "8:00 AM");
    }

    #[tokio::test]
    async fn test_spawned_poller_round_trip() {
        let work = Arc::new(FixedPresence(SourceStatus::new(":red_circle:", "Focus", 0)));
        let handle = Poller::new(sources(work), store()).spawn().unwrap();
        assert!(handle.is_running());

        let first = handle.refresh(CombinedStatus::empty()).await.unwrap();
        assert_eq!(first.text, "Focus");

        let second = handle.refresh(first.clone()).await.unwrap();
        assert_eq!(second.status_start_time, first.status_start_time);
    }

    #[tokio::test]
    async fn test_spawned_poller_survives_provider_panic() {
        let work = Arc::new(PanicOnce(std::sync::atomic::AtomicBool::new(false)));
        let handle = Poller::new(sources(work), store()).spawn().unwrap();
        let old = CombinedStatus {
            text: "Before".into(),
            ..Default::default()
        };

        let first = handle.refresh(old.clone()).await.unwrap();
        assert_eq!(first, old);
        assert!(handle.is_running());

        let second = handle.refresh(first).await.unwrap();
        assert_eq!(second.text, "Recovered");
    }
}
