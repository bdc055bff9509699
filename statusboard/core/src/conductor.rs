//! Conductor - Poll/Dispatch Orchestration
//!
//! The conductor owns the authoritative [`CombinedStatus`]. On every timer
//! tick or refresh request it hands the current status to the poller, waits
//! for the result and decides whether to push it to the clients.
//!
//! # State Machine
//!
//! ```text
//!        tick / refresh
//!   Idle ───────────────▶ Polling
//!    ▲                      │
//!    │      Updated ◀───────┤  status changed
//!    │      Stale   ◀───────┤  unchanged, staleness window passed
//!    │      Unchanged ◀─────┘  unchanged, pushed recently
//!    └──────────────────────────
//! ```
//!
//! Updated and Stale replace the authoritative status and dispatch it;
//! Unchanged does nothing.
//!
//! # Coalescing
//!
//! Polls run strictly one after another on the conductor task. Refresh
//! requests go through a channel of capacity one, so any number of requests
//! made while a poll is in flight collapse into a single follow-up poll, and
//! timer ticks missed while polling are skipped.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::PollConfig;
use crate::messages::{format_last_updated, EmojiRenderer, PushRenderer};
use crate::poller::{PollerError, Refresher};
use crate::registry::ClientRegistry;
use crate::status::CombinedStatus;

/// Conductor configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConductorConfig {
    /// Time between timer-driven polls
    pub poll_interval: Duration,
    /// Longest clients may go without a push
    pub staleness: Duration,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self::from(&PollConfig::default())
    }
}

impl From<&PollConfig> for ConductorConfig {
    fn from(poll: &PollConfig) -> Self {
        Self {
            poll_interval: poll.interval(),
            staleness: poll.staleness(),
        }
    }
}

/// Where the conductor is in its cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConductorState {
    /// Waiting for the next tick or refresh request
    Idle,
    /// Waiting for the poller
    Polling,
}

/// Result of one poll
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The status changed and was pushed
    Updated,
    /// The status was unchanged but pushed to keep clients fresh
    Stale,
    /// The status was unchanged and nothing was pushed
    Unchanged,
}

impl PollOutcome {
    /// Whether this outcome pushes to clients
    #[must_use]
    pub fn dispatches(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for PollOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updated => write!(f, "updated"),
            Self::Stale => write!(f, "stale"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Shared read access to the authoritative status
///
/// Writes swap the whole `Arc`, so a reader always sees a complete status.
#[derive(Clone, Default)]
pub struct StatusCell {
    inner: Arc<RwLock<Arc<CombinedStatus>>>,
}

impl StatusCell {
    /// Create a cell holding `status`
    #[must_use]
    pub fn new(status: CombinedStatus) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(status))),
        }
    }

    /// Current status
    #[must_use]
    pub fn get(&self) -> Arc<CombinedStatus> {
        Arc::clone(&self.inner.read())
    }

    fn replace(&self, status: CombinedStatus) {
        *self.inner.write() = Arc::new(status);
    }
}

/// Handle for requesting an immediate refresh
#[derive(Clone, Debug)]
pub struct RefreshTrigger {
    tx: mpsc::Sender<()>,
}

impl RefreshTrigger {
    /// Request a refresh
    ///
    /// Returns false when a refresh is already pending and this request was
    /// folded into it, or when the conductor is gone.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(())) => {
                tracing::debug!("Refresh already pending, coalesced");
                false
            }
            Err(mpsc::error::TrySendError::Closed(())) => {
                tracing::warn!("Refresh requested but conductor has stopped");
                false
            }
        }
    }
}

/// The conductor - status orchestration core
pub struct Conductor<R: Refresher> {
    /// Configuration
    config: ConductorConfig,
    /// Source of fresh statuses
    refresher: R,
    /// Connected clients
    registry: ClientRegistry,
    /// Per-client push rendering
    renderer: Arc<dyn PushRenderer>,
    /// Authoritative status
    current: StatusCell,
    /// Current cycle state
    state: ConductorState,
    /// When the last push went out
    last_push: Option<Instant>,
    /// Monotonic anchor for wall-clock stamps
    clock_anchor: (Instant, DateTime<Utc>),
    refresh_tx: mpsc::Sender<()>,
    refresh_rx: mpsc::Receiver<()>,
}

impl<R: Refresher> Conductor<R> {
    /// Create a conductor starting from the `EMPTY` status
    pub fn new(refresher: R, registry: ClientRegistry, config: ConductorConfig) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        Self {
            config,
            refresher,
            registry,
            renderer: Arc::new(EmojiRenderer),
            current: StatusCell::new(CombinedStatus::empty()),
            state: ConductorState::Idle,
            last_push: None,
            clock_anchor: (Instant::now(), Utc::now()),
            refresh_tx,
            refresh_rx,
        }
    }

    /// Use a custom push renderer
    #[must_use]
    pub fn with_renderer(mut self, renderer: Arc<dyn PushRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Handle for refresh-now requests
    #[must_use]
    pub fn trigger(&self) -> RefreshTrigger {
        RefreshTrigger {
            tx: self.refresh_tx.clone(),
        }
    }

    /// Read handle on the authoritative status
    #[must_use]
    pub fn status_cell(&self) -> StatusCell {
        self.current.clone()
    }

    /// Renderer used for pushes
    #[must_use]
    pub fn renderer(&self) -> Arc<dyn PushRenderer> {
        Arc::clone(&self.renderer)
    }

    /// Current cycle state
    #[must_use]
    pub fn state(&self) -> ConductorState {
        self.state
    }

    /// Current status
    #[must_use]
    pub fn current(&self) -> Arc<CombinedStatus> {
        self.current.get()
    }

    /// Wall clock derived from the monotonic clock
    fn wall_clock(&self) -> DateTime<Utc> {
        let (instant, wall) = self.clock_anchor;
        let elapsed = chrono::Duration::from_std(instant.elapsed()).unwrap_or_default();
        wall + elapsed
    }

    /// Decide what a poll result means, without acting on it
    #[must_use]
    pub fn classify(&self, new: &CombinedStatus, now: Instant) -> PollOutcome {
        if !new.same_status(&self.current.get()) {
            return PollOutcome::Updated;
        }
        match self.last_push {
            None => PollOutcome::Stale,
            Some(at) if now.saturating_duration_since(at) > self.config.staleness => {
                PollOutcome::Stale
            }
            Some(_) => PollOutcome::Unchanged,
        }
    }

    /// Act on a poll result: replace and dispatch, or do nothing
    pub fn apply_result(&mut self, new: CombinedStatus) -> PollOutcome {
        let now = Instant::now();
        let outcome = self.classify(&new, now);
        if !outcome.dispatches() {
            tracing::debug!("Status unchanged, no push");
            return outcome;
        }

        let mut new = new;
        new.last_updated_at = Some(self.wall_clock());
        let last_updated = format_last_updated(new.last_updated_at);
        self.current.replace(new);
        self.last_push = Some(now);

        let status = self.current.get();
        let result = self
            .registry
            .dispatch(&status, self.renderer.as_ref(), &last_updated);
        tracing::info!(
            outcome = %outcome,
            text = %status.text,
            delivered = result.delivered,
            "Status pushed"
        );
        outcome
    }

    /// Run one Idle → Polling → Idle cycle
    pub async fn poll(&mut self) -> Result<PollOutcome, PollerError> {
        self.state = ConductorState::Polling;
        let old = CombinedStatus::clone(&self.current.get());
        let result = self.refresher.refresh(old).await;
        self.state = ConductorState::Idle;
        Ok(self.apply_result(result?))
    }

    /// Drive polls until `shutdown` flips to true or its sender is dropped
    ///
    /// Shutdown is honored while a poll is in flight; the pending reply is
    /// dropped.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            interval_secs = self.config.poll_interval.as_secs(),
            staleness_secs = self.config.staleness.as_secs(),
            "Conductor started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = self.refresh_rx.recv() => {
                    tracing::debug!("Refresh requested");
                }
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    self.state = ConductorState::Idle;
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown requested mid-poll, abandoning it");
                        break;
                    }
                    continue;
                }
                result = self.poll() => result,
            };

            match result {
                Ok(_) => {}
                Err(PollerError::Stopped) => {
                    tracing::error!("Poller stopped, conductor exiting");
                    break;
                }
                Err(e) => tracing::warn!(error = %e, "Poll failed"),
            }
        }

        tracing::info!("Conductor stopped");
    }
}
