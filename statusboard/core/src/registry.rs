//! Client Registry - Display Client Tracking and Dispatch
//!
//! Tracks every connected streaming client and pushes the latest
//! [`CombinedStatus`] to each of them.
//!
//! # Architecture
//!
//! ```text
//!                       ClientRegistry
//!                     ┌────────────────────────────────────┐
//!                     │ HashMap<ClientId, ClientHandle>    │
//!                     │   - wrapped in Arc<RwLock<>>       │
//!                     └──────────────┬─────────────────────┘
//!                                    │ dispatch (try_send)
//!              ┌─────────────────────┼─────────────────────┐
//!              │                     │                     │
//!       ┌──────▼──────┐       ┌──────▼──────┐       ┌──────▼──────┐
//!       │  /index     │       │  /kiosk     │       │  /index     │
//!       │  client-1   │       │  client-2   │       │  client-3   │
//!       └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! The registry only holds the sending half of each client's channel. The
//! transport task owns the connection; when it goes away the channel closes
//! and the next dispatch drops the client.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::messages::{format_last_updated, ClientView, PushRenderer, StatusPush};
use crate::status::CombinedStatus;

/// Unique identifier for a display client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    /// Allocate a new unique client ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw numeric value
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Handle to a connected display client
#[derive(Debug)]
pub struct ClientHandle {
    /// Unique client identifier
    pub id: ClientId,
    /// Channel to the connection's writer task
    pub tx: mpsc::Sender<StatusPush>,
    /// Display variant requested by the client
    pub page_name: String,
    /// Emoji of the last push delivered to this client
    pub last_emoji: String,
    /// When the client connected
    pub connected_at: Instant,
}

impl ClientHandle {
    /// Create a handle for a freshly connected client
    pub fn new(tx: mpsc::Sender<StatusPush>, page_name: impl Into<String>) -> Self {
        Self {
            id: ClientId::new(),
            tx,
            page_name: page_name.into(),
            last_emoji: String::new(),
            connected_at: Instant::now(),
        }
    }

    /// Renderer view of this client
    #[must_use]
    pub fn view(&self) -> ClientView<'_> {
        ClientView {
            page_name: &self.page_name,
            last_emoji: &self.last_emoji,
        }
    }

    /// Check if the client's channel is still open
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Result of a dispatch to all clients
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    /// Clients that received the push
    pub delivered: usize,
    /// Clients whose queue was full; they stay registered
    pub lagging_ids: Vec<ClientId>,
    /// Clients whose connection was gone; they were unregistered
    pub dropped_ids: Vec<ClientId>,
}

impl DispatchResult {
    /// Check if every registered client received the push
    #[must_use]
    pub fn all_delivered(&self) -> bool {
        self.lagging_ids.is_empty() && self.dropped_ids.is_empty()
    }
}

/// Registry of connected display clients
///
/// Cheap to clone; all clones share the same client map.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<RwLock<HashMap<ClientId, ClientHandle>>>,
}

impl ClientRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client connection
    pub fn register(&self, tx: mpsc::Sender<StatusPush>, page_name: impl Into<String>) -> ClientId {
        self.register_handle(ClientHandle::new(tx, page_name))
    }

    /// Register a pre-built handle
    pub fn register_handle(&self, handle: ClientHandle) -> ClientId {
        let id = handle.id;
        let page = handle.page_name.clone();
        self.inner.write().insert(id, handle);
        tracing::info!(client_id = %id, page = %page, "Client registered");
        id
    }

    /// Unregister a client
    ///
    /// Returns the handle if it was registered.
    pub fn unregister(&self, id: &ClientId) -> Option<ClientHandle> {
        let handle = self.inner.write().remove(id);
        if let Some(ref handle) = handle {
            tracing::info!(
                client_id = %id,
                uptime_secs = handle.connected_at.elapsed().as_secs(),
                "Client unregistered"
            );
        }
        handle
    }

    /// Number of connected clients
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Check if a client is registered
    #[must_use]
    pub fn contains(&self, id: &ClientId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// IDs of all connected clients
    #[must_use]
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.inner.read().keys().copied().collect()
    }

    /// Page name a client asked for
    #[must_use]
    pub fn page_name(&self, id: &ClientId) -> Option<String> {
        self.inner.read().get(id).map(|h| h.page_name.clone())
    }

    /// Emoji of the last push a client received
    #[must_use]
    pub fn last_emoji(&self, id: &ClientId) -> Option<String> {
        self.inner.read().get(id).map(|h| h.last_emoji.clone())
    }

    /// Push the status to one client
    ///
    /// Returns true if the push was queued; a closed client is unregistered.
    pub fn push_to(
        &self,
        id: &ClientId,
        status: &CombinedStatus,
        renderer: &dyn PushRenderer,
        last_updated: &str,
    ) -> bool {
        let mut inner = self.inner.write();
        Self::push_locked(&mut inner, id, status, renderer, last_updated)
    }

    /// Greet a newly connected client with the current status
    ///
    /// `current` is read while the registry lock is held, so a concurrent
    /// [`dispatch`](Self::dispatch) lands either entirely before or after
    /// the greeting and the client never receives an older status last.
    pub fn greet<F>(&self, id: &ClientId, renderer: &dyn PushRenderer, current: F) -> bool
    where
        F: FnOnce() -> Arc<CombinedStatus>,
    {
        let mut inner = self.inner.write();
        let status = current();
        let last_updated = format_last_updated(status.last_updated_at);
        Self::push_locked(&mut inner, id, &status, renderer, &last_updated)
    }

    fn push_locked(
        inner: &mut HashMap<ClientId, ClientHandle>,
        id: &ClientId,
        status: &CombinedStatus,
        renderer: &dyn PushRenderer,
        last_updated: &str,
    ) -> bool {
        let Some(handle) = inner.get_mut(id) else {
            tracing::warn!(client_id = %id, "Attempted to push to unknown client");
            return false;
        };

        let push = renderer.render(status, handle.view(), last_updated);
        match handle.tx.try_send(push) {
            Ok(()) => {
                handle.last_emoji.clone_from(&status.emoji);
                true
            }
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => {
                inner.remove(id);
                tracing::info!(client_id = %id, "Client gone, unregistered");
                false
            }
        }
    }

    /// Push the status to every registered client
    ///
    /// Uses `try_send` so a slow client never blocks the others. A closed
    /// client is unregistered; a full queue only skips this push.
    pub fn dispatch(
        &self,
        status: &CombinedStatus,
        renderer: &dyn PushRenderer,
        last_updated: &str,
    ) -> DispatchResult {
        let mut inner = self.inner.write();
        let mut result = DispatchResult::default();

        for (id, handle) in inner.iter_mut() {
            let push = renderer.render(status, handle.view(), last_updated);
            match handle.tx.try_send(push) {
                Ok(()) => {
                    handle.last_emoji.clone_from(&status.emoji);
                    result.delivered += 1;
                }
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(client_id = %id, "Client queue full, skipping push");
                    result.lagging_ids.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    result.dropped_ids.push(*id);
                }
            }
        }

        for id in &result.dropped_ids {
            inner.remove(id);
            tracing::info!(client_id = %id, "Client gone during dispatch, unregistered");
        }

        tracing::debug!(
            delivered = result.delivered,
            lagging = result.lagging_ids.len(),
            dropped = result.dropped_ids.len(),
            "Dispatched status"
        );
        result
    }
}
