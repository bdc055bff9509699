//! Statusboard Core - Status Resolution and Client Fan-out
//!
//! This crate derives one "current status" from several independently polled
//! sources (chat presence for a work and a home account, plus home
//! automation readings) and pushes it in real time to every connected
//! display client. It has no process concerns; the `statusboard` daemon
//! wires it together.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       poller thread                              │
//! │  ┌─────────┐ ┌─────────┐ ┌────────────┐      ┌────────────────┐  │
//! │  │ Slack   │ │ Slack   │ │   Home     │ ───▶ │    resolver    │  │
//! │  │ (work)  │ │ (home)  │ │ Assistant  │      │ + hooks        │  │
//! │  └─────────┘ └─────────┘ └────────────┘      └───────┬────────┘  │
//! │                                   ConditionStore ────┘           │
//! └───────────────────────────────▲─────────────────────┬────────────┘
//!                     old status  │                     │ new status
//! ┌───────────────────────────────┴─────────────────────▼────────────┐
//! │                          Conductor                               │
//! │   timer / refresh ──▶ Polling ──▶ Updated | Stale | Unchanged    │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │ dispatch
//! ┌───────────────────────────────▼──────────────────────────────────┐
//! │  ClientRegistry ──▶ StreamServer (WebSocket) ──▶ display clients │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ConditionStore`]: ordered match rules loaded from the rule file
//! - [`SourceStatus`], [`HomeStatus`], [`CombinedStatus`]: plain data records
//! - [`resolver`]: `matches`, `find_match` and `resolve`
//! - [`Poller`]: fetch + resolve on a dedicated thread
//! - [`ClientRegistry`]: connected clients and dispatch
//! - [`Conductor`]: the poll/dispatch state machine
//!
//! # Module Overview
//!
//! - [`conditions`]: rule file parsing, the rule store and its file watcher
//! - [`status`]: status value types and sentinels
//! - [`resolver`]: rule matching and status resolution
//! - [`hooks`]: post-resolution rewrites
//! - [`sources`]: status source traits and the Slack / Home Assistant providers
//! - [`poller`]: background fetch-and-resolve
//! - [`messages`]: client push payloads and rendering
//! - [`registry`]: client registry and dispatch
//! - [`conductor`]: orchestration
//! - [`transport`]: WebSocket stream server
//! - [`config`]: TOML configuration

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod conditions;
pub mod conductor;
pub mod config;
pub mod hooks;
pub mod messages;
pub mod poller;
pub mod registry;
pub mod resolver;
pub mod sources;
pub mod status;
pub mod transport;

// Re-exports for convenience
pub use conditions::{load_rules, parse_rules, ConditionStore, RuleParseError, RuleWatcher, StatusCondition};
pub use conductor::{
    Conductor, ConductorConfig, ConductorState, PollOutcome, RefreshTrigger, StatusCell,
};
pub use hooks::{PtoRewrite, StatusHook};
pub use messages::{ClientView, EmojiRenderer, HomeAssistantPush, PushRenderer, StatusPush};
pub use poller::{PollSources, Poller, PollerError, PollerHandle, Refresher};
pub use registry::{ClientHandle, ClientId, ClientRegistry, DispatchResult};
pub use resolver::{find_match, matches, resolve};
pub use sources::{
    HomeAssistantProvider, HomeProvider, PresenceProvider, SlackPresenceProvider, SourceFetchError,
};
pub use status::{CombinedStatus, HomeStatus, SourceStatus, ERROR_MARKER};
pub use transport::StreamServer;

// Config exports
pub use config::{
    default_config_path, default_runtime_dir, load_config, load_config_from_path, ConfigError,
    StatusboardConfig,
};
