//! Status Source Integrations
//!
//! Abstracted access to the services the poller reads from, through a
//! common trait interface per kind of source.
//!
//! # Available Sources
//!
//! - **Slack**: chat presence (emoji, text, expiration, active/away), one
//!   provider per account
//! - **Home Assistant**: washer, dryer and temperature readings
//!
//! A provider without credentials is disabled and reports the `EMPTY`
//! sentinel; it is never an error.
//!
//! # Usage
//!
//! ```ignore
//! use statusboard_core::sources::{PresenceProvider, SlackPresenceProvider};
//!
//! let work = SlackPresenceProvider::from_config("work", &config.slack.work)?;
//! let status = work.fetch_status().await?;
//! ```

mod home_assistant;
mod slack;
mod traits;

pub use home_assistant::HomeAssistantProvider;
pub use slack::SlackPresenceProvider;
pub use traits::{fetch_with_retry, HomeProvider, PresenceProvider, RetryPolicy, SourceFetchError};
