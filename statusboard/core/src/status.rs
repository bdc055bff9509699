//! Status Value Types
//!
//! Plain data records for everything that flows through the resolution
//! pipeline. None of these types carry behavior that matters across the
//! poller boundary: they are moved by value into the poller and moved back
//! out, and every operation on them is a free function in
//! [`crate::resolver`].
//!
//! # Sentinels
//!
//! Each source type has two well-known values:
//!
//! - `EMPTY`: nothing is set (or the provider has no credentials)
//! - `ERROR`: the fetch failed; every text field carries [`ERROR_MARKER`]
//!
//! Both are ordinary values, so rule files can match on them like any other
//! status (a row with `work_emoji = ERROR` catches a failed work fetch).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker written into every text field of an `ERROR` sentinel
pub const ERROR_MARKER: &str = "ERROR";

/// Status reported by a chat-presence account
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStatus {
    /// Status emoji (e.g. `:red_circle:`), empty when unset
    pub emoji: String,
    /// Free-form status text, empty when unset
    pub text: String,
    /// When the status expires, in epoch seconds (0 = no expiration)
    pub expiration: i64,
    /// Presence (`active` / `away`), empty when unknown
    pub presence: String,
}

impl SourceStatus {
    /// The "nothing set" sentinel
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The "fetch failed" sentinel
    #[must_use]
    pub fn error() -> Self {
        Self {
            emoji: ERROR_MARKER.to_string(),
            text: ERROR_MARKER.to_string(),
            expiration: 0,
            presence: ERROR_MARKER.to_string(),
        }
    }

    /// Create a status with emoji, text and expiration
    pub fn new(emoji: impl Into<String>, text: impl Into<String>, expiration: i64) -> Self {
        Self {
            emoji: emoji.into(),
            text: text.into(),
            expiration,
            presence: String::new(),
        }
    }

    /// Set the presence
    #[must_use]
    pub fn with_presence(mut self, presence: impl Into<String>) -> Self {
        self.presence = presence.into();
        self
    }

    /// Whether this is the `EMPTY` sentinel
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    /// Whether this is the `ERROR` sentinel
    #[must_use]
    pub fn is_error(&self) -> bool {
        *self == Self::error()
    }
}

/// Readings from the home-automation service
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HomeStatus {
    /// Washer state text
    pub washer_text: String,
    /// Dryer state text
    pub dryer_text: String,
    /// Temperature reading, unit included
    pub temperature_text: String,
}

impl HomeStatus {
    /// The "nothing set" sentinel
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The "fetch failed" sentinel
    #[must_use]
    pub fn error() -> Self {
        Self {
            washer_text: ERROR_MARKER.to_string(),
            dryer_text: ERROR_MARKER.to_string(),
            temperature_text: ERROR_MARKER.to_string(),
        }
    }

    /// Whether this is the `EMPTY` sentinel
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    /// Whether this is the `ERROR` sentinel
    #[must_use]
    pub fn is_error(&self) -> bool {
        *self == Self::error()
    }
}

/// The single merged status shown on every display
///
/// Created once as [`CombinedStatus::empty`] and afterwards only ever
/// replaced, never mutated in place, by the conductor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedStatus {
    /// Display emoji
    pub emoji: String,
    /// Display text
    pub text: String,
    /// Rendered time range (`Started @ 9:00 AM` or `9:00 AM - 10:30 AM`)
    pub times: String,
    /// Rendered start time; changes only when `text` changes
    pub status_start_time: String,
    /// Expiration the `times` end was rendered from (0 = none)
    pub expiration: i64,
    /// Home readings captured with this status
    pub home: HomeStatus,
    /// When the conductor last published this status
    #[serde(skip)]
    pub last_updated_at: Option<DateTime<Utc>>,
}

impl CombinedStatus {
    /// The startup status
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Compare everything clients can see, ignoring `last_updated_at`
    #[must_use]
    pub fn same_status(&self, other: &Self) -> bool {
        self.emoji == other.emoji
            && self.text == other.text
            && self.times == other.times
            && self.status_start_time == other.status_start_time
            && self.expiration == other.expiration
            && self.home == other.home
    }
}
