//! Client Push Messages
//!
//! The JSON payload sent to every display client on dispatch:
//!
//! ```json
//! {
//!   "emojiImage": ":red_circle:",
//!   "text": "Busy",
//!   "times": "9:00 AM - 10:30 AM",
//!   "lastUpdatedTime": "9:41:07 AM",
//!   "homeAssistant": { "washerText": "", "dryerText": "", "temperatureText": "71 °F" }
//! }
//! ```
//!
//! Only `lastUpdatedTime` varies between two pushes of the same status.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::status::{CombinedStatus, HomeStatus};

const LAST_UPDATED_FORMAT: &str = "%-I:%M:%S %p";

/// One push to one client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPush {
    /// Image (or emoji) the client should show
    pub emoji_image: String,
    /// Display text
    pub text: String,
    /// Rendered time range
    pub times: String,
    /// When the status was last published
    pub last_updated_time: String,
    /// Home readings
    pub home_assistant: HomeAssistantPush,
}

impl StatusPush {
    /// Serialize for the wire
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Home readings as sent to clients
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeAssistantPush {
    /// Washer state
    pub washer_text: String,
    /// Dryer state
    pub dryer_text: String,
    /// Temperature reading
    pub temperature_text: String,
}

impl From<&HomeStatus> for HomeAssistantPush {
    fn from(home: &HomeStatus) -> Self {
        Self {
            washer_text: home.washer_text.clone(),
            dryer_text: home.dryer_text.clone(),
            temperature_text: home.temperature_text.clone(),
        }
    }
}

/// What a renderer knows about the client it renders for
#[derive(Debug, Clone, Copy)]
pub struct ClientView<'a> {
    /// Display variant the client asked for
    pub page_name: &'a str,
    /// Emoji of the last push this client received (empty before the first)
    pub last_emoji: &'a str,
}

impl ClientView<'_> {
    /// Whether the status emoji differs from what this client last saw
    #[must_use]
    pub fn emoji_changed(&self, status: &CombinedStatus) -> bool {
        self.last_emoji != status.emoji
    }
}

/// Renders the per-client push payload
///
/// Image selection lives outside the core; implementations get the client's
/// previous emoji so they can keep an image stable until the emoji changes.
pub trait PushRenderer: Send + Sync {
    /// Build the payload for one client
    fn render(&self, status: &CombinedStatus, client: ClientView<'_>, last_updated: &str)
        -> StatusPush;
}

/// Renderer that passes the status emoji through as the image
#[derive(Debug, Clone, Copy, Default)]
pub struct EmojiRenderer;

impl PushRenderer for EmojiRenderer {
    fn render(
        &self,
        status: &CombinedStatus,
        _client: ClientView<'_>,
        last_updated: &str,
    ) -> StatusPush {
        StatusPush {
            emoji_image: status.emoji.clone(),
            text: status.text.clone(),
            times: status.times.clone(),
            last_updated_time: last_updated.to_string(),
            home_assistant: HomeAssistantPush::from(&status.home),
        }
    }
}

/// Render `last_updated_at` for display in local time
#[must_use]
pub fn format_last_updated(at: Option<DateTime<Utc>>) -> String {
    at.map(|at| at.with_timezone(&Local).format(LAST_UPDATED_FORMAT).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy() -> CombinedStatus {
        CombinedStatus {
            emoji: ":red_circle:".into(),
            text: "Busy".into(),
            times: "Started @ 9:00 AM".into(),
            status_start_time: "9:00 AM".into(),
            home: HomeStatus {
                temperature_text: "71 °F".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_push_wire_shape() {
        let view = ClientView {
            page_name: "index",
            last_emoji: "",
        };
        let push = EmojiRenderer.render(&busy(), view, "9:41:07 AM");
        let value: serde_json::Value = serde_json::from_str(&push.to_json().unwrap()).unwrap();

        assert_eq!(value["emojiImage"], ":red_circle:");
        assert_eq!(value["text"], "Busy");
        assert_eq!(value["times"], "Started @ 9:00 AM");
        assert_eq!(value["lastUpdatedTime"], "9:41:07 AM");
        assert_eq!(value["homeAssistant"]["temperatureText"], "71 °F");
        assert_eq!(value["homeAssistant"]["washerText"], "");
        assert_eq!(value.as_object().unwrap().len(), 5);
    }

    #[test]
    fn test_identical_status_identical_payload() {
        let view = ClientView {
            page_name: "index",
            last_emoji: "",
        };
        let a = EmojiRenderer.render(&busy(), view, "9:41:07 AM").to_json().unwrap();
        let b = EmojiRenderer.render(&busy(), view, "9:41:07 AM").to_json().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_emoji_changed() {
        let status = busy();
        let fresh = ClientView {
            page_name: "index",
            last_emoji: "",
        };
        let seen = ClientView {
            page_name: "index",
            last_emoji: ":red_circle:",
        };
        assert!(fresh.emoji_changed(&status));
        assert!(!seen.emoji_changed(&status));
    }

    #[test]
    fn test_format_last_updated_none_is_empty() {
        assert_eq!(format_last_updated(None), "");
        assert!(!format_last_updated(Some(Utc::now())).is_empty());
    }
}
