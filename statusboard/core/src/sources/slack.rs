//! Slack Presence Provider
//!
//! Reads one account's custom status and presence through the Slack Web API.
//!
//! # Slack API
//!
//! - `users.profile.get` - status emoji, text and expiration
//! - `users.getPresence` - `active` / `away`
//! - `users.profile.set` - set the custom status
//!
//! Every response carries `"ok"`; `"ok": false` comes with an `"error"` code
//! even on HTTP 200.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::traits::{PresenceProvider, SourceFetchError};
use crate::config::SlackAccountConfig;
use crate::status::SourceStatus;

/// Slack presence provider for one account
#[derive(Clone)]
pub struct SlackPresenceProvider {
    /// Provider name (`slack:<account>`)
    name: String,
    /// Web API base URL
    api_base: String,
    /// User token; `None` disables the provider
    token: Option<String>,
    /// HTTP client
    http_client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProfileResponse {
    ok: bool,
    error: Option<String>,
    profile: Profile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Profile {
    status_emoji: String,
    status_text: String,
    status_expiration: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PresenceResponse {
    ok: bool,
    error: Option<String>,
    presence: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AckResponse {
    ok: bool,
    error: Option<String>,
}

impl SlackPresenceProvider {
    /// Create a provider for `account`
    pub fn new(
        account: &str,
        api_base: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self, SourceFetchError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let api_base: String = api_base.into();
        Ok(Self {
            name: format!("slack:{account}"),
            api_base: api_base.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            http_client,
        })
    }

    /// Create from an account config section
    pub fn from_config(account: &str, config: &SlackAccountConfig) -> Result<Self, SourceFetchError> {
        Self::new(account, config.api_base.clone(), config.token.clone())
    }

    /// Whether a token is configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.api_base)
    }

    fn api_error(&self, error: Option<String>) -> SourceFetchError {
        SourceFetchError::Api {
            source_name: self.name.clone(),
            message: error.unwrap_or_else(|| "unknown_error".to_string()),
        }
    }

    async fn get<T>(&self, method: &str, token: &str) -> Result<T, SourceFetchError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let response = self
            .http_client
            .get(self.method_url(method))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceFetchError::Status {
                source_name: self.name.clone(),
                status: response.status().as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceFetchError::Decode(e.to_string()))
    }

    fn combine(
        &self,
        profile: ProfileResponse,
        presence: PresenceResponse,
    ) -> Result<SourceStatus, SourceFetchError> {
        if !profile.ok {
            return Err(self.api_error(profile.error));
        }
        if !presence.ok {
            return Err(self.api_error(presence.error));
        }
        let Profile {
            status_emoji,
            status_text,
            status_expiration,
        } = profile.profile;
        Ok(SourceStatus::new(status_emoji, status_text, status_expiration)
            .with_presence(presence.presence))
    }
}

#[async_trait]
impl PresenceProvider for SlackPresenceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_status(&self) -> Result<SourceStatus, SourceFetchError> {
        let Some(token) = self.token.as_deref() else {
            return Ok(SourceStatus::empty());
        };

        let (profile, presence) = tokio::try_join!(
            self.get::<ProfileResponse>("users.profile.get", token),
            self.get::<PresenceResponse>("users.getPresence", token),
        )?;
        self.combine(profile, presence)
    }

    async fn set_status(&self, status: &SourceStatus) -> Result<(), SourceFetchError> {
        let Some(token) = self.token.as_deref() else {
            return Err(SourceFetchError::Unsupported(self.name.clone()));
        };

        let body = serde_json::json!({
            "profile": {
                "status_emoji": status.emoji,
                "status_text": status.text,
                "status_expiration": status.expiration,
            }
        });

        let response = self
            .http_client
            .post(self.method_url("users.profile.set"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceFetchError::Status {
                source_name: self.name.clone(),
                status: response.status().as_u16(),
            });
        }

        let ack: AckResponse = response
            .json()
            .await
            .map_err(|e| SourceFetchError::Decode(e.to_string()))?;
        if ack.ok {
            tracing::info!(source = %self.name, emoji = %status.emoji, "Status set");
            Ok(())
        } else {
            Err(self.api_error(ack.error))
        }
    }
}
