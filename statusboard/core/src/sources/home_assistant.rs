//! Home Assistant Provider
//!
//! Reads the washer, dryer and temperature entities through the Home
//! Assistant REST API (`GET /api/states/<entity_id>`).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::traits::{HomeProvider, SourceFetchError};
use crate::config::HomeAssistantConfig;
use crate::status::HomeStatus;

const SOURCE_NAME: &str = "home-assistant";

/// Home Assistant provider
#[derive(Clone)]
pub struct HomeAssistantProvider {
    /// Base URL and token; `None` disables the provider
    endpoint: Option<(String, String)>,
    washer_entity: Option<String>,
    dryer_entity: Option<String>,
    temperature_entity: Option<String>,
    http_client: reqwest::Client,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EntityState {
    state: String,
    attributes: EntityAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EntityAttributes {
    unit_of_measurement: Option<String>,
}

impl EntityState {
    fn display_text(&self) -> String {
        match self.attributes.unit_of_measurement.as_deref() {
            Some(unit) if !unit.is_empty() => format!("{} {unit}", self.state),
            _ => self.state.clone(),
        }
    }
}

impl HomeAssistantProvider {
    /// Create from the `[home_assistant]` config section
    pub fn from_config(config: &HomeAssistantConfig) -> Result<Self, SourceFetchError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        let endpoint = match (&config.base_url, &config.token) {
            (Some(url), Some(token)) if !url.is_empty() && !token.is_empty() => {
                Some((url.trim_end_matches('/').to_string(), token.clone()))
            }
            _ => None,
        };

        Ok(Self {
            endpoint,
            washer_entity: config.washer_entity.clone(),
            dryer_entity: config.dryer_entity.clone(),
            temperature_entity: config.temperature_entity.clone(),
            http_client,
        })
    }

    /// Whether a base URL and token are configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn entity_state(
        &self,
        base_url: &str,
        token: &str,
        entity: &str,
    ) -> Result<EntityState, SourceFetchError> {
        let response = self
            .http_client
            .get(format!("{base_url}/api/states/{entity}"))
            .bearer_auth(token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SourceFetchError::Status {
                source_name: SOURCE_NAME.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .json::<EntityState>()
            .await
            .map_err(|e| SourceFetchError::Decode(e.to_string()))
    }

    /// Text for one optional entity; unconfigured entities read as empty
    async fn entity_text(
        &self,
        base_url: &str,
        token: &str,
        entity: Option<&str>,
    ) -> Result<String, SourceFetchError> {
        match entity {
            Some(entity) if !entity.is_empty() => Ok(self
                .entity_state(base_url, token, entity)
                .await?
                .display_text()),
            _ => Ok(String::new()),
        }
    }
}

#[async_trait]
impl HomeProvider for HomeAssistantProvider {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_status(&self) -> Result<HomeStatus, SourceFetchError> {
        let Some((base_url, token)) = self.endpoint.as_ref() else {
            return Ok(HomeStatus::empty());
        };

        let (washer_text, dryer_text, temperature_text) = tokio::try_join!(
            self.entity_text(base_url, token, self.washer_entity.as_deref()),
            self.entity_text(base_url, token, self.dryer_entity.as_deref()),
            self.entity_text(base_url, token, self.temperature_entity.as_deref()),
        )?;

        Ok(HomeStatus {
            washer_text,
            dryer_text,
            temperature_text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_without_token() {
        let config = HomeAssistantConfig {
            base_url: Some("http://ha.local:8123".into()),
            ..Default::default()
        };
        let provider = HomeAssistantProvider::from_config(&config).unwrap();
        assert!(!provider.is_enabled());
        assert!(provider.fetch_status().await.unwrap().is_empty());
    }

    #[test]
    fn test_temperature_includes_unit() {
        let state: EntityState = serde_json::from_str(
            r#"{"entity_id":"sensor.temp","state":"71.2","attributes":{"unit_of_measurement":"°F","friendly_name":"Living Room"}}"#,
        )
        .unwrap();
        assert_eq!(state.display_text(), "71.2 °F");
    }

    #[test]
    fn test_plain_state_without_unit() {
        let state: EntityState =
            serde_json::from_str(r#"{"entity_id":"sensor.washer","state":"Running","attributes":{}}"#)
                .unwrap();
        assert_eq!(state.display_text(), "Running");
    }

    #[tokio::test]
    async fn test_unconfigured_entity_is_empty() {
        let provider = HomeAssistantProvider::from_config(&HomeAssistantConfig::default()).unwrap();
        let text = provider.entity_text("http://unused", "t", None).await.unwrap();
        assert_eq!(text, "");
    }
}
