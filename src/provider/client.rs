use super::{discord, twitch, EmoteProvider, Provider};
use crate::models::{Config, ProviderEndpoints};
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;

/// `base` with `segments` appended, each escaped as one path segment.
pub(crate) fn endpoint(base: &str, segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| Error::Config(format!("Invalid provider URL '{}': {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| Error::Config(format!("Provider URL '{}' cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// HTTP client shared by all provider lookup chains.
pub struct ProviderClient {
    pub(crate) client: Client,
    pub(crate) endpoints: ProviderEndpoints,
    pub(crate) twitch_client_id: Option<String>,
    pub(crate) discord_bot_token: Option<String>,
}

impl ProviderClient {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder().timeout(config.http_timeout).build()?;
        Ok(Self::new_with_client(config, client))
    }

    pub fn new_with_client(config: &Config, client: Client) -> Self {
        Self {
            client,
            endpoints: config.endpoints.clone(),
            twitch_client_id: config.twitch_client_id.clone(),
            discord_bot_token: config.discord_bot_token.clone(),
        }
    }

    /// Send a request; 404 maps to `NotFound`, any other failure to `Transport`.
    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            tracing::warn!("{} request failed: {}", what, e);
            Error::Transport(format!("{}: {}", what, e))
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("{} returned 404", what)));
        }
        if !status.is_success() {
            tracing::warn!("{} returned status {}", what, status);
            return Err(Error::Transport(format!(
                "{} returned status {}",
                what, status
            )));
        }

        Ok(response)
    }

    pub(crate) async fn get_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        what: &str,
    ) -> Result<T> {
        let body = self
            .send(request, what)
            .await?
            .text()
            .await
            .map_err(|e| Error::Transport(format!("{}: {}", what, e)))?;

        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("Failed to parse {} response: {}\nBody: {}", what, e, body);
            Error::Transport(format!("Malformed {} response: {}", what, e))
        })
    }

    pub(crate) async fn get_bytes(&self, request: RequestBuilder, what: &str) -> Result<Vec<u8>> {
        let bytes = self
            .send(request, what)
            .await?
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("{}: {}", what, e)))?;

        if bytes.is_empty() {
            return Err(Error::NotFound(format!("{} returned an empty body", what)));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl EmoteProvider for ProviderClient {
    async fn fetch_emote(&self, provider: Provider, channel: &str, name: &str) -> Result<Vec<u8>> {
        match provider {
            Provider::Twitch => twitch::fetch_emote(self, channel, name).await,
            Provider::Discord => discord::fetch_emote(self, channel, name).await,
        }
    }
}
