//! Twitch lookup chain: channel login → channel emote set → CDN asset.

use super::client::{endpoint, ProviderClient};
use crate::models::{TwitchChannelEmotes, TwitchUsersResponse};
use crate::{Error, Result};

const KRAKEN_ACCEPT: &str = "application/vnd.twitchtv.v5+json";

pub(crate) async fn fetch_emote(
    client: &ProviderClient,
    channel: &str,
    name: &str,
) -> Result<Vec<u8>> {
    let client_id = client
        .twitch_client_id
        .as_deref()
        .ok_or_else(|| Error::Config("TWITCH_CLIENT_ID not set".to_string()))?;
    let endpoints = &client.endpoints;

    let users: TwitchUsersResponse = client
        .get_json(
            client
                .client
                .get(endpoint(&endpoints.twitch_api, &["kraken", "users"])?)
                .query(&[("login", channel)])
                .header("Accept", KRAKEN_ACCEPT)
                .header("Client-ID", client_id),
            "Twitch user lookup",
        )
        .await?;
    let streamer_id = users
        .users
        .into_iter()
        .next()
        .and_then(|user| user.id)
        .ok_or_else(|| Error::NotFound(format!("Twitch channel '{}'", channel)))?;

    let channel_emotes: TwitchChannelEmotes = client
        .get_json(
            client.client.get(endpoint(
                &endpoints.twitch_emotes_api,
                &["api", "v4", "channels", &streamer_id.to_string()],
            )?),
            "Twitch channel emotes",
        )
        .await?;
    let emote_id = channel_emotes
        .emotes
        .into_iter()
        .find(|emote| emote.code == name)
        .map(|emote| emote.id)
        .ok_or_else(|| {
            Error::NotFound(format!("Twitch emote '{}' in channel '{}'", name, channel))
        })?;

    tracing::debug!(
        "Resolved Twitch emote {} in {} to id {}",
        name,
        channel,
        emote_id
    );

    client
        .get_bytes(
            client.client.get(endpoint(
                &endpoints.twitch_cdn,
                &["emoticons", "v1", &emote_id.to_string(), "4.0"],
            )?),
            "Twitch emote download",
        )
        .await
}
