//! Discord lookup chain: guild → guild emoji list → CDN asset.

use super::client::{endpoint, ProviderClient};
use crate::models::{DiscordEmoji, DiscordGuild};
use crate::{Error, Result};

pub(crate) async fn fetch_emote(
    client: &ProviderClient,
    guild: &str,
    name: &str,
) -> Result<Vec<u8>> {
    let token = client
        .discord_bot_token
        .as_deref()
        .ok_or_else(|| Error::Config("DISCORD_BOT_TOKEN not set".to_string()))?;
    // Guild ids are numeric snowflakes
    if guild.is_empty() || !guild.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::NotFound(format!("Discord guild '{}'", guild)));
    }
    let authorization = format!("Bot {}", token);
    let endpoints = &client.endpoints;

    let guild_info: DiscordGuild = client
        .get_json(
            client
                .client
                .get(endpoint(&endpoints.discord_api, &["api", "v10", "guilds", guild])?)
                .header("Authorization", &authorization),
            "Discord guild lookup",
        )
        .await?;

    let emojis: Vec<DiscordEmoji> = client
        .get_json(
            client
                .client
                .get(endpoint(
                    &endpoints.discord_api,
                    &["api", "v10", "guilds", &guild_info.id.to_string(), "emojis"],
                )?)
                .header("Authorization", &authorization),
            "Discord emoji list",
        )
        .await?;
    let emoji_id = emojis
        .into_iter()
        .find(|emoji| emoji.name.as_deref() == Some(name))
        .and_then(|emoji| emoji.id)
        .ok_or_else(|| Error::NotFound(format!("Discord emoji '{}' in guild {}", name, guild)))?;

    client
        .get_bytes(
            client
                .client
                .get(endpoint(
                    &endpoints.discord_cdn,
                    &["emojis", &format!("{}.png", emoji_id)],
                )?),
            "Discord emoji download",
        )
        .await
}

#[cfg(test)]
mod tests {
    use crate::models::{Config, ProviderEndpoints};
    use crate::provider::{EmoteProvider, Provider, ProviderClient};
    use crate::Error;
    use std::path::Path;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, token: Option<&str>) -> ProviderClient {
        let mut config = Config::new(Path::new("emotes"), Path::new("uploads"), Path::new("db"))
            .with_endpoints(ProviderEndpoints::all_at(&server.uri()));
        config.discord_bot_token = token.map(str::to_string);
        ProviderClient::new(&config).unwrap()
    }

    async fn mount_guild(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v10/guilds/4242"))
            .and(header("Authorization", "Bot secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "4242",
                "name": "Emote Club"
            })))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v10/guilds/4242/emojis"))
            .and(header("Authorization", "Bot secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": "111", "name": "blobwave", "animated": false },
                { "id": null, "name": "deleted" }
            ])))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_fetch_emoji_follows_lookup_chain() {
        let server = MockServer::start().await;
        mount_guild(&server).await;
        Mock::given(method("GET"))
            .and(path("/emojis/111.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2, 3]))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("secret"));
        let bytes = client
            .fetch_emote(Provider::Discord, "4242", "blobwave")
            .await
            .unwrap();

        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_guild_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v10/guilds/999"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("secret"));
        let err = client
            .fetch_emote(Provider::Discord, "999", "blobwave")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_emoji_without_id_is_not_found() {
        let server = MockServer::start().await;
        mount_guild(&server).await;

        let client = client_for(&server, Some("secret"));
        let err = client
            .fetch_emote(Provider::Discord, "4242", "deleted")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_non_numeric_guild_is_not_requested() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, Some("secret"));
        for guild in ["..", "4242/emojis", "", "42 42"] {
            let err = client
                .fetch_emote(Provider::Discord, guild, "blobwave")
                .await
                .unwrap_err();
            assert!(err.is_not_found(), "{:?}", guild);
        }
    }

    #[tokio::test]
    async fn test_missing_token() {
        let server = MockServer::start().await;

        let client = client_for(&server, None);
        let err = client
            .fetch_emote(Provider::Discord, "4242", "blobwave")
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
    }
}
