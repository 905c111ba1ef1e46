//! External emote providers
//!
//! Each provider resolves an emote through a short chain of HTTP lookups
//! ending in a CDN download. Providers are a closed set, addressed by the
//! first segment of a namespace (`twitch/<channel>`, `discord/<guild>`).

pub mod client;
pub mod discord;
pub mod mock;
pub mod twitch;

pub use client::ProviderClient;
pub use mock::MockProviderClient;

use crate::Result;
use async_trait::async_trait;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Twitch,
    Discord,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Twitch, Provider::Discord];

    pub fn from_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str() == segment)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Twitch => "twitch",
            Provider::Discord => "discord",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait EmoteProvider: Send + Sync {
    /// Download the raw bytes of emote `name` from `channel` on `provider`.
    async fn fetch_emote(&self, provider: Provider, channel: &str, name: &str) -> Result<Vec<u8>>;
}
