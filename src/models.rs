//! Data models and structures
//!
//! Defines the emote, rendition and catalog types shared by the resolver,
//! registry and resize engine, plus the provider API payloads and the
//! runtime configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Whether an emote is a single still image or an animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EmoteKind {
    #[serde(rename = "emote")]
    Static,
    #[serde(rename = "aemote")]
    Animated,
}

impl EmoteKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            EmoteKind::Static => "emote",
            EmoteKind::Animated => "aemote",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "emote" => Ok(EmoteKind::Static),
            "aemote" => Ok(EmoteKind::Animated),
            other => Err(Error::UnsupportedType(other.to_string())),
        }
    }

    pub fn is_animated(&self) -> bool {
        matches!(self, EmoteKind::Animated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Png,
    Gif,
    Webp,
}

impl OutputFormat {
    /// The format a rendition is served in: WebP when the caller asked for
    /// it, otherwise GIF for animations and PNG for still images.
    pub fn for_request(kind: EmoteKind, prefer_webp: bool) -> Self {
        match (prefer_webp, kind) {
            (true, _) => OutputFormat::Webp,
            (false, EmoteKind::Animated) => OutputFormat::Gif,
            (false, EmoteKind::Static) => OutputFormat::Png,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Gif => "gif",
            OutputFormat::Webp => "webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        self.as_str()
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Webp => "image/webp",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "png" => Ok(OutputFormat::Png),
            "gif" => Ok(OutputFormat::Gif),
            "webp" => Ok(OutputFormat::Webp),
            other => Err(Error::Invariant(format!("Unknown output format: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Reject empty boxes and boxes larger than `max` on either side.
    pub fn validate(&self, max: u32) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidDimensions(format!(
                "{}x{} has an empty side",
                self.width, self.height
            )));
        }
        if self.width > max || self.height > max {
            return Err(Error::InvalidDimensions(format!(
                "{}x{} exceeds the {}px limit",
                self.width, self.height, max
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Per-source cache key of a rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenditionKey {
    pub width: u32,
    pub height: u32,
    pub prefer_webp: bool,
}

impl RenditionKey {
    pub fn new(width: u32, height: u32, prefer_webp: bool) -> Self {
        Self {
            width,
            height,
            prefer_webp,
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }

    /// Content-store key for this rendition of `original`.
    ///
    /// Renditions of one source share a directory named after a digest of the
    /// original reference, so the same inputs always land on the same path.
    pub fn storage_path(&self, original: &str, kind: EmoteKind) -> String {
        let digest = hex::encode(Sha256::digest(original.as_bytes()));
        let format = OutputFormat::for_request(kind, self.prefer_webp);
        format!(
            "{}/{}x{}{}.{}",
            &digest[..16],
            self.width,
            self.height,
            if self.prefer_webp { "-webp" } else { "" },
            format.extension()
        )
    }
}

/// One original image known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub id: i64,
    pub original: String,
    pub created_at: String,
}

/// A size-specific output of a [`SourceImage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendition {
    pub id: i64,
    pub image_id: i64,
    pub key: RenditionKey,
    pub processed: bool,
    pub path: String,
    pub format: Option<OutputFormat>,
    pub output: Option<Dimensions>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub slug: String,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEmote {
    pub id: i64,
    pub namespace_id: i64,
    pub slug: String,
    pub original: String,
    pub kind: EmoteKind,
}

/// Contents of a local emote's `info.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmoteDescriptor {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl EmoteDescriptor {
    pub fn kind(&self) -> Result<EmoteKind> {
        EmoteKind::from_tag(&self.kind)
    }
}

/// A single fetch request as received from the web layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmoteRequest {
    pub namespace: Option<String>,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub prefer_webp: bool,
}

impl EmoteRequest {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            namespace: None,
            name: name.into(),
            width,
            height,
            prefer_webp: false,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_webp(mut self, prefer_webp: bool) -> Self {
        self.prefer_webp = prefer_webp;
        self
    }

    pub fn key(&self) -> RenditionKey {
        RenditionKey::new(self.width, self.height, self.prefer_webp)
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// How a newly claimed rendition gets produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// Resize inside the request and return the bytes straight away.
    Inline,
    /// Spawn a job and answer `Pending` until it lands.
    Background,
}

impl FromStr for ProcessingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "inline" => Ok(ProcessingMode::Inline),
            "background" => Ok(ProcessingMode::Background),
            other => Err(Error::Config(format!(
                "PROCESSING_MODE must be 'inline' or 'background', got '{}'",
                other
            ))),
        }
    }
}

// Provider API response models

/// Identifiers come back as numbers from some endpoints and strings from others.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ProviderId {
    Number(u64),
    Text(String),
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderId::Number(n) => write!(f, "{}", n),
            ProviderId::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TwitchUsersResponse {
    #[serde(default)]
    pub users: Vec<TwitchUser>,
}

#[derive(Debug, Deserialize)]
pub struct TwitchUser {
    #[serde(rename = "_id")]
    pub id: Option<ProviderId>,
}

#[derive(Debug, Deserialize)]
pub struct TwitchChannelEmotes {
    #[serde(default)]
    pub emotes: Vec<TwitchEmote>,
}

#[derive(Debug, Deserialize)]
pub struct TwitchEmote {
    pub code: String,
    pub id: ProviderId,
}

#[derive(Debug, Deserialize)]
pub struct DiscordGuild {
    pub id: ProviderId,
}

#[derive(Debug, Deserialize)]
pub struct DiscordEmoji {
    pub id: Option<ProviderId>,
    pub name: Option<String>,
}

// Configuration

/// Base URLs of the provider APIs and CDNs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    pub twitch_api: String,
    pub twitch_emotes_api: String,
    pub twitch_cdn: String,
    pub discord_api: String,
    pub discord_cdn: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            twitch_api: "https://api.twitch.tv".to_string(),
            twitch_emotes_api: "https://api.twitchemotes.com".to_string(),
            twitch_cdn: "https://static-cdn.jtvnw.net".to_string(),
            discord_api: "https://discord.com".to_string(),
            discord_cdn: "https://cdn.discordapp.com".to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Point every provider at one base URL (used against a local mock server).
    pub fn all_at(base_url: &str) -> Self {
        Self {
            twitch_api: base_url.to_string(),
            twitch_emotes_api: base_url.to_string(),
            twitch_cdn: base_url.to_string(),
            discord_api: base_url.to_string(),
            discord_cdn: base_url.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub emotes_path: PathBuf,
    pub uploads_path: PathBuf,
    pub database_path: PathBuf,
    pub twitch_client_id: Option<String>,
    pub discord_bot_token: Option<String>,
    pub processing_mode: ProcessingMode,
    pub max_concurrent_jobs: usize,
    pub http_timeout: Duration,
    pub max_dimension: u32,
    pub endpoints: ProviderEndpoints,
}

impl Config {
    /// Defaults for everything except the three storage locations.
    pub fn new(emotes_path: &Path, uploads_path: &Path, database_path: &Path) -> Self {
        Self {
            emotes_path: emotes_path.to_path_buf(),
            uploads_path: uploads_path.to_path_buf(),
            database_path: database_path.to_path_buf(),
            twitch_client_id: None,
            discord_bot_token: None,
            processing_mode: ProcessingMode::Background,
            max_concurrent_jobs: 4,
            http_timeout: Duration::from_secs(10),
            max_dimension: 1024,
            endpoints: ProviderEndpoints::default(),
        }
    }

    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = ProviderEndpoints::default();
        let mut config = Self::new(
            Path::new(&env_or("EMOTES_PATH", "emotes")),
            Path::new(&env_or("UPLOADS_PATH", "uploads")),
            Path::new(&env_or("DATABASE_PATH", "emotes.db")),
        );

        config.twitch_client_id = std::env::var("TWITCH_CLIENT_ID").ok();
        config.discord_bot_token = std::env::var("DISCORD_BOT_TOKEN").ok();
        config.processing_mode = env_or("PROCESSING_MODE", "background").parse()?;
        config.max_concurrent_jobs = parse_env("MAX_CONCURRENT_JOBS", 4)?;
        config.http_timeout = Duration::from_secs(parse_env("HTTP_TIMEOUT_SECS", 10)?);
        config.max_dimension = parse_env("MAX_DIMENSION", 1024)?;
        config.endpoints = ProviderEndpoints {
            twitch_api: env_or("TWITCH_API_URL", &defaults.twitch_api),
            twitch_emotes_api: env_or("TWITCH_EMOTES_API_URL", &defaults.twitch_emotes_api),
            twitch_cdn: env_or("TWITCH_CDN_URL", &defaults.twitch_cdn),
            discord_api: env_or("DISCORD_API_URL", &defaults.discord_api),
            discord_cdn: env_or("DISCORD_CDN_URL", &defaults.discord_cdn),
        };

        if config.max_concurrent_jobs == 0 {
            return Err(Error::Config(
                "MAX_CONCURRENT_JOBS must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn with_processing_mode(mut self, mode: ProcessingMode) -> Self {
        self.processing_mode = mode;
        self
    }

    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Directory the content store writes renditions into.
    pub fn renditions_path(&self) -> PathBuf {
        self.uploads_path.join("renditions")
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{} has an invalid value: '{}'", name, raw))),
        Err(_) => Ok(default),
    }
}
