use anyhow::{Context, Result};
use serenity::all::UserId;
use std::{fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use crate::audio::SessionSettings;

pub const DEFAULT_SUPPORT_SERVER: &str = "https://discord.gg/D3jUAQSjJx";

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // development guild for command registration
    pub owner_ids: Vec<UserId>,

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub cache_size: usize,

    // Timeouts
    pub idle_timeout: Duration,
    pub alone_timeout: Duration,
    pub voice_connect_timeout: Duration,
    pub track_resolve_timeout: Duration,
    pub default_cooldown: Duration,

    // Paths
    pub data_dir: PathBuf,

    // Optional integrations
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
    pub support_server: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup, so tests never
    /// touch the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Blank values count as unset, the way an empty line in `.env` reads.
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let config = Self {
            discord_token: get("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            application_id: parse_required(&get, "APPLICATION_ID")?,
            guild_id: parse_optional(&get, "GUILD_ID")?,
            owner_ids: match get("OWNER_IDS") {
                Some(list) => parse_owner_ids(&list)?,
                None => Vec::new(),
            },

            default_volume: parse_or(&get, "DEFAULT_VOLUME", 0.5)?,
            max_queue_size: parse_or(&get, "MAX_QUEUE_SIZE", 1000)?,
            cache_size: parse_or(&get, "CACHE_SIZE", 100)?,

            idle_timeout: duration_or(&get, "IDLE_TIMEOUT", Duration::from_secs(300))?,
            alone_timeout: duration_or(&get, "ALONE_TIMEOUT", Duration::from_secs(60))?,
            voice_connect_timeout: duration_or(
                &get,
                "VOICE_CONNECT_TIMEOUT",
                Duration::from_secs(10),
            )?,
            track_resolve_timeout: duration_or(
                &get,
                "TRACK_RESOLVE_TIMEOUT",
                Duration::from_secs(25),
            )?,
            default_cooldown: duration_or(&get, "DEFAULT_COOLDOWN", Duration::from_secs(3))?,

            data_dir: get("DATA_DIR").unwrap_or_else(|| "./data".to_string()).into(),

            openai_api_key: get("OPENAI_API_KEY"),
            openai_model: get("OPENAI_MODEL").unwrap_or_else(|| "gpt-3.5-turbo".to_string()),
            spotify_client_id: get("SPOTIFY_CLIENT_ID"),
            spotify_client_secret: get("SPOTIFY_CLIENT_SECRET"),
            support_server: get("SUPPORT_SERVER")
                .unwrap_or_else(|| DEFAULT_SUPPORT_SERVER.to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.application_id == 0 {
            anyhow::bail!("APPLICATION_ID must be a valid snowflake");
        }

        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!(
                "Default volume must be between 0.0 and 2.0, got: {}",
                self.default_volume
            );
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.cache_size == 0 {
            anyhow::bail!("Cache size must be greater than 0");
        }

        for (name, value) in [
            ("IDLE_TIMEOUT", self.idle_timeout),
            ("ALONE_TIMEOUT", self.alone_timeout),
            ("VOICE_CONNECT_TIMEOUT", self.voice_connect_timeout),
            ("TRACK_RESOLVE_TIMEOUT", self.track_resolve_timeout),
        ] {
            if value.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            anyhow::bail!("SPOTIFY_CLIENT_ID and SPOTIFY_CLIENT_SECRET must be set together");
        }

        url::Url::parse(&self.support_server)
            .with_context(|| format!("SUPPORT_SERVER is not a URL: {}", self.support_server))?;

        Ok(())
    }

    pub fn spotify_credentials(&self) -> Option<(String, String)> {
        Some((
            self.spotify_client_id.clone()?,
            self.spotify_client_secret.clone()?,
        ))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            idle_timeout: self.idle_timeout,
            connect_timeout: self.voice_connect_timeout,
            resolve_timeout: self.track_resolve_timeout,
            default_volume: self.default_volume,
            max_queue: self.max_queue_size,
        }
    }

    /// Startup log summary. Never includes secrets.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {}), {} owner(s)\n  \
            Audio: {}% vol, {} queue, {} cached lookups\n  \
            Timeouts: idle {}, alone {}, connect {}, resolve {}\n  \
            Cooldown: {} default\n  \
            Data: {}\n  \
            Integrations: AI={}, Spotify={}",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.owner_ids.len(),
            (self.default_volume * 100.0).round() as u32,
            self.max_queue_size,
            self.cache_size,
            humantime::format_duration(self.idle_timeout),
            humantime::format_duration(self.alone_timeout),
            humantime::format_duration(self.voice_connect_timeout),
            humantime::format_duration(self.track_resolve_timeout),
            humantime::format_duration(self.default_cooldown),
            self.data_dir.display(),
            enabled(self.openai_api_key.is_some()),
            enabled(self.spotify_client_id.is_some()),
        )
    }
}

fn enabled(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

fn parse_required<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = get(key).with_context(|| format!("{} is not set", key))?;
    raw.trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("{} is invalid ({}): {}", key, raw, e))
}

fn parse_optional<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(_) => parse_required(get, key).map(Some),
        None => Ok(None),
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse_optional(get, key)?.unwrap_or(default))
}

fn duration_or(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration> {
    match get(key) {
        Some(raw) => humantime::parse_duration(raw.trim())
            .with_context(|| format!("{} is not a duration (e.g. \"30s\", \"5m\"): {}", key, raw)),
        None => Ok(default),
    }
}

fn parse_owner_ids(list: &str) -> Result<Vec<UserId>> {
    list.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| match id.parse::<u64>() {
            Ok(n) if n > 0 => Ok(UserId::new(n)),
            _ => anyhow::bail!("OWNER_IDS contains an invalid user id: {}", id),
        })
        .collect()
}
