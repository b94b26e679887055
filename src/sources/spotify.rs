use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use regex::Regex;
use reqwest::{header, Client};
use serde::Deserialize;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info};

use super::{ResolvedTrack, SourceKind, TrackMetadata, TrackRequest, TrackResolver, YtDlpResolver};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_URL: &str = "https://api.spotify.com/v1";
/// Refresh the token this long before Spotify says it expires.
const TOKEN_MARGIN: Duration = Duration::from_secs(60);

/// Spotify only provides metadata. Each track link is matched to a YouTube
/// upload by "artist - title", and that upload is what gets streamed.
pub struct SpotifyResolver {
    http: Client,
    client_id: String,
    client_secret: String,
    track_id: Regex,
    token: Mutex<Option<(String, Instant)>>,
    youtube: Arc<YtDlpResolver>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SpotifyTrack {
    name: String,
    duration_ms: u64,
    artists: Vec<SpotifyArtist>,
    album: SpotifyAlbum,
    external_urls: SpotifyUrls,
}

#[derive(Debug, Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyAlbum {
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Debug, Deserialize)]
struct SpotifyImage {
    url: String,
}

#[derive(Debug, Deserialize)]
struct SpotifyUrls {
    spotify: String,
}

impl SpotifyResolver {
    pub fn new(
        http: Client,
        client_id: String,
        client_secret: String,
        youtube: Arc<YtDlpResolver>,
    ) -> Result<Self> {
        Ok(Self {
            http,
            client_id,
            client_secret,
            track_id: Regex::new(r"/track/([A-Za-z0-9]{22})")?,
            token: Mutex::new(None),
            youtube,
        })
    }

    pub fn is_spotify_url(query: &str) -> bool {
        url::Url::parse(query)
            .ok()
            .and_then(|url| url.host_str().map(|host| host == "open.spotify.com"))
            .unwrap_or(false)
    }

    fn track_id<'a>(&self, link: &'a str) -> Option<&'a str> {
        self.track_id
            .captures(link)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    async fn access_token(&self) -> Result<String> {
        if let Some((token, expires_at)) = self.token.lock().as_ref() {
            if Instant::now() < *expires_at {
                return Ok(token.clone());
            }
        }

        debug!("🔑 Requesting Spotify access token");
        let credentials = STANDARD.encode(format!("{}:{}", self.client_id, self.client_secret));
        let response: TokenResponse = self
            .http
            .post(TOKEN_URL)
            .header(header::AUTHORIZATION, format!("Basic {}", credentials))
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await
            .context("Spotify token request failed")?
            .error_for_status()
            .context("Spotify rejected the client credentials")?
            .json()
            .await?;

        let lifetime = Duration::from_secs(response.expires_in).saturating_sub(TOKEN_MARGIN);
        *self.token.lock() = Some((response.access_token.clone(), Instant::now() + lifetime));
        Ok(response.access_token)
    }

    async fn fetch_track(&self, id: &str) -> Result<SpotifyTrack> {
        let token = self.access_token().await?;
        let track = self
            .http
            .get(format!("{}/tracks/{}", API_URL, id))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()
            .context("Spotify track lookup failed")?
            .json()
            .await?;
        Ok(track)
    }
}

#[async_trait]
impl TrackResolver for SpotifyResolver {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack> {
        let id = self
            .track_id(&request.query)
            .context("only Spotify track links are supported")?;
        let track = self.fetch_track(id).await?;

        let artist = track
            .artists
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let search = format!("{} - {} audio", artist, track.name);
        info!("🎧 Matching Spotify track on YouTube: {}", search);

        let matched = self
            .youtube
            .resolve(&TrackRequest::new(request.request_id, search, request.requested_by))
            .await?;

        Ok(ResolvedTrack {
            metadata: TrackMetadata {
                title: track.name,
                artist: (!artist.is_empty()).then_some(artist),
                duration: Some(Duration::from_millis(track.duration_ms)),
                thumbnail: track.album.images.into_iter().next().map(|image| image.url),
                url: track.external_urls.spotify,
                source: SourceKind::Spotify,
            },
            stream: matched.stream,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver() -> SpotifyResolver {
        SpotifyResolver::new(
            Client::new(),
            "id".into(),
            "secret".into(),
            Arc::new(YtDlpResolver::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_spotify_url_detection() {
        assert!(SpotifyResolver::is_spotify_url(
            "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"
        ));
        assert!(!SpotifyResolver::is_spotify_url("https://www.youtube.com/watch?v=abc"));
        assert!(!SpotifyResolver::is_spotify_url("spotify rick astley"));
    }

    #[test]
    fn test_extracts_track_id() {
        let resolver = resolver();
        assert_eq!(
            resolver.track_id("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=x"),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            resolver.track_id("https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M"),
            None
        );
    }
}
