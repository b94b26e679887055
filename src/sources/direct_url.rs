use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::{ResolvedTrack, SourceKind, StreamLocator, TrackMetadata, TrackRequest, TrackResolver};

const AUDIO_EXTENSIONS: [&str; 7] = [".mp3", ".wav", ".ogg", ".opus", ".flac", ".m4a", ".aac"];

/// Plays audio files linked directly over HTTP(S).
pub struct DirectUrlResolver {
    http: Client,
}

impl DirectUrlResolver {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    /// An http(s) URL whose path ends in a known audio extension.
    pub fn is_audio_url(query: &str) -> bool {
        url::Url::parse(query)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .map(|url| {
                let path = url.path().to_lowercase();
                AUDIO_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            })
            .unwrap_or(false)
    }
}

/// Decoded file name without its extension, e.g. `My%20Song.mp3` → `My Song`.
fn title_from_url(link: &str) -> Option<String> {
    let url = url::Url::parse(link).ok()?;
    let file = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(file).ok()?;
    let stem = decoded
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(decoded.as_ref());

    (!stem.is_empty()).then(|| stem.to_string())
}

#[async_trait]
impl TrackResolver for DirectUrlResolver {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack> {
        debug!("🔗 Checking direct link {}", request.query);

        let response = self
            .http
            .head(&request.query)
            .send()
            .await
            .context("link is unreachable")?;

        if !response.status().is_success() {
            anyhow::bail!("link returned HTTP {}", response.status());
        }

        let title = request
            .title_hint
            .clone()
            .or_else(|| title_from_url(&request.query))
            .unwrap_or_else(|| request.query.clone());

        Ok(ResolvedTrack {
            metadata: TrackMetadata {
                title,
                artist: None,
                duration: request.duration_hint,
                thumbnail: None,
                url: request.query.clone(),
                source: SourceKind::Direct,
            },
            stream: StreamLocator::Http(request.query.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_audio_url_detection() {
        assert!(DirectUrlResolver::is_audio_url("https://cdn.example.com/a/song.MP3"));
        assert!(DirectUrlResolver::is_audio_url("http://example.com/clip.ogg?token=1"));
        assert!(!DirectUrlResolver::is_audio_url("https://www.youtube.com/watch?v=abc"));
        assert!(!DirectUrlResolver::is_audio_url("song.mp3"));
    }

    #[test]
    fn test_title_from_url() {
        assert_eq!(
            title_from_url("https://cdn.example.com/music/My%20Song.mp3").as_deref(),
            Some("My Song")
        );
        assert_eq!(title_from_url("https://cdn.example.com/"), None);
    }
}
