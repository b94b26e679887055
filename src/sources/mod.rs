//! # Sources
//!
//! Turns what a user typed into `/play` into something the voice transport
//! can stream. Resolution is lazy: a [`TrackRequest`] sits in the queue
//! unresolved and is only handed to a [`TrackResolver`] when it reaches the
//! head of the queue.
//!
//! - [`youtube`]: yt-dlp metadata lookup and search (default for everything)
//! - [`direct_url`]: plain HTTP links to audio files
//! - [`spotify`]: Spotify track links, matched to a YouTube upload
//! - [`SourceRouter`]: picks one of the above by URL shape and caches metadata

pub mod direct_url;
pub mod spotify;
pub mod youtube;

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::UserId;
use std::{sync::Arc, time::Duration};
use tracing::debug;

pub use direct_url::DirectUrlResolver;
pub use spotify::SpotifyResolver;
pub use youtube::YtDlpResolver;

use crate::cache::{CachedTrackInfo, MusicCache};

/// A user's request to play something, as queued.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRequest {
    /// Id of the interaction that queued it. Retries of the same interaction
    /// carry the same id.
    pub request_id: u64,
    /// URL or free-text search terms.
    pub query: String,
    pub requested_by: UserId,
    pub title_hint: Option<String>,
    pub duration_hint: Option<Duration>,
}

impl TrackRequest {
    pub fn new(request_id: u64, query: impl Into<String>, requested_by: UserId) -> Self {
        Self {
            request_id,
            query: query.into(),
            requested_by,
            title_hint: None,
            duration_hint: None,
        }
    }

    /// Best available label before the track has been resolved.
    pub fn display_title(&self) -> &str {
        self.title_hint.as_deref().unwrap_or(&self.query)
    }

    pub fn is_url(&self) -> bool {
        is_url(&self.query)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    /// Canonical page URL of the track.
    pub url: String,
    pub source: SourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    YouTube,
    Spotify,
    Direct,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::YouTube => "YouTube",
            Self::Spotify => "Spotify",
            Self::Direct => "Direct link",
        }
    }
}

/// Where the transport should pull audio from.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamLocator {
    /// Page URL that yt-dlp can extract audio from.
    YoutubeDl(String),
    /// Direct audio file over HTTP.
    Http(String),
}

/// A playable stream handle plus its metadata. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub metadata: TrackMetadata,
    pub stream: StreamLocator,
}

/// External media provider boundary: may fail or hang, callers bound it
/// with a timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack>;
}

pub fn is_url(query: &str) -> bool {
    url::Url::parse(query)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Dispatches a request to the resolver that understands its URL, and caches
/// the metadata of every successful resolution by query.
pub struct SourceRouter {
    youtube: Arc<dyn TrackResolver>,
    direct: Arc<dyn TrackResolver>,
    spotify: Option<Arc<SpotifyResolver>>,
    cache: Arc<MusicCache>,
}

impl SourceRouter {
    pub fn new(
        youtube: Arc<dyn TrackResolver>,
        direct: Arc<dyn TrackResolver>,
        spotify: Option<Arc<SpotifyResolver>>,
        cache: Arc<MusicCache>,
    ) -> Self {
        Self {
            youtube,
            direct,
            spotify,
            cache,
        }
    }

    fn resolver_for(&self, request: &TrackRequest) -> Result<Arc<dyn TrackResolver>> {
        if SpotifyResolver::is_spotify_url(&request.query) {
            return match &self.spotify {
                Some(spotify) => Ok(spotify.clone() as Arc<dyn TrackResolver>),
                None => Err(crate::error::BotError::Unavailable("Spotify playback").into()),
            };
        }
        if DirectUrlResolver::is_audio_url(&request.query) {
            return Ok(self.direct.clone());
        }
        Ok(self.youtube.clone())
    }
}

#[async_trait]
impl TrackResolver for SourceRouter {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack> {
        if let Some(cached) = self.cache.get(&request.query) {
            debug!("💾 Cache hit for {}", request.query);
            return Ok(cached.into_resolved());
        }

        let resolved = self.resolver_for(request)?.resolve(request).await?;
        self.cache
            .put(request.query.clone(), CachedTrackInfo::from_resolved(&resolved));
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolved(url: &str) -> ResolvedTrack {
        ResolvedTrack {
            metadata: TrackMetadata {
                title: "Song".into(),
                artist: None,
                duration: Some(Duration::from_secs(200)),
                thumbnail: None,
                url: url.into(),
                source: SourceKind::YouTube,
            },
            stream: StreamLocator::YoutubeDl(url.into()),
        }
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(!is_url("never gonna give you up"));
        assert!(!is_url("ftp://example.com/a.mp3"));
    }

    #[test]
    fn test_display_title_prefers_hint() {
        let mut request = TrackRequest::new(1, "lofi beats", UserId::new(1));
        assert_eq!(request.display_title(), "lofi beats");
        request.title_hint = Some("Lofi Girl".into());
        assert_eq!(request.display_title(), "Lofi Girl");
    }

    #[tokio::test]
    async fn test_router_uses_cache_on_second_lookup() {
        let mut youtube = MockTrackResolver::new();
        youtube
            .expect_resolve()
            .times(1)
            .returning(|req| Ok(resolved(&format!("https://youtube.com/{}", req.query))));
        let direct = MockTrackResolver::new();

        let router = SourceRouter::new(
            Arc::new(youtube),
            Arc::new(direct),
            None,
            Arc::new(MusicCache::new(10)),
        );
        let request = TrackRequest::new(1, "lofi", UserId::new(1));

        let first = router.resolve(&request).await.unwrap();
        let second = router.resolve(&request).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_router_sends_audio_files_to_direct() {
        let youtube = MockTrackResolver::new();
        let mut direct = MockTrackResolver::new();
        direct
            .expect_resolve()
            .times(1)
            .returning(|req| Ok(resolved(&req.query)));

        let router = SourceRouter::new(
            Arc::new(youtube),
            Arc::new(direct),
            None,
            Arc::new(MusicCache::new(10)),
        );
        let request = TrackRequest::new(1, "https://cdn.example.com/song.mp3", UserId::new(1));
        assert!(router.resolve(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_spotify_without_credentials_is_unavailable() {
        let router = SourceRouter::new(
            Arc::new(MockTrackResolver::new()),
            Arc::new(MockTrackResolver::new()),
            None,
            Arc::new(MusicCache::new(10)),
        );
        let request = TrackRequest::new(
            1,
            "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC",
            UserId::new(1),
        );

        let err = router.resolve(&request).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<crate::error::BotError>(),
            Some(&crate::error::BotError::Unavailable("Spotify playback"))
        );
    }
}
