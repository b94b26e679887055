//! # Cache Module
//!
//! Metadata cache for resolved tracks. Looking a track up through yt-dlp or
//! the Spotify API takes seconds; popular queries are replayed often enough
//! that caching the result by query string pays off.
//!
//! Only metadata and the stream locator are cached, never audio. Entries
//! expire after [`DEFAULT_TTL`] and the least recently used entry is evicted
//! once `CACHE_SIZE` is reached.
//!
//! ```rust,no_run
//! use nova_bot::cache::MusicCache;
//!
//! let cache = MusicCache::new(100);
//! if let Some(cached) = cache.get(&"lofi beats".to_string()) {
//!     println!("Found cached track: {}", cached.title);
//! }
//! ```

pub mod lru_cache;

use lru_cache::LRUCache;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::sources::{ResolvedTrack, SourceKind, StreamLocator, TrackMetadata};

/// Resolved metadata stays valid for an hour; stream URLs from providers
/// typically stop working not long after.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Query string → resolved track info.
pub type MusicCache = LRUCache<String, CachedTrackInfo>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTrackInfo {
    pub title: String,
    pub artist: Option<String>,
    pub duration: Option<Duration>,
    pub thumbnail: Option<String>,
    pub url: String,
    /// "youtube", "spotify" or "direct"
    pub source: String,
    /// Audio location; a yt-dlp page URL or a direct HTTP link.
    pub stream_url: String,
    pub direct_stream: bool,
}

impl CachedTrackInfo {
    pub fn from_resolved(track: &ResolvedTrack) -> Self {
        let (stream_url, direct_stream) = match &track.stream {
            StreamLocator::YoutubeDl(url) => (url.clone(), false),
            StreamLocator::Http(url) => (url.clone(), true),
        };

        Self {
            title: track.metadata.title.clone(),
            artist: track.metadata.artist.clone(),
            duration: track.metadata.duration,
            thumbnail: track.metadata.thumbnail.clone(),
            url: track.metadata.url.clone(),
            source: match track.metadata.source {
                SourceKind::YouTube => "youtube",
                SourceKind::Spotify => "spotify",
                SourceKind::Direct => "direct",
            }
            .to_string(),
            stream_url,
            direct_stream,
        }
    }

    pub fn into_resolved(self) -> ResolvedTrack {
        let source = match self.source.as_str() {
            "spotify" => SourceKind::Spotify,
            "direct" => SourceKind::Direct,
            _ => SourceKind::YouTube,
        };
        let stream = if self.direct_stream {
            StreamLocator::Http(self.stream_url)
        } else {
            StreamLocator::YoutubeDl(self.stream_url)
        };

        ResolvedTrack {
            metadata: TrackMetadata {
                title: self.title,
                artist: self.artist,
                duration: self.duration,
                thumbnail: self.thumbnail,
                url: self.url,
                source,
            },
            stream,
        }
    }
}

impl MusicCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_ttl(capacity, DEFAULT_TTL)
    }

    /// Called hourly from the maintenance task.
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        let metrics = self.metrics();
        if removed > 0 {
            info!(
                "🧹 Cache cleanup: removed {} expired entries (hit rate {:.0}%)",
                removed,
                metrics.hit_rate() * 100.0
            );
        }
    }
}
