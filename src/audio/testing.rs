//! In-memory voice transport, resolver and notice sink for tests.

use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use super::{
    transport::{PlaybackHandle, TrackEndNotifier, VoiceTransport},
    NoticeSink, SessionNotice,
};
use crate::sources::{ResolvedTrack, SourceKind, StreamLocator, TrackMetadata, TrackRequest, TrackResolver};

pub(crate) const GUILD: GuildId = GuildId::new(10);
pub(crate) const VOICE: ChannelId = ChannelId::new(20);
pub(crate) const TEXT: ChannelId = ChannelId::new(30);
/// Connecting to this channel never completes.
pub(crate) const UNREACHABLE: ChannelId = ChannelId::new(666);

#[derive(Default)]
pub(crate) struct FakeTransport {
    pub(crate) connects: AtomicU64,
    pub(crate) disconnects: AtomicU64,
    pub(crate) played: StdMutex<Vec<(String, TrackEndNotifier)>>,
    pub(crate) events: Arc<StdMutex<Vec<String>>>,
}

impl FakeTransport {
    pub(crate) fn played_titles(&self) -> Vec<String> {
        self.played.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Ends the most recently started track as if it played out.
    pub(crate) fn finish_current(&self) {
        if let Some((_, notifier)) = self.played.lock().unwrap().last() {
            notifier.notify();
        }
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

struct FakePlayback {
    title: String,
    events: Arc<StdMutex<Vec<String>>>,
}

impl FakePlayback {
    fn record(&self, what: &str) -> Result<()> {
        self.events.lock().unwrap().push(format!("{what} {}", self.title));
        Ok(())
    }
}

impl PlaybackHandle for FakePlayback {
    fn pause(&self) -> Result<()> {
        self.record("pause")
    }
    fn resume(&self) -> Result<()> {
        self.record("resume")
    }
    fn stop(&self) -> Result<()> {
        self.record("stop")
    }
    fn set_volume(&self, _volume: f32) -> Result<()> {
        self.record("volume")
    }
}

#[async_trait]
impl VoiceTransport for FakeTransport {
    async fn connect(&self, _guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if channel_id == UNREACHABLE {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    }

    async fn play(
        &self,
        _guild_id: GuildId,
        track: &ResolvedTrack,
        _volume: f32,
        on_end: TrackEndNotifier,
    ) -> Result<Box<dyn PlaybackHandle>> {
        let title = track.metadata.title.clone();
        self.played.lock().unwrap().push((title.clone(), on_end));
        Ok(Box::new(FakePlayback {
            title,
            events: self.events.clone(),
        }))
    }

    async fn disconnect(&self, _guild_id: GuildId) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Resolves any query to a track titled after it. Queries starting with
/// `bad` fail and `slow` never finishes.
pub(crate) struct FakeResolver;

#[async_trait]
impl TrackResolver for FakeResolver {
    async fn resolve(&self, request: &TrackRequest) -> Result<ResolvedTrack> {
        if request.query.starts_with("bad") {
            anyhow::bail!("unsupported format");
        }
        if request.query.starts_with("slow") {
            std::future::pending::<()>().await;
        }
        Ok(ResolvedTrack {
            metadata: TrackMetadata {
                title: request.query.clone(),
                artist: None,
                duration: Some(Duration::from_secs(180)),
                thumbnail: None,
                url: format!("https://example.com/{}", request.query),
                source: SourceKind::YouTube,
            },
            stream: StreamLocator::YoutubeDl(format!("https://example.com/{}", request.query)),
        })
    }
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) notices: StdMutex<Vec<SessionNotice>>,
    /// Every notice with the channel it was addressed to.
    pub(crate) delivered: StdMutex<Vec<(ChannelId, SessionNotice)>>,
}

impl RecordingSink {
    /// Channel the first notice matching `wanted` went to.
    pub(crate) fn channel_of(&self, wanted: impl Fn(&SessionNotice) -> bool) -> Option<ChannelId> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .find(|(_, notice)| wanted(notice))
            .map(|(channel, _)| *channel)
    }
}

#[async_trait]
impl NoticeSink for RecordingSink {
    async fn notify(&self, _guild_id: GuildId, channel_id: ChannelId, notice: SessionNotice) {
        self.notices.lock().unwrap().push(notice.clone());
        self.delivered.lock().unwrap().push((channel_id, notice));
    }
}
