use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reqwest::Client;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    error::JoinError,
    events::CoreEvent,
    input::{HttpRequest, Input, YoutubeDl},
    tracks::TrackHandle,
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::sources::{ResolvedTrack, StreamLocator};

/// Voice connection and audio output for guilds.
#[async_trait]
pub trait VoiceTransport: Send + Sync {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()>;

    /// Starts streaming `track`. `on_end` fires once the track finishes or
    /// errors out, but not for a track that is merely paused.
    async fn play(
        &self,
        guild_id: GuildId,
        track: &ResolvedTrack,
        volume: f32,
        on_end: TrackEndNotifier,
    ) -> Result<Box<dyn PlaybackHandle>>;

    async fn disconnect(&self, guild_id: GuildId) -> Result<()>;
}

/// Control over the one track a session is currently streaming.
pub trait PlaybackHandle: Send + Sync {
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn set_volume(&self, volume: f32) -> Result<()>;
}

/// Reports the end of a track back to its session, tagged with the
/// generation it was started under so late events are recognisable.
#[derive(Debug, Clone)]
pub struct TrackEndNotifier {
    tx: mpsc::UnboundedSender<u64>,
    generation: u64,
}

impl TrackEndNotifier {
    pub fn new(tx: mpsc::UnboundedSender<u64>, generation: u64) -> Self {
        Self { tx, generation }
    }

    pub fn notify(&self) {
        // The session may already be gone.
        let _ = self.tx.send(self.generation);
    }
}

/// songbird-backed transport.
pub struct SongbirdTransport {
    songbird: Arc<Songbird>,
    http: Client,
    lost_tx: mpsc::UnboundedSender<GuildId>,
}

impl SongbirdTransport {
    /// `lost_tx` receives the guild whenever its voice connection drops for
    /// a reason other than our own `disconnect`.
    pub fn new(songbird: Arc<Songbird>, http: Client, lost_tx: mpsc::UnboundedSender<GuildId>) -> Self {
        Self {
            songbird,
            http,
            lost_tx,
        }
    }

    fn input_for(&self, stream: &StreamLocator) -> Input {
        match stream {
            StreamLocator::YoutubeDl(url) => YoutubeDl::new(self.http.clone(), url.clone()).into(),
            StreamLocator::Http(url) => HttpRequest::new(self.http.clone(), url.clone()).into(),
        }
    }
}

#[async_trait]
impl VoiceTransport for SongbirdTransport {
    async fn connect(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<()> {
        info!("🔊 Joining voice channel {} in guild {}", channel_id, guild_id);
        let call = self.songbird.join(guild_id, channel_id).await?;

        call.lock().await.add_global_event(
            Event::Core(CoreEvent::DriverDisconnect),
            DisconnectNotifier {
                guild_id,
                tx: self.lost_tx.clone(),
            },
        );
        Ok(())
    }

    async fn play(
        &self,
        guild_id: GuildId,
        track: &ResolvedTrack,
        volume: f32,
        on_end: TrackEndNotifier,
    ) -> Result<Box<dyn PlaybackHandle>> {
        let call = self
            .songbird
            .get(guild_id)
            .context("not connected to a voice channel")?;

        let input = self.input_for(&track.stream);
        let handle = call.lock().await.play_input(input);
        handle.set_volume(volume)?;

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle.add_event(
                Event::Track(event),
                TrackEndHandler {
                    guild_id,
                    notifier: on_end.clone(),
                },
            )?;
        }

        debug!("▶️ Streaming {} in guild {}", track.metadata.title, guild_id);
        Ok(Box::new(SongbirdPlayback(handle)))
    }

    async fn disconnect(&self, guild_id: GuildId) -> Result<()> {
        match self.songbird.remove(guild_id).await {
            Ok(()) | Err(JoinError::NoCall) => {
                info!("👋 Left voice in guild {}", guild_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

struct SongbirdPlayback(TrackHandle);

impl PlaybackHandle for SongbirdPlayback {
    fn pause(&self) -> Result<()> {
        Ok(self.0.pause()?)
    }

    fn resume(&self) -> Result<()> {
        Ok(self.0.play()?)
    }

    fn stop(&self) -> Result<()> {
        Ok(self.0.stop()?)
    }

    fn set_volume(&self, volume: f32) -> Result<()> {
        Ok(self.0.set_volume(volume)?)
    }
}

struct TrackEndHandler {
    guild_id: GuildId,
    notifier: TrackEndNotifier,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(tracks) = ctx {
            for (state, _) in tracks.iter() {
                if let songbird::tracks::PlayMode::Errored(e) = &state.playing {
                    error!("❌ Track error in guild {}: {:?}", self.guild_id, e);
                }
            }
        }

        self.notifier.notify();
        None
    }
}

struct DisconnectNotifier {
    guild_id: GuildId,
    tx: mpsc::UnboundedSender<GuildId>,
}

#[async_trait]
impl VoiceEventHandler for DisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            // No reason means the disconnect was requested by us.
            if let Some(reason) = &data.reason {
                warn!("🔌 Voice connection lost in guild {}: {:?}", self.guild_id, reason);
                let _ = self.tx.send(self.guild_id);
            }
        }
        None
    }
}
