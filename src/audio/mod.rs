//! # Audio Module
//!
//! Per-guild music sessions and the voice transport they drive.
//!
//! ## Architecture
//!
//! ### [`manager`] - Session Manager
//! - Keyed registry of live sessions, at most one per guild
//! - Serialises joins per guild and exposes `Connecting` while a voice
//!   connection is being negotiated
//! - Forwards every operation to the owning session as a message
//!
//! ### [`session`] - Guild Session
//! - One task per guild, the single writer of that guild's queue and
//!   playback cursor
//! - Owns the idle timer, the in-flight resolution and the playback handle
//! - Publishes a [`SessionSnapshot`] after every change
//!
//! ### [`queue`] - Queue
//! - FIFO with loop modes, shuffle and retry de-duplication
//!
//! ### [`transport`] - Voice Transport
//! - Trait seam over songbird so sessions can be driven by a fake in tests
//!
//! ## State machine
//!
//! ```text
//! NoSession ──join──▶ Connecting ──ok──▶ Idle ⇄ Playing ⇄ Paused
//!     ▲                    │                       │
//!     └────── failure ─────┘◀──── leave / idle ────┘
//! ```
//!
//! Typical command flow, each call carrying the text channel it came from:
//!
//! ```text
//! join(guild, voice, text)        -> Joined(voice) | AlreadyConnected(voice)
//! enqueue(guild, request, text)   -> Started | Queued { position } | AlreadyQueued
//! pause(guild, text) / resume(guild, text)
//! leave(guild)                    -> NoSession
//! ```

pub mod manager;
pub mod queue;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::fmt;

use crate::error::BotError;

pub use manager::{JoinOutcome, MusicSessionManager};
pub use queue::{LoopMode, QueueItem};
pub use session::{EnqueueOutcome, SessionSettings};
pub use transport::{PlaybackHandle, SongbirdTransport, TrackEndNotifier, VoiceTransport};

/// Tracks listed per `/queue` page.
pub const QUEUE_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    NoSession,
    Connecting,
    Idle,
    Playing,
    Paused,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NoSession => "not connected",
            Self::Connecting => "connecting",
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// Read-only view of a session, published after every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub voice_channel: Option<ChannelId>,
    pub now_playing: Option<QueueItem>,
    pub queue: Vec<QueueItem>,
    pub volume: f32,
    pub loop_mode: LoopMode,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::NoSession,
            voice_channel: None,
            now_playing: None,
            queue: Vec::new(),
            volume: 0.5,
            loop_mode: LoopMode::Off,
        }
    }
}

impl SessionSnapshot {
    pub fn total_pages(&self) -> usize {
        self.queue.len().div_ceil(QUEUE_PAGE_SIZE).max(1)
    }

    /// Entries of a 1-based page with their 1-based queue positions.
    /// Out-of-range pages are clamped to the last one.
    pub fn page(&self, page: usize) -> (usize, Vec<(usize, &QueueItem)>) {
        let page = page.clamp(1, self.total_pages());
        let start = (page - 1) * QUEUE_PAGE_SIZE;
        let entries = self
            .queue
            .iter()
            .enumerate()
            .skip(start)
            .take(QUEUE_PAGE_SIZE)
            .map(|(index, item)| (index + 1, item))
            .collect();
        (page, entries)
    }
}

/// Something the session wants a text channel to know about, outside of any
/// command reply.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    NowPlaying(QueueItem),
    TrackFailed(BotError),
    IdleDisconnect,
}

/// Delivers [`SessionNotice`]s to the channel that last interacted with the
/// session.
#[async_trait]
pub trait NoticeSink: Send + Sync {
    async fn notify(&self, guild_id: GuildId, channel_id: ChannelId, notice: SessionNotice);
}
