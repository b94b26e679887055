use parking_lot::RwLock;
use serenity::all::GuildId;
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use super::directory::GuildDirectory;
use crate::{ai::ChatClient, audio::MusicSessionManager, config::Config, storage::DocumentStore};

/// Shared state every command handler receives.
pub struct CommandContext {
    pub config: Arc<Config>,
    pub music: Arc<MusicSessionManager>,
    pub storage: Arc<dyn DocumentStore>,
    pub ai: Arc<ChatClient>,
    pub directory: Arc<dyn GuildDirectory>,
    pub status: BotStatus,
}

impl CommandContext {
    pub fn new(
        config: Arc<Config>,
        music: Arc<MusicSessionManager>,
        storage: Arc<dyn DocumentStore>,
        ai: Arc<ChatClient>,
        directory: Arc<dyn GuildDirectory>,
    ) -> Self {
        Self {
            config,
            music,
            storage,
            ai,
            directory,
            status: BotStatus::new(),
        }
    }

    /// Key for documents scoped to one guild and one name, e.g. tags.
    pub fn guild_key(guild_id: GuildId, name: &str) -> String {
        format!("{}_{}", guild_id, name)
    }
}

/// Gateway facts the handlers can't read from a `CommandRequest`.
pub struct BotStatus {
    started_at: Instant,
    guilds: AtomicUsize,
    latency: RwLock<Option<Duration>>,
}

impl BotStatus {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            guilds: AtomicUsize::new(0),
            latency: RwLock::new(None),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn guild_count(&self) -> usize {
        self.guilds.load(Ordering::Relaxed)
    }

    pub fn set_guild_count(&self, count: usize) {
        self.guilds.store(count, Ordering::Relaxed);
    }

    /// Last measured heartbeat round-trip, `None` until the first heartbeat.
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.read()
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }
}
