//! Per-user / per-guild command cooldowns.
//!
//! Fixed-window variant of the sliding-window rate limiter: each key remembers
//! only its last admitted invocation. Entries are created lazily, overwritten
//! on every admitted call and purged once their window has passed.

use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::{GuildId, UserId};
use std::time::Duration;
use tokio::time::Instant;

/// Which identity a cooldown window is charged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownScope {
    User,
    Guild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    pub window: Duration,
    pub scope: CooldownScope,
}

impl Cooldown {
    pub fn per_user(window: Duration) -> Self {
        Self {
            window,
            scope: CooldownScope::User,
        }
    }

    pub fn per_guild(window: Duration) -> Self {
        Self {
            window,
            scope: CooldownScope::Guild,
        }
    }
}

/// Composite key: the charged identity plus the full command path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CooldownKey {
    User(UserId, String),
    Guild(GuildId, String),
}

#[derive(Debug, Clone, Copy)]
pub struct CooldownEntry {
    pub last_invocation: Instant,
    pub window: Duration,
}

impl CooldownEntry {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        let elapsed = now.saturating_duration_since(self.last_invocation);
        (elapsed < self.window).then(|| self.window - elapsed)
    }
}

#[derive(Debug, Default)]
pub struct CooldownTable {
    entries: DashMap<CooldownKey, CooldownEntry>,
}

impl CooldownTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the time left on the key's window without touching it.
    pub fn remaining(&self, key: &CooldownKey, now: Instant) -> Option<Duration> {
        self.entries.get(key).and_then(|entry| entry.remaining(now))
    }

    /// Admits the call and records `now`, or returns how long to wait.
    ///
    /// The shard lock is held across check and write, so two concurrent calls
    /// on the same key cannot both pass.
    pub fn check_and_record(
        &self,
        key: CooldownKey,
        window: Duration,
        now: Instant,
    ) -> Result<(), Duration> {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if let Some(retry_after) = occupied.get().remaining(now) {
                    return Err(retry_after);
                }
                occupied.insert(CooldownEntry {
                    last_invocation: now,
                    window,
                });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CooldownEntry {
                    last_invocation: now,
                    window,
                });
            }
        }
        Ok(())
    }

    /// Drops every entry whose window has elapsed. Returns how many were removed.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.remaining(now).is_some());
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
