//! # Cooldown & Permission Gate
//!
//! Every command request passes through [`CommandGate::admit`] before the
//! router looks at its arguments. The gate checks, in order:
//!
//! 1. guild-only commands are not used in DMs
//! 2. the invoker holds the route's permission bitset (owners and
//!    administrators bypass this)
//! 3. the invoker holds at least one of the route's roles, if any are listed
//! 4. the cooldown window for the (user|guild, command) key has elapsed
//!
//! A denied request never writes a cooldown entry, so a user hammering a
//! blocked command always gets an accurate retry time.

pub mod cooldown;

use serenity::all::{Permissions, RoleId, UserId};
use std::{
    collections::HashSet,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::time::Instant;
use tracing::debug;

pub use cooldown::{Cooldown, CooldownKey, CooldownScope, CooldownTable};

use crate::{error::BotError, router::CommandRequest};

/// How often (in admissions) stale cooldown entries are swept inline.
const PURGE_EVERY: u64 = 256;

/// Static access rules declared by a route.
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    pub permissions: Permissions,
    pub any_role: Vec<RoleId>,
    pub cooldown: Option<Cooldown>,
    pub guild_only: bool,
}

impl CommandPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn permissions(mut self, permissions: Permissions) -> Self {
        self.permissions = permissions;
        self
    }

    #[allow(dead_code)]
    pub fn any_role(mut self, roles: impl IntoIterator<Item = RoleId>) -> Self {
        self.any_role = roles.into_iter().collect();
        self
    }

    pub fn cooldown(mut self, cooldown: Cooldown) -> Self {
        self.cooldown = Some(cooldown);
        self
    }

    pub fn guild_only(mut self) -> Self {
        self.guild_only = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Allow,
    Deny(BotError),
}

#[derive(Debug, Default)]
pub struct CommandGate {
    cooldowns: CooldownTable,
    owners: HashSet<UserId>,
    admissions: AtomicU64,
}

impl CommandGate {
    pub fn new(owners: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            cooldowns: CooldownTable::new(),
            owners: owners.into_iter().collect(),
            admissions: AtomicU64::new(0),
        }
    }

    pub fn admit(&self, request: &CommandRequest, policy: &CommandPolicy) -> Admission {
        self.admit_at(request, policy, Instant::now())
    }

    pub fn admit_at(
        &self,
        request: &CommandRequest,
        policy: &CommandPolicy,
        now: Instant,
    ) -> Admission {
        if policy.guild_only && request.guild_id.is_none() {
            return self.deny(request, BotError::GuildOnly);
        }

        if !self.is_privileged(request) {
            let missing = policy.permissions - request.permissions;
            if !missing.is_empty() {
                return self.deny(request, BotError::InsufficientPermission { missing });
            }

            if !policy.any_role.is_empty()
                && !policy.any_role.iter().any(|role| request.roles.contains(role))
            {
                return self.deny(request, BotError::MissingRole);
            }
        }

        if let Some(cooldown) = policy.cooldown {
            let key = match (cooldown.scope, request.guild_id) {
                (CooldownScope::Guild, Some(guild_id)) => {
                    CooldownKey::Guild(guild_id, request.path.clone())
                }
                // DMs have no guild to charge, fall back to the user.
                _ => CooldownKey::User(request.user_id, request.path.clone()),
            };

            if let Err(retry_after) = self.cooldowns.check_and_record(key, cooldown.window, now) {
                return self.deny(request, BotError::RateLimited { retry_after });
            }
        }

        if self.admissions.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            let removed = self.cooldowns.purge_expired(now);
            if removed > 0 {
                debug!("🧹 Purged {} stale cooldown entries", removed);
            }
        }

        Admission::Allow
    }

    /// Periodic sweep, called from the maintenance task.
    pub fn purge_expired(&self) -> usize {
        self.cooldowns.purge_expired(Instant::now())
    }

    #[cfg(test)]
    pub fn cooldowns(&self) -> &CooldownTable {
        &self.cooldowns
    }

    fn is_privileged(&self, request: &CommandRequest) -> bool {
        self.owners.contains(&request.user_id)
            || request.permissions.contains(Permissions::ADMINISTRATOR)
    }

    fn deny(&self, request: &CommandRequest, reason: BotError) -> Admission {
        debug!(
            "🚫 /{} denied for {} ({:?})",
            request.path, request.user_id, reason
        );
        Admission::Deny(reason)
    }
}
