use serenity::all::Permissions;
use std::time::Duration;
use thiserror::Error;

use crate::audio::SessionState;

/// Errors that end up in front of the invoking user.
///
/// Gate and router variants short-circuit before a handler runs. Music
/// variants come back from the guild's session. Anything else a handler
/// fails with is collapsed into [`BotError::HandlerFailure`] by the router.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BotError {
    #[error("You need the following permissions: {}", permission_list(.missing))]
    InsufficientPermission { missing: Permissions },

    #[error("You don't have any of the roles this command requires")]
    MissingRole,

    #[error("This command can only be used inside a server")]
    GuildOnly,

    #[error("Slow down! Try again in {}", format_retry(.retry_after))]
    RateLimited { retry_after: Duration },

    #[error("Invalid value for `{field}`: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("Unknown command `/{0}`")]
    UnknownCommand(String),

    #[error("Something went wrong while running this command")]
    HandlerFailure,

    #[error("Could not connect to the voice channel: {0}")]
    ConnectionFailed(String),

    #[error("Can't {action} while {state}")]
    InvalidStateTransition {
        action: &'static str,
        state: SessionState,
    },

    #[error("Could not play `{title}`: {reason}")]
    TrackResolutionFailed { title: String, reason: String },

    #[error("The queue is full (max {0} tracks)")]
    QueueFull(usize),

    #[error("You need to be in a voice channel")]
    NotInVoice,

    #[error("{0} is not available on this bot")]
    Unavailable(&'static str),

    #[error("This server's details haven't loaded yet, try again in a moment")]
    GuildNotCached,
}

impl BotError {
    /// Whether the reply should only be visible to the invoker.
    ///
    /// Every denial and validation error is private; only music failures that
    /// affect the whole channel are posted publicly.
    pub fn is_ephemeral(&self) -> bool {
        !matches!(self, Self::TrackResolutionFailed { .. })
    }

    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

fn permission_list(missing: &Permissions) -> String {
    missing.get_permission_names().join(", ")
}

fn format_retry(retry_after: &Duration) -> String {
    // Round up so "0s" is never shown for a pending cooldown.
    let secs = retry_after.as_millis().div_ceil(1000).max(1) as u64;
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}
