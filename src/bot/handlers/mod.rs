//! Slash command handlers, grouped by feature.

pub mod ai;
pub mod music;
pub mod tags;
pub mod utility;

use std::time::Duration;

use super::context::CommandContext;
use crate::router::CommandRouter;

/// Registers every command. `default_cooldown` applies to routes that don't
/// declare their own.
pub fn build_router(default_cooldown: Duration) -> CommandRouter<CommandContext> {
    let mut router = CommandRouter::new().with_default_cooldown(default_cooldown);

    music::register(&mut router);
    tags::register(&mut router);
    ai::register(&mut router);
    // Last, so `/help` can list everything above.
    utility::register(&mut router);

    router
}
