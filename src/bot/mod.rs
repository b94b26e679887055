//! # Bot Module
//!
//! The serenity side of Nova. Everything here translates between gateway
//! events and the platform-neutral core:
//!
//! - [`NovaBot`] implements serenity's [`EventHandler`]. Slash commands are
//!   converted into a [`CommandRequest`](crate::router::CommandRequest), run
//!   through the [`Dispatcher`] and the resulting [`Reply`] is sent back.
//! - [`commands`] derives the slash command definitions from the router.
//! - [`events`] covers voice presence (auto-leave, external disconnects) and
//!   mention chat.
//! - [`handlers`] holds the command implementations themselves.
//! - [`directory`] reads guild and member profiles from serenity's cache.
//! - [`ChannelNotifier`] posts session notices (now playing, failures) to
//!   the text channel a session is bound to.

use anyhow::Result;
use serenity::{
    all::{
        ChannelId, CommandInteraction, Context, EventHandler, Guild, GuildId, Http, Interaction,
        Message, Ready, UnavailableGuild, VoiceState,
    },
    async_trait,
    builder::{
        CreateInteractionResponse, CreateInteractionResponseFollowup,
        CreateInteractionResponseMessage, CreateMessage, EditInteractionResponse,
    },
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod context;
pub mod directory;
pub mod events;
pub mod handlers;

use crate::{
    audio::{NoticeSink, SessionNotice},
    cache::MusicCache,
    gate::CommandGate,
    router::Dispatcher,
    ui::{embeds, Reply},
};
use context::CommandContext;
use events::AloneWatcher;

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

pub struct NovaBot {
    context: Arc<CommandContext>,
    dispatcher: Arc<Dispatcher<CommandContext>>,
    gate: Arc<CommandGate>,
    cache: Arc<MusicCache>,
    alone: AloneWatcher,
    maintenance_started: AtomicBool,
}

impl NovaBot {
    pub fn new(
        context: Arc<CommandContext>,
        dispatcher: Arc<Dispatcher<CommandContext>>,
        gate: Arc<CommandGate>,
        cache: Arc<MusicCache>,
    ) -> Self {
        let alone = AloneWatcher::new(context.music.clone(), context.config.alone_timeout);
        Self {
            context,
            dispatcher,
            gate,
            cache,
            alone,
            maintenance_started: AtomicBool::new(false),
        }
    }

    /// Guild registration when `GUILD_ID` is set (instant, for development),
    /// global otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        let router = self.dispatcher.router();

        match self.context.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                let count = commands::register_guild_commands(ctx, router, guild_id).await?;
                info!("✅ Registered {} commands in guild {}", count, guild_id);
            }
            None => {
                let count = commands::register_global_commands(ctx, router).await?;
                info!("✅ Registered {} global commands", count);
            }
        }

        Ok(())
    }

    async fn handle_command(&self, ctx: &Context, command: CommandInteraction) -> Result<()> {
        let request = commands::to_request(ctx, &command);
        let deferred = self
            .dispatcher
            .router()
            .resolve(&request.path)
            .is_some_and(|route| route.deferred);

        if deferred {
            command.defer(&ctx.http).await?;
        }

        let reply = self.dispatcher.dispatch(&self.context, &request).await;

        if !deferred {
            let mut message = CreateInteractionResponseMessage::new().ephemeral(reply.ephemeral);
            message = if reply.plain {
                message.content(&reply.description)
            } else {
                message.embed(embeds::render(&reply))
            };
            command
                .create_response(&ctx.http, CreateInteractionResponse::Message(message))
                .await?;
        } else if reply.ephemeral {
            // A deferred response is public; swap it for a private followup.
            command.delete_response(&ctx.http).await?;
            let followup = CreateInteractionResponseFollowup::new()
                .ephemeral(true)
                .embed(embeds::render(&reply));
            command.create_followup(&ctx.http, followup).await?;
        } else {
            let edit = if reply.plain {
                EditInteractionResponse::new().content(&reply.description)
            } else {
                EditInteractionResponse::new().embed(embeds::render(&reply))
            };
            command.edit_response(&ctx.http, edit).await?;
        }

        Ok(())
    }

    fn start_maintenance(&self) {
        if self.maintenance_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let gate = self.gate.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                let purged = gate.purge_expired();
                cache.cleanup_old_entries();
                info!("🧹 Maintenance done, {} cooldown entries purged", purged);
            }
        });
    }
}

#[async_trait]
impl EventHandler for NovaBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🌸 {} is online in {} servers", ready.user.name, ready.guilds.len());
        self.context.status.set_guild_count(ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("❌ Could not register slash commands: {:?}", e);
        }

        self.start_maintenance();
    }

    async fn guild_create(&self, ctx: Context, _guild: Guild, _is_new: Option<bool>) {
        self.context.status.set_guild_count(ctx.cache.guild_count());
    }

    async fn guild_delete(&self, ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        self.context.status.set_guild_count(ctx.cache.guild_count());
        if !incomplete.unavailable {
            info!("👋 Removed from guild {}", incomplete.id);
            let _ = self.context.music.leave(incomplete.id).await;
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            let name = command.data.name.clone();
            if let Err(e) = self.handle_command(&ctx, command).await {
                error!("❌ Could not answer /{}: {:?}", name, e);
            }
        }
    }

    async fn message(&self, ctx: Context, message: Message) {
        events::on_message(&ctx, &self.context, &message).await;
    }

    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        events::on_voice_state_update(&ctx, &self.alone, &self.context.music, old, new).await;
    }
}

/// Posts session notices as embeds in the session's text channel.
pub struct ChannelNotifier {
    http: Arc<Http>,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl NoticeSink for ChannelNotifier {
    async fn notify(&self, guild_id: GuildId, channel_id: ChannelId, notice: SessionNotice) {
        let reply = notice_reply(&notice);
        debug!("📣 Notice for guild {}: {:?}", guild_id, notice);

        if let Err(e) = channel_id
            .send_message(&self.http, CreateMessage::new().embed(embeds::render(&reply)))
            .await
        {
            warn!("Could not post notice in {}: {:?}", channel_id, e);
        }
    }
}

fn notice_reply(notice: &SessionNotice) -> Reply {
    match notice {
        SessionNotice::NowPlaying(item) => embeds::now_playing_reply(item),
        SessionNotice::TrackFailed(e) => Reply::from_error(e),
        SessionNotice::IdleDisconnect => Reply::info(
            "Disconnected",
            "👋 Left the voice channel after being idle for a while.",
        ),
    }
}
