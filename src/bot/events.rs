//! Gateway events outside of slash commands: voice presence and mention chat.

use dashmap::DashMap;
use serenity::{
    all::{ChannelId, Context, GuildId, Message, UserId, VoiceState},
    builder::{CreateEmbed, CreateMessage},
};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    context::CommandContext,
    handlers::ai::{chat_trigger, server_settings, ChatTrigger},
};
use crate::{
    ai::Persona,
    audio::{MusicSessionManager, SessionState},
    ui::{embeds, Reply},
};

/// Leaves a guild's voice channel once no human has been listening for
/// `timeout`. Someone joining back cancels the pending leave.
pub struct AloneWatcher {
    music: Arc<MusicSessionManager>,
    timeout: Duration,
    pending: Arc<DashMap<GuildId, CancellationToken>>,
}

impl AloneWatcher {
    pub fn new(music: Arc<MusicSessionManager>, timeout: Duration) -> Self {
        Self {
            music,
            timeout,
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Arms or disarms the guild's timer.
    pub fn update(&self, guild_id: GuildId, alone: bool) {
        if !alone {
            if let Some((_, token)) = self.pending.remove(&guild_id) {
                debug!("👥 Listener back in guild {}, keeping the session", guild_id);
                token.cancel();
            }
            return;
        }

        if self.pending.contains_key(&guild_id) {
            return;
        }

        let token = CancellationToken::new();
        self.pending.insert(guild_id, token.clone());
        info!(
            "🚪 Alone in voice in guild {}, leaving in {}",
            guild_id,
            humantime::format_duration(self.timeout)
        );

        let music = self.music.clone();
        let pending = self.pending.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    pending.remove(&guild_id);
                    match music.leave(guild_id).await {
                        Ok(()) => info!("👋 Left guild {} after being alone", guild_id),
                        Err(e) => debug!("Alone timer in guild {} found no session: {}", guild_id, e),
                    }
                }
            }
        });
    }

    pub fn cancel(&self, guild_id: GuildId) {
        if let Some((_, token)) = self.pending.remove(&guild_id) {
            token.cancel();
        }
    }

    pub fn is_pending(&self, guild_id: GuildId) -> bool {
        self.pending.contains_key(&guild_id)
    }
}

/// Humans (non-bots) sharing `channel_id`, given `(user, channel, is_bot)`
/// for every voice state in the guild.
pub fn listeners_in(
    states: impl IntoIterator<Item = (UserId, Option<ChannelId>, bool)>,
    channel_id: ChannelId,
) -> usize {
    states
        .into_iter()
        .filter(|(_, channel, is_bot)| *channel == Some(channel_id) && !is_bot)
        .count()
}

pub async fn on_voice_state_update(
    ctx: &Context,
    watcher: &AloneWatcher,
    music: &MusicSessionManager,
    old: Option<VoiceState>,
    new: VoiceState,
) {
    let Some(guild_id) = new.guild_id else {
        return;
    };
    let bot_id = ctx.cache.current_user().id;

    if new.user_id == bot_id && new.channel_id.is_none() {
        watcher.cancel(guild_id);
        if old.is_some() && music.state(guild_id) != SessionState::NoSession {
            warn!("🔌 Disconnected from voice externally in guild {}", guild_id);
            if let Err(e) = music.leave(guild_id).await {
                debug!("Cleanup after external disconnect in guild {}: {}", guild_id, e);
            }
        }
        return;
    }

    // Copied out so the cache guard is released before anything awaits.
    let presence = ctx.cache.guild(guild_id).and_then(|guild| {
        let bot_channel = guild.voice_states.get(&bot_id)?.channel_id?;
        let states = guild.voice_states.values().map(|state| {
            let is_bot = state
                .member
                .as_ref()
                .map(|member| member.user.bot)
                .unwrap_or(state.user_id == bot_id);
            (state.user_id, state.channel_id, is_bot)
        });
        Some(listeners_in(states, bot_channel))
    });

    if let Some(listeners) = presence {
        watcher.update(guild_id, listeners == 0);
    }
}

/// Answers messages that mention the bot or start with "nova", in guilds
/// that turned AI chat on. Failures are logged, never posted.
pub async fn on_message(ctx: &Context, context: &CommandContext, message: &Message) {
    if message.author.bot || !context.ai.is_available() {
        return;
    }
    let Some(guild_id) = message.guild_id else {
        return;
    };

    let Some(trigger) = chat_trigger(&message.content, ctx.cache.current_user().id) else {
        return;
    };

    match server_settings(context.storage.as_ref(), guild_id).await {
        Ok(settings) if settings.ai_chat_enabled => {}
        Ok(_) => return,
        Err(e) => {
            warn!("Could not read settings for guild {}: {:?}", guild_id, e);
            return;
        }
    }

    let prompt = match trigger {
        ChatTrigger::Prompt(prompt) => prompt,
        ChatTrigger::TooLong => {
            let reply = Reply::warning("Message is too long for AI processing!");
            let embed: CreateEmbed = embeds::render(&reply);
            if let Err(e) = message
                .channel_id
                .send_message(&ctx.http, CreateMessage::new().embed(embed).reference_message(message))
                .await
            {
                warn!("Could not answer in {}: {:?}", message.channel_id, e);
            }
            return;
        }
    };

    let _ = message.channel_id.broadcast_typing(&ctx.http).await;
    match context.ai.complete(Persona::Casual, &prompt).await {
        Ok(answer) => {
            if let Err(e) = message.reply(&ctx.http, answer).await {
                warn!("Could not answer in {}: {:?}", message.channel_id, e);
            }
        }
        Err(e) => warn!("💬 AI chat failed in guild {}: {:?}", guild_id, e),
    }
}
