use anyhow::Result;
use async_trait::async_trait;
use serenity::all::{ChannelId, GuildId};
use std::sync::Arc;

use crate::{
    audio::{EnqueueOutcome, JoinOutcome, LoopMode, SessionState},
    bot::context::CommandContext,
    error::BotError,
    gate::CommandPolicy,
    router::{
        ArgSchema, ArgSpec, CommandHandler, CommandRequest, CommandRouter, Route, TypedArgs,
    },
    sources::TrackRequest,
    ui::{embeds, Reply},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MusicCommand {
    Join,
    Play,
    Pause,
    Resume,
    Skip,
    Stop,
    Leave,
    Queue,
    NowPlaying,
    Volume,
    Loop,
    Shuffle,
}

pub fn register(router: &mut CommandRouter<CommandContext>) {
    add(router, "join", "🔊 Join your voice channel", ArgSchema::new(), MusicCommand::Join).defer();
    add(
        router,
        "play",
        "🎵 Play a song from a URL or search terms",
        ArgSchema::new().arg(
            ArgSpec::string("query", "URL or search terms")
                .required()
                .length(1, 500),
        ),
        MusicCommand::Play,
    )
    .defer();
    add(router, "pause", "⏸️ Pause playback", ArgSchema::new(), MusicCommand::Pause);
    add(router, "resume", "▶️ Resume playback", ArgSchema::new(), MusicCommand::Resume);
    add(router, "skip", "⏭️ Skip the current song", ArgSchema::new(), MusicCommand::Skip);
    add(
        router,
        "stop",
        "⏹️ Stop playback and clear the queue",
        ArgSchema::new(),
        MusicCommand::Stop,
    );
    add(router, "leave", "👋 Leave the voice channel", ArgSchema::new(), MusicCommand::Leave);
    add(
        router,
        "queue",
        "📋 Show the queue",
        ArgSchema::new().arg(ArgSpec::integer("page", "Page number").range(1, 1000)),
        MusicCommand::Queue,
    );
    add(
        router,
        "nowplaying",
        "🎶 Show the current song",
        ArgSchema::new(),
        MusicCommand::NowPlaying,
    );
    add(
        router,
        "volume",
        "🔊 Set the playback volume",
        ArgSchema::new().arg(
            ArgSpec::integer("level", "Volume in percent (0-200)")
                .required()
                .range(0, 200),
        ),
        MusicCommand::Volume,
    );
    add(
        router,
        "loop",
        "🔁 Set the loop mode",
        ArgSchema::new().arg(
            ArgSpec::choice("mode", "Loop mode", &["off", "track", "queue"]).required(),
        ),
        MusicCommand::Loop,
    );
    add(router, "shuffle", "🔀 Shuffle the queue", ArgSchema::new(), MusicCommand::Shuffle);
}

/// Every music command needs a guild to have a session in.
fn add<'r>(
    router: &'r mut CommandRouter<CommandContext>,
    path: &str,
    description: &'static str,
    schema: ArgSchema,
    command: MusicCommand,
) -> &'r mut Route<CommandContext> {
    router.register(
        path,
        description,
        schema,
        CommandPolicy::new().guild_only(),
        Arc::new(command),
    )
}

#[async_trait]
impl CommandHandler<CommandContext> for MusicCommand {
    async fn handle(
        &self,
        ctx: &CommandContext,
        request: &CommandRequest,
        args: TypedArgs,
    ) -> Result<Reply> {
        let guild_id = request.guild_id.ok_or(BotError::GuildOnly)?;
        let music = &ctx.music;
        let channel = request.channel_id;

        let reply = match self {
            Self::Join => {
                let voice = user_voice_channel(request)?;
                match music.join(guild_id, voice, request.channel_id).await? {
                    JoinOutcome::Joined(channel) => {
                        Reply::success("Connected", format!("Joined <#{}>", channel))
                    }
                    JoinOutcome::AlreadyConnected(channel) => {
                        Reply::info("Already connected", format!("I'm already in <#{}>", channel))
                    }
                }
            }
            Self::Play => play(ctx, guild_id, request, &args).await?,
            Self::Pause => {
                music.pause(guild_id, channel).await?;
                Reply::music("⏸️ Paused", "Use `/resume` to continue")
            }
            Self::Resume => {
                music.resume(guild_id, channel).await?;
                Reply::music("▶️ Resumed", "Playback continues")
            }
            Self::Skip => {
                let skipped = music.skip(guild_id, channel).await?;
                let title = skipped
                    .map(|item| format!("Skipped **{}**", item.title()))
                    .unwrap_or_else(|| "Skipped".to_string());
                Reply::music("⏭️ Skipped", title)
            }
            Self::Stop => {
                let cleared = music.stop(guild_id, channel).await?;
                Reply::music(
                    "⏹️ Stopped",
                    format!("Playback stopped and {} track(s) removed from the queue", cleared),
                )
            }
            Self::Leave => {
                music.leave(guild_id).await?;
                Reply::success("Disconnected", "Left the voice channel 👋")
            }
            Self::Queue => {
                let page = args.integer("page").unwrap_or(1).max(1) as usize;
                let snapshot = music.snapshot(guild_id).unwrap_or_default();
                embeds::queue_reply(&snapshot, page)
            }
            Self::NowPlaying => {
                let snapshot = music.snapshot(guild_id).unwrap_or_default();
                match &snapshot.now_playing {
                    Some(item) => {
                        let mut reply = embeds::now_playing_reply(item)
                            .field("📶 Status", snapshot.state.to_string(), true)
                            .field("🔊 Volume", format!("{}%", percent(snapshot.volume)), true);
                        if snapshot.loop_mode != LoopMode::Off {
                            reply = reply.field("🔁 Loop", snapshot.loop_mode.to_string(), true);
                        }
                        reply
                    }
                    None => Reply::info("Now Playing", "Nothing is playing right now"),
                }
            }
            Self::Volume => {
                let level = args.integer("level").unwrap_or(50);
                let volume = level as f32 / 100.0;
                music.set_volume(guild_id, channel, volume).await?;
                embeds::volume_reply(volume)
            }
            Self::Loop => {
                let mode = args
                    .str("mode")
                    .and_then(LoopMode::parse)
                    .ok_or_else(|| BotError::invalid_argument("mode", "must be off, track or queue"))?;
                music.set_loop(guild_id, channel, mode).await?;
                let icon = match mode {
                    LoopMode::Off => "➡️",
                    LoopMode::Track => "🔂",
                    LoopMode::Queue => "🔁",
                };
                Reply::music(format!("{} Loop", icon), format!("Loop mode set to **{}**", mode))
            }
            Self::Shuffle => {
                let count = music.shuffle(guild_id, channel).await?;
                if count < 2 {
                    Reply::warning("Not enough songs in the queue to shuffle")
                } else {
                    Reply::music("🔀 Shuffled", format!("Shuffled {} songs", count))
                }
            }
        };

        Ok(reply)
    }
}

async fn play(
    ctx: &CommandContext,
    guild_id: GuildId,
    request: &CommandRequest,
    args: &TypedArgs,
) -> Result<Reply> {
    let query = args.required_str("query")?.trim();
    if query.is_empty() {
        return Err(BotError::invalid_argument("query", "must not be blank").into());
    }

    // Joining is idempotent and waits out a join that is still connecting.
    match request.voice_channel {
        Some(voice) => {
            ctx.music.join(guild_id, voice, request.channel_id).await?;
        }
        None if ctx.music.state(guild_id) == SessionState::NoSession => {
            return Err(BotError::NotInVoice.into());
        }
        None => {}
    }

    let track = TrackRequest::new(request.id, query, request.user_id);
    let reply = match ctx
        .music
        .enqueue(guild_id, track, request.channel_id)
        .await?
    {
        EnqueueOutcome::Started(item) => {
            Reply::music("🎶 Starting playback", format!("Loading **{}**...", item.title()))
        }
        EnqueueOutcome::Queued { item, position } => embeds::track_added_reply(&item, position),
        EnqueueOutcome::AlreadyQueued => {
            Reply::info("Already queued", "That request is already in the queue").ephemeral()
        }
    };
    Ok(reply)
}

fn user_voice_channel(request: &CommandRequest) -> Result<ChannelId, BotError> {
    request.voice_channel.ok_or(BotError::NotInVoice)
}

fn percent(volume: f32) -> u32 {
    (volume * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::testing::{GUILD, VOICE},
        bot::handlers::test_support::{request, Harness},
        router::ArgValue,
        ui::Tone,
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_joins_and_starts() {
        let harness = Harness::new().await;

        let reply = harness
            .dispatch(
                request("play", 1)
                    .voice_channel(Some(VOICE))
                    .arg("query", ArgValue::String("lofi".into()))
                    .build(),
            )
            .await;
        assert_eq!(reply.title.as_deref(), Some("🎶 Starting playback"));

        settle().await;
        assert_eq!(harness.ctx.music.state(GUILD), SessionState::Playing);
        assert_eq!(harness.transport.played_titles(), vec!["lofi"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_requires_voice_channel() {
        let harness = Harness::new().await;
        let reply = harness
            .dispatch(
                request("play", 1)
                    .arg("query", ArgValue::String("lofi".into()))
                    .build(),
            )
            .await;
        assert_eq!(reply, Reply::from_error(&BotError::NotInVoice));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_play_is_queued_with_position() {
        let harness = Harness::new().await;
        for (id, query) in [(1, "first"), (2, "second")] {
            harness
                .dispatch(
                    request("play", id)
                        .voice_channel(Some(VOICE))
                        .arg("query", ArgValue::String(query.into()))
                        .build(),
                )
                .await;
        }

        let reply = harness
            .dispatch(
                request("play", 3)
                    .voice_channel(Some(VOICE))
                    .arg("query", ArgValue::String("third".into()))
                    .build(),
            )
            .await;
        assert!(reply
            .fields
            .iter()
            .any(|(name, value, _)| name == "📍 Position" && value == "#2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_plays_share_one_connection() {
        let harness = Harness::new().await;
        let play = |id: u64, query: &str| {
            request("play", id)
                .voice_channel(Some(VOICE))
                .arg("query", ArgValue::String(query.into()))
                .build()
        };

        let (first, second) = tokio::join!(
            harness.dispatch(play(1, "first")),
            harness.dispatch(play(2, "second"))
        );

        assert_eq!(first.title.as_deref(), Some("🎶 Starting playback"));
        assert!(!second.is_error(), "second play failed: {:?}", second);
        assert!(second
            .fields
            .iter()
            .any(|(name, value, _)| name == "📍 Position" && value == "#1"));
        assert_eq!(harness.transport.connects.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_without_voice_uses_existing_session() {
        let harness = Harness::new().await;
        harness
            .dispatch(request("join", 1).voice_channel(Some(VOICE)).build())
            .await;

        let reply = harness
            .dispatch(
                request("play", 2)
                    .arg("query", ArgValue::String("lofi".into()))
                    .build(),
            )
            .await;
        assert_eq!(reply.title.as_deref(), Some("🎶 Starting playback"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_without_session() {
        let harness = Harness::new().await;
        let reply = harness.dispatch(request("pause", 1).build()).await;
        assert_eq!(
            reply,
            Reply::from_error(&BotError::InvalidStateTransition {
                action: "pause",
                state: SessionState::NoSession,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_range_is_validated() {
        let harness = Harness::new().await;
        let reply = harness
            .dispatch(
                request("volume", 1)
                    .arg("level", ArgValue::Integer(250))
                    .build(),
            )
            .await;
        assert_eq!(
            reply,
            Reply::from_error(&BotError::invalid_argument("level", "must be between 0 and 200"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_volume_and_loop_update_snapshot() {
        let harness = Harness::new().await;
        harness
            .dispatch(request("join", 1).voice_channel(Some(VOICE)).build())
            .await;

        let reply = harness
            .dispatch(
                request("volume", 2)
                    .arg("level", ArgValue::Integer(150))
                    .build(),
            )
            .await;
        assert_eq!(reply.tone, Tone::Music);

        harness
            .dispatch(
                request("loop", 3)
                    .arg("mode", ArgValue::String("queue".into()))
                    .build(),
            )
            .await;

        let snapshot = harness.ctx.music.snapshot(GUILD).unwrap();
        assert_eq!(snapshot.volume, 1.5);
        assert_eq!(snapshot.loop_mode, LoopMode::Queue);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_ends_session() {
        let harness = Harness::new().await;
        harness
            .dispatch(request("join", 1).voice_channel(Some(VOICE)).build())
            .await;
        let reply = harness.dispatch(request("leave", 2).build()).await;

        assert_eq!(reply.tone, Tone::Success);
        assert_eq!(harness.ctx.music.state(GUILD), SessionState::NoSession);
    }

    #[tokio::test(start_paused = true)]
    async fn test_nowplaying_when_idle() {
        let harness = Harness::new().await;
        let reply = harness.dispatch(request("nowplaying", 1).build()).await;
        assert_eq!(reply.description, "Nothing is playing right now");
    }
}
