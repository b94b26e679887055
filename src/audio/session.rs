use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::{ops::ControlFlow, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep_until, timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    queue::{LoopMode, MusicQueue, PushOutcome, QueueItem},
    transport::{PlaybackHandle, TrackEndNotifier, VoiceTransport},
    NoticeSink, SessionNotice, SessionSnapshot, SessionState,
};
use crate::{
    error::BotError,
    sources::{ResolvedTrack, TrackRequest, TrackResolver},
};

/// Pending commands per session before senders start waiting.
const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// How long a session may sit in `Idle` before it leaves on its own.
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub resolve_timeout: Duration,
    /// 0.0 to 2.0
    pub default_volume: f32,
    pub max_queue: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            resolve_timeout: Duration::from_secs(25),
            default_volume: 0.5,
            max_queue: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// The session was idle and this track is now playing.
    Started(QueueItem),
    Queued { item: QueueItem, position: usize },
    /// A retry of a request that is already queued.
    AlreadyQueued,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, BotError>>;

/// A command and the text channel of the interaction that sent it. Internal
/// callers (auto-leave, lost connections) have no channel.
pub(crate) struct SessionMessage {
    pub channel: Option<ChannelId>,
    pub command: SessionCommand,
}

pub(crate) enum SessionCommand {
    Enqueue {
        request: TrackRequest,
        reply: Reply<EnqueueOutcome>,
    },
    Skip { reply: Reply<Option<QueueItem>> },
    Pause { reply: Reply<()> },
    Resume { reply: Reply<()> },
    Stop { reply: Reply<usize> },
    SetVolume { volume: f32, reply: Reply<()> },
    SetLoop { mode: LoopMode, reply: Reply<()> },
    Shuffle { reply: Reply<usize> },
    /// Only moves where notices go.
    Bind,
    /// Acknowledged once the session is fully torn down.
    Leave { reply: oneshot::Sender<()> },
}

/// What the manager keeps for a live session.
#[derive(Clone)]
pub(crate) struct SessionHandle {
    pub id: u64,
    pub commands: mpsc::Sender<SessionMessage>,
    pub snapshot: watch::Receiver<SessionSnapshot>,
    pub cancel: CancellationToken,
}

pub(crate) struct SessionDeps {
    pub transport: Arc<dyn VoiceTransport>,
    pub resolver: Arc<dyn TrackResolver>,
    pub notices: Arc<dyn NoticeSink>,
    pub registry: Arc<DashMap<GuildId, SessionHandle>>,
}

enum Exit {
    Leave(Option<oneshot::Sender<()>>),
    IdleTimeout,
    Shutdown,
}

/// Starts the task that owns a guild's queue and playback. The voice
/// connection must already be established.
pub(crate) fn spawn_session(
    id: u64,
    guild_id: GuildId,
    voice_channel: ChannelId,
    text_channel: ChannelId,
    settings: SessionSettings,
    deps: SessionDeps,
) -> SessionHandle {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (ended_tx, ended_rx) = mpsc::unbounded_channel();
    let (resolved_tx, resolved_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot {
        state: SessionState::Idle,
        voice_channel: Some(voice_channel),
        volume: settings.default_volume,
        ..SessionSnapshot::default()
    });

    let session = GuildSession {
        id,
        guild_id,
        voice_channel,
        text_channel,
        state: SessionState::Idle,
        queue: MusicQueue::new(settings.max_queue),
        volume: settings.default_volume,
        generation: 0,
        playback: None,
        resolving: None,
        pending_pause: false,
        idle_deadline: None,
        settings,
        deps,
        snapshot: snapshot_tx,
        ended_tx,
        resolved_tx,
    };

    tokio::spawn(session.run(commands_rx, ended_rx, resolved_rx, cancel.clone()));

    SessionHandle {
        id,
        commands: commands_tx,
        snapshot: snapshot_rx,
        cancel,
    }
}

/// Single writer of one guild's music state.
struct GuildSession {
    id: u64,
    guild_id: GuildId,
    voice_channel: ChannelId,
    /// Where notices go: the channel of the latest interaction.
    text_channel: ChannelId,
    state: SessionState,
    queue: MusicQueue,
    volume: f32,
    /// Bumped whenever the current track is abandoned, so results and end
    /// events that belong to an older track are ignored.
    generation: u64,
    playback: Option<Box<dyn PlaybackHandle>>,
    resolving: Option<JoinHandle<()>>,
    /// Pause was requested while the head of the queue was still resolving.
    pending_pause: bool,
    idle_deadline: Option<Instant>,
    settings: SessionSettings,
    deps: SessionDeps,
    snapshot: watch::Sender<SessionSnapshot>,
    ended_tx: mpsc::UnboundedSender<u64>,
    resolved_tx: mpsc::UnboundedSender<(u64, Result<ResolvedTrack, String>)>,
}

impl GuildSession {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionMessage>,
        mut ended: mpsc::UnboundedReceiver<u64>,
        mut resolved: mpsc::UnboundedReceiver<(u64, Result<ResolvedTrack, String>)>,
        cancel: CancellationToken,
    ) {
        info!("🎶 Music session started in guild {}", self.guild_id);
        self.enter_idle();
        self.publish();

        let exit = loop {
            let deadline = self.idle_deadline;

            tokio::select! {
                _ = cancel.cancelled() => break Exit::Shutdown,

                command = commands.recv() => match command {
                    Some(message) => {
                        if let ControlFlow::Break(reply) = self.handle(message) {
                            break Exit::Leave(Some(reply));
                        }
                    }
                    None => break Exit::Leave(None),
                },

                Some((generation, result)) = resolved.recv() => {
                    self.on_resolved(generation, result).await;
                    self.publish();
                }

                Some(generation) = ended.recv() => {
                    self.on_track_end(generation);
                    self.publish();
                }

                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    break Exit::IdleTimeout;
                }
            }
        };

        self.teardown(exit).await;
    }

    fn handle(&mut self, message: SessionMessage) -> ControlFlow<oneshot::Sender<()>> {
        if let Some(channel) = message.channel {
            self.text_channel = channel;
        }

        match message.command {
            SessionCommand::Enqueue { request, reply } => {
                let result = self.enqueue(request);
                self.respond(reply, result);
            }
            SessionCommand::Skip { reply } => {
                let result = self.skip();
                self.respond(reply, result);
            }
            SessionCommand::Pause { reply } => {
                let result = self.pause();
                self.respond(reply, result);
            }
            SessionCommand::Resume { reply } => {
                let result = self.resume();
                self.respond(reply, result);
            }
            SessionCommand::Stop { reply } => {
                let cleared = self.queue.len();
                self.queue.clear();
                self.stop_current();
                self.enter_idle();
                self.respond(reply, Ok(cleared));
            }
            SessionCommand::SetVolume { volume, reply } => {
                let result = self.set_volume(volume);
                self.respond(reply, result);
            }
            SessionCommand::SetLoop { mode, reply } => {
                self.queue.set_loop_mode(mode);
                info!("🔁 Loop mode in guild {} set to {}", self.guild_id, mode);
                self.respond(reply, Ok(()));
            }
            SessionCommand::Shuffle { reply } => {
                self.queue.shuffle();
                let len = self.queue.len();
                self.respond(reply, Ok(len));
            }
            SessionCommand::Bind => {}
            SessionCommand::Leave { reply } => return ControlFlow::Break(reply),
        }
        ControlFlow::Continue(())
    }

    /// Publishes the new state before answering, so a caller that has its
    /// reply never observes an older snapshot.
    fn respond<T>(&self, reply: Reply<T>, result: Result<T, BotError>) {
        self.publish();
        let _ = reply.send(result);
    }

    fn enqueue(&mut self, request: TrackRequest) -> Result<EnqueueOutcome, BotError> {
        match self.queue.push(request) {
            PushOutcome::Full => Err(BotError::QueueFull(self.settings.max_queue)),
            PushOutcome::Duplicate => Ok(EnqueueOutcome::AlreadyQueued),
            PushOutcome::Queued(position) => {
                if self.state == SessionState::Idle {
                    self.advance(false);
                    self.queue
                        .current()
                        .cloned()
                        .map(EnqueueOutcome::Started)
                        .ok_or(BotError::HandlerFailure)
                } else {
                    let item = self
                        .queue
                        .upcoming()
                        .nth(position - 1)
                        .cloned()
                        .ok_or(BotError::HandlerFailure)?;
                    Ok(EnqueueOutcome::Queued { item, position })
                }
            }
        }
    }

    fn skip(&mut self) -> Result<Option<QueueItem>, BotError> {
        if !matches!(self.state, SessionState::Playing | SessionState::Paused) {
            return Err(self.invalid("skip"));
        }
        let skipped = self.queue.current().cloned();
        info!("⏭️ Skipping in guild {}", self.guild_id);
        self.advance(true);
        Ok(skipped)
    }

    fn pause(&mut self) -> Result<(), BotError> {
        if self.state != SessionState::Playing {
            return Err(self.invalid("pause"));
        }
        match &self.playback {
            Some(playback) => playback.pause().map_err(|e| {
                error!("Failed to pause playback in guild {}: {:?}", self.guild_id, e);
                BotError::HandlerFailure
            })?,
            None => self.pending_pause = true,
        }
        self.state = SessionState::Paused;
        info!("⏸️ Paused in guild {}", self.guild_id);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), BotError> {
        if self.state != SessionState::Paused {
            return Err(self.invalid("resume"));
        }
        match &self.playback {
            Some(playback) => playback.resume().map_err(|e| {
                error!("Failed to resume playback in guild {}: {:?}", self.guild_id, e);
                BotError::HandlerFailure
            })?,
            None => self.pending_pause = false,
        }
        self.state = SessionState::Playing;
        info!("▶️ Resumed in guild {}", self.guild_id);
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), BotError> {
        let volume = volume.clamp(0.0, 2.0);
        if let Some(playback) = &self.playback {
            playback.set_volume(volume).map_err(|e| {
                error!("Failed to set volume in guild {}: {:?}", self.guild_id, e);
                BotError::HandlerFailure
            })?;
        }
        self.volume = volume;
        Ok(())
    }

    fn invalid(&self, action: &'static str) -> BotError {
        BotError::InvalidStateTransition {
            action,
            state: self.state,
        }
    }

    /// Abandons whatever is loaded and moves to the next queue entry, or to
    /// `Idle` when there is none.
    fn advance(&mut self, skipped: bool) {
        self.stop_current();
        match self.queue.advance(skipped).cloned() {
            Some(item) => self.start_resolution(item),
            None => self.enter_idle(),
        }
    }

    fn stop_current(&mut self) {
        self.generation += 1;
        self.pending_pause = false;

        if let Some(playback) = self.playback.take() {
            if let Err(e) = playback.stop() {
                warn!("⚠️ Failed to stop track in guild {}: {:?}", self.guild_id, e);
            }
        }
        if let Some(task) = self.resolving.take() {
            task.abort();
        }
    }

    fn enter_idle(&mut self) {
        self.state = SessionState::Idle;
        if self.idle_deadline.is_none() {
            self.idle_deadline = Some(Instant::now() + self.settings.idle_timeout);
        }
    }

    fn start_resolution(&mut self, item: QueueItem) {
        self.state = SessionState::Playing;
        self.idle_deadline = None;

        let generation = self.generation;
        let resolver = self.deps.resolver.clone();
        let tx = self.resolved_tx.clone();
        let limit = self.settings.resolve_timeout;
        let request = item.request;

        debug!("🔍 Resolving {} (generation {})", request.display_title(), generation);
        self.resolving = Some(tokio::spawn(async move {
            let result = match timeout(limit, resolver.resolve(&request)).await {
                Ok(Ok(track)) => Ok(track),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("timed out after {}", humantime::format_duration(limit))),
            };
            let _ = tx.send((generation, result));
        }));
    }

    async fn on_resolved(&mut self, generation: u64, result: Result<ResolvedTrack, String>) {
        if generation != self.generation {
            debug!("Ignoring stale resolution (generation {})", generation);
            return;
        }
        self.resolving = None;

        let track = match result {
            Ok(track) => track,
            Err(reason) => return self.fail_current(reason),
        };

        self.queue.set_current_metadata(track.metadata.clone());
        let notifier = TrackEndNotifier::new(self.ended_tx.clone(), generation);

        match self
            .deps
            .transport
            .play(self.guild_id, &track, self.volume, notifier)
            .await
        {
            Ok(playback) => {
                if self.pending_pause {
                    if let Err(e) = playback.pause() {
                        warn!("⚠️ Could not start paused in guild {}: {:?}", self.guild_id, e);
                    }
                    self.pending_pause = false;
                }
                self.playback = Some(playback);
                info!("🎵 Now playing in guild {}: {}", self.guild_id, track.metadata.title);

                if let Some(item) = self.queue.current().cloned() {
                    self.notice(SessionNotice::NowPlaying(item));
                }
            }
            Err(e) => self.fail_current(e.to_string()),
        }
    }

    /// Drops the track that could not be played, tells the last channel and
    /// moves on.
    fn fail_current(&mut self, reason: String) {
        let title = self
            .queue
            .discard_current()
            .map(|item| item.title().to_string())
            .unwrap_or_default();

        warn!("⚠️ Dropping {} in guild {}: {}", title, self.guild_id, reason);
        self.notice(SessionNotice::TrackFailed(BotError::TrackResolutionFailed {
            title,
            reason,
        }));
        self.advance(true);
    }

    fn on_track_end(&mut self, generation: u64) {
        if generation != self.generation {
            debug!("Ignoring end event of an old track (generation {})", generation);
            return;
        }
        self.playback = None;
        self.advance(false);
    }

    fn notice(&self, notice: SessionNotice) {
        let sink = self.deps.notices.clone();
        let (guild_id, channel_id) = (self.guild_id, self.text_channel);
        tokio::spawn(async move {
            sink.notify(guild_id, channel_id, notice).await;
        });
    }

    fn publish(&self) {
        let connected = self.state != SessionState::NoSession;
        self.snapshot.send_replace(SessionSnapshot {
            state: self.state,
            voice_channel: connected.then_some(self.voice_channel),
            now_playing: self.queue.current().cloned(),
            queue: self.queue.upcoming().cloned().collect(),
            volume: self.volume,
            loop_mode: self.queue.loop_mode(),
        });
    }

    async fn teardown(mut self, exit: Exit) {
        self.stop_current();
        self.queue.clear();
        self.idle_deadline = None;

        if let Err(e) = self.deps.transport.disconnect(self.guild_id).await {
            warn!("⚠️ Voice disconnect failed in guild {}: {:?}", self.guild_id, e);
        }

        self.state = SessionState::NoSession;
        self.publish();
        let id = self.id;
        self.deps
            .registry
            .remove_if(&self.guild_id, |_, handle| handle.id == id);

        match exit {
            Exit::IdleTimeout => {
                info!("💤 Leaving guild {} after being idle", self.guild_id);
                self.notice(SessionNotice::IdleDisconnect);
            }
            Exit::Leave(Some(reply)) => {
                let _ = reply.send(());
            }
            Exit::Leave(None) | Exit::Shutdown => {}
        }
        info!("👋 Music session ended in guild {}", self.guild_id);
    }
}
