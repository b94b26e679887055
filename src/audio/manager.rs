use dashmap::DashMap;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    time::timeout,
};
use tracing::{debug, info, warn};

use super::{
    queue::{LoopMode, QueueItem},
    session::{
        spawn_session, EnqueueOutcome, Reply, SessionCommand, SessionDeps, SessionHandle,
        SessionMessage, SessionSettings,
    },
    transport::VoiceTransport,
    NoticeSink, SessionSnapshot, SessionState,
};
use crate::{
    error::BotError,
    sources::{TrackRequest, TrackResolver},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(ChannelId),
    /// A session already existed; it is returned unchanged.
    AlreadyConnected(ChannelId),
}

/// Registry of per-guild music sessions.
///
/// Holds no music state itself. Every operation is forwarded to the guild's
/// session task, which applies them one at a time in arrival order.
pub struct MusicSessionManager {
    sessions: Arc<DashMap<GuildId, SessionHandle>>,
    join_locks: DashMap<GuildId, Arc<Mutex<()>>>,
    connecting: DashMap<GuildId, ChannelId>,
    next_id: AtomicU64,
    settings: SessionSettings,
    transport: Arc<dyn VoiceTransport>,
    resolver: Arc<dyn TrackResolver>,
    notices: Arc<dyn NoticeSink>,
}

impl MusicSessionManager {
    pub fn new(
        settings: SessionSettings,
        transport: Arc<dyn VoiceTransport>,
        resolver: Arc<dyn TrackResolver>,
        notices: Arc<dyn NoticeSink>,
    ) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            join_locks: DashMap::new(),
            connecting: DashMap::new(),
            next_id: AtomicU64::new(1),
            settings,
            transport,
            resolver,
            notices,
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Connects to `voice_channel` and starts a session, or returns the
    /// existing one. Concurrent joins for one guild connect only once.
    /// Joining an existing session points its notices at `text_channel`.
    pub async fn join(
        &self,
        guild_id: GuildId,
        voice_channel: ChannelId,
        text_channel: ChannelId,
    ) -> Result<JoinOutcome, BotError> {
        if let Some(channel) = self.current_channel(guild_id) {
            self.bind(guild_id, text_channel).await;
            return Ok(JoinOutcome::AlreadyConnected(channel));
        }

        let lock = self.join_lock(guild_id);
        let _guard = lock.lock().await;

        if let Some(channel) = self.current_channel(guild_id) {
            self.bind(guild_id, text_channel).await;
            return Ok(JoinOutcome::AlreadyConnected(channel));
        }

        self.connecting.insert(guild_id, voice_channel);
        let connected = timeout(
            self.settings.connect_timeout,
            self.transport.connect(guild_id, voice_channel),
        )
        .await;
        self.connecting.remove(&guild_id);

        let failure = match connected {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "timed out after {}",
                humantime::format_duration(self.settings.connect_timeout)
            )),
        };

        if let Some(reason) = failure {
            warn!("❌ Voice connection failed in guild {}: {}", guild_id, reason);
            if let Err(e) = self.transport.disconnect(guild_id).await {
                debug!("Cleanup after failed join in guild {}: {:?}", guild_id, e);
            }
            return Err(BotError::ConnectionFailed(reason));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = spawn_session(
            id,
            guild_id,
            voice_channel,
            text_channel,
            self.settings.clone(),
            SessionDeps {
                transport: self.transport.clone(),
                resolver: self.resolver.clone(),
                notices: self.notices.clone(),
                registry: self.sessions.clone(),
            },
        );
        self.sessions.insert(guild_id, handle);

        info!("✅ Joined voice channel {} in guild {}", voice_channel, guild_id);
        Ok(JoinOutcome::Joined(voice_channel))
    }

    /// Queues a track. While the guild is still `Connecting` this waits for
    /// the join to finish first.
    pub async fn enqueue(
        &self,
        guild_id: GuildId,
        request: TrackRequest,
        channel: ChannelId,
    ) -> Result<EnqueueOutcome, BotError> {
        self.request(guild_id, channel, "queue tracks", |reply| {
            SessionCommand::Enqueue { request, reply }
        })
        .await
    }

    /// Returns the track that was skipped.
    pub async fn skip(
        &self,
        guild_id: GuildId,
        channel: ChannelId,
    ) -> Result<Option<QueueItem>, BotError> {
        self.request(guild_id, channel, "skip", |reply| SessionCommand::Skip { reply })
            .await
    }

    pub async fn pause(&self, guild_id: GuildId, channel: ChannelId) -> Result<(), BotError> {
        self.request(guild_id, channel, "pause", |reply| SessionCommand::Pause { reply })
            .await
    }

    pub async fn resume(&self, guild_id: GuildId, channel: ChannelId) -> Result<(), BotError> {
        self.request(guild_id, channel, "resume", |reply| SessionCommand::Resume { reply })
            .await
    }

    /// Clears the queue and stops playback. Returns how many queued tracks
    /// were dropped.
    pub async fn stop(&self, guild_id: GuildId, channel: ChannelId) -> Result<usize, BotError> {
        self.request(guild_id, channel, "stop", |reply| SessionCommand::Stop { reply })
            .await
    }

    pub async fn set_volume(
        &self,
        guild_id: GuildId,
        channel: ChannelId,
        volume: f32,
    ) -> Result<(), BotError> {
        self.request(guild_id, channel, "change the volume", |reply| {
            SessionCommand::SetVolume { volume, reply }
        })
        .await
    }

    pub async fn set_loop(
        &self,
        guild_id: GuildId,
        channel: ChannelId,
        mode: LoopMode,
    ) -> Result<(), BotError> {
        self.request(guild_id, channel, "change the loop mode", |reply| {
            SessionCommand::SetLoop { mode, reply }
        })
        .await
    }

    /// Returns the number of tracks shuffled.
    pub async fn shuffle(&self, guild_id: GuildId, channel: ChannelId) -> Result<usize, BotError> {
        self.request(guild_id, channel, "shuffle", |reply| SessionCommand::Shuffle { reply })
            .await
    }

    /// Tears the session down and disconnects. Resolves once the voice
    /// connection is gone and the guild reads as `NoSession`.
    pub async fn leave(&self, guild_id: GuildId) -> Result<(), BotError> {
        let commands = self
            .commands(guild_id)
            .ok_or(BotError::InvalidStateTransition {
                action: "leave",
                state: SessionState::NoSession,
            })?;

        let (reply, done) = oneshot::channel();
        let message = SessionMessage {
            channel: None,
            command: SessionCommand::Leave { reply },
        };
        if commands.send(message).await.is_ok() {
            // Err here only means the session exited on its own meanwhile.
            let _ = done.await;
        }
        Ok(())
    }

    pub fn state(&self, guild_id: GuildId) -> SessionState {
        if let Some(handle) = self.sessions.get(&guild_id) {
            return handle.snapshot.borrow().state;
        }
        if self.connecting.contains_key(&guild_id) {
            return SessionState::Connecting;
        }
        SessionState::NoSession
    }

    pub fn snapshot(&self, guild_id: GuildId) -> Option<SessionSnapshot> {
        self.sessions
            .get(&guild_id)
            .map(|handle| handle.snapshot.borrow().clone())
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Cancels every session; used on shutdown.
    pub fn shutdown(&self) {
        for entry in self.sessions.iter() {
            entry.value().cancel.cancel();
        }
    }

    fn current_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.sessions
            .get(&guild_id)
            .and_then(|handle| handle.snapshot.borrow().voice_channel)
    }

    fn join_lock(&self, guild_id: GuildId) -> Arc<Mutex<()>> {
        self.join_locks.entry(guild_id).or_default().clone()
    }

    fn commands(&self, guild_id: GuildId) -> Option<mpsc::Sender<SessionMessage>> {
        self.sessions
            .get(&guild_id)
            .map(|handle| handle.commands.clone())
    }

    async fn bind(&self, guild_id: GuildId, text_channel: ChannelId) {
        if let Some(commands) = self.commands(guild_id) {
            let message = SessionMessage {
                channel: Some(text_channel),
                command: SessionCommand::Bind,
            };
            if commands.send(message).await.is_err() {
                debug!("Session in guild {} ended before it could be rebound", guild_id);
            }
        }
    }

    /// Returns once no join is in flight for the guild. The joiner holds the
    /// guild's lock for as long as it reads `Connecting`.
    async fn wait_for_join(&self, guild_id: GuildId) {
        if self.connecting.contains_key(&guild_id) {
            let lock = self.join_lock(guild_id);
            let _ = lock.lock().await;
        }
    }

    async fn request<T>(
        &self,
        guild_id: GuildId,
        channel: ChannelId,
        action: &'static str,
        build: impl FnOnce(Reply<T>) -> SessionCommand,
    ) -> Result<T, BotError> {
        let no_session = || BotError::InvalidStateTransition {
            action,
            state: SessionState::NoSession,
        };

        self.wait_for_join(guild_id).await;
        let commands = self.commands(guild_id).ok_or_else(no_session)?;

        let (reply, response) = oneshot::channel();
        let message = SessionMessage {
            channel: Some(channel),
            command: build(reply),
        };
        commands.send(message).await.map_err(|_| no_session())?;
        response.await.map_err(|_| no_session())?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        testing::{FakeResolver, FakeTransport, RecordingSink, GUILD, TEXT, UNREACHABLE, VOICE},
        SessionNotice,
    };
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;
    use std::time::Duration;

    struct Fixture {
        manager: MusicSessionManager,
        transport: Arc<FakeTransport>,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let transport = Arc::new(FakeTransport::default());
        let sink = Arc::new(RecordingSink::default());
        let settings = SessionSettings {
            idle_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            resolve_timeout: Duration::from_secs(5),
            default_volume: 0.5,
            max_queue: 3,
        };
        let manager = MusicSessionManager::new(
            settings,
            transport.clone(),
            Arc::new(FakeResolver),
            sink.clone(),
        );
        Fixture {
            manager,
            transport,
            sink,
        }
    }

    fn track(id: u64, query: &str) -> TrackRequest {
        TrackRequest::new(id, query, UserId::new(5))
    }

    /// Lets every ready task run. With the clock paused, time only moves
    /// once nothing else can make progress.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn now_playing(manager: &MusicSessionManager) -> Option<String> {
        manager
            .snapshot(GUILD)
            .and_then(|s| s.now_playing)
            .map(|item| item.title().to_string())
    }

    fn queued(manager: &MusicSessionManager) -> Vec<String> {
        manager
            .snapshot(GUILD)
            .map(|s| s.queue.iter().map(|i| i.title().to_string()).collect())
            .unwrap_or_default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_session_lifecycle() {
        let Fixture { manager, transport, sink } = fixture();
        assert_eq!(manager.state(GUILD), SessionState::NoSession);

        assert_eq!(
            manager.join(GUILD, VOICE, TEXT).await,
            Ok(JoinOutcome::Joined(VOICE))
        );
        assert_eq!(manager.state(GUILD), SessionState::Idle);

        let outcome = manager.enqueue(GUILD, track(1, "track A"), TEXT).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Started(ref item) if item.title() == "track A"));
        assert_eq!(manager.state(GUILD), SessionState::Playing);
        assert_eq!(now_playing(&manager).as_deref(), Some("track A"));
        assert!(queued(&manager).is_empty());

        let outcome = manager.enqueue(GUILD, track(2, "track B"), TEXT).await.unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Queued { position: 1, .. }));
        assert_eq!(manager.state(GUILD), SessionState::Playing);
        assert_eq!(queued(&manager), vec!["track B"]);

        let skipped = manager.skip(GUILD, TEXT).await.unwrap();
        assert_eq!(skipped.map(|i| i.title().to_string()).as_deref(), Some("track A"));
        assert_eq!(manager.state(GUILD), SessionState::Playing);
        assert_eq!(now_playing(&manager).as_deref(), Some("track B"));
        assert!(queued(&manager).is_empty());

        manager.skip(GUILD, TEXT).await.unwrap();
        assert_eq!(manager.state(GUILD), SessionState::Idle);
        assert!(queued(&manager).is_empty());

        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(manager.state(GUILD), SessionState::NoSession);
        assert_eq!(manager.active_sessions(), 0);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);

        settle().await;
        assert!(sink
            .notices
            .lock()
            .unwrap()
            .contains(&SessionNotice::IdleDisconnect));
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_order_is_fifo_and_retries_do_not_duplicate() {
        let Fixture { manager, transport, .. } = fixture();
        manager.join(GUILD, VOICE, TEXT).await.unwrap();

        manager.enqueue(GUILD, track(1, "A"), TEXT).await.unwrap();
        manager.enqueue(GUILD, track(2, "B"), TEXT).await.unwrap();
        // Same interaction delivered twice.
        assert_eq!(
            manager.enqueue(GUILD, track(2, "B"), TEXT).await,
            Ok(EnqueueOutcome::AlreadyQueued)
        );
        manager.enqueue(GUILD, track(3, "C"), TEXT).await.unwrap();

        for _ in 0..3 {
            settle().await;
            transport.finish_current();
        }
        settle().await;

        assert_eq!(transport.played_titles(), vec!["A", "B", "C"]);
        assert_eq!(manager.state(GUILD), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_round_trip() {
        let Fixture { manager, transport, .. } = fixture();
        manager.join(GUILD, VOICE, TEXT).await.unwrap();
        manager.enqueue(GUILD, track(1, "A"), TEXT).await.unwrap();
        settle().await;

        let before = manager.snapshot(GUILD).unwrap();
        manager.pause(GUILD, TEXT).await.unwrap();
        assert_eq!(manager.state(GUILD), SessionState::Paused);
        manager.resume(GUILD, TEXT).await.unwrap();

        assert_eq!(manager.snapshot(GUILD).unwrap(), before);
        assert_eq!(transport.events(), vec!["pause A", "resume A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_outside_playing_is_rejected() {
        let Fixture { manager, .. } = fixture();

        assert_eq!(
            manager.pause(GUILD, TEXT).await,
            Err(BotError::InvalidStateTransition {
                action: "pause",
                state: SessionState::NoSession,
            })
        );
        assert_eq!(manager.state(GUILD), SessionState::NoSession);

        manager.join(GUILD, VOICE, TEXT).await.unwrap();
        assert_eq!(
            manager.pause(GUILD, TEXT).await,
            Err(BotError::InvalidStateTransition {
                action: "pause",
                state: SessionState::Idle,
            })
        );
        assert_eq!(manager.state(GUILD), SessionState::Idle);
        assert_eq!(
            manager.resume(GUILD, TEXT).await,
            Err(BotError::InvalidStateTransition {
                action: "resume",
                state: SessionState::Idle,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_joins_create_one_session() {
        let Fixture { manager, transport, .. } = fixture();

        let joining = manager.join(GUILD, VOICE, TEXT);
        let also_joining = manager.join(GUILD, ChannelId::new(21), TEXT);
        let (first, second) = tokio::join!(joining, also_joining);

        assert_eq!(first, Ok(JoinOutcome::Joined(VOICE)));
        assert_eq!(second, Ok(JoinOutcome::AlreadyConnected(VOICE)));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.active_sessions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connecting_is_observable_and_timeout_fails() {
        let Fixture { manager, .. } = fixture();
        let manager = Arc::new(manager);

        let joining = tokio::spawn({
            let manager = manager.clone();
            async move { manager.join(GUILD, UNREACHABLE, TEXT).await }
        });
        settle().await;
        assert_eq!(manager.state(GUILD), SessionState::Connecting);

        let result = joining.await.unwrap();
        assert!(matches!(result, Err(BotError::ConnectionFailed(_))));
        assert_eq!(manager.state(GUILD), SessionState::NoSession);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_while_connecting_waits_for_join() {
        let Fixture { manager, transport, .. } = fixture();
        let manager = Arc::new(manager);

        let joining = tokio::spawn({
            let manager = manager.clone();
            async move { manager.join(GUILD, VOICE, TEXT).await }
        });
        settle().await;
        assert_eq!(manager.state(GUILD), SessionState::Connecting);

        let outcome = manager.enqueue(GUILD, track(1, "A"), TEXT).await;
        assert!(matches!(outcome, Ok(EnqueueOutcome::Started(ref item)) if item.title() == "A"));
        assert_eq!(joining.await.unwrap(), Ok(JoinOutcome::Joined(VOICE)));
        assert_eq!(transport.connects.load(Ordering::SeqCst), 1);
        assert_eq!(manager.state(GUILD), SessionState::Playing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_after_failed_join_reports_no_session() {
        let Fixture { manager, .. } = fixture();
        let manager = Arc::new(manager);

        tokio::spawn({
            let manager = manager.clone();
            async move { manager.join(GUILD, UNREACHABLE, TEXT).await }
        });
        settle().await;

        assert_eq!(
            manager.enqueue(GUILD, track(1, "A"), TEXT).await,
            Err(BotError::InvalidStateTransition {
                action: "queue tracks",
                state: SessionState::NoSession,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_notice_goes_to_latest_command_channel() {
        let Fixture { manager, sink, .. } = fixture();
        let elsewhere = ChannelId::new(31);
        manager.join(GUILD, VOICE, TEXT).await.unwrap();

        manager.enqueue(GUILD, track(1, "A"), TEXT).await.unwrap();
        manager.enqueue(GUILD, track(2, "bad link"), TEXT).await.unwrap();
        settle().await;
        manager.skip(GUILD, elsewhere).await.unwrap();
        settle().await;

        assert_eq!(
            sink.channel_of(|n| matches!(n, SessionNotice::NowPlaying(_))),
            Some(TEXT)
        );
        assert_eq!(
            sink.channel_of(|n| matches!(n, SessionNotice::TrackFailed(_))),
            Some(elsewhere)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_join_moves_notices() {
        let Fixture { manager, transport, sink } = fixture();
        let elsewhere = ChannelId::new(31);
        manager.join(GUILD, VOICE, TEXT).await.unwrap();
        manager.enqueue(GUILD, track(1, "A"), TEXT).await.unwrap();
        manager.enqueue(GUILD, track(2, "bad link"), TEXT).await.unwrap();
        settle().await;

        assert_eq!(
            manager.join(GUILD, VOICE, elsewhere).await,
            Ok(JoinOutcome::AlreadyConnected(VOICE))
        );
        settle().await;
        transport.finish_current();
        settle().await;

        assert_eq!(
            sink.channel_of(|n| matches!(n, SessionNotice::TrackFailed(_))),
            Some(elsewhere)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_resolution_is_skipped_and_reported() {
        let Fixture { manager, transport, sink } = fixture();
        manager.join(GUILD, VOICE, TEXT).await.unwrap();

        manager.enqueue(GUILD, track(1, "bad link"), TEXT).await.unwrap();
        manager.enqueue(GUILD, track(2, "good"), TEXT).await.unwrap();
        settle().await;

        assert_eq!(transport.played_titles(), vec!["good"]);
        assert_eq!(manager.state(GUILD), SessionState::Playing);
        assert_eq!(now_playing(&manager).as_deref(), Some("good"));

        let notices = sink.notices.lock().unwrap().clone();
        assert!(notices.iter().any(|n| matches!(
            n,
            SessionNotice::TrackFailed(BotError::TrackResolutionFailed { title, .. }) if title == "bad link"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_timeout_moves_on() {
        let Fixture { manager, transport, .. } = fixture();
        manager.join(GUILD, VOICE, TEXT).await.unwrap();

        manager.enqueue(GUILD, track(1, "slow one"), TEXT).await.unwrap();
        manager.enqueue(GUILD, track(2, "next"), TEXT).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(transport.played_titles(), vec!["next"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_resolution() {
        let Fixture { manager, transport, .. } = fixture();
        manager.join(GUILD, VOICE, TEXT).await.unwrap();

        manager.enqueue(GUILD, track(1, "slow one"), TEXT).await.unwrap();
        manager.enqueue(GUILD, track(2, "next"), TEXT).await.unwrap();
        assert_eq!(manager.stop(GUILD, TEXT).await, Ok(1));
        assert_eq!(manager.state(GUILD), SessionState::Idle);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(transport.played_titles().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_while_resolving_starts_paused() {
        let Fixture { manager, transport, .. } = fixture();
        manager.join(GUILD, VOICE, TEXT).await.unwrap();

        manager.enqueue(GUILD, track(1, "A"), TEXT).await.unwrap();
        manager.pause(GUILD, TEXT).await.unwrap();
        settle().await;

        assert_eq!(manager.state(GUILD), SessionState::Paused);
        assert_eq!(transport.events(), vec!["pause A"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_limit() {
        let Fixture { manager, .. } = fixture();
        manager.join(GUILD, VOICE, TEXT).await.unwrap();

        for id in 1..=4 {
            manager.enqueue(GUILD, track(id, "slow"), TEXT).await.unwrap();
        }
        assert_eq!(
            manager.enqueue(GUILD, track(5, "slow"), TEXT).await,
            Err(BotError::QueueFull(3))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_disconnects_and_allows_rejoin() {
        let Fixture { manager, transport, .. } = fixture();
        manager.join(GUILD, VOICE, TEXT).await.unwrap();
        manager.enqueue(GUILD, track(1, "A"), TEXT).await.unwrap();
        settle().await;

        manager.leave(GUILD).await.unwrap();
        assert_eq!(manager.state(GUILD), SessionState::NoSession);
        assert_eq!(transport.disconnects.load(Ordering::SeqCst), 1);
        assert!(transport.events().contains(&"stop A".to_string()));

        assert_eq!(
            manager.join(GUILD, VOICE, TEXT).await,
            Ok(JoinOutcome::Joined(VOICE))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_track_replays_on_natural_end() {
        let Fixture { manager, transport, .. } = fixture();
        manager.join(GUILD, VOICE, TEXT).await.unwrap();
        manager.set_loop(GUILD, TEXT, LoopMode::Track).await.unwrap();
        manager.enqueue(GUILD, track(1, "A"), TEXT).await.unwrap();
        settle().await;

        transport.finish_current();
        settle().await;
        assert_eq!(transport.played_titles(), vec!["A", "A"]);
    }
}
