use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use std::{
    collections::{HashSet, VecDeque},
    fmt,
    time::Duration,
};
use tracing::{debug, info};

use crate::sources::{TrackMetadata, TrackRequest};

const MAX_HISTORY: usize = 50;
/// How many recent request ids are remembered for retry de-duplication.
const MAX_RECENT_IDS: usize = 128;

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub request: TrackRequest,
    /// Filled in once the item has been resolved for playback.
    pub metadata: Option<TrackMetadata>,
    pub added_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(request: TrackRequest) -> Self {
        Self {
            request,
            metadata: None,
            added_at: Utc::now(),
        }
    }

    pub fn title(&self) -> &str {
        self.metadata
            .as_ref()
            .map(|meta| meta.title.as_str())
            .unwrap_or_else(|| self.request.display_title())
    }

    pub fn duration(&self) -> Option<Duration> {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.duration)
            .or(self.request.duration_hint)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoopMode {
    #[default]
    Off,
    Track,
    Queue,
}

impl LoopMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(Self::Off),
            "track" => Some(Self::Track),
            "queue" => Some(Self::Queue),
            _ => None,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Track => write!(f, "track"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// 1-based position among upcoming tracks.
    Queued(usize),
    /// Same request id was queued recently; nothing was added.
    Duplicate,
    Full,
}

/// FIFO of upcoming tracks plus the track currently loaded.
///
/// Owned by exactly one session task; nothing here is synchronised.
#[derive(Debug)]
pub struct MusicQueue {
    items: VecDeque<QueueItem>,
    current: Option<QueueItem>,
    history: VecDeque<QueueItem>,
    loop_mode: LoopMode,
    max_size: usize,
    recent_ids: VecDeque<u64>,
    recent_set: HashSet<u64>,
}

impl MusicQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            current: None,
            history: VecDeque::new(),
            loop_mode: LoopMode::Off,
            max_size,
            recent_ids: VecDeque::new(),
            recent_set: HashSet::new(),
        }
    }

    /// Appends a request. A request id of 0 is never de-duplicated.
    pub fn push(&mut self, request: TrackRequest) -> PushOutcome {
        let id = request.request_id;
        if id != 0 && self.recent_set.contains(&id) {
            debug!("🔁 Ignoring repeated enqueue for request {}", id);
            return PushOutcome::Duplicate;
        }

        if self.items.len() >= self.max_size {
            return PushOutcome::Full;
        }

        if id != 0 {
            self.remember(id);
        }

        info!("➕ Added to queue: {}", request.display_title());
        self.items.push_back(QueueItem::new(request));
        PushOutcome::Queued(self.items.len())
    }

    /// Moves to the next track and returns it.
    ///
    /// On a natural end, `LoopMode::Track` replays the current track. A skip
    /// always moves on. With `LoopMode::Queue` the finished track goes to the
    /// back of the queue either way.
    pub fn advance(&mut self, skipped: bool) -> Option<&QueueItem> {
        if let Some(finished) = self.current.take() {
            if self.loop_mode == LoopMode::Track && !skipped {
                self.current = Some(finished);
                return self.current.as_ref();
            }

            if self.loop_mode == LoopMode::Queue {
                let mut requeued = finished.clone();
                requeued.added_at = Utc::now();
                self.items.push_back(requeued);
            }
            self.add_to_history(finished);
        }

        self.current = self.items.pop_front();
        self.current.as_ref()
    }

    /// Drops the current track without advancing, e.g. after it failed to resolve.
    pub fn discard_current(&mut self) -> Option<QueueItem> {
        self.current.take()
    }

    pub fn set_current_metadata(&mut self, metadata: TrackMetadata) {
        if let Some(current) = self.current.as_mut() {
            current.metadata = Some(metadata);
        }
    }

    /// Empties the upcoming list and forgets the current track.
    pub fn clear(&mut self) {
        self.items.clear();
        if let Some(current) = self.current.take() {
            self.add_to_history(current);
        }
        info!("🗑️ Queue cleared");
    }

    pub fn shuffle(&mut self) {
        let mut rng = rand::thread_rng();
        self.items.make_contiguous().shuffle(&mut rng);
        info!("🔀 Queue shuffled");
    }

    pub fn set_loop_mode(&mut self, mode: LoopMode) {
        self.loop_mode = mode;
    }

    pub fn loop_mode(&self) -> LoopMode {
        self.loop_mode
    }

    pub fn current(&self) -> Option<&QueueItem> {
        self.current.as_ref()
    }

    pub fn upcoming(&self) -> impl Iterator<Item = &QueueItem> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[allow(dead_code)]
    pub fn history(&self) -> impl Iterator<Item = &QueueItem> {
        self.history.iter()
    }

    fn add_to_history(&mut self, item: QueueItem) {
        self.history.push_back(item);
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
    }

    fn remember(&mut self, id: u64) {
        self.recent_ids.push_back(id);
        self.recent_set.insert(id);
        if self.recent_ids.len() > MAX_RECENT_IDS {
            if let Some(old) = self.recent_ids.pop_front() {
                self.recent_set.remove(&old);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    fn request(id: u64) -> TrackRequest {
        TrackRequest::new(id, format!("song {id}"), UserId::new(1))
    }

    fn titles(queue: &MusicQueue) -> Vec<String> {
        queue.upcoming().map(|item| item.title().to_string()).collect()
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = MusicQueue::new(10);
        for id in 1..=3 {
            queue.push(request(id));
        }

        assert_eq!(queue.advance(false).unwrap().title(), "song 1");
        assert_eq!(queue.advance(false).unwrap().title(), "song 2");
        assert_eq!(queue.advance(false).unwrap().title(), "song 3");
        assert!(queue.advance(false).is_none());
    }

    #[test]
    fn test_retried_request_is_not_duplicated() {
        let mut queue = MusicQueue::new(10);
        assert_eq!(queue.push(request(7)), PushOutcome::Queued(1));
        assert_eq!(queue.push(request(7)), PushOutcome::Duplicate);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_full_queue() {
        let mut queue = MusicQueue::new(1);
        queue.push(request(1));
        assert_eq!(queue.push(request(2)), PushOutcome::Full);
        // A rejected request may be retried once there is room.
        queue.advance(false);
        assert_eq!(queue.push(request(2)), PushOutcome::Queued(1));
    }

    #[test]
    fn test_loop_track_repeats_until_skipped() {
        let mut queue = MusicQueue::new(10);
        queue.push(request(1));
        queue.push(request(2));
        queue.advance(false);
        queue.set_loop_mode(LoopMode::Track);

        assert_eq!(queue.advance(false).unwrap().title(), "song 1");
        assert_eq!(queue.advance(true).unwrap().title(), "song 2");
    }

    #[test]
    fn test_loop_queue_requeues_finished_track() {
        let mut queue = MusicQueue::new(10);
        queue.push(request(1));
        queue.push(request(2));
        queue.set_loop_mode(LoopMode::Queue);

        queue.advance(false);
        queue.advance(false);
        assert_eq!(titles(&queue), vec!["song 1"]);
        assert_eq!(queue.advance(true).unwrap().title(), "song 1");
        assert_eq!(titles(&queue), vec!["song 2"]);
    }

    #[test]
    fn test_clear_drops_current_and_upcoming() {
        let mut queue = MusicQueue::new(10);
        queue.push(request(1));
        queue.push(request(2));
        queue.advance(false);
        queue.clear();

        assert!(queue.current().is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.history().count(), 1);
    }

    #[test]
    fn test_shuffle_keeps_items() {
        let mut queue = MusicQueue::new(10);
        for id in 1..=5 {
            queue.push(request(id));
        }
        queue.shuffle();

        let mut after = titles(&queue);
        after.sort();
        assert_eq!(after, (1..=5).map(|id| format!("song {id}")).collect::<Vec<_>>());
    }

    #[test]
    fn test_loop_mode_parse() {
        assert_eq!(LoopMode::parse("track"), Some(LoopMode::Track));
        assert_eq!(LoopMode::parse("song"), None);
        assert_eq!(LoopMode::Queue.to_string(), "queue");
    }
}
