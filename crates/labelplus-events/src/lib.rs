#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

//! Host lifecycle events and the bus that carries them to the label engine.
//!
//! The host adapter publishes session and torrent events. The service
//! subscribes to autolabel new torrents, drop mappings of removed ones and
//! run move passes on completion. Delivery is a `tokio` broadcast channel; a
//! bounded history lets a late subscriber ask for everything after a known id.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use labelplus_torrent_core::TorrentId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender, error::RecvError};

/// Identifier assigned to each published event.
pub type EventId = u64;

const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// Events raised by the host that the label engine consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The host session finished starting and torrents are loaded.
    SessionStarted,
    /// A torrent was added to the session.
    TorrentAdded {
        /// Identifier of the new torrent.
        torrent_id: TorrentId,
    },
    /// A torrent was removed from the session.
    TorrentRemoved {
        /// Identifier of the removed torrent.
        torrent_id: TorrentId,
    },
    /// A torrent completed downloading or a recheck finished.
    TorrentFinished {
        /// Identifier of the finished torrent.
        torrent_id: TorrentId,
    },
}

impl Event {
    /// Machine-friendly discriminator used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::TorrentAdded { .. } => "torrent_added",
            Self::TorrentRemoved { .. } => "torrent_removed",
            Self::TorrentFinished { .. } => "torrent_finished",
        }
    }

    /// Torrent the event refers to, if any.
    #[must_use]
    pub const fn torrent_id(&self) -> Option<&TorrentId> {
        match self {
            Self::SessionStarted => None,
            Self::TorrentAdded { torrent_id }
            | Self::TorrentRemoved { torrent_id }
            | Self::TorrentFinished { torrent_id } => Some(torrent_id),
        }
    }
}

/// Event plus its sequence number and emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Sequential identifier, starting at 1.
    pub id: EventId,
    /// Time the event was published.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event.
    pub event: Event,
}

/// Bounded history of recently published envelopes.
#[derive(Debug)]
struct ReplayRing {
    retained: VecDeque<EventEnvelope>,
    limit: usize,
}

impl ReplayRing {
    fn new(limit: usize) -> Self {
        Self {
            retained: VecDeque::with_capacity(limit),
            limit,
        }
    }

    fn record(&mut self, envelope: EventEnvelope) {
        while self.retained.len() >= self.limit {
            self.retained.pop_front();
        }
        self.retained.push_back(envelope);
    }

    fn after(&self, since: EventId) -> VecDeque<EventEnvelope> {
        self.retained
            .iter()
            .skip_while(|envelope| envelope.id <= since)
            .cloned()
            .collect()
    }

    fn newest(&self) -> Option<EventId> {
        self.retained.back().map(|envelope| envelope.id)
    }
}

/// Cloneable handle to the host event channel.
#[derive(Clone)]
pub struct EventBus {
    live: Sender<EventEnvelope>,
    history: Arc<Mutex<ReplayRing>>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Bus whose live channel and replay history both hold `capacity` envelopes.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            live: broadcast::channel(capacity).0,
            history: Arc::new(Mutex::new(ReplayRing::new(capacity))),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bus with room for 256 envelopes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    fn history(&self) -> MutexGuard<'_, ReplayRing> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamp `event` with the next id and fan it out to subscribers.
    pub fn publish(&self, event: Event) -> EventId {
        let envelope = EventEnvelope {
            id: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            event,
        };
        let id = envelope.id;
        self.history().record(envelope.clone());
        // Err only means nobody is listening right now.
        let _ = self.live.send(envelope);
        id
    }

    /// Attach a subscriber.
    ///
    /// With `Some(since)` the retained envelopes newer than `since` are
    /// delivered before live traffic; with `None` only live traffic is seen.
    #[must_use]
    pub fn subscribe(&self, since: Option<EventId>) -> EventStream {
        let receiver = self.live.subscribe();
        let backlog = since.map_or_else(VecDeque::new, |since| self.history().after(since));
        let replayed_through = backlog.back().map_or(0, |envelope| envelope.id);
        EventStream {
            backlog,
            receiver,
            replayed_through,
        }
    }

    /// Id of the newest retained envelope.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.history().newest()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber side of [`EventBus`].
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
    replayed_through: EventId,
}

impl EventStream {
    /// Next envelope, or `None` after every bus handle is dropped.
    ///
    /// Lagged receivers skip the overwritten envelopes and keep going.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        loop {
            match self.receiver.recv().await {
                Ok(envelope) if envelope.id > self.replayed_through => return Some(envelope),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
