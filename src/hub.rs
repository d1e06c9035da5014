//! In-memory event hub: per-request pub/sub plus a short-TTL terminal cache.
//!
//! The hub is a best-effort notifier. Live publication may drop events for
//! slow subscribers; the durable event log is the authoritative replay
//! source, and streaming consumers resync from it with an event-id dedup
//! set. Nothing here is persisted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::event::Event;

/// Per-subscriber channel capacity. Full channels drop events rather than
/// block the publisher.
const SUBSCRIBER_BUFFER: usize = 16;

/// Cadence of the background eviction sweep. Correctness does not depend
/// on it: `get_terminal` purges expired entries on lookup.
const SWEEP_INTERVAL: Duration = Duration::from_secs(5);

struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<Event>,
}

struct TerminalEntry {
    event: Event,
    expires: Instant,
}

struct HubShared {
    subscribers: DashMap<String, Vec<SubscriberSlot>>,
    terminal: DashMap<String, TerminalEntry>,
    ttl: Duration,
    next_subscriber_id: AtomicU64,
}

/// Handle to the hub. Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct EventHub {
    shared: Arc<HubShared>,
}

/// A live subscription to one request's events.
///
/// Dropping the subscription unregisters it; this is safe against
/// concurrent publishes.
pub struct Subscription {
    request_id: String,
    id: u64,
    rx: mpsc::Receiver<Event>,
    shared: Arc<HubShared>,
}

impl Subscription {
    /// Receives the next event, or `None` once the hub has released this
    /// request's subscriber set (i.e. after its terminal event).
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(mut slots) = self.shared.subscribers.get_mut(&self.request_id) {
            slots.retain(|s| s.id != self.id);
            if slots.is_empty() {
                drop(slots);
                self.shared
                    .subscribers
                    .remove_if(&self.request_id, |_, v| v.is_empty());
            }
        }
    }
}

impl EventHub {
    /// Creates a hub whose terminal cache entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            shared: Arc::new(HubShared {
                subscribers: DashMap::new(),
                terminal: DashMap::new(),
                ttl,
                next_subscriber_id: AtomicU64::new(1),
            }),
        }
    }

    /// Spawns the background sweeper that evicts expired terminal entries.
    ///
    /// The task holds only a weak reference and exits once every hub handle
    /// is gone.
    pub fn start_sweeper(&self) {
        let weak: Weak<HubShared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(shared) = weak.upgrade() else { return };
                let now = Instant::now();
                shared.terminal.retain(|_, entry| entry.expires > now);
            }
        });
    }

    /// Registers a new bounded subscriber for `request_id`.
    #[must_use]
    pub fn subscribe(&self, request_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .subscribers
            .entry(request_id.to_string())
            .or_default()
            .push(SubscriberSlot { id, tx });
        Subscription {
            request_id: request_id.to_string(),
            id,
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Publishes an event to every live subscriber of its request.
    ///
    /// Non-blocking per subscriber: a full channel drops the event for that
    /// subscriber only.
    pub fn publish(&self, event: &Event) {
        if let Some(slots) = self.shared.subscribers.get(&event.request_id) {
            for slot in slots.iter() {
                if slot.tx.try_send(event.clone()).is_err() {
                    trace!(
                        request_id = %event.request_id,
                        event_type = %event.event_type,
                        "subscriber channel full, dropping event"
                    );
                }
            }
        }
    }

    /// Installs a terminal event in the cache and releases the request's
    /// subscriber set.
    ///
    /// Waiters have either already received the event via [`publish`]
    /// (which the lifecycle engine calls first) or will find it in the
    /// cache or the durable log.
    ///
    /// [`publish`]: EventHub::publish
    pub fn set_terminal(&self, event: Event) {
        let request_id = event.request_id.clone();
        self.shared.terminal.insert(
            request_id.clone(),
            TerminalEntry {
                expires: Instant::now() + self.shared.ttl,
                event,
            },
        );
        self.shared.subscribers.remove(&request_id);
    }

    /// Returns the cached terminal event if present and not expired.
    /// Expired entries are purged on lookup.
    #[must_use]
    pub fn get_terminal(&self, request_id: &str) -> Option<Event> {
        let entry = self.shared.terminal.get(request_id)?;
        if entry.expires <= Instant::now() {
            drop(entry);
            self.shared.terminal.remove(request_id);
            return None;
        }
        Some(entry.event.clone())
    }
}
