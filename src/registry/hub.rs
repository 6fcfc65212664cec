//! Event Fan-out Hub
//!
//! Tracks live subscribers and pushes registry events to each of them
//! through a bounded per-subscriber queue. Broadcasting never waits: by
//! default a subscriber whose queue is full is dropped on the spot, so a
//! watcher never silently misses an event and stays subscribed. Deployments
//! can allow a few consecutive misses through `max_missed_deliveries`.

use crate::error::Error;
use crate::registry::events::RegistryEvent;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the fan-out hub
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Capacity of each subscriber's outbound queue
    pub queue_capacity: usize,
    /// Consecutive full-queue deliveries before a subscriber is dropped
    pub max_missed_deliveries: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            max_missed_deliveries: 1,
        }
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Identifier of a live subscriber
pub type SubscriberId = u64;

/// Handle returned to a new subscriber
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Arc<RegistryEvent>>,
}

struct SubscriberSlot {
    sender: mpsc::Sender<Arc<RegistryEvent>>,
    missed: AtomicU32,
}

/// Outcome of a single broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that accepted the event
    pub delivered: usize,
    /// Subscribers that missed the event but are still subscribed
    pub missed: usize,
    /// Subscribers removed during this broadcast
    pub dropped: usize,
}

// =============================================================================
// Event Hub
// =============================================================================

/// Explicitly owned set of live subscribers
pub struct EventHub {
    config: HubConfig,
    subscribers: DashMap<SubscriberId, SubscriberSlot>,
    next_id: AtomicU64,
}

impl EventHub {
    /// Create a new hub
    pub fn new(config: HubConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.config.queue_capacity.max(1));
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers.insert(
            id,
            SubscriberSlot {
                sender,
                missed: AtomicU32::new(0),
            },
        );
        debug!(subscriber = id, total = self.subscribers.len(), "Subscriber added");

        Subscription { id, receiver }
    }

    /// Remove a subscriber; unknown ids are ignored
    pub fn unsubscribe(&self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            debug!(subscriber = id, total = self.subscribers.len(), "Subscriber removed");
        }
    }

    /// Deliver an event to every current subscriber without waiting
    pub fn broadcast(&self, event: RegistryEvent) -> BroadcastReport {
        let event = Arc::new(event);
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for slot in self.subscribers.iter() {
            match slot.sender.try_send(event.clone()) {
                Ok(()) => {
                    slot.missed.store(0, Ordering::Relaxed);
                    report.delivered += 1;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let missed = slot.missed.fetch_add(1, Ordering::Relaxed) + 1;
                    if missed >= self.config.max_missed_deliveries {
                        failed.push(Error::Delivery {
                            subscriber: *slot.key(),
                            reason: format!("queue full for {} consecutive events", missed),
                        });
                    } else {
                        report.missed += 1;
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    failed.push(Error::Delivery {
                        subscriber: *slot.key(),
                        reason: "receiver closed".into(),
                    });
                }
            }
        }

        // Removing inside the iteration above would deadlock on the shard lock.
        for err in failed {
            if let Error::Delivery { subscriber, .. } = &err {
                if self.subscribers.remove(subscriber).is_some() {
                    warn!(error = %err, "Dropping subscriber");
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Drop every subscriber; their receivers observe end-of-stream
    pub fn close(&self) {
        let count = self.subscribers.len();
        self.subscribers.clear();
        debug!(dropped = count, "Event hub closed");
    }
}
