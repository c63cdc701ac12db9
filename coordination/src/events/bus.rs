//! In-memory event bus for workflow coordination
//!
//! Delivery is best effort: each subscriber owns a bounded queue and an
//! event that does not fit is dropped for that subscriber only. Publishing
//! never blocks on slow consumers.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use super::types::{Event, EventId, EventType};

/// Default number of events retained in history
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Default per-subscriber queue capacity
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 256;

/// Capacities for the event bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    pub history_capacity: usize,
    pub subscriber_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            subscriber_capacity: DEFAULT_SUBSCRIBER_CAPACITY,
        }
    }
}

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Bus-side half of a subscription
struct SubscriberSlot {
    filter: HashSet<EventType>,
    /// `None` once unsubscribed
    sender: Mutex<Option<mpsc::Sender<Event>>>,
}

impl SubscriberSlot {
    fn matches(&self, event_type: EventType) -> bool {
        self.filter.is_empty() || self.filter.contains(&event_type)
    }

    /// Not unsubscribed and the receiving handle is still alive
    fn is_open(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .is_some_and(|sender| !sender.is_closed())
    }
}

#[derive(Default)]
struct Registry {
    subscribers: HashMap<String, Arc<SubscriberSlot>>,
    history: VecDeque<Event>,
    next_id: u64,
}

/// Consumer-side half of a subscription
#[derive(Debug)]
pub struct Subscription {
    id: String,
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    /// Subscription id (`sub-N`)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next event; `None` after unsubscribe once drained
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Take a queued event without waiting
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}

/// Publish/subscribe hub with bounded history
pub struct EventBus {
    config: EventBusConfig,
    registry: Mutex<Registry>,
}

impl EventBus {
    /// Create a bus with default capacities
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a bus with explicit capacities
    pub fn with_config(config: EventBusConfig) -> Self {
        let history = VecDeque::with_capacity(config.history_capacity.min(DEFAULT_HISTORY_CAPACITY));
        Self {
            config,
            registry: Mutex::new(Registry {
                history,
                ..Default::default()
            }),
        }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Register a subscriber; an empty filter receives every event type
    pub fn subscribe(&self, filter: impl IntoIterator<Item = EventType>) -> Subscription {
        // tokio panics on a zero-capacity channel
        let (sender, receiver) = mpsc::channel(self.config.subscriber_capacity.max(1));
        let slot = Arc::new(SubscriberSlot {
            filter: filter.into_iter().collect(),
            sender: Mutex::new(Some(sender)),
        });

        let mut registry = self.registry.lock();
        registry.next_id += 1;
        let id = format!("sub-{}", registry.next_id);
        registry.subscribers.insert(id.clone(), slot);
        debug!(subscription = %id, "Subscriber registered");

        Subscription { id, receiver }
    }

    /// Close a subscription; unknown or already-closed ids are ignored
    pub fn unsubscribe(&self, id: &str) {
        let slot = self.registry.lock().subscribers.remove(id);
        if let Some(slot) = slot {
            // Dropping the sender ends the receiver's stream once it drains.
            slot.sender.lock().take();
            debug!(subscription = %id, "Subscriber removed");
        }
    }

    /// Record an event in history and deliver it to matching subscribers
    pub fn publish(&self, mut event: Event) -> EventId {
        if event.id.is_empty() {
            event.id = Event::new_id();
        }
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }
        let event_id = event.id.clone();
        let event_type = event.event_type;

        let slots: Vec<(String, Arc<SubscriberSlot>)> = {
            let mut registry = self.registry.lock();
            registry.history.push_back(event.clone());
            while registry.history.len() > self.config.history_capacity {
                registry.history.pop_front();
            }
            registry
                .subscribers
                .iter()
                .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut delivered = 0usize;
        let mut abandoned = Vec::new();
        for (id, slot) in slots {
            let sender = slot.sender.lock();
            let Some(sender) = sender.as_ref() else {
                continue;
            };
            if sender.is_closed() {
                abandoned.push(id);
                continue;
            }
            if !slot.matches(event_type) {
                continue;
            }
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(subscription = %id, event_type = %event_type, "Subscriber queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => abandoned.push(id),
            }
        }

        if !abandoned.is_empty() {
            let mut registry = self.registry.lock();
            for id in &abandoned {
                registry.subscribers.remove(id);
            }
            debug!(count = abandoned.len(), "Removed subscribers whose handle was dropped");
        }

        debug!(event_id = %event_id, event_type = %event_type, delivered, "Event published");
        event_id
    }

    /// Most recent events first, at most `limit`; an empty `types` matches all
    pub fn history(&self, limit: usize, types: &[EventType]) -> Vec<Event> {
        let registry = self.registry.lock();
        registry
            .history
            .iter()
            .rev()
            .filter(|e| types.is_empty() || types.contains(&e.event_type))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Retained events of one workflow, oldest first
    pub fn workflow_events(&self, workflow_id: &str) -> Vec<Event> {
        let registry = self.registry.lock();
        registry
            .history
            .iter()
            .filter(|e| e.is_for_workflow(workflow_id))
            .cloned()
            .collect()
    }

    /// Number of open subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .subscribers
            .values()
            .filter(|slot| slot.is_open())
            .count()
    }

    /// Number of events currently retained
    pub fn history_len(&self) -> usize {
        self.registry.lock().history.len()
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
