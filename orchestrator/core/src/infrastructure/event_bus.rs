// Copyright (c) 2026 AOL Contributors
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// Three delivery paths:
// - Named channels ("global", "service:{name}", "workflow:{id}") with one
//   bounded queue per subscriber. Slow or gone subscribers are dropped.
// - Typed handlers registered per EventType, run concurrently on dispatch.
// - A broadcast firehose of every stored event for WebSocket streaming.
//
// In-memory only (events are lost on restart).

use crate::domain::events::{Event, EventType};
use futures::future::{join_all, BoxFuture};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Queue depth of a single channel subscriber
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 1000;

/// How long a publish waits on a full subscriber queue before dropping it
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Asynchronous callback invoked for events of one type
pub type EventHandler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

// ============================================================================
// PubSubChannel
// ============================================================================

/// A named topic with per-subscriber bounded queues
pub struct PubSubChannel {
    name: String,
    subscribers: RwLock<HashMap<String, mpsc::Sender<Event>>>,
}

impl PubSubChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes `subscriber_id`. Subscribing again replaces the previous queue.
    pub fn subscribe(&self, subscriber_id: impl Into<String>) -> mpsc::Receiver<Event> {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        self.subscribers.write().insert(subscriber_id.into(), sender);
        receiver
    }

    pub fn unsubscribe(&self, subscriber_id: &str) -> bool {
        self.subscribers.write().remove(subscriber_id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Delivers `event` to every subscriber and returns how many received it.
    pub async fn publish(&self, event: &Event) -> usize {
        let targets: Vec<(String, mpsc::Sender<Event>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, sender)| (id.clone(), sender.clone()))
            .collect();

        let deliveries = targets.into_iter().map(|(id, sender)| {
            let event = event.clone();
            async move {
                let delivered = sender.send_timeout(event, PUBLISH_TIMEOUT).await.is_ok();
                (id, sender, delivered)
            }
        });

        let mut delivered_count = 0;
        for (id, sender, delivered) in join_all(deliveries).await {
            if delivered {
                delivered_count += 1;
                continue;
            }
            warn!(channel = %self.name, subscriber = %id, "Dropping slow or closed subscriber");
            let mut subscribers = self.subscribers.write();
            // Only remove if the subscriber was not replaced in the meantime.
            if subscribers.get(&id).is_some_and(|current| current.same_channel(&sender)) {
                subscribers.remove(&id);
            }
        }
        delivered_count
    }
}

// ============================================================================
// EventBus
// ============================================================================

struct Inner {
    channels: RwLock<HashMap<String, Arc<PubSubChannel>>>,
    handlers: RwLock<HashMap<EventType, Vec<EventHandler>>>,
    firehose: broadcast::Sender<Event>,
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    /// Create a new event bus. `capacity` bounds the firehose buffer; slow
    /// firehose receivers lag instead of blocking publishers.
    pub fn new(capacity: usize) -> Self {
        let (firehose, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                channels: RwLock::new(HashMap::new()),
                handlers: RwLock::new(HashMap::new()),
                firehose,
            }),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn channel_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn channel_count(&self) -> usize {
        self.inner.channels.read().len()
    }

    /// Delivers to an existing channel only. Publishing never creates a channel.
    pub async fn publish(&self, name: &str, event: &Event) -> usize {
        let existing = self.inner.channels.read().get(name).cloned();
        let Some(channel) = existing else {
            debug!(channel = %name, "No subscribers on channel");
            return 0;
        };
        let delivered = channel.publish(event).await;
        debug!(channel = %name, delivered, "Published event");
        if channel.subscriber_count() == 0 {
            self.remove_if_empty(name);
        }
        delivered
    }

    pub fn subscribe(&self, channel: &str, subscriber_id: impl Into<String>) -> mpsc::Receiver<Event> {
        // Subscribing under the map lock keeps a concurrent prune from orphaning the queue.
        self.inner
            .channels
            .write()
            .entry(channel.to_string())
            .or_insert_with(|| Arc::new(PubSubChannel::new(channel)))
            .subscribe(subscriber_id)
    }

    pub fn unsubscribe(&self, channel: &str, subscriber_id: &str) -> bool {
        let removed = self
            .inner
            .channels
            .read()
            .get(channel)
            .is_some_and(|c| c.unsubscribe(subscriber_id));
        if removed {
            self.remove_if_empty(channel);
        }
        removed
    }

    fn remove_if_empty(&self, name: &str) {
        let mut channels = self.inner.channels.write();
        if channels.get(name).is_some_and(|c| c.subscriber_count() == 0) {
            channels.remove(name);
        }
    }

    /// Registers an async handler for one event type
    pub fn register_handler<F, Fut>(&self, event_type: EventType, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |event| Box::pin(handler(event)));
        self.inner
            .handlers
            .write()
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.inner
            .handlers
            .read()
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    /// Runs every handler registered for the event's type. Handlers run
    /// concurrently as separate tasks; a failing or panicking handler is
    /// logged and does not affect the others.
    pub async fn dispatch(&self, event: &Event) {
        let handlers: Vec<EventHandler> = self
            .inner
            .handlers
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();
        if handlers.is_empty() {
            return;
        }

        let tasks = handlers
            .into_iter()
            .map(|handler| tokio::spawn(handler(event.clone())));
        for outcome in join_all(tasks).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(event_type = %event.event_type, error = %e, "Event handler failed"),
                Err(e) => warn!(event_type = %event.event_type, error = %e, "Event handler panicked"),
            }
        }
    }

    /// Sends an event to all firehose receivers
    pub fn broadcast(&self, event: &Event) {
        let receiver_count = self.inner.firehose.send(event.clone()).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No firehose subscribers listening to event");
        }
    }

    /// Subscribe to every stored event
    pub fn subscribe_all(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.inner.firehose.subscribe(),
        }
    }

    /// Get the number of active firehose subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.firehose.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Receiver for all stored events
pub struct EventReceiver {
    receiver: broadcast::Receiver<Event>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<Event, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Event, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
