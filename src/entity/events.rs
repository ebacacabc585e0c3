// ============================================================================
// Lifecycle Listener Fan-out
// ============================================================================
//
// Subscribers are partitioned by delivery mode:
// - Immediate listeners run on the firing thread, priority ones first
// - EventQueue listeners are posted to a single-consumer queue owned by the
//   UI layer and are never run synchronously
//
// For one firing call every Immediate listener has returned before the first
// EventQueue listener is enqueued.
//
// ============================================================================

use crate::core::{EntityError, EntityKey, Result, Value};
use crate::entity::Transition;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tracing::warn;

/// Notification delivered to listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityEvent {
    /// A lifecycle transition completed.
    State { key: EntityKey, transition: Transition },
    /// A field value changed.
    Field {
        key: EntityKey,
        field: String,
        old: Value,
        new: Value,
    },
    /// The entity received its storage key.
    PrimaryKey { old: EntityKey, new: EntityKey },
    /// The field designated as the entity's name changed.
    Name { key: EntityKey, old: Value, new: Value },
    /// The field designated as the entity's title changed.
    Title { key: EntityKey, old: Value, new: Value },
}

impl EntityEvent {
    /// Key of the entity at the time the event was fired.
    pub fn key(&self) -> EntityKey {
        match self {
            EntityEvent::State { key, .. }
            | EntityEvent::Field { key, .. }
            | EntityEvent::Name { key, .. }
            | EntityEvent::Title { key, .. } => *key,
            EntityEvent::PrimaryKey { new, .. } => *new,
        }
    }

    pub fn transition(&self) -> Option<&Transition> {
        match self {
            EntityEvent::State { transition, .. } => Some(transition),
            _ => None,
        }
    }
}

/// Which events a listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    State,
    Field,
    PrimaryKey,
    Name,
    Title,
    All,
}

impl Interest {
    pub fn matches(&self, event: &EntityEvent) -> bool {
        matches!(
            (self, event),
            (Interest::All, _)
                | (Interest::State, EntityEvent::State { .. })
                | (Interest::Field, EntityEvent::Field { .. })
                | (Interest::PrimaryKey, EntityEvent::PrimaryKey { .. })
                | (Interest::Name, EntityEvent::Name { .. })
                | (Interest::Title, EntityEvent::Title { .. })
        )
    }
}

/// How and when a listener is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Delivery {
    #[default]
    Immediate,
    ImmediatePriority,
    EventQueue,
    EventQueuePriority,
}

impl Delivery {
    pub fn is_queued(&self) -> bool {
        matches!(self, Delivery::EventQueue | Delivery::EventQueuePriority)
    }

    fn rank(&self) -> u8 {
        match self {
            Delivery::ImmediatePriority => 0,
            Delivery::Immediate => 1,
            Delivery::EventQueuePriority => 2,
            Delivery::EventQueue => 3,
        }
    }
}

pub type ListenerFn = Arc<dyn Fn(&EntityEvent) + Send + Sync>;

/// Handle returned on registration, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

impl ListenerId {
    fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Clone)]
struct Subscription {
    id: ListenerId,
    interest: Interest,
    delivery: Delivery,
    callback: ListenerFn,
}

/// Per-entity listener collection with its own lock.
#[derive(Default)]
pub struct ListenerRegistry {
    subscriptions: Mutex<Vec<Subscription>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, interest: Interest, delivery: Delivery, callback: ListenerFn) -> ListenerId {
        let id = ListenerId::next();
        self.lock().push(Subscription {
            id,
            interest,
            delivery,
            callback,
        });
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut subscriptions = self.lock();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        subscriptions.len() != before
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `events`. Callbacks run without the registry lock held, so a
    /// listener may add or remove listeners.
    pub fn fire(&self, events: &[EntityEvent], queue: Option<&EventQueue>) {
        if events.is_empty() {
            return;
        }
        let mut subscriptions = self.lock().clone();
        if subscriptions.is_empty() {
            return;
        }
        // stable: registration order is kept within one delivery rank
        subscriptions.sort_by_key(|s| s.delivery.rank());

        for subscription in subscriptions.iter().filter(|s| !s.delivery.is_queued()) {
            for event in events.iter().filter(|e| subscription.interest.matches(e)) {
                (subscription.callback)(event);
            }
        }

        for subscription in subscriptions.iter().filter(|s| s.delivery.is_queued()) {
            for event in events.iter().filter(|e| subscription.interest.matches(e)) {
                match queue {
                    Some(queue) => queue.post(subscription.callback.clone(), event.clone()),
                    None => warn!(
                        listener = ?subscription.id,
                        key = %event.key(),
                        "no event queue configured, queued listener skipped"
                    ),
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A listener invocation waiting on the event queue.
pub struct QueuedEvent {
    callback: ListenerFn,
    event: EntityEvent,
}

impl QueuedEvent {
    pub fn event(&self) -> &EntityEvent {
        &self.event
    }

    /// Run the listener on the current thread.
    pub fn dispatch(self) {
        (self.callback)(&self.event);
    }
}

/// Producer side of the deferred delivery queue. Cheap to clone.
#[derive(Clone)]
pub struct EventQueue {
    sender: UnboundedSender<QueuedEvent>,
}

impl EventQueue {
    /// Create a queue and the receiver the UI layer drains.
    pub fn channel() -> (EventQueue, EventQueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (EventQueue { sender }, EventQueueReceiver { receiver })
    }

    fn post(&self, callback: ListenerFn, event: EntityEvent) {
        if self.sender.send(QueuedEvent { callback, event }).is_err() {
            warn!("event queue receiver dropped, queued listener skipped");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer side of the deferred delivery queue.
pub struct EventQueueReceiver {
    receiver: UnboundedReceiver<QueuedEvent>,
}

impl EventQueueReceiver {
    /// Run every listener already queued; returns how many ran.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut dispatched = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(queued) => {
                    queued.dispatch();
                    dispatched += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        dispatched
    }

    pub async fn next(&mut self) -> Option<QueuedEvent> {
        self.receiver.recv().await
    }

    /// Dispatch until every `EventQueue` handle has been dropped.
    pub async fn run(mut self) -> usize {
        let mut dispatched = 0;
        while let Some(queued) = self.receiver.recv().await {
            queued.dispatch();
            dispatched += 1;
        }
        dispatched
    }
}

pub(crate) fn require_queue(delivery: Delivery, queue: Option<&EventQueue>) -> Result<()> {
    if delivery.is_queued() && queue.is_none() {
        return Err(EntityError::Logic(
            "event-queue delivery requested but the manager has no event queue".to_string(),
        ));
    }
    Ok(())
}
