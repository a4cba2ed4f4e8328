//! Ordered fan-out of events to subscribers
//!
//! Each subscriber gets its own unbounded channel, so a slow consumer never
//! blocks the publisher and every subscriber sees events in publish order.
//! Late subscribers see nothing published before they subscribed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

struct BusInner<T> {
    next_id: u64,
    subscribers: HashMap<u64, UnboundedSender<T>>,
}

/// Multi-subscriber event bus
pub struct EventBus<T> {
    inner: Arc<Mutex<BusInner<T>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner {
                next_id: 0,
                subscribers: HashMap::new(),
            })),
        }
    }

    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = match self.inner.lock() {
            Ok(mut inner) => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.subscribers.insert(id, tx);
                id
            }
            Err(_) => u64::MAX,
        };
        Subscription {
            id,
            rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver to every live subscriber. Closed receivers are pruned.
    pub fn publish(&self, event: T) {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .subscribers
                .retain(|_, tx| tx.send(event.clone()).is_ok());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.subscribers.len())
            .unwrap_or(0)
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription<T> {
    id: u64,
    rx: UnboundedReceiver<T>,
    bus: Weak<Mutex<BusInner<T>>>,
}

impl<T> Subscription<T> {
    /// Next event; `None` once the bus is gone and the queue is drained
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Next already-delivered event, if any
    pub fn try_recv(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Everything delivered so far
    pub fn drain(&mut self) -> Vec<T> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn unsubscribe(self) {}
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            if let Ok(mut inner) = bus.lock() {
                inner.subscribers.remove(&self.id);
            }
        }
    }
}
