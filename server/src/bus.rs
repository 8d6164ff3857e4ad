//! In-process publish/subscribe bus for file events, graph connectivity, and
//! analysis outcomes.
//!
//! Subscribers get an unbounded channel per topic; publishing never blocks.
//! The bus holds no back-pointers to its subscribers: the queue is injected
//! with a bus handle, never the other way around, so no reference cycles
//! form between the queue's handlers and the components publishing into it.

use crate::types::{Event, Topic};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

type Subscriber = (Uuid, mpsc::UnboundedSender<Event>);

/// Cheaply cloneable handle; all clones share the same topic table.
#[derive(Clone, Default)]
pub struct EventBus {
    topics: Arc<DashMap<Topic, Vec<Subscriber>>>,
}

/// A live subscription. Receive with [`Subscription::recv`]; dropping the
/// subscription (or calling [`Subscription::unsubscribe`], which is
/// idempotent) detaches it; closed senders are pruned on the next publish.
pub struct Subscription {
    id: Uuid,
    topic: Topic,
    rx: mpsc::UnboundedReceiver<Event>,
    topics: Arc<DashMap<Topic, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for one topic.
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.topics.entry(topic).or_default().push((id, tx));
        Subscription { id, topic, rx, topics: Arc::clone(&self.topics) }
    }

    /// Deliver an event to every live subscriber of its topic.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        if let Some(mut subs) = self.topics.get_mut(&topic) {
            // Prune subscribers whose receiver side is gone.
            subs.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        }
        trace!(topic = ?topic, "event published");
    }

    /// Number of live subscribers on a topic (test and stats use).
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics.get(&topic).map(|s| s.len()).unwrap_or(0)
    }
}

impl Subscription {
    /// Await the next event on this topic. Returns `None` once unsubscribed
    /// and the channel has drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive for drain loops.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Remove this subscriber from the bus. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if let Some(mut subs) = self.topics.get_mut(&self.topic) {
            subs.retain(|(id, _)| *id != self.id);
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(path: &str) -> Event {
        Event::FileChanged { path: path.into(), size: 1, mod_time: 1 }
    }

    #[tokio::test]
    async fn subscribers_receive_only_their_topic() {
        let bus = EventBus::new();
        let mut changed_sub = bus.subscribe(Topic::FileChanged);
        let mut connected_sub = bus.subscribe(Topic::GraphConnected);

        bus.publish(changed("/a"));
        bus.publish(Event::GraphConnected { endpoint: "local".into() });

        match changed_sub.recv().await {
            Some(Event::FileChanged { path, .. }) => assert_eq!(path, "/a"),
            other => panic!("unexpected: {other:?}"),
        }
        match connected_sub.recv().await {
            Some(Event::GraphConnected { endpoint }) => assert_eq!(endpoint, "local"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(changed_sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Topic::FileChanged);
        assert_eq!(bus.subscriber_count(Topic::FileChanged), 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(bus.subscriber_count(Topic::FileChanged), 0);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned_on_publish() {
        let bus = EventBus::new();
        let sub = bus.subscribe(Topic::FileChanged);
        drop(sub);

        bus.publish(changed("/b"));
        assert_eq!(bus.subscriber_count(Topic::FileChanged), 0);
    }
}
