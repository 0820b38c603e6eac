//! In-process broker backed by tokio broadcast channels.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use super::{Message, MessageBus, Subscription};
use crate::error::{Error, Result};

/// Default number of undelivered messages a subscriber may fall behind by.
pub const DEFAULT_TOPIC_CAPACITY: usize = 256;

type Registry = Mutex<HashMap<String, broadcast::Sender<Message>>>;

/// Broker holding one broadcast channel per active topic.
///
/// Messages published on a topic arrive in publish order. A topic with no
/// live subscribers drops what is published to it, and its channel is
/// removed as soon as the last subscription goes away.
#[derive(Debug)]
pub struct InMemoryBus {
    topics: Arc<Registry>,
    capacity: usize,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Number of topics that currently have a channel.
    pub fn topic_count(&self) -> usize {
        self.lock().map(|topics| topics.len()).unwrap_or(0)
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock()
            .map(|topics| topics.get(topic).map_or(0, |tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    /// Drop every topic. Open subscriptions see their stream end.
    pub fn close(&self) {
        if let Ok(mut topics) = self.lock() {
            let count = topics.len();
            topics.clear();
            tracing::debug!("In-memory broker closed ({} topics dropped)", count);
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, broadcast::Sender<Message>>>> {
        self.topics
            .lock()
            .map_err(|_| Error::Bus("topic registry lock poisoned".to_string()))
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(DEFAULT_TOPIC_CAPACITY)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<usize> {
        let mut topics = self.lock()?;

        let Some(tx) = topics.get(topic) else {
            tracing::trace!("No subscribers on '{}', message dropped", topic);
            return Ok(0);
        };

        let message = Message {
            topic: topic.to_string(),
            payload,
        };

        match tx.send(message) {
            Ok(reached) => Ok(reached),
            Err(_) => {
                // Every receiver is gone; forget the topic.
                topics.remove(topic);
                tracing::trace!("Pruned topic '{}' with no subscribers", topic);
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let rx = {
            let mut topics = self.lock()?;
            topics
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(self.capacity).0)
                .subscribe()
        };

        let name = topic.to_string();
        let stream = BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(message) => Some(message),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!("Subscriber on '{}' lagged, {} messages skipped", name, skipped);
                None
            }
        });

        let registry = Arc::downgrade(&self.topics);
        let topic = topic.to_string();
        Ok(Subscription::new(topic.clone(), Box::pin(stream))
            .on_release(move || release_topic(&registry, &topic)))
    }
}

/// Forget a topic once nobody is subscribed to it any more.
fn release_topic(registry: &Weak<Registry>, topic: &str) {
    let Some(registry) = registry.upgrade() else {
        return;
    };
    let Ok(mut topics) = registry.lock() else {
        return;
    };

    if topics.get(topic).is_some_and(|tx| tx.receiver_count() == 0) {
        topics.remove(topic);
        tracing::trace!("Pruned topic '{}' with no subscribers", topic);
    }
}
