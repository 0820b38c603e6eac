//! Publish/subscribe bus used by every participant.
//!
//! The auction protocol only sees the `MessageBus` trait. Delivery is
//! fire-and-forget: a message reaches the subscribers present at publish
//! time and nobody else.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};

use crate::error::{Error, Result};

pub mod memory;
pub mod redis_bus;

pub use memory::InMemoryBus;
pub use redis_bus::{RedisBus, REDIS_SCHEME};

/// URL scheme served by the in-process broker.
pub const MEMORY_SCHEME: &str = "memory://";

/// A payload received on a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Pub/sub substrate.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish a payload to a topic, returning how many subscribers it reached.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<usize>;

    /// Subscribe to a topic. Dropping the subscription unsubscribes.
    async fn subscribe(&self, topic: &str) -> Result<Subscription>;
}

/// Live subscription to one topic.
///
/// The stream ends when the substrate goes away.
pub struct Subscription {
    topic: String,
    inner: BoxStream<'static, Message>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, inner: BoxStream<'static, Message>) -> Self {
        Self {
            topic: topic.into(),
            inner,
            on_release: None,
        }
    }

    /// Run `hook` once the subscription is dropped and its stream released.
    pub fn on_release(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_release.take() {
            // The underlying receiver has to be gone before the hook runs.
            self.inner = futures::stream::empty().boxed();
            hook();
        }
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Connect to the broker named by `url`.
///
/// `memory://` gives a broker private to this process; `redis://` reaches a
/// Redis server shared with other processes. Unknown schemes and brokers
/// that do not answer are reported as unavailable, which callers treat as
/// fatal. `topic_capacity` only applies to the in-process broker.
pub async fn connect(url: &str, topic_capacity: usize) -> Result<Arc<dyn MessageBus>> {
    if url.starts_with(MEMORY_SCHEME) {
        tracing::debug!("Connected to in-memory broker at {}", url);
        return Ok(Arc::new(InMemoryBus::new(topic_capacity)));
    }

    if url.starts_with(REDIS_SCHEME) {
        return Ok(Arc::new(RedisBus::connect(url).await?));
    }

    Err(Error::BrokerUnavailable(format!(
        "unsupported broker url '{}' (expected {}... or {}...)",
        url, MEMORY_SCHEME, REDIS_SCHEME
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_memory() {
        let bus = connect("memory://local", 16).await.unwrap();
        let mut sub = bus.subscribe("t").await.unwrap();
        assert_eq!(bus.publish("t", b"x".to_vec()).await.unwrap(), 1);
        assert_eq!(sub.next().await.unwrap().payload, b"x");
    }

    #[tokio::test]
    async fn test_connect_unknown_scheme_is_unavailable() {
        for url in ["amqp://localhost:5672", ""] {
            let err = connect(url, 16).await.err().unwrap();
            assert!(matches!(err, Error::BrokerUnavailable(_)), "url {:?}", url);
        }
    }

    #[tokio::test]
    async fn test_connect_redis_without_server_is_unavailable() {
        let err = connect("redis://127.0.0.1:1/0", 16).await.err().unwrap();
        assert!(matches!(err, Error::BrokerUnavailable(_)));
    }
}
