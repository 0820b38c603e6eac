//! Networked broker backed by Redis pub/sub.
//!
//! Lets the coordinator and couriers run as separate processes. Publishing
//! goes through one shared multiplexed connection; every subscription owns a
//! dedicated pub/sub connection that is closed when the subscription drops.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};

use super::{Message, MessageBus, Subscription};
use crate::error::{Error, Result};

/// URL scheme served by this backend.
pub const REDIS_SCHEME: &str = "redis://";

/// How long to wait for the broker before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct RedisBus {
    client: Client,
    publisher: MultiplexedConnection,
}

impl RedisBus {
    /// Open a client for `url` and check that the broker answers.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)
            .map_err(|e| Error::BrokerUnavailable(format!("invalid broker url '{}': {}", url, e)))?;
        let addr = client.get_connection_info().addr.to_string();

        let mut publisher = with_connect_timeout(&addr, client.get_multiplexed_async_connection()).await?;
        let _: String = with_connect_timeout(
            &addr,
            redis::cmd("PING").query_async::<_, String>(&mut publisher),
        )
        .await?;

        tracing::debug!("Connected to Redis broker at {}", addr);
        Ok(Self { client, publisher })
    }
}

async fn with_connect_timeout<T>(
    addr: &str,
    attempt: impl std::future::Future<Output = redis::RedisResult<T>>,
) -> Result<T> {
    match tokio::time::timeout(CONNECT_TIMEOUT, attempt).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(Error::BrokerUnavailable(format!("{}: {}", addr, e))),
        Err(_) => Err(Error::BrokerUnavailable(format!(
            "{}: no answer within {:?}",
            addr, CONNECT_TIMEOUT
        ))),
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus")
            .field("addr", &self.client.get_connection_info().addr)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<usize> {
        let mut conn = self.publisher.clone();
        let reached: usize = conn
            .publish(topic, payload)
            .await
            .map_err(|e| Error::Bus(format!("publish to '{}' failed: {}", topic, e)))?;

        tracing::trace!("Published on '{}' to {} subscriber(s)", topic, reached);
        Ok(reached)
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::Bus(format!("subscribe to '{}' failed: {}", topic, e)))?;

        // Returns once the broker has confirmed the subscription.
        pubsub
            .subscribe(topic)
            .await
            .map_err(|e| Error::Bus(format!("subscribe to '{}' failed: {}", topic, e)))?;

        let stream = pubsub.into_on_message().map(|msg| Message {
            topic: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });

        Ok(Subscription::new(topic, stream.boxed()))
    }
}
