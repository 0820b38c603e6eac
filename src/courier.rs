//! Courier agent: listens for announcements and decides whether to bid.
//!
//! Each courier runs as its own task and only talks to the rest of the
//! system through the bus. Decisions are independent per announcement.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, Select};
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::timeout;

use crate::bus::{Message, MessageBus, Subscription};
use crate::config::CourierDefaults;
use crate::error::{Error, Result};
use crate::protocol::topics::{bidding_topic, courier_topic, BROADCAST_TOPIC};
use crate::protocol::{decode, encode, Announcement, Bid, BroadcastMessage, Selection};

/// Merged broadcast and private subscriptions of one courier.
pub type Inbox = Select<Subscription, Subscription>;

/// Courier identity and bidding policy.
#[derive(Debug, Clone, PartialEq)]
pub struct CourierConfig {
    pub id: String,
    pub name: String,
    /// Probability of bidding on any given announcement.
    pub accept_rate: f64,
    pub eta_min: u32,
    pub eta_max: u32,
    /// Idle tick of the receive loop.
    pub poll_interval: Duration,
    /// Fixed RNG seed; entropy when unset.
    pub seed: Option<u64>,
}

impl CourierConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>, defaults: &CourierDefaults) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            accept_rate: defaults.accept_rate,
            eta_min: defaults.eta_min,
            eta_max: defaults.eta_max,
            poll_interval: defaults.poll_interval(),
            seed: None,
        }
    }

    pub fn with_accept_rate(mut self, accept_rate: f64) -> Self {
        self.accept_rate = accept_rate;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidInput("courier id must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&self.accept_rate) {
            return Err(Error::InvalidInput(format!(
                "accept rate for {} must be within [0, 1], got {}",
                self.id, self.accept_rate
            )));
        }
        if self.eta_min == 0 || self.eta_min > self.eta_max {
            return Err(Error::InvalidInput(format!(
                "ETA range {}..={} for {} is invalid",
                self.eta_min, self.eta_max, self.id
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidInput(format!(
                "poll interval for {} must be positive",
                self.id
            )));
        }
        Ok(())
    }
}

/// What a courier did with one incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum CourierEvent {
    /// Announcement accepted; the bid was published.
    Bid(Bid),
    /// Announcement declined.
    Skipped { announcement_id: String },
    /// Assignment confirmation on the private topic.
    Assigned(Assignment),
    /// Malformed, untagged or unrelated traffic.
    Ignored,
}

/// Payload accepted as an assignment confirmation.
///
/// Any non-empty JSON object on the private topic confirms an assignment.
/// Payloads shaped like a `Selection` are decoded as one.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Selection(Selection),
    Other(Map<String, Value>),
}

impl Assignment {
    pub fn announcement_id(&self) -> Option<&str> {
        match self {
            Assignment::Selection(selection) => Some(&selection.announcement_id),
            Assignment::Other(fields) => fields.get("announcement_id").and_then(Value::as_str),
        }
    }
}

/// Counters reported when a courier stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourierStats {
    pub announcements_seen: u64,
    pub bids_sent: u64,
    pub skipped: u64,
    pub assignments: u64,
}

impl std::fmt::Display for CourierStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} announcements, {} bids, {} skipped, {} assignments",
            self.announcements_seen, self.bids_sent, self.skipped, self.assignments
        )
    }
}

pub struct CourierAgent {
    config: CourierConfig,
    bus: Arc<dyn MessageBus>,
    private_topic: String,
    rng: StdRng,
    stats: CourierStats,
}

impl CourierAgent {
    pub fn new(config: CourierConfig, bus: Arc<dyn MessageBus>) -> Result<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            private_topic: courier_topic(&config.id),
            config,
            bus,
            rng,
            stats: CourierStats::default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn stats(&self) -> &CourierStats {
        &self.stats
    }

    /// Subscribe to the broadcast topic and this courier's private topic.
    pub async fn subscribe(&self) -> Result<Inbox> {
        let broadcast = self.bus.subscribe(BROADCAST_TOPIC).await?;
        let private = self.bus.subscribe(&self.private_topic).await?;

        tracing::info!(
            "Courier {} listening on '{}' and '{}'",
            self.config.id,
            BROADCAST_TOPIC,
            self.private_topic
        );
        Ok(stream::select(broadcast, private))
    }

    /// Subscribe, then process messages until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<CourierStats> {
        let inbox = self.subscribe().await?;
        self.run_with(inbox, shutdown).await
    }

    /// Process messages from an existing inbox until `shutdown` flips to true,
    /// its sender goes away, or the bus closes the inbox.
    pub async fn run_with(
        mut self,
        mut inbox: Inbox,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<CourierStats> {
        if *shutdown.borrow() {
            return Ok(self.stats);
        }

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Courier {} stopping", self.config.id);
                        break;
                    }
                }
                next = timeout(self.config.poll_interval, inbox.next()) => match next {
                    Err(_) => continue,
                    Ok(None) => {
                        tracing::warn!("Courier {} inbox closed by the broker", self.config.id);
                        break;
                    }
                    Ok(Some(message)) => {
                        if let Err(e) = self.handle_message(&message).await {
                            tracing::warn!(
                                "Courier {} failed to handle message on '{}': {}",
                                self.config.id,
                                message.topic,
                                e
                            );
                        }
                    }
                },
            }
        }

        tracing::info!("Courier {} stopped: {}", self.config.id, self.stats);
        Ok(self.stats)
    }

    /// React to a single message from either subscription.
    pub async fn handle_message(&mut self, message: &Message) -> Result<CourierEvent> {
        if message.topic == self.private_topic {
            return Ok(self.on_private(message));
        }

        if message.topic != BROADCAST_TOPIC {
            return Ok(CourierEvent::Ignored);
        }

        let Some(BroadcastMessage::Announcement(announcement)) = decode(&message.payload) else {
            return Ok(CourierEvent::Ignored);
        };

        self.stats.announcements_seen += 1;
        tracing::info!(
            "Courier {} received announcement {} ({} -> {}, reward {})",
            self.config.id,
            announcement.id,
            announcement.pickup,
            announcement.dropoff,
            announcement.reward
        );

        match self.evaluate(&announcement) {
            Some(bid) => {
                let topic = bidding_topic(&announcement.id);
                self.bus.publish(&topic, encode(&bid)?).await?;
                self.stats.bids_sent += 1;
                tracing::info!(
                    "Courier {} bid on '{}' with eta {} min",
                    self.config.id,
                    topic,
                    bid.eta_minutes
                );
                Ok(CourierEvent::Bid(bid))
            }
            None => {
                self.stats.skipped += 1;
                tracing::info!(
                    "Courier {} passes on announcement {}",
                    self.config.id,
                    announcement.id
                );
                Ok(CourierEvent::Skipped {
                    announcement_id: announcement.id,
                })
            }
        }
    }

    fn on_private(&mut self, message: &Message) -> CourierEvent {
        let fields = match decode::<Map<String, Value>>(&message.payload) {
            Some(fields) if !fields.is_empty() => fields,
            _ => return CourierEvent::Ignored,
        };

        let assignment = match serde_json::from_value::<Selection>(Value::Object(fields.clone())) {
            Ok(selection) => Assignment::Selection(selection),
            Err(_) => Assignment::Other(fields),
        };

        self.stats.assignments += 1;
        tracing::info!(
            "Courier {} assigned to announcement {}",
            self.config.id,
            assignment.announcement_id().unwrap_or("(unspecified)")
        );
        CourierEvent::Assigned(assignment)
    }

    /// Apply the accept policy to one announcement.
    fn evaluate(&mut self, announcement: &Announcement) -> Option<Bid> {
        let draw: f64 = self.rng.gen();
        if draw >= self.config.accept_rate {
            return None;
        }

        Some(Bid {
            announcement_id: announcement.id.clone(),
            courier_id: self.config.id.clone(),
            courier_name: self.config.name.clone(),
            eta_minutes: self.rng.gen_range(self.config.eta_min..=self.config.eta_max),
        })
    }
}
