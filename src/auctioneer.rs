//! Auctioneer: resolves one announcement to at most one selection.
//!
//! An auction is strictly single round. The first well-formed bid received
//! on the announcement's bidding topic wins; reward and ETA play no part in
//! the choice. Re-announcing after a `NoWinner` outcome is left to the caller.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{timeout_at, Instant};

use crate::bus::{MessageBus, Subscription};
use crate::error::{Error, Result};
use crate::protocol::topics::{bidding_topic, courier_topic, selection_topic, BROADCAST_TOPIC};
use crate::protocol::{decode, encode, Announcement, Bid, BroadcastMessage, Selection};

/// Lifecycle of a single auction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuctionState {
    Created,
    Published,
    AwaitingBids,
    Selected,
    TimedOut,
}

impl AuctionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuctionState::Selected | AuctionState::TimedOut)
    }

    pub fn can_transition_to(&self, next: AuctionState) -> bool {
        use AuctionState::*;
        matches!(
            (self, next),
            (Created, Published)
                | (Published, AwaitingBids)
                | (AwaitingBids, Selected)
                | (AwaitingBids, TimedOut)
        )
    }
}

impl std::fmt::Display for AuctionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuctionState::Created => write!(f, "created"),
            AuctionState::Published => write!(f, "published"),
            AuctionState::AwaitingBids => write!(f, "awaiting_bids"),
            AuctionState::Selected => write!(f, "selected"),
            AuctionState::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// What an auction produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuctionOutcome {
    Selected(Selection),
    NoWinner,
}

impl AuctionOutcome {
    pub fn selection(&self) -> Option<&Selection> {
        match self {
            AuctionOutcome::Selected(selection) => Some(selection),
            AuctionOutcome::NoWinner => None,
        }
    }

    pub fn is_selected(&self) -> bool {
        self.selection().is_some()
    }
}

/// Summary of a finished auction.
#[derive(Debug, Clone)]
pub struct AuctionReport {
    pub announcement_id: String,
    pub outcome: AuctionOutcome,
    /// Terminal state reached.
    pub state: AuctionState,
    /// Messages observed on the bidding topic, including ignored ones.
    pub messages_seen: usize,
    pub elapsed: Duration,
}

struct AuctionTracker {
    announcement_id: String,
    state: AuctionState,
}

impl AuctionTracker {
    fn new(announcement_id: &str) -> Self {
        Self {
            announcement_id: announcement_id.to_string(),
            state: AuctionState::Created,
        }
    }

    fn advance(&mut self, next: AuctionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal auction transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(
            "Auction {}: {} -> {}",
            self.announcement_id,
            self.state,
            next
        );
        self.state = next;
    }
}

/// Coordinator running auctions over a message bus.
#[derive(Clone)]
pub struct Auctioneer {
    bus: Arc<dyn MessageBus>,
}

impl Auctioneer {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Broadcast `announcement` and award it to the first bid received
    /// within `wait_window`.
    pub async fn run_auction(
        &self,
        announcement: &Announcement,
        wait_window: Duration,
    ) -> Result<AuctionReport> {
        if wait_window.is_zero() {
            return Err(Error::InvalidInput(
                "auction wait window must be greater than zero".to_string(),
            ));
        }

        let started = Instant::now();
        let deadline = started.checked_add(wait_window).ok_or_else(|| {
            Error::InvalidInput(format!(
                "auction wait window of {:?} is too large",
                wait_window
            ))
        })?;
        let mut tracker = AuctionTracker::new(&announcement.id);
        tracing::info!(
            "Announcement created: {} ({} -> {}, reward {})",
            announcement.id,
            announcement.pickup,
            announcement.dropoff,
            announcement.reward
        );

        // Listen before broadcasting so a fast bidder cannot be missed.
        let mut bids = self.bus.subscribe(&bidding_topic(&announcement.id)).await?;

        let payload = encode(&BroadcastMessage::Announcement(announcement.clone()))?;
        let reached = self.bus.publish(BROADCAST_TOPIC, payload).await?;
        tracker.advance(AuctionState::Published);
        tracing::debug!(
            "Announcement {} published on '{}' to {} subscriber(s)",
            announcement.id,
            BROADCAST_TOPIC,
            reached
        );

        tracker.advance(AuctionState::AwaitingBids);
        tracing::info!(
            "Waiting up to {:.1}s for bids on '{}'",
            wait_window.as_secs_f64(),
            bids.topic()
        );
        let (winner, messages_seen) =
            await_first_bid(&mut bids, &announcement.id, deadline).await;

        // Stop listening; anything arriving from now on is dropped by the bus.
        drop(bids);

        let outcome = match winner {
            Some(bid) => {
                tracker.advance(AuctionState::Selected);
                tracing::info!(
                    "Courier {} ({}) selected for {} (eta {} min)",
                    bid.courier_id,
                    bid.courier_name,
                    bid.announcement_id,
                    bid.eta_minutes
                );
                let selection = Selection::from_winning_bid(&bid);
                self.publish_selection(&selection).await?;
                AuctionOutcome::Selected(selection)
            }
            None => {
                tracker.advance(AuctionState::TimedOut);
                tracing::info!(
                    "No courier answered {} within {:.1}s",
                    announcement.id,
                    wait_window.as_secs_f64()
                );
                AuctionOutcome::NoWinner
            }
        };

        Ok(AuctionReport {
            announcement_id: announcement.id.clone(),
            outcome,
            state: tracker.state,
            messages_seen,
            elapsed: started.elapsed(),
        })
    }

    /// Publish the same selection bytes to the result topic and the winner's private topic.
    async fn publish_selection(&self, selection: &Selection) -> Result<()> {
        let payload = encode(selection)?;
        let result_topic = selection_topic(&selection.announcement_id);
        let private_topic = courier_topic(&selection.courier_id);

        self.bus.publish(&result_topic, payload.clone()).await?;
        self.bus.publish(&private_topic, payload).await?;

        tracing::info!(
            "Assignment published on '{}' and '{}'",
            result_topic,
            private_topic
        );
        Ok(())
    }
}

/// Take the first acceptable bid before `deadline`.
///
/// Returns the winner, if any, and how many messages were observed.
async fn await_first_bid(
    bids: &mut Subscription,
    announcement_id: &str,
    deadline: Instant,
) -> (Option<Bid>, usize) {
    let mut seen = 0;

    loop {
        match timeout_at(deadline, bids.next()).await {
            Ok(Some(message)) => {
                seen += 1;
                match decode::<Bid>(&message.payload) {
                    Some(bid) if is_valid_bid(&bid, announcement_id) => return (Some(bid), seen),
                    Some(bid) => {
                        tracing::debug!(
                            "Ignoring bid from {} for {} on '{}'",
                            bid.courier_id,
                            bid.announcement_id,
                            message.topic
                        );
                    }
                    None => {}
                }
            }
            Ok(None) => {
                tracing::warn!("Bid stream for {} closed by the broker", announcement_id);
                return (None, seen);
            }
            Err(_) => return (None, seen),
        }
    }
}

fn is_valid_bid(bid: &Bid, announcement_id: &str) -> bool {
    bid.announcement_id == announcement_id && !bid.courier_id.is_empty() && bid.eta_minutes > 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use futures::FutureExt;
    use tokio::task::JoinHandle;

    /// Courier stand-in that bids after a fixed delay once it sees the announcement.
    fn spawn_scripted_bidder(
        bus: Arc<InMemoryBus>,
        mut deliveries: Subscription,
        courier_id: &str,
        courier_name: &str,
        delay: Duration,
        eta_minutes: u32,
    ) -> JoinHandle<()> {
        let courier_id = courier_id.to_string();
        let courier_name = courier_name.to_string();
        tokio::spawn(async move {
            let message = deliveries.next().await.unwrap();
            let BroadcastMessage::Announcement(announcement) = decode(&message.payload).unwrap();

            tokio::time::sleep(delay).await;
            let bid = Bid {
                announcement_id: announcement.id.clone(),
                courier_id,
                courier_name,
                eta_minutes,
            };
            bus.publish(&bidding_topic(&announcement.id), encode(&bid).unwrap())
                .await
                .unwrap();
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_bid_wins_end_to_end() {
        crate::logging::init_test();
        let bus = Arc::new(InMemoryBus::default());
        let auctioneer = Auctioneer::new(bus.clone());

        let mut result = bus.subscribe("selection:A1").await.unwrap();
        let mut c1_private = bus.subscribe("courier:c1").await.unwrap();
        let mut c2_private = bus.subscribe("courier:c2").await.unwrap();

        let c1 = spawn_scripted_bidder(
            bus.clone(),
            bus.subscribe(BROADCAST_TOPIC).await.unwrap(),
            "c1",
            "Alice",
            Duration::from_millis(300),
            10,
        );
        let c2 = spawn_scripted_bidder(
            bus.clone(),
            bus.subscribe(BROADCAST_TOPIC).await.unwrap(),
            "c2",
            "Bob",
            Duration::from_millis(500),
            7,
        );

        let announcement = Announcement::with_id("A1", "R1", "Z1", 6.5).unwrap();
        let report = auctioneer
            .run_auction(&announcement, Duration::from_secs_f64(6.0))
            .await
            .unwrap();

        let expected = Selection {
            announcement_id: "A1".to_string(),
            courier_id: "c1".to_string(),
            courier_name: "Alice".to_string(),
            status: crate::protocol::SelectionStatus::Assigned,
        };
        assert_eq!(report.outcome, AuctionOutcome::Selected(expected.clone()));
        assert_eq!(report.state, AuctionState::Selected);
        assert_eq!(report.messages_seen, 1);
        assert!(report.elapsed >= Duration::from_millis(300));
        assert!(report.elapsed < Duration::from_millis(500));

        let public = result.next().await.unwrap();
        let private = c1_private.next().await.unwrap();
        assert_eq!(public.payload, private.payload);
        assert_eq!(decode::<Selection>(&public.payload), Some(expected));

        // c2's bid still goes out, but nobody listens any more.
        c1.await.unwrap();
        c2.await.unwrap();
        assert_eq!(bus.subscriber_count("responses:A1"), 0);
        assert!(c2_private.next().now_or_never().is_none());
        assert!(result.next().now_or_never().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_bids_times_out() {
        let bus = Arc::new(InMemoryBus::default());
        let auctioneer = Auctioneer::new(bus.clone());
        let announcement = Announcement::new("R1", "Z1", 6.5).unwrap();
        let mut result = bus.subscribe(&selection_topic(&announcement.id)).await.unwrap();

        let report = auctioneer
            .run_auction(&announcement, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(report.outcome, AuctionOutcome::NoWinner);
        assert_eq!(report.state, AuctionState::TimedOut);
        assert!(report.elapsed >= Duration::from_secs(1));
        assert!(report.elapsed < Duration::from_millis(1100));
        assert!(result.next().now_or_never().is_none());
        assert_eq!(bus.subscriber_count(&bidding_topic(&announcement.id)), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_bid_wins_regardless_of_terms() {
        let bus = Arc::new(InMemoryBus::default());
        let auctioneer = Auctioneer::new(bus.clone());
        let mut deliveries = bus.subscribe(BROADCAST_TOPIC).await.unwrap();

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let message = deliveries.next().await.unwrap();
                let BroadcastMessage::Announcement(announcement) =
                    decode(&message.payload).unwrap();
                let topic = bidding_topic(&announcement.id);
                for (id, eta) in [("slow", 20), ("fast", 1), ("mid", 10)] {
                    let bid = Bid {
                        announcement_id: announcement.id.clone(),
                        courier_id: id.to_string(),
                        courier_name: id.to_uppercase(),
                        eta_minutes: eta,
                    };
                    bus.publish(&topic, encode(&bid).unwrap()).await.unwrap();
                }
            })
        };

        let announcement = Announcement::new("R1", "Z1", 100.0).unwrap();
        let report = auctioneer
            .run_auction(&announcement, Duration::from_secs(2))
            .await
            .unwrap();
        publisher.await.unwrap();

        assert_eq!(report.outcome.selection().unwrap().courier_id, "slow");
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_and_foreign_bids_are_skipped() {
        let bus = Arc::new(InMemoryBus::default());
        let auctioneer = Auctioneer::new(bus.clone());
        let mut deliveries = bus.subscribe(BROADCAST_TOPIC).await.unwrap();

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let message = deliveries.next().await.unwrap();
                let BroadcastMessage::Announcement(announcement) =
                    decode(&message.payload).unwrap();
                let topic = bidding_topic(&announcement.id);

                bus.publish(&topic, b"garbage".to_vec()).await.unwrap();
                bus.publish(&topic, Vec::new()).await.unwrap();
                let foreign = Bid {
                    announcement_id: "someone-else".to_string(),
                    courier_id: "c9".to_string(),
                    courier_name: "Mallory".to_string(),
                    eta_minutes: 3,
                };
                bus.publish(&topic, encode(&foreign).unwrap()).await.unwrap();

                tokio::time::sleep(Duration::from_millis(200)).await;
                let valid = Bid {
                    announcement_id: announcement.id.clone(),
                    courier_id: "c3".to_string(),
                    courier_name: "Carol".to_string(),
                    eta_minutes: 12,
                };
                bus.publish(&topic, encode(&valid).unwrap()).await.unwrap();
            })
        };

        let announcement = Announcement::new("R1", "Z1", 4.0).unwrap();
        let report = auctioneer
            .run_auction(&announcement, Duration::from_secs(1))
            .await
            .unwrap();
        publisher.await.unwrap();

        assert_eq!(report.outcome.selection().unwrap().courier_id, "c3");
        assert_eq!(report.messages_seen, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_bid_does_not_change_result() {
        let bus = Arc::new(InMemoryBus::default());
        let auctioneer = Auctioneer::new(bus.clone());
        let announcement = Announcement::new("R1", "Z1", 1.0).unwrap();
        let mut result = bus.subscribe(&selection_topic(&announcement.id)).await.unwrap();

        let report = auctioneer
            .run_auction(&announcement, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(report.outcome, AuctionOutcome::NoWinner);

        let late = Bid {
            announcement_id: announcement.id.clone(),
            courier_id: "c1".to_string(),
            courier_name: "Alice".to_string(),
            eta_minutes: 5,
        };
        let reached = bus
            .publish(&bidding_topic(&announcement.id), encode(&late).unwrap())
            .await
            .unwrap();

        assert_eq!(reached, 0);
        assert!(result.next().now_or_never().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_shutdown_ends_auction_without_winner() {
        let bus = Arc::new(InMemoryBus::default());
        let auctioneer = Auctioneer::new(bus.clone());
        let mut deliveries = bus.subscribe(BROADCAST_TOPIC).await.unwrap();

        let closer = {
            let bus = bus.clone();
            tokio::spawn(async move {
                deliveries.next().await.unwrap();
                bus.close();
            })
        };

        let announcement = Announcement::new("R1", "Z1", 1.0).unwrap();
        let report = auctioneer
            .run_auction(&announcement, Duration::from_secs(5))
            .await
            .unwrap();
        closer.await.unwrap();

        assert_eq!(report.outcome, AuctionOutcome::NoWinner);
        assert_eq!(report.state, AuctionState::TimedOut);
        assert!(report.elapsed < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_auctions_leave_no_topics_behind() {
        let bus = Arc::new(InMemoryBus::default());
        let auctioneer = Auctioneer::new(bus.clone());

        for i in 0..50 {
            let announcement = Announcement::new("R1", "Z1", f64::from(i)).unwrap();
            let report = auctioneer
                .run_auction(&announcement, Duration::from_millis(10))
                .await
                .unwrap();
            assert_eq!(report.outcome, AuctionOutcome::NoWinner);
        }

        assert_eq!(bus.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_window_is_rejected() {
        let bus = Arc::new(InMemoryBus::default());
        let auctioneer = Auctioneer::new(bus);
        let announcement = Announcement::new("R1", "Z1", 1.0).unwrap();

        let err = auctioneer
            .run_auction(&announcement, Duration::ZERO)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_unbounded_window_is_rejected() {
        let bus = Arc::new(InMemoryBus::default());
        let auctioneer = Auctioneer::new(bus.clone());
        let announcement = Announcement::new("R1", "Z1", 1.0).unwrap();
        let mut deliveries = bus.subscribe(BROADCAST_TOPIC).await.unwrap();

        let err = auctioneer
            .run_auction(&announcement, Duration::MAX)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::InvalidInput(_)));

        // Nothing was announced.
        assert!(deliveries.next().now_or_never().is_none());
    }

    #[test]
    fn test_state_transitions() {
        use AuctionState::*;
        assert!(Created.can_transition_to(Published));
        assert!(Published.can_transition_to(AwaitingBids));
        assert!(AwaitingBids.can_transition_to(Selected));
        assert!(AwaitingBids.can_transition_to(TimedOut));

        assert!(!Created.can_transition_to(AwaitingBids));
        for terminal in [Selected, TimedOut] {
            assert!(terminal.is_terminal());
            for next in [Created, Published, AwaitingBids, Selected, TimedOut] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
