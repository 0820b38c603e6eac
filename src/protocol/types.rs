//! Message shapes exchanged between the auctioneer and couriers.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A delivery offer broadcast to every courier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Announcement {
    /// Unique offer ID (UUID v4)
    pub id: String,
    /// Pickup location
    pub pickup: String,
    /// Dropoff location
    pub dropoff: String,
    /// Reward paid to the assigned courier
    pub reward: f64,
}

impl Announcement {
    /// Create a new announcement with a freshly generated ID.
    pub fn new(pickup: impl Into<String>, dropoff: impl Into<String>, reward: f64) -> Result<Self> {
        Self::with_id(uuid::Uuid::new_v4().to_string(), pickup, dropoff, reward)
    }

    /// Create an announcement with a caller-chosen ID.
    pub fn with_id(
        id: impl Into<String>,
        pickup: impl Into<String>,
        dropoff: impl Into<String>,
        reward: f64,
    ) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidInput("announcement id must not be empty".to_string()));
        }
        if !reward.is_finite() || reward < 0.0 {
            return Err(Error::InvalidInput(format!(
                "reward must be a non-negative number, got {}",
                reward
            )));
        }

        Ok(Self {
            id,
            pickup: pickup.into(),
            dropoff: dropoff.into(),
            reward,
        })
    }
}

/// Traffic carried on the shared broadcast topic.
///
/// The `type` field discriminates announcements from anything else that
/// may be published there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastMessage {
    Announcement(Announcement),
}

/// A courier's candidacy for one announcement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bid {
    pub announcement_id: String,
    pub courier_id: String,
    pub courier_name: String,
    pub eta_minutes: u32,
}

/// Assignment status carried by a selection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStatus {
    Assigned,
}

/// The auctioneer's final decision for an announcement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Selection {
    pub announcement_id: String,
    pub courier_id: String,
    pub courier_name: String,
    pub status: SelectionStatus,
}

impl Selection {
    /// Build the selection awarding an announcement to the given bid.
    pub fn from_winning_bid(bid: &Bid) -> Self {
        Self {
            announcement_id: bid.announcement_id.clone(),
            courier_id: bid.courier_id.clone(),
            courier_name: bid.courier_name.clone(),
            status: SelectionStatus::Assigned,
        }
    }
}
