//! Topic names shared by the auctioneer and couriers.

/// Topic carrying every announcement.
pub const BROADCAST_TOPIC: &str = "deliveries";

/// Prefix of the per-announcement topic couriers bid on.
pub const BIDDING_PREFIX: &str = "responses:";

/// Prefix of the per-announcement public result topic.
pub const SELECTION_PREFIX: &str = "selection:";

/// Prefix of each courier's private topic.
pub const COURIER_PREFIX: &str = "courier:";

pub fn bidding_topic(announcement_id: &str) -> String {
    format!("{}{}", BIDDING_PREFIX, announcement_id)
}

pub fn selection_topic(announcement_id: &str) -> String {
    format!("{}{}", SELECTION_PREFIX, announcement_id)
}

pub fn courier_topic(courier_id: &str) -> String {
    format!("{}{}", COURIER_PREFIX, courier_id)
}
