//! Dispatch auction protocol.
//!
//! This module defines what travels over the bus:
//! - Announcement, bid and selection messages
//! - Topic naming shared by every participant
//! - JSON codec with tolerant decoding

pub mod codec;
pub mod topics;
pub mod types;

pub use codec::{decode, encode};
pub use types::{Announcement, Bid, BroadcastMessage, Selection, SelectionStatus};
