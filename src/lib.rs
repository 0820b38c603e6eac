//! courierbid library root.

pub mod auctioneer;
pub mod bus;
pub mod cli;
pub mod config;
pub mod courier;
pub mod error;
pub mod feeder;
pub mod logging;
pub mod protocol;
pub mod roster;
pub mod tabular;

pub use auctioneer::{AuctionOutcome, AuctionReport, AuctionState, Auctioneer};
pub use bus::{connect, InMemoryBus, Message, MessageBus, RedisBus, Subscription};
pub use cli::Commands;
pub use config::{load_settings, Settings};
pub use courier::{Assignment, CourierAgent, CourierConfig, CourierEvent, CourierStats};
pub use error::{Error, Result};
pub use protocol::{Announcement, Bid, Selection};
