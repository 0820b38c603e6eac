//! Error types for courierbid.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Roster error: {0}")]
    Roster(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}
