//! Configuration loading for courierbid.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Get the courierbid home directory (~/.courierbid).
pub fn get_home_dir() -> Result<PathBuf> {
    let home = directories::UserDirs::new()
        .ok_or_else(|| Error::Config("Could not determine home directory".to_string()))?;

    Ok(home.home_dir().join(".courierbid"))
}

/// Get the settings file path.
pub fn get_settings_path() -> Result<PathBuf> {
    Ok(get_home_dir()?.join("settings.json"))
}

/// Load settings from ~/.courierbid/settings.json
pub fn load_settings() -> Result<Settings> {
    let path = get_settings_path()?;

    if !path.exists() {
        return Err(Error::Config(format!(
            "Settings file not found at {}",
            path.display()
        )));
    }

    let settings = load_settings_from(&path)?;
    tracing::debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Load and validate settings from an explicit path.
pub fn load_settings_from(path: &std::path::Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    validate_settings(&settings)?;
    Ok(settings)
}

/// Load settings or return default if not found.
pub fn load_settings_or_default() -> Settings {
    load_settings().unwrap_or_else(|e| {
        tracing::warn!("Failed to load settings: {}, using defaults", e);
        Settings::default()
    })
}

pub fn validate_settings(settings: &Settings) -> Result<()> {
    let auction = &settings.auction;
    if auction.wait_window()?.is_zero() {
        return Err(Error::Config(format!(
            "auction.wait_seconds must be positive, got {}",
            auction.wait_seconds
        )));
    }
    auction.interval()?;
    if !(auction.default_reward.is_finite() && auction.default_reward >= 0.0) {
        return Err(Error::Config(format!(
            "auction.default_reward must not be negative, got {}",
            auction.default_reward
        )));
    }

    let courier = &settings.courier;
    if !(0.0..=1.0).contains(&courier.accept_rate) {
        return Err(Error::Config(format!(
            "courier.accept_rate must be within [0, 1], got {}",
            courier.accept_rate
        )));
    }
    if courier.eta_min == 0 || courier.eta_min > courier.eta_max {
        return Err(Error::Config(format!(
            "courier ETA range {}..={} is invalid",
            courier.eta_min, courier.eta_max
        )));
    }
    if courier.poll_interval_ms == 0 {
        return Err(Error::Config("courier.poll_interval_ms must be positive".to_string()));
    }

    if settings.broker.url.trim().is_empty() {
        return Err(Error::Config("broker.url must not be empty".to_string()));
    }

    Ok(())
}

/// Broker configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_url")]
    pub url: String,
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
}

fn default_broker_url() -> String {
    "memory://local".to_string()
}

fn default_topic_capacity() -> usize {
    crate::bus::memory::DEFAULT_TOPIC_CAPACITY
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            topic_capacity: default_topic_capacity(),
        }
    }
}

/// Auctioneer configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuctionConfig {
    /// How long to wait for the first bid.
    #[serde(default = "default_wait_seconds")]
    pub wait_seconds: f64,
    /// Pause between auctions in a batch.
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: f64,
    #[serde(default = "default_pickup")]
    pub default_pickup: String,
    #[serde(default = "default_dropoff")]
    pub default_dropoff: String,
    #[serde(default = "default_reward")]
    pub default_reward: f64,
}

fn default_wait_seconds() -> f64 {
    6.0
}

fn default_interval_seconds() -> f64 {
    1.5
}

fn default_pickup() -> String {
    "Restaurant A".to_string()
}

fn default_dropoff() -> String {
    "Client Z".to_string()
}

fn default_reward() -> f64 {
    6.5
}

impl AuctionConfig {
    pub fn wait_window(&self) -> Result<Duration> {
        seconds_to_duration("auction.wait_seconds", self.wait_seconds)
    }

    pub fn interval(&self) -> Result<Duration> {
        seconds_to_duration("auction.interval_seconds", self.interval_seconds)
    }
}

/// Negative, NaN and out-of-range values are configuration errors.
fn seconds_to_duration(field: &str, seconds: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| Error::Config(format!("{} = {} is not a usable duration: {}", field, seconds, e)))
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            wait_seconds: default_wait_seconds(),
            interval_seconds: default_interval_seconds(),
            default_pickup: default_pickup(),
            default_dropoff: default_dropoff(),
            default_reward: default_reward(),
        }
    }
}

/// Defaults applied to every courier unless the roster overrides them.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CourierDefaults {
    #[serde(default = "default_courier_name")]
    pub default_name: String,
    #[serde(default = "default_accept_rate")]
    pub accept_rate: f64,
    #[serde(default = "default_eta_min")]
    pub eta_min: u32,
    #[serde(default = "default_eta_max")]
    pub eta_max: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_courier_name() -> String {
    "Courier".to_string()
}

fn default_accept_rate() -> f64 {
    0.9
}

fn default_eta_min() -> u32 {
    5
}

fn default_eta_max() -> u32 {
    20
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl CourierDefaults {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for CourierDefaults {
    fn default() -> Self {
        Self {
            default_name: default_courier_name(),
            accept_rate: default_accept_rate(),
            eta_min: default_eta_min(),
            eta_max: default_eta_max(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// courierbid settings.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Settings {
    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub auction: AuctionConfig,

    #[serde(default)]
    pub courier: CourierDefaults,
}
