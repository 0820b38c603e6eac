//! CLI commands for courierbid using clap.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use crate::auctioneer::{AuctionOutcome, AuctionReport, Auctioneer};
use crate::bus::{self, MessageBus};
use crate::config::{load_settings_from, load_settings_or_default, validate_settings, CourierDefaults, Settings};
use crate::courier::{CourierAgent, CourierConfig};
use crate::feeder::{load_announcements, run_batch};
use crate::protocol::Announcement;
use crate::roster::{launch, load_roster, Fleet};

/// courierbid - first-bid-wins delivery dispatch.
#[derive(Parser)]
#[command(name = "courierbid")]
#[command(version = "0.1.0")]
#[command(about = "Broadcast delivery offers and assign them to the first courier to bid", long_about = None)]
pub struct Commands {
    /// Settings file (defaults to ~/.courierbid/settings.json)
    #[arg(long, global = true, env = "COURIERBID_SETTINGS")]
    pub settings: Option<PathBuf>,

    /// Broker URL (memory://local or redis://host:port/db)
    #[arg(long, global = true, env = "COURIERBID_BROKER_URL")]
    pub broker_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a single auction
    Announce {
        /// Pickup location
        #[arg(long)]
        pickup: Option<String>,

        /// Dropoff location
        #[arg(long)]
        dropoff: Option<String>,

        /// Reward offered
        #[arg(long)]
        reward: Option<f64>,

        /// Seconds to wait for the first bid
        #[arg(long)]
        wait: Option<f64>,

        /// Roster file (id,name,accept_rate) of couriers to run in this process
        #[arg(long)]
        couriers: Option<PathBuf>,
    },

    /// Run one auction per row of an announcements file
    Batch {
        /// Announcements file with columns pickup,dropoff,reward
        #[arg(long)]
        csv: PathBuf,

        /// Roster file (id,name,accept_rate) of couriers to run in this process
        #[arg(long)]
        couriers: Option<PathBuf>,

        /// Seconds to wait for the first bid
        #[arg(long)]
        wait: Option<f64>,

        /// Seconds to pause between auctions
        #[arg(long)]
        interval: Option<f64>,
    },

    /// Run one courier until interrupted
    Courier {
        /// Courier id, also the private topic suffix
        #[arg(long)]
        id: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Probability of bidding on an announcement, within [0, 1]
        #[arg(long)]
        accept_rate: Option<f64>,
    },
}

impl Commands {
    /// Run the command.
    pub async fn run(&self) -> Result<()> {
        let mut settings = self.load_settings()?;
        if let Some(url) = &self.broker_url {
            settings.broker.url = url.clone();
        }

        match &self.command {
            Command::Announce {
                pickup,
                dropoff,
                reward,
                wait,
                couriers,
            } => {
                if let Some(wait) = wait {
                    settings.auction.wait_seconds = *wait;
                }
                validate_settings(&settings)?;

                let announcement = Announcement::new(
                    pickup.as_deref().unwrap_or(settings.auction.default_pickup.as_str()),
                    dropoff.as_deref().unwrap_or(settings.auction.default_dropoff.as_str()),
                    reward.unwrap_or(settings.auction.default_reward),
                )?;
                cmd_announce(&settings, couriers.as_deref(), announcement).await
            }
            Command::Batch {
                csv,
                couriers,
                wait,
                interval,
            } => {
                if let Some(wait) = wait {
                    settings.auction.wait_seconds = *wait;
                }
                if let Some(interval) = interval {
                    settings.auction.interval_seconds = *interval;
                }
                validate_settings(&settings)?;
                cmd_batch(&settings, csv, couriers.as_deref()).await
            }
            Command::Courier {
                id,
                name,
                accept_rate,
            } => {
                validate_settings(&settings)?;
                let config = courier_config(&settings.courier, id, name.as_deref(), *accept_rate)?;
                cmd_courier(&settings, config).await
            }
        }
    }

    fn load_settings(&self) -> Result<Settings> {
        match &self.settings {
            Some(path) => load_settings_from(path)
                .with_context(|| format!("Failed to load settings from {}", path.display())),
            None => Ok(load_settings_or_default()),
        }
    }
}

async fn connect_bus(settings: &Settings) -> Result<Arc<dyn MessageBus>> {
    bus::connect(&settings.broker.url, settings.broker.topic_capacity)
        .await
        .context("Cannot start without a working broker")
}

/// Bring up the roster's couriers on `bus`, if a roster was given.
///
/// Without a roster the auction relies on couriers running elsewhere.
async fn start_fleet(
    bus: &Arc<dyn MessageBus>,
    defaults: &CourierDefaults,
    roster_path: Option<&Path>,
) -> Result<Option<Fleet>> {
    let Some(roster_path) = roster_path else {
        return Ok(None);
    };

    let roster = load_roster(roster_path, defaults)
        .with_context(|| format!("Failed to load roster {}", roster_path.display()))?;
    let fleet = launch(bus.clone(), roster).await?;

    println!("{} courier(s) online: {}", fleet.len(), fleet.ids().join(", "));
    Ok(Some(fleet))
}

async fn stop_fleet(fleet: Option<Fleet>) {
    let Some(fleet) = fleet else {
        return;
    };
    for (id, stats) in fleet.shutdown().await {
        println!("  {}: {}", id, stats);
    }
}

/// Run one auction, with the roster's couriers when one is given.
async fn announce_once(
    settings: &Settings,
    roster_path: Option<&Path>,
    announcement: &Announcement,
) -> Result<AuctionReport> {
    let wait_window = settings.auction.wait_window()?;
    let bus = connect_bus(settings).await?;
    let fleet = start_fleet(&bus, &settings.courier, roster_path).await?;

    println!(
        "Announcing {} ({} -> {}, reward {:.2})",
        announcement.id, announcement.pickup, announcement.dropoff, announcement.reward
    );
    let report = Auctioneer::new(bus)
        .run_auction(announcement, wait_window)
        .await;

    // Couriers are stopped even when the auction failed.
    stop_fleet(fleet).await;
    Ok(report?)
}

async fn cmd_announce(settings: &Settings, roster_path: Option<&Path>, announcement: Announcement) -> Result<()> {
    let report = announce_once(settings, roster_path, &announcement).await?;

    match &report.outcome {
        AuctionOutcome::Selected(selection) => println!(
            "Assigned to {} ({}) after {:.2}s",
            selection.courier_id,
            selection.courier_name,
            report.elapsed.as_secs_f64()
        ),
        AuctionOutcome::NoWinner => println!(
            "No courier answered within {:.1}s",
            settings.auction.wait_seconds
        ),
    }
    Ok(())
}

async fn cmd_batch(settings: &Settings, csv: &Path, roster_path: Option<&Path>) -> Result<()> {
    let wait_window = settings.auction.wait_window()?;
    let interval = settings.auction.interval()?;
    let announcements = load_announcements(csv, &settings.auction)
        .with_context(|| format!("Failed to load announcements {}", csv.display()))?;

    let bus = connect_bus(settings).await?;
    let fleet = start_fleet(&bus, &settings.courier, roster_path).await?;
    let auctioneer = Auctioneer::new(bus);

    let outcome = tokio::select! {
        summary = run_batch(&auctioneer, &announcements, wait_window, interval) => Some(summary),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, stopping couriers");
            None
        }
    };

    stop_fleet(fleet).await;

    if let Some(summary) = outcome {
        let summary = summary?;
        for selection in &summary.selections {
            println!(
                "  {} -> {} ({})",
                selection.announcement_id, selection.courier_id, selection.courier_name
            );
        }
        println!("{}", summary);
    }
    Ok(())
}

/// Courier configuration from command-line values, falling back to the settings.
fn courier_config(
    defaults: &CourierDefaults,
    id: &str,
    name: Option<&str>,
    accept_rate: Option<f64>,
) -> Result<CourierConfig> {
    let mut config = CourierConfig::new(id, name.unwrap_or(defaults.default_name.as_str()), defaults);
    if let Some(rate) = accept_rate {
        config = config.with_accept_rate(rate);
    }
    config.validate()?;
    Ok(config)
}

async fn cmd_courier(settings: &Settings, config: CourierConfig) -> Result<()> {
    let bus = connect_bus(settings).await?;
    let agent = CourierAgent::new(config, bus)?;
    let inbox = agent.subscribe().await?;
    let id = agent.id().to_string();

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupted, stopping courier"),
            Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {}", e),
        }
        let _ = stop.send(true);
    });

    println!("Courier {} online, press Ctrl-C to stop", id);
    let stats = agent.run_with(inbox, shutdown).await?;
    println!("Courier {}: {}", id, stats);
    Ok(())
}
