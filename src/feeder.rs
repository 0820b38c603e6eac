//! Batch feeding of announcements to the auctioneer.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::auctioneer::{AuctionOutcome, Auctioneer};
use crate::config::AuctionConfig;
use crate::error::Result;
use crate::protocol::{Announcement, Selection};
use crate::tabular::{cell, read_records};

/// One line of an announcements file. Blank cells take the auction defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnnouncementRow {
    pub pickup: Option<String>,
    pub dropoff: Option<String>,
    pub reward: Option<String>,
}

/// Result of feeding a batch of announcements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchSummary {
    pub assigned: usize,
    pub unassigned: usize,
    pub selections: Vec<Selection>,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} auction(s): {} assigned, {} without bidders",
            self.assigned + self.unassigned,
            self.assigned,
            self.unassigned
        )
    }
}

/// Load announcements from a `pickup,dropoff,reward` file.
pub fn load_announcements(path: &Path, defaults: &AuctionConfig) -> Result<Vec<Announcement>> {
    let rows: Vec<AnnouncementRow> = read_records(path)?;
    let announcements = parse_announcements(&rows, defaults)?;
    tracing::debug!(
        "Loaded {} announcement(s) from {}",
        announcements.len(),
        path.display()
    );
    Ok(announcements)
}

/// Build one announcement per row, filling blanks from the defaults.
pub fn parse_announcements(rows: &[AnnouncementRow], defaults: &AuctionConfig) -> Result<Vec<Announcement>> {
    rows.iter()
        .map(|row| {
            let pickup = cell(&row.pickup).unwrap_or(defaults.default_pickup.as_str());
            let dropoff = cell(&row.dropoff).unwrap_or(defaults.default_dropoff.as_str());
            let reward = cell(&row.reward)
                .map(|raw| parse_reward(raw, defaults.default_reward))
                .unwrap_or(defaults.default_reward);
            Announcement::new(pickup, dropoff, reward)
        })
        .collect()
}

/// Parse a reward, accepting `,` as decimal separator.
///
/// Unreadable or negative values fall back to `default`.
pub fn parse_reward(raw: &str, default: f64) -> f64 {
    match raw.trim().replace(',', ".").parse::<f64>() {
        Ok(reward) if reward.is_finite() && reward >= 0.0 => reward,
        _ => {
            tracing::warn!("Unreadable reward '{}', using {}", raw, default);
            default
        }
    }
}

/// Run one auction per announcement, pausing `interval` after each.
pub async fn run_batch(
    auctioneer: &Auctioneer,
    announcements: &[Announcement],
    wait_window: Duration,
    interval: Duration,
) -> Result<BatchSummary> {
    let mut summary = BatchSummary::default();

    for (index, announcement) in announcements.iter().enumerate() {
        tracing::debug!("Batch auction {}/{}", index + 1, announcements.len());

        let report = auctioneer.run_auction(announcement, wait_window).await?;
        match report.outcome {
            AuctionOutcome::Selected(selection) => {
                summary.assigned += 1;
                summary.selections.push(selection);
            }
            AuctionOutcome::NoWinner => summary.unassigned += 1,
        }

        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    tracing::info!("Batch finished: {}", summary);
    Ok(summary)
}
