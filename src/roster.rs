//! Courier roster loading and in-process fleet launching.
//!
//! Roster files have the columns `id,name,accept_rate`. Each entry becomes
//! one independent courier task.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::MessageBus;
use crate::config::CourierDefaults;
use crate::courier::{CourierAgent, CourierConfig, CourierStats};
use crate::error::{Error, Result};
use crate::tabular::{cell, read_records};

/// One line of a roster file. Blank cells fall back to the courier defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RosterRow {
    pub id: Option<String>,
    pub name: Option<String>,
    pub accept_rate: Option<String>,
}

/// Load courier configurations from a roster file.
pub fn load_roster(path: &Path, defaults: &CourierDefaults) -> Result<Vec<CourierConfig>> {
    let rows: Vec<RosterRow> = read_records(path)?;
    let roster = parse_roster(&rows, defaults);

    if roster.is_empty() {
        return Err(Error::Roster(format!(
            "no usable courier rows in {}",
            path.display()
        )));
    }

    tracing::debug!("Loaded {} courier(s) from {}", roster.len(), path.display());
    Ok(roster)
}

/// Turn roster rows into courier configurations, skipping unusable rows.
pub fn parse_roster(rows: &[RosterRow], defaults: &CourierDefaults) -> Vec<CourierConfig> {
    let mut seen = HashSet::new();
    let mut roster = Vec::new();

    for (index, row) in rows.iter().enumerate() {
        let Some(id) = cell(&row.id) else {
            tracing::debug!("Roster row {} has no id, skipping", index + 1);
            continue;
        };

        if !seen.insert(id.to_string()) {
            tracing::warn!("Duplicate courier id '{}' in roster, skipping", id);
            continue;
        }

        let name = cell(&row.name).unwrap_or(defaults.default_name.as_str());
        let accept_rate = match cell(&row.accept_rate) {
            Some(raw) => match raw.parse::<f64>() {
                Ok(rate) => rate,
                Err(_) => {
                    tracing::warn!("Courier '{}' has unreadable accept_rate '{}', skipping", id, raw);
                    continue;
                }
            },
            None => defaults.accept_rate,
        };

        let config = CourierConfig::new(id, name, defaults).with_accept_rate(accept_rate);
        if let Err(e) = config.validate() {
            tracing::warn!("Skipping courier '{}': {}", id, e);
            continue;
        }

        roster.push(config);
    }

    roster
}

/// Handle on a set of running couriers.
pub struct Fleet {
    couriers: Vec<(String, JoinHandle<Result<CourierStats>>)>,
    shutdown: watch::Sender<bool>,
}

impl Fleet {
    pub fn len(&self) -> usize {
        self.couriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.couriers.is_empty()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.couriers.iter().map(|(id, _)| id.as_str()).collect()
    }

    /// Stop every courier and collect its counters.
    pub async fn shutdown(self) -> Vec<(String, CourierStats)> {
        // Receivers may already be gone if every courier exited on its own.
        let _ = self.shutdown.send(true);

        let mut results = Vec::with_capacity(self.couriers.len());
        for (id, handle) in self.couriers {
            match handle.await {
                Ok(Ok(stats)) => results.push((id, stats)),
                Ok(Err(e)) => tracing::warn!("Courier {} exited with error: {}", id, e),
                Err(e) => tracing::warn!("Courier {} task failed: {}", id, e),
            }
        }

        tracing::info!("Fleet stopped ({} courier(s))", results.len());
        results
    }
}

/// Start one courier task per roster entry.
///
/// Every courier is subscribed by the time this returns, so announcements
/// published afterwards reach all of them.
pub async fn launch(bus: Arc<dyn MessageBus>, roster: Vec<CourierConfig>) -> Result<Fleet> {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut couriers = Vec::with_capacity(roster.len());

    for config in roster {
        let agent = CourierAgent::new(config, bus.clone())?;
        let inbox = agent.subscribe().await?;
        let id = agent.id().to_string();

        tracing::info!("Launching courier {}", id);
        let handle = tokio::spawn(agent.run_with(inbox, shutdown_rx.clone()));
        couriers.push((id, handle));
    }

    tracing::info!("{} courier(s) launched", couriers.len());
    Ok(Fleet { couriers, shutdown })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auctioneer::Auctioneer;
    use crate::bus::InMemoryBus;
    use crate::protocol::Announcement;
    use crate::tabular::parse_records;
    use std::time::Duration;

    #[test]
    fn test_parse_roster_defaults_and_skips() {
        let rows: Vec<RosterRow> = parse_records(
            "id,name,accept_rate\n\
             c1,Alice,0.8\n\
             ,Nobody,0.5\n\
             c2,,\n\
             c3,Carol,abc\n\
             c4,Dan,1.5\n\
             c1,Again,0.1\n"
                .as_bytes(),
        )
        .unwrap();
        let roster = parse_roster(&rows, &CourierDefaults::default());

        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id, "c1");
        assert_eq!(roster[0].name, "Alice");
        assert_eq!(roster[0].accept_rate, 0.8);
        assert_eq!(roster[1].id, "c2");
        assert_eq!(roster[1].name, "Courier");
        assert_eq!(roster[1].accept_rate, 0.9);
    }

    #[test]
    fn test_load_roster_quoted_and_padded_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("couriers.csv");
        std::fs::write(&path, "id, name ,accept_rate\n c5 ,\"Smith, Jo\", 0.5 \nc6\n").unwrap();

        let roster = load_roster(&path, &CourierDefaults::default()).unwrap();
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].id, "c5");
        assert_eq!(roster[0].name, "Smith, Jo");
        assert_eq!(roster[0].accept_rate, 0.5);
        assert_eq!(roster[1].id, "c6");
        assert_eq!(roster[1].name, "Courier");
    }

    #[test]
    fn test_load_roster_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = load_roster(&dir.path().join("missing.csv"), &CourierDefaults::default());
        assert!(matches!(missing, Err(Error::NotFound(_))));

        let empty = dir.path().join("empty.csv");
        std::fs::write(&empty, "id,name,accept_rate\n,x,0.5\n").unwrap();
        let result = load_roster(&empty, &CourierDefaults::default());
        assert!(matches!(result, Err(Error::Roster(_))));
    }

    #[tokio::test]
    async fn test_fleet_competes_for_announcement() {
        let bus = Arc::new(InMemoryBus::default());
        let defaults = CourierDefaults::default();
        let roster = vec![
            CourierConfig::new("c1", "Alice", &defaults).with_accept_rate(1.0),
            CourierConfig::new("c2", "Bob", &defaults).with_accept_rate(1.0),
            CourierConfig::new("c3", "Carol", &defaults).with_accept_rate(0.0),
        ];

        let fleet = launch(bus.clone(), roster).await.unwrap();
        assert_eq!(fleet.len(), 3);
        assert_eq!(fleet.ids(), vec!["c1", "c2", "c3"]);

        let auctioneer = Auctioneer::new(bus.clone());
        let announcement = Announcement::new("R1", "Z1", 6.5).unwrap();
        let report = auctioneer
            .run_auction(&announcement, Duration::from_secs(2))
            .await
            .unwrap();
        let winner = report.outcome.selection().unwrap().courier_id.clone();
        assert!(winner == "c1" || winner == "c2");

        // Give the winner a moment to read its assignment.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stats = fleet.shutdown().await;
        assert_eq!(stats.len(), 3);

        for (id, stats) in &stats {
            assert_eq!(stats.announcements_seen, 1, "courier {}", id);
            let expected = u64::from(*id == winner);
            assert_eq!(stats.assignments, expected, "courier {}", id);
        }
        let carol = &stats.iter().find(|(id, _)| id == "c3").unwrap().1;
        assert_eq!(carol.skipped, 1);
        assert_eq!(carol.bids_sent, 0);
    }
}
