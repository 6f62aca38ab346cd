//! Persistence layer.
//!
//! Writes cycle snapshots as pretty JSON, one file per day
//! (`cycle_stats_YYYYMMDD.json`), and reloads the most recent one on
//! startup so cumulative statistics survive restarts.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::resilience::BreakerStats;
use crate::types::{CyclePhase, CycleStats};

const FILE_PREFIX: &str = "cycle_stats_";

/// State written at the end of every cycle and on stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub cycle_count: u64,
    pub timestamp: DateTime<Utc>,
    pub stats: CycleStats,
    pub current_phase: CyclePhase,
    /// Opportunities held when the snapshot was taken.
    pub opportunities_found: usize,
    /// Trades executed in the cycle being recorded.
    pub trades_executed: usize,
    #[serde(default)]
    pub breakers: Vec<BreakerStats>,
}

/// Path of the snapshot file for a given day.
pub fn snapshot_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("{FILE_PREFIX}{}.json", date.format("%Y%m%d")))
}

/// Write a snapshot to today's file, replacing any earlier one from today.
pub fn save_snapshot(dir: &Path, snapshot: &CycleSnapshot) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create snapshot dir {}", dir.display()))?;

    let path = snapshot_path(dir, snapshot.timestamp.date_naive());
    let json = serde_json::to_string_pretty(snapshot).context("Failed to serialise cycle snapshot")?;
    fs::write(&path, json)
        .with_context(|| format!("Failed to write snapshot to {}", path.display()))?;

    debug!(
        path = %path.display(),
        cycle = snapshot.cycle_count,
        phase = %snapshot.current_phase,
        "Snapshot saved"
    );
    Ok(path)
}

/// Load the most recent snapshot in `dir`.
/// Returns None if the directory holds none (fresh start).
pub fn load_latest_snapshot(dir: &Path) -> Result<Option<CycleSnapshot>> {
    if !dir.exists() {
        info!(dir = %dir.display(), "No snapshot directory, starting fresh");
        return Ok(None);
    }

    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to list snapshot dir {}", dir.display()))?;

    // File names embed YYYYMMDD, so the lexicographic maximum is the newest.
    let latest = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .max();

    let Some(path) = latest else {
        info!(dir = %dir.display(), "No saved snapshot found, starting fresh");
        return Ok(None);
    };

    let json = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read snapshot from {}", path.display()))?;
    let snapshot: CycleSnapshot = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse snapshot from {}", path.display()))?;

    info!(
        path = %path.display(),
        cycle_count = snapshot.cycle_count,
        total_cycles = snapshot.stats.total_cycles,
        trades = snapshot.stats.trades_executed,
        "Snapshot loaded from disk"
    );
    Ok(Some(snapshot))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
