//! Ambient sensor readings, appended to the session's JSONL log when the
//! task has ambient recording enabled.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmbientReading {
    pub temperature_c: f64,
    pub rel_humidity_pct: f64,
    pub air_pressure_hpa: f64,
    pub timestamp: DateTime<Utc>,
}

/// Append one reading as a JSON line.
pub fn append_reading(path: &Path, reading: &AmbientReading) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let line = serde_json::to_string(reading)?;
    writeln!(file, "{line}")?;
    Ok(())
}

pub fn load_readings(path: &Path) -> Result<Vec<AmbientReading>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).context("Malformed ambient record"))
        .collect()
}
