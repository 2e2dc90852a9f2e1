//! Pregenerated passive-session schedules, stored as JSON next to the rig
//! install: one file with the stimulus delays and kinds, one with the gabor
//! parameter triplets consumed by the `G` entries.

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StimKind {
    #[serde(rename = "V")]
    Valve,
    #[serde(rename = "T")]
    Tone,
    #[serde(rename = "N")]
    Noise,
    #[serde(rename = "G")]
    Gabor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassiveSchedule {
    /// Seconds to wait before each stimulus.
    pub delays: Vec<f64>,
    pub ids: Vec<StimKind>,
}

impl PassiveSchedule {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn gabor_count(&self) -> usize {
        self.ids.iter().filter(|id| **id == StimKind::Gabor).count()
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.delays.len() == self.ids.len(),
            "schedule has {} delays for {} stimuli",
            self.delays.len(),
            self.ids.len()
        );
        ensure!(
            self.delays.iter().all(|d| d.is_finite() && *d >= 0.0),
            "schedule contains a negative or non-finite delay"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaborParams {
    pub position: f64,
    pub contrast: f64,
    pub phase: f64,
}

pub fn load_passive_schedule(pregen_root: &Path, session_num: usize) -> Result<PassiveSchedule> {
    let path = pregen_root.join(format!("session_{session_num}_passive_schedule.json"));
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read schedule {}", path.display()))?;
    let schedule: PassiveSchedule =
        serde_json::from_str(&content).context("Malformed passive schedule")?;
    schedule.validate()?;
    Ok(schedule)
}

pub fn load_passive_pcs(pregen_root: &Path, session_num: usize) -> Result<Vec<GaborParams>> {
    let path = pregen_root.join(format!("session_{session_num}_passive_pcs.json"));
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read gabor parameters {}", path.display()))?;
    serde_json::from_str(&content).context("Malformed gabor parameters")
}
