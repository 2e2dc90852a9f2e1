//! Per-trial data: the event log a controller hands back, and the record
//! persisted for every completed trial.

use crate::sm::OutputAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What happened while a state machine ran: event timestamps keyed by the
/// controller's event names, the states visited with entry/exit times, and
/// the output actions emitted along the way. All times are seconds since the
/// machine started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialEvents {
    pub events: BTreeMap<String, Vec<f64>>,
    pub visited: Vec<StateVisit>,
    pub outputs: Vec<(String, OutputAction)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVisit {
    pub state: String,
    pub entered: f64,
    pub exited: f64,
}

impl TrialEvents {
    pub fn record_event(&mut self, name: impl Into<String>, timestamp: f64) {
        self.events.entry(name.into()).or_default().push(timestamp);
    }

    /// All timestamps of events whose name contains `port` — used for the
    /// per-trial sync checks (`BNC1` visual, `BNC2` audio, `Port1` camera).
    pub fn port_events(&self, port: &str) -> Vec<f64> {
        let mut out: Vec<f64> = self
            .events
            .iter()
            .filter(|(name, _)| name.contains(port))
            .flat_map(|(_, ts)| ts.iter().copied())
            .collect();
        out.sort_by(|a, b| a.total_cmp(b));
        out
    }

    pub fn visited_state(&self, name: &str) -> bool {
        self.visited.iter().any(|v| v.state == name)
    }

    /// Total machine run time, i.e. the exit time of the last visited state.
    pub fn duration(&self) -> f64 {
        self.visited.last().map(|v| v.exited).unwrap_or(0.0)
    }
}

/// One line of the session data file. The previous session's final record
/// feeds the adaptive reward/gain rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub trial_num: u32,
    /// Trials excluding repeat-on-error catch trials. Habituation has no
    /// repeats, so here it tracks `trial_num`.
    pub non_rc_ntrials: u32,
    pub init_datetime: DateTime<Utc>,
    pub delay_to_stim_center: f64,
    pub reward_amount: f64,
    pub reward_valve_time: f64,
    /// Valve calibration (seconds of opening per microliter) in force when
    /// the record was written. Older data files may lack it.
    #[serde(default)]
    pub reward_calibration: f64,
    /// Cumulative water delivered this session, microliters.
    pub water_delivered: f64,
    pub stim_gain: f64,
    pub iti: f64,
}
