//! Per-trial parameter handling: draws the next trial's timing, and turns a
//! finished run's event log into the persisted trial record.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand_distr::{Distribution, Normal};
use vole_core::{TrialEvents, TrialRecord};
use vole_session::SessionParams;

#[derive(Debug, Clone)]
pub struct ActiveTrial {
    pub trial_num: u32,
    pub init_datetime: DateTime<Utc>,
    pub delay_to_stim_center: f64,
}

pub struct TrialParams {
    trial_num: u32,
    water_delivered: f64,
    delay_dist: Normal<f64>,
    iti: f64,
    reward_amount: f64,
    reward_valve_time: f64,
    reward_calibration: f64,
    stim_gain: f64,
    current: Option<ActiveTrial>,
}

impl TrialParams {
    pub fn new(params: &SessionParams) -> Result<Self> {
        let task = &params.config.task;
        let delay_dist = Normal::new(
            task.delay_to_stim_center_mean,
            task.delay_to_stim_center_sd,
        )
        .context("Invalid stimulus delay distribution")?;
        Ok(Self {
            trial_num: 0,
            water_delivered: 0.0,
            delay_dist,
            iti: task.iti_secs,
            reward_amount: params.reward_amount_ul,
            reward_valve_time: params.reward_valve_time,
            reward_calibration: params.reward_calibration,
            stim_gain: params.stim_gain,
            current: None,
        })
    }

    /// Start the next trial: bump the counter, stamp the time, draw the
    /// stimulus delay (clamped non-negative).
    pub fn next_trial(&mut self) -> ActiveTrial {
        self.trial_num += 1;
        let delay = self
            .delay_dist
            .sample(&mut rand::thread_rng())
            .max(0.0);
        let trial = ActiveTrial {
            trial_num: self.trial_num,
            init_datetime: Utc::now(),
            delay_to_stim_center: delay,
        };
        self.current = Some(trial.clone());
        trial
    }

    /// Close out the running trial. Water counts as delivered only if the
    /// machine actually visited the reward state.
    pub fn trial_completed(&mut self, events: &TrialEvents) -> Result<TrialRecord> {
        let trial = self
            .current
            .take()
            .context("trial_completed called with no trial running")?;
        if events.visited_state("reward") {
            self.water_delivered += self.reward_amount;
        }
        Ok(TrialRecord {
            trial_num: trial.trial_num,
            non_rc_ntrials: trial.trial_num,
            init_datetime: trial.init_datetime,
            delay_to_stim_center: trial.delay_to_stim_center,
            reward_amount: self.reward_amount,
            reward_valve_time: self.reward_valve_time,
            reward_calibration: self.reward_calibration,
            water_delivered: self.water_delivered,
            stim_gain: self.stim_gain,
            iti: self.iti,
        })
    }

    pub fn trial_num(&self) -> u32 {
        self.trial_num
    }

    pub fn water_delivered(&self) -> f64 {
        self.water_delivered
    }

    pub fn iti(&self) -> f64 {
        self.iti
    }

    pub fn reward_valve_time(&self) -> f64 {
        self.reward_valve_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::trial::StateVisit;
    use vole_core::{RigConfig, SessionPaths, UserSettings};

    fn params(dir: &std::path::Path) -> SessionParams {
        let mut config = RigConfig::default();
        config.data_root = dir.to_path_buf();
        let user = UserSettings {
            subjects: vec!["M001".to_string()],
            ..Default::default()
        };
        let paths = SessionPaths::create(&config.data_root, "M001", "habituation").unwrap();
        SessionParams::derive(&config, &user, &paths).unwrap()
    }

    fn rewarded_events() -> TrialEvents {
        let mut ev = TrialEvents::default();
        ev.visited.push(StateVisit {
            state: "reward".to_string(),
            entered: 0.0,
            exited: 0.15,
        });
        ev
    }

    #[test]
    fn delays_are_non_negative() {
        let dir = tempfile::tempdir().unwrap();
        let mut tp = TrialParams::new(&params(dir.path())).unwrap();
        for _ in 0..200 {
            assert!(tp.next_trial().delay_to_stim_center >= 0.0);
            tp.trial_completed(&rewarded_events()).unwrap();
        }
        assert_eq!(tp.trial_num(), 200);
    }

    #[test]
    fn water_accumulates_only_on_reward() {
        let dir = tempfile::tempdir().unwrap();
        let p = params(dir.path());
        let mut tp = TrialParams::new(&p).unwrap();

        tp.next_trial();
        let rec = tp.trial_completed(&rewarded_events()).unwrap();
        assert_eq!(rec.water_delivered, p.reward_amount_ul);

        tp.next_trial();
        let rec = tp.trial_completed(&TrialEvents::default()).unwrap();
        // No reward state visited: total unchanged.
        assert_eq!(rec.water_delivered, p.reward_amount_ul);
        assert_eq!(rec.trial_num, 2);
    }

    #[test]
    fn completing_without_a_trial_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut tp = TrialParams::new(&params(dir.path())).unwrap();
        assert!(tp.trial_completed(&TrialEvents::default()).is_err());
    }
}
