//! Session parameter derivation.
//!
//! A session's effective parameters come from the config plus the previous
//! session's final trial record: reward volume and stimulus gain adapt to
//! how the subject did last time. The whole derived set is serialized into
//! the session settings snapshot, so a data folder is self-describing.

use crate::store;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use vole_core::settings::{GainSettings, RewardSettings};
use vole_core::{RigConfig, SessionPaths, TrialRecord, UserSettings};
use vole_hw::encoder::RotaryEncoder;
use vole_hw::sound::{HARD_SAMPLE_RATE, SOFT_SAMPLE_RATE};

/// Trials the previous session must contain before the adaptive gain drops
/// to its minimum.
const ADAPTIVE_GAIN_TRIALS: u32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    pub session_id: Uuid,
    pub session_datetime: DateTime<Utc>,
    pub subject: String,
    pub protocol: String,
    pub experimenter: String,
    pub project: String,

    /// Effective reward volume after the adaptive rule, microliters.
    pub reward_amount_ul: f64,
    /// Valve calibration in force this session, seconds per microliter.
    pub reward_calibration: f64,
    /// Valve opening time delivering `reward_amount_ul`.
    pub reward_valve_time: f64,
    /// Effective stimulus gain after the adaptive rule.
    pub stim_gain: f64,

    /// Stimulus positions ++ quiescence thresholds, visual degrees.
    pub all_thresholds: Vec<f64>,
    pub encoder: RotaryEncoder,
    pub encoder_events: Vec<String>,
    pub sound_sample_rate: u32,

    /// Pregenerated-session bookkeeping, set only by protocols that use it.
    pub session_order: Option<Vec<usize>>,
    pub session_idx: Option<usize>,

    /// Final record of the previous session, if one was found.
    pub last_trial: Option<TrialRecord>,

    pub paths: SessionPaths,
    pub config: RigConfig,
}

impl SessionParams {
    /// Derive everything from config, user settings and the session paths.
    pub fn derive(config: &RigConfig, user: &UserSettings, paths: &SessionPaths) -> Result<Self> {
        let subject = user.single_subject()?.to_string();

        let last_trial = match &paths.previous_data_file {
            Some(file) => store::load_last_trial(file)
                .with_context(|| format!("Failed to load previous session {}", file.display()))?,
            None => None,
        };
        if let Some(last) = &last_trial {
            tracing::info!(
                trials = last.trial_num,
                non_rc_ntrials = last.non_rc_ntrials,
                reward = last.reward_amount,
                gain = last.stim_gain,
                "loaded previous session record"
            );
        }

        let reward_amount_ul = adaptive_reward(&config.task.reward, last_trial.as_ref());
        let stim_gain = adaptive_gain(&config.task.gain, last_trial.as_ref());
        let reward_calibration = config.task.reward.calibration_secs_per_ul;
        let reward_valve_time = reward_amount_ul * reward_calibration;

        let mut all_thresholds = config.task.stim_positions.clone();
        all_thresholds.extend(&config.task.quiescence_thresholds);
        let encoder = RotaryEncoder::new(&all_thresholds, stim_gain);
        let encoder_events = encoder.event_names();

        let sound_sample_rate = if config.task.soft_sound {
            SOFT_SAMPLE_RATE
        } else {
            HARD_SAMPLE_RATE
        };

        Ok(Self {
            session_id: Uuid::new_v4(),
            session_datetime: Utc::now(),
            subject,
            protocol: paths.protocol.clone(),
            experimenter: user.experimenter.clone(),
            project: user.project.clone(),
            reward_amount_ul,
            reward_calibration,
            reward_valve_time,
            stim_gain,
            all_thresholds,
            encoder,
            encoder_events,
            sound_sample_rate,
            session_order: None,
            session_idx: None,
            last_trial,
            paths: paths.clone(),
            config: config.clone(),
        })
    }
}

/// Reward volume for this session. With adaptation on, the subject restarts
/// at whatever volume the previous session ended on (valve time divided by
/// the calibration it was recorded under).
fn adaptive_reward(reward: &RewardSettings, last: Option<&TrialRecord>) -> f64 {
    if !reward.adaptive {
        return reward.amount_ul;
    }
    match last {
        None => reward.adaptive_init_ul,
        Some(trial) => {
            let calibration = if trial.reward_calibration > 0.0 {
                trial.reward_calibration
            } else {
                // Older data files carry no calibration; fall back to ours.
                reward.calibration_secs_per_ul
            };
            trial.reward_valve_time / calibration
        }
    }
}

/// Stimulus gain for this session: starts high to make the wheel easy, drops
/// to the minimum once the subject has produced a full session.
fn adaptive_gain(gain: &GainSettings, last: Option<&TrialRecord>) -> f64 {
    if !gain.adaptive {
        return gain.value;
    }
    match last {
        Some(trial) if trial.trial_num >= ADAPTIVE_GAIN_TRIALS => gain.adaptive_min,
        _ => gain.adaptive_init,
    }
}
