//! Habituation protocol: the subject sits with the rig while stimuli appear,
//! move to center, and water arrives regardless of behavior. One fixed
//! 5-state machine per trial.

use crate::trialp::{ActiveTrial, TrialParams};
use anyhow::Result;
use chrono::Utc;
use vole_core::sm::{OutputAction, State, StateMachine};
use vole_core::TrialEvents;
use vole_hw::messages::{ENCODER_PORT, SOUND_PORT};
use vole_hw::sound::SoftCode;
use vole_hw::{Controller, MessageSet};
use vole_session::{SessionParams, SessionStore};

/// Valve line driving the water spout.
const REWARD_VALVE: u8 = 1;
/// Stimulus holds at center this long before the reward.
const STIM_CENTER_SECS: f64 = 0.5;
/// Stimulus is kept off at the start of every trial.
const TRIAL_START_SECS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HabituationOutcome {
    pub ntrials: u32,
    pub water_delivered: f64,
}

pub struct HabituationTask {
    messages: MessageSet,
    trialp: TrialParams,
    ntrials: u32,
}

impl HabituationTask {
    /// Load the serial message set and set up per-trial parameter draws.
    pub async fn prepare(controller: &mut dyn Controller, params: &SessionParams) -> Result<Self> {
        let messages = MessageSet::load(controller).await?;
        Ok(Self {
            messages,
            trialp: TrialParams::new(params)?,
            ntrials: params.config.task.ntrials,
        })
    }

    /// The per-trial machine:
    /// `trial_start → stim_on → stim_center → reward → iti → exit`.
    pub fn trial_machine(&self, trial: &ActiveTrial, params: &SessionParams) -> StateMachine {
        let m = &self.messages;
        // Soft sound is cued through the host softcode handler; hard sound
        // goes straight to the sound card.
        let tone_output = if params.config.task.soft_sound {
            OutputAction::SoftCode(SoftCode::GoTone.code())
        } else {
            OutputAction::Serial {
                port: SOUND_PORT,
                message: m.play_tone,
            }
        };

        let mut sma = StateMachine::new();
        sma.add_state(
            State::named("trial_start")
                .timer_secs(TRIAL_START_SECS)
                .on_timeout("stim_on")
                .output(OutputAction::Serial {
                    port: ENCODER_PORT,
                    message: m.stim_stop,
                }),
        );
        sma.add_state(
            State::named("stim_on")
                .timer_secs(trial.delay_to_stim_center)
                .on_timeout("stim_center")
                .output(OutputAction::Serial {
                    port: ENCODER_PORT,
                    message: m.stim_show,
                })
                .output(tone_output),
        );
        sma.add_state(
            State::named("stim_center")
                .timer_secs(STIM_CENTER_SECS)
                .on_timeout("reward")
                .output(OutputAction::Serial {
                    port: ENCODER_PORT,
                    message: m.stim_center,
                }),
        );
        sma.add_state(
            State::named("reward")
                .timer_secs(self.trialp.reward_valve_time())
                .on_timeout("iti")
                .output(OutputAction::Valve {
                    channel: REWARD_VALVE,
                    value: 255,
                }),
        );
        sma.add_state(
            State::named("iti")
                .timer_secs(self.trialp.iti())
                .on_timeout_exit(),
        );
        sma
    }

    /// Run the whole session: one machine per trial, a record per machine.
    pub async fn run(
        &mut self,
        controller: &mut dyn Controller,
        params: &SessionParams,
        store: &SessionStore,
    ) -> Result<HabituationOutcome> {
        let session_start = Utc::now();
        for _ in 0..self.ntrials {
            let trial = self.trialp.next_trial();
            tracing::info!(trial = trial.trial_num, "starting trial");

            let sma = self.trial_machine(&trial, params);
            controller.send_state_machine(&sma).await?;
            let events = controller.run_state_machine().await?;

            let record = self.trialp.trial_completed(&events)?;
            store.append_trial(&record)?;

            check_sync_pulses(&events);

            let mut ambient_msg = "not saved - deactivated in task settings";
            if params.config.task.record_ambient {
                let reading = controller.read_ambient().await?;
                vole_hw::ambient::append_reading(&params.paths.ambient_file, &reading)?;
                ambient_msg = "saved";
            }

            let elapsed = Utc::now() - session_start;
            tracing::info!(
                trial = record.trial_num,
                delay_to_stim_center = record.delay_to_stim_center,
                water_delivered = record.water_delivered,
                elapsed_secs = elapsed.num_seconds(),
                ambient = ambient_msg,
                "trial completed"
            );
        }
        Ok(HabituationOutcome {
            ntrials: self.ntrials,
            water_delivered: self.trialp.water_delivered(),
        })
    }
}

/// The recording system should be echoing sync pulses back; silence on a
/// line means its cable or its device is down.
fn check_sync_pulses(events: &TrialEvents) {
    for (port, what) in [
        ("BNC1", "visual stimulus"),
        ("BNC2", "sound"),
        ("Port1", "camera"),
    ] {
        if events.port_events(port).is_empty() {
            tracing::warn!("could not find {what} sync data on {port}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_core::{RigConfig, SessionPaths, UserSettings};
    use vole_hw::SimController;

    async fn task_fixture(
        soft_sound: bool,
    ) -> (tempfile::TempDir, SessionParams, HabituationTask, SimController) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = RigConfig::default();
        config.data_root = dir.path().to_path_buf();
        config.task.soft_sound = soft_sound;
        let user = UserSettings {
            subjects: vec!["M001".to_string()],
            ..Default::default()
        };
        let paths = SessionPaths::create(&config.data_root, "M001", "habituation").unwrap();
        let params = SessionParams::derive(&config, &user, &paths).unwrap();
        let mut sim = SimController::new();
        let task = HabituationTask::prepare(&mut sim, &params).await.unwrap();
        (dir, params, task, sim)
    }

    #[tokio::test]
    async fn trial_machine_has_the_five_states_in_order() {
        let (_dir, params, mut task, _sim) = task_fixture(true).await;
        let trial = task.trialp.next_trial();
        let sma = task.trial_machine(&trial, &params);
        sma.validate().unwrap();

        let names: Vec<&str> = sma.states.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            ["trial_start", "stim_on", "stim_center", "reward", "iti"]
        );
        assert_eq!(sma.state("trial_start").unwrap().timer, 1.0);
        assert_eq!(sma.state("stim_center").unwrap().timer, 0.5);
        assert_eq!(
            sma.state("stim_on").unwrap().timer,
            trial.delay_to_stim_center
        );
    }

    #[tokio::test]
    async fn soft_sound_cues_via_softcode() {
        let (_dir, params, mut task, _sim) = task_fixture(true).await;
        let trial = task.trialp.next_trial();
        let sma = task.trial_machine(&trial, &params);
        assert!(sma
            .state("stim_on")
            .unwrap()
            .outputs
            .contains(&OutputAction::SoftCode(1)));
    }

    #[tokio::test]
    async fn hard_sound_cues_via_sound_card() {
        let (_dir, params, mut task, _sim) = task_fixture(false).await;
        let trial = task.trialp.next_trial();
        let sma = task.trial_machine(&trial, &params);
        let outputs = &sma.state("stim_on").unwrap().outputs;
        assert!(outputs
            .iter()
            .any(|o| matches!(o, OutputAction::Serial { port, .. } if *port == SOUND_PORT)));
    }

    #[tokio::test]
    async fn reward_state_opens_the_valve_for_the_valve_time() {
        let (_dir, params, mut task, _sim) = task_fixture(true).await;
        let trial = task.trialp.next_trial();
        let sma = task.trial_machine(&trial, &params);
        let reward = sma.state("reward").unwrap();
        assert_eq!(reward.timer, params.reward_valve_time);
        assert!(reward.outputs.contains(&OutputAction::Valve {
            channel: REWARD_VALVE,
            value: 255
        }));
    }
}
