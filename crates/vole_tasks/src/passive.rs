//! Passive replay protocol: no behavior, just a pregenerated schedule of
//! valve clicks, sound cues and gabor patches played back at the recorded
//! delays while neural data is collected.

use anyhow::{ensure, Result};
use std::path::PathBuf;
use std::time::Duration;
use vole_core::sm::{OutputAction, State, StateMachine, Target};
use vole_hw::display::{StimInfo, StimulusDisplay};
use vole_hw::messages::SOUND_PORT;
use vole_hw::{Controller, MessageSet};
use vole_session::store;
use vole_session::{GaborParams, PassiveSchedule, SessionParams, StimKind};

/// Reward valve line (same line the active protocols drive).
const REWARD_VALVE: u8 = 1;
/// Gabor patches stay up this long.
const GABOR_SHOW_SECS: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct PassiveOptions {
    /// Multiplier on every schedule delay; 1.0 on the rig, 0.0 in tests.
    pub time_scale: f64,
    /// Mock sessions get relabeled in their settings after the run.
    pub is_mock: bool,
    /// Settings file of the ephys session this passive run belongs to, if
    /// the mock relabeling should reach it too.
    pub corresponding_ephys_settings: Option<PathBuf>,
}

impl Default for PassiveOptions {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            is_mock: false,
            corresponding_ephys_settings: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassiveOutcome {
    pub replayed: usize,
    pub valves: usize,
    pub tones: usize,
    pub noises: usize,
    pub gabors: usize,
}

/// One-state machine clicking the reward valve, with a sync pulse to the
/// recording system.
fn valve_click(valve_time: f64) -> StateMachine {
    let mut sma = StateMachine::new();
    sma.add_state(
        State::named("valve_open")
            .timer_secs(valve_time)
            .on_timeout_exit()
            .output(OutputAction::Valve {
                channel: REWARD_VALVE,
                value: 255,
            })
            .output(OutputAction::Bnc {
                channel: 1,
                value: 255,
            }),
    );
    sma
}

/// One-state machine handing a play command to the sound card; the card
/// drops BNC2 when playback ends.
fn sound_click(name: &str, message: u8) -> StateMachine {
    let mut sma = StateMachine::new();
    sma.add_state(
        State::named(name)
            .timer_secs(0.0)
            .on_event("BNC2Low", Target::Exit)
            .output(OutputAction::Serial {
                port: SOUND_PORT,
                message,
            }),
    );
    sma
}

async fn sleep_scaled(secs: f64, scale: f64) {
    let scaled = secs * scale;
    if scaled > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(scaled)).await;
    }
}

pub async fn run_passive(
    controller: &mut dyn Controller,
    display: &dyn StimulusDisplay,
    schedule: &PassiveSchedule,
    pcs: &[GaborParams],
    params: &SessionParams,
    opts: &PassiveOptions,
) -> Result<PassiveOutcome> {
    schedule.validate()?;
    ensure!(
        pcs.len() >= schedule.gabor_count(),
        "schedule wants {} gabors but only {} parameter sets were loaded",
        schedule.gabor_count(),
        pcs.len()
    );

    let messages = MessageSet::load(controller).await?;
    let mut outcome = PassiveOutcome::default();
    let mut pcs_idx = 0;

    for (delay, id) in schedule.delays.iter().zip(&schedule.ids) {
        sleep_scaled(*delay, opts.time_scale).await;
        outcome.replayed += 1;
        tracing::info!(
            count = outcome.replayed,
            total = schedule.len(),
            delay,
            kind = ?id,
            "replaying stimulus"
        );
        match id {
            StimKind::Valve => {
                controller
                    .send_state_machine(&valve_click(params.reward_valve_time))
                    .await?;
                controller.run_state_machine().await?;
                outcome.valves += 1;
            }
            StimKind::Tone => {
                controller
                    .send_state_machine(&sound_click("play_tone", messages.play_tone))
                    .await?;
                controller.run_state_machine().await?;
                outcome.tones += 1;
            }
            StimKind::Noise => {
                controller
                    .send_state_machine(&sound_click("play_noise", messages.play_noise))
                    .await?;
                controller.run_state_machine().await?;
                outcome.noises += 1;
            }
            StimKind::Gabor => {
                let p = &pcs[pcs_idx];
                display
                    .send_stim_info(&StimInfo::new(pcs_idx, p.position, p.contrast, p.phase))
                    .await?;
                display.show().await?;
                sleep_scaled(GABOR_SHOW_SECS, opts.time_scale).await;
                display.stop().await?;
                pcs_idx += 1;
                outcome.gabors += 1;
            }
        }
    }

    if opts.is_mock {
        let patch = serde_json::json!({ "protocol": format!("{}_mock", params.protocol) });
        store::patch_settings(&params.paths.settings_file, &patch)?;
        if let Some(ephys_settings) = &opts.corresponding_ephys_settings {
            let patch = serde_json::json!({ "protocol": "ephys_mock" });
            store::patch_settings(ephys_settings, &patch)?;
        }
    }

    // Downstream pipelines watch for these.
    store::create_flag(&params.paths.session_folder, "passive_data_for_ephys")?;
    store::create_flag(&params.paths.session_folder, "poop_count")?;

    Ok(outcome)
}
