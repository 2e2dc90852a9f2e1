//! Standard serial messages preloaded on the controller.
//!
//! The rotary-encoder module doubles as the forwarding path to the visual
//! stimulus machine, so the stimulus commands ride its port. The harp sound
//! card takes framed play commands with a trailing modulo-256 checksum.

use crate::controller::Controller;
use anyhow::Result;

/// Module port of the rotary encoder (and stimulus forwarding).
pub const ENCODER_PORT: u8 = 1;
/// Module port of the harp sound card.
pub const SOUND_PORT: u8 = 3;

/// Sound-card sample slots for the session cues.
pub const GO_TONE_IDX: u8 = 2;
pub const WHITE_NOISE_IDX: u8 = 3;

/// Zero the encoder position and enable all configured thresholds.
pub fn encoder_reset() -> Vec<u8> {
    vec![b'Z', b'E']
}

pub fn stim_stop() -> Vec<u8> {
    vec![b'#', 1]
}

pub fn stim_show() -> Vec<u8> {
    vec![b'#', 2]
}

pub fn stim_center() -> Vec<u8> {
    vec![b'#', 3]
}

/// Framed play command for the sound card: `[2, 6, 32, 255, 2, idx, 0, ck]`
/// with `ck` the sum of the preceding bytes mod 256.
pub fn sound_card_play(index: u8) -> Vec<u8> {
    let mut frame = vec![2, 6, 32, 255, 2, index, 0];
    let ck = frame.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    frame.push(ck);
    frame
}

/// Message indices as loaded on the controller, referenced by state machine
/// `Serial` outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageSet {
    pub encoder_reset: u8,
    pub stim_stop: u8,
    pub stim_show: u8,
    pub stim_center: u8,
    pub play_tone: u8,
    pub play_noise: u8,
}

impl MessageSet {
    /// Load the standard message set onto a controller.
    pub async fn load(controller: &mut dyn Controller) -> Result<Self> {
        let set = Self {
            encoder_reset: 1,
            stim_stop: 2,
            stim_show: 3,
            stim_center: 4,
            play_tone: 5,
            play_noise: 6,
        };
        controller
            .load_serial_message(ENCODER_PORT, set.encoder_reset, encoder_reset())
            .await?;
        controller
            .load_serial_message(ENCODER_PORT, set.stim_stop, stim_stop())
            .await?;
        controller
            .load_serial_message(ENCODER_PORT, set.stim_show, stim_show())
            .await?;
        controller
            .load_serial_message(ENCODER_PORT, set.stim_center, stim_center())
            .await?;
        controller
            .load_serial_message(SOUND_PORT, set.play_tone, sound_card_play(GO_TONE_IDX))
            .await?;
        controller
            .load_serial_message(SOUND_PORT, set.play_noise, sound_card_play(WHITE_NOISE_IDX))
            .await?;
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimController;

    #[test]
    fn sound_card_checksums_match_the_card() {
        // Known-good frames for the tone and noise slots.
        assert_eq!(sound_card_play(2), vec![2, 6, 32, 255, 2, 2, 0, 43]);
        assert_eq!(sound_card_play(3), vec![2, 6, 32, 255, 2, 3, 0, 44]);
    }

    #[test]
    fn stimulus_commands() {
        assert_eq!(encoder_reset(), vec![b'Z', b'E']);
        assert_eq!(stim_stop(), vec![b'#', 1]);
        assert_eq!(stim_show(), vec![b'#', 2]);
        assert_eq!(stim_center(), vec![b'#', 3]);
    }

    #[tokio::test]
    async fn load_registers_every_message() {
        let mut sim = SimController::new();
        let set = MessageSet::load(&mut sim).await.unwrap();
        assert_eq!(
            sim.serial_message(ENCODER_PORT, set.encoder_reset),
            Some(&[b'Z', b'E'][..])
        );
        assert_eq!(sim.serial_message(ENCODER_PORT, set.stim_center), Some(&[b'#', 3][..]));
        assert_eq!(
            sim.serial_message(SOUND_PORT, set.play_noise),
            Some(&[2, 6, 32, 255, 2, 3, 0, 44][..])
        );
    }
}
