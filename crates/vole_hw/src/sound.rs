//! Auditory cue synthesis: the go tone and the white-noise error cue.
//!
//! Cues are stereo: left carries the audio, right carries a TTL level held
//! high for the cue duration so the recording system can align sound onsets.
//! Buffers are written into the session raw folder as WAV for
//! reproducibility; with the `playback` feature they also play through the
//! host sound card.

use anyhow::{Context, Result};
use rand::Rng;
use std::path::Path;

/// Host sound card rate.
pub const SOFT_SAMPLE_RATE: u32 = 44_100;
/// Harp sound card rate.
pub const HARD_SAMPLE_RATE: u32 = 96_000;

const FADE_SECS: f64 = 0.01;

/// Host-side sound commands a state machine can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftCode {
    StopSound,
    GoTone,
    WhiteNoise,
}

impl SoftCode {
    pub const fn code(self) -> u8 {
        match self {
            SoftCode::StopSound => 0,
            SoftCode::GoTone => 1,
            SoftCode::WhiteNoise => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SoftCode::StopSound),
            1 => Some(SoftCode::GoTone),
            2 => Some(SoftCode::WhiteNoise),
            _ => None,
        }
    }
}

/// A rendered stereo cue: `frames[i] = [audio, ttl]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CueBuffer {
    pub rate: u32,
    pub frames: Vec<[f32; 2]>,
}

impl CueBuffer {
    pub fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 / self.rate as f64
    }

    pub fn interleaved(&self) -> Vec<f32> {
        self.frames.iter().flat_map(|f| f.iter().copied()).collect()
    }

    /// 16-bit stereo WAV.
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: self.rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        for frame in &self.frames {
            for sample in frame {
                let v = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                writer.write_sample(v)?;
            }
        }
        writer.finalize().context("Failed to finalize WAV")?;
        Ok(())
    }
}

fn fade_gain(i: usize, total: usize, fade_samples: usize) -> f32 {
    if fade_samples == 0 {
        return 1.0;
    }
    if i < fade_samples {
        return i as f32 / fade_samples as f32;
    }
    if i >= total.saturating_sub(fade_samples) {
        return (total - i) as f32 / fade_samples as f32;
    }
    1.0
}

/// Pure sine cue with linear fade ramps.
pub fn make_tone(rate: u32, freq_hz: f64, secs: f64, amplitude: f64) -> CueBuffer {
    let total = (rate as f64 * secs).round() as usize;
    let fade_samples = (rate as f64 * FADE_SECS).round() as usize;
    let frames = (0..total)
        .map(|i| {
            let t = i as f64 / rate as f64;
            let gain = fade_gain(i, total, fade_samples);
            let sample =
                (2.0 * std::f64::consts::PI * freq_hz * t).sin() as f32 * amplitude as f32 * gain;
            [sample, 1.0]
        })
        .collect();
    CueBuffer { rate, frames }
}

/// Uniform white noise cue with the same ramps.
pub fn make_noise(rate: u32, secs: f64, amplitude: f64) -> CueBuffer {
    let total = (rate as f64 * secs).round() as usize;
    let fade_samples = (rate as f64 * FADE_SECS).round() as usize;
    let mut rng = rand::thread_rng();
    let frames = (0..total)
        .map(|i| {
            let gain = fade_gain(i, total, fade_samples);
            let sample = rng.gen_range(-1.0f32..1.0) * amplitude as f32 * gain;
            [sample, 1.0]
        })
        .collect();
    CueBuffer { rate, frames }
}

#[cfg(feature = "playback")]
pub use playback::SoundPlayer;

#[cfg(feature = "playback")]
mod playback {
    use super::CueBuffer;
    use anyhow::{Context, Result};

    /// Soft-sound output through the host card.
    pub struct SoundPlayer {
        // The stream must outlive the sink.
        _stream: rodio::OutputStream,
        sink: rodio::Sink,
    }

    impl SoundPlayer {
        pub fn try_new() -> Result<Self> {
            let (stream, handle) =
                rodio::OutputStream::try_default().context("No audio output device")?;
            let sink = rodio::Sink::try_new(&handle).context("Failed to open audio sink")?;
            Ok(Self { _stream: stream, sink })
        }

        pub fn play(&self, cue: &CueBuffer) {
            self.sink.stop();
            let source = rodio::buffer::SamplesBuffer::new(2, cue.rate, cue.interleaved());
            self.sink.append(source);
        }

        pub fn stop(&self) {
            self.sink.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn tone_has_expected_length_and_ttl() {
        let cue = make_tone(SOFT_SAMPLE_RATE, 5000.0, 0.1, 0.1);
        assert_eq!(cue.frames.len(), 4410);
        assert!((cue.duration_secs() - 0.1).abs() < 1e-9);
        // TTL line held high throughout.
        assert!(cue.frames.iter().all(|f| f[1] == 1.0));
    }

    #[test]
    fn tone_fades_in_and_out() {
        let cue = make_tone(SOFT_SAMPLE_RATE, 5000.0, 0.1, 0.1);
        assert_eq!(cue.frames[0][0], 0.0);
        let mid = cue.frames.len() / 2;
        let peak = cue.frames[mid - 100..mid + 100]
            .iter()
            .map(|f| f[0].abs())
            .fold(0.0f32, f32::max);
        assert!(peak > 0.05, "mid-buffer should be near full amplitude, got {peak}");
    }

    #[test]
    fn noise_stays_within_amplitude() {
        let cue = make_noise(SOFT_SAMPLE_RATE, 0.5, 0.05);
        assert_eq!(cue.frames.len(), 22050);
        assert!(cue.frames.iter().all(|f| f[0].abs() <= 0.05));
        assert!(cue.frames.iter().any(|f| f[0].abs() > 0.0));
    }

    #[test]
    fn softcode_mapping_round_trips() {
        for sc in [SoftCode::StopSound, SoftCode::GoTone, SoftCode::WhiteNoise] {
            assert_eq!(SoftCode::from_code(sc.code()), Some(sc));
        }
        assert_eq!(SoftCode::from_code(9), None);
    }

    #[test]
    fn wav_written_to_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("go_tone.wav");
        let cue = make_tone(SOFT_SAMPLE_RATE, 5000.0, 0.05, 0.1);
        cue.write_wav(&path).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, SOFT_SAMPLE_RATE);
        assert_eq!(reader.len() as usize, cue.frames.len() * 2);
    }
}
