use crate::error::CoreError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================================================
// Top-level rig config
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Root of the session data tree (`<root>/<subject>/<date>/<number>`).
    pub data_root: PathBuf,
    /// Where the protocol code lives; archived into each session.
    pub protocol_root: PathBuf,
    /// Pregenerated session schedules for the passive protocol.
    pub pregen_root: PathBuf,
    pub task: TaskSettings,
    pub display: DisplayConfig,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("vole_data"),
            protocol_root: PathBuf::from("tasks"),
            pregen_root: PathBuf::from("pregen"),
            task: TaskSettings::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl RigConfig {
    /// Load config from a TOML file, falling back to defaults for missing
    /// fields. After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: RigConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if the file doesn't exist, return defaults with
    /// env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VOLE_DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VOLE_PROTOCOL_ROOT") {
            self.protocol_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VOLE_PREGEN_ROOT") {
            self.pregen_root = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("VOLE_DISPLAY_HOST") {
            self.display.host = v;
        }
        if let Ok(v) = std::env::var("VOLE_DISPLAY_PORT") {
            if let Ok(n) = v.parse() {
                self.display.port = n;
            }
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

/// Per-protocol tunables. Every field has a working default so a bare rig
/// can run without a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub ntrials: u32,
    pub iti_secs: f64,
    /// Mean/sd of the normal draw for the stimulus-to-center delay.
    pub delay_to_stim_center_mean: f64,
    pub delay_to_stim_center_sd: f64,
    /// Stimulus onset positions, visual degrees from center.
    pub stim_positions: Vec<f64>,
    /// Quiescence window thresholds, visual degrees.
    pub quiescence_thresholds: Vec<f64>,
    /// Soft sound plays through the host sound card; otherwise the harp
    /// sound card driven over serial.
    pub soft_sound: bool,
    pub record_ambient: bool,
    pub record_sound: bool,
    pub use_visual_stimulus: bool,
    pub reward: RewardSettings,
    pub gain: GainSettings,
    pub sound: SoundSettings,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            ntrials: 100,
            iti_secs: 1.0,
            delay_to_stim_center_mean: 6.0,
            delay_to_stim_center_sd: 2.0,
            stim_positions: vec![-35.0, 35.0],
            quiescence_thresholds: vec![-2.0, 2.0],
            soft_sound: true,
            record_ambient: true,
            record_sound: false,
            use_visual_stimulus: true,
            reward: RewardSettings::default(),
            gain: GainSettings::default(),
            sound: SoundSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardSettings {
    /// Reward volume per trial, microliters.
    pub amount_ul: f64,
    /// Valve calibration: seconds of opening per microliter.
    pub calibration_secs_per_ul: f64,
    pub adaptive: bool,
    pub adaptive_init_ul: f64,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            amount_ul: 3.0,
            calibration_secs_per_ul: 0.05,
            adaptive: true,
            adaptive_init_ul: 3.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GainSettings {
    /// Wheel-to-stimulus gain, visual degrees per mm of wheel movement.
    pub value: f64,
    pub adaptive: bool,
    pub adaptive_init: f64,
    pub adaptive_min: f64,
}

impl Default for GainSettings {
    fn default() -> Self {
        Self {
            value: 4.0,
            adaptive: true,
            adaptive_init: 8.0,
            adaptive_min: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundSettings {
    pub go_tone_freq_hz: f64,
    pub go_tone_secs: f64,
    pub go_tone_amplitude: f64,
    pub white_noise_secs: f64,
    pub white_noise_amplitude: f64,
}

impl Default for SoundSettings {
    fn default() -> Self {
        Self {
            go_tone_freq_hz: 5000.0,
            go_tone_secs: 0.1,
            go_tone_amplitude: 0.1,
            white_noise_secs: 0.5,
            white_noise_amplitude: 0.05,
        }
    }
}

/// Where the visual-stimulus workflow engine listens. The engine itself is
/// an external vendor dependency; this is only its address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7110,
        }
    }
}

// ============================================================================
// User settings
// ============================================================================

/// Who is running what on whom. On the original rig this arrives from the
/// launcher GUI; here it comes from the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub subjects: Vec<String>,
    pub experimenter: String,
    pub project: String,
}

impl UserSettings {
    /// A session runs exactly one subject; anything else is a launcher bug.
    pub fn single_subject(&self) -> Result<&str, CoreError> {
        match self.subjects.as_slice() {
            [one] => Ok(one),
            other => Err(CoreError::SubjectCount(other.len())),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = RigConfig::default();
        assert_eq!(cfg.task.ntrials, 100);
        assert_eq!(cfg.task.reward.amount_ul, 3.0);
        assert!(cfg.task.reward.adaptive);
        assert_eq!(cfg.task.gain.adaptive_init, 8.0);
        assert_eq!(cfg.task.stim_positions, vec![-35.0, 35.0]);
        assert_eq!(cfg.display.port, 7110);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
data_root = "/data/vole"

[task]
ntrials = 40
"#;
        let cfg: RigConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.data_root, PathBuf::from("/data/vole"));
        assert_eq!(cfg.task.ntrials, 40);
        // Defaults for unspecified fields
        assert_eq!(cfg.task.iti_secs, 1.0);
        assert!(cfg.task.soft_sound);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
data_root = "/data/vole"
protocol_root = "/opt/vole/tasks"
pregen_root = "/opt/vole/pregen"

[task]
ntrials = 200
iti_secs = 0.5
stim_positions = [-90.0, 90.0]
quiescence_thresholds = [-1.0, 1.0]
soft_sound = false
record_ambient = false

[task.reward]
amount_ul = 1.5
calibration_secs_per_ul = 0.04
adaptive = false

[task.gain]
value = 6.0
adaptive_min = 2.0

[task.sound]
go_tone_freq_hz = 10000.0

[display]
host = "10.0.0.5"
port = 9000
"#;
        let cfg: RigConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.task.ntrials, 200);
        assert_eq!(cfg.task.stim_positions, vec![-90.0, 90.0]);
        assert!(!cfg.task.soft_sound);
        assert!(!cfg.task.reward.adaptive);
        assert_eq!(cfg.task.reward.amount_ul, 1.5);
        assert_eq!(cfg.task.gain.adaptive_min, 2.0);
        assert_eq!(cfg.task.sound.go_tone_freq_hz, 10000.0);
        assert_eq!(cfg.display.host, "10.0.0.5");
        assert_eq!(cfg.display.port, 9000);
    }

    #[test]
    fn test_env_overrides_and_defaults() {
        std::env::set_var("VOLE_DATA_ROOT", "/mnt/rig");
        std::env::set_var("VOLE_DISPLAY_PORT", "7200");

        let mut cfg = RigConfig::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.data_root, PathBuf::from("/mnt/rig"));
        assert_eq!(cfg.display.port, 7200);

        std::env::remove_var("VOLE_DATA_ROOT");
        std::env::remove_var("VOLE_DISPLAY_PORT");

        // Nonexistent path returns defaults (no env interference)
        let cfg = RigConfig::load_or_default("/nonexistent/vole.toml");
        assert_eq!(cfg.task.ntrials, 100);
    }

    #[test]
    fn test_single_subject() {
        let user = UserSettings {
            subjects: vec!["M042".to_string()],
            ..Default::default()
        };
        assert_eq!(user.single_subject().unwrap(), "M042");

        let none = UserSettings::default();
        assert!(matches!(none.single_subject(), Err(CoreError::SubjectCount(0))));

        let two = UserSettings {
            subjects: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        assert!(matches!(two.single_subject(), Err(CoreError::SubjectCount(2))));
    }

    #[test]
    fn test_config_round_trip() {
        let cfg = RigConfig::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: RigConfig = toml::from_str(&text).unwrap();
        assert_eq!(cfg, back);
    }
}
