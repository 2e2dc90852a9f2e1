//! Rotary encoder threshold scaling.
//!
//! Task thresholds are declared in visual degrees of stimulus movement; the
//! encoder module wants wheel degrees. The conversion runs through the wheel
//! geometry and the session's stimulus gain (visual degrees per mm of wheel
//! movement).

use serde::{Deserialize, Serialize};

pub const WHEEL_RADIUS_MM: f64 = 31.0;
/// The module's threshold register width: exactly 8 enable slots.
pub const ENABLE_SLOTS: usize = 8;

pub fn wheel_perimeter_mm() -> f64 {
    WHEEL_RADIUS_MM * 2.0 * std::f64::consts::PI
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotaryEncoder {
    pub gain: f64,
    /// Input thresholds, visual degrees.
    pub thresholds: Vec<f64>,
    /// Thresholds scaled to wheel degrees, as sent to the module.
    pub set_thresholds: Vec<f64>,
    /// One enable flag per threshold, padded to the register width.
    pub enable_thresholds: Vec<bool>,
}

impl RotaryEncoder {
    pub fn new(thresholds: &[f64], gain: f64) -> Self {
        let mm_per_deg = wheel_perimeter_mm() / 360.0;
        let factor = 1.0 / (mm_per_deg * gain);
        let set_thresholds: Vec<f64> = thresholds.iter().map(|t| t * factor).collect();
        let mut enable_thresholds: Vec<bool> =
            set_thresholds.iter().map(|t| *t != 0.0).collect();
        // The module wants all 8 slots even when fewer thresholds are set.
        while enable_thresholds.len() < ENABLE_SLOTS {
            enable_thresholds.push(false);
        }
        Self {
            gain,
            thresholds: thresholds.to_vec(),
            set_thresholds,
            enable_thresholds,
        }
    }

    /// Controller event names for each threshold crossing, 1-based in
    /// threshold order.
    pub fn event_names(&self) -> Vec<String> {
        (1..=self.thresholds.len())
            .map(|i| format!("RotaryEncoder1_{i}"))
            .collect()
    }

    /// Threshold (visual degrees) paired with the event its crossing fires.
    pub fn threshold_events(&self) -> Vec<(f64, String)> {
        self.thresholds
            .iter()
            .copied()
            .zip(self.event_names())
            .collect()
    }
}
