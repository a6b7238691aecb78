//! Static per-channel calibration error and measurement noise settings.

use crate::error::{Result, SimError};
use crate::plant::NUM_CELLS;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Standard deviations of the Gaussian measurement noise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub voltage_noise_mv: f64,
    pub temp_noise_c: f64,
    pub current_noise_ma: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            voltage_noise_mv: 2.0,
            temp_noise_c: 0.5,
            current_noise_ma: 50.0,
        }
    }
}

impl NoiseConfig {
    /// No noise on any channel.
    pub fn none() -> Self {
        Self {
            voltage_noise_mv: 0.0,
            temp_noise_c: 0.0,
            current_noise_ma: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_spread("voltage_noise_mv", self.voltage_noise_mv)?;
        check_spread("temp_noise_c", self.temp_noise_c)?;
        check_spread("current_noise_ma", self.current_noise_ma)
    }
}

/// Half-widths of the uniform ranges calibration errors are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Voltage gain drawn from [1 - e, 1 + e]
    pub voltage_gain_error: f64,
    pub voltage_offset_mv: f64,
    pub temp_offset_c: f64,
    pub current_gain_error: f64,
    pub current_offset_ma: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            voltage_gain_error: 0.001,
            voltage_offset_mv: 5.0,
            temp_offset_c: 1.0,
            current_gain_error: 0.002,
            current_offset_ma: 10.0,
        }
    }
}

impl CalibrationConfig {
    /// Ideal channels: unity gain, zero offset.
    pub fn ideal() -> Self {
        Self {
            voltage_gain_error: 0.0,
            voltage_offset_mv: 0.0,
            temp_offset_c: 0.0,
            current_gain_error: 0.0,
            current_offset_ma: 0.0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_spread("voltage_gain_error", self.voltage_gain_error)?;
        check_spread("voltage_offset_mv", self.voltage_offset_mv)?;
        check_spread("temp_offset_c", self.temp_offset_c)?;
        check_spread("current_gain_error", self.current_gain_error)?;
        check_spread("current_offset_ma", self.current_offset_ma)
    }
}

/// Everything needed to build an [`AfeEmulator`](super::AfeEmulator).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AfeConfig {
    pub noise: NoiseConfig,
    pub calibration: CalibrationConfig,
}

impl AfeConfig {
    /// Noise-free, perfectly calibrated front-end.
    pub fn ideal() -> Self {
        Self {
            noise: NoiseConfig::none(),
            calibration: CalibrationConfig::ideal(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.noise.validate()?;
        self.calibration.validate()
    }
}

/// Calibration error of one physical AFE, fixed for its lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelCalibration {
    pub voltage_gain: [f64; NUM_CELLS],
    pub voltage_offset_mv: [f64; NUM_CELLS],
    pub temp_offset_c: [f64; NUM_CELLS],
    pub current_gain: f64,
    pub current_offset_ma: f64,
}

impl ChannelCalibration {
    /// Draw all channel errors from `rng`.
    ///
    /// Draw order: 16 voltage gains, 16 voltage offsets, 16 temperature
    /// offsets, current gain, current offset.
    pub fn draw<R: Rng>(config: &CalibrationConfig, rng: &mut R) -> Self {
        let mut voltage_gain = [1.0; NUM_CELLS];
        for gain in voltage_gain.iter_mut() {
            *gain = symmetric(rng, 1.0, config.voltage_gain_error);
        }
        let mut voltage_offset_mv = [0.0; NUM_CELLS];
        for offset in voltage_offset_mv.iter_mut() {
            *offset = symmetric(rng, 0.0, config.voltage_offset_mv);
        }
        let mut temp_offset_c = [0.0; NUM_CELLS];
        for offset in temp_offset_c.iter_mut() {
            *offset = symmetric(rng, 0.0, config.temp_offset_c);
        }

        let current_gain = symmetric(rng, 1.0, config.current_gain_error);
        let current_offset_ma = symmetric(rng, 0.0, config.current_offset_ma);

        Self {
            voltage_gain,
            voltage_offset_mv,
            temp_offset_c,
            current_gain,
            current_offset_ma,
        }
    }

    pub fn apply_voltage(&self, cell: usize, true_mv: f64) -> f64 {
        true_mv * self.voltage_gain[cell] + self.voltage_offset_mv[cell]
    }

    pub fn apply_temperature(&self, cell: usize, true_c: f64) -> f64 {
        true_c + self.temp_offset_c[cell]
    }

    pub fn apply_current(&self, true_ma: f64) -> f64 {
        true_ma * self.current_gain + self.current_offset_ma
    }
}

fn symmetric<R: Rng>(rng: &mut R, center: f64, spread: f64) -> f64 {
    rng.gen_range(center - spread..=center + spread)
}

fn check_spread(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(SimError::invalid(format!(
            "{} must be finite and non-negative, got {}",
            name, value
        )));
    }
    Ok(())
}
