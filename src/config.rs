//! Simulation run configuration.
//!
//! Every key is optional; missing keys take the documented defaults.

use crate::afe::{AfeConfig, AfeFaultKind, CalibrationConfig, NoiseConfig};
use crate::error::{Result, SimError};
use crate::plant::PackConfig;
use crate::profile::CurrentProfile;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Longest simulated step accepted: one hour.
pub const MAX_STEP_MS: f64 = 3_600_000.0;

/// A fault to be injected at a simulated time during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEventConfig {
    pub kind: AfeFaultKind,
    pub inject_time_ms: f64,
    #[serde(default)]
    pub cell_mask: Option<u16>,
    #[serde(default)]
    pub duration_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub seed: u64,
    /// Simulated time advanced per step
    pub step_ms: f64,
    pub duration_ms: f64,
    pub noise: NoiseConfig,
    pub calibration: CalibrationConfig,
    pub pack: PackConfig,
    pub crc_error_rate: f64,
    pub fault_schedule: Vec<FaultEventConfig>,
    pub profile: CurrentProfile,
    /// Cell parameter checkpoint to build the pack from, if any
    pub cell_parameters: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            step_ms: 100.0,
            duration_ms: 10_000.0,
            noise: NoiseConfig::default(),
            calibration: CalibrationConfig::default(),
            pack: PackConfig::default(),
            crc_error_rate: 0.0,
            fault_schedule: Vec::new(),
            profile: CurrentProfile::default(),
            cell_parameters: None,
        }
    }
}

impl SimConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: SimConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn afe(&self) -> AfeConfig {
        AfeConfig {
            noise: self.noise,
            calibration: self.calibration,
        }
    }

    /// Number of whole steps covering `duration_ms`.
    pub fn step_count(&self) -> u64 {
        (self.duration_ms / self.step_ms).ceil() as u64
    }

    pub fn validate(&self) -> Result<()> {
        if !self.step_ms.is_finite() || self.step_ms <= 0.0 {
            return Err(SimError::invalid(format!("step_ms must be positive, got {}", self.step_ms)));
        }
        if self.step_ms > MAX_STEP_MS {
            return Err(SimError::invalid(format!(
                "step_ms must be at most {}, got {}",
                MAX_STEP_MS, self.step_ms
            )));
        }
        if !self.duration_ms.is_finite() || self.duration_ms < 0.0 {
            return Err(SimError::invalid(format!(
                "duration_ms must be non-negative, got {}",
                self.duration_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.crc_error_rate) {
            return Err(SimError::invalid(format!(
                "crc_error_rate must be between 0.0 and 1.0, got {}",
                self.crc_error_rate
            )));
        }

        self.afe().validate()?;
        self.pack.validate()?;
        self.profile.validate()?;

        for (i, event) in self.fault_schedule.iter().enumerate() {
            if event.kind.is_per_cell() && event.cell_mask.is_none() {
                return Err(SimError::invalid(format!(
                    "fault_schedule[{}]: cell_mask required for {}",
                    i, event.kind
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plant::SocMode;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = SimConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SimConfig::default());
        assert_eq!(config.seed, 42);
        assert_eq!(config.noise.voltage_noise_mv, 2.0);
        assert_eq!(config.calibration.current_offset_ma, 10.0);
        assert_eq!(config.pack.soc_mode, SocMode::Minimum);
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = SimConfig::from_json_str(
            r#"{"seed": 7,
                "noise": {"voltage_noise_mv": 0.0},
                "pack": {"soc_calculation_mode": "average"},
                "fault_schedule": [{"kind":"open_wire","inject_time_ms":5000,"cell_mask":32,"duration_ms":2000}],
                "profile": {"type":"constant","current_ma":50000.0}}"#,
        )
        .unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.noise.voltage_noise_mv, 0.0);
        assert_eq!(config.noise.temp_noise_c, 0.5);
        assert_eq!(config.pack.soc_mode, SocMode::Average);
        assert_eq!(config.pack.cell_capacity_ah, 100.0);
        assert_eq!(config.fault_schedule[0].kind, AfeFaultKind::OpenWire);
        assert_eq!(config.fault_schedule[0].cell_mask, Some(32));
        assert_eq!(config.profile.current_at_time(0.0), 50_000.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(SimConfig::from_json_str(r#"{"crc_error_rate": 1.2}"#).is_err());
        assert!(SimConfig::from_json_str(r#"{"step_ms": 0}"#).is_err());
        assert!(SimConfig::from_json_str(r#"{"step_ms": 1e23}"#).is_err());
        assert!(SimConfig::from_json_str(
            r#"{"fault_schedule": [{"kind":"stuck_adc","inject_time_ms":10}]}"#
        )
        .is_err());
    }

    #[test]
    fn test_step_length_bounds() {
        let at_limit = SimConfig {
            step_ms: MAX_STEP_MS,
            ..SimConfig::default()
        };
        assert!(at_limit.validate().is_ok());

        for step_ms in [MAX_STEP_MS * 1.001, f64::INFINITY, f64::NAN, -1.0] {
            let config = SimConfig {
                step_ms,
                ..SimConfig::default()
            };
            assert!(matches!(config.validate(), Err(SimError::InvalidArgument(_))), "{}", step_ms);
        }
    }

    #[test]
    fn test_step_count_rounds_up() {
        let config = SimConfig {
            step_ms: 300.0,
            duration_ms: 1000.0,
            ..SimConfig::default()
        };
        assert_eq!(config.step_count(), 4);
    }
}
