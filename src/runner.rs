//! Closed simulation loop: profile -> pack -> AFE -> frame.
//!
//! The runner owns the simulated clock. Every step advances it by a fixed
//! interval, and that same clock drives the AFE fault schedule.

use crate::afe::AfeEmulator;
use crate::checkpoint::CheckpointStore;
use crate::config::SimConfig;
use crate::error::{Result, SimError};
use crate::frame::MeasurementFrame;
use crate::plant::{BatteryPack, CellParameters, PackState, Plant};
use crate::profile::CurrentProfile;
use tracing::{debug, info, warn};

/// Offset between the pack and AFE seeds so the two never share a stream.
const AFE_SEED_OFFSET: u64 = 1;

#[derive(Debug)]
pub struct SilRunner {
    pack: BatteryPack,
    afe: AfeEmulator,
    profile: CurrentProfile,
    step_ms: f64,
    sim_time_ms: f64,
    sequence: u64,
}

impl SilRunner {
    pub fn new(pack: BatteryPack, afe: AfeEmulator, profile: CurrentProfile, step_ms: f64) -> Result<Self> {
        if !step_ms.is_finite() || step_ms <= 0.0 {
            return Err(SimError::invalid(format!("step_ms must be positive, got {}", step_ms)));
        }
        profile.validate()?;

        Ok(Self {
            pack,
            afe,
            profile,
            step_ms,
            sim_time_ms: 0.0,
            sequence: 0,
        })
    }

    /// Build the pack, the AFE and its fault schedule from a run configuration.
    pub fn from_config(config: &SimConfig) -> Result<Self> {
        config.validate()?;

        let params = match &config.cell_parameters {
            Some(path) => {
                let checkpoint = CheckpointStore::load_file(path)?;
                info!(name = %checkpoint.name, "using cell parameters from checkpoint");
                checkpoint.parameters
            }
            None => CellParameters::default(),
        };

        let pack = BatteryPack::with_parameters(config.pack.clone(), params, config.seed)?;
        let mut afe = AfeEmulator::new(config.afe(), config.seed.wrapping_add(AFE_SEED_OFFSET))?;
        afe.set_crc_error_rate(config.crc_error_rate)?;
        for (i, event) in config.fault_schedule.iter().enumerate() {
            if let Err(e) =
                afe.schedule_fault(event.kind, event.inject_time_ms, event.cell_mask, event.duration_ms)
            {
                warn!(index = i, kind = %event.kind, error = %e, "fault schedule entry rejected");
                return Err(e);
            }
        }

        info!(
            seed = config.seed,
            step_ms = config.step_ms,
            scheduled_faults = config.fault_schedule.len(),
            "SIL runner initialized"
        );

        Self::new(pack, afe, config.profile.clone(), config.step_ms)
    }

    /// Advance the plant by one step and take one AFE measurement.
    pub fn step(&mut self) -> MeasurementFrame {
        let current_ma = self.profile.current_at_time(self.sim_time_ms);
        self.pack.step(current_ma, self.step_ms);
        self.sim_time_ms += self.step_ms;

        let measurement = self.afe.apply_measurement(
            &self.pack.get_cell_voltages(),
            &self.pack.get_cell_temperatures(),
            self.pack.get_pack_current(),
            self.sim_time_ms,
        );
        let frame = MeasurementFrame::new(
            self.sequence,
            self.sim_time_ms,
            measurement,
            self.pack.get_pack_voltage(),
        );
        self.sequence += 1;

        if frame.has_faults() {
            debug!(sequence = frame.sequence, status = frame.status_flags, "frame carries faults");
        }
        frame
    }

    pub fn run(&mut self, steps: u64) -> Vec<MeasurementFrame> {
        let frames: Vec<_> = (0..steps).map(|_| self.step()).collect();
        info!(
            steps,
            sim_time_ms = self.sim_time_ms,
            pack_soc_pct = self.pack.get_pack_soc(),
            "run finished"
        );
        frames
    }

    /// Reset plant and AFE dynamic state and restart the clock.
    pub fn reset(&mut self, soc_pct: Option<f64>, temperature_c: Option<f64>) {
        self.pack.reset(soc_pct, temperature_c);
        self.afe.reset();
        self.sim_time_ms = 0.0;
        self.sequence = 0;
    }

    pub fn pack_state(&self) -> PackState {
        self.pack.get_state()
    }

    pub fn pack(&self) -> &BatteryPack {
        &self.pack
    }

    pub fn pack_mut(&mut self) -> &mut BatteryPack {
        &mut self.pack
    }

    pub fn afe(&self) -> &AfeEmulator {
        &self.afe
    }

    pub fn afe_mut(&mut self) -> &mut AfeEmulator {
        &mut self.afe
    }

    pub fn profile(&self) -> &CurrentProfile {
        &self.profile
    }

    pub fn sim_time_ms(&self) -> f64 {
        self.sim_time_ms
    }

    pub fn step_ms(&self) -> f64 {
        self.step_ms
    }

    pub fn frames_emitted(&self) -> u64 {
        self.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::afe::{AfeConfig, AfeFaultKind};
    use crate::config::FaultEventConfig;
    use crate::plant::PackConfig;

    fn ideal_runner(current_ma: f64) -> SilRunner {
        let pack = BatteryPack::new(PackConfig::uniform(), 1).unwrap();
        let afe = AfeEmulator::new(AfeConfig::ideal(), 2).unwrap();
        SilRunner::new(pack, afe, CurrentProfile::constant(current_ma), 100.0).unwrap()
    }

    #[test]
    fn test_step_advances_clock_and_sequence() {
        let mut runner = ideal_runner(-20_000.0);
        let frames = runner.run(3);

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].sequence, 0);
        assert_eq!(frames[2].sequence, 2);
        assert_eq!(frames[2].timestamp_ms, 300.0);
        assert_eq!(runner.sim_time_ms(), 300.0);
        assert_eq!(frames[2].pack_current_ma, -20_000.0);
    }

    #[test]
    fn test_scheduled_fault_follows_sim_clock() {
        let config = SimConfig {
            noise: crate::afe::NoiseConfig::none(),
            calibration: crate::afe::CalibrationConfig::ideal(),
            profile: CurrentProfile::constant(-10_000.0),
            fault_schedule: vec![FaultEventConfig {
                kind: AfeFaultKind::OpenWire,
                inject_time_ms: 500.0,
                cell_mask: Some(1 << 5),
                duration_ms: Some(300.0),
            }],
            ..SimConfig::default()
        };
        let mut runner = SilRunner::from_config(&config).unwrap();
        let frames = runner.run(10);

        // Frames are stamped at 100, 200, ... 1000 ms
        for frame in &frames {
            let active = frame.timestamp_ms >= 500.0 && frame.timestamp_ms < 800.0;
            assert_eq!(frame.status_flags & (1 << 5) != 0, active, "t = {}", frame.timestamp_ms);
        }
    }

    #[test]
    fn test_reset_restarts_clock() {
        let mut runner = ideal_runner(-50_000.0);
        runner.run(5);
        runner.reset(Some(80.0), None);

        assert_eq!(runner.sim_time_ms(), 0.0);
        assert_eq!(runner.frames_emitted(), 0);
        assert_eq!(runner.afe().statistics().measurement_count, 0);
        assert!((runner.pack().get_pack_soc() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_non_positive_step() {
        let pack = BatteryPack::new(PackConfig::default(), 1).unwrap();
        let afe = AfeEmulator::new(AfeConfig::default(), 2).unwrap();
        assert!(SilRunner::new(pack, afe, CurrentProfile::default(), 0.0).is_err());
    }
}
