use super::calibration::{AfeConfig, ChannelCalibration};
use super::schedule::{FaultAction, FaultScheduler, ScheduledFault};
use super::{
    quantize, status, AfeFaultKind, CURRENT_SENSOR_FAULT_MA, CURRENT_STEPS_PER_MA,
    NTC_FAULT_CENTI_C, NTC_FAULT_THRESHOLD_CENTI_C, OPEN_WIRE_VOLTAGE_MV, TEMPERATURE_STEPS_PER_C,
    VOLTAGE_FULL_SCALE_MV, VOLTAGE_STEPS_PER_MV,
};
use crate::error::{Result, SimError};
use crate::plant::NUM_CELLS;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One AFE read-out as the firmware sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfeMeasurement {
    pub cell_voltages_mv: [f64; NUM_CELLS],
    /// Centi-°C; `i16::MIN` marks a faulted NTC
    pub cell_temperatures_cc: [i16; NUM_CELLS],
    pub pack_current_ma: f64,
    pub status_flags: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AfeStatistics {
    pub measurement_count: u64,
    pub crc_error_count: u64,
    pub crc_error_rate_observed: f64,
    pub crc_error_rate: f64,
    pub open_wire_mask: u16,
    pub stuck_adc_mask: u16,
    pub ntc_fault_mask: u16,
    pub current_sensor_fault: bool,
    pub crc_fault_active: bool,
    pub pending_scheduled: usize,
}

#[derive(Debug)]
pub struct AfeEmulator {
    config: AfeConfig,
    calibration: ChannelCalibration,
    rng: ChaCha8Rng,
    voltage_noise: Normal<f64>,
    temp_noise: Normal<f64>,
    current_noise: Normal<f64>,

    open_wire_mask: u16,
    stuck_adc_mask: u16,
    stuck_adc_values: [Option<f64>; NUM_CELLS],
    ntc_fault_mask: u16,
    current_sensor_fault: bool,
    crc_fault_forced: bool,
    crc_error_rate: f64,
    schedule: FaultScheduler,

    status_flags: u32,
    measurement_count: u64,
    crc_error_count: u64,
    sim_time_ms: f64,
}

impl AfeEmulator {
    pub fn new(config: AfeConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    /// Build from an existing generator. Calibration is drawn from it first,
    /// then the same generator feeds measurement noise.
    pub fn with_rng(config: AfeConfig, mut rng: ChaCha8Rng) -> Result<Self> {
        config.validate()?;

        let calibration = ChannelCalibration::draw(&config.calibration, &mut rng);
        let voltage_noise = noise(config.noise.voltage_noise_mv)?;
        let temp_noise = noise(config.noise.temp_noise_c)?;
        let current_noise = noise(config.noise.current_noise_ma)?;

        debug!(?calibration, "AFE calibration drawn");

        Ok(Self {
            config,
            calibration,
            rng,
            voltage_noise,
            temp_noise,
            current_noise,
            open_wire_mask: 0,
            stuck_adc_mask: 0,
            stuck_adc_values: [None; NUM_CELLS],
            ntc_fault_mask: 0,
            current_sensor_fault: false,
            crc_fault_forced: false,
            crc_error_rate: 0.0,
            schedule: FaultScheduler::new(),
            status_flags: 0,
            measurement_count: 0,
            crc_error_count: 0,
            sim_time_ms: 0.0,
        })
    }

    /// Convert true plant values into one AFE read-out.
    ///
    /// `sim_time_ms` is the simulated time since start and drives the fault
    /// schedule. Noise is drawn for every channel on every call, faulted or
    /// not, so the random stream does not depend on the fault state.
    pub fn apply_measurement(
        &mut self,
        true_voltages_mv: &[f64; NUM_CELLS],
        true_temperatures_c: &[f64; NUM_CELLS],
        true_current_ma: f64,
        sim_time_ms: f64,
    ) -> AfeMeasurement {
        self.sim_time_ms = sim_time_ms;
        self.advance_schedule(sim_time_ms);
        self.measurement_count += 1;

        let cell_voltages_mv = self.measure_voltages(true_voltages_mv);
        let cell_temperatures_cc = self.measure_temperatures(true_temperatures_c);
        let pack_current_ma = self.measure_current(true_current_ma);

        let mut flags = 0u32;
        for cell in 0..NUM_CELLS {
            if cell_voltages_mv[cell] == OPEN_WIRE_VOLTAGE_MV {
                flags |= status::open_wire(cell);
            }
            if cell_temperatures_cc[cell] <= NTC_FAULT_THRESHOLD_CENTI_C {
                flags |= status::ntc_fault(cell);
            }
        }
        if self.current_sensor_fault || pack_current_ma == CURRENT_SENSOR_FAULT_MA {
            flags |= status::CURRENT_SENSOR_FAULT;
        }

        let crc_trial = self.crc_error_rate > 0.0 && self.rng.gen_bool(self.crc_error_rate);
        if self.crc_fault_forced || crc_trial {
            flags |= status::CRC_ERROR;
            self.crc_error_count += 1;
        }
        self.status_flags = flags;

        AfeMeasurement {
            cell_voltages_mv,
            cell_temperatures_cc,
            pack_current_ma,
            status_flags: flags,
        }
    }

    fn measure_voltages(&mut self, true_mv: &[f64; NUM_CELLS]) -> [f64; NUM_CELLS] {
        let mut measured = [0.0; NUM_CELLS];

        for cell in 0..NUM_CELLS {
            let bit = 1u16 << cell;
            let mut value = self.calibration.apply_voltage(cell, true_mv[cell])
                + self.voltage_noise.sample(&mut self.rng);

            if self.open_wire_mask & bit != 0 {
                value = OPEN_WIRE_VOLTAGE_MV;
            } else if self.stuck_adc_mask & bit != 0 {
                // Frozen at the last reading before onset, or this one if none
                value = *self.stuck_adc_values[cell].get_or_insert(value);
            } else {
                self.stuck_adc_values[cell] = Some(value);
            }

            measured[cell] = quantize(value, VOLTAGE_STEPS_PER_MV).clamp(0.0, VOLTAGE_FULL_SCALE_MV);
        }

        measured
    }

    fn measure_temperatures(&mut self, true_c: &[f64; NUM_CELLS]) -> [i16; NUM_CELLS] {
        let mut measured = [0i16; NUM_CELLS];

        for cell in 0..NUM_CELLS {
            let value = self.calibration.apply_temperature(cell, true_c[cell])
                + self.temp_noise.sample(&mut self.rng);

            measured[cell] = if self.ntc_fault_mask & (1u16 << cell) != 0 {
                NTC_FAULT_CENTI_C
            } else {
                to_centi_celsius(quantize(value, TEMPERATURE_STEPS_PER_C))
            };
        }

        measured
    }

    fn measure_current(&mut self, true_ma: f64) -> f64 {
        let value = self.calibration.apply_current(true_ma) + self.current_noise.sample(&mut self.rng);
        if self.current_sensor_fault {
            return CURRENT_SENSOR_FAULT_MA;
        }
        quantize(value, CURRENT_STEPS_PER_MA)
    }

    fn advance_schedule(&mut self, now_ms: f64) {
        for action in self.schedule.advance(now_ms) {
            match action {
                FaultAction::Inject { kind, cell_mask } => {
                    info!(%kind, ?cell_mask, at_ms = now_ms, "scheduled fault injected");
                    self.set_fault(kind, cell_mask, true);
                }
                FaultAction::Clear { kind, cell_mask } => {
                    info!(%kind, ?cell_mask, at_ms = now_ms, "scheduled fault cleared");
                    self.set_fault(kind, cell_mask, false);
                }
            }
        }
    }

    /// Activate a fault now. With a duration, its clear is scheduled that
    /// long after the time of the most recent measurement.
    pub fn inject_fault(
        &mut self,
        kind: AfeFaultKind,
        cell_mask: Option<u16>,
        duration_ms: Option<f64>,
    ) -> Result<()> {
        check_fault_args(kind, cell_mask, duration_ms)?;

        debug!(%kind, ?cell_mask, ?duration_ms, "fault injected");
        self.set_fault(kind, cell_mask, true);

        if let Some(duration) = duration_ms {
            self.schedule
                .schedule_clear(kind, cell_mask, self.sim_time_ms + duration);
        }
        Ok(())
    }

    /// Clear a fault. `None` clears every cell of a per-cell fault kind.
    pub fn clear_fault(&mut self, kind: AfeFaultKind, cell_mask: Option<u16>) {
        debug!(%kind, ?cell_mask, "fault cleared");
        self.set_fault(kind, cell_mask, false);
    }

    /// Queue a fault to be injected once simulated time reaches `inject_time_ms`.
    pub fn schedule_fault(
        &mut self,
        kind: AfeFaultKind,
        inject_time_ms: f64,
        cell_mask: Option<u16>,
        duration_ms: Option<f64>,
    ) -> Result<()> {
        check_fault_args(kind, cell_mask, duration_ms)?;
        if !inject_time_ms.is_finite() || inject_time_ms < 0.0 {
            return Err(SimError::invalid(format!(
                "inject time must be finite and non-negative, got {}",
                inject_time_ms
            )));
        }

        self.schedule.schedule(kind, inject_time_ms, cell_mask, duration_ms);
        Ok(())
    }

    fn set_fault(&mut self, kind: AfeFaultKind, cell_mask: Option<u16>, active: bool) {
        let update = |mask: &mut u16| match (active, cell_mask) {
            (true, Some(bits)) => *mask |= bits,
            (true, None) => {}
            (false, Some(bits)) => *mask &= !bits,
            (false, None) => *mask = 0,
        };

        match kind {
            AfeFaultKind::OpenWire => update(&mut self.open_wire_mask),
            AfeFaultKind::StuckAdc => update(&mut self.stuck_adc_mask),
            AfeFaultKind::NtcOpen | AfeFaultKind::NtcShort => update(&mut self.ntc_fault_mask),
            AfeFaultKind::CurrentSensorFault => self.current_sensor_fault = active,
            AfeFaultKind::CrcError => self.crc_fault_forced = active,
        }
    }

    /// Probability of a CRC error per measurement, independent of forced CRC faults.
    pub fn set_crc_error_rate(&mut self, rate: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(SimError::invalid(format!(
                "CRC error rate must be between 0.0 and 1.0, got {}",
                rate
            )));
        }
        self.crc_error_rate = rate;
        Ok(())
    }

    pub fn crc_error_rate(&self) -> f64 {
        self.crc_error_rate
    }

    /// Status word of the most recent measurement.
    pub fn status_flags(&self) -> u32 {
        self.status_flags
    }

    pub fn calibration(&self) -> &ChannelCalibration {
        &self.calibration
    }

    pub fn config(&self) -> &AfeConfig {
        &self.config
    }

    pub fn pending_faults(&self) -> &[ScheduledFault] {
        self.schedule.pending()
    }

    pub fn statistics(&self) -> AfeStatistics {
        AfeStatistics {
            measurement_count: self.measurement_count,
            crc_error_count: self.crc_error_count,
            crc_error_rate_observed: self.crc_error_count as f64 / self.measurement_count.max(1) as f64,
            crc_error_rate: self.crc_error_rate,
            open_wire_mask: self.open_wire_mask,
            stuck_adc_mask: self.stuck_adc_mask,
            ntc_fault_mask: self.ntc_fault_mask,
            current_sensor_fault: self.current_sensor_fault,
            crc_fault_active: self.crc_fault_forced,
            pending_scheduled: self.schedule.len(),
        }
    }

    /// Clear faults, schedule, CRC rate and counters. Calibration is kept.
    pub fn reset(&mut self) {
        self.open_wire_mask = 0;
        self.stuck_adc_mask = 0;
        self.stuck_adc_values = [None; NUM_CELLS];
        self.ntc_fault_mask = 0;
        self.current_sensor_fault = false;
        self.crc_fault_forced = false;
        self.crc_error_rate = 0.0;
        self.schedule.clear();
        self.status_flags = 0;
        self.measurement_count = 0;
        self.crc_error_count = 0;
        self.sim_time_ms = 0.0;
    }
}

fn noise(std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, std_dev)
        .map_err(|e| SimError::invalid(format!("invalid noise standard deviation {}: {}", std_dev, e)))
}

fn to_centi_celsius(celsius: f64) -> i16 {
    (celsius * 100.0)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

fn check_fault_args(kind: AfeFaultKind, cell_mask: Option<u16>, duration_ms: Option<f64>) -> Result<()> {
    if kind.is_per_cell() && cell_mask.is_none() {
        return Err(SimError::invalid(format!("cell_mask required for {} fault", kind)));
    }
    if let Some(duration) = duration_ms {
        if !duration.is_finite() || duration < 0.0 {
            return Err(SimError::invalid(format!(
                "fault duration must be finite and non-negative, got {}",
                duration
            )));
        }
    }
    Ok(())
}
