//! Analog front-end emulation.
//!
//! Turns true plant values into what the BMS firmware would read from the AFE:
//! calibrated, noisy, quantized, fault-injected channels plus a status word.

pub mod calibration;
pub mod emulator;
pub mod schedule;

pub use calibration::{AfeConfig, CalibrationConfig, ChannelCalibration, NoiseConfig};
pub use emulator::{AfeEmulator, AfeMeasurement, AfeStatistics};
pub use schedule::{FaultAction, FaultScheduler, ScheduledFault};

use crate::error::SimError;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Voltage ADC resolution: 0.1 mV.
pub const VOLTAGE_STEPS_PER_MV: f64 = 10.0;
/// Temperature ADC resolution: 0.1 °C.
pub const TEMPERATURE_STEPS_PER_C: f64 = 10.0;
/// Current ADC resolution: 1 mA.
pub const CURRENT_STEPS_PER_MA: f64 = 1.0;

pub const VOLTAGE_FULL_SCALE_MV: f64 = 6553.5;

/// Open-wire channels read exactly this voltage.
pub const OPEN_WIRE_VOLTAGE_MV: f64 = 0.0;
/// Faulted NTC channels read this temperature (centi-°C).
pub const NTC_FAULT_CENTI_C: i16 = i16::MIN;
/// Temperatures at or below this (centi-°C) are flagged as NTC faults.
pub const NTC_FAULT_THRESHOLD_CENTI_C: i16 = -32_000;
/// A faulted current sensor reads exactly this current.
pub const CURRENT_SENSOR_FAULT_MA: f64 = 0.0;

/// Status word layout.
///
/// Bits 16..=31 carry per-cell NTC faults, so NTC faults on cells 14 and 15
/// share bits 30 and 31 with the current-sensor and CRC flags. Existing
/// firmware decoders expect this layout. [`AfeStatistics`] reports each fault
/// separately.
pub mod status {
    pub const OPEN_WIRE_SHIFT: u32 = 0;
    pub const NTC_FAULT_SHIFT: u32 = 16;
    pub const CURRENT_SENSOR_FAULT: u32 = 1 << 30;
    pub const CRC_ERROR: u32 = 1 << 31;

    pub const fn open_wire(cell: usize) -> u32 {
        1 << (OPEN_WIRE_SHIFT as usize + cell)
    }

    pub const fn ntc_fault(cell: usize) -> u32 {
        1 << (NTC_FAULT_SHIFT as usize + cell)
    }
}

/// Injectable AFE fault kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfeFaultKind {
    /// Cell sense line disconnected; channel reads 0 mV
    OpenWire,
    /// Voltage ADC channel frozen at its last reading
    StuckAdc,
    NtcOpen,
    NtcShort,
    /// Pack current channel reads 0 mA
    CurrentSensorFault,
    /// Every frame reports a CRC error while active
    CrcError,
}

impl AfeFaultKind {
    pub const ALL: [AfeFaultKind; 6] = [
        AfeFaultKind::OpenWire,
        AfeFaultKind::StuckAdc,
        AfeFaultKind::NtcOpen,
        AfeFaultKind::NtcShort,
        AfeFaultKind::CurrentSensorFault,
        AfeFaultKind::CrcError,
    ];

    /// Whether the fault targets individual cell channels and needs a mask.
    pub fn is_per_cell(self) -> bool {
        match self {
            AfeFaultKind::OpenWire
            | AfeFaultKind::StuckAdc
            | AfeFaultKind::NtcOpen
            | AfeFaultKind::NtcShort => true,
            AfeFaultKind::CurrentSensorFault | AfeFaultKind::CrcError => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AfeFaultKind::OpenWire => "open_wire",
            AfeFaultKind::StuckAdc => "stuck_adc",
            AfeFaultKind::NtcOpen => "ntc_open",
            AfeFaultKind::NtcShort => "ntc_short",
            AfeFaultKind::CurrentSensorFault => "current_sensor_fault",
            AfeFaultKind::CrcError => "crc_error",
        }
    }
}

impl core::fmt::Display for AfeFaultKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AfeFaultKind {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == token)
            .ok_or_else(|| SimError::invalid(format!("unknown fault type: {}", s)))
    }
}

/// Round `value` to the nearest multiple of `1 / steps_per_unit`.
pub fn quantize(value: f64, steps_per_unit: f64) -> f64 {
    (value * steps_per_unit).round() / steps_per_unit
}
