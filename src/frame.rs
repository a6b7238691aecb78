//! Measurement frames handed to the transport layer.

use crate::afe::{status, AfeMeasurement};
use crate::plant::NUM_CELLS;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementFrame {
    pub sequence: u64,
    /// Simulated time of the measurement
    pub timestamp_ms: f64,
    pub cell_voltages_mv: [f64; NUM_CELLS],
    pub cell_temperatures_cc: [i16; NUM_CELLS],
    pub pack_current_ma: f64,
    /// True pack voltage from the plant, not a sum of measured channels
    pub pack_voltage_mv: f64,
    pub status_flags: u32,
}

impl MeasurementFrame {
    pub fn new(sequence: u64, timestamp_ms: f64, measurement: AfeMeasurement, pack_voltage_mv: f64) -> Self {
        Self {
            sequence,
            timestamp_ms,
            cell_voltages_mv: measurement.cell_voltages_mv,
            cell_temperatures_cc: measurement.cell_temperatures_cc,
            pack_current_ma: measurement.pack_current_ma,
            pack_voltage_mv,
            status_flags: measurement.status_flags,
        }
    }

    pub fn has_faults(&self) -> bool {
        self.status_flags != 0
    }

    pub fn cell_temperature_c(&self, cell: usize) -> Option<f64> {
        self.cell_temperatures_cc
            .get(cell)
            .map(|&centi| f64::from(centi) / 100.0)
    }

    pub fn fault_descriptions(&self) -> Vec<String> {
        describe_status_flags(self.status_flags)
    }
}

/// Human-readable list of the faults set in an AFE status word.
///
/// Bits 30 and 31 decode as current-sensor and CRC faults. They are also
/// the NTC bits of cells 14 and 15, which the word cannot tell apart.
pub fn describe_status_flags(flags: u32) -> Vec<String> {
    let mut faults = Vec::new();

    for cell in 0..NUM_CELLS {
        if flags & status::open_wire(cell) != 0 {
            faults.push(format!("Open wire on cell {}", cell));
        }
    }
    for cell in 0..NUM_CELLS - 2 {
        if flags & status::ntc_fault(cell) != 0 {
            faults.push(format!("NTC fault on cell {}", cell));
        }
    }
    if flags & status::CURRENT_SENSOR_FAULT != 0 {
        faults.push("Current sensor fault".to_string());
    }
    if flags & status::CRC_ERROR != 0 {
        faults.push("CRC error".to_string());
    }

    faults
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_flags_no_faults() {
        assert!(describe_status_flags(0).is_empty());
    }

    #[test]
    fn test_mixed_flags_decode_in_bit_order() {
        let flags = status::open_wire(5) | status::ntc_fault(2) | status::CRC_ERROR;
        assert_eq!(
            describe_status_flags(flags),
            vec![
                "Open wire on cell 5".to_string(),
                "NTC fault on cell 2".to_string(),
                "CRC error".to_string(),
            ]
        );
    }

    #[test]
    fn test_frame_temperature_conversion() {
        let measurement = AfeMeasurement {
            cell_voltages_mv: [3300.0; NUM_CELLS],
            cell_temperatures_cc: [2530; NUM_CELLS],
            pack_current_ma: 1000.0,
            status_flags: status::CURRENT_SENSOR_FAULT,
        };
        let frame = MeasurementFrame::new(3, 300.0, measurement, 52_800.0);

        assert_eq!(frame.cell_temperature_c(0), Some(25.3));
        assert_eq!(frame.cell_temperature_c(NUM_CELLS), None);
        assert!(frame.has_faults());
        assert_eq!(frame.fault_descriptions(), vec!["Current sensor fault".to_string()]);
    }
}
