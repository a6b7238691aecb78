//! Open-circuit voltage characterization of the LiFePO4 cell.
//!
//! Two 101-point curves sampled every 1% SOC. The charge branch sits above the
//! discharge branch through the plateau (hysteresis).

use super::CurrentDirection;
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};

/// Points per OCV curve (0% to 100% in 1% steps).
pub const OCV_POINTS: usize = 101;

/// Discharge-branch OCV in volts, index = SOC percent.
pub const OCV_DISCHARGE_V: [f64; OCV_POINTS] = [
    2.862, 2.912, 2.962, 3.012, 3.062, 3.112, 3.124, 3.136, 3.148, 3.160,
    3.172, 3.183, 3.193, 3.204, 3.215, 3.226, 3.236, 3.247, 3.258, 3.268,
    3.279, 3.280, 3.280, 3.281, 3.281, 3.282, 3.283, 3.283, 3.284, 3.284,
    3.285, 3.286, 3.286, 3.287, 3.287, 3.288, 3.289, 3.289, 3.290, 3.290,
    3.291, 3.292, 3.292, 3.293, 3.293, 3.294, 3.295, 3.295, 3.296, 3.296,
    3.297, 3.298, 3.298, 3.299, 3.299, 3.300, 3.300, 3.301, 3.302, 3.302,
    3.303, 3.303, 3.304, 3.304, 3.305, 3.306, 3.306, 3.307, 3.307, 3.308,
    3.308, 3.309, 3.309, 3.310, 3.311, 3.311, 3.312, 3.312, 3.313, 3.313,
    3.314, 3.316, 3.317, 3.319, 3.320, 3.322, 3.323, 3.325, 3.326, 3.328,
    3.329, 3.343, 3.358, 3.372, 3.386, 3.401, 3.415, 3.429, 3.443, 3.458,
    3.472,
];

/// Charge-branch OCV in volts, index = SOC percent.
pub const OCV_CHARGE_V: [f64; OCV_POINTS] = [
    2.510, 2.560, 2.610, 2.660, 2.710, 2.760, 2.810, 2.860, 2.910, 2.960,
    3.010, 3.060, 3.110, 3.160, 3.190, 3.210, 3.220, 3.230, 3.240, 3.250,
    3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260,
    3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260,
    3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260,
    3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260,
    3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260,
    3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260, 3.260,
    3.260, 3.265, 3.270, 3.275, 3.280, 3.285, 3.290, 3.300, 3.310, 3.320,
    3.330, 3.340, 3.350, 3.360, 3.370, 3.380, 3.385, 3.390, 3.395, 3.398,
    3.472,
];

/// Linear interpolation on a curve sampled uniformly over SOC in [0, 1].
///
/// SOC outside [0, 1] is clamped to the end points.
pub fn interpolate(table: &[f64], soc: f64) -> f64 {
    match table.len() {
        0 => return 0.0,
        1 => return table[0],
        _ => {}
    }

    let last = table.len() - 1;
    let position = soc.clamp(0.0, 1.0) * last as f64;
    let lower = position.floor() as usize;
    if lower >= last {
        return table[last];
    }
    let frac = position - lower as f64;

    table[lower] + (table[lower + 1] - table[lower]) * frac
}

/// Charge and discharge OCV curves as plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcvTables {
    pub discharge_v: Vec<f64>,
    pub charge_v: Vec<f64>,
}

impl Default for OcvTables {
    fn default() -> Self {
        Self {
            discharge_v: OCV_DISCHARGE_V.to_vec(),
            charge_v: OCV_CHARGE_V.to_vec(),
        }
    }
}

impl OcvTables {
    /// Reject curves that do not cover 0..=100% in 1% steps.
    pub fn validate(&self) -> Result<()> {
        if self.discharge_v.len() != OCV_POINTS || self.charge_v.len() != OCV_POINTS {
            return Err(SimError::invalid(format!(
                "OCV tables must have {} points (discharge: {}, charge: {})",
                OCV_POINTS,
                self.discharge_v.len(),
                self.charge_v.len()
            )));
        }
        Ok(())
    }

    /// OCV at 25°C for `soc` (fraction).
    ///
    /// `direction` selects the branch. At rest the last non-rest direction
    /// decides, and with no history the two branches are averaged.
    pub fn lookup(&self, soc: f64, direction: CurrentDirection, history: CurrentDirection) -> f64 {
        let effective = if direction.is_resting() { history } else { direction };

        match effective {
            CurrentDirection::Charging => interpolate(&self.charge_v, soc),
            CurrentDirection::Discharging => interpolate(&self.discharge_v, soc),
            CurrentDirection::Resting => {
                (interpolate(&self.charge_v, soc) + interpolate(&self.discharge_v, soc)) / 2.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_hits_table_points() {
        assert_eq!(interpolate(&OCV_DISCHARGE_V, 0.0), 2.862);
        assert_eq!(interpolate(&OCV_DISCHARGE_V, 1.0), 3.472);
        assert!((interpolate(&OCV_DISCHARGE_V, 0.5) - 3.297).abs() < 1e-9);
    }

    #[test]
    fn test_interpolate_between_points() {
        // Halfway between 90% (3.329) and 91% (3.343)
        let v = interpolate(&OCV_DISCHARGE_V, 0.905);
        assert!((v - 3.336).abs() < 1e-9);
    }

    #[test]
    fn test_interpolate_clamps_out_of_range() {
        assert_eq!(interpolate(&OCV_CHARGE_V, -0.3), 2.510);
        assert_eq!(interpolate(&OCV_CHARGE_V, 1.7), 3.472);
    }

    #[test]
    fn test_rest_without_history_averages_branches() {
        let tables = OcvTables::default();
        let v = tables.lookup(0.5, CurrentDirection::Resting, CurrentDirection::Resting);
        assert!((v - (3.297 + 3.260) / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rest_uses_last_direction() {
        let tables = OcvTables::default();
        let v = tables.lookup(0.5, CurrentDirection::Resting, CurrentDirection::Charging);
        assert!((v - 3.260).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_short_table() {
        let mut tables = OcvTables::default();
        tables.charge_v.truncate(50);
        assert!(tables.validate().is_err());
    }
}
