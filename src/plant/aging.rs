//! Cycle and calendar aging law.
//!
//! Capacity fade combines a square-root-of-cycles term with an Arrhenius
//! calendar term. Resistance growth is cycle-driven only.

use serde::{Deserialize, Serialize};

const KELVIN_OFFSET: f64 = 273.15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgingParameters {
    /// Capacity fade per sqrt(cycle)
    pub cycle_fade_rate: f64,
    /// Fractional R0 increase per cycle
    pub resistance_increase_per_cycle: f64,
    /// Arrhenius activation energy (J/mol)
    pub activation_energy_j_per_mol: f64,
    /// Gas constant (J/(mol*K))
    pub gas_constant: f64,
    /// Calendar fade rate per hour before temperature/SOC scaling
    pub calendar_base_rate_per_hour: f64,
    pub calendar_soc_exponent: f64,
    pub max_calendar_fade: f64,
    /// Floor on remaining capacity fraction, applied to cycle fade and to the product
    pub min_capacity_fraction: f64,
}

impl Default for AgingParameters {
    fn default() -> Self {
        Self {
            cycle_fade_rate: 1.0e-4,
            resistance_increase_per_cycle: 1.0e-3,
            activation_energy_j_per_mol: 30_000.0,
            gas_constant: 8.314,
            calendar_base_rate_per_hour: 1.0e-9,
            calendar_soc_exponent: 0.5,
            max_calendar_fade: 0.3,
            min_capacity_fraction: 0.5,
        }
    }
}

/// Accumulated aging stress of one cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgingInputs {
    pub cycles: u32,
    pub calendar_hours: f64,
    pub storage_soc: f64,
    pub storage_temp_c: f64,
}

/// Derived aging outputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgingOutcome {
    /// Remaining fraction of nominal capacity, never below `min_capacity_fraction`
    pub capacity_fraction: f64,
    /// R0 multiplier, never below 1
    pub resistance_multiplier: f64,
}

impl AgingParameters {
    pub fn cycle_fade_factor(&self, cycles: u32) -> f64 {
        let factor = 1.0 - self.cycle_fade_rate * f64::from(cycles).sqrt();
        factor.max(self.min_capacity_fraction)
    }

    pub fn calendar_fade_factor(&self, calendar_hours: f64, storage_soc: f64, storage_temp_c: f64) -> f64 {
        if calendar_hours <= 0.0 {
            return 1.0;
        }

        let temp_kelvin = storage_temp_c + KELVIN_OFFSET;
        let arrhenius = (-self.activation_energy_j_per_mol / (self.gas_constant * temp_kelvin)).exp();

        // Extreme SOC (either end) ages faster
        let soc = storage_soc.clamp(0.0, 1.0);
        let soc_factor = (soc.powf(self.calendar_soc_exponent)
            + (1.0 - soc).powf(self.calendar_soc_exponent))
            / 2.0;

        let fade = self.calendar_base_rate_per_hour * arrhenius * soc_factor * calendar_hours;
        1.0 - fade.min(self.max_calendar_fade)
    }

    pub fn evaluate(&self, inputs: &AgingInputs) -> AgingOutcome {
        let cycle = self.cycle_fade_factor(inputs.cycles);
        let calendar =
            self.calendar_fade_factor(inputs.calendar_hours, inputs.storage_soc, inputs.storage_temp_c);

        AgingOutcome {
            capacity_fraction: (cycle * calendar).max(self.min_capacity_fraction),
            resistance_multiplier: 1.0 + self.resistance_increase_per_cycle * f64::from(inputs.cycles),
        }
    }
}
