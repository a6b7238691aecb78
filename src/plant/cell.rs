//! LiFePO4 cell equivalent-circuit model.
//!
//! ```text
//! OCV(SOC, T, direction) - R0(SOC, T) - [R1 || C1] - [R2 || C2] - terminal
//! ```
//!
//! The model has no error paths on the update side: SOC, temperature and
//! terminal voltage are clamped, and out-of-range construction arguments are
//! floored.

use super::aging::{AgingInputs, AgingParameters};
use super::ocv::OcvTables;
use super::{CurrentDirection, Plant};
use crate::error::{Result, SimError};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MS_PER_HOUR: f64 = 3_600_000.0;
const REFERENCE_TEMP_C: f64 = 25.0;
const MIN_RESISTANCE_MULTIPLIER: f64 = 0.1;
const MIN_CAPACITY_AH: f64 = 1.0e-3;
const AGING_RECOMPUTE_INTERVAL_HOURS: f64 = 1.0;

/// Cell characterization constants.
///
/// Exposed as plain data so that checkpoint code can serialize and restore
/// them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellParameters {
    pub ocv: OcvTables,
    /// Fast RC branch resistance (ohm)
    pub r1_ohm: f64,
    /// Fast RC branch capacitance (F)
    pub c1_farad: f64,
    /// Slow RC branch resistance (ohm)
    pub r2_ohm: f64,
    /// Slow RC branch capacitance (F)
    pub c2_farad: f64,
    /// R0 at 50% SOC and 25°C (mOhm)
    pub r0_base_mohm: f64,
    pub ocv_temp_coeff_v_per_c: f64,
    pub capacity_temp_coeff_per_c: f64,
    pub resistance_temp_coeff_per_c: f64,
    pub min_resistance_temp_factor: f64,
    /// C-rate scaling of the RC resistances above 1C
    pub rc_scale_alpha: f64,
    pub rc_scale_min: f64,
    pub thermal_mass_j_per_c: f64,
    pub thermal_resistance_c_per_w: f64,
    pub min_terminal_voltage_v: f64,
    pub min_temperature_c: f64,
    pub max_temperature_c: f64,
    pub aging: AgingParameters,
}

impl Default for CellParameters {
    fn default() -> Self {
        Self {
            ocv: OcvTables::default(),
            r1_ohm: 1.0e-3,
            c1_farad: 2000.0,
            r2_ohm: 0.5e-3,
            c2_farad: 10_000.0,
            r0_base_mohm: 0.5,
            ocv_temp_coeff_v_per_c: -0.5e-3,
            capacity_temp_coeff_per_c: 0.005,
            resistance_temp_coeff_per_c: 0.005,
            min_resistance_temp_factor: 0.5,
            rc_scale_alpha: 0.15,
            rc_scale_min: 0.3,
            thermal_mass_j_per_c: 100.0,
            thermal_resistance_c_per_w: 2.0,
            min_terminal_voltage_v: 2.5,
            min_temperature_c: -40.0,
            max_temperature_c: 85.0,
            aging: AgingParameters::default(),
        }
    }
}

impl CellParameters {
    pub fn validate(&self) -> Result<()> {
        self.ocv.validate()?;

        if self.thermal_mass_j_per_c <= 0.0 || self.thermal_resistance_c_per_w <= 0.0 {
            return Err(SimError::invalid("thermal mass and thermal resistance must be positive"));
        }
        if self.min_temperature_c >= self.max_temperature_c {
            return Err(SimError::invalid("temperature limits are inverted"));
        }
        Ok(())
    }

    pub fn clamp_temperature(&self, temperature_c: f64) -> f64 {
        temperature_c.clamp(self.min_temperature_c, self.max_temperature_c)
    }

    /// RC resistance scale for a given C-rate.
    pub fn rc_scale(&self, c_rate: f64) -> f64 {
        if c_rate <= 1.0 {
            1.0
        } else {
            (1.0 / (1.0 + self.rc_scale_alpha * (c_rate - 1.0))).max(self.rc_scale_min)
        }
    }
}

/// Construction arguments for a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    pub capacity_ah: f64,
    /// Initial SOC as a fraction
    pub initial_soc: f64,
    pub temperature_c: f64,
    pub ambient_temp_c: f64,
    pub cycles: u32,
    /// Manufacturing variation applied to R0
    pub resistance_multiplier: f64,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            capacity_ah: 100.0,
            initial_soc: 0.5,
            temperature_c: 25.0,
            ambient_temp_c: 25.0,
            cycles: 0,
            resistance_multiplier: 1.0,
        }
    }
}

/// Dynamic state owned by one cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellState {
    /// SOC fraction in [0, 1]
    pub soc: f64,
    pub temperature_c: f64,
    pub ambient_temp_c: f64,
    pub v_rc_fast: f64,
    pub v_rc_slow: f64,
    pub last_current_direction: CurrentDirection,
    /// SOC at the last direction change
    pub hysteresis_soc: f64,
    pub cycles: u32,
    pub calendar_aging_hours: f64,
    pub storage_soc: f64,
    pub storage_temp_c: f64,
    pub capacity_actual_ah: f64,
    pub resistance_multiplier: f64,
}

/// Reporting view of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub soc_pct: f64,
    /// OCV at the present SOC/temperature/direction (mV)
    pub voltage_mv: f64,
    /// Terminal voltage from the last update (mV)
    pub terminal_voltage_mv: f64,
    pub temperature_c: f64,
    pub capacity_ah: f64,
    pub internal_resistance_mohm: f64,
    pub cycles: u32,
    pub calendar_aging_hours: f64,
    pub rc_fast_v: f64,
    pub rc_slow_v: f64,
    pub current_direction: CurrentDirection,
}

#[derive(Debug, Clone)]
pub struct LiFePo4Cell {
    params: CellParameters,
    capacity_nominal_ah: f64,
    base_resistance_multiplier: f64,
    state: CellState,
    last_aging_update_hours: f64,
    terminal_voltage_v: f64,
}

impl LiFePo4Cell {
    pub fn new() -> Self {
        Self::with_config(CellConfig::default())
    }

    pub fn with_config(config: CellConfig) -> Self {
        Self::build(config, CellParameters::default())
    }

    /// Build a cell from restored characterization constants.
    pub fn with_parameters(config: CellConfig, params: CellParameters) -> Result<Self> {
        params.validate()?;
        Ok(Self::build(config, params))
    }

    fn build(config: CellConfig, params: CellParameters) -> Self {
        let soc = config.initial_soc.clamp(0.0, 1.0);
        let temperature_c = params.clamp_temperature(config.temperature_c);
        let capacity_nominal_ah = config.capacity_ah.max(MIN_CAPACITY_AH);

        let mut cell = Self {
            capacity_nominal_ah,
            base_resistance_multiplier: config.resistance_multiplier.max(MIN_RESISTANCE_MULTIPLIER),
            state: CellState {
                soc,
                temperature_c,
                ambient_temp_c: config.ambient_temp_c,
                v_rc_fast: 0.0,
                v_rc_slow: 0.0,
                last_current_direction: CurrentDirection::Resting,
                hysteresis_soc: soc,
                cycles: config.cycles,
                calendar_aging_hours: 0.0,
                storage_soc: soc,
                storage_temp_c: temperature_c,
                capacity_actual_ah: capacity_nominal_ah,
                resistance_multiplier: 1.0,
            },
            params,
            last_aging_update_hours: 0.0,
            terminal_voltage_v: 0.0,
        };

        cell.recompute_aging();
        cell.terminal_voltage_v = cell.rest_ocv_v();
        cell
    }

    /// OCV in volts for `soc` (fraction), `temperature_c` and `direction`.
    ///
    /// A resting `direction` falls back to the cell's last non-rest direction.
    pub fn get_ocv(&self, soc: f64, temperature_c: f64, direction: CurrentDirection) -> f64 {
        let base = self
            .params
            .ocv
            .lookup(soc, direction, self.state.last_current_direction);
        base + self.params.ocv_temp_coeff_v_per_c * (temperature_c - REFERENCE_TEMP_C)
    }

    /// R0 in mOhm for `soc` (fraction) and `temperature_c`.
    pub fn get_internal_resistance(&self, soc: f64, temperature_c: f64) -> f64 {
        let soc = soc.clamp(0.0, 1.0);
        let soc_multiplier = if soc <= 0.5 {
            1.4 - 0.8 * soc
        } else {
            1.0 - 0.5 * (soc - 0.5)
        };

        let temp_factor = (1.0
            - self.params.resistance_temp_coeff_per_c * (temperature_c - REFERENCE_TEMP_C))
            .max(self.params.min_resistance_temp_factor);

        self.params.r0_base_mohm
            * soc_multiplier
            * temp_factor
            * self.base_resistance_multiplier
            * self.state.resistance_multiplier
    }

    /// Advance the cell by one step.
    ///
    /// `current_ma` is positive for charge. A `forced_temp_c` replaces the
    /// thermal model for this step. Returns terminal voltage (mV) and SOC (%).
    pub fn update(
        &mut self,
        current_ma: f64,
        dt_ms: f64,
        forced_temp_c: Option<f64>,
        ambient_temp_c: Option<f64>,
    ) -> (f64, f64) {
        let dt_ms = if dt_ms.is_finite() { dt_ms.max(0.0) } else { 0.0 };
        let current_ma = if current_ma.is_finite() { current_ma } else { 0.0 };

        if let Some(ambient) = ambient_temp_c {
            self.state.ambient_temp_c = ambient;
        }

        match forced_temp_c {
            Some(temp) => self.state.temperature_c = self.params.clamp_temperature(temp),
            None => self.update_thermal(current_ma, dt_ms),
        }

        let current_a = current_ma / 1000.0;
        let dt_s = dt_ms / 1000.0;

        // Coulomb counting against temperature-adjusted capacity
        let capacity_ah = (self.state.capacity_actual_ah
            * (1.0 + self.params.capacity_temp_coeff_per_c * (self.state.temperature_c - REFERENCE_TEMP_C)))
            .max(MIN_CAPACITY_AH);
        let dsoc = current_a * (dt_ms / MS_PER_HOUR) / capacity_ah;
        self.state.soc = (self.state.soc + dsoc).clamp(0.0, 1.0);

        let direction = CurrentDirection::from_current_ma(current_ma);
        if !direction.is_resting() && direction != self.state.last_current_direction {
            self.state.hysteresis_soc = self.state.soc;
        }
        if !direction.is_resting() {
            self.state.last_current_direction = direction;
        }

        self.update_rc_network(current_a, dt_s);

        let ocv = self.get_ocv(self.state.soc, self.state.temperature_c, direction);
        let r0_ohm = self.get_internal_resistance(self.state.soc, self.state.temperature_c) / 1000.0;
        let v_terminal = ocv
            - current_a.abs() * r0_ohm
            - self.state.v_rc_fast.abs()
            - self.state.v_rc_slow.abs();
        self.terminal_voltage_v = v_terminal.max(self.params.min_terminal_voltage_v);

        self.track_calendar_aging(dt_ms, direction);

        (self.terminal_voltage_v * 1000.0, self.state.soc * 100.0)
    }

    fn update_thermal(&mut self, current_ma: f64, dt_ms: f64) {
        let current_a = current_ma / 1000.0;
        let r0_ohm = self.get_internal_resistance(self.state.soc, self.state.temperature_c) / 1000.0;

        let heating_w = current_a * current_a * r0_ohm;
        let loss_w = (self.state.temperature_c - self.state.ambient_temp_c) / self.params.thermal_resistance_c_per_w;
        let delta_c = (heating_w - loss_w) * (dt_ms / 1000.0) / self.params.thermal_mass_j_per_c;

        self.state.temperature_c = self.params.clamp_temperature(self.state.temperature_c + delta_c);
    }

    fn update_rc_network(&mut self, current_a: f64, dt_s: f64) {
        let c_rate = current_a.abs() / self.capacity_nominal_ah;
        let scale = self.params.rc_scale(c_rate);

        let r1 = self.params.r1_ohm * scale;
        let r2 = self.params.r2_ohm * scale;

        self.state.v_rc_fast = rc_step(self.state.v_rc_fast, current_a, r1, self.params.c1_farad, dt_s);
        self.state.v_rc_slow = rc_step(self.state.v_rc_slow, current_a, r2, self.params.c2_farad, dt_s);
    }

    fn track_calendar_aging(&mut self, dt_ms: f64, direction: CurrentDirection) {
        self.state.calendar_aging_hours += dt_ms / MS_PER_HOUR;

        if direction.is_resting() {
            self.state.storage_soc = self.state.soc;
        }
        self.state.storage_temp_c = self.state.temperature_c;

        if self.state.calendar_aging_hours - self.last_aging_update_hours > AGING_RECOMPUTE_INTERVAL_HOURS {
            self.recompute_aging();
            self.last_aging_update_hours = self.state.calendar_aging_hours;
        }
    }

    fn recompute_aging(&mut self) {
        let outcome = self.params.aging.evaluate(&AgingInputs {
            cycles: self.state.cycles,
            calendar_hours: self.state.calendar_aging_hours,
            storage_soc: self.state.storage_soc,
            storage_temp_c: self.state.storage_temp_c,
        });

        self.state.capacity_actual_ah = self.capacity_nominal_ah * outcome.capacity_fraction;
        self.state.resistance_multiplier = outcome.resistance_multiplier;

        debug!(
            cycles = self.state.cycles,
            calendar_hours = self.state.calendar_aging_hours,
            capacity_ah = self.state.capacity_actual_ah,
            "cell aging recomputed"
        );
    }

    /// Force aging inputs and recompute capacity and resistance immediately.
    pub fn set_aging(&mut self, cycles: u32, calendar_aging_hours: Option<f64>) {
        self.state.cycles = cycles;
        if let Some(hours) = calendar_aging_hours {
            self.state.calendar_aging_hours = hours.max(0.0);
        }
        self.recompute_aging();
    }

    /// Zero the RC branches and direction history, optionally setting SOC (%)
    /// and temperature.
    pub fn reset(&mut self, soc_pct: Option<f64>, temperature_c: Option<f64>) {
        if let Some(soc_pct) = soc_pct {
            self.state.soc = (soc_pct / 100.0).clamp(0.0, 1.0);
        }
        if let Some(temp) = temperature_c {
            self.state.temperature_c = self.params.clamp_temperature(temp);
        }
        self.state.v_rc_fast = 0.0;
        self.state.v_rc_slow = 0.0;
        self.state.last_current_direction = CurrentDirection::Resting;
        self.state.hysteresis_soc = self.state.soc;
        self.terminal_voltage_v = self.rest_ocv_v();
    }

    /// Apply a temperature change from an external heat exchange.
    pub(crate) fn exchange_heat(&mut self, delta_c: f64) {
        self.state.temperature_c = self.params.clamp_temperature(self.state.temperature_c + delta_c);
    }

    fn rest_ocv_v(&self) -> f64 {
        self.get_ocv(self.state.soc, self.state.temperature_c, CurrentDirection::Resting)
            .max(self.params.min_terminal_voltage_v)
    }

    pub fn parameters(&self) -> &CellParameters {
        &self.params
    }

    pub fn state(&self) -> &CellState {
        &self.state
    }

    pub fn soc(&self) -> f64 {
        self.state.soc
    }

    pub fn soc_pct(&self) -> f64 {
        self.state.soc * 100.0
    }

    pub fn temperature_c(&self) -> f64 {
        self.state.temperature_c
    }

    pub fn terminal_voltage_mv(&self) -> f64 {
        self.terminal_voltage_v * 1000.0
    }

    pub fn capacity_nominal_ah(&self) -> f64 {
        self.capacity_nominal_ah
    }

    pub fn capacity_actual_ah(&self) -> f64 {
        self.state.capacity_actual_ah
    }

    pub fn base_resistance_multiplier(&self) -> f64 {
        self.base_resistance_multiplier
    }

    pub fn snapshot(&self) -> CellSnapshot {
        CellSnapshot {
            soc_pct: self.soc_pct(),
            voltage_mv: self.get_ocv(
                self.state.soc,
                self.state.temperature_c,
                self.state.last_current_direction,
            ) * 1000.0,
            terminal_voltage_mv: self.terminal_voltage_mv(),
            temperature_c: self.state.temperature_c,
            capacity_ah: self.state.capacity_actual_ah,
            internal_resistance_mohm: self.get_internal_resistance(self.state.soc, self.state.temperature_c),
            cycles: self.state.cycles,
            calendar_aging_hours: self.state.calendar_aging_hours,
            rc_fast_v: self.state.v_rc_fast,
            rc_slow_v: self.state.v_rc_slow,
            current_direction: self.state.last_current_direction,
        }
    }
}

impl Default for LiFePo4Cell {
    fn default() -> Self {
        Self::new()
    }
}

impl Plant for LiFePo4Cell {
    type State = CellSnapshot;

    fn step(&mut self, current_ma: f64, dt_ms: f64) {
        self.update(current_ma, dt_ms, None, None);
    }

    fn get_state(&self) -> Self::State {
        self.snapshot()
    }
}

/// Exact exponential step of one RC branch.
fn rc_step(v: f64, current_a: f64, r_ohm: f64, c_farad: f64, dt_s: f64) -> f64 {
    let tau = r_ohm * c_farad;
    let decay = if tau > 0.0 { (-dt_s / tau).exp() } else { 0.0 };
    v * decay + current_a * r_ohm * (1.0 - decay)
}
