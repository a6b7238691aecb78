//! 16S pack of LiFePO4 cells.
//!
//! All cells carry the same series current. Manufacturing variation is drawn
//! once at construction from a single seeded generator, so a pack built with
//! the same seed and configuration is bit-for-bit reproducible.

use super::cell::{CellConfig, CellParameters, LiFePo4Cell};
use super::{Plant, NUM_CELLS};
use crate::error::{Result, SimError};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;

const CAPACITY_VARIATION_LIMIT: f64 = 0.02;

/// How the pack-level SOC is derived from the cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SocMode {
    #[default]
    Minimum,
    Average,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackConfig {
    pub cell_capacity_ah: f64,
    pub initial_soc_pct: f64,
    pub ambient_temp_c: f64,
    /// Capacity mismatch standard deviation (% of nominal)
    pub capacity_variation_sigma_pct: f64,
    /// Initial SOC spread standard deviation (% SOC)
    pub soc_variation_sigma_pct: f64,
    /// R0 variation, uniform within +/- this fraction
    pub resistance_variation_fraction: f64,
    pub thermal_coupling_coeff: f64,
    #[serde(rename = "soc_calculation_mode")]
    pub soc_mode: SocMode,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            cell_capacity_ah: 100.0,
            initial_soc_pct: 50.0,
            ambient_temp_c: 25.0,
            capacity_variation_sigma_pct: 0.4,
            soc_variation_sigma_pct: 0.25,
            resistance_variation_fraction: 0.025,
            thermal_coupling_coeff: 0.1,
            soc_mode: SocMode::Minimum,
        }
    }
}

impl PackConfig {
    /// Identical cells: no capacity, SOC or resistance spread.
    pub fn uniform() -> Self {
        Self {
            capacity_variation_sigma_pct: 0.0,
            soc_variation_sigma_pct: 0.0,
            resistance_variation_fraction: 0.0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.capacity_variation_sigma_pct >= 0.0 && self.soc_variation_sigma_pct >= 0.0) {
            return Err(SimError::invalid("variation sigma must be non-negative"));
        }
        if !(0.0..1.0).contains(&self.resistance_variation_fraction) {
            return Err(SimError::invalid("resistance variation fraction must be in [0, 1)"));
        }
        if self.thermal_coupling_coeff < 0.0 {
            return Err(SimError::invalid("thermal coupling coefficient must be non-negative"));
        }
        Ok(())
    }
}

/// Min/max/spread statistics across the cells.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellImbalance {
    pub min_voltage_mv: f64,
    pub max_voltage_mv: f64,
    pub voltage_delta_mv: f64,
    pub voltage_std_mv: f64,
    pub min_soc_pct: f64,
    pub max_soc_pct: f64,
    pub soc_delta_pct: f64,
    pub soc_std_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackState {
    pub pack_voltage_mv: f64,
    pub pack_current_ma: f64,
    pub pack_soc_pct: f64,
    pub cell_voltages_mv: [f64; NUM_CELLS],
    pub cell_temperatures_c: [f64; NUM_CELLS],
    pub cell_socs_pct: [f64; NUM_CELLS],
    pub imbalance: CellImbalance,
    pub ambient_temp_c: f64,
    pub cycles: u32,
}

#[derive(Debug, Clone)]
pub struct BatteryPack {
    config: PackConfig,
    cells: Vec<LiFePo4Cell>,
    capacity_variation: [f64; NUM_CELLS],
    resistance_variation: [f64; NUM_CELLS],
    fault_voltages_mv: [Option<f64>; NUM_CELLS],
    fault_temperatures_c: [Option<f64>; NUM_CELLS],
    pack_current_ma: f64,
    ambient_temp_c: f64,
    cycles: u32,
}

impl BatteryPack {
    /// Build a pack whose cell variation is drawn from a generator seeded with `seed`.
    pub fn new(config: PackConfig, seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self::with_rng(config, CellParameters::default(), &mut rng)
    }

    /// Build a pack from restored cell characterization constants.
    pub fn with_parameters(config: PackConfig, params: CellParameters, seed: u64) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Self::with_rng(config, params, &mut rng)
    }

    /// Build a pack drawing variation from a caller-supplied generator.
    ///
    /// Draw order: 16 capacity samples, 16 SOC samples, 16 resistance samples.
    pub fn with_rng<R: Rng>(config: PackConfig, params: CellParameters, rng: &mut R) -> Result<Self> {
        config.validate()?;
        params.validate()?;

        let capacity_dist = normal(1.0, config.capacity_variation_sigma_pct / 100.0)?;
        let soc_dist = normal(0.0, config.soc_variation_sigma_pct / 100.0)?;

        let mut capacity_variation = [1.0; NUM_CELLS];
        for value in &mut capacity_variation {
            *value = capacity_dist
                .sample(rng)
                .clamp(1.0 - CAPACITY_VARIATION_LIMIT, 1.0 + CAPACITY_VARIATION_LIMIT);
        }

        let mut initial_soc = [0.0; NUM_CELLS];
        for value in &mut initial_soc {
            *value = (config.initial_soc_pct / 100.0 + soc_dist.sample(rng)).clamp(0.0, 1.0);
        }

        let spread = config.resistance_variation_fraction;
        let mut resistance_variation = [1.0; NUM_CELLS];
        for value in &mut resistance_variation {
            *value = rng.gen_range((1.0 - spread)..=(1.0 + spread));
        }

        let cells = (0..NUM_CELLS)
            .map(|i| {
                LiFePo4Cell::with_parameters(
                    CellConfig {
                        capacity_ah: config.cell_capacity_ah * capacity_variation[i],
                        initial_soc: initial_soc[i],
                        temperature_c: config.ambient_temp_c,
                        ambient_temp_c: config.ambient_temp_c,
                        cycles: 0,
                        resistance_multiplier: resistance_variation[i],
                    },
                    params.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            cells = NUM_CELLS,
            initial_soc_pct = config.initial_soc_pct,
            "battery pack constructed"
        );

        Ok(Self {
            ambient_temp_c: config.ambient_temp_c,
            config,
            cells,
            capacity_variation,
            resistance_variation,
            fault_voltages_mv: [None; NUM_CELLS],
            fault_temperatures_c: [None; NUM_CELLS],
            pack_current_ma: 0.0,
            cycles: 0,
        })
    }

    /// Advance every cell with the same series current, then couple adjacent
    /// cells thermally.
    pub fn update(&mut self, current_ma: f64, dt_ms: f64, ambient_temp_c: Option<f64>) {
        if let Some(ambient) = ambient_temp_c {
            self.ambient_temp_c = ambient;
        }
        self.pack_current_ma = current_ma;

        for (cell, forced_temp) in self.cells.iter_mut().zip(self.fault_temperatures_c.iter()) {
            cell.update(current_ma, dt_ms, *forced_temp, Some(self.ambient_temp_c));
        }

        self.apply_thermal_coupling(dt_ms);
    }

    fn apply_thermal_coupling(&mut self, dt_ms: f64) {
        if self.config.thermal_coupling_coeff == 0.0 {
            return;
        }

        let dt_s = dt_ms.max(0.0) / 1000.0;
        let temps: Vec<f64> = self.cells.iter().map(LiFePo4Cell::temperature_c).collect();

        // One exchange per adjacent pair; positive flow goes from i into i + 1
        let mut heat_j = [0.0; NUM_CELLS];
        for i in 0..NUM_CELLS - 1 {
            let flow = self.config.thermal_coupling_coeff * (temps[i] - temps[i + 1]) * dt_s;
            heat_j[i] -= flow;
            heat_j[i + 1] += flow;
        }

        for (i, cell) in self.cells.iter_mut().enumerate() {
            if self.fault_temperatures_c[i].is_none() {
                let delta_c = heat_j[i] / cell.parameters().thermal_mass_j_per_c;
                cell.exchange_heat(delta_c);
            }
        }
    }

    fn check_index(index: usize) -> Result<()> {
        if index >= NUM_CELLS {
            return Err(SimError::IndexOutOfRange { index, len: NUM_CELLS });
        }
        Ok(())
    }

    /// Cell terminal voltages in mV; voltage overrides are reported verbatim.
    pub fn get_cell_voltages(&self) -> [f64; NUM_CELLS] {
        let mut voltages = [0.0; NUM_CELLS];
        for (i, cell) in self.cells.iter().enumerate() {
            voltages[i] = self.fault_voltages_mv[i].unwrap_or_else(|| cell.terminal_voltage_mv());
        }
        voltages
    }

    /// Cell temperatures in °C; temperature overrides are reported verbatim.
    pub fn get_cell_temperatures(&self) -> [f64; NUM_CELLS] {
        let mut temps = [0.0; NUM_CELLS];
        for (i, cell) in self.cells.iter().enumerate() {
            temps[i] = self.fault_temperatures_c[i].unwrap_or_else(|| cell.temperature_c());
        }
        temps
    }

    pub fn get_cell_socs(&self) -> [f64; NUM_CELLS] {
        let mut socs = [0.0; NUM_CELLS];
        for (soc, cell) in socs.iter_mut().zip(&self.cells) {
            *soc = cell.soc_pct();
        }
        socs
    }

    pub fn get_pack_voltage(&self) -> f64 {
        self.get_cell_voltages().iter().sum()
    }

    pub fn get_pack_current(&self) -> f64 {
        self.pack_current_ma
    }

    pub fn get_pack_soc(&self) -> f64 {
        let socs = self.get_cell_socs();
        match self.config.soc_mode {
            SocMode::Minimum => socs.iter().copied().fold(f64::INFINITY, f64::min),
            SocMode::Average => mean(&socs),
        }
    }

    pub fn get_cell_imbalance(&self) -> CellImbalance {
        let voltages = self.get_cell_voltages();
        let socs = self.get_cell_socs();
        let (min_v, max_v) = min_max(&voltages);
        let (min_soc, max_soc) = min_max(&socs);

        CellImbalance {
            min_voltage_mv: min_v,
            max_voltage_mv: max_v,
            voltage_delta_mv: max_v - min_v,
            voltage_std_mv: std_dev(&voltages),
            min_soc_pct: min_soc,
            max_soc_pct: max_soc,
            soc_delta_pct: max_soc - min_soc,
            soc_std_pct: std_dev(&socs),
        }
    }

    /// Force a cell's reported voltage (mV), or clear the override with `None`.
    pub fn set_cell_voltage(&mut self, index: usize, voltage_mv: Option<f64>) -> Result<()> {
        Self::check_index(index)?;
        self.fault_voltages_mv[index] = voltage_mv;
        debug!(cell = index, ?voltage_mv, "cell voltage override");
        Ok(())
    }

    /// Force a cell's temperature (°C), or clear the override with `None`.
    pub fn set_cell_temperature(&mut self, index: usize, temperature_c: Option<f64>) -> Result<()> {
        Self::check_index(index)?;
        self.fault_temperatures_c[index] = temperature_c;
        debug!(cell = index, ?temperature_c, "cell temperature override");
        Ok(())
    }

    pub fn clear_all_faults(&mut self) {
        self.fault_voltages_mv = [None; NUM_CELLS];
        self.fault_temperatures_c = [None; NUM_CELLS];
    }

    /// Apply cycle aging to every cell.
    pub fn set_aging(&mut self, cycles: u32) {
        for cell in &mut self.cells {
            cell.set_aging(cycles, None);
        }
        self.cycles = cycles;
    }

    /// Reset every cell (optionally to a common SOC % and temperature), clear
    /// overrides and zero the pack current. Manufacturing variation is kept.
    pub fn reset(&mut self, soc_pct: Option<f64>, temperature_c: Option<f64>) {
        for cell in &mut self.cells {
            cell.reset(soc_pct, temperature_c);
        }
        self.clear_all_faults();
        self.pack_current_ma = 0.0;
    }

    pub fn cell(&self, index: usize) -> Result<&LiFePo4Cell> {
        Self::check_index(index)?;
        Ok(&self.cells[index])
    }

    pub fn cells(&self) -> &[LiFePo4Cell] {
        &self.cells
    }

    pub fn capacity_variation(&self) -> &[f64; NUM_CELLS] {
        &self.capacity_variation
    }

    pub fn resistance_variation(&self) -> &[f64; NUM_CELLS] {
        &self.resistance_variation
    }

    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    pub fn ambient_temp_c(&self) -> f64 {
        self.ambient_temp_c
    }
}

impl Plant for BatteryPack {
    type State = PackState;

    fn step(&mut self, current_ma: f64, dt_ms: f64) {
        self.update(current_ma, dt_ms, None);
    }

    fn get_state(&self) -> Self::State {
        PackState {
            pack_voltage_mv: self.get_pack_voltage(),
            pack_current_ma: self.pack_current_ma,
            pack_soc_pct: self.get_pack_soc(),
            cell_voltages_mv: self.get_cell_voltages(),
            cell_temperatures_c: self.get_cell_temperatures(),
            cell_socs_pct: self.get_cell_socs(),
            imbalance: self.get_cell_imbalance(),
            ambient_temp_c: self.ambient_temp_c,
            cycles: self.cycles,
        }
    }
}

fn normal(mean: f64, std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(mean, std_dev).map_err(|e| SimError::invalid(format!("bad distribution: {}", e)))
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}
