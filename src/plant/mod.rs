pub mod aging;
pub mod cell;
pub mod ocv;
pub mod pack;

pub use aging::{AgingInputs, AgingOutcome, AgingParameters};
pub use cell::{CellConfig, CellParameters, CellSnapshot, CellState, LiFePo4Cell};
pub use ocv::OcvTables;
pub use pack::{BatteryPack, CellImbalance, PackConfig, PackState, SocMode};

use serde::{Deserialize, Serialize};
use static_assertions::const_assert;

/// Number of series-connected cells in the pack.
pub const NUM_CELLS: usize = 16;

// Per-cell fault masks are u16 bitfields.
const_assert!(NUM_CELLS <= 16);

/// Currents with magnitude below this are treated as rest (mA).
pub const REST_CURRENT_THRESHOLD_MA: f64 = 1.0;

/// Current flow classification used for OCV hysteresis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CurrentDirection {
    Charging,
    Discharging,
    #[default]
    Resting,
}

impl CurrentDirection {
    /// Classify a signed current (positive = charge) with a dead-zone around zero.
    pub fn from_current_ma(current_ma: f64) -> Self {
        if current_ma >= REST_CURRENT_THRESHOLD_MA {
            CurrentDirection::Charging
        } else if current_ma <= -REST_CURRENT_THRESHOLD_MA {
            CurrentDirection::Discharging
        } else {
            CurrentDirection::Resting
        }
    }

    pub fn is_resting(self) -> bool {
        self == CurrentDirection::Resting
    }
}

/// A plant element that can be stepped by a current profile.
pub trait Plant {
    type State: Clone + Serialize;

    /// Advance the plant by `dt_ms` with `current_ma` flowing (positive = charge).
    fn step(&mut self, current_ma: f64, dt_ms: f64);
    fn get_state(&self) -> Self::State;
}
