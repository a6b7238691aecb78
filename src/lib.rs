//! # BMS Software-in-the-Loop Plant
//!
//! Stands in for a 16S LiFePO4 battery pack and its analog front-end so that
//! BMS firmware can be exercised without physical cells.
//!
//! ## Features
//!
//! - **Cell model**: 2RC equivalent circuit with OCV hysteresis, temperature
//!   dependence, lumped thermal model and cycle/calendar aging
//! - **Pack model**: 16 series cells with seeded manufacturing variation,
//!   neighbour thermal coupling and per-cell value overrides
//! - **AFE emulation**: calibration error, Gaussian noise, ADC quantization,
//!   fault injection on a simulated-time schedule and a status bitmask
//! - **Deterministic**: every random draw comes from a generator owned by the
//!   instance and seeded by the caller
//!
//! ## Quick Start
//!
//! ```rust
//! use bms_sil::afe::{AfeConfig, AfeEmulator};
//! use bms_sil::plant::{BatteryPack, PackConfig};
//!
//! let mut pack = BatteryPack::new(PackConfig::default(), 42).unwrap();
//! let mut afe = AfeEmulator::new(AfeConfig::default(), 43).unwrap();
//!
//! // One 100 ms step at 50 A discharge
//! pack.update(-50_000.0, 100.0, None);
//! let measurement = afe.apply_measurement(
//!     &pack.get_cell_voltages(),
//!     &pack.get_cell_temperatures(),
//!     pack.get_pack_current(),
//!     100.0,
//! );
//! assert_eq!(measurement.cell_voltages_mv.len(), 16);
//! ```
//!
//! ## Architecture
//!
//! - [`plant`] - Cell and pack physics
//! - [`afe`] - Measurement chain and fault injection
//! - [`profile`] - Pack current profiles
//! - [`runner`] - Closed loop driving plant and AFE on a simulated clock
//! - [`config`] - JSON run configuration
//! - [`checkpoint`] - Saved cell parameter sets

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]

pub mod afe;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod frame;
pub mod plant;
pub mod profile;
pub mod runner;

// Re-export main public types for convenience
pub use afe::{AfeConfig, AfeEmulator, AfeFaultKind, AfeMeasurement};
pub use config::SimConfig;
pub use error::{Result, SimError};
pub use frame::{describe_status_flags, MeasurementFrame};
pub use plant::{BatteryPack, LiFePo4Cell, PackConfig};
pub use profile::CurrentProfile;
pub use runner::SilRunner;
