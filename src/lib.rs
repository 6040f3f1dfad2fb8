//! Automatic polar alignment for a two-axis motorised mount adjuster.
//!
//! Plate-solving software logs the remaining polar-alignment error; this crate
//! tails that log, converts each reading into motor steps with the
//! controller's calibration and drives the altitude/azimuth motors over a
//! serial link until the error is below target.

pub mod calibration;
pub mod config;
pub mod correction;
pub mod link;
pub mod solver_log;

pub type Result<T> = anyhow::Result<T>;
