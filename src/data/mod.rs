//! Persistence of sweep results.
//!
//! - [`storage`]: the [`DataRecorder`] owning the operating-point table and the
//!   per-point raw and network files
//! - [`touchstone`]: the two-port Touchstone codec

pub mod storage;
pub mod touchstone;

pub use storage::{load_operating_points, network_path, raw_capture_path, DataRecorder};
pub use touchstone::{read_touchstone, write_touchstone, Network2Port};
