//! Instrument controllers.
//!
//! Each controller owns one [`InstrumentSession`](crate::session::InstrumentSession)
//! and translates sweep operations into that instrument's command set:
//! - [`VnaController`] for an HP 8510-series network analyzer
//! - [`PowerSupply`] for a SCPI regulated DC supply

pub mod power_supply;
pub mod vna;

pub use power_supply::PowerSupply;
pub use vna::VnaController;
