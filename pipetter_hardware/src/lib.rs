//! Backends for the pipetting control core.
//!
//! Only the simulator lives here for now: [`SimulatedBackend`] for motion and
//! instrument detection, and [`SimulatedModules`] for deck modules.

pub mod error;
pub mod modules;
pub mod sim;

pub use modules::SimulatedModules;
pub use sim::{SimulatedBackend, SimulatedBackendBuilder};
