#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Motion and liquid-handling control core (hardware-agnostic).
//!
//! All hardware interactions go through the `pipetter_traits::Backend`,
//! `ModuleProvider` and `CalibrationStorage` traits. [`HardwareApi`] is the
//! surface a protocol layer drives.
//!
//! ## Architecture
//!
//! - **Transform**: deck/machine conversion through the calibrated attitude (`transform`)
//! - **Positions**: last-known machine positions and the motion lock (`position`)
//! - **Gate**: pause, resume and cancellation of in-flight work (`gate`)
//! - **Motion**: target construction and bounds checks (`motion`)
//! - **Instruments**: pipette and gripper state, ul-per-mm conversion (`instrument`)
//! - **Liquid**: aspirate/dispense/tip-handling plans (`liquid`)
//! - **Reconcile**: instrument rescans against cached state (`reconcile`)
//!
//! ## Coordinates
//!
//! Callers speak deck coordinates in mm. The backend speaks machine
//! coordinates keyed by axis code; plunger and jaw axes are never transformed.

// Module declarations
pub mod api;
pub mod atomic;
pub mod builder;
pub mod calibration;
pub mod config;
mod conversions;
pub mod error;
pub mod gate;
pub mod hw_error;
pub mod instrument;
pub mod liquid;
pub mod mocks;
pub mod motion;
pub mod position;
pub mod reconcile;
pub mod transform;
pub mod types;
pub mod util;

pub use api::{HardwareApi, MoveOptions};
pub use builder::{BackendPort, HardwareApiBuilder, Missing, Set};
pub use calibration::{FileCalibrationStore, InMemoryCalibrationStore};
pub use config::{FeatureCfg, GateCfg, MotionCfg, RobotCfg};
pub use error::{BuildError, HardwareError, Report, Result};
pub use gate::{CancelToken, ExecutionGate, PauseState};
pub use instrument::{Gripper, GripperInfo, Pipette, PipetteInfo};
pub use transform::{Attitude, DeckCalibration, DeckTransformState};
pub use types::{
    Axis, CriticalPoint, GripperJawState, HardwareAction, MotionChecks, PauseType, Position,
};
