#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and instrument definitions for the pipetting robot.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `instrument` holds pipette/gripper definitions, the embedded built-ins
//!   and the strict-header ul-per-mm CSV loader.
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub mod instrument;

pub use instrument::{
    FlowRates, GripperConfig, InstrumentConfig, MountHardware, PickUpCfg, PlungerCurrents,
    PlungerPositions, Quirk, UlPerMm, VolumeBreakpoint, builtin_gripper, builtin_pipette,
    builtin_pipette_models, load_instrument_file, load_ul_per_mm_csv,
};

/// Upper limit accepted for any configured motor current (amps).
pub const MAX_CURRENT_A: f64 = 2.5;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Robot {
    /// Left carriage offset relative to the right one (mm).
    pub left_mount_offset: [f64; 3],
    /// Gripper carriage offset relative to the right pipette mount (mm).
    pub gripper_mount_offset: [f64; 3],
    /// Height of the MOUNT critical point when no pipette is attached.
    pub mount_critical_point_z: f64,
    pub z_retract_distance: f64,
    /// Margin used when retracting the previously moved mount.
    pub retract_margin: f64,
    /// Z current restored after tip pick-up presses.
    pub z_run_current: f64,
    /// Plunger current used when no pipette-specific value applies.
    pub plunger_run_current: f64,
}

impl Default for Robot {
    fn default() -> Self {
        Self {
            left_mount_offset: [-34.0, 0.0, 0.0],
            gripper_mount_offset: [84.55, -12.75, 93.85],
            mount_critical_point_z: 30.0,
            z_retract_distance: 2.0,
            retract_margin: 10.0,
            z_run_current: 0.8,
            plunger_run_current: 0.5,
        }
    }
}

/// Which directions of an axis-bounds violation abort a move.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BoundsCheck {
    None,
    Low,
    High,
    #[default]
    Both,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Motion {
    pub bounds_check: BoundsCheck,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Execution {
    /// Skip pause/cancel checks when the backend is a simulator.
    pub bypass_gate_when_simulating: bool,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Features {
    /// Enable the gripper mount and its jaw/Z axes.
    pub gripper: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SimInstrument {
    pub model: String,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Simulation {
    pub left: Option<SimInstrument>,
    pub right: Option<SimInstrument>,
    pub gripper: Option<SimInstrument>,
    /// Module names reported as attached (e.g. "tempdeck").
    pub modules: Vec<String>,
    /// Per-axis `[min, max]` overrides keyed by axis code.
    pub axis_bounds: BTreeMap<String, [f64; 2]>,
    /// Artificial latency per simulated move (ms).
    pub move_delay_ms: u64,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Directory for per-instrument offset files. In-memory storage when absent.
    pub dir: Option<PathBuf>,
    /// Persisted deck attitude (row-major 3x3); identity when absent.
    pub attitude: Option<[[f64; 3]; 3]>,
    pub translation: [f64; 3],
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub robot: Robot,
    #[serde(default)]
    pub motion: Motion,
    #[serde(default)]
    pub execution: Execution,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub simulation: Simulation,
    #[serde(default)]
    pub calibration: CalibrationCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn check_point(name: &str, p: &[f64; 3]) -> eyre::Result<()> {
    if p.iter().any(|v| !v.is_finite()) {
        eyre::bail!("{name} must contain finite values");
    }
    Ok(())
}

fn check_current(name: &str, amps: f64) -> eyre::Result<()> {
    if !(0.0..=MAX_CURRENT_A).contains(&amps) {
        eyre::bail!("{name} must be in [0.0, {MAX_CURRENT_A}] A");
    }
    Ok(())
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Robot geometry
        check_point("robot.left_mount_offset", &self.robot.left_mount_offset)?;
        check_point("robot.gripper_mount_offset", &self.robot.gripper_mount_offset)?;
        if !self.robot.mount_critical_point_z.is_finite() {
            eyre::bail!("robot.mount_critical_point_z must be finite");
        }
        if self.robot.z_retract_distance < 0.0 {
            eyre::bail!("robot.z_retract_distance must be >= 0");
        }
        if self.robot.retract_margin < 0.0 {
            eyre::bail!("robot.retract_margin must be >= 0");
        }
        check_current("robot.z_run_current", self.robot.z_run_current)?;
        check_current("robot.plunger_run_current", self.robot.plunger_run_current)?;

        // Calibration
        if let Some(att) = &self.calibration.attitude {
            if att.iter().flatten().any(|v| !v.is_finite()) {
                eyre::bail!("calibration.attitude must contain finite values");
            }
            if det3(att).abs() < 1e-9 {
                eyre::bail!("calibration.attitude is singular (determinant ~ 0)");
            }
        }
        check_point("calibration.translation", &self.calibration.translation)?;

        // Simulation
        for (slot, inst) in [
            ("simulation.left", &self.simulation.left),
            ("simulation.right", &self.simulation.right),
        ] {
            if let Some(i) = inst {
                if builtin_pipette(&i.model).is_err() {
                    eyre::bail!("{slot}.model '{}' is not a known pipette", i.model);
                }
            }
        }
        if let Some(g) = &self.simulation.gripper {
            if !self.features.gripper {
                eyre::bail!("simulation.gripper requires features.gripper = true");
            }
            if builtin_gripper(&g.model).is_err() {
                eyre::bail!("simulation.gripper.model '{}' is not a known gripper", g.model);
            }
        }
        for (axis, [lo, hi]) in &self.simulation.axis_bounds {
            if !(lo.is_finite() && hi.is_finite()) || lo >= hi {
                eyre::bail!("simulation.axis_bounds.{axis} must satisfy min < max");
            }
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref() {
            if !matches!(r, "never" | "daily" | "hourly") {
                eyre::bail!("logging.rotation must be one of never|daily|hourly, got '{r}'");
            }
        }
        Ok(())
    }
}
