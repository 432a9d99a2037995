//! Runtime configuration for the hardware controller.
//!
//! These are the structs `HardwareApi` reads at run time. They are separate
//! from the TOML-deserialized config in `pipetter_config`; see
//! `conversions.rs` for the mapping.

use pipetter_traits::{Mount, Point};

use crate::types::MotionChecks;

/// Fixed robot geometry and currents.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotCfg {
    /// Left carriage relative to the right one.
    pub left_mount_offset: Point,
    pub gripper_mount_offset: Point,
    /// Z of the MOUNT critical point, used when no instrument is attached.
    pub mount_critical_point_z: f64,
    pub z_retract_distance: f64,
    /// Margin for the retract before switching mounts.
    pub retract_margin: f64,
    pub z_run_current: f64,
    pub plunger_run_current: f64,
}

impl Default for RobotCfg {
    fn default() -> Self {
        Self {
            left_mount_offset: Point::new(-34.0, 0.0, 0.0),
            gripper_mount_offset: Point::new(84.55, -12.75, 93.85),
            mount_critical_point_z: 30.0,
            z_retract_distance: 2.0,
            retract_margin: 10.0,
            z_run_current: 0.8,
            plunger_run_current: 0.5,
        }
    }
}

impl RobotCfg {
    /// Offset of a mount relative to the right carriage.
    pub fn mount_offset(&self, mount: Mount) -> Point {
        match mount {
            Mount::Left => self.left_mount_offset,
            Mount::Right => Point::ZERO,
            Mount::Gripper => self.gripper_mount_offset,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionCfg {
    pub checks: MotionChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GateCfg {
    /// Skip the execution gate when the backend is a simulator.
    pub bypass_when_simulating: bool,
}

/// Optional hardware capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureCfg {
    pub gripper: bool,
}
