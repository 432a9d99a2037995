//! `From` implementations bridging `pipetter_config` types to `pipetter_core` types.

use pipetter_traits::Point;

use crate::config::{FeatureCfg, GateCfg, MotionCfg, RobotCfg};

impl From<&pipetter_config::Robot> for RobotCfg {
    fn from(c: &pipetter_config::Robot) -> Self {
        Self {
            left_mount_offset: Point::from(c.left_mount_offset),
            gripper_mount_offset: Point::from(c.gripper_mount_offset),
            mount_critical_point_z: c.mount_critical_point_z,
            z_retract_distance: c.z_retract_distance,
            retract_margin: c.retract_margin,
            z_run_current: c.z_run_current,
            plunger_run_current: c.plunger_run_current,
        }
    }
}

impl From<&pipetter_config::Motion> for MotionCfg {
    fn from(c: &pipetter_config::Motion) -> Self {
        Self {
            checks: c.bounds_check.into(),
        }
    }
}

impl From<&pipetter_config::Execution> for GateCfg {
    fn from(c: &pipetter_config::Execution) -> Self {
        Self {
            bypass_when_simulating: c.bypass_gate_when_simulating,
        }
    }
}

impl From<&pipetter_config::Features> for FeatureCfg {
    fn from(c: &pipetter_config::Features) -> Self {
        Self { gripper: c.gripper }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MotionChecks;

    #[test]
    fn defaults_agree_with_file_defaults() {
        let file = pipetter_config::Config::default();
        assert_eq!(RobotCfg::from(&file.robot), RobotCfg::default());
        assert_eq!(MotionCfg::from(&file.motion).checks, MotionChecks::Both);
        assert!(!GateCfg::from(&file.execution).bypass_when_simulating);
    }

    #[test]
    fn bounds_policy_maps_through() {
        let cfg = pipetter_config::load_toml("[motion]\nbounds_check = \"low\"\n").unwrap();
        assert_eq!(MotionCfg::from(&cfg.motion).checks, MotionChecks::Low);
    }
}
