//! Gripper state: identity, offset, jaw state and critical points.

use std::sync::Arc;

use pipetter_config::GripperConfig;
use pipetter_traits::{InstrumentOffset, Mount, Point};
use serde::Serialize;

use crate::error::{HardwareError, Result, fail};
use crate::types::{CriticalPoint, GripperJawState};

#[derive(Debug, Clone, PartialEq)]
pub struct Gripper {
    config: Arc<GripperConfig>,
    id: Option<String>,
    offset: InstrumentOffset,
    jaw_state: GripperJawState,
    /// Per-side jaw travel from fully open, in mm.
    jaw_displacement: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GripperInfo {
    pub name: String,
    pub model: String,
    pub gripper_id: Option<String>,
    pub jaw_state: GripperJawState,
    pub jaw_width: f64,
}

impl Gripper {
    pub fn new(config: Arc<GripperConfig>, offset: InstrumentOffset, id: Option<String>) -> Self {
        Self {
            config,
            id,
            offset,
            jaw_state: GripperJawState::Unhomed,
            jaw_displacement: 0.0,
        }
    }

    pub fn config(&self) -> &GripperConfig {
        &self.config
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn offset(&self) -> &InstrumentOffset {
        &self.offset
    }

    pub fn set_offset(&mut self, offset: InstrumentOffset) {
        self.offset = offset;
    }

    pub fn jaw_state(&self) -> GripperJawState {
        self.jaw_state
    }

    pub fn set_jaw_state(&mut self, s: GripperJawState) {
        self.jaw_state = s;
    }

    pub fn jaw_width(&self) -> f64 {
        self.config.jaw_width_max - 2.0 * self.jaw_displacement
    }

    pub fn set_jaw_displacement(&mut self, mm: f64) {
        self.jaw_displacement = mm.clamp(0.0, self.config.max_jaw_displacement());
    }

    /// Jaw displacement that holds the jaws `width` mm apart.
    pub fn displacement_for_width(&self, width: f64) -> Result<f64> {
        let c = &self.config;
        if !(c.jaw_width_min..=c.jaw_width_max).contains(&width) {
            return fail(HardwareError::precondition(format!(
                "jaw width {width} outside [{}, {}]",
                c.jaw_width_min, c.jaw_width_max
            )));
        }
        Ok((c.jaw_width_max - width) / 2.0)
    }

    pub fn check_ready_for_jaw_move(&self) -> Result<()> {
        if self.jaw_state == GripperJawState::Unhomed {
            return fail(HardwareError::precondition(
                "gripper jaw must be homed before it can move",
            ));
        }
        Ok(())
    }

    /// Offset from the gripper mount to `cp`. Defaults to the jaw center.
    pub fn critical_point(&self, cp: Option<CriticalPoint>) -> Result<Point> {
        let cal = self.offset.offset;
        let shift = self.jaw_displacement - self.config.max_jaw_displacement();
        match cp.unwrap_or(CriticalPoint::GripperJawCenter) {
            CriticalPoint::GripperJawCenter | CriticalPoint::XyCenter => {
                Ok(Point::from(self.config.jaw_center_offset) + cal)
            }
            CriticalPoint::GripperFrontCalibrationPin => {
                Ok(Point::from(self.config.front_pin_offset) + cal + Point::new(0.0, shift, 0.0))
            }
            CriticalPoint::GripperRearCalibrationPin => {
                Ok(Point::from(self.config.rear_pin_offset) + cal - Point::new(0.0, shift, 0.0))
            }
            other => fail(HardwareError::InvalidCriticalPoint {
                mount: Mount::Gripper,
                cp: other,
            }),
        }
    }

    pub fn info(&self) -> GripperInfo {
        GripperInfo {
            name: self.config.name.clone(),
            model: self.config.model.clone(),
            gripper_id: self.id.clone(),
            jaw_state: self.jaw_state,
            jaw_width: self.jaw_width(),
        }
    }
}
