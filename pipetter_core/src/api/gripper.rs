//! Gripper jaw control.

use super::HardwareApi;
use crate::error::{HardwareError, Result, fail};
use crate::instrument::Gripper;
use crate::types::{Axis, GripperJawState, Position};

/// Upper bound on the jaw motor current, in amps.
const MAX_JAW_CURRENT: f64 = 1.5;

impl HardwareApi {
    fn gripper(&self) -> Result<Gripper> {
        self.require_gripper_capability()?;
        match &self.slots().gripper {
            Some(g) => Ok(g.clone()),
            None => fail(HardwareError::InstrumentNotAttached {
                mount: pipetter_traits::Mount::Gripper,
            }),
        }
    }

    fn set_jaw(&self, state: GripperJawState, displacement: f64) {
        if let Some(g) = self.slots().gripper.as_mut() {
            g.set_jaw_displacement(displacement);
            g.set_jaw_state(state);
        }
    }

    async fn move_jaw(&self, displacement: f64, current: Option<f64>) -> Result<()> {
        let guard = self.motion_lock.acquire().await;
        if let Some(c) = current {
            self.set_current(&Position::from([(Axis::G, c)])).await?;
        }
        self.direct_move_locked(&guard, &Position::from([(Axis::G, displacement)]), None)
            .await
    }

    pub async fn home_gripper_jaw(&self) -> Result<()> {
        self.gripper()?;
        self.home(Some(&[Axis::G])).await
    }

    /// Close the jaws. `force` in newtons scales the grip current from the definition default.
    pub async fn grip(&self, force: Option<f64>) -> Result<()> {
        self.check_gate().await?;
        let g = self.gripper()?;
        g.check_ready_for_jaw_move()?;
        let cfg = g.config();
        let force = force.unwrap_or(cfg.default_grip_force);
        if !(force.is_finite() && force > 0.0) {
            return fail(HardwareError::precondition(format!(
                "grip force must be > 0, got {force}"
            )));
        }
        let current = (cfg.grip_current * force / cfg.default_grip_force).min(MAX_JAW_CURRENT);
        let closed = cfg.max_jaw_displacement();
        tracing::debug!(force, current, "gripping");
        self.move_jaw(closed, Some(current)).await?;
        self.set_jaw(GripperJawState::Gripping, closed);
        Ok(())
    }

    /// Open the jaws fully.
    pub async fn ungrip(&self) -> Result<()> {
        self.check_gate().await?;
        let g = self.gripper()?;
        g.check_ready_for_jaw_move()?;
        self.move_jaw(0.0, None).await?;
        self.set_jaw(GripperJawState::HomedReady, 0.0);
        Ok(())
    }

    /// Hold the jaws `width` mm apart.
    pub async fn hold_jaw_width(&self, width: f64) -> Result<()> {
        self.check_gate().await?;
        let g = self.gripper()?;
        g.check_ready_for_jaw_move()?;
        let displacement = g.displacement_for_width(width)?;
        self.move_jaw(displacement, None).await?;
        self.set_jaw(GripperJawState::HoldingClosed, displacement);
        Ok(())
    }
}
