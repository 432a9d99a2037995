//! Aspirate, dispense, blow-out and tip handling.
//!
//! A failed aspirate or dispense leaves the held volume unknown, so it is
//! reset to zero. Blow-out and drop-tip clear their state whether or not
//! the motion completed.

use pipetter_traits::{Mount, Point};

use super::HardwareApi;
use crate::error::{HardwareError, Result, fail};
use crate::instrument::Pipette;
use crate::liquid::{
    DropTipSpec, LiquidActionSpec, check_rate, pair, plan_aspirate, plan_blow_out, plan_dispense,
    plan_drop_tip, plan_pick_up_tip, plan_prepare_for_aspirate,
};
use crate::position::MotionGuard;
use crate::types::{Axis, Position};

fn check_pair(mounts: [Mount; 2]) -> Result<()> {
    if mounts[0] == mounts[1] || mounts.contains(&Mount::Gripper) {
        return fail(HardwareError::precondition(format!(
            "paired liquid handling needs both pipette mounts, got {mounts:?}"
        )));
    }
    Ok(())
}

fn plunger_of(mount: Mount) -> Result<Axis> {
    match Axis::of_plunger(mount) {
        Some(a) => Ok(a),
        None => fail(HardwareError::InstrumentNotAttached { mount }),
    }
}

impl HardwareApi {
    /// Set currents and move every plunger in one backend call. The slowest speed wins.
    async fn run_plunger_actions(
        &self,
        guard: &MotionGuard<'_>,
        specs: &[&LiquidActionSpec],
    ) -> Result<()> {
        let currents: Position = specs.iter().map(|s| (s.axis, s.current)).collect();
        self.set_current(&currents).await?;
        let target: Position = specs.iter().map(|s| (s.axis, s.plunger_target)).collect();
        let speed = specs.iter().map(|s| s.speed).fold(f64::INFINITY, f64::min);
        self.direct_move_locked(guard, &target, speed.is_finite().then_some(speed))
            .await
    }

    /// Post-motion bookkeeping that must not mask the motion's own result.
    fn clear_state(&self, mount: Mount, what: &str, f: impl FnOnce(&mut Pipette)) {
        let res = self.with_pipette(mount, |p| {
            f(p);
            Ok(())
        });
        if let Err(e) = res {
            tracing::warn!(%mount, error = %e, "could not clear pipette state after {what}");
        }
    }

    fn forget_volume(&self, mount: Mount) {
        if let Err(e) = self.with_pipette(mount, |p| p.set_current_volume(0.0)) {
            tracing::warn!(%mount, error = %e, "could not reset volume after failed plunger move");
        }
    }

    /// Move the plunger to its bottom stop so the next aspirate starts from a known point.
    pub async fn prepare_for_aspirate(&self, mount: Mount, rate: f64) -> Result<()> {
        self.check_gate().await?;
        check_rate(rate)?;
        let p = self.pipette(mount)?;
        if p.current_volume() > 0.0 {
            tracing::debug!(%mount, "liquid held; plunger already in aspirate range");
            return Ok(());
        }
        let mut spec = plan_prepare_for_aspirate(&p)?;
        spec.speed *= rate;
        {
            let guard = self.motion_lock.acquire().await;
            self.run_plunger_actions(&guard, &[&spec]).await?;
        }
        self.with_pipette(mount, |p| {
            p.set_ready_to_aspirate(true);
            Ok(())
        })
    }

    /// Aspirate `volume` ul (everything still available when `None`) at `rate` times the flow rate.
    pub async fn aspirate(&self, mount: Mount, volume: Option<f64>, rate: f64) -> Result<()> {
        self.check_gate().await?;
        let Some(spec) = plan_aspirate(&self.pipette(mount)?, volume, rate)? else {
            tracing::debug!(%mount, "nothing to aspirate");
            return Ok(());
        };
        let result = {
            let guard = self.motion_lock.acquire().await;
            self.run_plunger_actions(&guard, &[&spec]).await
        };
        match result {
            Ok(()) => self.with_pipette(mount, |p| p.add_current_volume(spec.volume)),
            Err(e) => {
                self.forget_volume(mount);
                Err(e)
            }
        }
    }

    /// Dispense `volume` ul (everything when `None`). `push_out` in ul applies
    /// only when the pipette ends up empty.
    pub async fn dispense(
        &self,
        mount: Mount,
        volume: Option<f64>,
        rate: f64,
        push_out: Option<f64>,
    ) -> Result<()> {
        self.check_gate().await?;
        let p = self.pipette(mount)?;
        let Some(spec) = plan_dispense(&p, volume, rate, push_out)? else {
            tracing::debug!(%mount, "nothing to dispense");
            return Ok(());
        };
        let pushed_past_bottom = spec.plunger_target < p.plunger_positions().bottom;
        let result = {
            let guard = self.motion_lock.acquire().await;
            self.run_plunger_actions(&guard, &[&spec]).await
        };
        match result {
            Ok(()) => self.with_pipette(mount, |p| {
                p.remove_current_volume(spec.volume);
                if pushed_past_bottom {
                    p.set_ready_to_aspirate(false);
                }
                Ok(())
            }),
            Err(e) => {
                self.forget_volume(mount);
                Err(e)
            }
        }
    }

    pub async fn blow_out(&self, mount: Mount) -> Result<()> {
        self.check_gate().await?;
        let spec = plan_blow_out(&self.pipette(mount)?)?;
        let result = {
            let guard = self.motion_lock.acquire().await;
            self.run_plunger_actions(&guard, &[&spec]).await
        };
        self.clear_state(mount, "blow-out", Pipette::clear_after_blow_out);
        result
    }

    pub async fn aspirate_paired(
        &self,
        mounts: [Mount; 2],
        volumes: [Option<f64>; 2],
        rate: f64,
    ) -> Result<()> {
        self.check_gate().await?;
        check_pair(mounts)?;
        let a = plan_aspirate(&self.pipette(mounts[0])?, volumes[0], rate)?;
        let b = plan_aspirate(&self.pipette(mounts[1])?, volumes[1], rate)?;
        let Some((a, b)) = pair(mounts, a, b)? else {
            return Ok(());
        };
        let result = {
            let guard = self.motion_lock.acquire().await;
            self.run_plunger_actions(&guard, &[&a, &b]).await
        };
        match result {
            Ok(()) => {
                self.with_pipette(mounts[0], |p| p.add_current_volume(a.volume))?;
                self.with_pipette(mounts[1], |p| p.add_current_volume(b.volume))
            }
            Err(e) => {
                mounts.iter().for_each(|m| self.forget_volume(*m));
                Err(e)
            }
        }
    }

    pub async fn dispense_paired(
        &self,
        mounts: [Mount; 2],
        volumes: [Option<f64>; 2],
        rate: f64,
        push_out: Option<f64>,
    ) -> Result<()> {
        self.check_gate().await?;
        check_pair(mounts)?;
        let a = plan_dispense(&self.pipette(mounts[0])?, volumes[0], rate, push_out)?;
        let b = plan_dispense(&self.pipette(mounts[1])?, volumes[1], rate, push_out)?;
        let Some((a, b)) = pair(mounts, a, b)? else {
            return Ok(());
        };
        let result = {
            let guard = self.motion_lock.acquire().await;
            self.run_plunger_actions(&guard, &[&a, &b]).await
        };
        match result {
            Ok(()) => {
                for (m, spec) in [(mounts[0], &a), (mounts[1], &b)] {
                    self.with_pipette(m, |p| {
                        p.remove_current_volume(spec.volume);
                        if spec.plunger_target < p.plunger_positions().bottom {
                            p.set_ready_to_aspirate(false);
                        }
                        Ok(())
                    })?;
                }
                Ok(())
            }
            Err(e) => {
                mounts.iter().for_each(|m| self.forget_volume(*m));
                Err(e)
            }
        }
    }

    pub async fn blow_out_paired(&self, mounts: [Mount; 2]) -> Result<()> {
        self.check_gate().await?;
        check_pair(mounts)?;
        let a = plan_blow_out(&self.pipette(mounts[0])?)?;
        let b = plan_blow_out(&self.pipette(mounts[1])?)?;
        let result = {
            let guard = self.motion_lock.acquire().await;
            self.run_plunger_actions(&guard, &[&a, &b]).await
        };
        for m in mounts {
            self.clear_state(m, "blow-out", Pipette::clear_after_blow_out);
        }
        result
    }

    /// Press onto a tip at the current position and record it.
    ///
    /// `presses` and `increment` override the definition's pick-up geometry.
    /// With `prepare_after` the plunger is then readied for aspiration.
    pub async fn pick_up_tip(
        &self,
        mount: Mount,
        tip_length: f64,
        presses: Option<u32>,
        increment: Option<f64>,
        prepare_after: bool,
    ) -> Result<()> {
        self.check_gate().await?;
        let spec = plan_pick_up_tip(&self.pipette(mount)?, presses, increment)?;
        let plunger = plunger_of(mount)?;
        let z = Axis::by_mount(mount);
        let none = Position::new();
        self.ensure_homed(mount).await?;
        {
            let guard = self.motion_lock.acquire().await;
            self.prepare_for_mount_movement_locked(&guard, mount).await?;
            self.set_current(&Position::from([(plunger, spec.plunger_current)]))
                .await?;
            self.direct_move_locked(&guard, &Position::from([(plunger, spec.plunger_prep_target)]), None)
                .await?;
            for press in &spec.presses {
                self.set_current(&Position::from([(z, press.z_current)])).await?;
                self.move_rel_locked(
                    &guard,
                    mount,
                    Point::new(0.0, 0.0, -press.distance),
                    Some(press.speed),
                    &none,
                    None,
                )
                .await?;
                self.set_current(&Position::from([(z, self.robot.z_run_current)]))
                    .await?;
                self.move_rel_locked(&guard, mount, Point::new(0.0, 0.0, press.distance), None, &none, None)
                    .await?;
            }
            self.with_pipette(mount, |p| {
                p.add_tip(tip_length)?;
                p.set_current_volume(0.0)?;
                p.set_ready_to_aspirate(false);
                Ok(())
            })?;
            for (delta, speed) in &spec.shakes {
                self.move_rel_locked(&guard, mount, *delta, *speed, &none, None)
                    .await?;
            }
            self.retract_locked(&guard, mount, spec.retract_target).await?;
        }
        tracing::info!(%mount, tip_length, "tip picked up");
        if prepare_after {
            self.prepare_for_aspirate(mount, 1.0).await?;
        }
        Ok(())
    }

    /// Eject the tip. Tip, volume and tip-rack state are cleared even if a step fails.
    pub async fn drop_tip(&self, mount: Mount, home_after: bool) -> Result<()> {
        self.check_gate().await?;
        let spec = plan_drop_tip(&self.pipette(mount)?, home_after)?;
        let plunger = plunger_of(mount)?;
        let result = {
            let guard = self.motion_lock.acquire().await;
            let r = self.run_drop_tip(&guard, mount, plunger, &spec).await;
            if let Err(e) = self
                .set_current(&Position::from([(plunger, spec.ending_current)]))
                .await
            {
                tracing::warn!(%mount, error = %e, "restoring plunger current after drop-tip failed");
            }
            r
        };
        self.clear_state(mount, "drop-tip", Pipette::clear_after_drop);
        if result.is_ok() {
            tracing::info!(%mount, "tip dropped");
        }
        result
    }

    async fn run_drop_tip(
        &self,
        guard: &MotionGuard<'_>,
        mount: Mount,
        plunger: Axis,
        spec: &DropTipSpec,
    ) -> Result<()> {
        for m in &spec.moves {
            self.set_current(&Position::from([(plunger, m.current)])).await?;
            self.direct_move_locked(guard, &Position::from([(plunger, m.target)]), m.speed)
                .await?;
            if let Some(margin) = m.home_after_margin {
                self.fast_home_locked(guard, plunger, margin).await?;
            }
        }
        let none = Position::new();
        for (delta, speed) in &spec.shakes {
            self.move_rel_locked(guard, mount, *delta, *speed, &none, None)
                .await?;
        }
        Ok(())
    }
}
