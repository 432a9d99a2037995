//! Homing, gantry moves and position reads.

use pipetter_traits::{Mount, Point};

use super::HardwareApi;
use crate::error::{HardwareError, Result, fail};
use crate::hw_error::backend_report;
use crate::motion::{
    AxisBounds, bounds_from_backend, check_motion_bounds, deck_point, target_position_from_absolute,
    target_position_from_absolute_paired, target_position_from_relative,
};
use crate::position::MotionGuard;
use crate::transform::{deck_from_machine, machine_from_deck};
use crate::types::{
    Axis, CriticalPoint, GripperJawState, MotionChecks, Position, from_axis_map, to_axis_map,
};
use crate::util::{lock, round6};

/// Optional parameters for gantry moves.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoveOptions {
    /// mm/s; the backend default when `None`.
    pub speed: Option<f64>,
    pub critical_point: Option<CriticalPoint>,
    /// Per-axis speed caps in mm/s.
    pub max_speeds: Position,
    /// Overrides the configured bounds policy.
    pub checks: Option<MotionChecks>,
    /// Relative moves only: fail instead of homing when the position is unknown.
    pub fail_on_not_homed: bool,
}

impl MoveOptions {
    pub fn speed(mut self, mm_s: f64) -> Self {
        self.speed = Some(mm_s);
        self
    }

    pub fn critical_point(mut self, cp: CriticalPoint) -> Self {
        self.critical_point = Some(cp);
        self
    }

    pub fn checks(mut self, checks: MotionChecks) -> Self {
        self.checks = Some(checks);
        self
    }

    pub fn fail_on_not_homed(mut self) -> Self {
        self.fail_on_not_homed = true;
        self
    }
}

impl HardwareApi {
    pub(crate) fn bounds(&self) -> AxisBounds {
        bounds_from_backend(&self.backend.axis_bounds())
    }

    fn available_axes(&self) -> Vec<Axis> {
        self.bounds()
            .into_keys()
            .filter(|a| self.features.gripper || !matches!(a, Axis::D | Axis::G))
            .collect()
    }

    /// Offset from the mount to the requested point of whatever is attached.
    pub fn critical_point_for(&self, mount: Mount, cp: Option<CriticalPoint>) -> Result<Point> {
        let mount_point = Point::new(0.0, 0.0, self.robot.mount_critical_point_z);
        if cp == Some(CriticalPoint::Mount) {
            return Ok(mount_point);
        }
        let slots = self.slots();
        match mount {
            Mount::Gripper => match &slots.gripper {
                Some(g) => g.critical_point(cp),
                None => Ok(mount_point),
            },
            _ => match slots.pipettes.get(&mount) {
                Some(p) => p.critical_point(cp),
                None => Ok(mount_point),
            },
        }
    }

    pub fn get_instrument_max_height(&self, mount: Mount, cp: Option<CriticalPoint>) -> Result<f64> {
        let z = Axis::by_mount(mount);
        let Some((_, home)) = self.bounds().get(&z).copied() else {
            return fail(HardwareError::Config(format!("backend reports no travel for {z}")));
        };
        let cp = self.critical_point_for(mount, cp)?;
        Ok(home - self.robot.z_retract_distance + cp.z)
    }

    pub(crate) async fn set_current(&self, currents: &Position) -> Result<()> {
        tracing::debug!(?currents, "set active current");
        self.backend
            .set_active_current(&to_axis_map(currents))
            .await
            .map_err(|e| backend_report(e, "setting motor current failed"))
    }

    // ── Homing ───────────────────────────────────────────────────────────────

    /// Home `axes`, or everything the backend drives. Mount carriages go
    /// first, then X/Y, then plungers, then the jaw.
    pub async fn home(&self, axes: Option<&[Axis]>) -> Result<()> {
        self.check_gate().await?;
        let available = self.available_axes();
        let requested: Vec<Axis> = match axes {
            Some(a) => a.to_vec(),
            None => available.clone(),
        };
        for a in &requested {
            if matches!(a, Axis::D | Axis::G) {
                self.require_gripper_capability()?;
            }
            if !available.contains(a) {
                return fail(HardwareError::Config(format!("backend does not drive axis {a}")));
            }
        }
        let carriages: Vec<Axis> = requested.iter().copied().filter(|a| a.is_mount_z()).collect();
        let gantry: Vec<Axis> = requested
            .iter()
            .copied()
            .filter(|a| matches!(a, Axis::X | Axis::Y))
            .collect();
        let plungers: Vec<Axis> = requested.iter().copied().filter(|a| a.is_plunger()).collect();
        tracing::info!(axes = ?requested, "homing");

        let guard = self.motion_lock.acquire().await;
        *lock(&self.last_moved) = None;
        for group in [carriages, gantry] {
            if !group.is_empty() {
                self.home_locked(&guard, &group).await?;
            }
        }
        for p in plungers {
            self.home_plunger_locked(&guard, p).await?;
        }
        if requested.contains(&Axis::G) {
            self.home_locked(&guard, &[Axis::G]).await?;
            if let Some(g) = self.slots().gripper.as_mut() {
                g.set_jaw_displacement(0.0);
                g.set_jaw_state(GripperJawState::HomedReady);
            }
        }
        Ok(())
    }

    /// Home mount carriages. With a mount and `allow_home_other`, other
    /// carriages whose position is unknown are homed too.
    pub async fn home_z(&self, mount: Option<Mount>, allow_home_other: bool) -> Result<()> {
        let available = self.available_axes();
        let axes: Vec<Axis> = match mount {
            None => Axis::mount_axes()
                .into_iter()
                .filter(|a| available.contains(a))
                .collect(),
            Some(m) => {
                let own = Axis::by_mount(m);
                let mut v = vec![own];
                if allow_home_other {
                    v.extend(Axis::mount_axes().into_iter().filter(|a| {
                        *a != own && available.contains(a) && self.positions.get(*a).is_none()
                    }));
                }
                v
            }
        };
        self.home(Some(&axes)).await
    }

    pub async fn home_plunger(&self, mount: Mount) -> Result<()> {
        let Some(axis) = Axis::of_plunger(mount) else {
            return fail(HardwareError::precondition(format!("{mount} mount has no plunger")));
        };
        self.home(Some(&[axis])).await
    }

    async fn home_locked(&self, guard: &MotionGuard<'_>, axes: &[Axis]) -> Result<()> {
        let codes: Vec<&str> = axes.iter().map(|a| a.code()).collect();
        tracing::debug!(axes = ?codes, "backend home");
        match self.backend.home(&codes).await {
            Ok(map) => {
                let homed: Position = from_axis_map(&map)
                    .into_iter()
                    .filter(|(a, _)| axes.contains(a))
                    .collect();
                self.positions.update(guard, &homed);
                Ok(())
            }
            Err(e) => {
                self.positions.clear(guard);
                Err(backend_report(e, "home failed"))
            }
        }
    }

    async fn home_plunger_locked(&self, guard: &MotionGuard<'_>, axis: Axis) -> Result<()> {
        let pipette = axis
            .to_mount()
            .and_then(|m| self.slots().pipettes.get(&m).cloned());
        let Some(p) = pipette else {
            return self.home_locked(guard, &[axis]).await;
        };
        self.set_current(&Position::from([(axis, p.config().currents.plunger)]))
            .await?;
        self.home_locked(guard, &[axis]).await?;
        self.direct_move_locked(guard, &Position::from([(axis, p.plunger_positions().bottom)]), None)
            .await
    }

    // ── Position reads ───────────────────────────────────────────────────────

    /// Deck-space X, Y, mount Z (at the critical point) and the mount's plunger.
    pub async fn current_position(
        &self,
        mount: Mount,
        cp: Option<CriticalPoint>,
        refresh: bool,
        fail_on_not_homed: bool,
    ) -> Result<Position> {
        let z = Axis::by_mount(mount);
        let needed = [Axis::X, Axis::Y, z];
        if refresh {
            let guard = self.motion_lock.acquire().await;
            let map = self
                .backend
                .update_position()
                .await
                .map_err(|e| backend_report(e, "position refresh failed"))?;
            self.positions.commit(&guard, from_axis_map(&map));
        }
        if !self.positions.is_homed(&needed) {
            if fail_on_not_homed {
                return fail(HardwareError::MustHome);
            }
            self.home(None).await?;
        }

        let mut machine = self.positions.require(&needed)?;
        if let Some(pa) = Axis::of_plunger(mount) {
            if let Some(v) = self.positions.get(pa) {
                machine.insert(pa, v);
            }
        }
        let cal = self.calibration.load();
        let mut deck = deck_from_machine(&machine, &cal.attitude)?;
        let cp = self.critical_point_for(mount, cp)?;
        let p = deck_point(&deck, mount, cp, self.robot.mount_offset(mount))?;
        for (axis, v) in [(Axis::X, p.x), (Axis::Y, p.y), (z, p.z)] {
            deck.insert(axis, round6(v));
        }
        Ok(deck)
    }

    pub async fn gantry_position(
        &self,
        mount: Mount,
        cp: Option<CriticalPoint>,
        refresh: bool,
    ) -> Result<Point> {
        let pos = self.current_position(mount, cp, refresh, true).await?;
        let get = |a: Axis| pos.get(&a).copied().unwrap_or_default();
        Ok(Point::new(get(Axis::X), get(Axis::Y), get(Axis::by_mount(mount))))
    }

    // ── Moves ────────────────────────────────────────────────────────────────

    /// Put the mount's critical point at `abs` in deck coordinates.
    pub async fn move_to(&self, mount: Mount, abs: Point, opts: MoveOptions) -> Result<()> {
        self.check_gate().await?;
        if mount == Mount::Gripper {
            self.require_gripper_capability()?;
        }
        self.ensure_homed(mount).await?;
        let cp = self.critical_point_for(mount, opts.critical_point)?;
        let target = target_position_from_absolute(mount, abs, cp, self.robot.mount_offset(mount));
        let machine = self.checked_machine_target(&target, opts.checks)?;
        let guard = self.motion_lock.acquire().await;
        self.prepare_for_mount_movement_locked(&guard, mount).await?;
        self.move_machine_locked(&guard, &machine, opts.speed, &opts.max_speeds, true)
            .await
    }

    /// Move two mounts together; X/Y follow `primary`.
    pub async fn move_to_paired(
        &self,
        primary: Mount,
        secondary: Mount,
        abs: Point,
        opts: MoveOptions,
    ) -> Result<()> {
        self.check_gate().await?;
        if primary == secondary {
            return fail(HardwareError::precondition("paired move needs two different mounts"));
        }
        if Mount::Gripper == primary || Mount::Gripper == secondary {
            self.require_gripper_capability()?;
        }
        self.ensure_homed(primary).await?;
        self.ensure_homed(secondary).await?;
        let side = |m: Mount| -> Result<(Mount, Point, Point)> {
            Ok((m, self.critical_point_for(m, opts.critical_point)?, self.robot.mount_offset(m)))
        };
        let target = target_position_from_absolute_paired(side(primary)?, side(secondary)?, abs);
        let machine = self.checked_machine_target(&target, opts.checks)?;
        let guard = self.motion_lock.acquire().await;
        *lock(&self.last_moved) = Some(primary);
        self.move_machine_locked(&guard, &machine, opts.speed, &opts.max_speeds, true)
            .await
    }

    /// Move the mount by `delta` from where the store says it is.
    pub async fn move_rel(&self, mount: Mount, delta: Point, opts: MoveOptions) -> Result<()> {
        self.check_gate().await?;
        if mount == Mount::Gripper {
            self.require_gripper_capability()?;
        }
        let z = Axis::by_mount(mount);
        if !self.positions.is_homed(&[Axis::X, Axis::Y, z]) {
            if opts.fail_on_not_homed {
                return fail(HardwareError::MustHome);
            }
            self.home(None).await?;
        }
        let guard = self.motion_lock.acquire().await;
        self.prepare_for_mount_movement_locked(&guard, mount).await?;
        self.move_rel_locked(&guard, mount, delta, opts.speed, &opts.max_speeds, opts.checks)
            .await
    }

    /// Fast-home the mount carriage, stopping `margin` mm short before the slow approach.
    pub async fn retract(&self, mount: Mount, margin: f64) -> Result<()> {
        self.check_gate().await?;
        let guard = self.motion_lock.acquire().await;
        self.retract_locked(&guard, mount, margin).await
    }

    /// Probe along `axis`; returns the full machine position afterwards.
    pub async fn probe(&self, axis: Axis, distance: f64) -> Result<Position> {
        self.check_gate().await?;
        let guard = self.motion_lock.acquire().await;
        self.positions.require(&[axis])?;
        tracing::debug!(%axis, distance, "backend probe");
        match self.backend.probe(axis.code(), distance).await {
            Ok(map) => {
                let pos = from_axis_map(&map);
                self.positions.commit(&guard, pos.clone());
                Ok(pos)
            }
            Err(e) => {
                self.positions.clear(&guard);
                Err(backend_report(e, "probe failed"))
            }
        }
    }

    pub(super) async fn ensure_homed(&self, mount: Mount) -> Result<()> {
        if self
            .positions
            .is_homed(&[Axis::X, Axis::Y, Axis::by_mount(mount)])
        {
            return Ok(());
        }
        tracing::info!(%mount, "position unknown; homing before move");
        self.home(None).await
    }

    /// Switching mounts retracts the one that moved last. Runs under the same
    /// guard as the move that follows so no other mount can move in between.
    pub(super) async fn prepare_for_mount_movement_locked(
        &self,
        guard: &MotionGuard<'_>,
        mount: Mount,
    ) -> Result<()> {
        let previous = lock(&self.last_moved).replace(mount);
        match previous {
            Some(prev) if prev != mount => {
                tracing::debug!(from = %prev, to = %mount, "retracting previous mount");
                self.retract_locked(guard, prev, self.robot.retract_margin).await
            }
            _ => Ok(()),
        }
    }

    /// Deck targets to bounds-checked machine targets.
    fn checked_machine_target(&self, deck: &Position, checks: Option<MotionChecks>) -> Result<Position> {
        let cal = self.calibration.load();
        let machine: Position = machine_from_deck(deck, &cal.attitude)?
            .into_iter()
            .map(|(a, v)| (a, round6(v)))
            .collect();
        check_motion_bounds(&machine, &self.bounds(), checks.unwrap_or(self.motion.checks))?;
        Ok(machine)
    }

    pub(crate) async fn move_machine_locked(
        &self,
        guard: &MotionGuard<'_>,
        target: &Position,
        speed: Option<f64>,
        max_speeds: &Position,
        home_flagged_axes: bool,
    ) -> Result<()> {
        tracing::debug!(?target, ?speed, "backend move");
        let result = self
            .backend
            .move_to(
                &to_axis_map(target),
                speed,
                home_flagged_axes,
                &to_axis_map(max_speeds),
            )
            .await;
        match result {
            Ok(()) => {
                self.positions.update(guard, target);
                Ok(())
            }
            Err(e) => {
                self.positions.clear(guard);
                tracing::error!(error = %e, "move failed; position must be re-established by homing");
                Err(backend_report(e, "move failed"))
            }
        }
    }

    /// Plunger or jaw move; these axes bypass the deck transform.
    pub(crate) async fn direct_move_locked(
        &self,
        guard: &MotionGuard<'_>,
        target: &Position,
        speed: Option<f64>,
    ) -> Result<()> {
        check_motion_bounds(target, &self.bounds(), self.motion.checks)?;
        self.move_machine_locked(guard, target, speed, &Position::new(), false)
            .await
    }

    pub(crate) async fn move_rel_locked(
        &self,
        guard: &MotionGuard<'_>,
        mount: Mount,
        delta: Point,
        speed: Option<f64>,
        max_speeds: &Position,
        checks: Option<MotionChecks>,
    ) -> Result<()> {
        let machine = self
            .positions
            .require(&[Axis::X, Axis::Y, Axis::by_mount(mount)])?;
        let deck = {
            let cal = self.calibration.load();
            deck_from_machine(&machine, &cal.attitude)?
        };
        let target = target_position_from_relative(mount, delta, &deck)?;
        let machine_target = self.checked_machine_target(&target, checks)?;
        self.move_machine_locked(guard, &machine_target, speed, max_speeds, true)
            .await
    }

    pub(crate) async fn retract_locked(
        &self,
        guard: &MotionGuard<'_>,
        mount: Mount,
        margin: f64,
    ) -> Result<()> {
        self.fast_home_locked(guard, Axis::by_mount(mount), margin)
            .await
    }

    pub(crate) async fn fast_home_locked(
        &self,
        guard: &MotionGuard<'_>,
        axis: Axis,
        margin: f64,
    ) -> Result<()> {
        tracing::debug!(%axis, margin, "backend fast home");
        match self.backend.fast_home(&[axis.code()], margin).await {
            Ok(map) => {
                if let Some(v) = from_axis_map(&map).get(&axis) {
                    self.positions.update(guard, &Position::from([(axis, *v)]));
                }
                Ok(())
            }
            Err(e) => {
                self.positions.clear(guard);
                Err(backend_report(e, "fast home failed"))
            }
        }
    }
}
