//! Liquid-handling planning.
//!
//! Each `plan_*` function checks preconditions against a pipette's state and
//! returns the plunger and gantry moves to perform. Nothing here touches the
//! backend or mutates the pipette; the facade executes the plan under the
//! motion lock and then commits the state change.

use pipetter_config::Quirk;
use pipetter_traits::{Mount, Point};

use crate::error::{HardwareError, Result, fail};
use crate::instrument::Pipette;
use crate::types::{Axis, HardwareAction};

pub const SHAKE_OFF_TIPS_SPEED: f64 = 50.0;
pub const SHAKE_OFF_TIPS_DROP_DISTANCE: f64 = 2.25;
pub const SHAKE_OFF_TIPS_PICKUP_DISTANCE: f64 = 0.3;
pub const DROP_TIP_RELEASE_DISTANCE: f64 = 20.0;

/// A relative gantry move with an optional speed.
pub type Shake = (Point, Option<f64>);

/// One plunger move for aspirate, dispense or blow-out.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidActionSpec {
    pub axis: Axis,
    pub volume: f64,
    pub plunger_target: f64,
    pub speed: f64,
    pub current: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickUpPress {
    pub z_current: f64,
    pub speed: f64,
    /// Distance pressed down, then backed up, in mm.
    pub distance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickUpTipSpec {
    pub plunger_prep_target: f64,
    pub plunger_current: f64,
    pub presses: Vec<PickUpPress>,
    pub shakes: Vec<Shake>,
    pub retract_target: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTipMove {
    pub target: f64,
    pub current: f64,
    pub speed: Option<f64>,
    /// Fast-home the plunger afterwards with this margin.
    pub home_after_margin: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DropTipSpec {
    pub moves: Vec<DropTipMove>,
    pub shakes: Vec<Shake>,
    pub ending_current: f64,
}

fn plunger_axis(p: &Pipette) -> Result<Axis> {
    match Axis::of_plunger(p.mount()) {
        Some(a) => Ok(a),
        None => fail(HardwareError::InstrumentNotAttached { mount: p.mount() }),
    }
}

/// Tip present, and for aspirate from empty, plunger prepared.
pub fn ready_for_tip_action(p: &Pipette, action: HardwareAction) -> Result<()> {
    if !p.has_tip() {
        return fail(HardwareError::NoTipAttached { mount: p.mount() });
    }
    if action == HardwareAction::Aspirate && p.current_volume() == 0.0 && !p.ready_to_aspirate() {
        return fail(HardwareError::NotReadyToAspirate { mount: p.mount() });
    }
    tracing::debug!(mount = %p.mount(), ?action, "ready for tip action");
    Ok(())
}

/// `None` when there is nothing to aspirate.
pub fn plan_aspirate(p: &Pipette, volume: Option<f64>, rate: f64) -> Result<Option<LiquidActionSpec>> {
    ready_for_tip_action(p, HardwareAction::Aspirate)?;
    let vol = volume.unwrap_or_else(|| p.available_volume());
    if vol < 0.0 || !vol.is_finite() {
        return fail(HardwareError::precondition(format!("invalid aspirate volume {vol}")));
    }
    if vol == 0.0 {
        return Ok(None);
    }
    if !p.ok_to_add_volume(vol) {
        return fail(HardwareError::precondition(format!(
            "cannot aspirate {vol} ul: {} ul held, working volume {} ul",
            p.current_volume(),
            p.working_volume()
        )));
    }
    check_rate(rate)?;
    Ok(Some(LiquidActionSpec {
        axis: plunger_axis(p)?,
        volume: vol,
        plunger_target: p.plunger_position(p.current_volume() + vol, HardwareAction::Aspirate)?,
        speed: p.plunger_speed(p.flow_rates().aspirate * rate, HardwareAction::Aspirate)?,
        current: p.config().currents.plunger,
    }))
}

/// Requested volume is clamped to what is held. Push-out applies only when
/// the dispense empties the pipette.
pub fn plan_dispense(
    p: &Pipette,
    volume: Option<f64>,
    rate: f64,
    push_out: Option<f64>,
) -> Result<Option<LiquidActionSpec>> {
    ready_for_tip_action(p, HardwareAction::Dispense)?;
    let requested = volume.unwrap_or_else(|| p.current_volume());
    if requested < 0.0 || !requested.is_finite() {
        return fail(HardwareError::precondition(format!("invalid dispense volume {requested}")));
    }
    let vol = requested.min(p.current_volume());
    if vol == 0.0 {
        return Ok(None);
    }
    check_rate(rate)?;
    let remaining = p.current_volume() - vol;
    let push_out_ul = if remaining.abs() < 1e-9 {
        push_out.unwrap_or(p.config().push_out_volume)
    } else {
        if push_out.is_some_and(|v| v != 0.0) {
            return fail(HardwareError::precondition(format!(
                "cannot push out on a dispense that leaves {remaining} ul in the pipette"
            )));
        }
        0.0
    };
    let push_out_mm = p.push_out_mm(push_out_ul)?;
    if !p.ok_to_push_out(push_out_mm) {
        return fail(HardwareError::precondition(
            "cannot push out more than the pipette blow-out volume",
        ));
    }
    let target = p.plunger_position(remaining, HardwareAction::Dispense)? - push_out_mm;
    Ok(Some(LiquidActionSpec {
        axis: plunger_axis(p)?,
        volume: vol,
        plunger_target: crate::util::round6(target),
        speed: p.plunger_speed(p.flow_rates().dispense * rate, HardwareAction::Dispense)?,
        current: p.config().currents.plunger,
    }))
}

pub fn plan_blow_out(p: &Pipette) -> Result<LiquidActionSpec> {
    Ok(LiquidActionSpec {
        axis: plunger_axis(p)?,
        volume: 0.0,
        plunger_target: p.plunger_positions().blow_out,
        speed: p.plunger_speed(p.flow_rates().blow_out, HardwareAction::BlowOut)?,
        current: p.config().currents.plunger,
    })
}

/// Plunger move to the bottom stop, run before the first aspirate from empty.
pub fn plan_prepare_for_aspirate(p: &Pipette) -> Result<LiquidActionSpec> {
    Ok(LiquidActionSpec {
        axis: plunger_axis(p)?,
        volume: 0.0,
        plunger_target: p.plunger_positions().bottom,
        speed: p.plunger_speed(p.flow_rates().blow_out, HardwareAction::BlowOut)?,
        current: p.config().currents.plunger,
    })
}

pub(crate) fn check_rate(rate: f64) -> Result<()> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        fail(HardwareError::precondition(format!("rate must be > 0, got {rate}")))
    }
}

fn pickup_shakes() -> Vec<Shake> {
    let d = SHAKE_OFF_TIPS_PICKUP_DISTANCE;
    let s = Some(SHAKE_OFF_TIPS_SPEED);
    let one = [
        (Point::new(-d, 0.0, 0.0), s),
        (Point::new(2.0 * d, 0.0, 0.0), s),
        (Point::new(-d, 0.0, 0.0), s),
        (Point::new(0.0, -d, 0.0), s),
        (Point::new(0.0, 2.0 * d, 0.0), s),
        (Point::new(0.0, -d, 0.0), s),
        (Point::new(0.0, 0.0, DROP_TIP_RELEASE_DISTANCE), None),
    ];
    one.iter().chain(one.iter()).copied().collect()
}

fn drop_shakes(tiprack_diameter: f64) -> Vec<Shake> {
    let mut d = SHAKE_OFF_TIPS_DROP_DISTANCE;
    if tiprack_diameter > 0.0 {
        d = d.min(tiprack_diameter / 4.0);
    }
    let d = d.max(1.0);
    let s = Some(SHAKE_OFF_TIPS_SPEED);
    vec![
        (Point::new(-d, 0.0, 0.0), s),
        (Point::new(2.0 * d, 0.0, 0.0), s),
        (Point::new(-d, 0.0, 0.0), s),
        (Point::new(0.0, 0.0, DROP_TIP_RELEASE_DISTANCE), None),
    ]
}

/// Non-positive overrides fall back to the definition.
pub fn plan_pick_up_tip(
    p: &Pipette,
    presses: Option<u32>,
    increment: Option<f64>,
) -> Result<PickUpTipSpec> {
    if p.has_tip() {
        return fail(HardwareError::TipAlreadyAttached { mount: p.mount() });
    }
    let cfg = &p.config().pick_up;
    let presses = presses.unwrap_or(cfg.presses);
    let increment = increment.filter(|i| *i > 0.0).unwrap_or(cfg.increment);
    let z_current = p.config().currents.pick_up;
    let presses_v = (0..presses)
        .map(|i| PickUpPress {
            z_current,
            speed: cfg.speed,
            distance: cfg.distance + increment * f64::from(i),
        })
        .collect();
    Ok(PickUpTipSpec {
        plunger_prep_target: p.plunger_positions().bottom,
        plunger_current: p.config().currents.plunger,
        presses: presses_v,
        shakes: if p.has_quirk(Quirk::PickupTipShake) {
            pickup_shakes()
        } else {
            Vec::new()
        },
        retract_target: cfg.distance + increment * f64::from(presses) + 2.0,
    })
}

pub fn plan_drop_tip(p: &Pipette, home_after: bool) -> Result<DropTipSpec> {
    if !p.has_tip() {
        return fail(HardwareError::NoTipAttached { mount: p.mount() });
    }
    let pos = p.plunger_positions();
    let run = p.config().currents.plunger;
    let once = [
        DropTipMove {
            target: pos.bottom,
            current: run,
            speed: None,
            home_after_margin: None,
        },
        DropTipMove {
            target: pos.drop_tip,
            current: p.config().currents.drop_tip,
            speed: Some(p.config().drop_tip_speed),
            home_after_margin: home_after.then(|| (pos.bottom - pos.drop_tip).abs()),
        },
        // Always finish at a known safe plunger position.
        DropTipMove {
            target: pos.bottom,
            current: run,
            speed: None,
            home_after_margin: None,
        },
    ];
    let mut moves = once.to_vec();
    if p.has_quirk(Quirk::DoubleDropTip) {
        moves.extend(once);
    }
    Ok(DropTipSpec {
        moves,
        shakes: if p.has_quirk(Quirk::DropTipShake) {
            drop_shakes(p.current_tiprack_diameter())
        } else {
            Vec::new()
        },
        ending_current: run,
    })
}

/// Both sides act or neither does.
pub fn pair<T>(mounts: [Mount; 2], a: Option<T>, b: Option<T>) -> Result<Option<(T, T)>> {
    match (a, b) {
        (Some(a), Some(b)) => Ok(Some((a, b))),
        (None, None) => Ok(None),
        _ => {
            tracing::warn!(?mounts, "paired operation with one side empty");
            fail(HardwareError::PairedOperationAsymmetry)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipetter_config::builtin_pipette;
    use pipetter_traits::InstrumentOffset;
    use std::sync::Arc;

    fn pipette(model: &str, mount: Mount) -> Pipette {
        Pipette::new(
            mount,
            Arc::new(builtin_pipette(model).unwrap()),
            InstrumentOffset::default(),
            None,
        )
    }

    fn kind<T: std::fmt::Debug>(r: Result<T>) -> HardwareError {
        r.unwrap_err().downcast_ref::<HardwareError>().cloned().unwrap()
    }

    #[test]
    fn aspirate_requires_tip_and_readiness() {
        let mut p = pipette("p300_single_v2.1", Mount::Left);
        assert_eq!(
            kind(plan_aspirate(&p, Some(10.0), 1.0)),
            HardwareError::NoTipAttached { mount: Mount::Left }
        );
        p.add_tip(50.0).unwrap();
        assert_eq!(
            kind(plan_aspirate(&p, Some(10.0), 1.0)),
            HardwareError::NotReadyToAspirate { mount: Mount::Left }
        );
        p.set_ready_to_aspirate(true);
        let spec = plan_aspirate(&p, Some(10.0), 1.0).unwrap().unwrap();
        assert_eq!(spec.axis, Axis::B);
        // 10 / (0.2*10 + 16) above bottom
        assert!((spec.plunger_target - (-14.5 + 10.0 / 18.0)).abs() < 1e-6);
    }

    #[test]
    fn aspirate_defaults_to_available_volume() {
        let mut p = pipette("p20_single_v2.1", Mount::Right);
        p.add_tip(30.0).unwrap();
        p.set_ready_to_aspirate(true);
        p.set_current_volume(5.0).unwrap();
        let spec = plan_aspirate(&p, None, 0.5).unwrap().unwrap();
        assert_eq!(spec.volume, 15.0);
        assert!(plan_aspirate(&p, Some(16.0), 1.0).is_err());
        assert!(plan_aspirate(&p, Some(0.0), 1.0).unwrap().is_none());
    }

    #[test]
    fn dispense_clamps_and_restricts_push_out() {
        let mut p = pipette("p300_single_v2.1", Mount::Left);
        p.add_tip(50.0).unwrap();
        p.set_current_volume(40.0).unwrap();
        let all = plan_dispense(&p, Some(100.0), 1.0, None).unwrap().unwrap();
        assert_eq!(all.volume, 40.0);
        assert!((all.plunger_target - p.plunger_positions().bottom).abs() < 1e-9);
        assert!(plan_dispense(&p, Some(10.0), 1.0, Some(2.0)).is_err());
        assert!(plan_dispense(&p, Some(10.0), 1.0, Some(0.0)).unwrap().is_some());
        // Beyond the blow-out stop.
        assert!(plan_dispense(&p, None, 1.0, Some(200.0)).is_err());
    }

    #[test]
    fn pick_up_geometry() {
        let p = pipette("p300_multi_v2.1", Mount::Right);
        let spec = plan_pick_up_tip(&p, None, Some(-1.0)).unwrap();
        assert_eq!(spec.presses.len(), 3);
        assert_eq!(spec.presses[2].distance, 13.0 + 2.0);
        assert_eq!(spec.retract_target, 13.0 + 3.0 + 2.0);
        assert!(spec.shakes.is_empty());
        let p1000 = pipette("p1000_single_v2.1", Mount::Left);
        assert_eq!(plan_pick_up_tip(&p1000, Some(1), None).unwrap().shakes.len(), 14);
    }

    #[test]
    fn drop_tip_sequence_and_quirks() {
        let mut p20 = pipette("p20_single_v2.1", Mount::Right);
        assert_eq!(
            kind(plan_drop_tip(&p20, true)),
            HardwareError::NoTipAttached { mount: Mount::Right }
        );
        p20.add_tip(30.0).unwrap();
        let spec = plan_drop_tip(&p20, true).unwrap();
        assert_eq!(spec.moves.len(), 6);
        assert_eq!(spec.moves[1].home_after_margin, Some(8.0));
        assert!(spec.shakes.is_empty());

        let mut p300 = pipette("p300_single_v2.1", Mount::Left);
        p300.add_tip(50.0).unwrap();
        p300.set_current_tiprack_diameter(5.0);
        let spec = plan_drop_tip(&p300, false).unwrap();
        assert_eq!(spec.moves.len(), 3);
        assert_eq!(spec.shakes[0].0.x, -1.25);
        assert!(spec.moves.iter().all(|m| m.home_after_margin.is_none()));
    }

    #[test]
    fn pairing_is_all_or_nothing() {
        let m = [Mount::Left, Mount::Right];
        assert_eq!(pair::<u8>(m, None, None).unwrap(), None);
        assert_eq!(pair(m, Some(1), Some(2)).unwrap(), Some((1, 2)));
        assert_eq!(kind(pair(m, Some(1), None)), HardwareError::PairedOperationAsymmetry);
    }
}
