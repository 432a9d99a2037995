//! Decide what an instrument rescan means for cached per-mount state.
//!
//! Both functions are pure: they clone what they keep and never touch the
//! backend, so a caller can evaluate them speculatively and discard the result.

use std::sync::Arc;

use pipetter_config::{GripperConfig, InstrumentConfig};
use pipetter_traits::{InstrumentOffset, Mount};

use crate::error::Result;
use crate::instrument::{Gripper, Pipette};

/// A pipette reported by the backend scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedPipette {
    pub config: Arc<InstrumentConfig>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedGripper {
    pub config: Arc<GripperConfig>,
    pub id: Option<String>,
}

/// Outcome of a reconcile: the new slot content and whether sending mount
/// configuration to the hardware may be skipped.
pub type Reconciled<T> = (Option<T>, bool);

/// Reconcile one pipette mount.
///
/// A `requested` model name asks for the instrument under its own name.
pub fn reconcile_pipette(
    mount: Mount,
    scanned: Option<&ScannedPipette>,
    cached: Option<&Pipette>,
    requested: Option<&str>,
    offset: InstrumentOffset,
) -> Result<Reconciled<Pipette>> {
    let Some(scan) = scanned else {
        // Nothing attached now; skip only if nothing was attached before either.
        return Ok((None, cached.is_none()));
    };

    let requested = requested.map(|r| {
        if r == scan.config.model {
            scan.config.name.as_str()
        } else {
            r
        }
    });
    if let Some(old) = cached {
        let same_serial = scan.id.as_deref() == old.id();
        let same_identity = requested.is_none_or(|name| name == old.acting_as());
        if same_serial && same_identity {
            return reload_and_check_skip(scan, old, offset);
        }
    }

    let mut p = Pipette::new(mount, Arc::clone(&scan.config), offset, scan.id.clone());
    if let Some(name) = requested {
        p.act_as(name)?;
    }
    Ok((Some(p), false))
}

fn reload_and_check_skip(
    scan: &ScannedPipette,
    old: &Pipette,
    offset: InstrumentOffset,
) -> Result<Reconciled<Pipette>> {
    if old.config().needs_reconfiguration(&scan.config) {
        let mut p = Pipette::new(old.mount(), Arc::clone(&scan.config), offset, scan.id.clone());
        p.act_as(old.acting_as())?;
        return Ok((Some(p), false));
    }
    let mut kept = old.clone();
    if *kept.shared_config() != scan.config {
        tracing::debug!(mount = %old.mount(), "instrument config changed in reconfiguration-insensitive fields only");
    }
    kept.set_offset(offset);
    Ok((Some(kept), true))
}

/// Reconcile the gripper mount. A gripper with the same id keeps its state.
pub fn reconcile_gripper(
    scanned: Option<&ScannedGripper>,
    cached: Option<&Gripper>,
    offset: InstrumentOffset,
) -> Reconciled<Gripper> {
    match (scanned, cached) {
        (None, None) => (None, true),
        (None, Some(_)) => (None, false),
        (Some(scan), Some(old)) if scan.id.as_deref() == old.id() => {
            let mut kept = old.clone();
            kept.set_offset(offset);
            (Some(kept), true)
        }
        (Some(scan), _) => (
            Some(Gripper::new(Arc::clone(&scan.config), offset, scan.id.clone())),
            false,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipetter_config::{Quirk, builtin_gripper, builtin_pipette};
    use pipetter_traits::{OffsetSource, Point};
    use rstest::rstest;

    fn scan(model: &str, id: &str) -> ScannedPipette {
        ScannedPipette {
            config: Arc::new(builtin_pipette(model).unwrap()),
            id: Some(id.into()),
        }
    }

    fn user_offset(x: f64) -> InstrumentOffset {
        InstrumentOffset {
            offset: Point::new(x, 0.0, 0.0),
            source: OffsetSource::User,
            last_modified: Some(1),
            marked_bad: false,
        }
    }

    #[test]
    fn absent_absent_skips() {
        let r = reconcile_pipette(Mount::Left, None, None, None, InstrumentOffset::default()).unwrap();
        assert_eq!(r, (None, true));
    }

    #[test]
    fn new_instrument_needs_configuration() {
        let s = scan("p300_single_v2.1", "A");
        let (p, skip) =
            reconcile_pipette(Mount::Left, Some(&s), None, None, InstrumentOffset::default()).unwrap();
        assert!(!skip);
        assert_eq!(p.unwrap().id(), Some("A"));
    }

    #[test]
    fn removed_instrument_does_not_skip() {
        let s = scan("p300_single_v2.1", "A");
        let (old, _) =
            reconcile_pipette(Mount::Left, Some(&s), None, None, InstrumentOffset::default()).unwrap();
        let r = reconcile_pipette(Mount::Left, None, old.as_ref(), None, InstrumentOffset::default())
            .unwrap();
        assert_eq!(r, (None, false));
    }

    #[test]
    fn same_serial_keeps_state_and_refreshes_offset() {
        let s = scan("p300_single_v2.1", "A");
        let (old, _) =
            reconcile_pipette(Mount::Left, Some(&s), None, None, InstrumentOffset::default()).unwrap();
        let mut old = old.unwrap();
        old.add_tip(50.0).unwrap();

        let (p, skip) =
            reconcile_pipette(Mount::Left, Some(&s), Some(&old), None, user_offset(1.5)).unwrap();
        let p = p.unwrap();
        assert!(skip);
        assert!(p.has_tip());
        assert_eq!(p.offset().offset.x, 1.5);
    }

    #[test]
    fn quirk_change_forces_reconfiguration_and_keeps_acting_as() {
        let s = scan("p300_single_v2.1", "A");
        let (old, _) = reconcile_pipette(
            Mount::Left,
            Some(&s),
            None,
            Some("p300_single"),
            InstrumentOffset::default(),
        )
        .unwrap();
        let old = old.unwrap();
        assert_eq!(old.acting_as(), "p300_single");

        let mut cfg = (*s.config).clone();
        cfg.quirks.push(Quirk::NeedsUnstick);
        let changed = ScannedPipette {
            config: Arc::new(cfg),
            id: s.id.clone(),
        };
        let (p, skip) = reconcile_pipette(
            Mount::Left,
            Some(&changed),
            Some(&old),
            Some("p300_single"),
            InstrumentOffset::default(),
        )
        .unwrap();
        assert!(!skip);
        let p = p.unwrap();
        assert_eq!(p.acting_as(), "p300_single");
        assert!(p.has_quirk(Quirk::NeedsUnstick));
    }

    #[test]
    fn different_serial_replaces() {
        let (old, _) = reconcile_pipette(
            Mount::Right,
            Some(&scan("p20_single_v2.1", "A")),
            None,
            None,
            InstrumentOffset::default(),
        )
        .unwrap();
        let s = scan("p20_single_v2.1", "B");
        let (p, skip) = reconcile_pipette(
            Mount::Right,
            Some(&s),
            old.as_ref(),
            None,
            InstrumentOffset::default(),
        )
        .unwrap();
        assert!(!skip);
        assert_eq!(p.unwrap().id(), Some("B"));
    }

    #[test]
    fn gripper_same_id_keeps_jaw_state() {
        let g = ScannedGripper {
            config: Arc::new(builtin_gripper("gripper_v1").unwrap()),
            id: Some("G1".into()),
        };
        let (first, skip) = reconcile_gripper(Some(&g), None, InstrumentOffset::default());
        assert!(!skip);
        let mut first = first.unwrap();
        first.set_jaw_state(crate::types::GripperJawState::HomedReady);
        let (again, skip) = reconcile_gripper(Some(&g), Some(&first), user_offset(0.5));
        assert!(skip);
        assert_eq!(again.unwrap().jaw_state(), crate::types::GripperJawState::HomedReady);
        assert_eq!(reconcile_gripper(None, None, InstrumentOffset::default()), (None, true));
    }

    #[rstest]
    #[case(None)]
    #[case(Some("p300_single"))]
    #[case(Some("p300_single_gen2"))]
    #[case(Some("p300_single_v2.1"))]
    fn reconciling_twice_is_stable(#[case] requested: Option<&str>) {
        let s = scan("p300_single_v2.1", "A");
        let (first, skip) =
            reconcile_pipette(Mount::Left, Some(&s), None, requested, user_offset(0.5)).unwrap();
        assert!(!skip);
        let mut first = first.unwrap();
        first.add_tip(50.0).unwrap();

        let (second, skip) =
            reconcile_pipette(Mount::Left, Some(&s), Some(&first), requested, user_offset(0.5))
                .unwrap();
        assert!(skip, "second pass with {requested:?} must skip");
        assert_eq!(second.as_ref(), Some(&first));

        // A later scan that names nothing keeps whatever identity was chosen.
        let (third, skip) =
            reconcile_pipette(Mount::Left, Some(&s), second.as_ref(), None, user_offset(0.5)).unwrap();
        assert!(skip);
        assert_eq!(third, second);
    }

    #[test]
    fn gripper_reconcile_twice_is_stable() {
        let g = ScannedGripper {
            config: Arc::new(builtin_gripper("gripper_v1").unwrap()),
            id: Some("G1".into()),
        };
        let (first, _) = reconcile_gripper(Some(&g), None, user_offset(0.5));
        let (second, skip) = reconcile_gripper(Some(&g), first.as_ref(), user_offset(0.5));
        assert!(skip);
        assert_eq!(second, first);
        let (third, skip) = reconcile_gripper(Some(&g), second.as_ref(), user_offset(0.5));
        assert!(skip);
        assert_eq!(third, second);
    }
}
