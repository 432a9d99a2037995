//! Target construction and bounds checking for single logical moves.

use std::collections::BTreeMap;

use pipetter_traits::{Mount, Point};

use crate::error::{HardwareError, Result, fail};
use crate::types::{Axis, MotionChecks, Position};

/// Per-axis `(min, max)` travel.
pub type AxisBounds = BTreeMap<Axis, (f64, f64)>;

/// Deck-space X, Y and mount Z that put the critical point of `mount` at `abs`.
pub fn target_position_from_absolute(
    mount: Mount,
    abs: Point,
    cp_offset: Point,
    mount_offset: Point,
) -> Position {
    let p = abs - cp_offset - mount_offset;
    [(Axis::X, p.x), (Axis::Y, p.y), (Axis::by_mount(mount), p.z)]
        .into_iter()
        .collect()
}

/// Same targets as [`target_position_from_absolute`], for two mounts moving together.
///
/// X/Y follow `primary`; the other carriage only contributes its Z.
pub fn target_position_from_absolute_paired(
    primary: (Mount, Point, Point),
    secondary: (Mount, Point, Point),
    abs: Point,
) -> Position {
    let mut t = target_position_from_absolute(primary.0, abs, primary.1, primary.2);
    let other = abs - secondary.1 - secondary.2;
    t.insert(Axis::by_mount(secondary.0), other.z);
    t
}

/// Current deck X, Y and mount Z shifted by `delta`.
pub fn target_position_from_relative(mount: Mount, delta: Point, current: &Position) -> Result<Position> {
    let z = Axis::by_mount(mount);
    let (Some(x0), Some(y0), Some(z0)) =
        (current.get(&Axis::X), current.get(&Axis::Y), current.get(&z))
    else {
        return fail(HardwareError::MustHome);
    };
    Ok([(Axis::X, x0 + delta.x), (Axis::Y, y0 + delta.y), (z, z0 + delta.z)]
        .into_iter()
        .collect())
}

/// Deck point of the mount's critical point given deck axis values.
pub fn deck_point(current: &Position, mount: Mount, cp_offset: Point, mount_offset: Point) -> Result<Point> {
    let z = Axis::by_mount(mount);
    let (Some(x), Some(y), Some(zv)) = (current.get(&Axis::X), current.get(&Axis::Y), current.get(&z))
    else {
        return fail(HardwareError::MustHome);
    };
    Ok(Point::new(*x, *y, *zv) + cp_offset + mount_offset)
}

/// Parse backend-reported bounds; unknown axis codes are dropped.
pub fn bounds_from_backend(raw: &BTreeMap<String, (f64, f64)>) -> AxisBounds {
    raw.iter()
        .filter_map(|(code, b)| Axis::from_code(code).map(|a| (a, *b)))
        .collect()
}

/// Fail on checked-direction violations; log the rest.
pub fn check_motion_bounds(target: &Position, bounds: &AxisBounds, checks: MotionChecks) -> Result<()> {
    for (axis, value) in target {
        let Some((min, max)) = bounds.get(axis).copied() else {
            continue;
        };
        let low = *value < min;
        let high = *value > max;
        if !(low || high) {
            continue;
        }
        if (low && checks.checks_low()) || (high && checks.checks_high()) {
            tracing::error!(%axis, value, min, max, "move target out of bounds");
            return fail(HardwareError::OutOfBounds {
                axis: *axis,
                value: *value,
                min,
                max,
            });
        }
        tracing::warn!(%axis, value, min, max, "move target out of bounds; bound not checked, proceeding");
    }
    Ok(())
}
