//! Deck/machine coordinate algebra.
//!
//! deck = A·machine + t, machine = A⁻¹·(deck − t). Vector transforms skip the
//! translation. The attitude is validated once, when it is constructed, so
//! the per-call functions here cannot fail on a degenerate matrix.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use pipetter_traits::{DeckCalibrationData, OffsetSource, Point};

use crate::error::{HardwareError, Result, fail};
use crate::types::{Axis, Position};
use crate::util::{lock, read, write};

/// Smallest |det| accepted for an attitude matrix.
pub const MIN_DETERMINANT: f64 = 1e-9;

type Mat3 = [[f64; 3]; 3];

const IDENTITY: Mat3 = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

fn det(m: &Mat3) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn inverse(m: &Mat3, d: f64) -> Mat3 {
    let inv_d = 1.0 / d;
    [
        [
            (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_d,
            (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_d,
            (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_d,
        ],
        [
            (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_d,
            (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_d,
            (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_d,
        ],
        [
            (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_d,
            (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_d,
            (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_d,
        ],
    ]
}

fn apply(m: &Mat3, p: Point) -> Point {
    Point::new(
        m[0][0] * p.x + m[0][1] * p.y + m[0][2] * p.z,
        m[1][0] * p.x + m[1][1] * p.y + m[1][2] * p.z,
        m[2][0] * p.x + m[2][1] * p.y + m[2][2] * p.z,
    )
}

/// Validated deck attitude with its precomputed inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct Attitude {
    matrix: Mat3,
    inverse: Mat3,
    translation: Point,
}

impl Default for Attitude {
    fn default() -> Self {
        Self::identity()
    }
}

impl Attitude {
    pub fn identity() -> Self {
        Self {
            matrix: IDENTITY,
            inverse: IDENTITY,
            translation: Point::ZERO,
        }
    }

    /// Fails with a calibration error for non-finite or (near-)singular matrices.
    pub fn new(matrix: Mat3, translation: Point) -> Result<Self> {
        if matrix.iter().flatten().any(|v| !v.is_finite())
            || ![translation.x, translation.y, translation.z]
                .iter()
                .all(|v| v.is_finite())
        {
            return fail(HardwareError::Calibration(
                "attitude contains non-finite values".into(),
            ));
        }
        let d = det(&matrix);
        if d.abs() < MIN_DETERMINANT {
            return fail(HardwareError::Calibration(format!(
                "attitude matrix is singular (det = {d:e})"
            )));
        }
        Ok(Self {
            matrix,
            inverse: inverse(&matrix, d),
            translation,
        })
    }

    pub fn matrix(&self) -> &Mat3 {
        &self.matrix
    }

    pub fn translation(&self) -> Point {
        self.translation
    }
}

/// Deck point to machine point; `mount_offset` is added to the attitude translation.
pub fn to_machine(deck: Point, attitude: &Attitude, mount_offset: Point) -> Point {
    apply(
        &attitude.inverse,
        deck - attitude.translation - mount_offset,
    )
}

/// Machine point to deck point; inverse of [`to_machine`].
pub fn to_deck(machine: Point, attitude: &Attitude, mount_offset: Point) -> Point {
    apply(&attitude.matrix, machine) + attitude.translation + mount_offset
}

/// Direction or delta from deck to machine space. No translation.
pub fn vector_to_machine(v: Point, attitude: &Attitude) -> Point {
    apply(&attitude.inverse, v)
}

fn check_shape(pos: &Position) -> Result<Vec<Axis>> {
    let zs: Vec<Axis> = pos.keys().copied().filter(|a| a.is_mount_z()).collect();
    let has_x = pos.contains_key(&Axis::X);
    let has_y = pos.contains_key(&Axis::Y);
    let full = has_x && has_y && !zs.is_empty();
    let none = !has_x && !has_y && zs.is_empty();
    if full || none {
        Ok(zs)
    } else {
        let axes: Vec<&str> = pos.keys().map(|a| a.code()).collect();
        fail(HardwareError::AxisTransformShape(axes.join(",")))
    }
}

fn convert(pos: &Position, f: impl Fn(Point) -> Point) -> Result<Position> {
    let zs = check_shape(pos)?;
    let mut out: Position = pos
        .iter()
        .filter(|(a, _)| !a.is_gantry())
        .map(|(a, v)| (*a, *v))
        .collect();
    if let (Some(x), Some(y)) = (pos.get(&Axis::X), pos.get(&Axis::Y)) {
        for (i, z_axis) in zs.iter().enumerate() {
            let p = f(Point::new(*x, *y, pos[z_axis]));
            // X/Y follow the first carriage; tilt makes them differ per Z only in the noise.
            if i == 0 {
                out.insert(Axis::X, p.x);
                out.insert(Axis::Y, p.y);
            }
            out.insert(*z_axis, p.z);
        }
    }
    Ok(out)
}

/// Deck-space axis targets to machine-space. Plunger and jaw axes pass through.
pub fn machine_from_deck(deck: &Position, attitude: &Attitude) -> Result<Position> {
    convert(deck, |p| to_machine(p, attitude, Point::ZERO))
}

pub fn deck_from_machine(machine: &Position, attitude: &Attitude) -> Result<Position> {
    convert(machine, |p| to_deck(p, attitude, Point::ZERO))
}

/// Validity classification of the active deck calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DeckTransformState {
    Ok,
    Identity,
    BadCalibration,
}

/// Deck attitude plus provenance.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeckCalibration {
    pub attitude: Attitude,
    pub source: OffsetSource,
    pub last_modified: Option<u64>,
    pub marked_bad: bool,
}

impl DeckCalibration {
    pub fn from_data(data: &DeckCalibrationData) -> Result<Self> {
        Ok(Self {
            attitude: Attitude::new(data.attitude, Point::from(data.translation))?,
            source: data.source,
            last_modified: data.last_modified,
            marked_bad: data.marked_bad,
        })
    }

    pub fn to_data(&self) -> DeckCalibrationData {
        DeckCalibrationData {
            attitude: self.attitude.matrix,
            translation: self.attitude.translation.into(),
            source: self.source,
            last_modified: self.last_modified,
            marked_bad: self.marked_bad,
        }
    }
}

pub fn validate_deck_calibration(cal: &DeckCalibration) -> DeckTransformState {
    if cal.last_modified.is_none() {
        DeckTransformState::Identity
    } else if cal.marked_bad {
        DeckTransformState::BadCalibration
    } else {
        DeckTransformState::Ok
    }
}

/// Shared, atomically swapped deck calibration with a generation-keyed validity memo.
#[derive(Debug, Default)]
pub struct CalibrationCell {
    current: RwLock<Arc<DeckCalibration>>,
    generation: AtomicU64,
    memo: Mutex<Option<(u64, DeckTransformState)>>,
    evaluations: AtomicU64,
}

impl CalibrationCell {
    pub fn new(cal: DeckCalibration) -> Self {
        Self {
            current: RwLock::new(Arc::new(cal)),
            ..Self::default()
        }
    }

    /// Snapshot of the active calibration.
    pub fn load(&self) -> Arc<DeckCalibration> {
        Arc::clone(&read(&self.current))
    }

    /// Replace the calibration; returns the new generation.
    pub fn swap(&self, cal: DeckCalibration) -> u64 {
        let mut cur = write(&self.current);
        *cur = Arc::new(cal);
        let g = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *lock(&self.memo) = None;
        g
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn transform_state(&self) -> DeckTransformState {
        let cur = read(&self.current);
        let g = self.generation.load(Ordering::Acquire);
        let mut memo = lock(&self.memo);
        if let Some((mg, state)) = *memo {
            if mg == g {
                return state;
            }
        }
        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let state = validate_deck_calibration(&cur);
        *memo = Some((g, state));
        state
    }

    /// How many times the validity check actually ran.
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tilted() -> Attitude {
        Attitude::new(
            [[1.0, 0.002, 0.0], [-0.003, 0.999, 0.0], [0.0, 0.0, 1.0]],
            Point::new(1.5, -2.0, 0.25),
        )
        .unwrap()
    }

    fn close(a: Point, b: Point) -> bool {
        a.magnitude_to(b) < 1e-9
    }

    #[test]
    fn point_round_trip_with_offset() {
        let att = tilted();
        let off = Point::new(-34.0, 0.0, 0.0);
        let p = Point::new(120.0, 80.0, 40.0);
        let m = to_machine(p, &att, off);
        assert!(close(to_deck(m, &att, off), p));
    }

    #[test]
    fn vector_ignores_translation() {
        let att = Attitude::new(IDENTITY, Point::new(10.0, 10.0, 10.0)).unwrap();
        let v = Point::new(1.0, 2.0, 3.0);
        assert_eq!(vector_to_machine(v, &att), v);
        assert_ne!(to_machine(v, &att, Point::ZERO), v);
    }

    #[test]
    fn singular_matrix_rejected_at_construction() {
        let err = Attitude::new(
            [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 0.0, 1.0]],
            Point::ZERO,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HardwareError>(),
            Some(HardwareError::Calibration(_))
        ));
        assert!(Attitude::new([[0.0; 3]; 3], Point::ZERO).is_err());
        assert!(Attitude::new([[f64::NAN, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]], Point::ZERO).is_err());
    }

    #[test]
    fn plunger_axes_pass_through() {
        let att = tilted();
        let deck: Position = [(Axis::X, 10.0), (Axis::Y, 20.0), (Axis::Z, 30.0), (Axis::B, -3.0)]
            .into_iter()
            .collect();
        let m = machine_from_deck(&deck, &att).unwrap();
        assert_eq!(m[&Axis::B], -3.0);
        let back = deck_from_machine(&m, &att).unwrap();
        for (a, v) in &deck {
            assert!((back[a] - v).abs() < 1e-9, "{a}");
        }
    }

    #[test]
    fn two_carriages_share_xy() {
        let deck: Position = [(Axis::X, 1.0), (Axis::Y, 2.0), (Axis::Z, 3.0), (Axis::A, 4.0)]
            .into_iter()
            .collect();
        let m = machine_from_deck(&deck, &Attitude::identity()).unwrap();
        assert_eq!(m, deck);
    }

    #[test]
    fn shape_errors() {
        let att = Attitude::identity();
        for bad in [
            vec![(Axis::X, 1.0), (Axis::Z, 1.0)],
            vec![(Axis::Z, 1.0)],
            vec![(Axis::X, 1.0), (Axis::Y, 1.0)],
        ] {
            let pos: Position = bad.into_iter().collect();
            let err = machine_from_deck(&pos, &att).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<HardwareError>(),
                Some(HardwareError::AxisTransformShape(_))
            ));
        }
        let plunger_only: Position = [(Axis::C, 2.0)].into_iter().collect();
        assert_eq!(machine_from_deck(&plunger_only, &att).unwrap(), plunger_only);
    }

    #[test]
    fn validity_memo_tracks_generation() {
        let cell = CalibrationCell::new(DeckCalibration::default());
        assert_eq!(cell.transform_state(), DeckTransformState::Identity);
        assert_eq!(cell.transform_state(), DeckTransformState::Identity);
        assert_eq!(cell.evaluations(), 1);

        let g = cell.swap(DeckCalibration {
            attitude: tilted(),
            source: OffsetSource::User,
            last_modified: Some(1_700_000_000),
            marked_bad: false,
        });
        assert_eq!(g, 1);
        assert_eq!(cell.transform_state(), DeckTransformState::Ok);
        assert_eq!(cell.evaluations(), 2);

        let mut bad = (*cell.load()).clone();
        bad.marked_bad = true;
        cell.swap(bad);
        assert_eq!(cell.transform_state(), DeckTransformState::BadCalibration);
    }
}
