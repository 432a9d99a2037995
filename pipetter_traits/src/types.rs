use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use pipetter_config::{GripperConfig, InstrumentConfig};

/// Positions or values keyed by backend axis code ("X", "Y", "Z", ...).
pub type AxisMap = BTreeMap<String, f64>;

/// A carriage position on the gantry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mount {
    Left,
    Right,
    Gripper,
}

impl Mount {
    /// Mounts that can carry a pipette.
    pub const PIPETTES: [Mount; 2] = [Mount::Left, Mount::Right];

    pub fn name(self) -> &'static str {
        match self {
            Mount::Left => "left",
            Mount::Right => "right",
            Mount::Gripper => "gripper",
        }
    }
}

impl fmt::Display for Mount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Deck-space point in mm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub const ZERO: Point = Point {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude_to(&self, other: Point) -> f64 {
        let d = *self - other;
        (d.x * d.x + d.y * d.y + d.z * d.z).sqrt()
    }
}

impl From<[f64; 3]> for Point {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

impl From<Point> for [f64; 3] {
    fn from(p: Point) -> Self {
        [p.x, p.y, p.z]
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, o: Point) -> Point {
        Point::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, o: Point) -> Point {
        Point::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }
}

impl Mul<f64> for Point {
    type Output = Point;
    fn mul(self, k: f64) -> Point {
        Point::new(self.x * k, self.y * k, self.z * k)
    }
}

impl Neg for Point {
    type Output = Point;
    fn neg(self) -> Point {
        Point::new(-self.x, -self.y, -self.z)
    }
}

/// Where a stored calibration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetSource {
    #[default]
    Default,
    User,
    CalibrationCheck,
}

/// Instrument (or gripper) calibration offset with provenance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentOffset {
    pub offset: Point,
    pub source: OffsetSource,
    /// Seconds since the Unix epoch of the last save, if ever saved.
    pub last_modified: Option<u64>,
    #[serde(default)]
    pub marked_bad: bool,
}

/// Persisted deck calibration as stored: raw row-major attitude plus translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeckCalibrationData {
    pub attitude: [[f64; 3]; 3],
    #[serde(default)]
    pub translation: [f64; 3],
    #[serde(default)]
    pub source: OffsetSource,
    #[serde(default)]
    pub last_modified: Option<u64>,
    #[serde(default)]
    pub marked_bad: bool,
}

/// What the backend reports for one mount.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachedInstrument {
    pub config: Option<InstrumentConfig>,
    pub id: Option<String>,
}

/// What the backend reports for the gripper mount.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedGripper {
    pub config: GripperConfig,
    pub id: Option<String>,
}

/// Mount-level hardware settings derived from an instrument definition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MountHardwareConfig {
    pub steps_per_mm: f64,
    pub home_position: f64,
    pub max_travel: f64,
    pub idle_current: f64,
    /// Microstep split configuration for plungers that need unsticking.
    pub splits: Option<MoveSplit>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveSplit {
    pub split_distance: f64,
    pub split_current: f64,
    pub split_speed: f64,
    pub after_time: f64,
    pub fullstep: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lights {
    pub button: bool,
    pub rails: bool,
}
