//! Typed axes, critical points and small enums shared across the core.

use std::collections::BTreeMap;
use std::fmt;

use pipetter_traits::{AxisMap, Mount};
use serde::Serialize;

/// Physical degree of freedom.
///
/// Variant names match the codes used at the backend boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Axis {
    /// Gantry X.
    X,
    /// Gantry Y.
    Y,
    /// Left mount carriage.
    Z,
    /// Right mount carriage.
    A,
    /// Left plunger.
    B,
    /// Right plunger.
    C,
    /// Gripper carriage.
    D,
    /// Gripper jaw.
    G,
}

/// Axis-keyed positions in mm.
pub type Position = BTreeMap<Axis, f64>;

impl Axis {
    pub const ALL: [Axis; 8] = [
        Axis::X,
        Axis::Y,
        Axis::Z,
        Axis::A,
        Axis::B,
        Axis::C,
        Axis::D,
        Axis::G,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Axis::X => "X",
            Axis::Y => "Y",
            Axis::Z => "Z",
            Axis::A => "A",
            Axis::B => "B",
            Axis::C => "C",
            Axis::D => "D",
            Axis::G => "G",
        }
    }

    pub fn from_code(code: &str) -> Option<Axis> {
        Self::ALL
            .into_iter()
            .find(|a| a.code().eq_ignore_ascii_case(code))
    }

    /// The carriage (Z) axis of a mount.
    pub fn by_mount(mount: Mount) -> Axis {
        match mount {
            Mount::Left => Axis::Z,
            Mount::Right => Axis::A,
            Mount::Gripper => Axis::D,
        }
    }

    /// The plunger axis of a pipette mount.
    pub fn of_plunger(mount: Mount) -> Option<Axis> {
        match mount {
            Mount::Left => Some(Axis::B),
            Mount::Right => Some(Axis::C),
            Mount::Gripper => None,
        }
    }

    /// Mount owning a carriage or plunger axis.
    pub fn to_mount(self) -> Option<Mount> {
        match self {
            Axis::Z | Axis::B => Some(Mount::Left),
            Axis::A | Axis::C => Some(Mount::Right),
            Axis::D | Axis::G => Some(Mount::Gripper),
            Axis::X | Axis::Y => None,
        }
    }

    pub fn mount_axes() -> [Axis; 3] {
        [Axis::Z, Axis::A, Axis::D]
    }

    /// Axes subject to the deck transform.
    pub fn gantry_axes() -> [Axis; 5] {
        [Axis::X, Axis::Y, Axis::Z, Axis::A, Axis::D]
    }

    pub fn is_gantry(self) -> bool {
        Self::gantry_axes().contains(&self)
    }

    pub fn is_mount_z(self) -> bool {
        Self::mount_axes().contains(&self)
    }

    pub fn is_plunger(self) -> bool {
        matches!(self, Axis::B | Axis::C)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Render typed positions with backend codes.
pub fn to_axis_map(pos: &Position) -> AxisMap {
    pos.iter().map(|(a, v)| (a.code().to_string(), *v)).collect()
}

/// Parse backend codes; unknown codes are dropped.
pub fn from_axis_map(map: &AxisMap) -> Position {
    let mut out = Position::new();
    for (code, v) in map {
        match Axis::from_code(code) {
            Some(a) => {
                out.insert(a, *v);
            }
            None => tracing::debug!(code = %code, "ignoring unknown axis from backend"),
        }
    }
    out
}

/// Which physical point of an instrument is being positioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CriticalPoint {
    Mount,
    Nozzle,
    Tip,
    XyCenter,
    FrontNozzle,
    GripperJawCenter,
    GripperFrontCalibrationPin,
    GripperRearCalibrationPin,
}

impl CriticalPoint {
    pub fn is_gripper(self) -> bool {
        matches!(
            self,
            CriticalPoint::GripperJawCenter
                | CriticalPoint::GripperFrontCalibrationPin
                | CriticalPoint::GripperRearCalibrationPin
        )
    }
}

/// Plunger action, used to pick flow rates and ul-per-mm tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HardwareAction {
    Aspirate,
    Dispense,
    BlowOut,
    PickUpTip,
    DropTip,
}

/// Reason for a pause; the gate runs again only when no reason remains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PauseType {
    Pause,
    Delay,
}

/// Which bound violations abort a move. Unchecked violations are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionChecks {
    None,
    Low,
    High,
    #[default]
    Both,
}

impl MotionChecks {
    pub fn checks_low(self) -> bool {
        matches!(self, MotionChecks::Low | MotionChecks::Both)
    }

    pub fn checks_high(self) -> bool {
        matches!(self, MotionChecks::High | MotionChecks::Both)
    }
}

impl From<pipetter_config::BoundsCheck> for MotionChecks {
    fn from(b: pipetter_config::BoundsCheck) -> Self {
        match b {
            pipetter_config::BoundsCheck::None => MotionChecks::None,
            pipetter_config::BoundsCheck::Low => MotionChecks::Low,
            pipetter_config::BoundsCheck::High => MotionChecks::High,
            pipetter_config::BoundsCheck::Both => MotionChecks::Both,
        }
    }
}

/// Gripper jaw state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GripperJawState {
    Unhomed,
    HomedReady,
    Gripping,
    HoldingClosed,
}
