//! Instrument state held per mount.

pub mod gripper;
pub mod pipette;
pub mod volume;

pub use gripper::{Gripper, GripperInfo};
pub use pipette::{Pipette, PipetteInfo};
