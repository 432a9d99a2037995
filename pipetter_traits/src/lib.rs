//! Collaborator boundary for the pipetting control core.
//!
//! The motion core talks to the outside world only through the traits in this
//! crate: a motor/instrument [`Backend`], a [`ModuleProvider`] for deck
//! modules, and a [`CalibrationStorage`] for persisted offsets. Errors crossing
//! the boundary are boxed so that implementations stay free to use their own
//! error types; the core maps them to typed errors.
//!
//! Axis names cross this boundary as short string codes ("X", "Y", "Z", "A",
//! "B", "C", ...). Translation to typed axes happens inside the core.

pub mod types;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;

pub use types::{
    AttachedGripper, AttachedInstrument, AxisMap, DeckCalibrationData, InstrumentOffset, Lights,
    Mount, MountHardwareConfig, MoveSplit, OffsetSource, Point,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
pub type BoundaryResult<T> = Result<T, BoxError>;

/// Motor controller and instrument detection.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Scan the mounts. `expected` maps a mount to the instrument name the caller requires.
    async fn get_attached_instruments(
        &self,
        expected: &BTreeMap<Mount, String>,
    ) -> BoundaryResult<BTreeMap<Mount, AttachedInstrument>>;

    /// Scan the gripper mount. Backends without a gripper keep the default.
    async fn get_attached_gripper(&self) -> BoundaryResult<Option<AttachedGripper>> {
        Ok(None)
    }

    async fn configure_mount(&self, mount: Mount, config: MountHardwareConfig)
    -> BoundaryResult<()>;

    /// Home the named axes and return the full position map afterwards.
    async fn home(&self, axes: &[&str]) -> BoundaryResult<AxisMap>;

    /// Move to machine-space targets. `speed` is mm/s; `max_speeds` caps individual axes.
    async fn move_to(
        &self,
        target: &AxisMap,
        speed: Option<f64>,
        home_flagged_axes: bool,
        max_speeds: &AxisMap,
    ) -> BoundaryResult<()>;

    async fn update_position(&self) -> BoundaryResult<AxisMap>;

    /// Move quickly towards home, stopping `margin` mm short, then home slowly.
    async fn fast_home(&self, axes: &[&str], margin: f64) -> BoundaryResult<AxisMap>;

    async fn set_active_current(&self, currents: &AxisMap) -> BoundaryResult<()>;

    async fn probe(&self, axis: &str, distance: f64) -> BoundaryResult<AxisMap>;

    /// `(min, max)` travel per axis code.
    fn axis_bounds(&self) -> BTreeMap<String, (f64, f64)>;

    fn engaged_axes(&self) -> BTreeMap<String, bool>;

    async fn disengage_axes(&self, axes: &[&str]) -> BoundaryResult<()>;

    fn pause(&self);

    fn resume(&self);

    async fn halt(&self) -> BoundaryResult<()>;

    async fn hard_halt(&self) -> BoundaryResult<()>;

    async fn set_lights(&self, button: Option<bool>, rails: Option<bool>) -> BoundaryResult<()>;

    async fn get_lights(&self) -> BoundaryResult<Lights>;

    async fn update_firmware(&self, path: &Path, explicit_modeset: bool) -> BoundaryResult<String>;

    fn fw_version(&self) -> Option<String>;

    fn is_simulator(&self) -> bool;

    async fn clean_up(&self) -> BoundaryResult<()>;
}

/// Kind of deck module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleType {
    Temperature,
    Magnetic,
    Thermocycler,
    HeaterShaker,
}

/// A module plugged into a serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleAtPort {
    pub port: String,
    pub name: String,
}

/// A module the provider has set up.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ModuleInfo {
    pub port: String,
    pub model: String,
    pub module_type: ModuleType,
    pub serial: Option<String>,
    pub simulated: bool,
}

/// Discovery and registration of deck modules.
#[async_trait]
pub trait ModuleProvider: Send + Sync {
    async fn register_modules(
        &self,
        new_at_ports: Vec<ModuleAtPort>,
        removed_at_ports: Vec<ModuleAtPort>,
    ) -> BoundaryResult<()>;

    fn available_modules(&self) -> Vec<ModuleInfo>;

    /// Modules matching `model` and `module_type`, plus a simulated stand-in when none match.
    fn find_modules(
        &self,
        model: &str,
        module_type: ModuleType,
    ) -> (Vec<ModuleInfo>, Option<ModuleInfo>);
}

/// Key-value persistence for calibration data.
pub trait CalibrationStorage: Send + Sync {
    fn load_deck_calibration(&self) -> BoundaryResult<Option<DeckCalibrationData>>;

    fn save_deck_calibration(&self, data: &DeckCalibrationData) -> BoundaryResult<()>;

    /// Offset for the pipette `instrument_id` on `mount`; default offset when none stored.
    fn load_instrument_offset(
        &self,
        instrument_id: Option<&str>,
        mount: Mount,
    ) -> BoundaryResult<InstrumentOffset>;

    fn save_instrument_offset(
        &self,
        instrument_id: &str,
        mount: Mount,
        offset: &InstrumentOffset,
    ) -> BoundaryResult<()>;

    fn delete_instrument_offset(&self, instrument_id: &str, mount: Mount) -> BoundaryResult<()>;

    fn load_gripper_offset(&self, gripper_id: Option<&str>) -> BoundaryResult<InstrumentOffset>;

    fn save_gripper_offset(&self, gripper_id: &str, offset: &InstrumentOffset)
    -> BoundaryResult<()>;
}
