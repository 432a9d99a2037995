//! The public control surface.
//!
//! [`HardwareApi`] owns the position store, the motion lock, the execution
//! gate and one instrument slot per mount. Every motion-initiating call
//! passes the gate first, plans against a snapshot of instrument state,
//! performs its backend calls under the motion lock and commits the state
//! change afterwards. Instrument slots sit behind a plain mutex that is never
//! held across an `.await`.

mod gripper;
mod instruments;
mod liquid;
mod motion;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use pipetter_traits::{
    Backend, CalibrationStorage, Lights, ModuleAtPort, ModuleInfo, ModuleProvider, ModuleType,
    Mount,
};

use crate::builder::{HardwareApiBuilder, Missing, PortLease};
use crate::config::{FeatureCfg, GateCfg, MotionCfg, RobotCfg};
use crate::error::{HardwareError, Result, fail};
use crate::gate::{ExecutionGate, PauseManager, PauseState, cancellable_sleep};
use crate::hw_error::backend_report;
use crate::instrument::{Gripper, Pipette};
use crate::position::{AxisPositionStore, MotionLock};
use crate::transform::{CalibrationCell, DeckCalibration, DeckTransformState};
use crate::types::{Axis, PauseType};
use crate::util::lock;

pub use motion::MoveOptions;

#[derive(Debug, Default)]
pub(crate) struct Instruments {
    pub(crate) pipettes: BTreeMap<Mount, Pipette>,
    pub(crate) gripper: Option<Gripper>,
}

/// Everything the builder hands over.
pub(crate) struct Parts {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) lease: Option<PortLease>,
    pub(crate) modules: Option<Arc<dyn ModuleProvider>>,
    pub(crate) store: Arc<dyn CalibrationStorage>,
    pub(crate) robot: RobotCfg,
    pub(crate) motion: MotionCfg,
    pub(crate) gate: GateCfg,
    pub(crate) features: FeatureCfg,
    pub(crate) deck: DeckCalibration,
}

pub struct HardwareApi {
    backend: Arc<dyn Backend>,
    modules: Option<Arc<dyn ModuleProvider>>,
    store: Arc<dyn CalibrationStorage>,
    robot: RobotCfg,
    motion: MotionCfg,
    gate_cfg: GateCfg,
    features: FeatureCfg,
    motion_lock: MotionLock,
    positions: AxisPositionStore,
    gate: ExecutionGate,
    pauses: PauseManager,
    calibration: CalibrationCell,
    instruments: Mutex<Instruments>,
    last_moved: Mutex<Option<Mount>>,
    // Released on drop so the backend can be checked out again.
    _lease: Option<PortLease>,
}

impl std::fmt::Debug for HardwareApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareApi")
            .field("simulator", &self.backend.is_simulator())
            .field("gate", &self.gate.state())
            .field("positions", &self.positions.snapshot())
            .field("instruments", &*lock(&self.instruments))
            .finish_non_exhaustive()
    }
}

impl HardwareApi {
    pub fn builder() -> HardwareApiBuilder<Missing> {
        HardwareApiBuilder::default()
    }

    pub(crate) fn from_parts(p: Parts) -> Self {
        Self {
            backend: p.backend,
            modules: p.modules,
            store: p.store,
            robot: p.robot,
            motion: p.motion,
            gate_cfg: p.gate,
            features: p.features,
            motion_lock: MotionLock::new(),
            positions: AxisPositionStore::new(),
            gate: ExecutionGate::new(),
            pauses: PauseManager::new(),
            calibration: CalibrationCell::new(p.deck),
            instruments: Mutex::new(Instruments::default()),
            last_moved: Mutex::new(None),
            _lease: p.lease,
        }
    }

    pub fn robot_config(&self) -> &RobotCfg {
        &self.robot
    }

    pub fn execution_gate(&self) -> &ExecutionGate {
        &self.gate
    }

    pub fn is_simulator(&self) -> bool {
        self.backend.is_simulator()
    }

    pub fn fw_version(&self) -> Option<String> {
        self.backend.fw_version()
    }

    /// Motion-initiating calls wait here while paused and fail once cancelled.
    async fn check_gate(&self) -> Result<()> {
        if self.gate_cfg.bypass_when_simulating && self.backend.is_simulator() {
            return Ok(());
        }
        self.gate.wait_for_running().await
    }

    fn slots(&self) -> MutexGuard<'_, Instruments> {
        lock(&self.instruments)
    }

    /// Snapshot of the pipette on `mount`.
    fn pipette(&self, mount: Mount) -> Result<Pipette> {
        match self.slots().pipettes.get(&mount) {
            Some(p) => Ok(p.clone()),
            None => fail(HardwareError::InstrumentNotAttached { mount }),
        }
    }

    fn with_pipette<R>(&self, mount: Mount, f: impl FnOnce(&mut Pipette) -> Result<R>) -> Result<R> {
        let mut slots = self.slots();
        match slots.pipettes.get_mut(&mount) {
            Some(p) => f(p),
            None => fail(HardwareError::InstrumentNotAttached { mount }),
        }
    }

    fn require_gripper_capability(&self) -> Result<()> {
        if self.features.gripper {
            Ok(())
        } else {
            fail(HardwareError::UnsupportedHardware(
                "this robot has no gripper capability".into(),
            ))
        }
    }

    // ── Execution control ────────────────────────────────────────────────────

    pub fn pause_state(&self) -> PauseState {
        self.gate.state()
    }

    pub fn pause(&self, reason: PauseType) {
        self.pauses.pause(reason);
        self.gate.pause();
        self.backend.pause();
        tracing::info!(?reason, "paused");
    }

    /// Drop one pause reason; execution resumes once none remain.
    pub fn resume(&self, reason: PauseType) {
        self.pauses.resume(reason);
        if !self.pauses.should_pause() {
            self.gate.resume();
            self.backend.resume();
            tracing::info!("resumed");
        } else {
            tracing::debug!(?reason, "pause reason cleared; others outstanding");
        }
    }

    /// Pause for `duration`. A cancel during the wait fails immediately.
    pub async fn delay(&self, duration: Duration) -> Result<()> {
        self.check_gate().await?;
        self.pause(PauseType::Delay);
        let result = {
            let reg = self.gate.register();
            cancellable_sleep(reg.token(), duration).await
        };
        self.resume(PauseType::Delay);
        result
    }

    /// Stop motion now. Leaves the gate alone.
    pub async fn halt(&self, disengage_before_stopping: bool) -> Result<()> {
        if disengage_before_stopping {
            self.backend
                .hard_halt()
                .await
                .map_err(|e| backend_report(e, "hard halt failed"))?;
        }
        self.backend
            .halt()
            .await
            .map_err(|e| backend_report(e, "halt failed"))?;
        tracing::warn!(disengage_before_stopping, "halted");
        Ok(())
    }

    /// Halt, cancel pending work, clear state and rescan instruments.
    pub async fn stop(&self, home_after: bool) -> Result<()> {
        tracing::info!(home_after, "stopping");
        self.halt(false).await?;
        self.gate.cancel();
        self.reset();
        self.cache_instruments(None).await?;
        if home_after {
            self.home(None).await?;
        }
        Ok(())
    }

    /// Gate back to running, pause reasons cleared, instrument slots emptied.
    pub fn reset(&self) {
        self.gate.reset();
        self.pauses.reset();
        *self.slots() = Instruments::default();
        *lock(&self.last_moved) = None;
        tracing::info!("controller state reset");
    }

    pub async fn clean_up(&self) -> Result<()> {
        self.backend
            .clean_up()
            .await
            .map_err(|e| backend_report(e, "backend clean-up failed"))
    }

    // ── Passthroughs ─────────────────────────────────────────────────────────

    pub fn engaged_axes(&self) -> BTreeMap<Axis, bool> {
        self.backend
            .engaged_axes()
            .into_iter()
            .filter_map(|(code, on)| Axis::from_code(&code).map(|a| (a, on)))
            .collect()
    }

    pub async fn disengage_axes(&self, axes: &[Axis]) -> Result<()> {
        let codes: Vec<&str> = axes.iter().map(|a| a.code()).collect();
        self.backend
            .disengage_axes(&codes)
            .await
            .map_err(|e| backend_report(e, "disengage failed"))
    }

    pub async fn set_lights(&self, button: Option<bool>, rails: Option<bool>) -> Result<()> {
        self.backend
            .set_lights(button, rails)
            .await
            .map_err(|e| backend_report(e, "set lights failed"))
    }

    pub async fn get_lights(&self) -> Result<Lights> {
        self.backend
            .get_lights()
            .await
            .map_err(|e| backend_report(e, "get lights failed"))
    }

    pub async fn update_firmware(&self, path: &Path, explicit_modeset: bool) -> Result<String> {
        tracing::info!(path = %path.display(), "updating firmware");
        self.backend
            .update_firmware(path, explicit_modeset)
            .await
            .map_err(|e| backend_report(e, "firmware update failed"))
    }

    pub fn attached_modules(&self) -> Vec<ModuleInfo> {
        self.modules
            .as_ref()
            .map(|m| m.available_modules())
            .unwrap_or_default()
    }

    pub async fn register_modules(
        &self,
        new_at_ports: Vec<ModuleAtPort>,
        removed_at_ports: Vec<ModuleAtPort>,
    ) -> Result<()> {
        let Some(m) = &self.modules else {
            return fail(HardwareError::UnsupportedHardware(
                "no module provider configured".into(),
            ));
        };
        m.register_modules(new_at_ports, removed_at_ports)
            .await
            .map_err(|e| backend_report(e, "module registration failed"))
    }

    pub fn find_modules(
        &self,
        model: &str,
        module_type: ModuleType,
    ) -> (Vec<ModuleInfo>, Option<ModuleInfo>) {
        match &self.modules {
            Some(m) => m.find_modules(model, module_type),
            None => (Vec::new(), None),
        }
    }

    // ── Deck calibration ─────────────────────────────────────────────────────

    pub fn deck_calibration(&self) -> Arc<DeckCalibration> {
        self.calibration.load()
    }

    pub fn deck_transform_state(&self) -> DeckTransformState {
        self.calibration.transform_state()
    }

    /// Persist and activate a new deck calibration.
    pub fn set_deck_calibration(&self, cal: DeckCalibration) -> Result<()> {
        self.store
            .save_deck_calibration(&cal.to_data())
            .map_err(|e| backend_report(e, "saving deck calibration failed"))?;
        let generation = self.calibration.swap(cal);
        tracing::info!(generation, "deck calibration replaced");
        Ok(())
    }

    /// Fall back to the identity transform until a calibration is saved.
    pub fn reset_deck_calibration(&self) {
        let generation = self.calibration.swap(DeckCalibration::default());
        tracing::info!(generation, "deck calibration reset to identity");
    }
}

fn now_secs() -> Option<u64> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}
