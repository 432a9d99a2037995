//! Type-state builder for `HardwareApi` and the exclusive backend handle.
//!
//! The builder enforces at compile time that a backend is provided before
//! `build()` is available. `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pipetter_config::{CalibrationCfg, Config};
use pipetter_traits::{Backend, CalibrationStorage, ModuleProvider, Point};

use crate::api::{HardwareApi, Parts};
use crate::calibration::{FileCalibrationStore, InMemoryCalibrationStore};
use crate::config::{FeatureCfg, GateCfg, MotionCfg, RobotCfg};
use crate::error::{BuildError, Result};
use crate::hw_error::backend_report;
use crate::transform::{Attitude, DeckCalibration};

// ── Exclusive backend handle ─────────────────────────────────────────────────

/// A backend that at most one live `HardwareApi` may drive.
///
/// Clones share the checkout flag; building a second controller from any
/// clone fails with [`BuildError::BackendInUse`] until the first is dropped.
#[derive(Clone)]
pub struct BackendPort {
    backend: Arc<dyn Backend>,
    checked_out: Arc<AtomicBool>,
}

impl core::fmt::Debug for BackendPort {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BackendPort")
            .field("simulator", &self.backend.is_simulator())
            .field("checked_out", &self.is_checked_out())
            .finish()
    }
}

impl BackendPort {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    pub fn from_arc(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            checked_out: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_checked_out(&self) -> bool {
        self.checked_out.load(Ordering::Acquire)
    }

    fn checkout(&self) -> std::result::Result<(Arc<dyn Backend>, PortLease), BuildError> {
        if self
            .checked_out
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BuildError::BackendInUse);
        }
        Ok((
            Arc::clone(&self.backend),
            PortLease {
                flag: Arc::clone(&self.checked_out),
            },
        ))
    }
}

/// Held by a live controller; returns the port on drop.
#[derive(Debug)]
pub(crate) struct PortLease {
    flag: Arc<AtomicBool>,
}

impl Drop for PortLease {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        tracing::debug!("backend port released");
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `HardwareApi`.
pub struct HardwareApiBuilder<B> {
    port: Option<BackendPort>,
    modules: Option<Arc<dyn ModuleProvider>>,
    store: Option<Arc<dyn CalibrationStorage>>,
    robot: Option<RobotCfg>,
    motion: Option<MotionCfg>,
    gate: Option<GateCfg>,
    features: Option<FeatureCfg>,
    calibration: Option<CalibrationCfg>,
    _b: PhantomData<B>,
}

impl Default for HardwareApiBuilder<Missing> {
    fn default() -> Self {
        Self {
            port: None,
            modules: None,
            store: None,
            robot: None,
            motion: None,
            gate: None,
            features: None,
            calibration: None,
            _b: PhantomData,
        }
    }
}

fn validate(robot: &RobotCfg) -> std::result::Result<(), BuildError> {
    let finite = |p: Point| p.x.is_finite() && p.y.is_finite() && p.z.is_finite();
    if !finite(robot.left_mount_offset) || !finite(robot.gripper_mount_offset) {
        return Err(BuildError::InvalidConfig("mount offsets must be finite"));
    }
    if !robot.mount_critical_point_z.is_finite() {
        return Err(BuildError::InvalidConfig("mount_critical_point_z must be finite"));
    }
    if robot.retract_margin.is_sign_negative() {
        return Err(BuildError::InvalidConfig("retract_margin must be >= 0"));
    }
    if robot.z_retract_distance.is_sign_negative() {
        return Err(BuildError::InvalidConfig("z_retract_distance must be >= 0"));
    }
    if robot.z_run_current <= 0.0 || robot.plunger_run_current <= 0.0 {
        return Err(BuildError::InvalidConfig("run currents must be > 0"));
    }
    Ok(())
}

/// Stored calibration wins; a configured attitude is used until one is saved.
fn load_deck(store: &dyn CalibrationStorage, cfg: &CalibrationCfg) -> Result<DeckCalibration> {
    let stored = store
        .load_deck_calibration()
        .map_err(|e| backend_report(e, "loading deck calibration failed"))?;
    match (stored, cfg.attitude) {
        (Some(data), _) => DeckCalibration::from_data(&data),
        (None, Some(m)) => Ok(DeckCalibration {
            attitude: Attitude::new(m, Point::from(cfg.translation))?,
            ..DeckCalibration::default()
        }),
        (None, None) => Ok(DeckCalibration::default()),
    }
}

impl<B> HardwareApiBuilder<B> {
    /// Fallible build available in any type-state.
    ///
    /// Checks out the backend, loads the deck calibration and scans the mounts.
    pub async fn try_build(self) -> Result<HardwareApi> {
        let port = self
            .port
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBackend))?;
        let robot = self.robot.unwrap_or_default();
        validate(&robot).map_err(eyre::Report::new)?;

        let calibration = self.calibration.unwrap_or_default();
        let store: Arc<dyn CalibrationStorage> = match (self.store, &calibration.dir) {
            (Some(s), _) => s,
            (None, Some(dir)) => Arc::new(FileCalibrationStore::new(dir)),
            (None, None) => Arc::new(InMemoryCalibrationStore::new()),
        };
        let deck = load_deck(store.as_ref(), &calibration)?;

        let (backend, lease) = port.checkout().map_err(eyre::Report::new)?;
        let api = HardwareApi::from_parts(Parts {
            backend,
            lease: Some(lease),
            modules: self.modules,
            store,
            robot,
            motion: self.motion.unwrap_or_default(),
            gate: self.gate.unwrap_or_default(),
            features: self.features.unwrap_or_default(),
            deck,
        });
        api.cache_instruments(None).await?;
        tracing::info!(
            simulator = api.is_simulator(),
            deck = ?api.deck_transform_state(),
            "hardware controller ready"
        );
        Ok(api)
    }
}

/// Chainable setters that do not affect type-state.
impl<B> HardwareApiBuilder<B> {
    pub fn with_modules(mut self, modules: Arc<dyn ModuleProvider>) -> Self {
        self.modules = Some(modules);
        self
    }
    pub fn with_calibration_store(mut self, store: Arc<dyn CalibrationStorage>) -> Self {
        self.store = Some(store);
        self
    }
    pub fn with_robot(mut self, robot: RobotCfg) -> Self {
        self.robot = Some(robot);
        self
    }
    pub fn with_motion(mut self, motion: MotionCfg) -> Self {
        self.motion = Some(motion);
        self
    }
    pub fn with_gate(mut self, gate: GateCfg) -> Self {
        self.gate = Some(gate);
        self
    }
    pub fn with_features(mut self, features: FeatureCfg) -> Self {
        self.features = Some(features);
        self
    }
    /// Take robot, motion, gate, feature and calibration settings from a config file.
    pub fn with_config(mut self, cfg: &Config) -> Self {
        self.robot = Some((&cfg.robot).into());
        self.motion = Some((&cfg.motion).into());
        self.gate = Some((&cfg.execution).into());
        self.features = Some((&cfg.features).into());
        self.calibration = Some(cfg.calibration.clone());
        self
    }
}

// Setters that advance type-state
impl HardwareApiBuilder<Missing> {
    pub fn with_backend(self, port: BackendPort) -> HardwareApiBuilder<Set> {
        HardwareApiBuilder {
            port: Some(port),
            modules: self.modules,
            store: self.store,
            robot: self.robot,
            motion: self.motion,
            gate: self.gate,
            features: self.features,
            calibration: self.calibration,
            _b: PhantomData,
        }
    }
}

impl HardwareApiBuilder<Set> {
    /// Only available once a backend is set.
    pub async fn build(self) -> Result<HardwareApi> {
        self.try_build().await
    }
}

#[cfg(feature = "simulator")]
impl HardwareApi {
    /// Controller over the simulated backend and modules described by `cfg`,
    /// with in-memory calibration storage.
    pub async fn build_simulator(cfg: &Config) -> Result<HardwareApi> {
        use eyre::WrapErr;
        use pipetter_hardware::{SimulatedBackend, SimulatedModules};

        cfg.validate()?;
        let backend = SimulatedBackend::from_config(cfg).wrap_err("building simulated backend")?;
        let modules = SimulatedModules::with_modules(&cfg.simulation.modules)
            .wrap_err("building simulated modules")?;
        HardwareApi::builder()
            .with_backend(BackendPort::new(backend))
            .with_modules(Arc::new(modules))
            .with_calibration_store(Arc::new(InMemoryCalibrationStore::new()))
            .with_config(cfg)
            .build()
            .await
    }
}
