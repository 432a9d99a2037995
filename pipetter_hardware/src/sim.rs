//! In-process simulated motor controller.
//!
//! Tracks axis positions, currents and engaged state in memory and reports
//! instruments from embedded definitions. Faults can be injected on chosen
//! move calls to exercise recovery paths.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use pipetter_config::{Config, SimInstrument, builtin_gripper, builtin_pipette};
use pipetter_traits::{
    AttachedGripper, AttachedInstrument, AxisMap, Backend, BoundaryResult, Lights, Mount,
    MountHardwareConfig,
};

use crate::error::{HwError, Result};

const PIPETTE_AXES: [(&str, f64, f64); 6] = [
    ("X", 0.0, 418.0),
    ("Y", 0.0, 353.0),
    ("Z", 0.0, 218.0),
    ("A", 0.0, 218.0),
    ("B", -40.0, 19.0),
    ("C", -40.0, 19.0),
];

const GRIPPER_AXES: [(&str, f64, f64); 2] = [("D", 0.0, 190.0), ("G", 0.0, 20.0)];

#[derive(Debug, Default)]
struct SimState {
    position: AxisMap,
    engaged: BTreeMap<String, bool>,
    currents: AxisMap,
    lights: Lights,
    mount_configs: BTreeMap<Mount, MountHardwareConfig>,
    moves: Vec<AxisMap>,
    move_calls: usize,
    paused: bool,
    halts: usize,
    homes: usize,
}

/// Simulated [`Backend`] used for tests, dry runs and the CLI self-check.
#[derive(Debug)]
pub struct SimulatedBackend {
    attached: BTreeMap<Mount, SimInstrument>,
    gripper: Option<SimInstrument>,
    bounds: BTreeMap<String, (f64, f64)>,
    home: AxisMap,
    move_delay: Duration,
    strict_attached: bool,
    fail_on_moves: BTreeSet<usize>,
    state: Mutex<SimState>,
}

/// Builder for [`SimulatedBackend`].
#[derive(Debug, Default)]
pub struct SimulatedBackendBuilder {
    attached: BTreeMap<Mount, SimInstrument>,
    gripper: Option<SimInstrument>,
    gripper_axes: bool,
    bounds: BTreeMap<String, (f64, f64)>,
    move_delay: Duration,
    lenient: bool,
    fail_on_moves: BTreeSet<usize>,
}

impl SimulatedBackendBuilder {
    pub fn with_instrument(mut self, mount: Mount, model: &str, id: Option<&str>) -> Self {
        self.attached.insert(
            mount,
            SimInstrument {
                model: model.to_string(),
                id: id.map(str::to_string),
            },
        );
        self
    }

    /// Enable the gripper axes, optionally with a gripper attached.
    pub fn with_gripper(mut self, model: Option<&str>, id: Option<&str>) -> Self {
        self.gripper_axes = true;
        self.gripper = model.map(|m| SimInstrument {
            model: m.to_string(),
            id: id.map(str::to_string),
        });
        self
    }

    pub fn with_axis_bounds(mut self, axis: &str, min: f64, max: f64) -> Self {
        self.bounds.insert(axis.to_string(), (min, max));
        self
    }

    pub fn with_move_delay(mut self, delay: Duration) -> Self {
        self.move_delay = delay;
        self
    }

    /// Fail the `n`th call to `move_to` (1-based).
    pub fn fail_move(mut self, n: usize) -> Self {
        self.fail_on_moves.insert(n);
        self
    }

    /// Substitute the requested instrument instead of failing on a mismatch.
    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    pub fn build(self) -> Result<SimulatedBackend> {
        for inst in self.attached.values() {
            builtin_pipette(&inst.model).map_err(|_| HwError::UnknownModel(inst.model.clone()))?;
        }
        if let Some(g) = &self.gripper {
            builtin_gripper(&g.model).map_err(|_| HwError::UnknownModel(g.model.clone()))?;
        }

        let mut bounds: BTreeMap<String, (f64, f64)> = PIPETTE_AXES
            .iter()
            .map(|(a, lo, hi)| ((*a).to_string(), (*lo, *hi)))
            .collect();
        if self.gripper_axes {
            bounds.extend(
                GRIPPER_AXES
                    .iter()
                    .map(|(a, lo, hi)| ((*a).to_string(), (*lo, *hi))),
            );
        }
        for (axis, b) in self.bounds {
            if !bounds.contains_key(&axis) {
                return Err(HwError::UnknownAxis(axis));
            }
            bounds.insert(axis, b);
        }

        // Home sits at the top of travel, except the jaw which homes fully open.
        let home: AxisMap = bounds
            .iter()
            .map(|(a, (lo, hi))| (a.clone(), if a == "G" { *lo } else { *hi }))
            .collect();
        let state = SimState {
            position: home.clone(),
            engaged: home.keys().map(|a| (a.clone(), true)).collect(),
            ..SimState::default()
        };

        Ok(SimulatedBackend {
            attached: self.attached,
            gripper: self.gripper,
            bounds,
            home,
            move_delay: self.move_delay,
            strict_attached: !self.lenient,
            fail_on_moves: self.fail_on_moves,
            state: Mutex::new(state),
        })
    }
}

impl SimulatedBackend {
    pub fn builder() -> SimulatedBackendBuilder {
        SimulatedBackendBuilder::default()
    }

    /// Build from the `[simulation]` and `[features]` tables of a config file.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let sim = &cfg.simulation;
        let mut b = Self::builder().with_move_delay(Duration::from_millis(sim.move_delay_ms));
        for (mount, inst) in [(Mount::Left, &sim.left), (Mount::Right, &sim.right)] {
            if let Some(i) = inst {
                b = b.with_instrument(mount, &i.model, i.id.as_deref());
            }
        }
        if cfg.features.gripper {
            b = match &sim.gripper {
                Some(g) => b.with_gripper(Some(&g.model), g.id.as_deref()),
                None => b.with_gripper(None, None),
            };
        }
        for (axis, [lo, hi]) in &sim.axis_bounds {
            b = b.with_axis_bounds(axis, *lo, *hi);
        }
        b.build()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn check_axes<'a>(&self, axes: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for a in axes {
            if !self.bounds.contains_key(a) {
                return Err(HwError::UnknownAxis(a.to_string()));
            }
        }
        Ok(())
    }

    /// Every successful move target, in call order.
    pub fn moves(&self) -> Vec<AxisMap> {
        self.state().moves.clone()
    }

    /// Last current set per axis.
    pub fn active_currents(&self) -> AxisMap {
        self.state().currents.clone()
    }

    pub fn mount_config(&self, mount: Mount) -> Option<MountHardwareConfig> {
        self.state().mount_configs.get(&mount).copied()
    }

    /// Home and fast-home calls, failed ones included.
    pub fn home_count(&self) -> usize {
        self.state().homes
    }

    pub fn halt_count(&self) -> usize {
        self.state().halts
    }

    pub fn is_paused(&self) -> bool {
        self.state().paused
    }

    fn attached_to_mount(&self, mount: Mount, expected: Option<&String>) -> Result<AttachedInstrument> {
        let found = self.attached.get(&mount);
        let load = |name: &str| {
            builtin_pipette(name).map_err(|_| HwError::UnknownModel(name.to_string()))
        };
        match (found, expected) {
            (Some(inst), Some(want)) => {
                let cfg = load(&inst.model)?;
                if cfg.accepts_name(want) || cfg.model == *want {
                    Ok(AttachedInstrument {
                        config: Some(cfg),
                        id: inst.id.clone(),
                    })
                } else if self.strict_attached {
                    Err(HwError::InstrumentMismatch {
                        mount: mount.to_string(),
                        expected: want.clone(),
                        found: inst.model.clone(),
                    })
                } else {
                    Ok(AttachedInstrument {
                        config: Some(load(want)?),
                        id: None,
                    })
                }
            }
            (Some(inst), None) => Ok(AttachedInstrument {
                config: Some(load(&inst.model)?),
                id: inst.id.clone(),
            }),
            (None, Some(want)) => Ok(AttachedInstrument {
                config: Some(load(want)?),
                id: None,
            }),
            (None, None) => Ok(AttachedInstrument::default()),
        }
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    async fn get_attached_instruments(
        &self,
        expected: &BTreeMap<Mount, String>,
    ) -> BoundaryResult<BTreeMap<Mount, AttachedInstrument>> {
        let mut out = BTreeMap::new();
        for mount in Mount::PIPETTES {
            out.insert(mount, self.attached_to_mount(mount, expected.get(&mount))?);
        }
        Ok(out)
    }

    async fn get_attached_gripper(&self) -> BoundaryResult<Option<AttachedGripper>> {
        match &self.gripper {
            Some(g) => Ok(Some(AttachedGripper {
                config: builtin_gripper(&g.model)
                    .map_err(|_| HwError::UnknownModel(g.model.clone()))?,
                id: g.id.clone(),
            })),
            None => Ok(None),
        }
    }

    async fn configure_mount(
        &self,
        mount: Mount,
        config: MountHardwareConfig,
    ) -> BoundaryResult<()> {
        tracing::debug!(%mount, ?config, "sim: configure mount");
        self.state().mount_configs.insert(mount, config);
        Ok(())
    }

    async fn home(&self, axes: &[&str]) -> BoundaryResult<AxisMap> {
        self.state().homes += 1;
        self.check_axes(axes.iter().copied())?;
        let mut st = self.state();
        let targets: Vec<String> = if axes.is_empty() {
            self.home.keys().cloned().collect()
        } else {
            axes.iter().map(|a| (*a).to_string()).collect()
        };
        for a in targets {
            if let Some(h) = self.home.get(&a) {
                st.position.insert(a.clone(), *h);
                st.engaged.insert(a, true);
            }
        }
        Ok(st.position.clone())
    }

    async fn move_to(
        &self,
        target: &AxisMap,
        speed: Option<f64>,
        _home_flagged_axes: bool,
        _max_speeds: &AxisMap,
    ) -> BoundaryResult<()> {
        self.check_axes(target.keys().map(String::as_str))?;
        let call = {
            let mut st = self.state();
            st.move_calls += 1;
            st.move_calls
        };
        if !self.move_delay.is_zero() {
            tokio::time::sleep(self.move_delay).await;
        }
        if self.fail_on_moves.contains(&call) {
            return Err(Box::new(HwError::MotionFault(format!(
                "injected failure on move {call}"
            ))));
        }
        tracing::trace!(?target, ?speed, "sim: move");
        let mut st = self.state();
        for (a, v) in target {
            st.position.insert(a.clone(), *v);
            st.engaged.insert(a.clone(), true);
        }
        st.moves.push(target.clone());
        Ok(())
    }

    async fn update_position(&self) -> BoundaryResult<AxisMap> {
        Ok(self.state().position.clone())
    }

    async fn fast_home(&self, axes: &[&str], _margin: f64) -> BoundaryResult<AxisMap> {
        self.home(axes).await
    }

    async fn set_active_current(&self, currents: &AxisMap) -> BoundaryResult<()> {
        self.check_axes(currents.keys().map(String::as_str))?;
        let mut st = self.state();
        for (a, c) in currents {
            st.currents.insert(a.clone(), *c);
        }
        Ok(())
    }

    async fn probe(&self, axis: &str, distance: f64) -> BoundaryResult<AxisMap> {
        self.check_axes([axis])?;
        let mut st = self.state();
        let cur = st.position.get(axis).copied().unwrap_or_default();
        st.position.insert(axis.to_string(), cur + distance);
        Ok(st.position.clone())
    }

    fn axis_bounds(&self) -> BTreeMap<String, (f64, f64)> {
        self.bounds.clone()
    }

    fn engaged_axes(&self) -> BTreeMap<String, bool> {
        self.state().engaged.clone()
    }

    async fn disengage_axes(&self, axes: &[&str]) -> BoundaryResult<()> {
        self.check_axes(axes.iter().copied())?;
        let mut st = self.state();
        for a in axes {
            st.engaged.insert((*a).to_string(), false);
        }
        Ok(())
    }

    fn pause(&self) {
        self.state().paused = true;
    }

    fn resume(&self) {
        self.state().paused = false;
    }

    async fn halt(&self) -> BoundaryResult<()> {
        self.state().halts += 1;
        Ok(())
    }

    async fn hard_halt(&self) -> BoundaryResult<()> {
        let mut st = self.state();
        st.halts += 1;
        for v in st.engaged.values_mut() {
            *v = false;
        }
        Ok(())
    }

    async fn set_lights(&self, button: Option<bool>, rails: Option<bool>) -> BoundaryResult<()> {
        let mut st = self.state();
        if let Some(b) = button {
            st.lights.button = b;
        }
        if let Some(r) = rails {
            st.lights.rails = r;
        }
        Ok(())
    }

    async fn get_lights(&self) -> BoundaryResult<Lights> {
        Ok(self.state().lights)
    }

    async fn update_firmware(
        &self,
        path: &Path,
        _explicit_modeset: bool,
    ) -> BoundaryResult<String> {
        Ok(format!("simulated firmware update from {}", path.display()))
    }

    fn fw_version(&self) -> Option<String> {
        Some("v1.0.0-sim".to_string())
    }

    fn is_simulator(&self) -> bool {
        true
    }

    async fn clean_up(&self) -> BoundaryResult<()> {
        Ok(())
    }
}
