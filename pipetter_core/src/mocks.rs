//! Test and helper mocks for pipetter_core

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use pipetter_traits::{
    AttachedInstrument, AxisMap, Backend, BoundaryResult, Lights, Mount, MountHardwareConfig,
};

/// A backend with nothing attached whose motion calls always fail; useful
/// for exercising construction and the not-homed paths without a simulator.
#[derive(Debug, Default)]
pub struct NoopBackend;

fn refuse<T>(what: &str) -> BoundaryResult<T> {
    Err(Box::new(std::io::Error::other(format!("noop backend: {what}"))))
}

#[async_trait]
impl Backend for NoopBackend {
    async fn get_attached_instruments(
        &self,
        _expected: &BTreeMap<Mount, String>,
    ) -> BoundaryResult<BTreeMap<Mount, AttachedInstrument>> {
        Ok(BTreeMap::new())
    }

    async fn configure_mount(
        &self,
        _mount: Mount,
        _config: MountHardwareConfig,
    ) -> BoundaryResult<()> {
        Ok(())
    }

    async fn home(&self, _axes: &[&str]) -> BoundaryResult<AxisMap> {
        refuse("home")
    }

    async fn move_to(
        &self,
        _target: &AxisMap,
        _speed: Option<f64>,
        _home_flagged_axes: bool,
        _max_speeds: &AxisMap,
    ) -> BoundaryResult<()> {
        refuse("move")
    }

    async fn update_position(&self) -> BoundaryResult<AxisMap> {
        Ok(AxisMap::new())
    }

    async fn fast_home(&self, _axes: &[&str], _margin: f64) -> BoundaryResult<AxisMap> {
        refuse("fast home")
    }

    async fn set_active_current(&self, _currents: &AxisMap) -> BoundaryResult<()> {
        Ok(())
    }

    async fn probe(&self, _axis: &str, _distance: f64) -> BoundaryResult<AxisMap> {
        refuse("probe")
    }

    fn axis_bounds(&self) -> BTreeMap<String, (f64, f64)> {
        BTreeMap::new()
    }

    fn engaged_axes(&self) -> BTreeMap<String, bool> {
        BTreeMap::new()
    }

    async fn disengage_axes(&self, _axes: &[&str]) -> BoundaryResult<()> {
        Ok(())
    }

    fn pause(&self) {}

    fn resume(&self) {}

    async fn halt(&self) -> BoundaryResult<()> {
        Ok(())
    }

    async fn hard_halt(&self) -> BoundaryResult<()> {
        Ok(())
    }

    async fn set_lights(&self, _button: Option<bool>, _rails: Option<bool>) -> BoundaryResult<()> {
        Ok(())
    }

    async fn get_lights(&self) -> BoundaryResult<Lights> {
        Ok(Lights::default())
    }

    async fn update_firmware(&self, _path: &Path, _explicit_modeset: bool) -> BoundaryResult<String> {
        refuse("firmware update")
    }

    fn fw_version(&self) -> Option<String> {
        None
    }

    fn is_simulator(&self) -> bool {
        true
    }

    async fn clean_up(&self) -> BoundaryResult<()> {
        Ok(())
    }
}
