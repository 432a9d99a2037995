//! Concurrent callers never overlap backend motion.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pipetter_core::{BackendPort, HardwareApi, MoveOptions};
use pipetter_hardware::SimulatedBackend;
use pipetter_traits::{
    AttachedInstrument, AxisMap, Backend, BoundaryResult, Lights, Mount, MountHardwareConfig, Point,
};

/// Wraps the simulator and records how many motion calls are in flight at once.
struct Recording {
    inner: SimulatedBackend,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Recording {
    fn new(inner: SimulatedBackend) -> Self {
        Self {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    async fn track<T>(&self, f: impl std::future::Future<Output = T>) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(2)).await;
        let out = f.await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

#[async_trait]
impl Backend for Recording {
    async fn get_attached_instruments(
        &self,
        expected: &BTreeMap<Mount, String>,
    ) -> BoundaryResult<BTreeMap<Mount, AttachedInstrument>> {
        self.inner.get_attached_instruments(expected).await
    }
    async fn configure_mount(&self, mount: Mount, config: MountHardwareConfig) -> BoundaryResult<()> {
        self.inner.configure_mount(mount, config).await
    }
    async fn home(&self, axes: &[&str]) -> BoundaryResult<AxisMap> {
        self.track(self.inner.home(axes)).await
    }
    async fn move_to(
        &self,
        target: &AxisMap,
        speed: Option<f64>,
        home_flagged_axes: bool,
        max_speeds: &AxisMap,
    ) -> BoundaryResult<()> {
        self.track(self.inner.move_to(target, speed, home_flagged_axes, max_speeds))
            .await
    }
    async fn update_position(&self) -> BoundaryResult<AxisMap> {
        self.inner.update_position().await
    }
    async fn fast_home(&self, axes: &[&str], margin: f64) -> BoundaryResult<AxisMap> {
        self.track(self.inner.fast_home(axes, margin)).await
    }
    async fn set_active_current(&self, currents: &AxisMap) -> BoundaryResult<()> {
        self.inner.set_active_current(currents).await
    }
    async fn probe(&self, axis: &str, distance: f64) -> BoundaryResult<AxisMap> {
        self.track(self.inner.probe(axis, distance)).await
    }
    fn axis_bounds(&self) -> BTreeMap<String, (f64, f64)> {
        self.inner.axis_bounds()
    }
    fn engaged_axes(&self) -> BTreeMap<String, bool> {
        self.inner.engaged_axes()
    }
    async fn disengage_axes(&self, axes: &[&str]) -> BoundaryResult<()> {
        self.inner.disengage_axes(axes).await
    }
    fn pause(&self) {
        self.inner.pause();
    }
    fn resume(&self) {
        self.inner.resume();
    }
    async fn halt(&self) -> BoundaryResult<()> {
        self.inner.halt().await
    }
    async fn hard_halt(&self) -> BoundaryResult<()> {
        self.inner.hard_halt().await
    }
    async fn set_lights(&self, button: Option<bool>, rails: Option<bool>) -> BoundaryResult<()> {
        self.inner.set_lights(button, rails).await
    }
    async fn get_lights(&self) -> BoundaryResult<Lights> {
        self.inner.get_lights().await
    }
    async fn update_firmware(&self, path: &Path, explicit_modeset: bool) -> BoundaryResult<String> {
        self.inner.update_firmware(path, explicit_modeset).await
    }
    fn fw_version(&self) -> Option<String> {
        self.inner.fw_version()
    }
    fn is_simulator(&self) -> bool {
        self.inner.is_simulator()
    }
    async fn clean_up(&self) -> BoundaryResult<()> {
        self.inner.clean_up().await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_moves_are_serialized() {
    let sim = SimulatedBackend::builder()
        .with_instrument(Mount::Left, "p300_single_v2.1", Some("P3H1"))
        .with_instrument(Mount::Right, "p20_single_v2.1", Some("P20R"))
        .build()
        .unwrap();
    let rec = Arc::new(Recording::new(sim));
    let api = Arc::new(
        HardwareApi::builder()
            .with_backend(BackendPort::from_arc(rec.clone()))
            .build()
            .await
            .unwrap(),
    );
    api.home(None).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8u32 {
        let api = api.clone();
        tasks.push(tokio::spawn(async move {
            let mount = if i % 2 == 0 { Mount::Left } else { Mount::Right };
            let x = 50.0 + f64::from(i) * 10.0;
            api.move_to(mount, Point::new(x, 100.0, 150.0), MoveOptions::default())
                .await?;
            api.move_rel(mount, Point::new(0.0, 5.0, 0.0), MoveOptions::default())
                .await
        }));
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    assert_eq!(rec.peak.load(Ordering::SeqCst), 1);
    assert!(rec.calls.load(Ordering::SeqCst) > 16);
    assert!(
        api.current_position(Mount::Left, None, false, true)
            .await
            .is_ok()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mount_switch_retract_and_move_are_one_step() {
    let sim = Arc::new(
        SimulatedBackend::builder()
            .with_instrument(Mount::Left, "p300_single_v2.1", Some("P3H1"))
            .with_instrument(Mount::Right, "p20_single_v2.1", Some("P20R"))
            .with_move_delay(Duration::from_millis(50))
            .build()
            .unwrap(),
    );
    let api = Arc::new(
        HardwareApi::builder()
            .with_backend(BackendPort::from_arc(sim.clone()))
            .build()
            .await
            .unwrap(),
    );
    api.home(None).await.unwrap();
    let home = sim.axis_bounds();

    let mut tasks = Vec::new();
    for mount in [Mount::Left, Mount::Right, Mount::Left] {
        let api = api.clone();
        tasks.push(tokio::spawn(async move {
            api.move_to(mount, Point::new(150.0, 150.0, 120.0), MoveOptions::default())
                .await
        }));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for t in tasks {
        t.await.unwrap().unwrap();
    }

    let pos = sim.update_position().await.unwrap();
    let lowered = ["Z", "A"]
        .into_iter()
        .filter(|a| pos[*a] < home[*a].1)
        .count();
    assert_eq!(lowered, 1, "carriages: Z={} A={}", pos["Z"], pos["A"]);
    assert_eq!(pos["A"], home["A"].1);
}
