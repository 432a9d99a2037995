#![allow(dead_code)]

use std::sync::Arc;

use pipetter_core::{
    FeatureCfg, HardwareApi, HardwareError, InMemoryCalibrationStore, Report, BackendPort,
};
use pipetter_hardware::{SimulatedBackend, SimulatedBackendBuilder};
use pipetter_traits::Mount;

/// Simulator with the deck travel used throughout these tests.
pub fn sim() -> SimulatedBackendBuilder {
    SimulatedBackend::builder()
        .with_axis_bounds("X", 0.0, 400.0)
        .with_axis_bounds("Y", 0.0, 400.0)
        .with_axis_bounds("Z", 0.0, 200.0)
}

pub fn sim_with_p300() -> SimulatedBackendBuilder {
    sim().with_instrument(Mount::Left, "p300_single_v2.1", Some("P3H1"))
}

pub async fn api_on(sim: SimulatedBackend) -> (HardwareApi, Arc<SimulatedBackend>) {
    let sim = Arc::new(sim);
    let api = HardwareApi::builder()
        .with_backend(BackendPort::from_arc(sim.clone()))
        .with_calibration_store(Arc::new(InMemoryCalibrationStore::new()))
        .build()
        .await
        .expect("controller builds");
    (api, sim)
}

pub async fn gripper_api_on(sim: SimulatedBackend) -> (HardwareApi, Arc<SimulatedBackend>) {
    let sim = Arc::new(sim);
    let api = HardwareApi::builder()
        .with_backend(BackendPort::from_arc(sim.clone()))
        .with_features(FeatureCfg { gripper: true })
        .build()
        .await
        .expect("controller builds");
    (api, sim)
}

pub fn kind(err: &Report) -> HardwareError {
    match err.downcast_ref::<HardwareError>() {
        Some(k) => k.clone(),
        None => panic!("untyped error: {err:?}"),
    }
}
