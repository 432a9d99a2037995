mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{kind, sim, sim_with_p300};
use pipetter_core::{BackendPort, HardwareApi, HardwareError, InMemoryCalibrationStore};
use pipetter_traits::{CalibrationStorage, InstrumentOffset, Mount, OffsetSource, Point};

async fn api_with_store(
    sim: pipetter_hardware::SimulatedBackend,
    store: Arc<InMemoryCalibrationStore>,
) -> (HardwareApi, Arc<pipetter_hardware::SimulatedBackend>) {
    let sim = Arc::new(sim);
    let api = HardwareApi::builder()
        .with_backend(BackendPort::from_arc(sim.clone()))
        .with_calibration_store(store)
        .build()
        .await
        .unwrap();
    (api, sim)
}

#[tokio::test]
async fn rescan_keeps_state_of_the_same_instrument() {
    let (api, sim) = api_with_store(
        sim_with_p300().build().unwrap(),
        Arc::new(InMemoryCalibrationStore::new()),
    )
    .await;
    assert!(sim.mount_config(Mount::Left).is_some());
    assert!(sim.mount_config(Mount::Right).is_none());

    api.add_tip(Mount::Left, 51.83).unwrap();
    api.cache_instruments(None).await.unwrap();
    api.cache_instruments(None).await.unwrap();
    let left = &api.get_attached_instruments()[&Mount::Left];
    assert!(left.has_tip);
    assert_eq!(left.pipette_id.as_deref(), Some("P3H1"));
}

#[tokio::test]
async fn requested_back_compat_name_changes_identity() {
    let (api, _sim) = api_with_store(
        sim_with_p300().build().unwrap(),
        Arc::new(InMemoryCalibrationStore::new()),
    )
    .await;
    api.add_tip(Mount::Left, 51.83).unwrap();

    let want: BTreeMap<Mount, String> = [(Mount::Left, "p300_single".to_string())].into();
    api.cache_instruments(Some(&want)).await.unwrap();
    let left = &api.get_attached_instruments()[&Mount::Left];
    assert_eq!(left.acting_as, "p300_single");
    assert!(!left.has_tip, "identity change rebuilds the slot");

    // Asking by model name loads the instrument under its own name.
    let want: BTreeMap<Mount, String> = [(Mount::Left, "p300_single_v2.1".to_string())].into();
    api.cache_instruments(Some(&want)).await.unwrap();
    assert_eq!(api.get_attached_instruments()[&Mount::Left].acting_as, "p300_single_gen2");
}

#[tokio::test]
async fn mismatched_request_fails_scan() {
    let (api, _sim) = api_with_store(
        sim_with_p300().build().unwrap(),
        Arc::new(InMemoryCalibrationStore::new()),
    )
    .await;
    let want: BTreeMap<Mount, String> = [(Mount::Left, "p20_single_gen2".to_string())].into();
    let err = api.cache_instruments(Some(&want)).await.unwrap_err();
    assert!(matches!(kind(&err), HardwareError::Backend(_)));
}

#[tokio::test]
async fn offsets_round_trip_through_storage() {
    let store = Arc::new(InMemoryCalibrationStore::new());
    store
        .save_instrument_offset(
            "P3H1",
            Mount::Left,
            &InstrumentOffset {
                offset: Point::new(0.5, 0.0, 0.0),
                source: OffsetSource::User,
                last_modified: Some(1),
                marked_bad: false,
            },
        )
        .unwrap();
    let (api, _sim) = api_with_store(sim_with_p300().build().unwrap(), store.clone()).await;
    assert_eq!(api.instrument_offset(Mount::Left).unwrap().offset.x, 0.5);

    let saved = api
        .save_instrument_offset(Mount::Left, Point::new(1.0, 2.0, 3.0))
        .unwrap();
    assert_eq!(saved.source, OffsetSource::User);
    assert!(saved.last_modified.is_some());
    let stored = store.load_instrument_offset(Some("P3H1"), Mount::Left).unwrap();
    assert_eq!(stored.offset, Point::new(1.0, 2.0, 3.0));

    api.reset_instrument_offset(Mount::Left, true).unwrap();
    assert_eq!(api.instrument_offset(Mount::Left).unwrap(), InstrumentOffset::default());
    let stored = store.load_instrument_offset(Some("P3H1"), Mount::Left).unwrap();
    assert_eq!(stored, InstrumentOffset::default());
}

#[tokio::test]
async fn offset_without_serial_cannot_be_saved() {
    let (api, _sim) = api_with_store(
        sim().with_instrument(Mount::Right, "p20_single_v2.1", None).build().unwrap(),
        Arc::new(InMemoryCalibrationStore::new()),
    )
    .await;
    let err = api
        .save_instrument_offset(Mount::Right, Point::new(1.0, 0.0, 0.0))
        .unwrap_err();
    assert!(matches!(kind(&err), HardwareError::Precondition(_)));
    let err = api.instrument_offset(Mount::Left).unwrap_err();
    assert_eq!(kind(&err), HardwareError::InstrumentNotAttached { mount: Mount::Left });
}

#[tokio::test]
async fn reset_instrument_keeps_identity_only() {
    let (api, _sim) = api_with_store(
        sim_with_p300().build().unwrap(),
        Arc::new(InMemoryCalibrationStore::new()),
    )
    .await;
    api.add_tip(Mount::Left, 51.83).unwrap();
    api.set_working_volume(Mount::Left, 100.0).unwrap();
    api.set_flow_rate(Mount::Left, Some(50.0), None, None).unwrap();
    api.reset_instrument(Some(Mount::Left));

    let left = &api.get_attached_instruments()[&Mount::Left];
    assert!(!left.has_tip);
    assert_eq!(left.working_volume, 300.0);
    assert_eq!(left.aspirate_flow_rate, 92.86);
    assert_eq!(left.pipette_id.as_deref(), Some("P3H1"));
}

#[tokio::test]
async fn plunger_speed_and_calibration_bookkeeping() {
    let (api, _sim) = api_with_store(
        sim_with_p300().build().unwrap(),
        Arc::new(InMemoryCalibrationStore::new()),
    )
    .await;
    api.set_pipette_speed(Mount::Left, Some(2.0), None, None).unwrap();
    let (asp, _, _) = api.pipette_speeds(Mount::Left).unwrap();
    assert!((asp - 2.0).abs() < 1e-4);

    assert!(api
        .calibrate_plunger(Mount::Left, None, Some(-20.0), None, None)
        .is_err());
    api.calibrate_plunger(Mount::Left, None, Some(-14.0), None, None)
        .unwrap();
    assert_eq!(api.get_attached_instruments()[&Mount::Left].plunger[1], -14.0);
}
