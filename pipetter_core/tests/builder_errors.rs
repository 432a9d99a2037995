use std::sync::Arc;

use pipetter_core::error::kind;
use pipetter_core::mocks::NoopBackend;
use pipetter_core::{
    BackendPort, BuildError, DeckTransformState, HardwareApi, HardwareError, InMemoryCalibrationStore,
    RobotCfg,
};
use pipetter_traits::{DeckCalibrationData, Mount, OffsetSource};
use rstest::rstest;

fn build_error(err: &pipetter_core::Report) -> BuildError {
    match err.downcast_ref::<BuildError>() {
        Some(e) => e.clone(),
        None => panic!("expected BuildError, got: {err:?}"),
    }
}

#[tokio::test]
async fn builder_missing_backend_yields_typed_build_error() {
    let err = HardwareApi::builder()
        .try_build()
        .await
        .expect_err("should fail with MissingBackend");
    assert_eq!(build_error(&err), BuildError::MissingBackend);
}

#[tokio::test]
async fn second_controller_on_same_backend_is_refused_until_first_drops() {
    let port = BackendPort::new(NoopBackend);
    let first = HardwareApi::builder()
        .with_backend(port.clone())
        .build()
        .await
        .unwrap();
    assert!(port.is_checked_out());

    let err = HardwareApi::builder()
        .with_backend(port.clone())
        .build()
        .await
        .expect_err("backend already checked out");
    assert_eq!(build_error(&err), BuildError::BackendInUse);

    drop(first);
    assert!(!port.is_checked_out());
    HardwareApi::builder()
        .with_backend(port)
        .build()
        .await
        .expect("port released by drop");
}

#[rstest]
#[case(RobotCfg { retract_margin: -1.0, ..RobotCfg::default() })]
#[case(RobotCfg { z_run_current: 0.0, ..RobotCfg::default() })]
#[case(RobotCfg { mount_critical_point_z: f64::NAN, ..RobotCfg::default() })]
#[tokio::test]
async fn invalid_robot_config_is_rejected(#[case] robot: RobotCfg) {
    let port = BackendPort::new(NoopBackend);
    let err = HardwareApi::builder()
        .with_backend(port.clone())
        .with_robot(robot)
        .build()
        .await
        .unwrap_err();
    assert!(matches!(build_error(&err), BuildError::InvalidConfig(_)));
    // A rejected build never checks the port out.
    assert!(!port.is_checked_out());
}

#[tokio::test]
async fn unhomed_controller_refuses_position_reads() {
    let api = HardwareApi::builder()
        .with_backend(BackendPort::new(NoopBackend))
        .build()
        .await
        .unwrap();
    let err = api
        .current_position(Mount::Left, None, false, true)
        .await
        .unwrap_err();
    assert_eq!(kind(&err), Some(&HardwareError::MustHome));
    assert!(api.get_attached_instruments().is_empty());
}

#[tokio::test]
async fn stored_deck_calibration_is_loaded() {
    let store = InMemoryCalibrationStore::with_deck(DeckCalibrationData {
        attitude: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        translation: [2.0, 3.0, 0.0],
        source: OffsetSource::User,
        last_modified: Some(1_700_000_000),
        marked_bad: false,
    });
    let api = HardwareApi::builder()
        .with_backend(BackendPort::new(NoopBackend))
        .with_calibration_store(Arc::new(store))
        .build()
        .await
        .unwrap();
    assert_eq!(api.deck_transform_state(), DeckTransformState::Ok);
    assert_eq!(api.deck_calibration().attitude.translation().x, 2.0);

    api.reset_deck_calibration();
    assert_eq!(api.deck_transform_state(), DeckTransformState::Identity);
}

#[tokio::test]
async fn singular_stored_calibration_fails_build() {
    let store = InMemoryCalibrationStore::with_deck(DeckCalibrationData {
        attitude: [[0.0; 3]; 3],
        translation: [0.0; 3],
        source: OffsetSource::User,
        last_modified: Some(1),
        marked_bad: false,
    });
    let err = HardwareApi::builder()
        .with_backend(BackendPort::new(NoopBackend))
        .with_calibration_store(Arc::new(store))
        .build()
        .await
        .unwrap_err();
    assert!(matches!(kind(&err), Some(HardwareError::Calibration(_))));
}
