mod common;

use common::{api_on, gripper_api_on, kind, sim};
use pipetter_core::{Axis, GripperJawState, HardwareError, MoveOptions};
use pipetter_traits::{Mount, Point};

#[tokio::test]
async fn gripper_calls_need_the_capability() {
    let (api, _sim) = api_on(sim().build().unwrap()).await;
    let err = api.grip(None).await.unwrap_err();
    assert!(matches!(kind(&err), HardwareError::UnsupportedHardware(_)));
    let err = api
        .move_to(Mount::Gripper, Point::new(10.0, 10.0, 10.0), MoveOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(kind(&err), HardwareError::UnsupportedHardware(_)));
    assert!(api.attached_gripper().is_none());
}

#[tokio::test]
async fn capability_without_gripper_attached() {
    let (api, _sim) = gripper_api_on(sim().with_gripper(None, None).build().unwrap()).await;
    let err = api.grip(None).await.unwrap_err();
    assert_eq!(kind(&err), HardwareError::InstrumentNotAttached { mount: Mount::Gripper });
    // Homing still covers the gripper axes.
    api.home(None).await.unwrap();
}

#[tokio::test]
async fn jaw_must_home_before_gripping() {
    let (api, sim) =
        gripper_api_on(sim().with_gripper(Some("gripper_v1"), Some("GRP1")).build().unwrap()).await;
    let info = api.attached_gripper().unwrap();
    assert_eq!(info.jaw_state, GripperJawState::Unhomed);
    assert!(matches!(
        kind(&api.grip(None).await.unwrap_err()),
        HardwareError::Precondition(_)
    ));

    api.home_gripper_jaw().await.unwrap();
    assert_eq!(api.attached_gripper().unwrap().jaw_state, GripperJawState::HomedReady);

    api.grip(Some(30.0)).await.unwrap();
    let info = api.attached_gripper().unwrap();
    assert_eq!(info.jaw_state, GripperJawState::Gripping);
    assert_eq!(info.jaw_width, 60.0);
    // Twice the default force doubles the current.
    assert!((sim.active_currents()["G"] - 1.34).abs() < 1e-9);

    api.grip(Some(1000.0)).await.unwrap();
    assert_eq!(sim.active_currents()["G"], 1.5);

    api.hold_jaw_width(80.0).await.unwrap();
    let info = api.attached_gripper().unwrap();
    assert_eq!(info.jaw_state, GripperJawState::HoldingClosed);
    assert_eq!(info.jaw_width, 80.0);
    assert!(api.hold_jaw_width(100.0).await.is_err());

    api.ungrip().await.unwrap();
    let info = api.attached_gripper().unwrap();
    assert_eq!(info.jaw_state, GripperJawState::HomedReady);
    assert_eq!(info.jaw_width, 92.0);
}

#[tokio::test]
async fn gripper_moves_by_jaw_center() {
    let (api, sim) =
        gripper_api_on(sim().with_gripper(Some("gripper_v1"), Some("GRP1")).build().unwrap()).await;
    api.home(None).await.unwrap();
    api.move_to(Mount::Gripper, Point::new(200.0, 200.0, 150.0), MoveOptions::default())
        .await
        .unwrap();
    let last = sim.moves().last().cloned().unwrap();
    // Jaw center sits 82.5 mm below the mount; the gripper mount is offset from the right one.
    assert!((last["X"] - (200.0 - 84.55)).abs() < 1e-6);
    assert!((last["Y"] - (200.0 + 12.75)).abs() < 1e-6);
    assert!((last["D"] - (150.0 + 82.5 - 93.85)).abs() < 1e-6);

    let p = api.gantry_position(Mount::Gripper, None, false).await.unwrap();
    assert!((p.z - 150.0).abs() < 1e-6);
    assert!(api.current_position(Mount::Gripper, None, false, true).await.unwrap().contains_key(&Axis::D));
}
