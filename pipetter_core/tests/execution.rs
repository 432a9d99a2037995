mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{api_on, kind, sim, sim_with_p300};
use pipetter_core::{HardwareError, MoveOptions, PauseState, PauseType};
use pipetter_traits::{Mount, Point};

#[tokio::test]
async fn cancel_aborts_delay_and_fails_later_motion_fast() {
    let (api, sim) = api_on(sim().build().unwrap()).await;
    let api = Arc::new(api);
    let a = api.clone();
    let delay = tokio::spawn(async move { a.delay(Duration::from_secs(60)).await });
    while api.execution_gate().registered_tasks() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(api.pause_state(), PauseState::Paused);

    api.execution_gate().cancel();
    let err = delay.await.unwrap().unwrap_err();
    assert_eq!(kind(&err), HardwareError::ExecutionCancelled);
    assert_eq!(api.execution_gate().registered_tasks(), 0);

    let (moves, homes) = (sim.moves().len(), sim.home_count());
    let err = api.home(None).await.unwrap_err();
    assert_eq!(kind(&err), HardwareError::ExecutionCancelled);
    let err = api
        .move_to(Mount::Left, Point::new(10.0, 10.0, 100.0), MoveOptions::default())
        .await
        .unwrap_err();
    assert_eq!(kind(&err), HardwareError::ExecutionCancelled);
    assert_eq!(sim.moves().len(), moves);
    assert_eq!(sim.home_count(), homes);

    api.reset();
    assert_eq!(api.pause_state(), PauseState::Running);
    api.home(None).await.unwrap();
}

#[tokio::test]
async fn paused_motion_waits_for_every_reason_to_clear() {
    let (api, sim) = api_on(sim().build().unwrap()).await;
    let api = Arc::new(api);
    api.home(None).await.unwrap();
    api.pause(PauseType::Pause);
    api.pause(PauseType::Delay);
    assert!(sim.is_paused());

    let a = api.clone();
    let mv = tokio::spawn(async move {
        a.move_to(Mount::Right, Point::new(10.0, 10.0, 100.0), MoveOptions::default())
            .await
    });
    tokio::task::yield_now().await;
    api.resume(PauseType::Delay);
    tokio::task::yield_now().await;
    assert!(!mv.is_finished());
    assert_eq!(api.pause_state(), PauseState::Paused);

    api.resume(PauseType::Pause);
    mv.await.unwrap().unwrap();
    assert!(!sim.is_paused());
}

#[tokio::test]
async fn stop_fails_motion_parked_on_pause() {
    let (api, sim) = api_on(sim().build().unwrap()).await;
    let api = Arc::new(api);
    api.home(None).await.unwrap();
    api.pause(PauseType::Pause);

    let a = api.clone();
    let mv = tokio::spawn(async move {
        a.move_to(Mount::Right, Point::new(10.0, 10.0, 100.0), MoveOptions::default())
            .await
    });
    tokio::task::yield_now().await;
    assert!(!mv.is_finished());

    let moves = sim.moves().len();
    api.stop(false).await.unwrap();
    let err = mv.await.unwrap().unwrap_err();
    assert_eq!(kind(&err), HardwareError::ExecutionCancelled);
    assert_eq!(sim.moves().len(), moves);
    assert_eq!(api.pause_state(), PauseState::Running);

    api.move_to(Mount::Right, Point::new(10.0, 10.0, 100.0), MoveOptions::default())
        .await
        .unwrap();
    assert_eq!(sim.moves().len(), moves + 1);
}

#[tokio::test(start_paused = true)]
async fn uncancelled_delay_resumes() {
    let (api, _sim) = api_on(sim().build().unwrap()).await;
    api.delay(Duration::from_millis(250)).await.unwrap();
    assert_eq!(api.pause_state(), PauseState::Running);
}

#[tokio::test]
async fn stop_halts_cancels_and_rescans() {
    let (api, sim) = api_on(sim_with_p300().build().unwrap()).await;
    api.add_tip(Mount::Left, 51.83).unwrap();
    api.stop(false).await.unwrap();

    assert_eq!(sim.halt_count(), 1);
    assert_eq!(api.pause_state(), PauseState::Running);
    // Slots are rebuilt from the scan, so bookkeeping starts fresh.
    let left = &api.get_attached_instruments()[&Mount::Left];
    assert!(!left.has_tip);
}

#[tokio::test]
async fn halt_leaves_gate_alone() {
    let (api, sim) = api_on(sim().build().unwrap()).await;
    api.halt(true).await.unwrap();
    assert_eq!(sim.halt_count(), 2);
    assert_eq!(api.pause_state(), PauseState::Running);
    assert!(api.engaged_axes().values().all(|on| !on));
}

#[tokio::test]
async fn simulator_bypass_skips_gate() {
    let mut cfg = pipetter_config::Config::default();
    cfg.execution.bypass_gate_when_simulating = true;
    cfg.simulation.left = Some(pipetter_config::SimInstrument {
        model: "p300_single_v2.1".into(),
        id: Some("P3H1".into()),
    });
    let api = pipetter_core::HardwareApi::build_simulator(&cfg).await.unwrap();
    api.execution_gate().cancel();
    api.home(None).await.unwrap();
}
