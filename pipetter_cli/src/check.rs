//! Commands run against a live controller.

use eyre::{Result, WrapErr};
use pipetter_core::{HardwareApi, HardwareError, MoveOptions, Report};
use pipetter_traits::{Mount, Point};
use serde_json::{Value, json};
use std::time::Instant;

/// Above the deck, clear of labware on the simulated bounds.
const ABOVE_RACK: Point = Point {
    x: 100.0,
    y: 100.0,
    z: 120.0,
};

/// Full pick-up / aspirate / dispense / drop cycle on one mount.
///
/// `volume` defaults to half of the pipette's maximum.
pub async fn self_check(
    api: &HardwareApi,
    mount: Mount,
    volume: Option<f64>,
    tip_length: f64,
) -> Result<Value> {
    let started = Instant::now();
    let Some(info) = api.get_attached_instruments().remove(&mount) else {
        return Err(Report::new(HardwareError::InstrumentNotAttached { mount }));
    };
    let volume = volume.unwrap_or(info.max_volume / 2.0);
    tracing::info!(%mount, model = %info.model, volume, "self-check starting");

    api.home(None).await.wrap_err("homing")?;
    api.move_to(mount, ABOVE_RACK, MoveOptions::default())
        .await
        .wrap_err("moving above the tip rack")?;
    api.pick_up_tip(mount, tip_length, None, None, true)
        .await
        .wrap_err("picking up tip")?;
    api.aspirate(mount, Some(volume), 1.0)
        .await
        .wrap_err("aspirating")?;
    let held = api
        .get_attached_instruments()
        .get(&mount)
        .map_or(0.0, |p| p.current_volume);
    api.dispense(mount, None, 1.0, None)
        .await
        .wrap_err("dispensing")?;
    api.blow_out(mount).await.wrap_err("blowing out")?;
    api.move_to(mount, ABOVE_RACK, MoveOptions::default())
        .await
        .wrap_err("moving above the trash")?;
    api.drop_tip(mount, true).await.wrap_err("dropping tip")?;
    let end = api
        .gantry_position(mount, None, true)
        .await
        .wrap_err("reading final position")?;

    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    tracing::info!(%mount, elapsed_ms, "self-check complete");
    Ok(json!({
        "check": "complete",
        "mount": mount,
        "model": info.model,
        "aspirated_ul": held,
        "final_position": end,
        "elapsed_ms": elapsed_ms,
    }))
}

/// Home everything and report where `mount` ended up.
pub async fn home(api: &HardwareApi, mount: Mount) -> Result<Value> {
    api.home(None).await.wrap_err("homing")?;
    let pos = api
        .gantry_position(mount, None, false)
        .await
        .wrap_err("reading gantry position")?;
    Ok(json!({ "homed": true, "mount": mount, "position": pos }))
}

pub fn instruments(api: &HardwareApi) -> Value {
    let pipettes: Vec<_> = api.get_attached_instruments().into_values().collect();
    json!({
        "pipettes": pipettes,
        "gripper": api.attached_gripper(),
        "modules": api.attached_modules(),
    })
}

pub fn health(api: &HardwareApi) -> Value {
    json!({
        "status": "ok",
        "simulator": api.is_simulator(),
        "fw_version": api.fw_version(),
        "pause_state": api.pause_state(),
        "deck_transform": api.deck_transform_state(),
        "mounts": api.get_attached_instruments().keys().collect::<Vec<_>>(),
    })
}
