use std::collections::BTreeMap;

use pipetter_config::load_toml;
use pipetter_hardware::{SimulatedBackend, SimulatedModules};
use pipetter_traits::{Backend, ModuleProvider, Mount};

const CFG: &str = r#"
[features]
gripper = true

[simulation]
modules = ["tempdeck", "magdeck"]
axis_bounds = { X = [0.0, 300.0] }

[simulation.left]
model = "p300_single_v2.1"
id = "P3H1"

[simulation.gripper]
model = "gripper_v1"
id = "GRP1"
"#;

#[tokio::test]
async fn config_tables_shape_the_simulator() {
    let cfg = load_toml(CFG).unwrap();
    cfg.validate().unwrap();
    let sim = SimulatedBackend::from_config(&cfg).unwrap();

    let bounds = sim.axis_bounds();
    assert_eq!(bounds["X"], (0.0, 300.0));
    assert!(bounds.contains_key("D") && bounds.contains_key("G"));

    let found = sim.get_attached_instruments(&BTreeMap::new()).await.unwrap();
    assert_eq!(found[&Mount::Left].id.as_deref(), Some("P3H1"));
    assert!(found[&Mount::Right].config.is_none());
    let gripper = sim.get_attached_gripper().await.unwrap().unwrap();
    assert_eq!(gripper.id.as_deref(), Some("GRP1"));

    let homed = sim.home(&[]).await.unwrap();
    assert_eq!(homed["X"], 300.0);
    assert_eq!(homed["G"], bounds["G"].0);
}

#[tokio::test]
async fn halts_and_engagement() {
    let sim = SimulatedBackend::from_config(&load_toml(CFG).unwrap()).unwrap();
    sim.home(&["X", "Y"]).await.unwrap();
    assert_eq!(sim.engaged_axes().get("X"), Some(&true));

    sim.disengage_axes(&["X"]).await.unwrap();
    assert_eq!(sim.engaged_axes().get("X"), Some(&false));
    assert!(sim.disengage_axes(&["Q"]).await.is_err());

    sim.halt().await.unwrap();
    sim.hard_halt().await.unwrap();
    assert_eq!(sim.halt_count(), 2);
    assert!(sim.engaged_axes().values().all(|e| !e));

    sim.pause();
    assert!(sim.is_paused());
    sim.resume();
    assert!(!sim.is_paused());
}

#[tokio::test]
async fn lights_round_trip() {
    let sim = SimulatedBackend::builder().build().unwrap();
    sim.set_lights(Some(true), None).await.unwrap();
    let l = sim.get_lights().await.unwrap();
    assert!(l.button && !l.rails);
}

#[test]
fn configured_modules_are_available() {
    let cfg = load_toml(CFG).unwrap();
    let modules = SimulatedModules::with_modules(&cfg.simulation.modules).unwrap();
    let models: Vec<_> = modules.available_modules().into_iter().map(|m| m.model).collect();
    assert_eq!(models.len(), 2);
    assert!(models.iter().any(|m| m == "temperatureModuleV2"));
}
