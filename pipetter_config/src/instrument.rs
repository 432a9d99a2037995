//! Static instrument definitions (pipettes and grippers).
//!
//! Definitions are TOML documents. A handful of common models ship with the
//! crate and are embedded at compile time; custom definitions can be loaded
//! from disk with [`load_instrument_file`].

use serde::{Deserialize, Serialize};
use std::path::Path;

const P20_SINGLE: &str = include_str!("../definitions/p20_single_v2.1.toml");
const P300_SINGLE: &str = include_str!("../definitions/p300_single_v2.1.toml");
const P300_MULTI: &str = include_str!("../definitions/p300_multi_v2.1.toml");
const P1000_SINGLE: &str = include_str!("../definitions/p1000_single_v2.1.toml");
const GRIPPER_V1: &str = include_str!("../definitions/gripper_v1.toml");

const BUILTIN_PIPETTES: &[&str] = &[P20_SINGLE, P300_SINGLE, P300_MULTI, P1000_SINGLE];

/// Mechanical quirks that change how tips are handled.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Quirk {
    PickupTipShake,
    DropTipShake,
    DoubleDropTip,
    NeedsUnstick,
}

/// One row of a piecewise-linear ul-per-mm table.
///
/// Serialized as a `[ceiling, slope, intercept]` triple.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct VolumeBreakpoint {
    pub ceiling_ul: f64,
    pub slope: f64,
    pub intercept: f64,
}

impl From<[f64; 3]> for VolumeBreakpoint {
    fn from(v: [f64; 3]) -> Self {
        Self {
            ceiling_ul: v[0],
            slope: v[1],
            intercept: v[2],
        }
    }
}

impl From<VolumeBreakpoint> for [f64; 3] {
    fn from(b: VolumeBreakpoint) -> Self {
        [b.ceiling_ul, b.slope, b.intercept]
    }
}

/// Calibrated plunger stop positions in mm.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct PlungerPositions {
    pub top: f64,
    pub bottom: f64,
    pub blow_out: f64,
    pub drop_tip: f64,
}

/// Motor currents in amps.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct PlungerCurrents {
    /// Plunger run current.
    pub plunger: f64,
    /// Z current while pressing onto a tip.
    pub pick_up: f64,
    /// Plunger current while ejecting a tip.
    pub drop_tip: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct PickUpCfg {
    pub distance: f64,
    pub increment: f64,
    pub presses: u32,
    pub speed: f64,
}

/// Default flow rates in ul/s.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct FlowRates {
    pub aspirate: f64,
    pub dispense: f64,
    pub blow_out: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UlPerMm {
    pub aspirate: Vec<VolumeBreakpoint>,
    pub dispense: Vec<VolumeBreakpoint>,
}

/// Mount-level settings pushed to the motor controller on reconfiguration.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct MountHardware {
    pub steps_per_mm: f64,
    pub home_position: f64,
    pub max_travel: f64,
    pub idle_current: f64,
}

fn default_channels() -> u32 {
    1
}

fn default_nozzle_spacing() -> f64 {
    9.0
}

/// Static definition of a pipette model.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct InstrumentConfig {
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub back_compat_names: Vec<String>,
    #[serde(default = "default_channels")]
    pub channels: u32,
    pub min_volume: f64,
    pub max_volume: f64,
    /// Nozzle offset from the mount, in mm.
    pub model_offset: [f64; 3],
    #[serde(default = "default_nozzle_spacing")]
    pub nozzle_spacing: f64,
    pub tip_length: f64,
    #[serde(default)]
    pub tip_overlap: f64,
    pub return_tip_height: f64,
    #[serde(default)]
    pub push_out_volume: f64,
    pub drop_tip_speed: f64,
    #[serde(default)]
    pub quirks: Vec<Quirk>,
    pub plunger: PlungerPositions,
    pub currents: PlungerCurrents,
    pub pick_up: PickUpCfg,
    pub flow_rates: FlowRates,
    pub ul_per_mm: UlPerMm,
    pub mount: MountHardware,
}

impl InstrumentConfig {
    pub fn has_quirk(&self, quirk: Quirk) -> bool {
        self.quirks.contains(&quirk)
    }

    /// Names this model may be loaded as.
    pub fn accepts_name(&self, name: &str) -> bool {
        self.name == name || self.back_compat_names.iter().any(|n| n == name)
    }

    /// True when switching from `self` to `other` requires resending mount configuration.
    pub fn needs_reconfiguration(&self, other: &InstrumentConfig) -> bool {
        let mut a = self.quirks.clone();
        let mut b = other.quirks.clone();
        a.sort_by_key(|q| *q as u8);
        b.sort_by_key(|q| *q as u8);
        a != b
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.max_volume <= 0.0 || self.min_volume < 0.0 || self.min_volume > self.max_volume {
            eyre::bail!(
                "{}: volume range [{}, {}] is invalid",
                self.model,
                self.min_volume,
                self.max_volume
            );
        }
        let p = &self.plunger;
        if !(p.top > p.bottom && p.bottom > p.blow_out && p.blow_out >= p.drop_tip) {
            eyre::bail!(
                "{}: plunger positions must satisfy top > bottom > blow_out >= drop_tip",
                self.model
            );
        }
        check_breakpoints(&self.model, "aspirate", &self.ul_per_mm.aspirate)?;
        check_breakpoints(&self.model, "dispense", &self.ul_per_mm.dispense)?;
        if self.flow_rates.aspirate <= 0.0
            || self.flow_rates.dispense <= 0.0
            || self.flow_rates.blow_out <= 0.0
        {
            eyre::bail!("{}: default flow rates must be > 0", self.model);
        }
        if self.channels == 0 {
            eyre::bail!("{}: channels must be >= 1", self.model);
        }
        Ok(())
    }
}

fn check_breakpoints(model: &str, action: &str, rows: &[VolumeBreakpoint]) -> eyre::Result<()> {
    if rows.is_empty() {
        eyre::bail!("{model}: ul_per_mm.{action} must have at least one row");
    }
    for (i, w) in rows.windows(2).enumerate() {
        if w[1].ceiling_ul <= w[0].ceiling_ul {
            eyre::bail!(
                "{model}: ul_per_mm.{action} ceilings must be strictly increasing (rows {} and {})",
                i,
                i + 1
            );
        }
    }
    if rows.iter().any(|r| !(r.slope.is_finite() && r.intercept.is_finite())) {
        eyre::bail!("{model}: ul_per_mm.{action} has non-finite coefficients");
    }
    Ok(())
}

/// Static definition of a gripper model.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct GripperConfig {
    pub name: String,
    pub model: String,
    pub jaw_width_min: f64,
    pub jaw_width_max: f64,
    pub jaw_center_offset: [f64; 3],
    pub front_pin_offset: [f64; 3],
    pub rear_pin_offset: [f64; 3],
    pub grip_current: f64,
    pub default_grip_force: f64,
    pub home_position: f64,
    pub max_travel: f64,
}

impl GripperConfig {
    /// Jaw travel from fully open to fully closed, per side.
    pub fn max_jaw_displacement(&self) -> f64 {
        (self.jaw_width_max - self.jaw_width_min) / 2.0
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.jaw_width_min <= 0.0 || self.jaw_width_max <= self.jaw_width_min {
            eyre::bail!("{}: jaw width range is invalid", self.model);
        }
        Ok(())
    }
}

/// Look up an embedded pipette definition by model (`p300_single_v2.1`) or name.
pub fn builtin_pipette(name_or_model: &str) -> eyre::Result<InstrumentConfig> {
    for src in BUILTIN_PIPETTES {
        let cfg: InstrumentConfig = toml::from_str(src)
            .map_err(|e| eyre::eyre!("embedded pipette definition is malformed: {e}"))?;
        if cfg.model == name_or_model || cfg.accepts_name(name_or_model) {
            return Ok(cfg);
        }
    }
    eyre::bail!("unknown pipette model or name: {name_or_model}")
}

/// Models of all embedded pipette definitions.
pub fn builtin_pipette_models() -> Vec<String> {
    BUILTIN_PIPETTES
        .iter()
        .filter_map(|src| toml::from_str::<InstrumentConfig>(src).ok())
        .map(|c| c.model)
        .collect()
}

pub fn builtin_gripper(model: &str) -> eyre::Result<GripperConfig> {
    let cfg: GripperConfig = toml::from_str(GRIPPER_V1)
        .map_err(|e| eyre::eyre!("embedded gripper definition is malformed: {e}"))?;
    if cfg.model == model || cfg.name == model {
        Ok(cfg)
    } else {
        eyre::bail!("unknown gripper model: {model}")
    }
}

/// Load and validate a pipette definition from a TOML file.
pub fn load_instrument_file(path: &Path) -> eyre::Result<InstrumentConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read instrument definition {:?}: {}", path, e))?;
    let cfg: InstrumentConfig = toml::from_str(&text)
        .map_err(|e| eyre::eyre!("parse instrument definition {:?}: {}", path, e))?;
    cfg.validate()?;
    Ok(cfg)
}

/// ul-per-mm CSV schema.
///
/// Expected headers:
/// ceiling,slope,intercept
///
/// Example:
/// ceiling,slope,intercept
/// 10.0,0.2,16.0
/// 300.0,0.001,18.65
#[derive(Debug, Deserialize, Clone, Copy)]
struct BreakpointRow {
    ceiling: f64,
    slope: f64,
    intercept: f64,
}

/// Load a ul-per-mm table from CSV, enforcing exact headers and increasing ceilings.
pub fn load_ul_per_mm_csv(path: &Path) -> eyre::Result<Vec<VolumeBreakpoint>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open ul-per-mm CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["ceiling", "slope", "intercept"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "ul-per-mm CSV must have headers 'ceiling,slope,intercept', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<BreakpointRow>().enumerate() {
        match rec {
            Ok(r) => rows.push(VolumeBreakpoint {
                ceiling_ul: r.ceiling,
                slope: r.slope,
                intercept: r.intercept,
            }),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    check_breakpoints("csv", "table", &rows)?;
    Ok(rows)
}
