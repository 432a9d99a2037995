//! Per-mount pipette state: identity, offset, tip and volume bookkeeping.

use std::sync::Arc;

use pipetter_config::{FlowRates, InstrumentConfig, PlungerPositions, Quirk};
use pipetter_traits::{InstrumentOffset, Mount, MountHardwareConfig, MoveSplit, Point};
use serde::Serialize;

use super::volume;
use crate::error::{HardwareError, Result, fail};
use crate::types::{CriticalPoint, HardwareAction};

/// Slack allowed when comparing volumes against the working volume.
const VOLUME_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct Pipette {
    mount: Mount,
    config: Arc<InstrumentConfig>,
    id: Option<String>,
    acting_as: String,
    offset: InstrumentOffset,
    plunger: PlungerPositions,
    flow_rates: FlowRates,
    working_volume: f64,
    current_volume: f64,
    has_tip: bool,
    current_tip_length: f64,
    current_tiprack_diameter: f64,
    ready_to_aspirate: bool,
}

/// Read-only view returned by the facade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipetteInfo {
    pub mount: Mount,
    pub name: String,
    pub model: String,
    pub acting_as: String,
    pub pipette_id: Option<String>,
    pub channels: u32,
    pub min_volume: f64,
    pub max_volume: f64,
    pub working_volume: f64,
    pub current_volume: f64,
    pub available_volume: f64,
    pub has_tip: bool,
    pub tip_length: f64,
    pub tiprack_diameter: f64,
    pub ready_to_aspirate: bool,
    pub aspirate_flow_rate: f64,
    pub dispense_flow_rate: f64,
    pub blow_out_flow_rate: f64,
    pub plunger: [f64; 4],
}

impl Pipette {
    pub fn new(
        mount: Mount,
        config: Arc<InstrumentConfig>,
        offset: InstrumentOffset,
        id: Option<String>,
    ) -> Self {
        Self {
            mount,
            acting_as: config.name.clone(),
            plunger: config.plunger,
            flow_rates: config.flow_rates,
            working_volume: config.max_volume,
            config,
            id,
            offset,
            current_volume: 0.0,
            has_tip: false,
            current_tip_length: 0.0,
            current_tiprack_diameter: 0.0,
            ready_to_aspirate: false,
        }
    }

    /// Load under a back-compat name of this model.
    pub fn act_as(&mut self, name: &str) -> Result<()> {
        if name == self.acting_as {
            return Ok(());
        }
        if !self.config.accepts_name(name) {
            return fail(HardwareError::precondition(format!(
                "{} cannot act as {name}",
                self.config.name
            )));
        }
        tracing::info!(mount = %self.mount, from = %self.acting_as, to = name, "pipette acting as");
        self.acting_as = name.to_string();
        Ok(())
    }

    pub fn mount(&self) -> Mount {
        self.mount
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    pub(crate) fn shared_config(&self) -> &Arc<InstrumentConfig> {
        &self.config
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn acting_as(&self) -> &str {
        &self.acting_as
    }

    pub fn offset(&self) -> &InstrumentOffset {
        &self.offset
    }

    pub fn set_offset(&mut self, offset: InstrumentOffset) {
        self.offset = offset;
    }

    pub fn plunger_positions(&self) -> &PlungerPositions {
        &self.plunger
    }

    pub fn flow_rates(&self) -> &FlowRates {
        &self.flow_rates
    }

    pub fn has_quirk(&self, q: Quirk) -> bool {
        self.config.has_quirk(q)
    }

    pub fn working_volume(&self) -> f64 {
        self.working_volume
    }

    pub fn current_volume(&self) -> f64 {
        self.current_volume
    }

    pub fn available_volume(&self) -> f64 {
        (self.working_volume - self.current_volume).max(0.0)
    }

    pub fn has_tip(&self) -> bool {
        self.has_tip
    }

    pub fn current_tip_length(&self) -> f64 {
        self.current_tip_length
    }

    pub fn current_tiprack_diameter(&self) -> f64 {
        self.current_tiprack_diameter
    }

    pub fn ready_to_aspirate(&self) -> bool {
        self.ready_to_aspirate
    }

    pub fn set_ready_to_aspirate(&mut self, ready: bool) {
        self.ready_to_aspirate = ready;
    }

    pub fn ok_to_add_volume(&self, ul: f64) -> bool {
        self.current_volume + ul <= self.working_volume + VOLUME_EPSILON
    }

    /// Push-out travel must stay within bottom..blow_out.
    pub fn ok_to_push_out(&self, mm: f64) -> bool {
        mm <= (self.plunger.bottom - self.plunger.blow_out) + VOLUME_EPSILON
    }

    pub fn set_current_volume(&mut self, ul: f64) -> Result<()> {
        if !(0.0..=self.working_volume + VOLUME_EPSILON).contains(&ul) {
            return fail(HardwareError::precondition(format!(
                "volume {ul} outside [0, {}]",
                self.working_volume
            )));
        }
        self.current_volume = ul.min(self.working_volume);
        Ok(())
    }

    pub fn add_current_volume(&mut self, ul: f64) -> Result<()> {
        if !self.ok_to_add_volume(ul) {
            return fail(HardwareError::precondition(format!(
                "cannot aspirate {ul} ul: {} ul already held of {} ul",
                self.current_volume, self.working_volume
            )));
        }
        self.set_current_volume(self.current_volume + ul)
    }

    pub fn remove_current_volume(&mut self, ul: f64) {
        self.current_volume = (self.current_volume - ul).max(0.0);
    }

    pub fn set_working_volume(&mut self, ul: f64) -> Result<()> {
        if !(ul > 0.0 && ul <= self.config.max_volume) {
            return fail(HardwareError::precondition(format!(
                "working volume {ul} outside (0, {}]",
                self.config.max_volume
            )));
        }
        self.working_volume = ul;
        self.current_volume = self.current_volume.min(ul);
        Ok(())
    }

    pub fn add_tip(&mut self, tip_length: f64) -> Result<()> {
        if self.has_tip {
            return fail(HardwareError::TipAlreadyAttached { mount: self.mount });
        }
        self.has_tip = true;
        self.current_tip_length = tip_length;
        Ok(())
    }

    pub fn remove_tip(&mut self) -> Result<()> {
        if !self.has_tip {
            return fail(HardwareError::NoTipAttached { mount: self.mount });
        }
        self.has_tip = false;
        self.current_tip_length = 0.0;
        Ok(())
    }

    pub fn set_current_tiprack_diameter(&mut self, mm: f64) {
        self.current_tiprack_diameter = mm.max(0.0);
    }

    /// Clear tip, volume and readiness after a drop-tip, whatever happened on the way.
    pub(crate) fn clear_after_drop(&mut self) {
        self.has_tip = false;
        self.current_tip_length = 0.0;
        self.current_volume = 0.0;
        self.current_tiprack_diameter = 0.0;
        self.ready_to_aspirate = false;
    }

    pub(crate) fn clear_after_blow_out(&mut self) {
        self.current_volume = 0.0;
        self.ready_to_aspirate = false;
    }

    /// Set flow rates in ul/s; omitted rates are kept.
    pub fn set_flow_rates(
        &mut self,
        aspirate: Option<f64>,
        dispense: Option<f64>,
        blow_out: Option<f64>,
    ) -> Result<()> {
        for (what, r) in [("aspirate", aspirate), ("dispense", dispense), ("blow_out", blow_out)] {
            if let Some(r) = r {
                if !(r.is_finite() && r > 0.0) {
                    return fail(HardwareError::precondition(format!(
                        "{what} flow rate must be > 0, got {r}"
                    )));
                }
            }
        }
        if let Some(r) = aspirate {
            self.flow_rates.aspirate = r;
        }
        if let Some(r) = dispense {
            self.flow_rates.dispense = r;
        }
        if let Some(r) = blow_out {
            self.flow_rates.blow_out = r;
        }
        Ok(())
    }

    /// Set plunger speeds in mm/s, stored as the equivalent flow rates.
    pub fn set_plunger_speeds(
        &mut self,
        aspirate: Option<f64>,
        dispense: Option<f64>,
        blow_out: Option<f64>,
    ) -> Result<()> {
        let conv = |mm_s: Option<f64>, action| -> Result<Option<f64>> {
            mm_s.map(|s| {
                volume::plunger_flow_rate(s, self.config.max_volume, self.table(action))
            })
            .transpose()
        };
        let a = conv(aspirate, HardwareAction::Aspirate)?;
        let d = conv(dispense, HardwareAction::Dispense)?;
        let b = conv(blow_out, HardwareAction::BlowOut)?;
        self.set_flow_rates(a, d, b)
    }

    /// Current plunger speeds in mm/s: (aspirate, dispense, blow_out).
    pub fn plunger_speeds(&self) -> Result<(f64, f64, f64)> {
        Ok((
            self.plunger_speed(self.flow_rates.aspirate, HardwareAction::Aspirate)?,
            self.plunger_speed(self.flow_rates.dispense, HardwareAction::Dispense)?,
            self.plunger_speed(self.flow_rates.blow_out, HardwareAction::BlowOut)?,
        ))
    }

    /// Override calibrated plunger stops.
    pub fn calibrate_plunger(
        &mut self,
        top: Option<f64>,
        bottom: Option<f64>,
        blow_out: Option<f64>,
        drop_tip: Option<f64>,
    ) -> Result<()> {
        let p = PlungerPositions {
            top: top.unwrap_or(self.plunger.top),
            bottom: bottom.unwrap_or(self.plunger.bottom),
            blow_out: blow_out.unwrap_or(self.plunger.blow_out),
            drop_tip: drop_tip.unwrap_or(self.plunger.drop_tip),
        };
        if !(p.top > p.bottom && p.bottom > p.blow_out && p.blow_out >= p.drop_tip) {
            return fail(HardwareError::precondition(
                "plunger positions must satisfy top > bottom > blow_out >= drop_tip",
            ));
        }
        self.plunger = p;
        Ok(())
    }

    fn table(&self, action: HardwareAction) -> &[pipetter_config::VolumeBreakpoint] {
        match action {
            HardwareAction::Aspirate => &self.config.ul_per_mm.aspirate,
            _ => &self.config.ul_per_mm.dispense,
        }
    }

    pub fn ul_per_mm(&self, ul: f64, action: HardwareAction) -> Result<f64> {
        volume::piecewise(ul, self.table(action))
    }

    /// Plunger position holding `ul` above the bottom stop.
    pub fn plunger_position(&self, ul: f64, action: HardwareAction) -> Result<f64> {
        let mm = volume::ul_to_mm(ul, self.table(action))?;
        Ok(crate::util::round6(mm + self.plunger.bottom))
    }

    pub fn plunger_speed(&self, ul_per_s: f64, action: HardwareAction) -> Result<f64> {
        volume::plunger_speed(ul_per_s, self.config.max_volume, self.table(action))
    }

    pub fn push_out_mm(&self, ul: f64) -> Result<f64> {
        volume::ul_to_mm(ul, self.table(HardwareAction::BlowOut))
    }

    /// Offset from the mount to `cp`, including the instrument calibration offset.
    ///
    /// `None` resolves to the tip end when a tip is on, else the nozzle. A
    /// `Tip` request without a tip falls back to the nozzle.
    pub fn critical_point(&self, cp: Option<CriticalPoint>) -> Result<Point> {
        if let Some(c) = cp.filter(|c| c.is_gripper()) {
            return fail(HardwareError::InvalidCriticalPoint {
                mount: self.mount,
                cp: c,
            });
        }
        let base = Point::from(self.config.model_offset);
        let spread = self.config.nozzle_spacing * f64::from(self.config.channels.saturating_sub(1));
        let xy = match cp {
            Some(CriticalPoint::XyCenter) => Point::new(base.x, base.y - spread / 2.0, 0.0),
            Some(CriticalPoint::FrontNozzle) => Point::new(base.x, base.y - spread, 0.0),
            _ => Point::new(base.x, base.y, 0.0),
        };
        let tip = match cp {
            Some(CriticalPoint::Nozzle) => 0.0,
            _ => self.current_tip_length,
        };
        let p = xy + Point::new(0.0, 0.0, base.z - tip) + self.offset.offset;
        tracing::trace!(mount = %self.mount, ?cp, ?p, "pipette critical point");
        Ok(p)
    }

    /// Hardware settings sent to the mount after a reconfiguring reconcile.
    pub fn mount_hardware_config(&self) -> MountHardwareConfig {
        let m = &self.config.mount;
        MountHardwareConfig {
            steps_per_mm: m.steps_per_mm,
            home_position: m.home_position,
            max_travel: m.max_travel,
            idle_current: m.idle_current,
            splits: self.has_quirk(Quirk::NeedsUnstick).then_some(MoveSplit {
                split_distance: 1.0,
                split_current: 1.75,
                split_speed: 1.0,
                after_time: 1800.0,
                fullstep: true,
            }),
        }
    }

    pub fn info(&self) -> PipetteInfo {
        PipetteInfo {
            mount: self.mount,
            name: self.config.name.clone(),
            model: self.config.model.clone(),
            acting_as: self.acting_as.clone(),
            pipette_id: self.id.clone(),
            channels: self.config.channels,
            min_volume: self.config.min_volume,
            max_volume: self.config.max_volume,
            working_volume: self.working_volume,
            current_volume: self.current_volume,
            available_volume: self.available_volume(),
            has_tip: self.has_tip,
            tip_length: self.current_tip_length,
            tiprack_diameter: self.current_tiprack_diameter,
            ready_to_aspirate: self.ready_to_aspirate,
            aspirate_flow_rate: self.flow_rates.aspirate,
            dispense_flow_rate: self.flow_rates.dispense,
            blow_out_flow_rate: self.flow_rates.blow_out,
            plunger: [
                self.plunger.top,
                self.plunger.bottom,
                self.plunger.blow_out,
                self.plunger.drop_tip,
            ],
        }
    }
}
