//! Instrument discovery, per-mount bookkeeping and offsets.

use std::collections::BTreeMap;
use std::sync::Arc;

use pipetter_traits::{InstrumentOffset, Mount, OffsetSource, Point};

use super::{HardwareApi, now_secs};
use crate::error::{HardwareError, Result, fail};
use crate::hw_error::backend_report;
use crate::instrument::{GripperInfo, Pipette, PipetteInfo};
use crate::reconcile::{ScannedGripper, ScannedPipette, reconcile_gripper, reconcile_pipette};

impl HardwareApi {
    /// Rescan the mounts and reconcile each slot with what is attached.
    ///
    /// `require` maps a mount to the instrument name it must carry; the
    /// backend fails the scan when something else is attached.
    pub async fn cache_instruments(&self, require: Option<&BTreeMap<Mount, String>>) -> Result<()> {
        let expected = require.cloned().unwrap_or_default();
        let found = self
            .backend
            .get_attached_instruments(&expected)
            .await
            .map_err(|e| backend_report(e, "instrument scan failed"))?;

        for mount in Mount::PIPETTES {
            let scanned = found.get(&mount).and_then(|a| {
                a.config.clone().map(|c| ScannedPipette {
                    config: Arc::new(c),
                    id: a.id.clone(),
                })
            });
            let requested = expected.get(&mount).map(String::as_str);
            let offset = self
                .store
                .load_instrument_offset(scanned.as_ref().and_then(|s| s.id.as_deref()), mount)
                .map_err(|e| backend_report(e, "loading instrument offset failed"))?;
            let cached = self.slots().pipettes.get(&mount).cloned();

            let (next, skip) = reconcile_pipette(
                mount,
                scanned.as_ref(),
                cached.as_ref(),
                requested,
                offset,
            )?;
            let hw = next.as_ref().map(Pipette::mount_hardware_config);
            let model = next.as_ref().map(|p| p.config().model.clone());
            {
                let mut slots = self.slots();
                match next {
                    Some(p) => slots.pipettes.insert(mount, p),
                    None => slots.pipettes.remove(&mount),
                };
            }
            if skip {
                tracing::debug!(%mount, "instrument unchanged");
                continue;
            }
            if let Some(cfg) = hw {
                self.backend
                    .configure_mount(mount, cfg)
                    .await
                    .map_err(|e| backend_report(e, "mount configuration failed"))?;
            }
            tracing::info!(%mount, model = ?model, "instrument cached");
        }

        if self.features.gripper {
            self.cache_gripper().await?;
        }
        Ok(())
    }

    async fn cache_gripper(&self) -> Result<()> {
        let scanned = self
            .backend
            .get_attached_gripper()
            .await
            .map_err(|e| backend_report(e, "gripper scan failed"))?
            .map(|g| ScannedGripper {
                config: Arc::new(g.config),
                id: g.id,
            });
        let offset = self
            .store
            .load_gripper_offset(scanned.as_ref().and_then(|s| s.id.as_deref()))
            .map_err(|e| backend_report(e, "loading gripper offset failed"))?;
        let cached = self.slots().gripper.clone();
        let (next, skip) = reconcile_gripper(scanned.as_ref(), cached.as_ref(), offset);
        if !skip {
            tracing::info!(present = next.is_some(), "gripper cached");
        }
        self.slots().gripper = next;
        Ok(())
    }

    pub fn get_attached_instruments(&self) -> BTreeMap<Mount, PipetteInfo> {
        self.slots()
            .pipettes
            .iter()
            .map(|(m, p)| (*m, p.info()))
            .collect()
    }

    pub fn attached_gripper(&self) -> Option<GripperInfo> {
        self.slots().gripper.as_ref().map(|g| g.info())
    }

    // ── Bookkeeping without motion ───────────────────────────────────────────

    /// Record a tip as attached without moving.
    pub fn add_tip(&self, mount: Mount, tip_length: f64) -> Result<()> {
        self.with_pipette(mount, |p| p.add_tip(tip_length))
    }

    pub fn remove_tip(&self, mount: Mount) -> Result<()> {
        self.with_pipette(mount, Pipette::remove_tip)
    }

    pub fn set_current_tiprack_diameter(&self, mount: Mount, diameter: f64) -> Result<()> {
        self.with_pipette(mount, |p| {
            p.set_current_tiprack_diameter(diameter);
            Ok(())
        })
    }

    pub fn set_working_volume(&self, mount: Mount, ul: f64) -> Result<()> {
        self.with_pipette(mount, |p| p.set_working_volume(ul))
    }

    /// Flow rates in ul/s; `None` keeps the current rate.
    pub fn set_flow_rate(
        &self,
        mount: Mount,
        aspirate: Option<f64>,
        dispense: Option<f64>,
        blow_out: Option<f64>,
    ) -> Result<()> {
        self.with_pipette(mount, |p| p.set_flow_rates(aspirate, dispense, blow_out))
    }

    /// Plunger speeds in mm/s; `None` keeps the current speed.
    pub fn set_pipette_speed(
        &self,
        mount: Mount,
        aspirate: Option<f64>,
        dispense: Option<f64>,
        blow_out: Option<f64>,
    ) -> Result<()> {
        self.with_pipette(mount, |p| p.set_plunger_speeds(aspirate, dispense, blow_out))
    }

    pub fn pipette_speeds(&self, mount: Mount) -> Result<(f64, f64, f64)> {
        self.pipette(mount)?.plunger_speeds()
    }

    pub fn calibrate_plunger(
        &self,
        mount: Mount,
        top: Option<f64>,
        bottom: Option<f64>,
        blow_out: Option<f64>,
        drop_tip: Option<f64>,
    ) -> Result<()> {
        self.with_pipette(mount, |p| p.calibrate_plunger(top, bottom, blow_out, drop_tip))
    }

    /// Fresh state for one mount, or every mount. Identity and offsets are kept.
    pub fn reset_instrument(&self, mount: Option<Mount>) {
        let mut slots = self.slots();
        for (m, p) in slots.pipettes.iter_mut() {
            if mount.is_some_and(|want| want != *m) {
                continue;
            }
            let mut fresh = Pipette::new(
                *m,
                Arc::clone(p.shared_config()),
                *p.offset(),
                p.id().map(String::from),
            );
            if let Err(e) = fresh.act_as(p.acting_as()) {
                tracing::warn!(mount = %m, error = %e, "could not keep acting-as name on reset");
            }
            *p = fresh;
        }
        tracing::debug!(?mount, "instrument state reset");
    }

    // ── Offsets ──────────────────────────────────────────────────────────────

    pub fn instrument_offset(&self, mount: Mount) -> Result<InstrumentOffset> {
        let slots = self.slots();
        let offset = match mount {
            Mount::Gripper => slots.gripper.as_ref().map(|g| *g.offset()),
            _ => slots.pipettes.get(&mount).map(|p| *p.offset()),
        };
        match offset {
            Some(o) => Ok(o),
            None => fail(HardwareError::InstrumentNotAttached { mount }),
        }
    }

    /// Reload the stored offset, or with `to_default` forget it.
    pub fn reset_instrument_offset(&self, mount: Mount, to_default: bool) -> Result<()> {
        if mount == Mount::Gripper {
            self.require_gripper_capability()?;
            let id = match &self.slots().gripper {
                Some(g) => g.id().map(String::from),
                None => return fail(HardwareError::InstrumentNotAttached { mount }),
            };
            let offset = if to_default {
                if let Some(id) = &id {
                    self.store
                        .save_gripper_offset(id, &InstrumentOffset::default())
                        .map_err(|e| backend_report(e, "saving gripper offset failed"))?;
                }
                InstrumentOffset::default()
            } else {
                self.store
                    .load_gripper_offset(id.as_deref())
                    .map_err(|e| backend_report(e, "loading gripper offset failed"))?
            };
            if let Some(g) = self.slots().gripper.as_mut() {
                g.set_offset(offset);
            }
            return Ok(());
        }

        let id = self.pipette(mount)?.id().map(String::from);
        let offset = if to_default {
            if let Some(id) = &id {
                self.store
                    .delete_instrument_offset(id, mount)
                    .map_err(|e| backend_report(e, "deleting instrument offset failed"))?;
            }
            InstrumentOffset::default()
        } else {
            self.store
                .load_instrument_offset(id.as_deref(), mount)
                .map_err(|e| backend_report(e, "loading instrument offset failed"))?
        };
        self.with_pipette(mount, |p| {
            p.set_offset(offset);
            Ok(())
        })
    }

    /// Store `offset` as the user calibration for the instrument on `mount`.
    pub fn save_instrument_offset(&self, mount: Mount, offset: Point) -> Result<InstrumentOffset> {
        let saved = InstrumentOffset {
            offset,
            source: OffsetSource::User,
            last_modified: now_secs(),
            marked_bad: false,
        };
        let no_serial = || {
            fail(HardwareError::precondition(format!(
                "instrument on {mount} mount has no serial; its offset cannot be stored"
            )))
        };
        if mount == Mount::Gripper {
            self.require_gripper_capability()?;
            let id = match &self.slots().gripper {
                Some(g) => g.id().map(String::from),
                None => return fail(HardwareError::InstrumentNotAttached { mount }),
            };
            let Some(id) = id else { return no_serial() };
            self.store
                .save_gripper_offset(&id, &saved)
                .map_err(|e| backend_report(e, "saving gripper offset failed"))?;
            if let Some(g) = self.slots().gripper.as_mut() {
                g.set_offset(saved);
            }
        } else {
            let Some(id) = self.pipette(mount)?.id().map(String::from) else {
                return no_serial();
            };
            self.store
                .save_instrument_offset(&id, mount, &saved)
                .map_err(|e| backend_report(e, "saving instrument offset failed"))?;
            self.with_pipette(mount, |p| {
                p.set_offset(saved);
                Ok(())
            })?;
        }
        tracing::info!(%mount, ?offset, "instrument offset saved");
        Ok(saved)
    }
}
