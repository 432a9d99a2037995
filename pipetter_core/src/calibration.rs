//! Calibration storage implementations.
//!
//! [`InMemoryCalibrationStore`] backs simulators and tests;
//! [`FileCalibrationStore`] keeps one TOML document per instrument id under a
//! root directory, written atomically.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use pipetter_traits::{BoundaryResult, CalibrationStorage, DeckCalibrationData, InstrumentOffset, Mount};

use crate::atomic::write_atomic;
use crate::util::lock;

#[derive(Debug, Default)]
struct Stored {
    deck: Option<DeckCalibrationData>,
    pipettes: BTreeMap<(String, Mount), InstrumentOffset>,
    grippers: BTreeMap<String, InstrumentOffset>,
}

#[derive(Debug, Default)]
pub struct InMemoryCalibrationStore {
    inner: Mutex<Stored>,
}

impl InMemoryCalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deck(deck: DeckCalibrationData) -> Self {
        let s = Self::default();
        lock(&s.inner).deck = Some(deck);
        s
    }
}

impl CalibrationStorage for InMemoryCalibrationStore {
    fn load_deck_calibration(&self) -> BoundaryResult<Option<DeckCalibrationData>> {
        Ok(lock(&self.inner).deck)
    }

    fn save_deck_calibration(&self, data: &DeckCalibrationData) -> BoundaryResult<()> {
        lock(&self.inner).deck = Some(*data);
        Ok(())
    }

    fn load_instrument_offset(
        &self,
        instrument_id: Option<&str>,
        mount: Mount,
    ) -> BoundaryResult<InstrumentOffset> {
        let Some(id) = instrument_id else {
            return Ok(InstrumentOffset::default());
        };
        Ok(lock(&self.inner)
            .pipettes
            .get(&(id.to_string(), mount))
            .copied()
            .unwrap_or_default())
    }

    fn save_instrument_offset(
        &self,
        instrument_id: &str,
        mount: Mount,
        offset: &InstrumentOffset,
    ) -> BoundaryResult<()> {
        lock(&self.inner)
            .pipettes
            .insert((instrument_id.to_string(), mount), *offset);
        Ok(())
    }

    fn delete_instrument_offset(&self, instrument_id: &str, mount: Mount) -> BoundaryResult<()> {
        lock(&self.inner)
            .pipettes
            .remove(&(instrument_id.to_string(), mount));
        Ok(())
    }

    fn load_gripper_offset(&self, gripper_id: Option<&str>) -> BoundaryResult<InstrumentOffset> {
        let Some(id) = gripper_id else {
            return Ok(InstrumentOffset::default());
        };
        Ok(lock(&self.inner).grippers.get(id).copied().unwrap_or_default())
    }

    fn save_gripper_offset(&self, gripper_id: &str, offset: &InstrumentOffset) -> BoundaryResult<()> {
        lock(&self.inner)
            .grippers
            .insert(gripper_id.to_string(), *offset);
        Ok(())
    }
}

/// Layout: `deck_calibration.toml`, `pipettes/<mount>/<id>.toml`, `gripper/<id>.toml`.
#[derive(Debug, Clone)]
pub struct FileCalibrationStore {
    root: PathBuf,
}

impl FileCalibrationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn deck_path(&self) -> PathBuf {
        self.root.join("deck_calibration.toml")
    }

    fn pipette_path(&self, id: &str, mount: Mount) -> PathBuf {
        self.root
            .join("pipettes")
            .join(mount.name())
            .join(format!("{id}.toml"))
    }

    fn gripper_path(&self, id: &str) -> PathBuf {
        self.root.join("gripper").join(format!("{id}.toml"))
    }
}

fn read_toml<T: serde::de::DeserializeOwned>(path: &Path) -> BoundaryResult<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(toml::from_str(&s)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Box::new(e)),
    }
}

fn write_toml<T: serde::Serialize>(path: &Path, value: &T) -> BoundaryResult<()> {
    let s = toml::to_string(value)?;
    write_atomic(path, s.as_bytes())?;
    tracing::debug!(path = %path.display(), "calibration saved");
    Ok(())
}

impl CalibrationStorage for FileCalibrationStore {
    fn load_deck_calibration(&self) -> BoundaryResult<Option<DeckCalibrationData>> {
        read_toml(&self.deck_path())
    }

    fn save_deck_calibration(&self, data: &DeckCalibrationData) -> BoundaryResult<()> {
        write_toml(&self.deck_path(), data)
    }

    fn load_instrument_offset(
        &self,
        instrument_id: Option<&str>,
        mount: Mount,
    ) -> BoundaryResult<InstrumentOffset> {
        match instrument_id {
            Some(id) => Ok(read_toml(&self.pipette_path(id, mount))?.unwrap_or_default()),
            None => Ok(InstrumentOffset::default()),
        }
    }

    fn save_instrument_offset(
        &self,
        instrument_id: &str,
        mount: Mount,
        offset: &InstrumentOffset,
    ) -> BoundaryResult<()> {
        write_toml(&self.pipette_path(instrument_id, mount), offset)
    }

    fn delete_instrument_offset(&self, instrument_id: &str, mount: Mount) -> BoundaryResult<()> {
        match std::fs::remove_file(self.pipette_path(instrument_id, mount)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Box::new(e)),
        }
    }

    fn load_gripper_offset(&self, gripper_id: Option<&str>) -> BoundaryResult<InstrumentOffset> {
        match gripper_id {
            Some(id) => Ok(read_toml(&self.gripper_path(id))?.unwrap_or_default()),
            None => Ok(InstrumentOffset::default()),
        }
    }

    fn save_gripper_offset(&self, gripper_id: &str, offset: &InstrumentOffset) -> BoundaryResult<()> {
        write_toml(&self.gripper_path(gripper_id), offset)
    }
}
