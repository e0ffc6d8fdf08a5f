//! Medication record store.
//!
//! The scheduling core only reads medications through [`MedicationStore`].
//! [`JsonMedicationStore`] keeps records in a JSON array on disk; its write
//! methods exist for the command line tool's `add`/`remove` commands.

use crate::persist::{read_json, with_exclusive_lock, write_json_atomic};
use crate::{Error, Medication, Result};
use std::path::{Path, PathBuf};

/// Read access to stored medications
pub trait MedicationStore {
    /// Active medications, optionally limited to one pet
    fn active_medications(&self, pet_id: Option<&str>) -> Result<Vec<Medication>>;

    fn medication_by_id(&self, id: &str) -> Result<Option<Medication>>;
}

fn is_selected(medication: &Medication, pet_id: Option<&str>) -> bool {
    medication.active && pet_id.map_or(true, |pet| medication.pet_id == pet)
}

impl MedicationStore for Vec<Medication> {
    fn active_medications(&self, pet_id: Option<&str>) -> Result<Vec<Medication>> {
        Ok(self
            .iter()
            .filter(|m| is_selected(m, pet_id))
            .cloned()
            .collect())
    }

    fn medication_by_id(&self, id: &str) -> Result<Option<Medication>> {
        Ok(self.iter().find(|m| m.id == id).cloned())
    }
}

/// Medications stored as a JSON array
pub struct JsonMedicationStore {
    path: PathBuf,
}

impl JsonMedicationStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every record in the store.
    ///
    /// A missing file is an empty store. Entries that are not medication
    /// records are skipped with a warning; a file that is not a JSON array is
    /// an error, since treating it as empty would cancel every reminder.
    pub fn load_all(&self) -> Result<Vec<Medication>> {
        let raw: Vec<serde_json::Value> = match read_json(&self.path) {
            Ok(raw) => raw.unwrap_or_default(),
            Err(e) => {
                return Err(Error::Store(format!(
                    "Failed to read medications from {:?}: {}",
                    self.path, e
                )));
            }
        };

        let mut medications = Vec::with_capacity(raw.len());
        for (index, value) in raw.into_iter().enumerate() {
            match serde_json::from_value::<Medication>(value) {
                Ok(medication) => medications.push(medication),
                Err(e) => {
                    tracing::warn!(
                        "Skipping malformed medication entry {} in {:?}: {}",
                        index,
                        self.path,
                        e
                    );
                }
            }
        }

        tracing::debug!("Loaded {} medications from {:?}", medications.len(), self.path);
        Ok(medications)
    }

    /// Add a record; fails if the id is already taken
    pub fn insert(&self, medication: Medication) -> Result<()> {
        with_exclusive_lock(&self.path, || {
            let mut all = self.load_all()?;
            if all.iter().any(|m| m.id == medication.id) {
                return Err(Error::Store(format!(
                    "Medication {} already exists",
                    medication.id
                )));
            }
            tracing::info!("Adding medication {} for pet {}", medication.id, medication.pet_id);
            all.push(medication);
            write_json_atomic(&self.path, &all)
        })
    }

    /// Remove a record by id, returning whether it existed
    pub fn remove(&self, id: &str) -> Result<bool> {
        with_exclusive_lock(&self.path, || {
            let mut all = self.load_all()?;
            let before = all.len();
            all.retain(|m| m.id != id);
            if all.len() == before {
                return Ok(false);
            }
            write_json_atomic(&self.path, &all)?;
            tracing::info!("Removed medication {}", id);
            Ok(true)
        })
    }
}

impl MedicationStore for JsonMedicationStore {
    fn active_medications(&self, pet_id: Option<&str>) -> Result<Vec<Medication>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|m| is_selected(m, pet_id))
            .collect())
    }

    fn medication_by_id(&self, id: &str) -> Result<Option<Medication>> {
        Ok(self.load_all()?.into_iter().find(|m| m.id == id))
    }
}
