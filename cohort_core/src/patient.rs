//! Patient void state as seen by the cohort model.
//!
//! Cohorts never own patients. The validator and the void cascade only need
//! to know whether a patient is voided, which is what `PatientLookup` gives
//! them. `PatientDirectory` is the in-process implementation persisted
//! alongside the cohort store.

use crate::types::{PatientRef, UserRef, VoidInfo, Voidable};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Read access to patient void state
pub trait PatientLookup {
    fn void_info(&self, patient: PatientRef) -> Option<&VoidInfo>;

    fn is_voided(&self, patient: PatientRef) -> bool {
        self.void_info(patient).is_some()
    }
}

/// Write access to patient void state, used when a lifecycle event arrives
pub trait PatientRegistry: PatientLookup {
    fn void_patient(
        &mut self,
        patient: PatientRef,
        by: &UserRef,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    fn unvoid_patient(&mut self, patient: PatientRef) -> bool;
}

impl<T: PatientLookup + ?Sized> PatientLookup for &mut T {
    fn void_info(&self, patient: PatientRef) -> Option<&VoidInfo> {
        (**self).void_info(patient)
    }
}

impl<T: PatientRegistry + ?Sized> PatientRegistry for &mut T {
    fn void_patient(
        &mut self,
        patient: PatientRef,
        by: &UserRef,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        (**self).void_patient(patient, by, reason, at)
    }

    fn unvoid_patient(&mut self, patient: PatientRef) -> bool {
        (**self).unvoid_patient(patient)
    }
}

/// The slice of a patient record the cohort model cares about
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: PatientRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    void_info: Option<VoidInfo>,
}

impl PatientRecord {
    pub fn new(id: PatientRef) -> Self {
        Self { id, void_info: None }
    }
}

impl Voidable for PatientRecord {
    fn void_info(&self) -> Option<&VoidInfo> {
        self.void_info.as_ref()
    }

    fn void_info_mut(&mut self) -> &mut Option<VoidInfo> {
        &mut self.void_info
    }
}

/// Known patients keyed by id. Unknown patients count as not voided.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientDirectory {
    patients: BTreeMap<PatientRef, PatientRecord>,
}

impl PatientDirectory {
    pub fn get(&self, patient: PatientRef) -> Option<&PatientRecord> {
        self.patients.get(&patient)
    }

    pub fn len(&self) -> usize {
        self.patients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patients.is_empty()
    }

    /// Mark a patient voided, registering it if unseen.
    ///
    /// Returns `Ok(false)` if the patient was already voided.
    pub fn void_patient(
        &mut self,
        patient: PatientRef,
        by: &UserRef,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut record = self
            .patients
            .get(&patient)
            .cloned()
            .unwrap_or_else(|| PatientRecord::new(patient));
        let changed = record.void(by, reason, at)?;
        self.patients.insert(patient, record);
        Ok(changed)
    }

    /// Clear a patient's void state. Unknown patients are a no-op.
    pub fn unvoid_patient(&mut self, patient: PatientRef) -> bool {
        self.patients
            .get_mut(&patient)
            .map_or(false, |record| record.unvoid())
    }
}

impl PatientLookup for PatientDirectory {
    fn void_info(&self, patient: PatientRef) -> Option<&VoidInfo> {
        self.patients.get(&patient).and_then(|r| r.void_info.as_ref())
    }
}

impl PatientRegistry for PatientDirectory {
    fn void_patient(
        &mut self,
        patient: PatientRef,
        by: &UserRef,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        PatientDirectory::void_patient(self, patient, by, reason, at)
    }

    fn unvoid_patient(&mut self, patient: PatientRef) -> bool {
        PatientDirectory::unvoid_patient(self, patient)
    }
}
