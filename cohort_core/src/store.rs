//! Cohort persistence collaborator.
//!
//! The service only needs the operations on `CohortStore`. `MemoryStore`
//! keeps cohorts in memory with a patient → cohort index so the void
//! cascade can find affected cohorts without walking every membership.

use crate::cohort::Cohort;
use crate::types::{CohortId, PatientRef};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Storage operations the cohort service relies on
pub trait CohortStore {
    fn get(&self, id: CohortId) -> Result<Option<Cohort>>;

    /// Every stored cohort, voided ones included, in id order
    fn all(&self) -> Result<Vec<Cohort>>;

    /// Insert or replace a cohort, assigning an id on first save
    fn save(&mut self, cohort: Cohort) -> Result<Cohort>;

    /// Hard delete. Returns `false` if the id was unknown.
    fn purge(&mut self, id: CohortId) -> Result<bool>;

    /// Ids of cohorts holding any membership (any state) for `patient`
    fn cohort_ids_referencing(&self, patient: PatientRef) -> Result<Vec<CohortId>>;

    fn find_cohorts_containing(&self, patient: PatientRef) -> Result<Vec<Cohort>> {
        let mut cohorts = Vec::new();
        for id in self.cohort_ids_referencing(patient)? {
            if let Some(cohort) = self.get(id)? {
                cohorts.push(cohort);
            }
        }
        Ok(cohorts)
    }
}

impl<S: CohortStore + ?Sized> CohortStore for &mut S {
    fn get(&self, id: CohortId) -> Result<Option<Cohort>> {
        (**self).get(id)
    }

    fn all(&self) -> Result<Vec<Cohort>> {
        (**self).all()
    }

    fn save(&mut self, cohort: Cohort) -> Result<Cohort> {
        (**self).save(cohort)
    }

    fn purge(&mut self, id: CohortId) -> Result<bool> {
        (**self).purge(id)
    }

    fn cohort_ids_referencing(&self, patient: PatientRef) -> Result<Vec<CohortId>> {
        (**self).cohort_ids_referencing(patient)
    }
}

/// In-memory cohort store; serializes as a plain list of cohorts
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "StoredCohorts", into = "StoredCohorts")]
pub struct MemoryStore {
    next_id: u32,
    cohorts: BTreeMap<CohortId, Cohort>,
    patient_index: HashMap<PatientRef, BTreeSet<CohortId>>,
}

/// On-disk shape of a `MemoryStore`; the index is rebuilt on load
#[derive(Serialize, Deserialize)]
struct StoredCohorts {
    #[serde(default)]
    next_id: u32,
    #[serde(default)]
    cohorts: Vec<Cohort>,
}

impl From<StoredCohorts> for MemoryStore {
    fn from(stored: StoredCohorts) -> Self {
        let mut store = MemoryStore {
            next_id: stored.next_id.max(1),
            ..Default::default()
        };
        for cohort in stored.cohorts {
            store.insert(cohort);
        }
        store
    }
}

impl From<MemoryStore> for StoredCohorts {
    fn from(store: MemoryStore) -> Self {
        StoredCohorts {
            next_id: store.next_id,
            cohorts: store.cohorts.into_values().collect(),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.cohorts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cohorts.is_empty()
    }

    fn insert(&mut self, mut cohort: Cohort) -> Cohort {
        let id = match cohort.id() {
            Some(id) => id,
            None => {
                let id = CohortId(self.next_id.max(1));
                cohort.set_id(id);
                id
            }
        };
        self.next_id = self.next_id.max(id.0 + 1);

        self.unindex(id);
        for patient in cohort.referenced_patients() {
            self.patient_index.entry(patient).or_default().insert(id);
        }
        self.cohorts.insert(id, cohort.clone());
        cohort
    }

    fn unindex(&mut self, id: CohortId) {
        if let Some(previous) = self.cohorts.get(&id) {
            for patient in previous.referenced_patients() {
                if let Some(ids) = self.patient_index.get_mut(&patient) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.patient_index.remove(&patient);
                    }
                }
            }
        }
    }
}

impl CohortStore for MemoryStore {
    fn get(&self, id: CohortId) -> Result<Option<Cohort>> {
        Ok(self.cohorts.get(&id).cloned())
    }

    fn all(&self) -> Result<Vec<Cohort>> {
        Ok(self.cohorts.values().cloned().collect())
    }

    fn save(&mut self, cohort: Cohort) -> Result<Cohort> {
        let saved = self.insert(cohort);
        tracing::debug!(
            "Saved cohort {:?} ({} membership(s))",
            saved.id(),
            saved.memberships().len()
        );
        Ok(saved)
    }

    fn purge(&mut self, id: CohortId) -> Result<bool> {
        self.unindex(id);
        let removed = self.cohorts.remove(&id).is_some();
        if removed {
            tracing::info!("Purged cohort {}", id);
        }
        Ok(removed)
    }

    fn cohort_ids_referencing(&self, patient: PatientRef) -> Result<Vec<CohortId>> {
        Ok(self
            .patient_index
            .get(&patient)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }
}
