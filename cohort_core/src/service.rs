//! Cohort service: lookups, membership changes and patient lifecycle
//! handling on top of a `CohortStore` and a `PatientRegistry`.
//!
//! Every mutation goes through `save_cohort`, which runs the validator
//! registry and refuses to persist a cohort with violations. The void
//! cascade is the exception: it repairs memberships of a voided patient and
//! saves the touched cohorts directly.

use crate::cascade::{self, CascadeReport, PatientEvent, PatientUnvoided, PatientVoided};
use crate::cohort::Cohort;
use crate::membership::Membership;
use crate::patient::PatientRegistry;
use crate::store::CohortStore;
use crate::types::{CohortId, MembershipKey, PatientRef, UserRef, VoidInfo, Voidable};
use crate::validator::{default_registry, Entity, ValidatorRegistry, Violation};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct CohortService<S, P> {
    store: S,
    patients: P,
    validators: ValidatorRegistry,
}

impl<S: CohortStore, P: PatientRegistry> CohortService<S, P> {
    /// Create a service using the built-in validators
    pub fn new(store: S, patients: P) -> Self {
        Self {
            store,
            patients,
            validators: default_registry().clone(),
        }
    }

    /// Replace the validator registry
    pub fn with_validators(mut self, validators: ValidatorRegistry) -> Self {
        self.validators = validators;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn patients(&self) -> &P {
        &self.patients
    }

    pub fn into_parts(self) -> (S, P) {
        (self.store, self.patients)
    }

    // ------------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------------

    /// Violations the registry reports for `cohort`
    pub fn validate(&self, cohort: &Cohort) -> Result<Vec<Violation>> {
        self.validators.validate(Entity::Cohort(cohort), &self.patients)
    }

    /// Validate and persist a cohort, assigning an id if it is new
    pub fn save_cohort(&mut self, cohort: Cohort) -> Result<Cohort> {
        let violations = self.validate(&cohort)?;
        if !violations.is_empty() {
            tracing::warn!(
                "Refusing to save cohort {:?}: {} violation(s)",
                cohort.name,
                violations.len()
            );
            return Err(Error::Validation(violations));
        }
        self.store.save(cohort)
    }

    /// Hard delete, bypassing void semantics
    pub fn purge_cohort(&mut self, id: CohortId) -> Result<()> {
        if !self.store.purge(id)? {
            return Err(Error::CohortNotFound(id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------------

    pub fn get_cohort(&self, id: CohortId) -> Result<Option<Cohort>> {
        self.store.get(id)
    }

    pub fn get_cohort_by_uuid(&self, uuid: Uuid) -> Result<Option<Cohort>> {
        Ok(self.store.all()?.into_iter().find(|c| c.uuid() == uuid))
    }

    /// The non-voided cohort with exactly this name (lowest id if several).
    /// Voided cohorts are never returned.
    pub fn get_cohort_by_name(&self, name: &str) -> Result<Option<Cohort>> {
        Ok(self
            .store
            .all()?
            .into_iter()
            .find(|c| c.name == name && !c.is_voided()))
    }

    /// Cohorts whose name contains `fragment`, ignoring case, voided included
    pub fn get_cohorts(&self, fragment: &str) -> Result<Vec<Cohort>> {
        let needle = fragment.to_lowercase();
        Ok(self
            .store
            .all()?
            .into_iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .collect())
    }

    pub fn get_all_cohorts(&self, include_voided: bool) -> Result<Vec<Cohort>> {
        Ok(self
            .store
            .all()?
            .into_iter()
            .filter(|c| include_voided || !c.is_voided())
            .collect())
    }

    /// Non-voided cohorts the patient is currently an active member of
    pub fn get_cohorts_containing_patient(&self, patient: PatientRef) -> Result<Vec<Cohort>> {
        let now = Utc::now();
        Ok(self
            .store
            .find_cohorts_containing(patient)?
            .into_iter()
            .filter(|c| !c.is_voided() && c.contains_at(patient, now))
            .collect())
    }

    // ------------------------------------------------------------------------
    // Membership changes
    // ------------------------------------------------------------------------

    fn modify<F>(&mut self, id: CohortId, f: F) -> Result<Cohort>
    where
        F: FnOnce(&mut Cohort) -> Result<()>,
    {
        let mut cohort = self.store.get(id)?.ok_or(Error::CohortNotFound(id))?;
        f(&mut cohort)?;
        self.save_cohort(cohort)
    }

    /// Add a patient now; a patient who is already a member is left as is
    pub fn add_patient_to_cohort(&mut self, id: CohortId, patient: PatientRef) -> Result<Cohort> {
        self.add_patient_to_cohort_at(id, patient, Utc::now())
    }

    pub fn add_patient_to_cohort_at(
        &mut self,
        id: CohortId,
        patient: PatientRef,
        at: DateTime<Utc>,
    ) -> Result<Cohort> {
        self.modify(id, |cohort| {
            if cohort.add_patient_at(patient, at) {
                tracing::info!("Added patient {} to cohort {} from {}", patient, id, at);
            }
            Ok(())
        })
    }

    /// End the patient's membership now; a non-member is not an error
    pub fn remove_patient_from_cohort(&mut self, id: CohortId, patient: PatientRef) -> Result<Cohort> {
        self.remove_patient_from_cohort_at(id, patient, Utc::now())
    }

    pub fn remove_patient_from_cohort_at(
        &mut self,
        id: CohortId,
        patient: PatientRef,
        at: DateTime<Utc>,
    ) -> Result<Cohort> {
        self.modify(id, |cohort| {
            if cohort.remove_patient_at(patient, at) {
                tracing::info!("Removed patient {} from cohort {} at {}", patient, id, at);
            }
            Ok(())
        })
    }

    pub fn add_membership_to_cohort(&mut self, id: CohortId, membership: Membership) -> Result<Cohort> {
        self.modify(id, |cohort| {
            cohort.add_membership(membership);
            Ok(())
        })
    }

    /// End one specific membership now
    pub fn remove_membership_from_cohort(&mut self, id: CohortId, key: &MembershipKey) -> Result<Cohort> {
        self.modify(id, |cohort| cohort.remove_membership(key).map(|_| ()))
    }

    // ------------------------------------------------------------------------
    // Cohort void state
    // ------------------------------------------------------------------------

    /// Void a cohort. An already-voided cohort keeps its original metadata.
    pub fn void_cohort(
        &mut self,
        id: CohortId,
        by: &UserRef,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Cohort> {
        self.modify(id, |cohort| {
            if cohort.void(by, reason, at)? {
                tracing::info!("Voided cohort {} ({})", id, reason);
            }
            Ok(())
        })
    }

    pub fn unvoid_cohort(&mut self, id: CohortId) -> Result<Cohort> {
        self.modify(id, |cohort| {
            if cohort.unvoid() {
                tracing::info!("Unvoided cohort {}", id);
            }
            Ok(())
        })
    }

    // ------------------------------------------------------------------------
    // Patient lifecycle
    // ------------------------------------------------------------------------

    /// Record the patient as voided and void their memberships everywhere.
    ///
    /// Safe to call again for a patient that is already voided.
    pub fn patient_voided(&mut self, event: &PatientVoided) -> Result<CascadeReport> {
        VoidInfo::new(event.by.clone(), &event.reason, event.at)?;
        self.patients
            .void_patient(event.patient, &event.by, &event.reason, event.at)?;

        let mut cohorts = self.store.find_cohorts_containing(event.patient)?;
        let report = cascade::on_patient_voided(cohorts.iter_mut(), event)?;
        if !report.is_empty() {
            for cohort in cohorts {
                self.store.save(cohort)?;
            }
        }
        Ok(report)
    }

    /// Record the patient as unvoided and unvoid their memberships everywhere
    pub fn patient_unvoided(&mut self, event: &PatientUnvoided) -> Result<CascadeReport> {
        self.patients.unvoid_patient(event.patient);

        let mut cohorts = self.store.find_cohorts_containing(event.patient)?;
        let report = cascade::on_patient_unvoided(cohorts.iter_mut(), event);
        if !report.is_empty() {
            for cohort in cohorts {
                self.store.save(cohort)?;
            }
        }
        Ok(report)
    }

    pub fn apply_event(&mut self, event: &PatientEvent) -> Result<CascadeReport> {
        match event {
            PatientEvent::Voided(e) => self.patient_voided(e),
            PatientEvent::Unvoided(e) => self.patient_unvoided(e),
        }
    }
}
