//! The cohort aggregate and its temporal queries.
//!
//! A cohort owns its memberships. Membership history is never deleted by
//! the normal operations here: removing a patient ends the running
//! membership, and voiding is recorded in place.

use crate::membership::Membership;
use crate::types::{CohortId, MembershipKey, PatientRef, VoidInfo, Voidable};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// A named group of patients whose membership can change over time
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Cohort {
    #[serde(default)]
    id: Option<CohortId>,
    uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    members: Vec<Membership>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    void_info: Option<VoidInfo>,
}

impl Cohort {
    /// Create an empty, unsaved cohort
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            date_created: Utc::now(),
            members: Vec::new(),
            void_info: None,
        }
    }

    /// Legacy constructor from a flat list of patient ids.
    ///
    /// Every id becomes a membership starting now; repeated ids collapse.
    pub fn with_patients(
        name: impl Into<String>,
        description: impl Into<String>,
        patients: impl IntoIterator<Item = PatientRef>,
    ) -> Self {
        let mut cohort = Self::new(name, description);
        let now = cohort.date_created;
        for patient in patients {
            cohort.add_patient_at(patient, now);
        }
        cohort
    }

    pub fn id(&self) -> Option<CohortId> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: CohortId) {
        self.id = Some(id);
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Every membership ever recorded, including ended and voided ones
    pub fn memberships(&self) -> &[Membership] {
        &self.members
    }

    /// All memberships (any state) for one patient
    pub fn memberships_of(&self, patient: PatientRef) -> impl Iterator<Item = &Membership> {
        self.members.iter().filter(move |m| m.patient() == patient)
    }

    pub(crate) fn memberships_of_mut(
        &mut self,
        patient: PatientRef,
    ) -> impl Iterator<Item = &mut Membership> {
        self.members.iter_mut().filter(move |m| m.patient() == patient)
    }

    /// Every patient referenced by any membership
    pub fn referenced_patients(&self) -> BTreeSet<PatientRef> {
        self.members.iter().map(Membership::patient).collect()
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Append a membership as given. No deduplication happens here; use
    /// `add_patient` for idempotent adds.
    pub fn add_membership(&mut self, membership: Membership) {
        tracing::debug!(
            "Adding membership for patient {} starting {}",
            membership.patient(),
            membership.start_date()
        );
        self.members.push(membership);
    }

    /// Add a patient starting now. Returns `false` if already a member.
    pub fn add_patient(&mut self, patient: PatientRef) -> bool {
        self.add_patient_at(patient, Utc::now())
    }

    /// Add a patient starting at `at`.
    ///
    /// No-op if a non-voided membership of the patient is still running at
    /// or after `at`, so a backdated add never overlaps a later membership.
    pub fn add_patient_at(&mut self, patient: PatientRef, at: DateTime<Utc>) -> bool {
        let overlaps = self
            .memberships_of(patient)
            .any(|m| !m.is_voided() && m.end_date().map_or(true, |end| end > at));
        if overlaps {
            return false;
        }
        self.add_membership(Membership::starting_at(patient, at));
        true
    }

    /// End the patient's active membership now
    pub fn remove_patient(&mut self, patient: PatientRef) -> bool {
        self.remove_patient_at(patient, Utc::now())
    }

    /// End every membership of `patient` that is active at `at`.
    ///
    /// Returns `false` (and changes nothing) if the patient is not a member then.
    pub fn remove_patient_at(&mut self, patient: PatientRef, at: DateTime<Utc>) -> bool {
        let mut ended = 0;
        for membership in self.memberships_of_mut(patient) {
            if membership.is_active(at) {
                membership.close_active(at);
                ended += 1;
            }
        }
        if ended > 0 {
            tracing::debug!("Ended {} membership(s) for patient {} at {}", ended, patient, at);
        }
        ended > 0
    }

    /// End a specific membership now
    pub fn remove_membership(&mut self, key: &MembershipKey) -> Result<bool> {
        self.remove_membership_at(key, Utc::now())
    }

    /// End a specific membership at `at`.
    ///
    /// Returns `Ok(false)` if the membership is unknown, voided, already
    /// ended, or not yet started at `at`.
    pub fn remove_membership_at(&mut self, key: &MembershipKey, at: DateTime<Utc>) -> Result<bool> {
        match self.members.iter_mut().find(|m| m.key() == *key) {
            Some(membership) if !membership.is_voided() && membership.start_date() <= at => {
                membership.end(at)
            }
            _ => Ok(false),
        }
    }

    // ------------------------------------------------------------------------
    // Temporal queries
    // ------------------------------------------------------------------------

    /// Memberships in effect at `as_of`.
    ///
    /// If the data holds two simultaneously active memberships for one
    /// patient, both are returned; see `current_membership` for a single pick.
    pub fn memberships_at(&self, as_of: DateTime<Utc>) -> Vec<&Membership> {
        self.members.iter().filter(|m| m.is_active(as_of)).collect()
    }

    /// The patient's active membership at `as_of`; the latest start wins
    /// when several overlap.
    pub fn current_membership(&self, patient: PatientRef, as_of: DateTime<Utc>) -> Option<&Membership> {
        self.memberships_of(patient)
            .filter(|m| m.is_active(as_of))
            .max_by_key(|m| m.start_date())
    }

    pub fn contains(&self, patient: PatientRef) -> bool {
        self.contains_at(patient, Utc::now())
    }

    pub fn contains_at(&self, patient: PatientRef, as_of: DateTime<Utc>) -> bool {
        self.memberships_of(patient).any(|m| m.is_active(as_of))
    }

    /// Number of active memberships now
    pub fn size(&self) -> usize {
        self.size_at(Utc::now())
    }

    pub fn size_at(&self, as_of: DateTime<Utc>) -> usize {
        self.members.iter().filter(|m| m.is_active(as_of)).count()
    }

    /// Legacy flat view: ids of patients with an active membership now
    pub fn member_ids(&self) -> BTreeSet<PatientRef> {
        self.member_ids_at(Utc::now())
    }

    pub fn member_ids_at(&self, as_of: DateTime<Utc>) -> BTreeSet<PatientRef> {
        self.members
            .iter()
            .filter(|m| m.is_active(as_of))
            .map(Membership::patient)
            .collect()
    }
}

impl Voidable for Cohort {
    fn void_info(&self) -> Option<&VoidInfo> {
        self.void_info.as_ref()
    }

    fn void_info_mut(&mut self) -> &mut Option<VoidInfo> {
        &mut self.void_info
    }
}
