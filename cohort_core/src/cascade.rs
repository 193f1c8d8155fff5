//! Propagation of patient void/unvoid events into cohort memberships.
//!
//! Memberships never look their patient up. Instead, a patient lifecycle
//! event is pushed into every cohort of the working set, and each matching
//! membership is voided or unvoided in place. Nothing here persists; the
//! caller saves whatever cohorts the report says changed.
//!
//! Both directions are idempotent, so re-delivering an event is harmless.

use crate::cohort::Cohort;
use crate::types::{PatientRef, UserRef, VoidInfo, Voidable};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A patient was voided
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatientVoided {
    pub patient: PatientRef,
    pub by: UserRef,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// A patient was unvoided. `reason` is the reason the patient had been voided with.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PatientUnvoided {
    pub patient: PatientRef,
    pub by: UserRef,
    pub at: DateTime<Utc>,
    #[serde(default)]
    pub reason: String,
}

/// Patient lifecycle events the cohort model reacts to
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PatientEvent {
    Voided(PatientVoided),
    Unvoided(PatientUnvoided),
}

impl PatientEvent {
    pub fn patient(&self) -> PatientRef {
        match self {
            PatientEvent::Voided(e) => e.patient,
            PatientEvent::Unvoided(e) => e.patient,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            PatientEvent::Voided(e) => e.at,
            PatientEvent::Unvoided(e) => e.at,
        }
    }
}

/// What a cascade changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CascadeReport {
    /// Cohorts with at least one changed membership
    pub cohorts_changed: usize,
    /// Memberships whose void state flipped
    pub memberships_changed: usize,
}

impl CascadeReport {
    pub fn is_empty(&self) -> bool {
        self.memberships_changed == 0
    }

    fn record(&mut self, changed: usize) {
        if changed > 0 {
            self.cohorts_changed += 1;
            self.memberships_changed += changed;
        }
    }
}

/// Void every not-yet-voided membership of the event's patient in one cohort.
///
/// Interval state is ignored: ended and future memberships are voided too.
pub fn void_memberships(cohort: &mut Cohort, event: &PatientVoided) -> Result<usize> {
    let mut changed = 0;
    for membership in cohort.memberships_of_mut(event.patient) {
        if membership.void(&event.by, &event.reason, event.at)? {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Unvoid every voided membership of `patient` in one cohort
pub fn unvoid_memberships(cohort: &mut Cohort, patient: PatientRef) -> usize {
    cohort
        .memberships_of_mut(patient)
        .filter_map(|m| m.unvoid().then_some(()))
        .count()
}

/// Apply a patient void to every cohort in the working set.
///
/// The reason is checked before any cohort is touched, so a rejected event
/// leaves the working set unchanged.
pub fn on_patient_voided<'a, I>(cohorts: I, event: &PatientVoided) -> Result<CascadeReport>
where
    I: IntoIterator<Item = &'a mut Cohort>,
{
    VoidInfo::new(event.by.clone(), &event.reason, event.at)?;

    let mut report = CascadeReport::default();
    for cohort in cohorts {
        report.record(void_memberships(cohort, event)?);
    }

    tracing::info!(
        "Patient {} voided: {} membership(s) voided across {} cohort(s)",
        event.patient,
        report.memberships_changed,
        report.cohorts_changed
    );
    Ok(report)
}

/// Apply a patient unvoid to every cohort in the working set.
///
/// Every voided membership of the patient is restored, whatever it was
/// originally voided for.
pub fn on_patient_unvoided<'a, I>(cohorts: I, event: &PatientUnvoided) -> CascadeReport
where
    I: IntoIterator<Item = &'a mut Cohort>,
{
    let mut report = CascadeReport::default();
    for cohort in cohorts {
        report.record(unvoid_memberships(cohort, event.patient));
    }

    tracing::info!(
        "Patient {} unvoided by {}: {} membership(s) restored across {} cohort(s)",
        event.patient,
        event.by,
        report.memberships_changed,
        report.cohorts_changed
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::Membership;
    use crate::Error;
    use chrono::{Duration, TimeZone};

    fn admin() -> UserRef {
        UserRef::new("admin")
    }

    fn voided_event(patient: u32) -> PatientVoided {
        PatientVoided {
            patient: PatientRef(patient),
            by: admin(),
            reason: "Voided as a result of the associated patient getting voided".into(),
            at: Utc.with_ymd_and_hms(2017, 3, 2, 9, 30, 0).unwrap(),
        }
    }

    fn unvoided_event(patient: u32) -> PatientUnvoided {
        PatientUnvoided {
            patient: PatientRef(patient),
            by: admin(),
            at: Utc::now(),
            reason: "Associated patient is voided".into(),
        }
    }

    fn cohort_with(patients: &[u32]) -> Cohort {
        Cohort::with_patients("Example Cohort", "", patients.iter().copied().map(PatientRef))
    }

    #[test]
    fn test_void_copies_event_metadata() {
        crate::logging::init_test();
        let mut cohorts = vec![cohort_with(&[7, 2]), cohort_with(&[7])];
        let event = voided_event(7);

        let report = on_patient_voided(cohorts.iter_mut(), &event).unwrap();
        assert_eq!(report.cohorts_changed, 2);
        assert_eq!(report.memberships_changed, 2);

        for cohort in &cohorts {
            let membership = cohort.memberships_of(PatientRef(7)).next().unwrap();
            let info = membership.void_info().unwrap();
            assert_eq!(info.voided_by, event.by);
            assert_eq!(info.date_voided, event.at);
            assert_eq!(info.void_reason, event.reason);
            assert!(!cohort.contains(PatientRef(7)));
        }
        assert!(cohorts[0].contains(PatientRef(2)));
    }

    #[test]
    fn test_void_reaches_ended_memberships() {
        let mut cohort = Cohort::new("Example Cohort", "");
        let start = Utc.with_ymd_and_hms(2016, 11, 1, 0, 0, 0).unwrap();
        cohort.add_membership(
            Membership::with_interval(PatientRef(7), start, Some(start + Duration::days(1))).unwrap(),
        );

        let report = on_patient_voided([&mut cohort], &voided_event(7)).unwrap();
        assert_eq!(report.memberships_changed, 1);
        assert!(cohort.memberships()[0].is_voided());
    }

    #[test]
    fn test_void_is_idempotent() {
        let mut cohorts = vec![cohort_with(&[7])];
        on_patient_voided(cohorts.iter_mut(), &voided_event(7)).unwrap();

        let mut later = voided_event(7);
        later.reason = "a different reason".into();
        let report = on_patient_voided(cohorts.iter_mut(), &later).unwrap();

        assert!(report.is_empty());
        let info = cohorts[0].memberships()[0].void_info().unwrap();
        assert_eq!(info.void_reason, voided_event(7).reason);
    }

    #[test]
    fn test_void_with_blank_reason_changes_nothing() {
        let mut cohorts = vec![cohort_with(&[7]), cohort_with(&[7])];
        let mut event = voided_event(7);
        event.reason = String::new();

        let result = on_patient_voided(cohorts.iter_mut(), &event);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(cohorts
            .iter()
            .all(|c| c.memberships().iter().all(|m| !m.is_voided())));
    }

    #[test]
    fn test_unvoid_clears_metadata() {
        let mut cohort = Cohort::new("Example Cohort", "");
        let mut membership = Membership::new(PatientRef(7));
        membership
            .void(&admin(), "Associated patient is voided", Utc::now())
            .unwrap();
        cohort.add_membership(membership);

        let report = on_patient_unvoided([&mut cohort], &unvoided_event(7));
        assert_eq!(report.memberships_changed, 1);

        let membership = &cohort.memberships()[0];
        assert!(!membership.is_voided());
        assert!(membership.void_info().is_none());
        assert!(cohort.contains(PatientRef(7)));
    }

    #[test]
    fn test_unvoid_ignores_other_patients() {
        let mut cohort = cohort_with(&[2]);
        cohort.memberships_of_mut(PatientRef(2)).for_each(|m| {
            m.void(&admin(), "entered in error", Utc::now()).unwrap();
        });

        let report = on_patient_unvoided([&mut cohort], &unvoided_event(7));
        assert!(report.is_empty());
        assert!(cohort.memberships()[0].is_voided());
    }

    #[test]
    fn test_event_json_is_tagged() {
        let event = PatientEvent::Voided(voided_event(7));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"voided\""));

        let parsed: PatientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
        assert_eq!(parsed.patient(), PatientRef(7));
    }
}
