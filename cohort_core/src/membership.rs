//! A single patient's timed participation in a cohort.
//!
//! A membership covers the half-open interval `[start_date, end_date)`.
//! An absent end date means the membership is still running. Voiding is an
//! independent axis: a voided membership is never active, whatever its
//! interval says.

use crate::types::{MembershipKey, PatientRef, VoidInfo, Voidable};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// One patient's membership interval plus void metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Membership {
    patient: PatientRef,
    start_date: DateTime<Utc>,
    #[serde(default)]
    end_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    void_info: Option<VoidInfo>,
}

impl Membership {
    /// Create a membership starting now
    pub fn new(patient: PatientRef) -> Self {
        Self::starting_at(patient, Utc::now())
    }

    /// Create an open membership starting at `start_date`
    pub fn starting_at(patient: PatientRef, start_date: DateTime<Utc>) -> Self {
        Self {
            patient,
            start_date,
            end_date: None,
            void_info: None,
        }
    }

    /// Create a membership with an explicit interval
    ///
    /// Fails with `InvalidArgument` if `end_date` precedes `start_date`.
    pub fn with_interval(
        patient: PatientRef,
        start_date: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        if let Some(end) = end_date {
            check_interval(start_date, end)?;
        }
        Ok(Self {
            patient,
            start_date,
            end_date,
            void_info: None,
        })
    }

    pub fn patient(&self) -> PatientRef {
        self.patient
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    pub fn key(&self) -> MembershipKey {
        MembershipKey {
            patient: self.patient,
            start_date: self.start_date,
        }
    }

    /// True while no end date has been recorded
    pub fn is_open(&self) -> bool {
        self.end_date.is_none()
    }

    /// Whether the membership is in effect at `as_of`
    pub fn is_active(&self, as_of: DateTime<Utc>) -> bool {
        self.start_date <= as_of
            && self.end_date.map_or(true, |end| end > as_of)
            && !self.is_voided()
    }

    /// End the membership at `at`.
    ///
    /// Returns `Ok(false)` if it already has an end date. History is kept:
    /// ending a membership never removes it.
    pub fn end(&mut self, at: DateTime<Utc>) -> Result<bool> {
        if self.end_date.is_some() {
            return Ok(false);
        }
        check_interval(self.start_date, at)?;
        self.end_date = Some(at);
        Ok(true)
    }

    /// End a membership already known to be active at `at`
    pub(crate) fn close_active(&mut self, at: DateTime<Utc>) {
        debug_assert!(self.start_date <= at && self.end_date.map_or(true, |end| end > at));
        self.end_date = Some(at);
    }
}

fn check_interval(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if end < start {
        return Err(Error::InvalidArgument(format!(
            "membership end {} precedes its start {}",
            end, start
        )));
    }
    Ok(())
}

impl Voidable for Membership {
    fn void_info(&self) -> Option<&VoidInfo> {
        self.void_info.as_ref()
    }

    fn void_info_mut(&mut self) -> &mut Option<VoidInfo> {
        &mut self.void_info
    }
}

impl PartialEq for Membership {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Membership {}

impl Hash for Membership {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}
