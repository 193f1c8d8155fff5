//! Core identity and audit types shared by the cohort model.
//!
//! This module defines:
//! - Opaque identifiers for patients, cohorts and users
//! - Void (soft-delete) metadata and the `Voidable` behaviour
//! - Membership keys used to address a specific membership

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// Opaque patient identifier. A membership refers to a patient, never owns one.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct PatientRef(pub u32);

impl fmt::Display for PatientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u32> for PatientRef {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Store-assigned cohort identifier
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct CohortId(pub u32);

impl fmt::Display for CohortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u32> for CohortId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// The user performing an audited action (e.g. who voided a record)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct UserRef(pub String);

impl UserRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

// ============================================================================
// Void metadata
// ============================================================================

/// Void metadata, always set and cleared as a unit.
///
/// Records hold an `Option<VoidInfo>`: `Some` means voided, so "voided
/// without a reason" cannot be represented in memory. Data read back from
/// disk is still checked by the validator (see `validator`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoidInfo {
    pub voided_by: UserRef,
    pub date_voided: DateTime<Utc>,
    pub void_reason: String,
}

impl VoidInfo {
    /// Build void metadata, rejecting a blank reason
    pub fn new(voided_by: UserRef, reason: &str, date_voided: DateTime<Utc>) -> Result<Self> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(Error::InvalidArgument(
                "void reason must not be empty".into(),
            ));
        }

        Ok(Self {
            voided_by,
            date_voided,
            void_reason: reason.to_string(),
        })
    }
}

/// Soft-delete behaviour shared by memberships, cohorts and patients
pub trait Voidable {
    fn void_info(&self) -> Option<&VoidInfo>;

    fn void_info_mut(&mut self) -> &mut Option<VoidInfo>;

    fn is_voided(&self) -> bool {
        self.void_info().is_some()
    }

    /// Void the record.
    ///
    /// Fails with `InvalidArgument` on a blank reason. Returns `Ok(false)`
    /// and keeps the existing metadata if the record is already voided.
    fn void(&mut self, by: &UserRef, reason: &str, at: DateTime<Utc>) -> Result<bool> {
        let info = VoidInfo::new(by.clone(), reason, at)?;
        if self.is_voided() {
            return Ok(false);
        }
        *self.void_info_mut() = Some(info);
        Ok(true)
    }

    /// Clear void metadata. Returns `false` if the record was not voided.
    fn unvoid(&mut self) -> bool {
        self.void_info_mut().take().is_some()
    }
}

// ============================================================================
// Membership addressing
// ============================================================================

/// Identity of a membership: the same patient may rejoin a cohort later,
/// so the start instant distinguishes repeat memberships.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MembershipKey {
    pub patient: PatientRef,
    pub start_date: DateTime<Utc>,
}
