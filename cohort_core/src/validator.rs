//! Structural validation run before a cohort is persisted.
//!
//! Validators are plain functions registered per entity kind in a
//! `ValidatorRegistry`. Whoever persists an entity asks the registry for
//! violations and decides what to do with them; validators never mutate and
//! never abort anything themselves.

use crate::cohort::Cohort;
use crate::membership::Membership;
use crate::patient::{PatientLookup, PatientRecord};
use crate::types::{VoidInfo, Voidable};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Message key: a voided patient holds a non-voided membership
pub const PATIENT_AND_MEMBER_SHOULD_BE_VOIDED: &str = "Cohort.patientAndMemberShouldBeVoided";
/// Message key: a membership ends before it starts
pub const END_BEFORE_START: &str = "Membership.endDateBeforeStartDate";
/// Message key: void metadata without a reason
pub const BLANK_VOID_REASON: &str = "error.voidReason.blank";
/// Message key: cohort without a name
pub const BLANK_NAME: &str = "Cohort.name.blank";

/// One structural problem, addressed by field path
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Kinds of entity a validator can be registered for
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    Cohort,
    Membership,
    Patient,
}

/// A borrowed entity handed to the registry
#[derive(Clone, Copy, Debug)]
pub enum Entity<'a> {
    Cohort(&'a Cohort),
    Membership(&'a Membership),
    Patient(&'a PatientRecord),
}

impl Entity<'_> {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Cohort(_) => EntityKind::Cohort,
            Entity::Membership(_) => EntityKind::Membership,
            Entity::Patient(_) => EntityKind::Patient,
        }
    }
}

pub type ValidatorFn = fn(Entity<'_>, &dyn PatientLookup) -> Result<Vec<Violation>>;

/// Explicit mapping from entity kind to the validators that check it
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    validators: BTreeMap<EntityKind, Vec<ValidatorFn>>,
}

/// Shared registry with the built-in validators, built once
static DEFAULT_REGISTRY: Lazy<ValidatorRegistry> = Lazy::new(ValidatorRegistry::with_defaults);

/// Get the registry holding the built-in validators
pub fn default_registry() -> &'static ValidatorRegistry {
    &DEFAULT_REGISTRY
}

impl ValidatorRegistry {
    /// Registry with no validators
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in cohort and membership validators
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(EntityKind::Cohort, validate_cohort);
        registry.register(EntityKind::Membership, validate_membership);
        registry
    }

    /// Add a validator; validators for one kind run in registration order
    pub fn register(&mut self, kind: EntityKind, validator: ValidatorFn) {
        self.validators.entry(kind).or_default().push(validator);
    }

    pub fn supports(&self, kind: EntityKind) -> bool {
        self.validators.get(&kind).map_or(false, |v| !v.is_empty())
    }

    /// Run every validator registered for the entity's kind.
    ///
    /// Kinds without validators yield no violations.
    pub fn validate(&self, entity: Entity<'_>, patients: &dyn PatientLookup) -> Result<Vec<Violation>> {
        let mut violations = Vec::new();
        if let Some(validators) = self.validators.get(&entity.kind()) {
            for validator in validators {
                violations.extend(validator(entity, patients)?);
            }
        }
        if !violations.is_empty() {
            tracing::debug!(
                "{:?} validation produced {} violation(s)",
                entity.kind(),
                violations.len()
            );
        }
        Ok(violations)
    }
}

/// Cohort rules: every membership of a voided patient must itself be voided,
/// plus the structural checks on each membership and the cohort's own fields.
///
/// Fails with `InvalidArgument` if handed anything other than a cohort.
pub fn validate_cohort(entity: Entity<'_>, patients: &dyn PatientLookup) -> Result<Vec<Violation>> {
    let cohort = match entity {
        Entity::Cohort(cohort) => cohort,
        other => {
            return Err(Error::InvalidArgument(format!(
                "cohort validator expects a cohort, got {:?}",
                other.kind()
            )))
        }
    };

    let mut violations = Vec::new();

    if cohort.name.trim().is_empty() {
        violations.push(Violation::new("name", BLANK_NAME, "Cohort name must not be blank"));
    }
    if let Some(info) = cohort.void_info() {
        check_void_reason(info, "voidReason", &mut violations);
    }

    for (i, member) in cohort.memberships().iter().enumerate() {
        if patients.is_voided(member.patient()) && !member.is_voided() {
            violations.push(Violation::new(
                "members",
                PATIENT_AND_MEMBER_SHOULD_BE_VOIDED,
                format!(
                    "Patient {} is voided, cannot add voided members to a cohort",
                    member.patient()
                ),
            ));
        }
        check_membership(member, &format!("members[{}].", i), &mut violations);
    }

    Ok(violations)
}

/// Membership rules: the interval is ordered and void metadata has a reason
pub fn validate_membership(
    entity: Entity<'_>,
    _patients: &dyn PatientLookup,
) -> Result<Vec<Violation>> {
    match entity {
        Entity::Membership(member) => {
            let mut violations = Vec::new();
            check_membership(member, "", &mut violations);
            Ok(violations)
        }
        other => Err(Error::InvalidArgument(format!(
            "membership validator expects a membership, got {:?}",
            other.kind()
        ))),
    }
}

fn check_membership(member: &Membership, prefix: &str, violations: &mut Vec<Violation>) {
    if let Some(end) = member.end_date() {
        if end < member.start_date() {
            violations.push(Violation::new(
                format!("{}endDate", prefix),
                END_BEFORE_START,
                format!(
                    "Membership of patient {} ends {} before it starts {}",
                    member.patient(),
                    end,
                    member.start_date()
                ),
            ));
        }
    }
    if let Some(info) = member.void_info() {
        check_void_reason(info, &format!("{}voidReason", prefix), violations);
    }
}

fn check_void_reason(info: &VoidInfo, field: &str, violations: &mut Vec<Violation>) {
    if info.void_reason.trim().is_empty() {
        violations.push(Violation::new(
            field,
            BLANK_VOID_REASON,
            "Voided records must carry a void reason",
        ));
    }
}
