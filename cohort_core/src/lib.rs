#![forbid(unsafe_code)]

//! Temporal cohort membership model.
//!
//! This crate provides:
//! - Memberships as `[start, end)` intervals with void metadata
//! - The cohort aggregate and its as-of queries
//! - Patient void/unvoid cascade into memberships
//! - A validator registry checked before persistence
//! - A cohort service over a pluggable store, plus a JSON snapshot and
//!   patient event journal for the CLI

pub mod types;
pub mod error;
pub mod membership;
pub mod cohort;
pub mod patient;
pub mod cascade;
pub mod validator;
pub mod store;
pub mod snapshot;
pub mod journal;
pub mod service;
pub mod config;
pub mod logging;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use membership::Membership;
pub use cohort::Cohort;
pub use patient::{PatientDirectory, PatientLookup, PatientRecord, PatientRegistry};
pub use cascade::{CascadeReport, PatientEvent, PatientUnvoided, PatientVoided};
pub use validator::{default_registry, Entity, EntityKind, ValidatorRegistry, Violation};
pub use store::{CohortStore, MemoryStore};
pub use snapshot::Snapshot;
pub use journal::{read_events, EventSink, JsonlJournal};
pub use service::CohortService;
pub use config::Config;
