//! Core domain types for the Rollcall multi-device attendance orchestrator.
//!
//! This crate defines the vocabulary shared by every other Rollcall crate:
//! device descriptors and their health snapshots, raw identification events,
//! audit-visible decisions, the fatal error taxonomy, and the configuration
//! loader for the per-process device fleet.
//!
//! Transient device-transport errors are deliberately not part of this
//! crate's error enum: they are retried inside supervisors and surface only
//! as `DeviceHealth::last_error` strings, while everything in
//! [`error::Error`] is fatal to the operation that raised it.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    Decision, DeviceAddress, DeviceDescriptor, DeviceHealth, DeviceId, DeviceState,
    IdentificationEvent, Outcome, SessionMode, SubjectUid,
};
