//! Device transport abstraction for the Rollcall attendance orchestrator.
//!
//! This crate defines the capability boundary between the orchestration
//! layer and physical biometric capture devices. The contract is four
//! operations on a [`DeviceConnection`]: `connect`, `disconnect`,
//! `heartbeat`, and a blocking `await_identification`. Everything above the
//! boundary (retries, backoff, health tracking, event aggregation) belongs
//! to the supervisor layer; everything below it (the IP wire protocol of a
//! concrete vendor) is a transport implementation detail.
//!
//! # Design Philosophy
//!
//! - **Async-first**: all I/O is asynchronous using native `async fn` in
//!   traits (Rust 1.90 + Edition 2024 RPITIT).
//! - **Enum dispatch**: RPITIT traits are not object-safe, so polymorphism
//!   goes through [`AnyDeviceConnection`] rather than `Box<dyn ...>`.
//! - **Transient errors only**: [`DeviceError`] never escapes the
//!   supervisor layer; fatal conditions live in `rollcall_core`.
//!
//! # Mock Fleet
//!
//! [`mock::MockFleet`] provides fully scriptable devices for development
//! and testing: connection refusal, queued identifications with custom
//! timestamps, and mid-session link drops.

pub mod devices;
pub mod error;
pub mod mock;
pub mod traits;

pub use devices::AnyDeviceConnection;
pub use error::{DeviceError, Result};
pub use traits::{ConnectionFactory, DeviceConnection, RawCapture};
