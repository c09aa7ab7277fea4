//! Device transport trait definitions.
//!
//! This module defines the capability contract between the orchestration
//! layer and one physical biometric capture device. The contract is pure
//! transport: connect, disconnect, heartbeat, and a blocking wait for the
//! next identification. No retry logic lives here; supervisors own retries.
//!
//! All traits use native `async fn` methods (Rust 1.90 + Edition 2024
//! RPITIT), eliminating the need for the `async_trait` macro.

#![allow(async_fn_in_trait)]

use crate::error::Result;
use chrono::{DateTime, Utc};
use rollcall_core::{DeviceDescriptor, SubjectUid, constants::MAX_MATCH_QUALITY};
use serde::{Deserialize, Serialize};

/// Raw identification as delivered by the device wire protocol.
///
/// The capture carries no device identity; the supervisor that owns the
/// connection stamps its device id to form a full
/// [`rollcall_core::IdentificationEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCapture {
    /// Subject identified by the device.
    pub subject: SubjectUid,

    /// Capture timestamp.
    pub captured_at: DateTime<Utc>,

    /// Template match quality (0-100, higher is better).
    pub quality: u8,
}

impl RawCapture {
    /// Create a capture stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the quality score is greater than 100.
    pub fn new(subject: SubjectUid, quality: u8) -> Result<Self> {
        Self::at(subject, quality, Utc::now())
    }

    /// Create a capture with an explicit timestamp (useful for replaying
    /// historical events in tests).
    ///
    /// # Errors
    ///
    /// Returns an error if the quality score is greater than 100.
    pub fn at(subject: SubjectUid, quality: u8, captured_at: DateTime<Utc>) -> Result<Self> {
        if quality > MAX_MATCH_QUALITY {
            return Err(crate::DeviceError::invalid_data(format!(
                "Match quality must be 0-{MAX_MATCH_QUALITY}, got {quality}"
            )));
        }
        Ok(RawCapture {
            subject,
            captured_at,
            quality,
        })
    }
}

/// Transport capability for one physical capture device.
///
/// # Object Safety and Dynamic Dispatch
///
/// **NOTE**: This trait is NOT object-safe because `async fn` methods return
/// `impl Future`, an opaque type that cannot be used in trait objects
/// (Edition 2024 RPITIT). For dynamic dispatch use the enum wrapper
/// [`AnyDeviceConnection`](crate::devices::AnyDeviceConnection); for most
/// code, use generic type parameters:
///
/// ```no_run
/// use rollcall_device::traits::{DeviceConnection, RawCapture};
/// use rollcall_device::error::Result;
///
/// async fn next_capture<C: DeviceConnection>(conn: &mut C) -> Result<RawCapture> {
///     conn.heartbeat().await?;
///     conn.await_identification().await
/// }
/// ```
///
/// # Contract
///
/// - `await_identification` blocks the calling task until an event arrives
///   or the connection drops.
/// - `disconnect` unblocks a pending `await_identification` on the same
///   logical link with [`DeviceError::Disconnected`](crate::DeviceError),
///   which is how a supervisor with no cancellation primitive on the wire
///   interrupts the wait.
pub trait DeviceConnection: Send + Sync {
    /// Establish the connection to the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is unreachable or refuses the
    /// connection. Safe to call again after a failure.
    async fn connect(&mut self) -> Result<()>;

    /// Tear the connection down.
    ///
    /// Idempotent; disconnecting an unconnected transport is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error only on transport-level failures during teardown.
    async fn disconnect(&mut self) -> Result<()>;

    /// Probe the device for liveness.
    ///
    /// # Errors
    ///
    /// Returns an error if the device is disconnected or unresponsive.
    async fn heartbeat(&mut self) -> Result<()>;

    /// Wait for the next identification event.
    ///
    /// Blocks asynchronously until a subject is identified.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection drops while waiting, including a
    /// concurrent `disconnect` of the logical link.
    async fn await_identification(&mut self) -> Result<RawCapture>;
}

/// Opens transports for configured devices.
///
/// The orchestrator uses a factory both to hand each supervisor its own
/// connection and to open short-lived diagnostic connections for
/// `test_connection`.
pub trait ConnectionFactory: Send + Sync {
    /// Create a fresh, unconnected transport for the described device.
    fn connection(&self, descriptor: &DeviceDescriptor) -> crate::devices::AnyDeviceConnection;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_capture_quality_validation() {
        assert!(RawCapture::new(SubjectUid::new(1), 0).is_ok());
        assert!(RawCapture::new(SubjectUid::new(1), 100).is_ok());
        assert!(RawCapture::new(SubjectUid::new(1), 101).is_err());
    }

    #[test]
    fn test_raw_capture_explicit_timestamp() {
        let at = Utc::now() - chrono::Duration::seconds(30);
        let capture = RawCapture::at(SubjectUid::new(7), 80, at).unwrap();
        assert_eq!(capture.captured_at, at);
        assert_eq!(capture.quality, 80);
    }
}
