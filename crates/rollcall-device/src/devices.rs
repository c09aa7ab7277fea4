//! Enum wrapper for device connection dispatch.
//!
//! Native `async fn` in traits (RPITIT, Edition 2024) are not object-safe,
//! so supervisors cannot hold a `Box<dyn DeviceConnection>`. This module
//! provides an enum wrapper with concrete type dispatch instead, keeping the
//! zero-cost abstraction while letting the orchestration layer treat every
//! transport uniformly.

use crate::mock::MockConnection;
use crate::traits::{DeviceConnection, RawCapture};
use crate::Result;

/// Enum wrapper for device connection dispatch.
///
/// # Examples
///
/// ```no_run
/// use rollcall_device::devices::AnyDeviceConnection;
/// use rollcall_device::mock::MockFleet;
/// use rollcall_device::traits::{ConnectionFactory, DeviceConnection};
/// # async fn example(descriptor: &rollcall_core::DeviceDescriptor) -> rollcall_device::Result<()> {
/// let fleet = MockFleet::new();
/// let mut conn: AnyDeviceConnection = fleet.connection(descriptor);
/// conn.connect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyDeviceConnection {
    /// Scriptable mock transport for development and testing.
    Mock(MockConnection),
    // Real device transports (e.g. the ZK TCP wire protocol) are future
    // variants behind feature flags.
}

impl DeviceConnection for AnyDeviceConnection {
    async fn connect(&mut self) -> Result<()> {
        match self {
            Self::Mock(conn) => conn.connect().await,
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        match self {
            Self::Mock(conn) => conn.disconnect().await,
        }
    }

    async fn heartbeat(&mut self) -> Result<()> {
        match self {
            Self::Mock(conn) => conn.heartbeat().await,
        }
    }

    async fn await_identification(&mut self) -> Result<RawCapture> {
        match self {
            Self::Mock(conn) => conn.await_identification().await,
        }
    }
}
