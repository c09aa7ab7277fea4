//! Scriptable mock device fleet for testing and development.
//!
//! `MockFleet` simulates any number of capture devices without physical
//! hardware. Each device is scripted through a [`MockDeviceHandle`]: queue
//! identifications, force connect failures, or sever a live link to exercise
//! supervisor retry behavior.
//!
//! A fleet hands out any number of [`MockConnection`]s per device (a
//! supervisor's long-lived link and one-shot diagnostic probes share the
//! same scripted state), which mirrors how a physical device reacts the
//! same way to every peer.

use crate::devices::AnyDeviceConnection;
use crate::error::Result;
use crate::traits::{ConnectionFactory, DeviceConnection, RawCapture};
use rollcall_core::{DeviceDescriptor, DeviceId, SubjectUid};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

/// Shared scripted state of one mock device.
#[derive(Debug, Default)]
struct MockDeviceState {
    /// When set, `connect()` fails with a refused-connection error.
    refuse_connections: AtomicBool,

    /// When set, live links report themselves dropped at the next operation.
    link_down: AtomicBool,

    /// When set, `connect()` blocks until the flag is cleared.
    stall_connect: AtomicBool,

    /// When set, `disconnect()` blocks until the flag is cleared.
    stall_disconnect: AtomicBool,

    /// Total connect attempts across all connections to this device.
    connect_attempts: AtomicU64,

    /// Captures waiting to be delivered to `await_identification`.
    queue: Mutex<VecDeque<RawCapture>>,

    /// Wakes pending waits when the queue or link state changes.
    notify: Notify,
}

impl MockDeviceState {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<RawCapture>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parks the caller until `flag` clears.
    async fn wait_while(&self, flag: &AtomicBool) {
        loop {
            // Register the waiter before checking so a concurrent clear
            // cannot slip between check and sleep.
            let notified = self.notify.notified();
            if !flag.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// One transport endpoint of a mock device.
///
/// Created by [`MockFleet::connection`]; behaves per the
/// [`DeviceConnection`] contract, including unblocking a pending
/// `await_identification` when the link is severed.
#[derive(Debug)]
pub struct MockConnection {
    device: DeviceId,
    state: Arc<MockDeviceState>,
    connected: bool,
}

impl DeviceConnection for MockConnection {
    async fn connect(&mut self) -> Result<()> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.state.wait_while(&self.state.stall_connect).await;

        if self.state.refuse_connections.load(Ordering::SeqCst) {
            return Err(crate::DeviceError::connect_failed(
                self.device.as_str(),
                "connection refused",
            ));
        }

        // A fresh connect restores a previously severed link.
        self.state.link_down.store(false, Ordering::SeqCst);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state.wait_while(&self.state.stall_disconnect).await;
        self.connected = false;
        self.state.notify.notify_waiters();
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<()> {
        if !self.connected || self.state.link_down.load(Ordering::SeqCst) {
            self.connected = false;
            return Err(crate::DeviceError::disconnected(self.device.as_str()));
        }
        Ok(())
    }

    async fn await_identification(&mut self) -> Result<RawCapture> {
        loop {
            if !self.connected {
                return Err(crate::DeviceError::disconnected(self.device.as_str()));
            }

            // Register the waiter before checking state so a concurrent
            // queue push or link drop cannot slip between check and sleep.
            let notified = self.state.notify.notified();

            if self.state.link_down.load(Ordering::SeqCst) {
                self.connected = false;
                return Err(crate::DeviceError::disconnected(self.device.as_str()));
            }

            if let Some(capture) = self.state.lock_queue().pop_front() {
                return Ok(capture);
            }

            notified.await;
        }
    }
}

/// Handle for scripting one mock device's behavior.
///
/// Handles are cheap to clone and remain valid across any number of
/// connections to the device.
///
/// # Examples
///
/// ```
/// use rollcall_core::{DeviceId, SubjectUid};
/// use rollcall_device::mock::MockFleet;
///
/// let fleet = MockFleet::new();
/// let handle = fleet.handle(&DeviceId::new("gate-a").unwrap());
///
/// handle.queue_identification(SubjectUid::new(1042), 85).unwrap();
/// assert_eq!(handle.queued(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockDeviceHandle {
    device: DeviceId,
    state: Arc<MockDeviceState>,
}

impl MockDeviceHandle {
    /// Script whether connect attempts to this device fail.
    pub fn set_connect_failure(&self, fail: bool) {
        self.state.refuse_connections.store(fail, Ordering::SeqCst);
    }

    /// Sever the live link: pending and future waits on existing
    /// connections fail with a disconnect error until a fresh `connect()`.
    pub fn sever_link(&self) {
        self.state.link_down.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Sever the link without waking pending waits, as when a peer vanishes
    /// with no reset on the wire. Only a heartbeat or the next operation
    /// observes the drop.
    pub fn sever_link_silently(&self) {
        self.state.link_down.store(true, Ordering::SeqCst);
    }

    /// Script whether `connect()` calls hang. Clearing the flag releases
    /// every stalled call.
    pub fn set_connect_stall(&self, stall: bool) {
        self.state.stall_connect.store(stall, Ordering::SeqCst);
        if !stall {
            self.state.notify.notify_waiters();
        }
    }

    /// Script whether `disconnect()` calls hang. Clearing the flag releases
    /// every stalled call.
    pub fn set_disconnect_stall(&self, stall: bool) {
        self.state.stall_disconnect.store(stall, Ordering::SeqCst);
        if !stall {
            self.state.notify.notify_waiters();
        }
    }

    /// Queue an identification stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the quality score is greater than 100.
    pub fn queue_identification(&self, subject: SubjectUid, quality: u8) -> Result<()> {
        self.queue_capture(RawCapture::new(subject, quality)?);
        Ok(())
    }

    /// Queue an identification with an explicit capture timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error if the quality score is greater than 100.
    pub fn queue_identification_at(
        &self,
        subject: SubjectUid,
        quality: u8,
        captured_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        self.queue_capture(RawCapture::at(subject, quality, captured_at)?);
        Ok(())
    }

    /// Queue a pre-built capture.
    pub fn queue_capture(&self, capture: RawCapture) {
        self.state.lock_queue().push_back(capture);
        self.state.notify.notify_waiters();
    }

    /// Number of captures not yet delivered.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.lock_queue().len()
    }

    /// Total connect attempts observed across all connections.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Get the device id this handle scripts.
    #[must_use]
    pub fn device_id(&self) -> &DeviceId {
        &self.device
    }
}

/// A fleet of scriptable mock devices.
///
/// Implements [`ConnectionFactory`], so an orchestrator wired to a
/// `MockFleet` is indistinguishable from one wired to real transports.
/// Grab handles (before or after moving the fleet into the orchestrator)
/// to script each device.
#[derive(Debug, Default)]
pub struct MockFleet {
    devices: Mutex<HashMap<DeviceId, Arc<MockDeviceState>>>,
}

impl MockFleet {
    /// Create an empty fleet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get (creating if needed) the scripting handle for a device.
    pub fn handle(&self, id: &DeviceId) -> MockDeviceHandle {
        MockDeviceHandle {
            device: id.clone(),
            state: self.state_for(id),
        }
    }

    fn state_for(&self, id: &DeviceId) -> Arc<MockDeviceState> {
        let mut devices = self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(devices.entry(id.clone()).or_default())
    }
}

impl ConnectionFactory for MockFleet {
    fn connection(&self, descriptor: &DeviceDescriptor) -> AnyDeviceConnection {
        AnyDeviceConnection::Mock(MockConnection {
            device: descriptor.id.clone(),
            state: self.state_for(&descriptor.id),
            connected: false,
        })
    }
}
