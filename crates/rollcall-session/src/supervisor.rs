//! Per-device supervision task.
//!
//! A [`DeviceSupervisor`] owns exactly one device connection for the lifetime
//! of a session. It drives the connect / listen / reconnect cycle on its own
//! tokio task and forwards every identification to the shared event channel.
//! The supervisor never decides anything; outcome evaluation happens
//! downstream in the decision pump.

use std::sync::Arc;
use std::time::Duration;

use rollcall_core::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, RECONNECT_BACKOFF_BASE_MS,
    RECONNECT_BACKOFF_CAP_MS,
};
use rollcall_core::types::{DeviceDescriptor, DeviceHealth, DeviceId, IdentificationEvent};
use rollcall_device::{AnyDeviceConnection, DeviceConnection};
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Timing knobs for one supervision task.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// First reconnect delay after a failed attempt or a dropped link.
    pub backoff_base: Duration,
    /// Ceiling for the doubling reconnect delay.
    pub backoff_cap: Duration,
    /// Idle time after which a quiet link is probed with a heartbeat.
    pub heartbeat_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            backoff_base: Duration::from_millis(RECONNECT_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(RECONNECT_BACKOFF_CAP_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
        }
    }
}

// ============================================================================
// Supervisor handle
// ============================================================================

/// Handle to a spawned supervision task.
///
/// Dropping the handle does not stop the task; call [`DeviceSupervisor::stop`]
/// to shut it down cooperatively.
pub struct DeviceSupervisor {
    descriptor: DeviceDescriptor,
    health: Arc<RwLock<DeviceHealth>>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl DeviceSupervisor {
    /// Spawns the supervision loop for `descriptor` on a fresh task.
    ///
    /// `health` is shared with the orchestrator so status queries keep
    /// working while the task runs, and keep reporting the final state
    /// after it exits.
    pub fn spawn(
        descriptor: DeviceDescriptor,
        connection: AnyDeviceConnection,
        health: Arc<RwLock<DeviceHealth>>,
        events: mpsc::Sender<IdentificationEvent>,
        config: SupervisorConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run(
            connection,
            descriptor.clone(),
            Arc::clone(&health),
            events,
            shutdown.clone(),
            config,
        ));
        Self {
            descriptor,
            health,
            shutdown,
            task,
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.descriptor.id
    }

    /// Snapshot of the supervised device's health.
    pub async fn health(&self) -> DeviceHealth {
        self.health.read().await.clone()
    }

    /// Requests shutdown and waits up to `timeout` for the task to exit.
    ///
    /// Returns `true` if the task acknowledged within the timeout. A task
    /// that misses the deadline is aborted and reported as abandoned.
    pub async fn stop(mut self, timeout: Duration) -> bool {
        self.shutdown.cancel();
        match tokio::time::timeout(timeout, &mut self.task).await {
            Ok(_) => {
                debug!(device = %self.descriptor.id, "supervisor stopped");
                true
            }
            Err(_) => {
                warn!(
                    device = %self.descriptor.id,
                    timeout_ms = timeout.as_millis() as u64,
                    "supervisor missed the stop deadline, aborting task"
                );
                self.task.abort();
                // The aborted task never reaches its own offline transition,
                // so record the terminal state here.
                self.health.write().await.mark_offline();
                false
            }
        }
    }
}

// ============================================================================
// Supervision loop
// ============================================================================

enum ListenExit {
    Shutdown,
    LinkLost,
    ChannelClosed,
}

async fn run(
    mut device: AnyDeviceConnection,
    descriptor: DeviceDescriptor,
    health: Arc<RwLock<DeviceHealth>>,
    events: mpsc::Sender<IdentificationEvent>,
    shutdown: CancellationToken,
    config: SupervisorConfig,
) {
    let mut backoff = config.backoff_base;

    'reconnect: loop {
        health.write().await.mark_connecting();

        let connected = tokio::select! {
            _ = shutdown.cancelled() => break 'reconnect,
            attempt = tokio::time::timeout(config.connect_timeout, device.connect()) => {
                match attempt {
                    Ok(Ok(())) => true,
                    Ok(Err(error)) => {
                        warn!(device = %descriptor.id, %error, "connect attempt failed");
                        health.write().await.mark_error(error.to_string());
                        false
                    }
                    Err(_) => {
                        let message = format!(
                            "connect timed out after {}ms",
                            config.connect_timeout.as_millis()
                        );
                        warn!(device = %descriptor.id, message);
                        health.write().await.mark_error(message);
                        false
                    }
                }
            }
        };

        if connected {
            info!(
                device = %descriptor.id,
                address = %descriptor.address,
                "device online"
            );
            health.write().await.mark_online();
            backoff = config.backoff_base;

            match listen(&mut device, &descriptor, &health, &events, &shutdown, config).await {
                ListenExit::Shutdown | ListenExit::ChannelClosed => break 'reconnect,
                ListenExit::LinkLost => {}
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break 'reconnect,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(config.backoff_cap);
    }

    if let Err(error) = device.disconnect().await {
        debug!(device = %descriptor.id, %error, "disconnect during shutdown failed");
    }
    health.write().await.mark_offline();
    debug!(device = %descriptor.id, "supervision loop exited");
}

/// Forwards identifications until the link drops, shutdown is requested,
/// or the aggregation channel closes.
///
/// A link idle for longer than the heartbeat interval is probed, so a
/// device that hangs without delivering anything is detected instead of
/// staying Online indefinitely.
async fn listen(
    device: &mut AnyDeviceConnection,
    descriptor: &DeviceDescriptor,
    health: &Arc<RwLock<DeviceHealth>>,
    events: &mpsc::Sender<IdentificationEvent>,
    shutdown: &CancellationToken,
    config: SupervisorConfig,
) -> ListenExit {
    loop {
        let wait = tokio::select! {
            _ = shutdown.cancelled() => return ListenExit::Shutdown,
            result = tokio::time::timeout(
                config.heartbeat_interval,
                device.await_identification(),
            ) => result,
        };

        let capture = match wait {
            Err(_) => {
                if let Err(error) = device.heartbeat().await {
                    warn!(device = %descriptor.id, %error, "heartbeat failed");
                    health.write().await.mark_error(error.to_string());
                    return ListenExit::LinkLost;
                }
                health.write().await.beat();
                continue;
            }
            Ok(Ok(capture)) => capture,
            Ok(Err(error)) => {
                warn!(device = %descriptor.id, %error, "device link lost");
                health.write().await.mark_error(error.to_string());
                return ListenExit::LinkLost;
            }
        };

        let event = match IdentificationEvent::new(
            descriptor.id.clone(),
            capture.subject,
            capture.captured_at,
            capture.quality,
        ) {
            Ok(event) => event,
            Err(error) => {
                warn!(device = %descriptor.id, %error, "discarding malformed capture");
                continue;
            }
        };

        health.write().await.beat();
        debug!(
            device = %descriptor.id,
            subject = %event.subject,
            quality = event.match_quality,
            "identification captured"
        );

        if events.send(event).await.is_err() {
            return ListenExit::ChannelClosed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rollcall_core::types::{DeviceAddress, DeviceState, SubjectUid};
    use rollcall_device::mock::MockFleet;
    use rollcall_device::ConnectionFactory;

    fn descriptor(id: &str) -> DeviceDescriptor {
        DeviceDescriptor {
            id: DeviceId::new(id).unwrap(),
            address: DeviceAddress::new("127.0.0.1", 4370).unwrap(),
            display_name: format!("Device {id}"),
            location: "Test Lab".to_string(),
            enabled: true,
        }
    }

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            connect_timeout: Duration::from_millis(200),
            backoff_base: Duration::from_millis(10),
            backoff_cap: Duration::from_millis(40),
            heartbeat_interval: Duration::from_millis(30),
        }
    }

    #[tokio::test]
    async fn supervisor_forwards_identifications() {
        let fleet = MockFleet::new();
        let descriptor = descriptor("gate-a");
        let handle = fleet.handle(&descriptor.id);
        let (tx, mut rx) = mpsc::channel(8);
        let health = Arc::new(RwLock::new(DeviceHealth::unknown()));

        let supervisor = DeviceSupervisor::spawn(
            descriptor.clone(),
            fleet.connection(&descriptor),
            Arc::clone(&health),
            tx,
            fast_config(),
        );

        handle.queue_identification(SubjectUid::new(1042), 88).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.device_id, descriptor.id);
        assert_eq!(event.subject, SubjectUid::new(1042));
        assert_eq!(event.match_quality, 88);

        assert!(supervisor.stop(Duration::from_millis(500)).await);
        assert_eq!(health.read().await.state, DeviceState::Offline);
    }

    #[tokio::test]
    async fn supervisor_reconnects_after_link_loss() {
        let fleet = MockFleet::new();
        let descriptor = descriptor("gate-b");
        let handle = fleet.handle(&descriptor.id);
        let (tx, mut rx) = mpsc::channel(8);
        let health = Arc::new(RwLock::new(DeviceHealth::unknown()));

        let supervisor = DeviceSupervisor::spawn(
            descriptor.clone(),
            fleet.connection(&descriptor),
            Arc::clone(&health),
            tx,
            fast_config(),
        );

        handle.queue_identification(SubjectUid::new(7), 90).unwrap();
        rx.recv().await.unwrap();

        handle.sever_link();
        // The loop reconnects after backoff and keeps delivering.
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.queue_identification(SubjectUid::new(8), 91).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.subject, SubjectUid::new(8));
        assert!(handle.connect_attempts() >= 2);

        assert!(supervisor.stop(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn supervisor_retries_while_device_refuses() {
        let fleet = MockFleet::new();
        let descriptor = descriptor("gate-c");
        let handle = fleet.handle(&descriptor.id);
        handle.set_connect_failure(true);
        let (tx, _rx) = mpsc::channel(8);
        let health = Arc::new(RwLock::new(DeviceHealth::unknown()));

        let supervisor = DeviceSupervisor::spawn(
            descriptor.clone(),
            fleet.connection(&descriptor),
            Arc::clone(&health),
            tx,
            fast_config(),
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(handle.connect_attempts() >= 2);
        assert_eq!(health.read().await.state, DeviceState::Error);

        // Once the device accepts again the supervisor comes online.
        handle.set_connect_failure(false);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(health.read().await.is_online());

        assert!(supervisor.stop(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn heartbeat_notices_a_silently_dead_link() {
        let fleet = MockFleet::new();
        let descriptor = descriptor("gate-e");
        let handle = fleet.handle(&descriptor.id);
        let (tx, _rx) = mpsc::channel(8);
        let health = Arc::new(RwLock::new(DeviceHealth::unknown()));

        let supervisor = DeviceSupervisor::spawn(
            descriptor.clone(),
            fleet.connection(&descriptor),
            Arc::clone(&health),
            tx,
            fast_config(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(health.read().await.is_online());

        // Nothing is queued and no wake-up fires; only the idle heartbeat
        // can observe the drop.
        handle.sever_link_silently();
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(handle.connect_attempts() >= 2);
        assert!(health.read().await.is_online());

        assert!(supervisor.stop(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn idle_heartbeats_refresh_the_health_snapshot() {
        let fleet = MockFleet::new();
        let descriptor = descriptor("gate-f");
        let (tx, _rx) = mpsc::channel(8);
        let health = Arc::new(RwLock::new(DeviceHealth::unknown()));

        let supervisor = DeviceSupervisor::spawn(
            descriptor.clone(),
            fleet.connection(&descriptor),
            Arc::clone(&health),
            tx,
            fast_config(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        let first = health.read().await.last_heartbeat;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let later = health.read().await.last_heartbeat;
        assert!(later > first);

        assert!(supervisor.stop(Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn missed_stop_deadline_still_marks_the_device_offline() {
        let fleet = MockFleet::new();
        let descriptor = descriptor("gate-g");
        let handle = fleet.handle(&descriptor.id);
        handle.set_disconnect_stall(true);
        let (tx, _rx) = mpsc::channel(8);
        let health = Arc::new(RwLock::new(DeviceHealth::unknown()));

        let supervisor = DeviceSupervisor::spawn(
            descriptor.clone(),
            fleet.connection(&descriptor),
            Arc::clone(&health),
            tx,
            fast_config(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(health.read().await.is_online());

        // The shutdown path blocks in disconnect, so the deadline is missed
        // and the task is aborted.
        assert!(!supervisor.stop(Duration::from_millis(50)).await);
        assert_eq!(health.read().await.state, DeviceState::Offline);
    }

    #[tokio::test]
    async fn stop_interrupts_a_blocked_listen() {
        let fleet = MockFleet::new();
        let descriptor = descriptor("gate-d");
        let (tx, _rx) = mpsc::channel(8);
        let health = Arc::new(RwLock::new(DeviceHealth::unknown()));

        let supervisor = DeviceSupervisor::spawn(
            descriptor.clone(),
            fleet.connection(&descriptor),
            Arc::clone(&health),
            tx,
            fast_config(),
        );

        // Let it connect and block on an empty queue, then stop.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(supervisor.stop(Duration::from_millis(500)).await);
        assert_eq!(health.read().await.state, DeviceState::Offline);
    }
}
