//! Session lifecycle and device fleet coordination.
//!
//! The [`Orchestrator`] is the public surface of the crate: it starts and
//! stops attendance sessions, answers status queries, and exposes the
//! decision feed. At most one session exists at a time; the session slot
//! lives behind an async mutex so start and stop serialize against each
//! other without blocking status reads, while diagnostic probes take only
//! a per-device claim.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future;
use rollcall_core::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_DEDUP_WINDOW_SECS, DEFAULT_GRACE_PERIOD_MS,
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_STOP_TIMEOUT_MS, EVENT_CHANNEL_CAPACITY,
    RECONNECT_BACKOFF_BASE_MS, RECONNECT_BACKOFF_CAP_MS, STATUS_POLL_INTERVAL_MS,
};
use rollcall_core::error::{Error, Result};
use rollcall_core::types::{
    Decision, DeviceDescriptor, DeviceHealth, DeviceId, IdentificationEvent, SessionMode,
};
use rollcall_device::{ConnectionFactory, DeviceConnection};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::decision::{ApproveAll, AttendancePolicy, DecisionCounts, DecisionEngine};
use crate::notifier::Notifier;
use crate::supervisor::{DeviceSupervisor, SupervisorConfig};

// ============================================================================
// Fallback reasons
// ============================================================================

/// Reported when the roster contains no enabled devices.
pub const NO_ENABLED_DEVICES: &str = "No enabled devices found";

/// Reported when no device came online within the grace period.
pub const NO_DEVICES_CONNECTED: &str = "No devices connected successfully";

// ============================================================================
// Configuration
// ============================================================================

/// Timing configuration for sessions started by an orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Suppression window for repeat identifications of the same subject.
    pub dedup_window: Duration,
    /// How long a session start waits for initial connections.
    pub grace_period: Duration,
    /// Deadline for each supervisor to acknowledge shutdown.
    pub stop_timeout: Duration,
    /// Upper bound on a single connect attempt.
    pub connect_timeout: Duration,
    /// First reconnect delay for a supervised device.
    pub backoff_base: Duration,
    /// Ceiling for the doubling reconnect delay.
    pub backoff_cap: Duration,
    /// Idle time after which supervisors probe a quiet link.
    pub heartbeat_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            grace_period: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            backoff_base: Duration::from_millis(RECONNECT_BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(RECONNECT_BACKOFF_CAP_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
        }
    }
}

impl OrchestratorConfig {
    fn supervisor(&self) -> SupervisorConfig {
        SupervisorConfig {
            connect_timeout: self.connect_timeout,
            backoff_base: self.backoff_base,
            backoff_cap: self.backoff_cap,
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

// ============================================================================
// Reports
// ============================================================================

/// Outcome of a session start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum StartReport {
    /// A multi-device session is running.
    Started {
        mode: SessionMode,
        devices_started: Vec<DeviceId>,
        total_devices: usize,
    },
    /// No session was started; the caller should fall back to its legacy
    /// single-device path.
    Fallback {
        fallback_reason: String,
        total_devices: usize,
    },
}

impl StartReport {
    pub fn is_fallback(&self) -> bool {
        matches!(self, StartReport::Fallback { .. })
    }
}

/// Outcome of a session stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StopReport {
    /// Supervisors that acknowledged shutdown within the stop timeout.
    pub devices_stopped: usize,
    /// Supervisors that missed the deadline and were aborted.
    pub devices_abandoned: usize,
}

/// Snapshot of the active session, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub mode: SessionMode,
    pub started_at: DateTime<Utc>,
    pub active_device_ids: Vec<DeviceId>,
}

// ============================================================================
// Orchestrator
// ============================================================================

struct Session {
    mode: SessionMode,
    started_at: DateTime<Utc>,
    supervisors: Vec<DeviceSupervisor>,
    engine: Arc<DecisionEngine>,
    pump: JoinHandle<()>,
}

#[derive(Default)]
struct ClaimState {
    supervised: HashSet<DeviceId>,
    probing: HashSet<DeviceId>,
}

/// Per-device exclusion between supervisors and diagnostic probes.
///
/// A device is claimed either by the active session's supervisors or by one
/// in-flight `test_connection` probe, never both. Keeping this outside the
/// session mutex lets status reads and lifecycle calls for unrelated
/// devices proceed while a probe is connecting.
#[derive(Default)]
struct DeviceClaims {
    state: std::sync::Mutex<ClaimState>,
    probe_done: tokio::sync::Notify,
}

impl DeviceClaims {
    fn lock(&self) -> std::sync::MutexGuard<'_, ClaimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims one device for a probe, refusing supervised or already
    /// probed devices.
    fn begin_probe(&self, id: &DeviceId) -> Result<()> {
        let mut state = self.lock();
        if state.supervised.contains(id) || !state.probing.insert(id.clone()) {
            return Err(Error::DeviceBusy(id.to_string()));
        }
        Ok(())
    }

    fn end_probe(&self, id: &DeviceId) {
        self.lock().probing.remove(id);
        self.probe_done.notify_waiters();
    }

    /// Claims the whole fleet for supervision, waiting out any in-flight
    /// probes of its devices first.
    async fn claim_supervised(&self, ids: &[DeviceId]) {
        loop {
            // Register before checking so a probe finishing concurrently
            // cannot slip between check and sleep.
            let released = self.probe_done.notified();
            {
                let mut state = self.lock();
                if ids.iter().all(|id| !state.probing.contains(id)) {
                    state.supervised.extend(ids.iter().cloned());
                    return;
                }
            }
            released.await;
        }
    }

    fn release_supervised(&self, ids: &[DeviceId]) {
        let mut state = self.lock();
        for id in ids {
            state.supervised.remove(id);
        }
    }
}

/// Coordinates a fleet of identification devices for attendance capture.
pub struct Orchestrator<F> {
    factory: F,
    devices: Vec<DeviceDescriptor>,
    health: HashMap<DeviceId, Arc<RwLock<DeviceHealth>>>,
    session: Mutex<Option<Session>>,
    claims: DeviceClaims,
    notifier: Notifier,
    policy: Arc<dyn Fn() -> Box<dyn AttendancePolicy> + Send + Sync>,
    config: OrchestratorConfig,
}

impl<F: ConnectionFactory> Orchestrator<F> {
    /// Creates an orchestrator over the given roster.
    ///
    /// # Errors
    /// Returns `Error::DuplicateDeviceId` if two descriptors share an id.
    pub fn new(devices: Vec<DeviceDescriptor>, factory: F) -> Result<Self> {
        let mut health = HashMap::with_capacity(devices.len());
        for descriptor in &devices {
            if health
                .insert(
                    descriptor.id.clone(),
                    Arc::new(RwLock::new(DeviceHealth::unknown())),
                )
                .is_some()
            {
                return Err(Error::DuplicateDeviceId(descriptor.id.to_string()));
            }
        }
        Ok(Self {
            factory,
            devices,
            health,
            session: Mutex::new(None),
            claims: DeviceClaims::default(),
            notifier: Notifier::new(),
            policy: Arc::new(|| Box::new(ApproveAll)),
            config: OrchestratorConfig::default(),
        })
    }

    /// Replaces the timing configuration.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the accept/reject policy applied to each new session.
    ///
    /// The constructor runs once per session so policies may carry
    /// per-session state.
    pub fn with_policy<P, C>(mut self, make: C) -> Self
    where
        P: AttendancePolicy + 'static,
        C: Fn() -> P + Send + Sync + 'static,
    {
        self.policy = Arc::new(move || Box::new(make()));
        self
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Starts an attendance session across all enabled devices.
    ///
    /// Supervisors are spawned for every enabled device, then the call
    /// waits out the grace period for initial connections. If no device
    /// comes online the fleet is torn down again and a
    /// [`StartReport::Fallback`] is returned so the caller can run its
    /// legacy single-device path without competing for hardware.
    ///
    /// # Errors
    /// Returns `Error::SessionActive` if a session is already running.
    pub async fn start_attendance(&self) -> Result<StartReport> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(Error::SessionActive);
        }

        let enabled: Vec<DeviceDescriptor> =
            self.devices.iter().filter(|d| d.enabled).cloned().collect();
        let total_devices = enabled.len();
        if enabled.is_empty() {
            info!("roster has no enabled devices, reporting fallback");
            return Ok(StartReport::Fallback {
                fallback_reason: NO_ENABLED_DEVICES.to_string(),
                total_devices: 0,
            });
        }

        let mut slots = Vec::with_capacity(total_devices);
        for descriptor in &enabled {
            slots.push(
                self.health
                    .get(&descriptor.id)
                    .cloned()
                    .ok_or_else(|| Error::DeviceNotFound(descriptor.id.to_string()))?,
            );
        }

        // Wait out in-flight diagnostic probes, then mark the fleet as
        // supervisor-owned so probes are refused for the session's lifetime.
        let enabled_ids: Vec<DeviceId> = enabled.iter().map(|d| d.id.clone()).collect();
        self.claims.claim_supervised(&enabled_ids).await;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let supervisor_config = self.config.supervisor();
        let mut supervisors = Vec::with_capacity(total_devices);
        for (descriptor, slot) in enabled.iter().zip(slots) {
            supervisors.push(DeviceSupervisor::spawn(
                descriptor.clone(),
                self.factory.connection(descriptor),
                slot,
                event_tx.clone(),
                supervisor_config,
            ));
        }
        // Supervisors hold the only senders now; the pump exits once the
        // last one is gone.
        drop(event_tx);

        let engine = Arc::new(DecisionEngine::new(
            self.config.dedup_window,
            (self.policy)(),
            self.locations(),
        ));
        let pump = tokio::spawn(decision_pump(
            Arc::clone(&engine),
            event_rx,
            self.notifier.clone(),
        ));

        let devices_started = self.await_grace_period(&enabled).await;
        if devices_started.is_empty() {
            warn!(
                grace_ms = self.config.grace_period.as_millis() as u64,
                "no devices connected within the grace period, tearing fleet down"
            );
            teardown(supervisors, pump, self.config.stop_timeout).await;
            self.claims.release_supervised(&enabled_ids);
            return Ok(StartReport::Fallback {
                fallback_reason: NO_DEVICES_CONNECTED.to_string(),
                total_devices,
            });
        }

        info!(
            devices_started = devices_started.len(),
            total_devices, "attendance session started"
        );
        *session = Some(Session {
            mode: SessionMode::Multi,
            started_at: Utc::now(),
            supervisors,
            engine,
            pump,
        });
        Ok(StartReport::Started {
            mode: SessionMode::Multi,
            devices_started,
            total_devices,
        })
    }

    /// Stops the active session, waiting for supervisors to wind down and
    /// the decision pump to drain.
    ///
    /// # Errors
    /// Returns `Error::NoActiveSession` if nothing is running.
    pub async fn stop_attendance(&self) -> Result<StopReport> {
        let mut slot = self.session.lock().await;
        let session = slot.take().ok_or(Error::NoActiveSession)?;
        let counts = session.engine.stats();
        let owned: Vec<DeviceId> = session
            .supervisors
            .iter()
            .map(|s| s.device_id().clone())
            .collect();
        let (stopped, abandoned) =
            teardown(session.supervisors, session.pump, self.config.stop_timeout).await;
        self.claims.release_supervised(&owned);
        if abandoned > 0 {
            warn!(abandoned, "supervisors aborted during stop");
        }
        info!(
            devices_stopped = stopped,
            approved = counts.approved,
            denied = counts.denied,
            duplicate = counts.duplicate,
            "attendance session stopped"
        );
        Ok(StopReport {
            devices_stopped: stopped,
            devices_abandoned: abandoned,
        })
    }

    pub async fn is_session_active(&self) -> bool {
        self.session.lock().await.is_some()
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        let slot = self.session.lock().await;
        slot.as_ref().map(|session| SessionInfo {
            mode: session.mode,
            started_at: session.started_at,
            active_device_ids: session
                .supervisors
                .iter()
                .map(|s| s.device_id().clone())
                .collect(),
        })
    }

    /// Decision counters for the active session.
    pub async fn decision_stats(&self) -> Option<DecisionCounts> {
        let slot = self.session.lock().await;
        slot.as_ref().map(|session| session.engine.stats())
    }

    // ------------------------------------------------------------------
    // Status and diagnostics
    // ------------------------------------------------------------------

    /// Health snapshot for one device. Works with or without a session;
    /// a device never supervised reports its last known state.
    pub async fn device_status(&self, id: &DeviceId) -> Result<DeviceHealth> {
        let slot = self
            .health
            .get(id)
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;
        Ok(slot.read().await.clone())
    }

    /// Roster with current health, in configuration order.
    pub async fn list_devices(&self) -> Vec<(DeviceDescriptor, DeviceHealth)> {
        let mut listing = Vec::with_capacity(self.devices.len());
        for descriptor in &self.devices {
            if let Some(slot) = self.health.get(&descriptor.id) {
                listing.push((descriptor.clone(), slot.read().await.clone()));
            }
        }
        listing
    }

    /// Opens a short-lived diagnostic connection to one device.
    ///
    /// The probe claims only its own device, so session lifecycle calls
    /// and probes of other devices run concurrently; a `start_attendance`
    /// that needs the probed device waits for the probe to finish.
    ///
    /// # Errors
    /// Returns `Error::DeviceBusy` if an active supervisor or another
    /// probe owns the device, `Error::DeviceNotFound` for an unknown id,
    /// and `Error::ConnectionTest` when the probe itself fails.
    pub async fn test_connection(&self, id: &DeviceId) -> Result<()> {
        let descriptor = self
            .devices
            .iter()
            .find(|d| &d.id == id)
            .cloned()
            .ok_or_else(|| Error::DeviceNotFound(id.to_string()))?;

        self.claims.begin_probe(id)?;
        let outcome = self.probe(&descriptor).await;
        self.claims.end_probe(id);
        outcome
    }

    async fn probe(&self, descriptor: &DeviceDescriptor) -> Result<()> {
        let mut connection = self.factory.connection(descriptor);
        let attempt =
            tokio::time::timeout(self.config.connect_timeout, connection.connect()).await;
        match attempt {
            Ok(Ok(())) => {
                if let Err(error) = connection.disconnect().await {
                    debug!(device = %descriptor.id, %error, "disconnect after probe failed");
                }
                debug!(device = %descriptor.id, "connection test passed");
                Ok(())
            }
            Ok(Err(error)) => Err(Error::ConnectionTest(error.to_string())),
            Err(_) => Err(Error::ConnectionTest(format!(
                "timed out after {}ms",
                self.config.connect_timeout.as_millis()
            ))),
        }
    }

    /// Subscribes to the live decision feed. Valid across sessions.
    pub fn subscribe(&self) -> broadcast::Receiver<Decision> {
        self.notifier.subscribe()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Polls health until every enabled device is online or the grace
    /// period expires. Returns the online device ids in roster order.
    async fn await_grace_period(&self, enabled: &[DeviceDescriptor]) -> Vec<DeviceId> {
        let deadline = tokio::time::Instant::now() + self.config.grace_period;
        let poll = Duration::from_millis(STATUS_POLL_INTERVAL_MS);
        loop {
            let mut online = Vec::new();
            for descriptor in enabled {
                if let Some(slot) = self.health.get(&descriptor.id)
                    && slot.read().await.is_online()
                {
                    online.push(descriptor.id.clone());
                }
            }
            if online.len() == enabled.len() || tokio::time::Instant::now() >= deadline {
                return online;
            }
            tokio::time::sleep(poll).await;
        }
    }

    fn locations(&self) -> HashMap<DeviceId, String> {
        self.devices
            .iter()
            .map(|d| (d.id.clone(), d.location.clone()))
            .collect()
    }
}

impl<F> std::fmt::Debug for Orchestrator<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("devices", &self.devices.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Single consumer of the aggregated identification stream. Evaluates in
/// arrival order and exits when every supervisor has dropped its sender.
async fn decision_pump(
    engine: Arc<DecisionEngine>,
    mut events: mpsc::Receiver<IdentificationEvent>,
    notifier: Notifier,
) {
    while let Some(event) = events.recv().await {
        let decision = engine.evaluate(&event);
        info!(
            subject = %decision.subject,
            outcome = %decision.outcome,
            device = %decision.device_id,
            location = %decision.location,
            "decision emitted"
        );
        notifier.publish(decision);
    }
    debug!("identification stream closed, decision pump exiting");
}

/// Stops every supervisor, then waits for the pump to drain the channel.
async fn teardown(
    supervisors: Vec<DeviceSupervisor>,
    pump: JoinHandle<()>,
    stop_timeout: Duration,
) -> (usize, usize) {
    let total = supervisors.len();
    let results =
        future::join_all(supervisors.into_iter().map(|s| s.stop(stop_timeout))).await;
    let stopped = results.into_iter().filter(|ok| *ok).count();

    let mut pump = pump;
    if tokio::time::timeout(stop_timeout, &mut pump).await.is_err() {
        warn!("decision pump did not drain in time, aborting");
        pump.abort();
    }
    (stopped, total - stopped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_documented_timings() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.dedup_window, Duration::from_secs(60));
        assert_eq!(config.grace_period, Duration::from_millis(3_000));
        assert_eq!(config.stop_timeout, Duration::from_millis(5_000));
    }

    #[test]
    fn fallback_report_is_recognizable() {
        let report = StartReport::Fallback {
            fallback_reason: NO_ENABLED_DEVICES.to_string(),
            total_devices: 0,
        };
        assert!(report.is_fallback());
        let started = StartReport::Started {
            mode: SessionMode::Multi,
            devices_started: Vec::new(),
            total_devices: 1,
        };
        assert!(!started.is_fallback());
    }
}
