use crate::{
    Result,
    constants::{DEFAULT_DEVICE_PORT, MAX_MATCH_QUALITY},
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable device identifier (non-empty ASCII, unique per configuration)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new device id with validation.
    ///
    /// The id is trimmed before validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the id is empty or contains
    /// non-ASCII characters.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();

        if id.is_empty() {
            return Err(Error::InvalidDeviceId("empty id".to_string()));
        }
        if !id.is_ascii() {
            return Err(Error::InvalidDeviceId(format!(
                "id must be ASCII, got '{id}'"
            )));
        }

        Ok(DeviceId(id.to_string()))
    }

    /// Get the device id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        DeviceId::new(s)
    }
}

/// Subject identifier reported by a capture device
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SubjectUid(u64);

impl SubjectUid {
    /// Create a subject uid.
    #[must_use]
    pub fn new(uid: u64) -> Self {
        SubjectUid(uid)
    }

    /// Get the raw uid as u64.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubjectUid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SubjectUid {
    fn from(uid: u64) -> Self {
        SubjectUid(uid)
    }
}

/// Network address of a device (`host:port`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
}

impl DeviceAddress {
    /// Create an address with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidAddress` if the host is empty.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let host = host.trim();
        if host.is_empty() {
            return Err(Error::InvalidAddress {
                address: format!("{host}:{port}"),
                message: "empty host".to_string(),
            });
        }
        Ok(DeviceAddress {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for DeviceAddress {
    type Err = Error;

    /// Parse `host:port`; a bare `host` uses the default device port.
    fn from_str(s: &str) -> Result<Self> {
        match s.rsplit_once(':') {
            Some((host, port)) => {
                let port: u16 = port.parse().map_err(|_| Error::InvalidAddress {
                    address: s.to_string(),
                    message: format!("invalid port '{port}'"),
                })?;
                DeviceAddress::new(host, port)
            }
            None => DeviceAddress::new(s, DEFAULT_DEVICE_PORT),
        }
    }
}

/// Immutable descriptor of one configured capture device.
///
/// Loaded once per process lifetime from the device configuration file;
/// `device_id` uniqueness across the loaded set is a hard invariant enforced
/// by [`crate::config::parse_descriptors`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Unique device identifier.
    pub id: DeviceId,

    /// Network address the transport connects to.
    pub address: DeviceAddress,

    /// Human-readable device name.
    pub display_name: String,

    /// Physical location (e.g. "Main Gate").
    pub location: String,

    /// Disabled devices are ignored by the orchestrator.
    pub enabled: bool,
}

/// Connection state of one device, owned by its supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    /// Never supervised in this process.
    Unknown,
    /// Connect attempt in flight.
    Connecting,
    /// Connected and listening for identifications.
    Online,
    /// Disconnected, supervisor terminated.
    Offline,
    /// Last operation failed; the supervisor is backing off before retrying.
    Error,
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DeviceState::Unknown => write!(f, "unknown"),
            DeviceState::Connecting => write!(f, "connecting"),
            DeviceState::Online => write!(f, "online"),
            DeviceState::Offline => write!(f, "offline"),
            DeviceState::Error => write!(f, "error"),
        }
    }
}

/// Health snapshot of one device.
///
/// Written exclusively by the owning supervisor, read by the orchestrator's
/// status surface. Survives the session so `list_devices` reports last-known
/// state after a stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHealth {
    /// Current connection state.
    pub state: DeviceState,

    /// Time of the last successful connect, heartbeat, or capture.
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Message of the most recent failure, cleared on reconnect.
    pub last_error: Option<String>,
}

impl DeviceHealth {
    /// Fresh snapshot for a device that has never been supervised.
    #[must_use]
    pub fn unknown() -> Self {
        DeviceHealth {
            state: DeviceState::Unknown,
            last_heartbeat: None,
            last_error: None,
        }
    }

    /// Transition to connecting.
    pub fn mark_connecting(&mut self) {
        self.state = DeviceState::Connecting;
    }

    /// Transition to online, refreshing the heartbeat and clearing errors.
    pub fn mark_online(&mut self) {
        self.state = DeviceState::Online;
        self.last_heartbeat = Some(Utc::now());
        self.last_error = None;
    }

    /// Transition to error with a failure message.
    pub fn mark_error(&mut self, message: impl Into<String>) {
        self.state = DeviceState::Error;
        self.last_error = Some(message.into());
    }

    /// Terminal transition once the supervisor has shut the device down.
    pub fn mark_offline(&mut self) {
        self.state = DeviceState::Offline;
    }

    /// Refresh the heartbeat without changing state.
    pub fn beat(&mut self) {
        self.last_heartbeat = Some(Utc::now());
    }

    /// Returns `true` if the device is currently online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state == DeviceState::Online
    }
}

impl Default for DeviceHealth {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Raw identification signal produced by exactly one supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationEvent {
    /// Device that captured the identification.
    pub device_id: DeviceId,

    /// Identified subject.
    pub subject: SubjectUid,

    /// Capture time as stamped at the device boundary.
    pub captured_at: DateTime<Utc>,

    /// Template match quality (0-100, higher is better).
    pub match_quality: u8,
}

impl IdentificationEvent {
    /// Create an event with quality validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidMatchQuality` if the quality exceeds 100.
    pub fn new(
        device_id: DeviceId,
        subject: SubjectUid,
        captured_at: DateTime<Utc>,
        match_quality: u8,
    ) -> Result<Self> {
        if match_quality > MAX_MATCH_QUALITY {
            return Err(Error::InvalidMatchQuality(match_quality));
        }
        Ok(IdentificationEvent {
            device_id,
            subject,
            captured_at,
            match_quality,
        })
    }
}

/// Final outcome of one identification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    /// Attendance accepted and recorded downstream.
    Approved,
    /// Attendance rejected by the business rule.
    Denied,
    /// Repeat identification inside the dedup window; reported for audit,
    /// never recorded downstream.
    Duplicate,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Approved => write!(f, "APPROVED"),
            Outcome::Denied => write!(f, "DENIED"),
            Outcome::Duplicate => write!(f, "DUPLICATE"),
        }
    }
}

/// Audit-visible decision for one identification attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision id for audit correlation.
    pub id: Uuid,

    /// Subject the decision applies to.
    pub subject: SubjectUid,

    /// Outcome of the arbitration.
    pub outcome: Outcome,

    /// Device that originated the identification.
    pub device_id: DeviceId,

    /// Location of the originating device.
    pub location: String,

    /// Time the decision was made.
    pub decided_at: DateTime<Utc>,
}

/// Mode of an attendance session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Legacy single-device path (run by the caller after a fallback).
    Single,
    /// Coordinated multi-device path.
    Multi,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SessionMode::Single => write!(f, "single"),
            SessionMode::Multi => write!(f, "multi"),
        }
    }
}
