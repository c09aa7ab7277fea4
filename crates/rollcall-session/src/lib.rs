//! Attendance session orchestration.
//!
//! This crate ties a fleet of identification devices into a single
//! attendance session: one supervision task per device feeds an aggregated
//! event channel, a lone decision pump evaluates events in arrival order,
//! and decisions fan out to subscribers over a broadcast channel.
//!
//! The entry point is [`Orchestrator`]; everything else supports it.

pub mod decision;
pub mod notifier;
pub mod orchestrator;
pub mod supervisor;

pub use decision::{ApproveAll, Assessment, AttendancePolicy, DecisionCounts, MinimumQuality};
pub use notifier::{Notifier, status_line};
pub use orchestrator::{
    NO_DEVICES_CONNECTED, NO_ENABLED_DEVICES, Orchestrator, OrchestratorConfig, SessionInfo,
    StartReport, StopReport,
};
pub use supervisor::{DeviceSupervisor, SupervisorConfig};
