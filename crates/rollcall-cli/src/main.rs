//! Attendance session driver over the mock device fleet.
//!
//! Loads a device roster, starts a multi-device session, and prints the
//! live decision feed until interrupted. With no roster argument a built-in
//! two-gate demo roster is used and a short capture script runs against it,
//! which makes the binary useful as a smoke test without hardware.

use std::time::Duration;

use anyhow::Context;
use rollcall_core::config;
use rollcall_core::types::{DeviceAddress, DeviceDescriptor, DeviceId, SubjectUid};
use rollcall_device::mock::{MockDeviceHandle, MockFleet};
use rollcall_session::{Orchestrator, StartReport, status_line};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rollcall=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let roster_path = std::env::args().nth(1);
    let (devices, scripted) = match &roster_path {
        Some(path) => {
            let devices = config::load_descriptors(path)
                .with_context(|| format!("failed to load device roster from {path}"))?;
            (devices, false)
        }
        None => {
            info!("no roster given, using the built-in demo roster");
            (demo_roster()?, true)
        }
    };

    let fleet = MockFleet::new();
    let handles: Vec<MockDeviceHandle> = devices
        .iter()
        .filter(|d| d.enabled)
        .map(|d| fleet.handle(&d.id))
        .collect();

    let orchestrator = Orchestrator::new(devices, fleet)?;
    let mut feed = orchestrator.subscribe();

    match orchestrator.start_attendance().await? {
        StartReport::Started {
            devices_started,
            total_devices,
            ..
        } => {
            info!(
                started = devices_started.len(),
                total = total_devices,
                "session running, press ctrl-c to stop"
            );
        }
        StartReport::Fallback {
            fallback_reason, ..
        } => {
            warn!(reason = %fallback_reason, "session did not start");
            return Ok(());
        }
    }

    let printer = tokio::spawn(async move {
        while let Ok(decision) = feed.recv().await {
            println!("{}", status_line(&decision));
        }
    });

    if scripted {
        run_demo_script(&handles).await?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    let stats = orchestrator.decision_stats().await;
    let report = orchestrator.stop_attendance().await?;
    printer.abort();

    if let Some(counts) = stats {
        info!(
            approved = counts.approved,
            denied = counts.denied,
            duplicate = counts.duplicate,
            "session summary"
        );
    }
    info!(
        stopped = report.devices_stopped,
        abandoned = report.devices_abandoned,
        "session stopped"
    );
    Ok(())
}

fn demo_roster() -> anyhow::Result<Vec<DeviceDescriptor>> {
    Ok(vec![
        DeviceDescriptor {
            id: DeviceId::new("gate-a")?,
            address: DeviceAddress::new("192.168.1.201", 4370)?,
            display_name: "Main Gate".to_string(),
            location: "Main Gate".to_string(),
            enabled: true,
        },
        DeviceDescriptor {
            id: DeviceId::new("gate-b")?,
            address: DeviceAddress::new("192.168.1.202", 4370)?,
            display_name: "Back Gate".to_string(),
            location: "Back Gate".to_string(),
            enabled: true,
        },
    ])
}

/// Feeds a few captures through the demo fleet: two subjects, one repeat
/// that lands inside the dedup window.
async fn run_demo_script(handles: &[MockDeviceHandle]) -> anyhow::Result<()> {
    let [gate_a, gate_b] = handles else {
        return Ok(());
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    gate_a.queue_identification(SubjectUid::new(1042), 88)?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    gate_b.queue_identification(SubjectUid::new(2001), 95)?;
    tokio::time::sleep(Duration::from_millis(200)).await;
    // Same subject at the other gate, expected to print DUPLICATE.
    gate_b.queue_identification(SubjectUid::new(1042), 91)?;
    Ok(())
}
