//! Device configuration loading.
//!
//! The device fleet is described by an ordered JSON array, loaded once per
//! process lifetime. Re-reading requires an orchestrator restart; there is no
//! hot reload.
//!
//! # File format
//!
//! ```json
//! [
//!   {
//!     "device_id": "gate-a",
//!     "address": "192.168.1.201:4370",
//!     "name": "Entrance Scanner A",
//!     "location": "Main Gate",
//!     "enabled": true
//!   }
//! ]
//! ```
//!
//! `enabled` defaults to `true` and the port defaults to 4370 when omitted.

use crate::{
    Result,
    error::Error,
    types::{DeviceAddress, DeviceDescriptor, DeviceId},
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// One raw entry of the device configuration file.
#[derive(Debug, Deserialize)]
struct RawDeviceEntry {
    device_id: String,
    address: String,
    name: String,
    location: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Parse a device configuration document.
///
/// Order of the input array is preserved.
///
/// # Errors
///
/// Returns `Error::Config` on malformed JSON, `Error::DuplicateDeviceId` if
/// two entries share a `device_id`, and the respective validation errors for
/// bad ids or addresses. Any of these is fatal at load: no partial fleet is
/// ever returned.
pub fn parse_descriptors(json: &str) -> Result<Vec<DeviceDescriptor>> {
    let entries: Vec<RawDeviceEntry> =
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;

    let mut seen = HashSet::new();
    let mut descriptors = Vec::with_capacity(entries.len());

    for entry in entries {
        let id = DeviceId::new(&entry.device_id)?;
        if !seen.insert(id.clone()) {
            return Err(Error::DuplicateDeviceId(id.to_string()));
        }

        let address: DeviceAddress = entry.address.parse()?;

        descriptors.push(DeviceDescriptor {
            id,
            address,
            display_name: entry.name,
            location: entry.location,
            enabled: entry.enabled,
        });
    }

    Ok(descriptors)
}

/// Load device descriptors from a JSON file.
///
/// # Errors
///
/// Returns `Error::Io` if the file cannot be read, otherwise the same
/// validation errors as [`parse_descriptors`].
pub fn load_descriptors(path: impl AsRef<Path>) -> Result<Vec<DeviceDescriptor>> {
    let contents = std::fs::read_to_string(path)?;
    parse_descriptors(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {
            "device_id": "gate-a",
            "address": "192.168.1.201:4370",
            "name": "Entrance Scanner A",
            "location": "Main Gate",
            "enabled": true
        },
        {
            "device_id": "gate-b",
            "address": "192.168.1.202",
            "name": "Entrance Scanner B",
            "location": "Side Gate"
        },
        {
            "device_id": "lab",
            "address": "192.168.1.203:4370",
            "name": "Lab Scanner",
            "location": "Laboratory",
            "enabled": false
        }
    ]"#;

    #[test]
    fn test_parse_preserves_order_and_defaults() {
        let devices = parse_descriptors(SAMPLE).unwrap();
        assert_eq!(devices.len(), 3);

        assert_eq!(devices[0].id.as_str(), "gate-a");
        assert_eq!(devices[1].id.as_str(), "gate-b");
        assert_eq!(devices[2].id.as_str(), "lab");

        // enabled defaults to true, port defaults to 4370
        assert!(devices[1].enabled);
        assert_eq!(devices[1].address.port, 4370);
        assert!(!devices[2].enabled);
    }

    #[test]
    fn test_parse_duplicate_device_id() {
        let json = r#"[
            {"device_id": "gate-a", "address": "h1:1", "name": "A", "location": "L"},
            {"device_id": "gate-a", "address": "h2:2", "name": "B", "location": "L"}
        ]"#;

        let result = parse_descriptors(json);
        assert!(matches!(result, Err(Error::DuplicateDeviceId(id)) if id == "gate-a"));
    }

    #[test]
    fn test_parse_malformed_json() {
        assert!(matches!(
            parse_descriptors("not json"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_parse_bad_address() {
        let json = r#"[
            {"device_id": "gate-a", "address": ":4370", "name": "A", "location": "L"}
        ]"#;
        assert!(matches!(
            parse_descriptors(json),
            Err(Error::InvalidAddress { .. })
        ));
    }

    #[test]
    fn test_parse_empty_list() {
        assert!(parse_descriptors("[]").unwrap().is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_descriptors("/definitely/not/here.json");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
