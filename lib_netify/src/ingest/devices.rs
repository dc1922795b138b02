//! # Device Resolver
//!
//! Maps a flow's local MAC to a device row. Existing devices without a zone
//! get the record's zone backfilled once; an already assigned zone is never
//! overwritten. A failed backfill is counted and logged but still resolves the
//! device. Unknown MACs are created when auto-creation is on.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::counters::IngestCounters;
use super::zones::ZoneRef;
use crate::store::{Device, DeviceRepository, NewDevice, RepoError};

/// Type assigned to auto-created devices.
pub const UNKNOWN_DEVICE_TYPE: &str = "Unknown";

pub struct DeviceResolver {
    devices: Arc<dyn DeviceRepository>,
    auto_create: bool,
    counters: Arc<IngestCounters>,
}

impl DeviceResolver {
    pub fn new(devices: Arc<dyn DeviceRepository>, auto_create: bool, counters: Arc<IngestCounters>) -> Self {
        Self {
            devices,
            auto_create,
            counters,
        }
    }

    /// Returns the device id for `mac`, or `None` when the MAC is missing or
    /// unknown and auto-creation is off.
    pub async fn resolve(&self, mac: Option<&str>, zone: Option<&ZoneRef>) -> Result<Option<i64>, RepoError> {
        let Some(mac) = mac.and_then(normalize_mac) else {
            return Ok(None);
        };

        if let Some(device) = self.devices.find_by_mac(&mac).await? {
            self.backfill(&device, zone).await;
            return Ok(Some(device.id));
        }
        if !self.auto_create {
            debug!(mac = %mac, "Device unknown and auto-creation disabled");
            return Ok(None);
        }

        let new_device = describe_device(&mac, zone);
        match self.devices.create(new_device).await {
            Ok(id) => {
                info!(device_id = id, mac = %mac, zone_id = ?zone.map(|z| z.id), "Auto-created device");
                Ok(Some(id))
            }
            Err(RepoError::Duplicate { .. }) => {
                warn!(mac = %mac, "Device created concurrently, reloading");
                let device = self.devices.find_by_mac(&mac).await?.ok_or_else(|| {
                    RepoError::Storage(format!("device {} reported duplicate but cannot be found", mac))
                })?;
                self.backfill(&device, zone).await;
                Ok(Some(device.id))
            }
            Err(e) => Err(e),
        }
    }

    async fn backfill(&self, device: &Device, zone: Option<&ZoneRef>) {
        let (None, Some(zone)) = (device.zone_id, zone) else {
            return;
        };
        match self.devices.assign_zone_if_unset(device.id, zone.id).await {
            Ok(true) => info!(device_id = device.id, zone_id = zone.id, "Assigned zone to device"),
            Ok(false) => {}
            Err(e) => {
                IngestCounters::bump(&self.counters.resolution_failures);
                error!(device_id = device.id, zone_id = zone.id, error = %e, "Zone backfill failed");
            }
        }
    }
}

/// Lower-cases and trims a MAC. Empty input yields `None`.
pub fn normalize_mac(mac: &str) -> Option<String> {
    let mac = mac.trim();
    if mac.is_empty() {
        None
    } else {
        Some(mac.to_ascii_lowercase())
    }
}

/// Attributes for an auto-created device.
pub fn describe_device(mac: &str, zone: Option<&ZoneRef>) -> NewDevice {
    let short: String = mac.chars().filter(char::is_ascii_hexdigit).take(8).collect();
    let device_name = match zone {
        Some(zone) => format!("Device-{} @ {}", short, zone.identifier),
        None => format!("Device-{}", short),
    };
    NewDevice {
        mac_address: mac.to_string(),
        device_name,
        device_type: UNKNOWN_DEVICE_TYPE.to_string(),
        description: Some(format!("Auto-detected device from MAC: {}", mac)),
        zone_id: zone.map(|z| z.id),
        is_active: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const MAC: &str = "AA:BB:CC:DD:EE:01";

    fn zone(id: i64) -> ZoneRef {
        ZoneRef {
            id,
            identifier: format!("edge-{}", id),
        }
    }

    #[test]
    fn device_attributes_from_mac() {
        let d = describe_device("aa:bb:cc:dd:ee:01", Some(&zone(7)));
        assert_eq!(d.device_name, "Device-aabbccdd @ edge-7");
        assert_eq!(d.device_type, "Unknown");
        assert_eq!(d.zone_id, Some(7));
        assert_eq!(
            d.description.as_deref(),
            Some("Auto-detected device from MAC: aa:bb:cc:dd:ee:01")
        );
        assert_eq!(describe_device("aa:bb:cc:dd:ee:01", None).device_name, "Device-aabbccdd");
    }

    #[tokio::test]
    async fn resolution_is_idempotent_and_case_insensitive() {
        let store = Arc::new(MemoryStore::new());
        let r = DeviceResolver::new(store.clone(), true, Arc::new(IngestCounters::new()));
        let a = r.resolve(Some(MAC), None).await.unwrap();
        let b = r.resolve(Some(&MAC.to_lowercase()), None).await.unwrap();
        assert!(a.is_some());
        assert_eq!(a, b);
        let devices = store.devices().await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].mac_address, "aa:bb:cc:dd:ee:01");
    }

    #[tokio::test]
    async fn zone_is_backfilled_once_and_never_overwritten() {
        let store = Arc::new(MemoryStore::new());
        let r = DeviceResolver::new(store.clone(), true, Arc::new(IngestCounters::new()));
        let id = r.resolve(Some(MAC), None).await.unwrap();
        assert_eq!(store.devices().await[0].zone_id, None);

        assert_eq!(r.resolve(Some(MAC), Some(&zone(3))).await.unwrap(), id);
        assert_eq!(store.devices().await[0].zone_id, Some(3));

        assert_eq!(r.resolve(Some(MAC), Some(&zone(4))).await.unwrap(), id);
        assert_eq!(store.devices().await[0].zone_id, Some(3));
    }

    #[tokio::test]
    async fn unknown_device_without_auto_create() {
        let store = Arc::new(MemoryStore::new());
        let r = DeviceResolver::new(store.clone(), false, Arc::new(IngestCounters::new()));
        assert_eq!(r.resolve(Some(MAC), Some(&zone(1))).await.unwrap(), None);
        assert!(store.devices().await.is_empty());
    }

    #[tokio::test]
    async fn missing_or_blank_mac_is_unresolved() {
        let store = Arc::new(MemoryStore::new());
        let r = DeviceResolver::new(store.clone(), true, Arc::new(IngestCounters::new()));
        assert_eq!(r.resolve(None, None).await.unwrap(), None);
        assert_eq!(r.resolve(Some("  "), None).await.unwrap(), None);
        assert!(store.devices().await.is_empty());
    }
}
