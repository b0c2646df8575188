use crate::drives::mounts::SystemVolume;
use crate::host::{HostCapabilities, RawBlockDevice};
use crate::{DeviceClass, DeviceRecord, WipeError, WipeResult, UNKNOWN};
use std::sync::Arc;

/// Name prefixes that are never physical, erasable media
const SKIPPED_PREFIXES: [&str; 6] = ["loop", "ram", "zram", "sr", "dm-", "md"];

/// Device kinds that are never offered for wiping
const SKIPPED_KINDS: [&str; 2] = ["rom", "loop"];

const NETWORK_PREFIXES: [&str; 4] = ["nbd", "rbd", "vd", "xvd"];
const NETWORK_TRANSPORTS: [&str; 3] = ["iscsi", "fc", "nvme-fc"];

/// Result of one enumeration, with whatever went wrong along the way
#[derive(Debug, Clone, Default)]
pub struct CatalogReport {
    pub devices: Vec<DeviceRecord>,
    pub diagnostics: Vec<String>,
}

/// Normalized, freshly computed view of the host's block devices
pub struct DeviceCatalog {
    host: Arc<dyn HostCapabilities>,
}

impl DeviceCatalog {
    pub fn new(host: Arc<dyn HostCapabilities>) -> Self {
        Self { host }
    }

    /// Enumerate devices; never fails, problems land in `diagnostics`
    pub fn enumerate_with_diagnostics(&self) -> CatalogReport {
        let mut report = CatalogReport::default();

        let raw = match self.host.list_block_devices() {
            Ok(raw) => raw,
            Err(e) => {
                report.diagnostics.push(e.to_string());
                return report;
            }
        };

        let system_volume = self.host.system_volume();
        if !system_volume.is_determined() {
            report.diagnostics.push(
                "system volume undetermined; fixed disks are treated as system disks".to_string(),
            );
        }

        report.devices = raw
            .iter()
            .filter(|dev| !should_skip(dev))
            .map(|dev| normalize(dev, &system_volume))
            .collect();

        report
    }

    /// Devices only; diagnostics are logged
    pub fn enumerate(&self) -> Vec<DeviceRecord> {
        let report = self.enumerate_with_diagnostics();
        for diagnostic in &report.diagnostics {
            tracing::warn!(platform = self.host.platform(), "{}", diagnostic);
        }
        tracing::debug!(count = report.devices.len(), "Enumerated devices");
        report.devices
    }

    /// Look `path` up in a fresh enumeration
    pub fn find(&self, path: &str) -> WipeResult<DeviceRecord> {
        self.enumerate()
            .into_iter()
            .find(|dev| dev.path == path)
            .ok_or_else(|| WipeError::DeviceNotFound(path.to_string()))
    }
}

/// Check if device should be skipped
pub(crate) fn should_skip_device(device_name: &str) -> bool {
    SKIPPED_PREFIXES.iter().any(|p| device_name.starts_with(p))
}

pub(crate) fn should_skip(device: &RawBlockDevice) -> bool {
    should_skip_device(&device.name)
        || device
            .kind
            .as_deref()
            .is_some_and(|kind| SKIPPED_KINDS.contains(&kind))
}

/// Coarse class used by the safety guard; ambiguity resolves toward `SystemFixed`
pub fn classify(device: &RawBlockDevice, system_volume: &SystemVolume) -> DeviceClass {
    if system_volume.contains(&device.path) {
        return DeviceClass::SystemFixed;
    }

    let transport = device.transport.as_deref().unwrap_or("");
    let kind = device.kind.as_deref().unwrap_or("");
    let removable =
        device.removable == Some(true) || device.hotplug == Some(true) || transport == "usb";

    // Without a known boot disk, any fixed disk (virtio and xen included) may be it
    if !removable && !system_volume.is_determined() {
        return DeviceClass::SystemFixed;
    }

    if NETWORK_PREFIXES.iter().any(|p| device.name.starts_with(p))
        || NETWORK_TRANSPORTS.contains(&transport)
        || kind == "virtual"
    {
        return DeviceClass::NetworkOrVirtual;
    }

    if removable {
        return DeviceClass::RemovableMedia;
    }

    DeviceClass::Unknown
}

/// Turn a raw host listing entry into a total [`DeviceRecord`]
pub fn normalize(device: &RawBlockDevice, system_volume: &SystemVolume) -> DeviceRecord {
    let model = clean(device.model.as_deref());
    let serial = clean(device.serial.as_deref());
    let vendor = clean(device.vendor.as_deref());

    DeviceRecord {
        path: device.path.clone(),
        display_name: display_name(&vendor, &model),
        model,
        serial,
        vendor,
        size_bytes: device.size_bytes.unwrap_or(0),
        removable: device.removable.unwrap_or(false),
        device_class: classify(device, system_volume),
    }
}

fn clean(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

fn display_name(vendor: &str, model: &str) -> String {
    let parts: Vec<&str> = [vendor, model]
        .into_iter()
        .filter(|part| *part != UNKNOWN)
        .collect();

    if parts.is_empty() {
        UNKNOWN.to_string()
    } else {
        parts.join(" ")
    }
}
