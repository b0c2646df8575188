// Host capability layer
//
// Everything platform-specific lives behind HostCapabilities:
// - linux.rs: lsblk/sysfs enumeration, /proc/mounts, umount, dd/shred
// - macos.rs: diskutil enumeration and secureErase, mount(8)
//
// detect_host() is the single place a platform is chosen.

pub mod linux;
pub mod macos;

use crate::drives::hidden_areas::HiddenAreaReport;
use crate::drives::mounts::{MountEntry, SystemVolume};
use crate::methods::Toolset;
use crate::{DeviceRecord, WipeError, WipeResult, WipeSettings, UNKNOWN};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use linux::LinuxHost;
pub use macos::MacHost;

/// Unnormalized block device as the host reports it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlockDevice {
    pub name: String,
    pub path: String,
    pub size_bytes: Option<u64>,
    pub model: Option<String>,
    pub serial: Option<String>,
    pub vendor: Option<String>,
    pub removable: Option<bool>,
    pub hotplug: Option<bool>,
    /// Device kind as reported by the host (`disk`, `rom`, `loop`, ...)
    pub kind: Option<String>,
    /// Transport (`usb`, `sata`, `nvme`, `iscsi`, ...)
    pub transport: Option<String>,
}

/// Capabilities the orchestrator needs from the operating environment
#[cfg_attr(test, mockall::automock)]
pub trait HostCapabilities: Send + Sync {
    /// Short platform name recorded in compliance records
    fn platform(&self) -> &'static str;

    /// Raw block-device listing
    fn list_block_devices(&self) -> WipeResult<Vec<RawBlockDevice>>;

    /// Current mount table
    fn mount_table(&self) -> WipeResult<Vec<MountEntry>>;

    /// Disks hosting the running system
    fn system_volume(&self) -> SystemVolume;

    /// Unmount a single mount point
    fn unmount(&self, mount_point: &str) -> WipeResult<()>;

    /// Tools used to turn a method plan into commands
    fn toolset(&self) -> Toolset;

    /// Operator identity for the record
    fn operator(&self) -> String {
        current_operator()
    }

    /// Whole disks behind a mount source that does not name one directly
    /// (device-mapper, md, `/dev/mapper` and `/dev/disk/by-*` links)
    fn mount_source_disks(&self, _source: &str) -> Vec<String> {
        Vec::new()
    }

    /// HPA/DCO detection; must not modify the device
    fn hidden_areas(&self, _device: &DeviceRecord) -> HiddenAreaReport {
        HiddenAreaReport::unavailable(format!(
            "hidden-area detection not supported on {}",
            self.platform()
        ))
    }
}

/// Operator name from the environment, falling back to the sentinel
pub fn current_operator() -> String {
    ["SUDO_USER", "USER", "USERNAME", "LOGNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Host for platforms without an enumeration backend.
///
/// It lists nothing and never identifies the system volume, so anything that
/// does reach the safety guard is treated conservatively.
#[derive(Debug, Default)]
pub struct UnsupportedHost;

impl HostCapabilities for UnsupportedHost {
    fn platform(&self) -> &'static str {
        std::env::consts::OS
    }

    fn list_block_devices(&self) -> WipeResult<Vec<RawBlockDevice>> {
        Err(WipeError::EnumerationUnavailable(format!(
            "no device backend for {}",
            std::env::consts::OS
        )))
    }

    fn mount_table(&self) -> WipeResult<Vec<MountEntry>> {
        Ok(Vec::new())
    }

    fn system_volume(&self) -> SystemVolume {
        SystemVolume::Undetermined
    }

    fn unmount(&self, mount_point: &str) -> WipeResult<()> {
        Err(WipeError::UnmountFailed {
            mount_point: mount_point.to_string(),
            reason: "unmount not supported on this platform".to_string(),
        })
    }

    fn toolset(&self) -> Toolset {
        Toolset::Coreutils
    }
}

/// Host that swaps the platform toolset for an operator-configured one
struct CustomToolsetHost {
    inner: Arc<dyn HostCapabilities>,
    toolset: Toolset,
}

impl HostCapabilities for CustomToolsetHost {
    fn platform(&self) -> &'static str {
        self.inner.platform()
    }

    fn list_block_devices(&self) -> WipeResult<Vec<RawBlockDevice>> {
        self.inner.list_block_devices()
    }

    fn mount_table(&self) -> WipeResult<Vec<MountEntry>> {
        self.inner.mount_table()
    }

    fn system_volume(&self) -> SystemVolume {
        self.inner.system_volume()
    }

    fn unmount(&self, mount_point: &str) -> WipeResult<()> {
        self.inner.unmount(mount_point)
    }

    fn toolset(&self) -> Toolset {
        self.toolset.clone()
    }

    fn operator(&self) -> String {
        self.inner.operator()
    }

    fn mount_source_disks(&self, source: &str) -> Vec<String> {
        self.inner.mount_source_disks(source)
    }

    fn hidden_areas(&self, device: &DeviceRecord) -> HiddenAreaReport {
        self.inner.hidden_areas(device)
    }
}

/// Pick the host implementation for the running platform
pub fn detect_host(settings: &WipeSettings) -> Arc<dyn HostCapabilities> {
    let platform: Arc<dyn HostCapabilities> = if cfg!(target_os = "linux") {
        Arc::new(LinuxHost::new())
    } else if cfg!(target_os = "macos") {
        Arc::new(MacHost::new())
    } else {
        Arc::new(UnsupportedHost)
    };

    tracing::debug!(platform = platform.platform(), "Selected host backend");

    match &settings.custom_toolset {
        Some(custom) => Arc::new(CustomToolsetHost {
            inner: platform,
            toolset: Toolset::Custom(custom.clone()),
        }),
        None => platform,
    }
}
