// Safety Guard - decides whether a destructive operation may start
//
// Pure function over facts the caller supplies. System-volume protection is
// evaluated before the mount check so unmounting can never unlock a system disk.

use crate::drives::mounts::MountState;
use crate::{DeviceClass, DeviceRecord, WipeError};
use serde::{Deserialize, Serialize};

pub const SYSTEM_VOLUME_REASON: &str = "system volume";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyVerdict {
    Proceed,
    RequiresUnmount(Vec<String>),
    Blocked(String),
}

impl SafetyVerdict {
    pub fn is_proceed(&self) -> bool {
        matches!(self, SafetyVerdict::Proceed)
    }

    /// Error equivalent for anything other than `Proceed`
    pub fn into_error(self) -> Option<WipeError> {
        match self {
            SafetyVerdict::Proceed => None,
            SafetyVerdict::RequiresUnmount(mount_points) => {
                Some(WipeError::MountConflict(mount_points))
            }
            SafetyVerdict::Blocked(reason) => Some(WipeError::SafetyBlocked(reason)),
        }
    }
}

/// Evaluate the guard rules in order; the first match wins
pub fn check_safe(device: &DeviceRecord, mount_state: &MountState) -> SafetyVerdict {
    if device.device_class == DeviceClass::SystemFixed
        || mount_state.system_volume.contains(&device.path)
        || mount_state.hosts_system_mount()
    {
        return SafetyVerdict::Blocked(SYSTEM_VOLUME_REASON.to_string());
    }

    // Anything but removable media on a host that cannot name its boot disk
    if device.device_class != DeviceClass::RemovableMedia
        && !mount_state.system_volume.is_determined()
    {
        return SafetyVerdict::Blocked(format!("{} undetermined", SYSTEM_VOLUME_REASON));
    }

    if mount_state.is_mounted() {
        return SafetyVerdict::RequiresUnmount(mount_state.mount_points.clone());
    }

    SafetyVerdict::Proceed
}
