// Mount table and system-volume facts
//
// Hosts report raw mount entries; this module turns them into the per-device
// view the safety guard consumes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Mount points that mean a device is carrying the running system
pub const SYSTEM_MOUNT_POINTS: [&str; 3] = ["/", "/boot", "/boot/efi"];

/// One line of the host mount table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    pub source: String,
    pub mount_point: String,
    pub fs_type: String,
}

/// Which whole disks host the running system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemVolume {
    Identified(BTreeSet<String>),
    /// The host could not tell; every fixed disk must be treated as a system disk
    Undetermined,
}

impl SystemVolume {
    pub fn identified<I, S>(disks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = disks.into_iter().map(Into::into).collect();
        if set.is_empty() {
            SystemVolume::Undetermined
        } else {
            SystemVolume::Identified(set)
        }
    }

    /// True when `device_path` is (or contains) one of the identified system disks
    pub fn contains(&self, device_path: &str) -> bool {
        match self {
            SystemVolume::Identified(disks) => disks
                .iter()
                .any(|disk| is_same_or_partition(disk, device_path)),
            SystemVolume::Undetermined => false,
        }
    }

    pub fn is_determined(&self) -> bool {
        matches!(self, SystemVolume::Identified(_))
    }
}

/// Mount and system-volume facts for one device, supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountState {
    pub mount_points: Vec<String>,
    pub system_volume: SystemVolume,
}

impl MountState {
    /// Collect every mount point whose source lives on `device_path`
    pub fn for_device(entries: &[MountEntry], device_path: &str, system_volume: SystemVolume) -> Self {
        Self::for_device_with(entries, device_path, system_volume, |_| Vec::new())
    }

    /// Like [`MountState::for_device`], also matching sources that `backing`
    /// resolves to disks (device-mapper, md, `/dev/mapper` links)
    pub fn for_device_with<F>(
        entries: &[MountEntry],
        device_path: &str,
        system_volume: SystemVolume,
        backing: F,
    ) -> Self
    where
        F: Fn(&str) -> Vec<String>,
    {
        let mut mount_points: Vec<String> = entries
            .iter()
            .filter(|entry| {
                is_same_or_partition(&entry.source, device_path)
                    || backing(&entry.source)
                        .iter()
                        .any(|disk| is_same_or_partition(disk, device_path))
            })
            .map(|entry| entry.mount_point.clone())
            .collect();
        mount_points.dedup();

        Self {
            mount_points,
            system_volume,
        }
    }

    /// Facts for a device with nothing mounted
    pub fn unmounted(system_volume: SystemVolume) -> Self {
        Self {
            mount_points: Vec::new(),
            system_volume,
        }
    }

    pub fn is_mounted(&self) -> bool {
        !self.mount_points.is_empty()
    }

    pub fn hosts_system_mount(&self) -> bool {
        self.mount_points
            .iter()
            .any(|mp| SYSTEM_MOUNT_POINTS.contains(&mp.as_str()))
    }
}

/// Check whether `candidate` is the disk `disk` itself or one of its partitions.
///
/// Understands `sda1`, `nvme0n1p2`, `mmcblk0p1` and macOS `disk2s1` naming.
/// A plain prefix match is not enough: `/dev/sda` must not claim `/dev/sdaa`.
pub fn is_same_or_partition(candidate: &str, disk: &str) -> bool {
    if candidate == disk {
        return true;
    }

    let Some(rest) = candidate.strip_prefix(disk) else {
        return false;
    };
    if rest.is_empty() {
        return false;
    }

    let disk_ends_with_digit = disk.chars().last().is_some_and(|c| c.is_ascii_digit());
    let digits = if disk_ends_with_digit {
        match rest.strip_prefix('p').or_else(|| rest.strip_prefix('s')) {
            Some(d) => d,
            None => return false,
        }
    } else {
        rest
    };

    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Disk name families whose whole-disk names already end in a digit
const NUMBERED_DISK_PREFIXES: [&str; 5] = ["nvme", "mmcblk", "disk", "nbd", "md"];

/// Strip a partition suffix to get the whole-disk path.
///
/// Whole-disk paths are returned unchanged.
pub fn parent_disk(partition: &str) -> String {
    let name_start = partition.rfind('/').map_or(0, |i| i + 1);
    let name = &partition[name_start..];
    let trimmed = partition.trim_end_matches(|c: char| c.is_ascii_digit());

    if NUMBERED_DISK_PREFIXES.iter().any(|p| name.starts_with(p)) {
        // nvme0n1p2 / mmcblk0p1 / disk2s1: partitions carry an explicit marker
        for marker in ['p', 's'] {
            if let Some(base) = trimmed.strip_suffix(marker) {
                if trimmed.len() < partition.len()
                    && base.len() > name_start
                    && base.chars().last().is_some_and(|c| c.is_ascii_digit())
                {
                    return base.to_string();
                }
            }
        }
        return partition.to_string();
    }

    trimmed.to_string()
}

/// Parse `/proc/mounts` (or `/etc/mtab`) content
pub fn parse_proc_mounts(content: &str) -> Vec<MountEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let source = parts.next()?;
            let mount_point = parts.next()?;
            let fs_type = parts.next().unwrap_or("");
            Some(MountEntry {
                source: decode_mount_escapes(source),
                mount_point: decode_mount_escapes(mount_point),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Decode the octal escapes the kernel uses for spaces, tabs and backslashes
pub(crate) fn decode_mount_escapes(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let octal = &bytes[i + 1..i + 4];
            if octal.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = octal
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(value) {
                    out.push(byte);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}
