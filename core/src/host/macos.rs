use super::{HostCapabilities, RawBlockDevice};
use crate::drives::mounts::{parent_disk, MountEntry, SystemVolume};
use crate::methods::Toolset;
use crate::{WipeError, WipeResult};
use std::collections::{BTreeSet, HashMap};
use std::process::Command;

#[derive(Debug, Default)]
pub struct MacHost;

impl MacHost {
    pub fn new() -> Self {
        Self
    }

    fn diskutil(&self, args: &[&str]) -> WipeResult<String> {
        let output = Command::new("diskutil")
            .args(args)
            .output()
            .map_err(|e| WipeError::EnumerationUnavailable(format!("failed to run diskutil: {}", e)))?;

        if !output.status.success() {
            return Err(WipeError::EnumerationUnavailable(format!(
                "diskutil {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl HostCapabilities for MacHost {
    fn platform(&self) -> &'static str {
        "macos"
    }

    fn list_block_devices(&self) -> WipeResult<Vec<RawBlockDevice>> {
        let listing = self.diskutil(&["list", "physical"])?;

        let mut devices = Vec::new();
        for path in parse_diskutil_list(&listing) {
            match self.diskutil(&["info", &path]) {
                Ok(info) => devices.push(raw_device_from_info(&path, &parse_diskutil_info(&info))),
                Err(e) => {
                    tracing::warn!(device = %path, error = %e, "diskutil info failed, keeping bare entry");
                    devices.push(RawBlockDevice {
                        name: path.trim_start_matches("/dev/").to_string(),
                        path,
                        ..Default::default()
                    });
                }
            }
        }
        Ok(devices)
    }

    fn mount_table(&self) -> WipeResult<Vec<MountEntry>> {
        let output = Command::new("mount").output()?;
        Ok(parse_mount_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn system_volume(&self) -> SystemVolume {
        match self.diskutil(&["info", "/"]) {
            Ok(info) => system_disks_from_info(&parse_diskutil_info(&info)),
            Err(e) => {
                tracing::warn!(error = %e, "Cannot identify boot disk, system volume undetermined");
                SystemVolume::Undetermined
            }
        }
    }

    fn unmount(&self, mount_point: &str) -> WipeResult<()> {
        tracing::info!(mount_point, "Unmounting");
        let output = Command::new("diskutil")
            .args(["unmount", mount_point])
            .output()
            .map_err(|e| WipeError::UnmountFailed {
                mount_point: mount_point.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(WipeError::UnmountFailed {
                mount_point: mount_point.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn toolset(&self) -> Toolset {
        Toolset::Diskutil
    }
}

/// Whole-disk paths from `diskutil list physical`
pub fn parse_diskutil_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|line| line.starts_with("/dev/disk"))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// `Key: Value` pairs from `diskutil info`
pub fn parse_diskutil_info(output: &str) -> HashMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}

fn raw_device_from_info(path: &str, info: &HashMap<String, String>) -> RawBlockDevice {
    let protocol = info.get("Protocol").cloned();
    let virtual_disk = info.get("Virtual").is_some_and(|v| v == "Yes");
    let kind = match protocol.as_deref() {
        Some("Disk Image") => Some("loop".to_string()),
        _ if virtual_disk => Some("virtual".to_string()),
        _ => Some("disk".to_string()),
    };

    RawBlockDevice {
        name: path.trim_start_matches("/dev/").to_string(),
        path: path.to_string(),
        size_bytes: info
            .get("Disk Size")
            .or_else(|| info.get("Total Size"))
            .and_then(|s| parse_size_bytes(s)),
        model: info.get("Device / Media Name").cloned(),
        serial: None,
        vendor: None,
        removable: info
            .get("Removable Media")
            .map(|v| v != "Fixed"),
        hotplug: info
            .get("Device Location")
            .map(|v| v == "External"),
        kind,
        transport: protocol.map(|p| p.to_ascii_lowercase()),
    }
}

/// Byte count from `500.3 GB (500277790720 Bytes) (exactly 977105060 512-Byte-Units)`
fn parse_size_bytes(value: &str) -> Option<u64> {
    let start = value.find('(')? + 1;
    let rest = &value[start..];
    let end = rest.find(" Bytes")?;
    rest[..end].trim().parse().ok()
}

/// Whole disks behind the boot volume, from `diskutil info /`
pub fn system_disks_from_info(info: &HashMap<String, String>) -> SystemVolume {
    let mut disks = BTreeSet::new();

    if let Some(whole) = info.get("Part of Whole") {
        disks.insert(format!("/dev/{}", whole));
    }
    // APFS containers are synthesized; the physical store is the real disk
    if let Some(store) = info.get("APFS Physical Store") {
        disks.insert(parent_disk(&format!("/dev/{}", store)));
    }

    SystemVolume::identified(disks)
}

/// Entries from `mount(8)`: `/dev/disk1s1 on / (apfs, local, journaled)`
pub fn parse_mount_output(output: &str) -> Vec<MountEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (source, rest) = line.split_once(" on ")?;
            let (mount_point, options) = match rest.rfind(" (") {
                Some(idx) => (&rest[..idx], &rest[idx + 2..]),
                None => (rest, ""),
            };
            let fs_type = options
                .trim_end_matches(')')
                .split(',')
                .next()
                .unwrap_or("")
                .trim();

            Some(MountEntry {
                source: source.to_string(),
                mount_point: mount_point.to_string(),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}
