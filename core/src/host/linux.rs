use super::{HostCapabilities, RawBlockDevice};
use crate::drives::hidden_areas::HiddenAreaReport;
use crate::drives::mounts::{parse_proc_mounts, MountEntry, SystemVolume, SYSTEM_MOUNT_POINTS};
use crate::methods::Toolset;
use crate::{DeviceRecord, WipeError, WipeResult};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// lsblk column sets, newest first; util-linux < 2.33 has no PATH column
const LSBLK_COLUMNS: [&str; 2] = [
    "NAME,PATH,SIZE,MODEL,SERIAL,VENDOR,RM,HOTPLUG,TYPE,TRAN",
    "NAME,SIZE,MODEL,SERIAL,VENDOR,RM,HOTPLUG,TYPE,TRAN",
];

/// Guard against slave cycles in broken sysfs trees
const MAX_SLAVE_DEPTH: usize = 8;

/// Kernel name prefixes of disks that answer ATA SET MAX / DCO commands
const ATA_PREFIXES: [&str; 2] = ["sd", "hd"];

pub struct LinuxHost {
    sys_root: PathBuf,
    proc_mounts: PathBuf,
}

impl Default for LinuxHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LinuxHost {
    pub fn new() -> Self {
        Self {
            sys_root: PathBuf::from("/sys"),
            proc_mounts: PathBuf::from("/proc/mounts"),
        }
    }

    /// Host reading sysfs and the mount table from alternate locations
    pub fn with_roots(sys_root: impl Into<PathBuf>, proc_mounts: impl Into<PathBuf>) -> Self {
        Self {
            sys_root: sys_root.into(),
            proc_mounts: proc_mounts.into(),
        }
    }

    fn enumerate_lsblk(&self) -> WipeResult<Vec<RawBlockDevice>> {
        let mut last_error = String::from("lsblk produced no output");

        for columns in LSBLK_COLUMNS {
            let output = match Command::new("lsblk")
                .args(["-J", "-b", "-d", "-o", columns])
                .output()
            {
                Ok(output) => output,
                Err(e) => {
                    return Err(WipeError::EnumerationUnavailable(format!(
                        "failed to run lsblk: {}",
                        e
                    )))
                }
            };

            if output.status.success() {
                return parse_lsblk_json(&String::from_utf8_lossy(&output.stdout));
            }
            last_error = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::debug!(columns, error = %last_error, "lsblk rejected column set");
        }

        Err(WipeError::EnumerationUnavailable(last_error))
    }

    fn enumerate_sysfs(&self) -> WipeResult<Vec<RawBlockDevice>> {
        let block_root = self.sys_root.join("block");
        let entries = fs::read_dir(&block_root).map_err(|e| {
            WipeError::EnumerationUnavailable(format!("{}: {}", block_root.display(), e))
        })?;

        let mut devices = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let dir = entry.path();

            let size_bytes = read_trimmed(&dir.join("size"))
                .and_then(|s| s.parse::<u64>().ok())
                .and_then(|sectors| sectors.checked_mul(512));

            devices.push(RawBlockDevice {
                path: format!("/dev/{}", name),
                size_bytes,
                model: read_trimmed(&dir.join("device/model")),
                serial: read_trimmed(&dir.join("device/serial")),
                vendor: read_trimmed(&dir.join("device/vendor")),
                removable: read_trimmed(&dir.join("removable")).map(|v| v == "1"),
                hotplug: None,
                kind: None,
                transport: self.sysfs_transport(&name),
                name,
            });
        }

        devices.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(devices)
    }

    /// USB devices resolve through a usb bus node in their sysfs device link
    fn sysfs_transport(&self, name: &str) -> Option<String> {
        let link = fs::read_link(self.sys_root.join("block").join(name).join("device")).ok()?;
        if link.to_string_lossy().contains("usb") {
            Some("usb".to_string())
        } else {
            None
        }
    }

    /// Whole disks that back a kernel block device name.
    ///
    /// Device-mapper and md devices are followed through `slaves/`; partitions
    /// resolve to their parent disk directory.
    pub(crate) fn backing_disks(&self, name: &str, depth: usize) -> Vec<String> {
        if depth > MAX_SLAVE_DEPTH {
            return Vec::new();
        }

        let block_dir = self.sys_root.join("block").join(name);
        if block_dir.is_dir() {
            let slaves: Vec<String> = fs::read_dir(block_dir.join("slaves"))
                .map(|rd| {
                    rd.flatten()
                        .map(|e| e.file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();

            if slaves.is_empty() {
                return vec![format!("/dev/{}", name)];
            }
            return slaves
                .iter()
                .flat_map(|slave| self.backing_disks(slave, depth + 1))
                .collect();
        }

        let class_link = self.sys_root.join("class/block").join(name);
        if let Ok(real) = fs::canonicalize(&class_link) {
            if real.join("partition").exists() {
                if let Some(parent) = real.parent().and_then(|p| p.file_name()) {
                    return self.backing_disks(&parent.to_string_lossy(), depth + 1);
                }
            }
        }

        Vec::new()
    }

    fn resolve_mount_source(&self, source: &str) -> Vec<String> {
        if !source.starts_with("/dev/") {
            return Vec::new();
        }

        // /dev/mapper/* and /dev/disk/by-* are symlinks to the kernel name
        let resolved = fs::canonicalize(source).unwrap_or_else(|_| PathBuf::from(source));
        match resolved.file_name() {
            Some(name) => self.backing_disks(&name.to_string_lossy(), 0),
            None => Vec::new(),
        }
    }
}

impl HostCapabilities for LinuxHost {
    fn platform(&self) -> &'static str {
        "linux"
    }

    fn list_block_devices(&self) -> WipeResult<Vec<RawBlockDevice>> {
        match self.enumerate_lsblk() {
            Ok(devices) if !devices.is_empty() => Ok(devices),
            Ok(_) => self.enumerate_sysfs(),
            Err(e) => {
                tracing::debug!(error = %e, "lsblk unavailable, falling back to sysfs");
                self.enumerate_sysfs()
            }
        }
    }

    fn mount_table(&self) -> WipeResult<Vec<MountEntry>> {
        let content = fs::read_to_string(&self.proc_mounts)?;
        Ok(parse_proc_mounts(&content))
    }

    fn system_volume(&self) -> SystemVolume {
        let entries = match self.mount_table() {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(error = %e, "Cannot read mount table, system volume undetermined");
                return SystemVolume::Undetermined;
            }
        };

        let mut disks = BTreeSet::new();
        for mount_point in SYSTEM_MOUNT_POINTS {
            // Later entries shadow earlier ones at the same mount point
            let Some(entry) = entries.iter().rev().find(|e| e.mount_point == mount_point) else {
                if mount_point == "/" {
                    return SystemVolume::Undetermined;
                }
                continue;
            };

            let backing = self.resolve_mount_source(&entry.source);
            if backing.is_empty() && mount_point == "/" {
                tracing::warn!(source = %entry.source, "Root filesystem source not resolvable to a disk");
                return SystemVolume::Undetermined;
            }
            disks.extend(backing);
        }

        SystemVolume::identified(disks)
    }

    fn unmount(&self, mount_point: &str) -> WipeResult<()> {
        tracing::info!(mount_point, "Unmounting");
        let output = Command::new("umount")
            .arg(mount_point)
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
        Toolset::Coreutils
    }

    fn mount_source_disks(&self, source: &str) -> Vec<String> {
        self.resolve_mount_source(source)
    }

    fn hidden_areas(&self, device: &DeviceRecord) -> HiddenAreaReport {
        if !ATA_PREFIXES.iter().any(|p| device.basename().starts_with(p)) {
            return HiddenAreaReport::unavailable("not an ATA device");
        }

        let max_output = match run_hdparm(&["-N", device.path.as_str()]) {
            Ok(output) => output,
            Err(reason) => {
                tracing::debug!(device = %device.path, %reason, "HPA detection unavailable");
                return HiddenAreaReport::unavailable(reason);
            }
        };
        let dco_output = run_hdparm(&["--dco-identify", device.path.as_str()]).ok();

        let report = HiddenAreaReport::from_hdparm(&max_output, dco_output.as_deref());
        if report.has_hidden_area() {
            tracing::warn!(
                device = %device.path,
                hpa = report.hpa_present,
                dco = report.dco_limited,
                hidden_sectors = report.hpa_hidden_sectors(),
                "Hidden area present; overwrite tools cannot reach it"
            );
        }
        report
    }
}

/// Stdout of a successful hdparm run, or why there is none
fn run_hdparm(args: &[&str]) -> Result<String, String> {
    let output = Command::new("hdparm")
        .args(args)
        .output()
        .map_err(|e| format!("failed to run hdparm: {}", e))?;

    if !output.status.success() {
        return Err(format!(
            "hdparm {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

// Column types drift between util-linux releases (RM is "0"/"1", 0/1 or a
// bool; SIZE a string or a number), so the loose ones stay as Value.
#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    size: Option<Value>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    serial: Option<String>,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    rm: Option<Value>,
    #[serde(default)]
    hotplug: Option<Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    tran: Option<String>,
}

/// Parse `lsblk -J -b -d` output
pub fn parse_lsblk_json(json: &str) -> WipeResult<Vec<RawBlockDevice>> {
    let parsed: LsblkOutput = serde_json::from_str(json)
        .map_err(|e| WipeError::EnumerationUnavailable(format!("unparseable lsblk output: {}", e)))?;

    Ok(parsed
        .blockdevices
        .into_iter()
        .map(|dev| RawBlockDevice {
            path: dev
                .path
                .unwrap_or_else(|| format!("/dev/{}", dev.name)),
            size_bytes: dev.size.as_ref().and_then(value_as_u64),
            model: dev.model,
            serial: dev.serial,
            vendor: dev.vendor,
            removable: dev.rm.as_ref().and_then(value_as_bool),
            hotplug: dev.hotplug.as_ref().and_then(value_as_bool),
            kind: dev.kind,
            transport: dev.tran,
            name: dev.name,
        })
        .collect())
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_u64().map(|v| v != 0),
        Value::String(s) => match s.trim() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
