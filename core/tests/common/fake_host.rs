use nullbytes_wipe::drives::{MountEntry, SystemVolume};
use nullbytes_wipe::host::{HostCapabilities, RawBlockDevice};
use nullbytes_wipe::methods::{CustomToolset, StepTemplate, Toolset};
use nullbytes_wipe::{WipeError, WipeResult};
use std::sync::Mutex;

/// Host with a fixed device list and a mount table that `unmount` edits
pub struct FakeHost {
    devices: Vec<RawBlockDevice>,
    mounts: Mutex<Vec<MountEntry>>,
    system_volume: SystemVolume,
    toolset: Toolset,
    busy_mounts: Vec<String>,
    unmounted: Mutex<Vec<String>>,
}

impl FakeHost {
    /// A host whose system lives on /dev/sda, with no other devices yet
    pub fn new(toolset: Toolset) -> Self {
        Self {
            devices: vec![disk("sda", "/dev/sda", false)],
            mounts: Mutex::new(vec![
                mount("/dev/sda2", "/"),
                mount("/dev/sda1", "/boot/efi"),
            ]),
            system_volume: SystemVolume::identified(["/dev/sda"]),
            toolset,
            busy_mounts: Vec::new(),
            unmounted: Mutex::new(Vec::new()),
        }
    }

    pub fn with_device(mut self, device: RawBlockDevice) -> Self {
        self.devices.push(device);
        self
    }

    pub fn with_mount(self, source: &str, mount_point: &str) -> Self {
        self.mounts.lock().unwrap().push(mount(source, mount_point));
        self
    }

    /// `unmount` of this mount point fails with "target is busy"
    pub fn with_busy_mount(mut self, mount_point: &str) -> Self {
        self.busy_mounts.push(mount_point.to_string());
        self
    }

    pub fn with_system_volume(mut self, system_volume: SystemVolume) -> Self {
        self.system_volume = system_volume;
        self
    }

    pub fn unmounted(&self) -> Vec<String> {
        self.unmounted.lock().unwrap().clone()
    }
}

impl HostCapabilities for FakeHost {
    fn platform(&self) -> &'static str {
        "fake"
    }

    fn list_block_devices(&self) -> WipeResult<Vec<RawBlockDevice>> {
        Ok(self.devices.clone())
    }

    fn mount_table(&self) -> WipeResult<Vec<MountEntry>> {
        Ok(self.mounts.lock().unwrap().clone())
    }

    fn system_volume(&self) -> SystemVolume {
        self.system_volume.clone()
    }

    fn unmount(&self, mount_point: &str) -> WipeResult<()> {
        if self.busy_mounts.iter().any(|mp| mp == mount_point) {
            return Err(WipeError::UnmountFailed {
                mount_point: mount_point.to_string(),
                reason: "target is busy".to_string(),
            });
        }
        self.mounts
            .lock()
            .unwrap()
            .retain(|entry| entry.mount_point != mount_point);
        self.unmounted.lock().unwrap().push(mount_point.to_string());
        Ok(())
    }

    fn toolset(&self) -> Toolset {
        self.toolset.clone()
    }

    fn operator(&self) -> String {
        "fake-operator".to_string()
    }
}

pub fn disk(name: &str, path: &str, removable: bool) -> RawBlockDevice {
    RawBlockDevice {
        name: name.to_string(),
        path: path.to_string(),
        size_bytes: Some(64 * 1024 * 1024 * 1024),
        model: Some("Test Disk".to_string()),
        serial: Some(format!("SN-{}", name.to_uppercase())),
        vendor: Some("ACME".to_string()),
        removable: Some(removable),
        hotplug: Some(removable),
        kind: Some("disk".to_string()),
        transport: Some(if removable { "usb" } else { "sata" }.to_string()),
    }
}

pub fn mount(source: &str, mount_point: &str) -> MountEntry {
    MountEntry {
        source: source.to_string(),
        mount_point: mount_point.to_string(),
        fs_type: "ext4".to_string(),
    }
}

/// The same steps for every method
pub fn uniform_toolset(steps: Vec<StepTemplate>) -> Toolset {
    Toolset::Custom(CustomToolset {
        clear: steps.clone(),
        purge: steps.clone(),
        destroy: steps,
    })
}

/// A step that only talks, shred-style, and never touches the device
pub fn chatty_passes(passes: u32) -> Vec<StepTemplate> {
    let script = (1..=passes)
        .map(|pass| format!("echo \"shred: $0: pass {}/{} (random)...\" >&2", pass, passes))
        .collect::<Vec<_>>()
        .join("; ");
    vec![StepTemplate::new("sh", vec!["-c".to_string(), script, "{device}".to_string()])]
}

pub fn zero_fill(count_blocks: u32) -> Vec<StepTemplate> {
    vec![StepTemplate::new(
        "dd",
        vec![
            "if=/dev/zero".to_string(),
            "of={device}".to_string(),
            "bs=4096".to_string(),
            format!("count={}", count_blocks),
            "conv=notrunc".to_string(),
        ],
    )]
}
