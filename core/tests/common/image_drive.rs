use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A file standing in for a block device.
///
/// Lives in its own temp dir, so its path passes the device-path grammar and
/// its basename is a plausible disk name.
pub struct ImageDrive {
    pub path: PathBuf,
    _dir: TempDir,
}

impl ImageDrive {
    /// Image of `size` bytes, every byte set to `fill`
    pub fn filled(name: &str, size: usize, fill: u8) -> std::io::Result<Self> {
        let dir = TempDir::new()?;
        let path = dir.path().join(name);
        fs::write(&path, vec![fill; size])?;
        Ok(Self { path, _dir: dir })
    }

    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// True when every byte in the file is zero
pub fn verify_all_zeros(path: &Path) -> std::io::Result<bool> {
    let mut file = fs::File::open(path)?;
    let mut buffer = vec![0u8; 4096];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            return Ok(true);
        }
        if buffer[..bytes_read].iter().any(|&b| b != 0) {
            return Ok(false);
        }
    }
}
