use super::record::ComplianceRecord;
use crate::{WipeError, WipeResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// A record together with where it ended up
#[derive(Debug, Clone)]
pub struct PersistedRecord {
    pub path: PathBuf,
    pub record: ComplianceRecord,
    pub used_fallback: bool,
}

/// `<certificateId>_<device basename>.json`
pub fn record_file_name(record: &ComplianceRecord) -> String {
    let basename: String = record
        .device
        .basename()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("{}_{}.json", record.certificate_id, basename)
}

/// Write `record` to `primary_path`, or into `fallback_dir` if that fails.
///
/// Existing files are never replaced; an occupied primary path counts as a
/// failed write and sends the record to the fallback location.
///
/// When the fallback is used the record is re-sealed with `fallback_from` set,
/// so the returned record is exactly what is on disk.
pub fn persist(
    mut record: ComplianceRecord,
    primary_path: &Path,
    fallback_dir: &Path,
) -> WipeResult<PersistedRecord> {
    let primary_error = match write_atomic(&record, primary_path) {
        Ok(()) => {
            tracing::info!(path = %primary_path.display(), "Compliance record saved");
            return Ok(PersistedRecord {
                path: primary_path.to_path_buf(),
                record,
                used_fallback: false,
            });
        }
        Err(e) => e,
    };

    let degraded = WipeError::PersistPrimaryFailed {
        path: primary_path.display().to_string(),
        reason: primary_error.to_string(),
    };
    tracing::warn!(error = %degraded, "Falling back to scratch location");

    // Named by certificate id so fallbacks from a shared primary path never collide
    let fallback_path = fallback_dir.join(record_file_name(&record));

    record.fallback_from = Some(primary_path.display().to_string());
    if let Err(e) = record.seal() {
        tracing::error!(error = %e, "Failed to reseal record for fallback");
    }

    match write_atomic(&record, &fallback_path) {
        Ok(()) => {
            tracing::info!(path = %fallback_path.display(), "Compliance record saved to fallback");
            Ok(PersistedRecord {
                path: fallback_path,
                record,
                used_fallback: true,
            })
        }
        Err(fallback_error) => Err(WipeError::PersistFailed(format!(
            "primary {}: {}; fallback {}: {}",
            primary_path.display(),
            primary_error,
            fallback_path.display(),
            fallback_error
        ))),
    }
}

/// Read a persisted record back
pub fn load(path: &Path) -> WipeResult<ComplianceRecord> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Temp file in the target directory, fsync, then link into place if `path` is free
fn write_atomic(record: &ComplianceRecord, path: &Path) -> WipeResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    serde_json::to_writer_pretty(&mut tmp, record)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path)
        .map_err(|e| WipeError::IoError(e.error))?;
    Ok(())
}
