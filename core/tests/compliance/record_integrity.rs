/// Compliance record integrity tests
///
/// Records produced by a real session must be complete, self-verifying and
/// stable across a save/load cycle.
use crate::common::fake_host::{disk, uniform_toolset, zero_fill, FakeHost};
use crate::common::image_drive::ImageDrive;
use nullbytes_wipe::certificates::{self, ComplianceRecord, SCHEMA_VERSION};
use nullbytes_wipe::{CancelToken, WipeOrchestrator, WipeOutcome, WipeRequest, WipeSettings, WipeStatus};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

async fn wiped_record(scratch: &TempDir) -> (ComplianceRecord, PathBuf) {
    let drive = ImageDrive::filled("sdy", 8192, 0xC3).unwrap();
    let host = Arc::new(
        FakeHost::new(uniform_toolset(zero_fill(2))).with_device(disk("sdy", &drive.path_str(), true)),
    );
    let settings = WipeSettings {
        records_dir: scratch.path().join("records"),
        fallback_dir: scratch.path().join("fallback"),
        raw_log_dir: scratch.path().join("raw"),
        poll_interval_ms: 20,
        ..Default::default()
    };
    let orchestrator = WipeOrchestrator::new(host, settings);

    let outcome = orchestrator
        .wipe(WipeRequest::new(drive.path_str(), "destroy"), CancelToken::new(), None)
        .await;
    match outcome {
        WipeOutcome::Finished { record, record_path } => (*record, record_path),
        other => panic!("Expected finished outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_record_carries_required_fields() {
    let scratch = TempDir::new().unwrap();
    let (record, path) = wiped_record(&scratch).await;

    let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    for field in [
        "schema_version",
        "certificate_id",
        "session_id",
        "device",
        "device_fingerprint",
        "wipe_method",
        "nist_level",
        "passes_planned",
        "passes_completed",
        "tools_used",
        "status",
        "started_at",
        "finished_at",
        "operator",
        "compliance_flags",
        "system",
        "record_digest",
    ] {
        assert!(json.get(field).is_some(), "missing {}", field);
    }

    assert_eq!(record.schema_version, SCHEMA_VERSION);
    assert_eq!(record.status, WipeStatus::Success);
    assert_eq!(record.passes_completed, 7);
    assert!(record.finished_at >= record.started_at);
    assert_eq!(record.tools_used, vec!["dd"]);
}

#[tokio::test]
async fn test_persisted_record_detects_tampering() {
    let scratch = TempDir::new().unwrap();
    let (_, path) = wiped_record(&scratch).await;

    let mut loaded = certificates::load(&path).unwrap();
    assert!(loaded.verify_digest());

    loaded.status = WipeStatus::Failed;
    assert!(!loaded.verify_digest(), "Edited status must break the digest");
}

#[tokio::test]
async fn test_each_session_gets_a_fresh_certificate() {
    let scratch = TempDir::new().unwrap();
    let (first, _) = wiped_record(&scratch).await;
    let (second, _) = wiped_record(&scratch).await;

    assert_ne!(first.certificate_id, second.certificate_id);
    assert_ne!(first.session_id, second.session_id);
    assert_eq!(first.device_fingerprint, second.device_fingerprint, "Same hardware identity");
}
